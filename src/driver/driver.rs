//! Driver
//!
//! 드라이버 인스턴스 및 설정. URI 스킴으로 토폴로지(직접/라우팅)를 정하고
//! 연결 제공자와 세션 팩토리를 조립합니다.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info};
use url::Url;

use super::bolt::{Transport, CLIENT_USER_AGENT};
use super::error::{DriverError, DriverResult};
use super::pool::{ConnectionPool, Connector, PoolConfig};
use super::provider::{ConnectionProvider, DirectConnectionProvider};
use super::retry::{RetryPolicy, TransientRetryPolicy};
use super::routing::{RoutingConnectionProvider, RoutingPolicy};
use super::session::{Session, SessionConfig};

/// 기본 Bolt 포트
pub const DEFAULT_PORT: u16 = 7687;

// ============================================================================
// AuthToken - 인증 토큰
// ============================================================================

/// 인증 토큰
#[derive(Debug, Clone, Default)]
pub enum AuthToken {
    /// 인증 없음
    #[default]
    None,
    /// Basic 인증 (사용자명/비밀번호)
    Basic {
        /// 사용자명
        username: String,
        /// 비밀번호
        password: String,
        /// 렐름
        realm: Option<String>,
    },
    /// Bearer 토큰
    Bearer {
        /// 토큰
        token: String,
    },
    /// Kerberos 인증
    Kerberos {
        /// 티켓 (base64)
        ticket: String,
    },
    /// 커스텀 인증
    Custom {
        /// 주체
        principal: String,
        /// 자격 증명
        credentials: String,
        /// 렐름
        realm: String,
        /// 스킴
        scheme: String,
        /// 추가 파라미터
        parameters: Option<HashMap<String, String>>,
    },
}

impl AuthToken {
    /// Basic 인증 토큰 생성
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
            realm: None,
        }
    }

    /// Basic 인증 토큰 생성 (realm 포함)
    pub fn basic_with_realm(
        username: impl Into<String>,
        password: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
            realm: Some(realm.into()),
        }
    }

    /// Bearer 토큰 생성
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    /// Kerberos 토큰 생성
    pub fn kerberos(ticket: impl Into<String>) -> Self {
        Self::Kerberos {
            ticket: ticket.into(),
        }
    }

    /// 인증 없음
    pub fn none() -> Self {
        Self::None
    }

    /// 인증 스킴
    pub fn scheme(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
            Self::Kerberos { .. } => "kerberos",
            Self::Custom { scheme, .. } => scheme,
        }
    }
}

// ============================================================================
// TrustStrategy - TLS 신뢰 전략
// ============================================================================

/// TLS 신뢰 전략
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TrustStrategy {
    /// 시스템 인증서 사용
    #[default]
    TrustSystemCas,
    /// 모든 인증서 신뢰 (개발용)
    TrustAllCertificates,
    /// 특정 인증서만 신뢰
    TrustCustomCas {
        /// DER 인증서 목록
        certificates: Vec<Vec<u8>>,
    },
}

impl TrustStrategy {
    /// 설정 문자열에서 파싱
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "TRUST_SYSTEM_CA_SIGNED_CERTIFICATES" | "SYSTEM" => Some(Self::TrustSystemCas),
            "TRUST_ALL_CERTIFICATES" | "ALL" => Some(Self::TrustAllCertificates),
            _ => None,
        }
    }
}

// ============================================================================
// ServerAddress - 서버 주소
// ============================================================================

/// 서버 주소
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// 호스트
    pub host: String,
    /// 포트
    pub port: u16,
}

impl ServerAddress {
    /// 새 서버 주소 생성
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// URI에서 파싱
    pub fn from_uri(uri: &str) -> DriverResult<Self> {
        BoltUri::parse(uri).map(|parsed| parsed.address)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

// ============================================================================
// BoltUri - 접속 URI
// ============================================================================

/// 연결 토폴로지
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// 단일 주소 직접 연결
    Direct,
    /// 라우팅 테이블 기반
    Routing,
}

/// 파싱된 접속 URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoltUri {
    /// 스킴
    pub scheme: String,
    /// 서버 주소
    pub address: ServerAddress,
    /// 토폴로지
    pub topology: Topology,
    /// TLS 암호화 여부
    pub encrypted: bool,
}

impl BoltUri {
    /// URI 파싱
    ///
    /// | 스킴 | 토폴로지 |
    /// |------|----------|
    /// | `bolt`, `bolt+s`, `bolt+ssc` | 직접 |
    /// | `bolt+routing`, `neo4j`, `neo4j+s`, `neo4j+ssc` | 라우팅 |
    pub fn parse(uri: &str) -> DriverResult<Self> {
        let url = Url::parse(uri).map_err(|e| match e {
            url::ParseError::InvalidPort => {
                DriverError::configuration(format!("Illegal port in `{}`", uri))
            }
            other => DriverError::configuration(format!("Invalid address format `{}`: {}", uri, other)),
        })?;

        let scheme = url.scheme().to_lowercase();
        let (topology, encrypted) = match scheme.as_str() {
            "bolt" => (Topology::Direct, false),
            "bolt+s" | "bolt+ssc" => (Topology::Direct, true),
            "bolt+routing" | "neo4j" => (Topology::Routing, false),
            "neo4j+s" | "neo4j+ssc" => (Topology::Routing, true),
            other => {
                return Err(DriverError::configuration(format!(
                    "Unsupported URI scheme: {}",
                    other
                )))
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| DriverError::configuration(format!("Invalid address format `{}`", uri)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');

        Ok(Self {
            address: ServerAddress::new(host, url.port().unwrap_or(DEFAULT_PORT)),
            scheme,
            topology,
            encrypted,
        })
    }
}

// ============================================================================
// DriverConfig - 드라이버 설정
// ============================================================================

/// 드라이버 설정
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// 서버 주소
    pub address: ServerAddress,
    /// 토폴로지
    pub topology: Topology,
    /// 인증 토큰
    pub auth: AuthToken,
    /// TLS 암호화
    pub encrypted: bool,
    /// TLS 신뢰 전략
    pub trust_strategy: TrustStrategy,
    /// 연결 풀 최대 크기
    pub max_connection_pool_size: usize,
    /// 연결 최대 수명
    pub max_connection_lifetime: Duration,
    /// 유휴 연결 타임아웃
    pub idle_timeout: Duration,
    /// 연결 획득 타임아웃
    pub connection_acquisition_timeout: Duration,
    /// 연결 타임아웃
    pub connection_timeout: Duration,
    /// 최대 트랜잭션 재시도 시간
    pub max_transaction_retry_time: Duration,
    /// Keep-Alive 활성화
    pub keep_alive: bool,
    /// User Agent
    pub user_agent: String,
    /// 라우팅 서버 선택 정책
    pub routing_policy: RoutingPolicy,
}

impl DriverConfig {
    /// 새 설정 생성
    pub fn new(uri: &str, auth: AuthToken) -> DriverResult<Self> {
        let parsed = BoltUri::parse(uri)?;
        Ok(Self {
            address: parsed.address,
            topology: parsed.topology,
            auth,
            encrypted: parsed.encrypted,
            ..Self::default()
        })
    }

    /// 빌더 시작
    pub fn builder(uri: &str, auth: AuthToken) -> DriverResult<DriverConfigBuilder> {
        let config = Self::new(uri, auth)?;
        Ok(DriverConfigBuilder { config })
    }

    /// 풀 설정
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_size: self.max_connection_pool_size,
            max_lifetime: self.max_connection_lifetime,
            idle_timeout: self.idle_timeout,
            acquisition_timeout: self.connection_acquisition_timeout,
            connection_timeout: self.connection_timeout,
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        let pool = PoolConfig::default();
        Self {
            address: ServerAddress::default(),
            topology: Topology::Direct,
            auth: AuthToken::default(),
            encrypted: false,
            trust_strategy: TrustStrategy::default(),
            max_connection_pool_size: pool.max_size,
            max_connection_lifetime: pool.max_lifetime,
            idle_timeout: pool.idle_timeout,
            connection_acquisition_timeout: pool.acquisition_timeout,
            connection_timeout: pool.connection_timeout,
            max_transaction_retry_time: super::retry::DEFAULT_MAX_RETRY_TIME,
            keep_alive: true,
            user_agent: CLIENT_USER_AGENT.to_string(),
            routing_policy: RoutingPolicy::default(),
        }
    }
}

// ============================================================================
// DriverConfigBuilder - 설정 빌더
// ============================================================================

/// 드라이버 설정 빌더
#[derive(Debug)]
pub struct DriverConfigBuilder {
    config: DriverConfig,
}

impl DriverConfigBuilder {
    /// TLS 암호화 설정
    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.config.encrypted = encrypted;
        self
    }

    /// TLS 신뢰 전략 설정
    pub fn with_trust_strategy(mut self, strategy: TrustStrategy) -> Self {
        self.config.trust_strategy = strategy;
        self
    }

    /// 연결 풀 크기 설정
    pub fn with_max_connection_pool_size(mut self, size: usize) -> Self {
        self.config.max_connection_pool_size = size;
        self
    }

    /// 연결 최대 수명 설정
    pub fn with_max_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_connection_lifetime = lifetime;
        self
    }

    /// 유휴 타임아웃 설정
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// 연결 획득 타임아웃 설정
    pub fn with_connection_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_acquisition_timeout = timeout;
        self
    }

    /// 연결 타임아웃 설정
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// 최대 트랜잭션 재시도 시간 설정
    pub fn with_max_transaction_retry_time(mut self, time: Duration) -> Self {
        self.config.max_transaction_retry_time = time;
        self
    }

    /// Keep-Alive 설정
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    /// User Agent 설정
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// 라우팅 정책 설정
    pub fn with_routing_policy(mut self, policy: RoutingPolicy) -> Self {
        self.config.routing_policy = policy;
        self
    }

    /// 문자열 키/값으로 옵션 설정
    ///
    /// 알 수 없는 키나 해석할 수 없는 값은 `Configuration` 에러입니다.
    /// 시간 값은 `ms`, `s`, `m` 단위를 붙여 씁니다 (`"500ms"`, `"30s"`).
    pub fn with_option(self, key: &str, value: &str) -> DriverResult<Self> {
        let invalid =
            || DriverError::configuration(format!("Invalid value `{}` for option `{}`", value, key));

        let builder = match key {
            "encrypted" => self.with_encrypted(parse_bool(value).ok_or_else(invalid)?),
            "trust_strategy" => {
                self.with_trust_strategy(TrustStrategy::parse(value).ok_or_else(invalid)?)
            }
            "max_connection_pool_size" => {
                self.with_max_connection_pool_size(value.trim().parse().map_err(|_| invalid())?)
            }
            "max_connection_lifetime" => {
                self.with_max_connection_lifetime(parse_duration(value).ok_or_else(invalid)?)
            }
            "idle_timeout" => self.with_idle_timeout(parse_duration(value).ok_or_else(invalid)?),
            "connection_acquisition_timeout" => self
                .with_connection_acquisition_timeout(parse_duration(value).ok_or_else(invalid)?),
            "connection_timeout" => {
                self.with_connection_timeout(parse_duration(value).ok_or_else(invalid)?)
            }
            "max_transaction_retry_time" => {
                self.with_max_transaction_retry_time(parse_duration(value).ok_or_else(invalid)?)
            }
            "keep_alive" => self.with_keep_alive(parse_bool(value).ok_or_else(invalid)?),
            "user_agent" => self.with_user_agent(value),
            "load_balancing_strategy" => {
                self.with_routing_policy(parse_routing_policy(value).ok_or_else(invalid)?)
            }
            unknown => {
                return Err(DriverError::configuration(format!(
                    "Unknown configuration option `{}`",
                    unknown
                )))
            }
        };
        Ok(builder)
    }

    /// 빌드
    pub fn build(self) -> DriverConfig {
        self.config
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" => Some(true),
        "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Some(ms) = value.strip_suffix("ms") {
        return ms.trim().parse().ok().map(Duration::from_millis);
    }
    if let Some(secs) = value.strip_suffix('s') {
        return secs.trim().parse().ok().map(Duration::from_secs);
    }
    if let Some(mins) = value.strip_suffix('m') {
        return mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }
    None
}

fn parse_routing_policy(value: &str) -> Option<RoutingPolicy> {
    match value.trim().to_lowercase().as_str() {
        "round_robin" => Some(RoutingPolicy::RoundRobin),
        "least_connected" | "least_connections" => Some(RoutingPolicy::LeastConnections),
        "random" => Some(RoutingPolicy::Random),
        _ => None,
    }
}

// ============================================================================
// SessionFactory - 세션 팩토리
// ============================================================================

/// 연결 제공자와 재시도 정책에 묶인 세션 생성기
#[derive(Debug, Clone)]
pub struct SessionFactory {
    provider: Arc<dyn ConnectionProvider>,
    retry_policy: Arc<dyn RetryPolicy>,
}

impl SessionFactory {
    /// 새 팩토리 생성
    pub fn new(provider: Arc<dyn ConnectionProvider>, retry_policy: Arc<dyn RetryPolicy>) -> Self {
        Self {
            provider,
            retry_policy,
        }
    }

    /// 세션 생성
    pub fn new_instance(&self, config: SessionConfig) -> Session {
        Session::new(Arc::clone(&self.provider), config, Arc::clone(&self.retry_policy))
    }
}

// ============================================================================
// Driver - 드라이버
// ============================================================================

/// 그래프 데이터베이스 드라이버
pub struct Driver {
    /// 설정
    config: DriverConfig,
    /// 연결 제공자
    provider: Arc<dyn ConnectionProvider>,
    /// 세션 팩토리
    sessions: SessionFactory,
    /// 열린 상태
    open: RwLock<bool>,
}

impl Driver {
    /// 새 드라이버 생성 (연결은 첫 사용 시 수립)
    pub fn new(uri: &str, auth: AuthToken, transport: Arc<dyn Transport>) -> DriverResult<Self> {
        let config = DriverConfig::new(uri, auth)?;
        Self::with_config(config, transport)
    }

    /// 드라이버 생성 후 연결 확인
    ///
    /// 주소, 인증 오류를 첫 쿼리가 아니라 생성 시점에 드러냅니다.
    pub async fn connect(
        uri: &str,
        auth: AuthToken,
        transport: Arc<dyn Transport>,
    ) -> DriverResult<Self> {
        let driver = Self::new(uri, auth, transport)?;
        if let Err(e) = driver.verify_connectivity().await {
            driver.provider.close().await;
            return Err(e);
        }
        Ok(driver)
    }

    /// 설정으로 드라이버 생성
    pub fn with_config(config: DriverConfig, transport: Arc<dyn Transport>) -> DriverResult<Self> {
        if config.max_connection_pool_size == 0 {
            return Err(DriverError::configuration(
                "max_connection_pool_size must be at least 1",
            ));
        }

        let connector = Connector::new(transport, config.auth.clone())
            .with_user_agent(config.user_agent.clone());

        let provider: Arc<dyn ConnectionProvider> = match config.topology {
            Topology::Direct => Arc::new(DirectConnectionProvider::new(ConnectionPool::new(
                config.address.clone(),
                config.pool_config(),
                connector,
            ))),
            Topology::Routing => Arc::new(
                RoutingConnectionProvider::new(config.address.clone(), config.pool_config(), connector)
                    .with_routing_policy(config.routing_policy),
            ),
        };

        let retry_policy: Arc<dyn RetryPolicy> =
            Arc::new(TransientRetryPolicy::new(config.max_transaction_retry_time));
        let sessions = SessionFactory::new(Arc::clone(&provider), retry_policy);

        info!(
            address = %config.address,
            topology = ?config.topology,
            encrypted = config.encrypted,
            "driver created"
        );

        Ok(Self {
            config,
            provider,
            sessions,
            open: RwLock::new(true),
        })
    }

    /// 트랜잭션 함수 재시도 정책 교체
    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.sessions = SessionFactory::new(Arc::clone(&self.provider), policy);
        self
    }

    /// 세션 생성
    pub fn session(&self, config: SessionConfig) -> DriverResult<Session> {
        self.ensure_open()?;
        Ok(self.sessions.new_instance(config))
    }

    /// 기본 설정으로 세션 생성
    pub fn default_session(&self) -> DriverResult<Session> {
        self.session(SessionConfig::default())
    }

    /// 드라이버 설정
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// 드라이버 종료
    pub async fn close(&self) -> DriverResult<()> {
        {
            let mut open = self.open.write();
            if !*open {
                return Ok(());
            }
            *open = false;
        }

        self.provider.close().await;
        debug!(address = %self.config.address, "driver closed");
        Ok(())
    }

    /// 연결 테스트
    pub async fn verify_connectivity(&self) -> DriverResult<()> {
        self.ensure_open()?;
        self.provider.verify_connectivity().await
    }

    /// 열린 상태 확인
    pub fn is_open(&self) -> bool {
        *self.open.read()
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DriverError::session("Driver is closed"))
        }
    }

    /// 메트릭 조회
    pub fn metrics(&self) -> DriverMetrics {
        let pool_metrics = self.provider.metrics();
        DriverMetrics {
            pool_size: pool_metrics.size,
            idle_connections: pool_metrics.idle,
            in_use_connections: pool_metrics.in_use,
            total_acquisitions: pool_metrics.total_acquisitions,
            total_connections_created: pool_metrics.total_created,
            total_connections_closed: pool_metrics.total_closed,
        }
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("address", &self.config.address)
            .field("topology", &self.config.topology)
            .field("open", &*self.open.read())
            .finish()
    }
}

// ============================================================================
// DriverMetrics - 드라이버 메트릭
// ============================================================================

/// 드라이버 메트릭
#[derive(Debug, Clone, Default)]
pub struct DriverMetrics {
    /// 현재 풀 크기
    pub pool_size: usize,
    /// 유휴 연결 수
    pub idle_connections: usize,
    /// 사용 중인 연결 수
    pub in_use_connections: usize,
    /// 총 연결 획득 횟수
    pub total_acquisitions: u64,
    /// 총 생성된 연결 수
    pub total_connections_created: u64,
    /// 총 닫힌 연결 수
    pub total_connections_closed: u64,
}

// ============================================================================
// Tests
// ============================================================================
