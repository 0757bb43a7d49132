//! Connection Pool
//!
//! 주소 하나에 대한 연결 풀링

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, warn};

use super::bolt::{BoltCodec, Codec, Transport, CLIENT_USER_AGENT};
use super::connection::Connection;
use super::driver::{AuthToken, ServerAddress};
use super::error::{DriverError, DriverResult};

// ============================================================================
// PoolConfig - 풀 설정
// ============================================================================

/// 연결 풀 설정
///
/// # 필드
///
/// | 필드 | 기본값 | 설명 |
/// |------|--------|------|
/// | `max_size` | 100 | 최대 연결 수 |
/// | `max_lifetime` | 1시간 | 연결 최대 수명 |
/// | `idle_timeout` | 5분 | 유휴 타임아웃 |
/// | `acquisition_timeout` | 60초 | 연결 획득 대기 시간 |
/// | `connection_timeout` | 30초 | 연결 수립 타임아웃 |
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 최대 연결 수
    pub max_size: usize,
    /// 연결 최대 수명
    pub max_lifetime: Duration,
    /// 유휴 타임아웃
    pub idle_timeout: Duration,
    /// 연결 획득 타임아웃
    pub acquisition_timeout: Duration,
    /// 연결 타임아웃
    pub connection_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            max_lifetime: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(300),
            acquisition_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// 빌더 패턴으로 풀 설정 생성
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }
}

/// 풀 설정 빌더
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// 최대 연결 수 설정
    pub fn max_size(mut self, size: usize) -> Self {
        self.config.max_size = size;
        self
    }

    /// 연결 최대 수명 설정
    pub fn max_lifetime(mut self, duration: Duration) -> Self {
        self.config.max_lifetime = duration;
        self
    }

    /// 유휴 타임아웃 설정
    pub fn idle_timeout(mut self, duration: Duration) -> Self {
        self.config.idle_timeout = duration;
        self
    }

    /// 연결 획득 타임아웃 설정
    pub fn acquisition_timeout(mut self, duration: Duration) -> Self {
        self.config.acquisition_timeout = duration;
        self
    }

    /// 연결 타임아웃 설정
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connection_timeout = duration;
        self
    }

    /// 설정 빌드
    pub fn build(self) -> PoolConfig {
        self.config
    }
}

// ============================================================================
// Connector - 연결 생성기
// ============================================================================

/// 트랜스포트, 코덱, 인증 정보를 묶은 연결 생성기
#[derive(Clone)]
pub struct Connector {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    auth: AuthToken,
    user_agent: String,
}

impl Connector {
    /// 새 생성기 (기본 코덱, 기본 user agent)
    pub fn new(transport: Arc<dyn Transport>, auth: AuthToken) -> Self {
        Self {
            transport,
            codec: Arc::new(BoltCodec),
            auth,
            user_agent: CLIENT_USER_AGENT.to_string(),
        }
    }

    /// 코덱 설정
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// user agent 설정
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// 연결 수립 및 인증
    pub async fn connect(
        &self,
        id: u64,
        address: &ServerAddress,
        timeout: Duration,
    ) -> DriverResult<Connection> {
        let handle = tokio::time::timeout(
            timeout,
            self.transport.connect(address, &self.auth, &self.user_agent),
        )
        .await
        .map_err(|_| {
            DriverError::connection(format!("Connection to {} timed out after {:?}", address, timeout))
        })??;

        debug!(connection = id, address = %address, "connection created");
        Ok(Connection::new(id, address.clone(), handle, Arc::clone(&self.codec)))
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("transport", &self.transport)
            .field("auth_scheme", &self.auth.scheme())
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

// ============================================================================
// PoolMetrics - 풀 메트릭
// ============================================================================

/// 풀 메트릭
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// 현재 크기
    pub size: usize,
    /// 유휴 연결 수
    pub idle: usize,
    /// 사용 중인 연결 수
    pub in_use: usize,
    /// 총 획득 횟수
    pub total_acquisitions: u64,
    /// 총 생성 횟수
    pub total_created: u64,
    /// 총 닫힌 연결 수
    pub total_closed: u64,
    /// 총 타임아웃 횟수
    pub total_timeouts: u64,
}

impl PoolMetrics {
    /// 두 메트릭 합산
    pub fn merge(mut self, other: &PoolMetrics) -> Self {
        self.size += other.size;
        self.idle += other.idle;
        self.in_use += other.in_use;
        self.total_acquisitions += other.total_acquisitions;
        self.total_created += other.total_created;
        self.total_closed += other.total_closed;
        self.total_timeouts += other.total_timeouts;
        self
    }
}

// ============================================================================
// ConnectionPool - 연결 풀
// ============================================================================

/// 연결 풀
///
/// 살아 있는 연결마다 세마포어 허가를 하나씩 쥐고 있으므로 유휴 연결을
/// 포함한 전체 연결 수가 `max_size`를 넘지 않습니다.
pub struct ConnectionPool {
    /// 서버 주소
    address: ServerAddress,
    /// 풀 설정
    config: PoolConfig,
    /// 연결 생성기
    connector: Connector,
    /// 유휴 연결들
    idle_connections: Mutex<VecDeque<Connection>>,
    /// 세마포어 (연결 수 제한)
    semaphore: Arc<Semaphore>,
    /// 유휴 연결 반환 또는 허가 해제 알림
    available: Notify,
    /// 현재 크기
    size: AtomicUsize,
    /// 사용 중인 연결 수
    in_use: AtomicUsize,
    /// 총 생성 횟수
    total_created: AtomicU64,
    /// 총 획득 횟수
    total_acquisitions: AtomicU64,
    /// 총 닫힌 횟수
    total_closed: AtomicU64,
    /// 총 타임아웃 횟수
    total_timeouts: AtomicU64,
    /// 다음 연결 ID
    next_id: Arc<AtomicU64>,
    /// 열린 상태
    open: RwLock<bool>,
}

impl ConnectionPool {
    /// 새 연결 풀 생성
    pub fn new(address: ServerAddress, config: PoolConfig, connector: Connector) -> Self {
        Self::with_id_source(address, config, connector, Arc::new(AtomicU64::new(1)))
    }

    /// 연결 ID 발급기를 공유하는 풀 생성
    pub(crate) fn with_id_source(
        address: ServerAddress,
        config: PoolConfig,
        connector: Connector,
        next_id: Arc<AtomicU64>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_size));

        Self {
            address,
            config,
            connector,
            idle_connections: Mutex::new(VecDeque::new()),
            semaphore,
            available: Notify::new(),
            size: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
            total_created: AtomicU64::new(0),
            total_acquisitions: AtomicU64::new(0),
            total_closed: AtomicU64::new(0),
            total_timeouts: AtomicU64::new(0),
            next_id,
            open: RwLock::new(true),
        }
    }

    /// 서버 주소
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// 풀 설정
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// 열린 상태 여부
    pub fn is_open(&self) -> bool {
        *self.open.read()
    }

    /// 연결 획득
    ///
    /// 유휴 연결을 먼저 사용하고, 여유가 있으면 새 연결을 만들며, 풀이 가득
    /// 찼다면 `acquisition_timeout`까지 반환을 기다립니다.
    pub async fn acquire(&self) -> DriverResult<Connection> {
        let deadline = tokio::time::Instant::now() + self.config.acquisition_timeout;

        loop {
            if !self.is_open() {
                return Err(DriverError::pool("Pool is closed"));
            }

            if let Some(conn) = self.get_idle_connection().await {
                return Ok(self.hand_out(conn));
            }

            if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let mut conn = match self
                    .connector
                    .connect(id, &self.address, self.config.connection_timeout)
                    .await
                {
                    Ok(conn) => conn,
                    Err(e) => {
                        drop(permit);
                        self.available.notify_one();
                        return Err(e);
                    }
                };
                conn.set_permit(permit);
                self.size.fetch_add(1, Ordering::Relaxed);
                self.total_created.fetch_add(1, Ordering::Relaxed);
                return Ok(self.hand_out(conn));
            }

            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                self.total_timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(DriverError::timeout(format!(
                    "Unable to acquire connection to {} from the pool within {:?}",
                    self.address, self.config.acquisition_timeout
                )));
            }
        }
    }

    fn hand_out(&self, mut conn: Connection) -> Connection {
        conn.touch();
        self.total_acquisitions.fetch_add(1, Ordering::Relaxed);
        self.in_use.fetch_add(1, Ordering::Relaxed);
        conn
    }

    /// 유효한 유휴 연결 가져오기 (만료된 연결은 닫음)
    async fn get_idle_connection(&self) -> Option<Connection> {
        let mut expired = Vec::new();
        let found = {
            let mut idle = self.idle_connections.lock();
            let mut found = None;
            while let Some(conn) = idle.pop_front() {
                if self.is_valid(&conn) {
                    found = Some(conn);
                    break;
                }
                expired.push(conn);
            }
            found
        };

        for conn in expired {
            self.discard(conn).await;
        }
        found
    }

    /// 유효성 확인
    fn is_valid(&self, conn: &Connection) -> bool {
        conn.is_open()
            && conn.created_at().elapsed() <= self.config.max_lifetime
            && conn.last_used().elapsed() <= self.config.idle_timeout
    }

    /// 연결 반환
    ///
    /// 남은 응답을 모두 소비하고, 아직 보고되지 않은 실패가 있으면 여기서
    /// 반환합니다. 실패 에피소드가 있던 연결은 RESET 후 풀에 돌려놓고,
    /// 사용할 수 없는 연결은 닫습니다.
    pub async fn release(&self, mut conn: Connection) -> DriverResult<()> {
        self.in_use.fetch_sub(1, Ordering::Relaxed);

        let outcome = conn.finalize_all().await;

        if conn.is_open() && conn.has_failure() {
            if let Err(e) = conn.reset().await {
                warn!(connection = conn.id(), error = %e, "reset on release failed");
            }
        }

        if !self.is_open() || !conn.is_open() || conn.has_failure() || !self.is_valid(&conn) {
            self.discard(conn).await;
        } else {
            conn.touch();
            self.idle_connections.lock().push_back(conn);
            self.available.notify_one();
        }

        outcome
    }

    /// 런타임 없이 연결 버리기 (Drop 경로용)
    ///
    /// 남은 응답을 소비하거나 트랜스포트를 닫지 않고, 연결을 버린 뒤 크기와
    /// 사용 중 카운터만 맞춥니다.
    pub fn forget(&self, conn: Connection) {
        debug!(connection = conn.id(), address = %self.address, "connection forgotten without cleanup");
        drop(conn);
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        self.size.fetch_sub(1, Ordering::Relaxed);
        self.total_closed.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
    }

    /// 연결 폐기
    async fn discard(&self, mut conn: Connection) {
        conn.close().await;
        self.size.fetch_sub(1, Ordering::Relaxed);
        self.total_closed.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
    }

    /// 풀 닫기
    pub async fn close(&self) {
        *self.open.write() = false;

        let idle: Vec<Connection> = self.idle_connections.lock().drain(..).collect();
        for conn in idle {
            self.discard(conn).await;
        }
        self.available.notify_waiters();
        debug!(address = %self.address, "pool closed");
    }

    /// 메트릭 조회
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            size: self.size(),
            idle: self.idle_count(),
            in_use: self.in_use_count(),
            total_acquisitions: self.total_acquisitions.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
        }
    }

    /// 풀 크기
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// 유휴 연결 수
    pub fn idle_count(&self) -> usize {
        self.idle_connections.lock().len()
    }

    /// 사용 중인 연결 수
    pub fn in_use_count(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("address", &self.address)
            .field("size", &self.size())
            .field("idle", &self.idle_count())
            .field("in_use", &self.in_use_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
