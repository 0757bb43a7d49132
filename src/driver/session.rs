//! Session Management
//!
//! 세션은 자동 커밋 쿼리와 명시적 트랜잭션을 실행하는 논리적 작업 단위입니다.
//! 한 시점에 연결 하나만 임대하며, 이전 결과가 남긴 서버 실패는 새 작업을
//! 받기 전에 먼저 드러냅니다.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::bolt::{BoltRequest, SuccessMetadata, TransactionParameters};
use super::connection::ConnectionLease;
use super::error::{DriverError, DriverResult};
use super::provider::ConnectionProvider;
use super::result::QueryResult;
use super::retry::RetryPolicy;
use super::transaction::{Transaction, TransactionConfig, TransactionInner};
use super::types::Value;

// ============================================================================
// AccessMode - 접근 모드
// ============================================================================

/// 접근 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// 읽기
    #[default]
    Read,
    /// 쓰기
    Write,
}

impl AccessMode {
    /// 모드 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Bookmark - 북마크
// ============================================================================

/// 인과적 일관성 북마크
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bookmark {
    /// 북마크 값
    value: String,
}

impl Bookmark {
    /// 새 북마크 생성
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// 북마크 값
    pub fn value(&self) -> &str {
        &self.value
    }

    /// 빈 북마크 여부
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl fmt::Display for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl From<String> for Bookmark {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Bookmark {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// SessionConfig - 세션 설정
// ============================================================================

/// 세션 설정
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 데이터베이스 이름
    pub database: Option<String>,
    /// 기본 접근 모드
    pub default_access_mode: AccessMode,
    /// 초기 북마크
    pub bookmarks: Vec<Bookmark>,
    /// 임퍼손트 사용자
    pub impersonated_user: Option<String>,
}

impl SessionConfig {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 빌더 시작
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            database: None,
            default_access_mode: AccessMode::Write,
            bookmarks: Vec::new(),
            impersonated_user: None,
        }
    }
}

/// 세션 설정 빌더
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// 새 빌더 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 데이터베이스 설정
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.config.database = Some(database.into());
        self
    }

    /// 읽기 모드로 설정
    pub fn with_read_access(mut self) -> Self {
        self.config.default_access_mode = AccessMode::Read;
        self
    }

    /// 쓰기 모드로 설정
    pub fn with_write_access(mut self) -> Self {
        self.config.default_access_mode = AccessMode::Write;
        self
    }

    /// 북마크 설정
    pub fn with_bookmarks(mut self, bookmarks: Vec<Bookmark>) -> Self {
        self.config.bookmarks = bookmarks;
        self
    }

    /// 북마크 추가
    pub fn with_bookmark(mut self, bookmark: Bookmark) -> Self {
        self.config.bookmarks.push(bookmark);
        self
    }

    /// 임퍼손트 사용자 설정
    pub fn with_impersonated_user(mut self, user: impl Into<String>) -> Self {
        self.config.impersonated_user = Some(user.into());
        self
    }

    /// 빌드
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

// ============================================================================
// Query - 쿼리
// ============================================================================

/// 쿼리
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// 쿼리 텍스트
    pub text: String,
    /// 파라미터
    pub parameters: HashMap<String, Value>,
}

impl Query {
    /// 새 쿼리 생성
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: HashMap::new(),
        }
    }

    /// 파라미터 추가
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// 파라미터들 추가
    pub fn with_params(mut self, params: HashMap<String, Value>) -> Self {
        self.parameters.extend(params);
        self
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Query {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// SessionShared - 세션과 트랜잭션이 공유하는 상태
// ============================================================================

/// 북마크와 열린 트랜잭션 표시
pub(crate) struct SessionShared {
    initial_bookmarks: Vec<Bookmark>,
    last_bookmark: RwLock<Option<Bookmark>>,
    open_transaction: Mutex<Weak<TransactionInner>>,
}

impl SessionShared {
    fn new(initial_bookmarks: Vec<Bookmark>) -> Self {
        Self {
            initial_bookmarks,
            last_bookmark: RwLock::new(None),
            open_transaction: Mutex::new(Weak::new()),
        }
    }

    /// 다음 요청에 실을 북마크 (마지막 북마크가 있으면 그것만)
    fn request_bookmarks(&self) -> Vec<String> {
        match &*self.last_bookmark.read() {
            Some(bookmark) => vec![bookmark.value().to_string()],
            None => self
                .initial_bookmarks
                .iter()
                .filter(|b| !b.is_empty())
                .map(|b| b.value().to_string())
                .collect(),
        }
    }

    pub(crate) fn update_bookmark(&self, bookmark: Bookmark) {
        if !bookmark.is_empty() {
            debug!(bookmark = %bookmark, "session bookmark updated");
            *self.last_bookmark.write() = Some(bookmark);
        }
    }

    fn last_bookmark(&self) -> Option<Bookmark> {
        self.last_bookmark.read().clone()
    }

    fn open_transaction(&self) -> Option<Transaction> {
        self.open_transaction
            .lock()
            .upgrade()
            .filter(|inner| !inner.is_terminated())
            .map(Transaction::from_inner)
    }

    fn register_transaction(&self, tx: &Transaction) {
        *self.open_transaction.lock() = Arc::downgrade(tx.inner());
    }

    pub(crate) fn clear_transaction(&self, tx: &Arc<TransactionInner>) {
        let mut open = self.open_transaction.lock();
        if std::ptr::eq(open.as_ptr(), Arc::as_ptr(tx)) {
            *open = Weak::new();
        }
    }
}

// ============================================================================
// Session - 세션
// ============================================================================

/// 데이터베이스 세션
pub struct Session {
    /// 연결 제공자
    provider: Arc<dyn ConnectionProvider>,
    /// 세션 설정
    config: SessionConfig,
    /// 트랜잭션 함수 재시도 정책
    retry_policy: Arc<dyn RetryPolicy>,
    /// 트랜잭션과 공유하는 상태
    shared: Arc<SessionShared>,
    /// 자동 커밋 쿼리용 연결
    lease: tokio::sync::Mutex<Option<ConnectionLease>>,
    /// 열린 상태
    open: RwLock<bool>,
}

impl Session {
    /// 새 세션 생성
    pub(crate) fn new(
        provider: Arc<dyn ConnectionProvider>,
        config: SessionConfig,
        retry_policy: Arc<dyn RetryPolicy>,
    ) -> Self {
        let shared = Arc::new(SessionShared::new(config.bookmarks.clone()));
        Self {
            provider,
            config,
            retry_policy,
            shared,
            lease: tokio::sync::Mutex::new(None),
            open: RwLock::new(true),
        }
    }

    /// 쿼리 실행 (auto-commit)
    ///
    /// 이전 결과가 남긴 보고되지 않은 실패가 있으면 새 요청을 보내지 않고
    /// 그 실패를 반환합니다.
    pub async fn run(
        &self,
        query: impl Into<Query>,
        params: Option<HashMap<String, Value>>,
    ) -> DriverResult<QueryResult> {
        self.ensure_open()?;
        if self.shared.open_transaction().is_some() {
            return Err(DriverError::session(
                "Queries cannot be run directly on a session with an open transaction; \
                 either run from within the transaction or use a different session.",
            ));
        }

        let mut query = query.into();
        if let Some(p) = params {
            query = query.with_params(p);
        }

        let mut slot = self.lease.lock().await;
        self.settle_lease(&mut slot).await?;

        let lease = match slot.as_ref() {
            Some(lease) => lease.clone(),
            None => {
                let conn = self.provider.acquire(self.config.default_access_mode).await?;
                let lease = ConnectionLease::new(conn);
                *slot = Some(lease.clone());
                lease
            }
        };

        let mut guard = lease.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| DriverError::session("Session connection was released"))?;

        let shared = Arc::clone(&self.shared);
        let run = conn.request(BoltRequest::Run {
            query: query.text.clone(),
            parameters: query.parameters.clone(),
            auto_commit: Some(self.transaction_parameters(
                self.config.default_access_mode,
                &TransactionConfig::default(),
            )),
        })?;
        let pull = conn.request_with(
            BoltRequest::Pull { n: -1 },
            Some(Box::new(move |meta: &SuccessMetadata| {
                if let Some(bookmark) = &meta.bookmark {
                    shared.update_bookmark(bookmark.clone());
                }
            })),
        )?;
        drop(guard);

        Ok(QueryResult::new(query, lease, run, pull))
    }

    /// 트랜잭션 시작
    pub async fn begin_transaction(
        &self,
        config: Option<TransactionConfig>,
    ) -> DriverResult<Transaction> {
        self.begin_with_mode(self.config.default_access_mode, config.unwrap_or_default())
            .await
    }

    /// 읽기 트랜잭션 함수
    pub async fn read_transaction<F, Fut, T>(&self, work: F) -> DriverResult<T>
    where
        F: Fn(Transaction) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        self.execute_transaction(AccessMode::Read, TransactionConfig::default(), work)
            .await
    }

    /// 쓰기 트랜잭션 함수
    pub async fn write_transaction<F, Fut, T>(&self, work: F) -> DriverResult<T>
    where
        F: Fn(Transaction) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        self.execute_transaction(AccessMode::Write, TransactionConfig::default(), work)
            .await
    }

    /// 설정을 지정한 트랜잭션 함수
    pub async fn execute_transaction<F, Fut, T>(
        &self,
        mode: AccessMode,
        config: TransactionConfig,
        work: F,
    ) -> DriverResult<T>
    where
        F: Fn(Transaction) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        self.ensure_open()?;

        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match self.attempt_transaction(mode, config.clone(), &work).await {
                Ok(value) => return Ok(value),
                Err(e)
                    if self.retry_policy.should_retry(&e)
                        && start.elapsed() < self.retry_policy.max_retry_time() =>
                {
                    let delay = self.retry_policy.backoff(attempt);
                    warn!(
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "transaction failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 한 번의 시도: 정상 반환이면 커밋, 에러면 롤백
    async fn attempt_transaction<F, Fut, T>(
        &self,
        mode: AccessMode,
        config: TransactionConfig,
        work: &F,
    ) -> DriverResult<T>
    where
        F: Fn(Transaction) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        let tx = self.begin_with_mode(mode, config).await?;

        match work(tx.clone()).await {
            Ok(value) => {
                tx.success();
                tx.close().await?;
                Ok(value)
            }
            Err(e) => {
                tx.failure();
                if let Err(close_error) = tx.close().await {
                    debug!(error = %close_error, "rollback after failed work also failed");
                }
                Err(e)
            }
        }
    }

    async fn begin_with_mode(
        &self,
        mode: AccessMode,
        config: TransactionConfig,
    ) -> DriverResult<Transaction> {
        self.ensure_open()?;
        if self.shared.open_transaction().is_some() {
            return Err(DriverError::session(
                "You cannot begin a transaction on a session with an open transaction; \
                 either run from within the transaction or use a different session.",
            ));
        }

        // 자동 커밋 결과를 먼저 정리 (남은 실패는 여기서 드러남)
        let previous = self.lease.lock().await.take();
        self.release_lease(previous).await?;

        let mut conn = self.provider.acquire(mode).await?;
        let begin = match conn.request(BoltRequest::Begin(self.transaction_parameters(mode, &config))) {
            Ok(handler) => handler,
            Err(e) => {
                if let Err(release_error) = self.provider.release(conn).await {
                    debug!(error = %release_error, "release after failed BEGIN also failed");
                }
                return Err(e);
            }
        };

        let tx = Transaction::new(
            ConnectionLease::new(conn),
            Arc::clone(&self.provider),
            Arc::clone(&self.shared),
            mode,
            self.config.database.clone(),
            config,
            begin,
        );
        self.shared.register_transaction(&tx);
        Ok(tx)
    }

    /// 자동 커밋 연결의 남은 응답을 소비하고, 끊긴 연결은 반환
    async fn settle_lease(&self, slot: &mut Option<ConnectionLease>) -> DriverResult<()> {
        let Some(lease) = slot.as_ref() else {
            return Ok(());
        };

        let usable = {
            let mut guard = lease.lock().await;
            match guard.as_mut() {
                Some(conn) => {
                    conn.finalize_all().await?;
                    if conn.has_failure() && conn.is_open() {
                        conn.reset().await?;
                    }
                    conn.is_open()
                }
                None => false,
            }
        };

        if !usable {
            if let Err(e) = self.release_lease(slot.take()).await {
                debug!(error = %e, "releasing broken session connection failed");
            }
        }
        Ok(())
    }

    async fn release_lease(&self, lease: Option<ConnectionLease>) -> DriverResult<()> {
        let Some(lease) = lease else {
            return Ok(());
        };
        match lease.take().await {
            Some(conn) => self.provider.release(conn).await,
            None => Ok(()),
        }
    }

    fn transaction_parameters(
        &self,
        mode: AccessMode,
        config: &TransactionConfig,
    ) -> TransactionParameters {
        TransactionParameters {
            bookmarks: self.shared.request_bookmarks(),
            mode,
            database: self.config.database.clone(),
            timeout: config.timeout,
            metadata: config.metadata.clone(),
            impersonated_user: self.config.impersonated_user.clone(),
        }
    }

    /// 마지막 북마크
    pub fn last_bookmark(&self) -> Option<Bookmark> {
        self.shared.last_bookmark()
    }

    /// 모든 북마크 (초기 북마크 + 마지막 북마크)
    pub fn last_bookmarks(&self) -> Vec<Bookmark> {
        let mut bookmarks = self.config.bookmarks.clone();
        if let Some(bookmark) = self.last_bookmark() {
            bookmarks.push(bookmark);
        }
        bookmarks
    }

    /// 세션 닫기
    ///
    /// 열린 트랜잭션은 성공 표시만 있는 경우 커밋하고 아니면 롤백합니다.
    /// 읽지 않은 결과의 서버 실패는 여기서 반환됩니다.
    pub async fn close(&self) -> DriverResult<()> {
        {
            let mut open = self.open.write();
            if !*open {
                return Ok(());
            }
            *open = false;
        }

        let mut first_error: Option<DriverError> = None;

        if let Some(tx) = self.shared.open_transaction() {
            let commit = tx.inner().commit_intent();
            if let Err(e) = tx.inner().resolve(commit).await {
                first_error = Some(e);
            }
        }

        let lease = self.lease.lock().await.take();
        if let Err(e) = self.release_lease(lease).await {
            first_error.get_or_insert(e);
        }

        debug!(error = ?first_error, "session closed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 열린 상태 확인
    pub fn is_open(&self) -> bool {
        *self.open.read()
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DriverError::session("Session is closed"))
        }
    }

    /// 세션 설정
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("database", &self.config.database)
            .field("mode", &self.config.default_access_mode)
            .field("open", &*self.open.read())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(lease) = self.lease.get_mut().take() else {
            return;
        };
        let Some(conn) = lease.try_take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let provider = Arc::clone(&self.provider);
                handle.spawn(async move {
                    if let Err(e) = provider.release(conn).await {
                        warn!(error = %e, "unconsumed failure discarded with dropped session");
                    }
                });
            }
            Err(_) => {
                warn!("session dropped outside a runtime, connection discarded");
                self.provider.discard(conn);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::bolt::{RequestKind, ScriptedQuery, ScriptedTransport};
    use crate::driver::driver::{AuthToken, ServerAddress};
    use crate::driver::pool::{ConnectionPool, Connector, PoolConfig};
    use crate::driver::provider::DirectConnectionProvider;
    use crate::driver::retry::{NoRetry, TransientRetryPolicy};
    use crate::driver::transaction::TransactionState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn session_with(
        transport: &ScriptedTransport,
        config: SessionConfig,
        retry_policy: Arc<dyn RetryPolicy>,
    ) -> Session {
        let pool = ConnectionPool::new(
            ServerAddress::default(),
            PoolConfig::default(),
            Connector::new(Arc::new(transport.clone()), AuthToken::none()),
        );
        Session::new(Arc::new(DirectConnectionProvider::new(pool)), config, retry_policy)
    }

    fn session(transport: &ScriptedTransport) -> Session {
        session_with(transport, SessionConfig::default(), Arc::new(NoRetry))
    }

    fn transport() -> ScriptedTransport {
        let transport = ScriptedTransport::new();
        transport
            .on_query(
                "UNWIND [1, 2, 3] AS n RETURN n",
                ScriptedQuery::returning(
                    &["n"],
                    vec![vec![Value::Integer(1)], vec![Value::Integer(2)], vec![Value::Integer(3)]],
                ),
            )
            .on_query("RETURN 1", ScriptedQuery::returning(&["1"], vec![vec![Value::Integer(1)]]))
            .on_query(
                "CREATE (n:Person)",
                ScriptedQuery::empty().writes().with_stat("nodes-created", 1),
            )
            .on_query(
                "RETURN 10/0",
                ScriptedQuery::failing("Neo.ClientError.Statement.ArithmeticError", "/ by zero"),
            );
        transport
    }

    #[test]
    fn test_access_mode() {
        assert_eq!(AccessMode::default(), AccessMode::Read);
        assert_eq!(AccessMode::Write.to_string(), "WRITE");
        assert_eq!(SessionConfig::default().default_access_mode, AccessMode::Write);
    }

    #[test]
    fn test_bookmark() {
        let bookmark = Bookmark::new("graphbolt:bookmark:v1:tx123");
        assert_eq!(bookmark.value(), "graphbolt:bookmark:v1:tx123");
        assert!(!bookmark.is_empty());

        let b1: Bookmark = "bookmark1".into();
        assert_eq!(b1.to_string(), "bookmark1");
        assert!(Bookmark::new("").is_empty());
    }

    #[test]
    fn test_session_config_builder() {
        let config = SessionConfig::builder()
            .with_database("mydb")
            .with_read_access()
            .with_bookmark(Bookmark::new("b1"))
            .with_impersonated_user("alice")
            .build();

        assert_eq!(config.database, Some("mydb".to_string()));
        assert_eq!(config.default_access_mode, AccessMode::Read);
        assert_eq!(config.bookmarks.len(), 1);
        assert_eq!(config.impersonated_user.as_deref(), Some("alice"));
    }

    #[test]
    fn test_query() {
        let query = Query::new("MATCH (n) RETURN n")
            .with_param("name", "Alice")
            .with_param("age", 30i64);

        assert_eq!(query.text, "MATCH (n) RETURN n");
        assert_eq!(query.parameters.get("name"), Some(&Value::String("Alice".into())));
        assert_eq!(query.parameters.get("age"), Some(&Value::Integer(30)));

        let q: Query = String::from("RETURN 2").into();
        assert_eq!(q.text, "RETURN 2");
    }

    #[tokio::test]
    async fn test_failure_deferred_to_close() {
        let transport = transport();
        let session = session(&transport);

        let mut result = session.run("RETURN 10/0", None).await.unwrap();
        let err = session.close().await.unwrap_err();
        assert!(err.to_string().contains("/ by zero"));
        assert!(!session.is_open());

        // close에서 드러난 실패는 결과를 읽을 때 다시 나오지 않음
        assert!(result.next().await.unwrap().is_none());
        assert!(result.consume().await.is_ok());

        let err = session.run("RETURN 1", None).await.unwrap_err();
        assert!(matches!(err, DriverError::Session(_)));
        assert!(err.to_string().contains("closed"));
    }

    #[tokio::test]
    async fn test_unconsumed_failure_blocks_next_run() {
        let transport = transport();
        let session = session(&transport);

        session.run("RETURN 1", None).await.unwrap();
        session.run("UNWIND [1, 2, 3] AS n RETURN n", None).await.unwrap();
        let mut third = session.run("RETURN 10/0", None).await.unwrap();

        let err = session.run("CREATE (n:Person)", None).await.unwrap_err();
        assert!(err.to_string().contains("/ by zero"));
        assert_eq!(
            transport.queries_run(),
            vec!["RETURN 1", "UNWIND [1, 2, 3] AS n RETURN n", "RETURN 10/0"]
        );

        // 이미 run에서 드러난 실패라 결과 쪽에서는 다시 나오지 않음
        assert!(third.next().await.unwrap().is_none());
        let summary = third.consume().await.unwrap();
        assert_eq!(summary.query.text, "RETURN 10/0");
        assert!(!summary.counters.contains_updates());

        // 한 번 드러난 실패는 다시 나오지 않음
        let mut fifth = session.run("RETURN 1", None).await.unwrap();
        assert_eq!(fifth.single().await.unwrap().get_int("1").unwrap(), 1);
        assert_eq!(transport.count(RequestKind::Reset), 1);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_results_readable_after_close() {
        let transport = transport();
        let session = session(&transport);

        let mut first = session.run("UNWIND [1, 2, 3] AS n RETURN n", None).await.unwrap();
        let mut second = session.run("RETURN 1", None).await.unwrap();
        session.close().await.unwrap();

        assert_eq!(first.list().await.unwrap().len(), 3);
        assert_eq!(second.keys().await.unwrap(), vec!["1"]);
        assert_eq!(second.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_auto_commit_updates_bookmark() {
        let transport = transport();
        let session = session(&transport);

        let summary = session.run("CREATE (n:Person)", None).await.unwrap().consume().await.unwrap();
        assert_eq!(summary.counters.nodes_created, 1);
        assert_eq!(session.last_bookmark(), transport.last_bookmark().map(Bookmark::new));
    }

    #[tokio::test]
    async fn test_one_connection_per_session() {
        let transport = transport();
        let session = session(&transport);

        for _ in 0..3 {
            session.run("RETURN 1", None).await.unwrap();
        }
        let tx = session.begin_transaction(None).await.unwrap();
        tx.close().await.unwrap();
        session.close().await.unwrap();

        assert_eq!(transport.connections_opened(), 1);
    }

    #[tokio::test]
    async fn test_open_transaction_blocks_session_work() {
        let transport = transport();
        let session = session(&transport);

        let tx = session.begin_transaction(None).await.unwrap();
        assert!(matches!(
            session.run("RETURN 1", None).await,
            Err(DriverError::Session(_))
        ));
        assert!(matches!(
            session.begin_transaction(None).await,
            Err(DriverError::Session(_))
        ));

        tx.close().await.unwrap();
        session.run("RETURN 1", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_begin_raises_pending_auto_commit_failure() {
        let transport = transport();
        let session = session(&transport);

        session.run("RETURN 10/0", None).await.unwrap();
        let err = session.begin_transaction(None).await.unwrap_err();
        assert!(err.to_string().contains("/ by zero"));

        let tx = session.begin_transaction(None).await.unwrap();
        tx.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_bookmarks_chain_into_begin() {
        let transport = transport();
        let config = SessionConfig::builder()
            .with_bookmark(Bookmark::new("bm:initial"))
            .build();
        let session = session_with(&transport, config, Arc::new(NoRetry));

        session
            .write_transaction(|tx| async move {
                tx.run("CREATE (n:Person)", None).await?;
                Ok(())
            })
            .await
            .unwrap();
        let committed = session.last_bookmark().unwrap();

        let tx = session.begin_transaction(None).await.unwrap();
        tx.close().await.unwrap();

        let begins: Vec<Vec<String>> = transport
            .sent_requests()
            .into_iter()
            .filter_map(|r| match r {
                BoltRequest::Begin(params) => Some(params.bookmarks),
                _ => None,
            })
            .collect();
        assert_eq!(begins[0], vec!["bm:initial".to_string()]);
        assert_eq!(begins[1], vec![committed.value().to_string()]);
        assert_eq!(
            session.last_bookmarks(),
            vec![Bookmark::new("bm:initial"), committed]
        );
    }

    #[tokio::test]
    async fn test_transaction_function_commits_by_default() {
        let transport = transport();
        let session = session(&transport);

        let created = session
            .write_transaction(|tx| async move {
                let summary = tx.run("CREATE (n:Person)", None).await?.consume().await?;
                Ok(summary.counters.nodes_created)
            })
            .await
            .unwrap();

        assert_eq!(created, 1);
        assert_eq!(transport.count(RequestKind::Commit), 1);
        assert!(session.last_bookmark().is_some());
    }

    #[tokio::test]
    async fn test_transaction_function_marked_failure_returns_value() {
        let transport = transport();
        let session = session(&transport);

        let value = session
            .read_transaction(|tx| async move {
                let mut result = tx.run("RETURN 1", None).await?;
                let n = result.single().await?.get_int("1")?;
                tx.failure();
                Ok(n)
            })
            .await
            .unwrap();

        assert_eq!(value, 1);
        assert_eq!(transport.count(RequestKind::Commit), 0);
        assert_eq!(transport.count(RequestKind::Rollback), 1);
        assert!(session.last_bookmark().is_none());
    }

    #[tokio::test]
    async fn test_transaction_function_error_rolls_back() {
        let transport = transport();
        let session = session(&transport);

        let err = session
            .write_transaction(|tx| async move {
                tx.run("CREATE (n:Person)", None).await?;
                Err::<(), _>(DriverError::session("application gave up"))
            })
            .await
            .unwrap_err();

        assert!(err.to_string().contains("application gave up"));
        assert_eq!(transport.count(RequestKind::Commit), 0);
        assert_eq!(transport.count(RequestKind::Rollback), 1);
        assert!(session.last_bookmark().is_none());
    }

    #[tokio::test]
    async fn test_rollback_keeps_previous_bookmark() {
        let transport = transport();
        let session = session(&transport);
        let committed = Some(Bookmark::new("bm:1"));

        session
            .write_transaction(|tx| async move {
                tx.run("CREATE (n:Person)", None).await?.consume().await?;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(session.last_bookmark(), committed);

        // failure 표시
        session
            .write_transaction(|tx| async move {
                tx.run("CREATE (n:Person)", None).await?;
                tx.failure();
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(session.last_bookmark(), committed);

        // 작업이 에러를 반환
        session
            .write_transaction(|tx| async move {
                tx.run("CREATE (n:Person)", None).await?;
                Err::<(), _>(DriverError::session("application gave up"))
            })
            .await
            .unwrap_err();
        assert_eq!(session.last_bookmark(), committed);

        // 표시 없이 close
        let tx = session.begin_transaction(None).await.unwrap();
        tx.run("CREATE (n:Person)", None).await.unwrap();
        tx.close().await.unwrap();
        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert_eq!(session.last_bookmark(), committed);

        assert_eq!(transport.count(RequestKind::Commit), 1);
        assert_eq!(transport.count(RequestKind::Rollback), 3);
        assert_eq!(transport.last_bookmark().as_deref(), Some("bm:1"));
    }

    #[tokio::test]
    async fn test_transaction_function_surfaces_unread_failure() {
        let transport = transport();
        let session = session(&transport);

        let err = session
            .write_transaction(|tx| async move {
                tx.run("RETURN 10/0", None).await?;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(err.to_string().contains("/ by zero"));
        assert_eq!(transport.count(RequestKind::Commit), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let transport = transport();
        let session = session_with(
            &transport,
            SessionConfig::default(),
            Arc::new(TransientRetryPolicy::new(Duration::from_secs(30))),
        );
        let attempts = AtomicUsize::new(0);

        let value = session
            .write_transaction(|tx| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    tx.run("CREATE (n:Person)", None).await?;
                    if attempt < 3 {
                        return Err(DriverError::server(
                            "Neo.TransientError.Transaction.DeadlockDetected",
                            "deadlock",
                        ));
                    }
                    Ok(attempt)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(transport.count(RequestKind::Begin), 3);
        assert_eq!(transport.count(RequestKind::Rollback), 2);
        assert_eq!(transport.count(RequestKind::Commit), 1);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let transport = transport();
        let session = session_with(
            &transport,
            SessionConfig::default(),
            Arc::new(TransientRetryPolicy::default()),
        );

        let err = session
            .write_transaction(|tx| async move {
                tx.run("RETURN 10/0", None).await?.consume().await?;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(err.is_client_error());
        assert_eq!(transport.count(RequestKind::Begin), 1);
    }

    #[tokio::test]
    async fn test_close_resolves_open_transaction() {
        let transport = transport();
        let session = session(&transport);

        let tx = session.begin_transaction(None).await.unwrap();
        tx.run("CREATE (n:Person)", None).await.unwrap();
        session.close().await.unwrap();
        assert_eq!(tx.state(), TransactionState::RolledBack);

        let session = self::session(&transport);
        let tx = session.begin_transaction(None).await.unwrap();
        tx.success();
        session.close().await.unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let transport = transport();
        let session = session(&transport);

        session.run("RETURN 10/0", None).await.unwrap();
        assert!(session.close().await.is_err());
        session.close().await.unwrap();
    }

    #[test]
    fn test_drop_outside_runtime_keeps_pool_counters() {
        let transport = transport();
        let provider = Arc::new(DirectConnectionProvider::new(ConnectionPool::new(
            ServerAddress::default(),
            PoolConfig::default(),
            Connector::new(Arc::new(transport.clone()), AuthToken::none()),
        )));
        let shared: Arc<dyn ConnectionProvider> = provider.clone();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (auto_commit, explicit, tx) = runtime.block_on(async {
            let auto_commit = Session::new(Arc::clone(&shared), SessionConfig::default(), Arc::new(NoRetry));
            auto_commit.run("RETURN 1", None).await.unwrap();
            let explicit = Session::new(Arc::clone(&shared), SessionConfig::default(), Arc::new(NoRetry));
            let tx = explicit.begin_transaction(None).await.unwrap();
            (auto_commit, explicit, tx)
        });
        assert_eq!(provider.metrics().in_use, 2);

        drop(tx);
        drop(explicit);
        drop(auto_commit);

        let metrics = provider.metrics();
        assert_eq!(metrics.size, 0);
        assert_eq!(metrics.in_use, 0);
        assert_eq!(metrics.total_closed, 2);
    }

    #[tokio::test]
    async fn test_broken_connection_is_replaced() {
        let transport = transport();
        transport.on_query("RETURN 'gone'", ScriptedQuery::empty().disconnecting());
        let session = session(&transport);

        let mut result = session.run("RETURN 'gone'", None).await.unwrap();
        assert!(matches!(result.consume().await, Err(DriverError::Connection(_))));

        let mut next = session.run("RETURN 1", None).await.unwrap();
        assert_eq!(next.list().await.unwrap().len(), 1);
        assert_eq!(transport.connections_opened(), 2);
    }
}
