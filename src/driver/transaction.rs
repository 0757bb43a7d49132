//! Transaction API
//!
//! 명시적 트랜잭션. 성공/실패 의도를 표시해 두고 `close`에서 커밋 또는
//! 롤백으로 정리합니다. 실패 표시는 성공 표시보다 우선합니다.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::bolt::{BoltRequest, SuccessMetadata};
use super::connection::ConnectionLease;
use super::error::{DriverError, DriverResult};
use super::handler::ResponseHandler;
use super::provider::ConnectionProvider;
use super::result::QueryResult;
use super::session::{AccessMode, Query, SessionShared};
use super::types::Value;

// ============================================================================
// TransactionConfig - 트랜잭션 설정
// ============================================================================

/// 트랜잭션 설정
#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    /// 타임아웃
    pub timeout: Option<Duration>,
    /// 메타데이터
    pub metadata: HashMap<String, Value>,
}

impl TransactionConfig {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 타임아웃 설정
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 메타데이터 추가
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// TransactionState - 트랜잭션 상태
// ============================================================================

/// 트랜잭션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// 활성 상태 (표시 없음)
    Active,
    /// 성공 표시됨
    MarkedSuccess,
    /// 실패 표시됨
    MarkedFailure,
    /// 커밋됨
    Committed,
    /// 롤백됨
    RolledBack,
}

impl TransactionState {
    /// 완료 상태 여부
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

#[derive(Debug, Default)]
struct Marks {
    success: bool,
    failure: bool,
    outcome: Option<TransactionState>,
}

impl Marks {
    fn state(&self) -> TransactionState {
        match (self.outcome, self.failure, self.success) {
            (Some(outcome), _, _) => outcome,
            (None, true, _) => TransactionState::MarkedFailure,
            (None, false, true) => TransactionState::MarkedSuccess,
            (None, false, false) => TransactionState::Active,
        }
    }

    fn commit_intent(&self) -> bool {
        self.success && !self.failure
    }
}

// ============================================================================
// Transaction - 트랜잭션
// ============================================================================

/// 명시적 트랜잭션
///
/// 복제본은 같은 트랜잭션을 가리킵니다. 트랜잭션 함수에 넘긴 값과
/// 세션이 정리하는 값이 같은 상태를 공유합니다.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

pub(crate) struct TransactionInner {
    lease: ConnectionLease,
    provider: Arc<dyn ConnectionProvider>,
    session: Arc<SessionShared>,
    mode: AccessMode,
    database: Option<String>,
    config: TransactionConfig,
    begin: ResponseHandler,
    marks: Mutex<Marks>,
    closing: tokio::sync::Mutex<()>,
}

impl Transaction {
    pub(crate) fn new(
        lease: ConnectionLease,
        provider: Arc<dyn ConnectionProvider>,
        session: Arc<SessionShared>,
        mode: AccessMode,
        database: Option<String>,
        config: TransactionConfig,
        begin: ResponseHandler,
    ) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                lease,
                provider,
                session,
                mode,
                database,
                config,
                begin,
                marks: Mutex::new(Marks::default()),
                closing: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<TransactionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<TransactionInner> {
        &self.inner
    }

    /// 쿼리 실행
    ///
    /// 앞선 쿼리가 실패했다면 새 요청을 보내지 않고 에러를 반환합니다.
    pub async fn run(
        &self,
        query: impl Into<Query>,
        params: Option<HashMap<String, Value>>,
    ) -> DriverResult<QueryResult> {
        self.ensure_open()?;

        let mut query = query.into();
        if let Some(p) = params {
            query = query.with_params(p);
        }

        let mut guard = self.inner.lease.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| DriverError::transaction("Transaction is no longer attached to a connection"))?;

        if let Some(failure) = conn.take_unreported_failure() {
            return Err(failure.into());
        }
        if conn.has_failure() {
            return Err(DriverError::transaction(
                "Cannot run more queries in this transaction, because a previous query failed. \
                 Roll back the transaction.",
            ));
        }

        let run = conn.request(BoltRequest::Run {
            query: query.text.clone(),
            parameters: query.parameters.clone(),
            auto_commit: None,
        })?;
        let pull = conn.request(BoltRequest::Pull { n: -1 })?;
        drop(guard);

        Ok(QueryResult::new(query, self.inner.lease.clone(), run, pull))
    }

    /// 성공 표시 (close 시 커밋)
    pub fn success(&self) {
        let mut marks = self.inner.marks.lock();
        if marks.outcome.is_none() {
            marks.success = true;
        }
    }

    /// 실패 표시 (close 시 롤백, 성공 표시보다 우선)
    pub fn failure(&self) {
        let mut marks = self.inner.marks.lock();
        if marks.outcome.is_none() {
            marks.failure = true;
        }
    }

    /// 트랜잭션 닫기
    ///
    /// 성공만 표시된 경우 커밋하고 그 외에는 롤백합니다. 트랜잭션 중
    /// 보고되지 않은 서버 실패가 있으면 여기서 반환됩니다.
    pub async fn close(&self) -> DriverResult<()> {
        let commit = self.inner.marks.lock().commit_intent();
        self.inner.resolve(commit).await
    }

    /// 커밋
    pub async fn commit(&self) -> DriverResult<()> {
        self.ensure_open()?;
        self.success();
        self.close().await?;
        match self.state() {
            TransactionState::Committed => Ok(()),
            _ => Err(DriverError::transaction(
                "Transaction was rolled back because it was marked as failed",
            )),
        }
    }

    /// 롤백
    pub async fn rollback(&self) -> DriverResult<()> {
        self.ensure_open()?;
        self.failure();
        self.close().await
    }

    /// 트랜잭션 상태
    pub fn state(&self) -> TransactionState {
        self.inner.marks.lock().state()
    }

    /// 열린 상태 여부
    pub fn is_open(&self) -> bool {
        !self.state().is_terminated()
    }

    /// 접근 모드
    pub fn access_mode(&self) -> AccessMode {
        self.inner.mode
    }

    /// 데이터베이스
    pub fn database(&self) -> Option<&str> {
        self.inner.database.as_deref()
    }

    /// 설정
    pub fn config(&self) -> &TransactionConfig {
        &self.inner.config
    }

    fn ensure_open(&self) -> DriverResult<()> {
        match self.state() {
            TransactionState::Committed => Err(DriverError::transaction(
                "Transaction has already been committed",
            )),
            TransactionState::RolledBack => Err(DriverError::transaction(
                "Transaction has already been rolled back",
            )),
            _ => Ok(()),
        }
    }
}

impl TransactionInner {
    pub(crate) fn is_terminated(&self) -> bool {
        self.marks.lock().outcome.is_some()
    }

    pub(crate) fn commit_intent(&self) -> bool {
        self.marks.lock().commit_intent()
    }

    /// 커밋 또는 롤백 후 연결 반환
    pub(crate) async fn resolve(self: &Arc<Self>, commit: bool) -> DriverResult<()> {
        let _closing = self.closing.lock().await;
        if self.is_terminated() {
            return Ok(());
        }

        let mut first_error: Option<DriverError> = None;
        let mut committed = false;

        let connection = {
            let mut guard = self.lease.lock().await;
            if let Some(conn) = guard.as_mut() {
                if let Err(e) = conn.finalize_all().await {
                    first_error = Some(e);
                }
                let clean = first_error.is_none() && conn.is_open() && !conn.has_failure();

                if clean && commit {
                    let session = Arc::clone(&self.session);
                    let outcome = match conn.request_with(
                        BoltRequest::Commit,
                        Some(Box::new(move |meta: &SuccessMetadata| {
                            if let Some(bookmark) = &meta.bookmark {
                                session.update_bookmark(bookmark.clone());
                            }
                        })),
                    ) {
                        Ok(handler) => conn.finalize(&handler).await,
                        Err(e) => Err(e),
                    };
                    match outcome {
                        Ok(()) => committed = true,
                        Err(e) => first_error = Some(e),
                    }
                } else if clean {
                    let outcome = match conn.request(BoltRequest::Rollback) {
                        Ok(handler) => conn.finalize(&handler).await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = outcome {
                        first_error = Some(e);
                    }
                }
            }
            guard.take()
        };

        if let Some(conn) = connection {
            if let Err(e) = self.provider.release(conn).await {
                first_error.get_or_insert(e);
            }
        }

        let outcome = if committed {
            TransactionState::Committed
        } else {
            TransactionState::RolledBack
        };
        self.marks.lock().outcome = Some(outcome);
        self.session.clear_transaction(self);

        debug!(
            state = ?outcome,
            begin = ?self.begin.outcome(),
            error = ?first_error,
            "transaction closed"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("mode", &self.inner.mode)
            .field("database", &self.inner.database)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for TransactionInner {
    fn drop(&mut self) {
        if self.marks.get_mut().outcome.is_some() {
            return;
        }

        warn!("transaction dropped without being closed, rolling back");
        let Some(mut conn) = self.lease.try_take() else {
            return;
        };

        // 비동기 정리는 런타임 안에서만 가능
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let provider = Arc::clone(&self.provider);
                handle.spawn(async move {
                    let _ = conn.finalize_all().await;
                    if conn.is_open() {
                        if let Err(e) = conn.reset().await {
                            debug!(error = %e, "reset of dropped transaction failed");
                        }
                    }
                    if let Err(e) = provider.release(conn).await {
                        warn!(error = %e, "releasing dropped transaction's connection failed");
                    }
                });
            }
            Err(_) => self.provider.discard(conn),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
