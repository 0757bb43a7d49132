//! Connection
//!
//! 트랜스포트 핸들 하나를 소유하는 연결.
//!
//! 요청은 보내는 즉시 핸들러가 큐 뒤에 붙고, 응답은 항상 큐 앞의 핸들러에
//! 대해서만 읽습니다. 핸들러 k를 완료시키려면 1..k-1이 먼저 완료되어야
//! 하므로 완료 순서는 항상 발행 순서와 같습니다.
//!
//! 실패는 에피소드 단위로 관리합니다. 처음 실패한 요청이 에피소드를 열고,
//! 이후 FAILURE/IGNORED 응답은 같은 에러로 억제됩니다. 에피소드 에러는
//! 그 요청을 지나가는 첫 번째 완료 호출에서 정확히 한 번 보고되며,
//! RESET이 에피소드를 닫습니다.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, MutexGuard, OwnedSemaphorePermit};
use tracing::{debug, trace, warn};

use super::bolt::{BoltRequest, BoltResponse, Codec, RequestToken, TransportHandle};
use super::driver::ServerAddress;
use super::error::{DriverError, DriverResult, ServerFailure};
use super::handler::{ResponseHandler, SuccessCallback};
use super::types::Value;

// ============================================================================
// ConnectionState - 연결 상태
// ============================================================================

/// 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// 사용 가능
    Ready,
    /// 보고되지 않았거나 리셋되지 않은 실패 에피소드가 있음
    Failed,
    /// 트랜스포트 오류로 더 이상 사용할 수 없음
    Defunct,
    /// 닫힘
    Closed,
}

// ============================================================================
// FailureRecord - 실패 에피소드
// ============================================================================

/// 연결의 현재 실패 에피소드
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    /// 에피소드를 시작한 요청의 순번
    pub seq: u64,
    /// 서버 실패
    pub error: ServerFailure,
    /// 호출자에게 보고되었는지 여부
    pub reported: bool,
}

// ============================================================================
// Connection
// ============================================================================

/// 파이프라이닝 연결
pub struct Connection {
    id: u64,
    address: ServerAddress,
    handle: Box<dyn TransportHandle>,
    codec: Arc<dyn Codec>,
    queue: VecDeque<(RequestToken, ResponseHandler)>,
    last_seq: u64,
    failure: Option<FailureRecord>,
    episode_owner: Option<ResponseHandler>,
    defunct: bool,
    created_at: Instant,
    last_used: Instant,
    permit: Option<OwnedSemaphorePermit>,
}

impl Connection {
    /// 새 연결 생성
    pub(crate) fn new(
        id: u64,
        address: ServerAddress,
        handle: Box<dyn TransportHandle>,
        codec: Arc<dyn Codec>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            address,
            handle,
            codec,
            queue: VecDeque::new(),
            last_seq: 0,
            failure: None,
            episode_owner: None,
            defunct: false,
            created_at: now,
            last_used: now,
            permit: None,
        }
    }

    /// 연결 ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 서버 주소
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// 생성 시간
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// 마지막 사용 시간
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// 연결 상태
    pub fn state(&self) -> ConnectionState {
        if self.defunct {
            ConnectionState::Defunct
        } else if !self.handle.is_open() {
            ConnectionState::Closed
        } else if self.failure.is_some() {
            ConnectionState::Failed
        } else {
            ConnectionState::Ready
        }
    }

    /// 사용 가능한 트랜스포트인지 여부
    pub fn is_open(&self) -> bool {
        !self.defunct && self.handle.is_open()
    }

    /// 응답을 기다리는 요청 수
    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    /// 현재 실패 에피소드
    pub fn failure(&self) -> Option<&FailureRecord> {
        self.failure.as_ref()
    }

    /// 실패 에피소드 존재 여부
    pub fn has_failure(&self) -> bool {
        self.failure.is_some()
    }

    pub(crate) fn set_permit(&mut self, permit: OwnedSemaphorePermit) {
        self.permit = Some(permit);
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// 요청 발행 (응답을 기다리지 않음)
    pub fn request(&mut self, request: BoltRequest) -> DriverResult<ResponseHandler> {
        self.request_with(request, None)
    }

    /// 성공 콜백과 함께 요청 발행
    pub fn request_with(
        &mut self,
        request: BoltRequest,
        on_success: Option<SuccessCallback>,
    ) -> DriverResult<ResponseHandler> {
        if !self.is_open() {
            return Err(DriverError::connection(format!(
                "Connection {} to {} is no longer usable",
                self.id, self.address
            )));
        }

        let kind = request.kind();
        let token = match self.handle.send(request) {
            Ok(token) => token,
            Err(e) => {
                self.mark_defunct(&e);
                return Err(e);
            }
        };

        self.last_seq += 1;
        let handler = ResponseHandler::new(self.last_seq, kind, on_success);
        self.queue.push_back((token, handler.clone()));
        self.touch();
        trace!(connection = self.id, seq = self.last_seq, request = %kind, "request issued");
        Ok(handler)
    }

    // ========================================================================
    // Finalization
    // ========================================================================

    /// 핸들러 완료 (앞선 핸들러부터 순서대로). 멱등
    pub async fn finalize(&mut self, handler: &ResponseHandler) -> DriverResult<()> {
        self.finalize_through(handler.seq()).await
    }

    /// `seq`까지의 모든 핸들러 완료
    ///
    /// 아직 보고되지 않은 실패 에피소드가 `seq` 이하에서 시작되었다면
    /// 여기서 한 번 보고합니다.
    pub async fn finalize_through(&mut self, seq: u64) -> DriverResult<()> {
        self.drain_through(seq).await?;

        let due = self
            .failure
            .as_ref()
            .map_or(false, |record| !record.reported && record.seq <= seq);
        match due.then(|| self.report()).flatten() {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    /// 발행된 모든 핸들러 완료
    pub async fn finalize_all(&mut self) -> DriverResult<()> {
        self.finalize_through(self.last_seq).await
    }

    /// 응답만 소비하고 실패는 보고하지 않음
    async fn drain_through(&mut self, seq: u64) -> DriverResult<()> {
        while self.queue.front().map_or(false, |(_, h)| h.seq() <= seq) {
            self.receive_one().await?;
        }
        Ok(())
    }

    /// `handler`에 레코드가 하나 이상 쌓이거나 완료될 때까지 응답 수신
    pub(crate) async fn fill(&mut self, handler: &ResponseHandler) -> DriverResult<()> {
        while handler.buffered_records() == 0 && !handler.is_finished() {
            if !self.queue.iter().any(|(_, h)| h.seq() == handler.seq()) {
                return Err(DriverError::protocol(format!(
                    "Request #{} is not pending on connection {}",
                    handler.seq(),
                    self.id
                )));
            }
            self.receive_one().await?;
        }
        Ok(())
    }

    /// 큐 앞의 핸들러에 대한 응답 메시지 하나 수신
    async fn receive_one(&mut self) -> DriverResult<()> {
        let (token, handler) = match self.queue.front() {
            Some((token, handler)) => (*token, handler.clone()),
            None => return Ok(()),
        };

        let response = match self.handle.fetch(token).await {
            Ok(response) => response,
            Err(e) => {
                self.mark_defunct(&e);
                return Err(e);
            }
        };

        if response.is_summary() {
            self.queue.pop_front();
        }

        match response {
            BoltResponse::Record(values) => self.on_record(&handler, values)?,
            BoltResponse::Success(metadata) => {
                trace!(connection = self.id, seq = handler.seq(), "handler succeeded");
                handler.complete_success(self.codec.decode_success(&metadata));
            }
            BoltResponse::Failure(payload) => {
                let failure = self.codec.decode_failure(&payload);
                self.on_failure(&handler, failure);
            }
            BoltResponse::Ignored => match self.failure.as_ref().map(|r| r.error.clone()) {
                Some(episode) => {
                    trace!(connection = self.id, seq = handler.seq(), "handler ignored");
                    handler.suppress(episode);
                }
                None => {
                    let err = DriverError::protocol(format!(
                        "{} request #{} was ignored without a preceding failure",
                        handler.kind(),
                        handler.seq()
                    ));
                    handler.abort(err.to_string());
                    self.mark_defunct(&err);
                    return Err(err);
                }
            },
        }
        Ok(())
    }

    fn on_record(&mut self, handler: &ResponseHandler, values: Vec<Value>) -> DriverResult<()> {
        if handler.kind().streams_records() {
            handler.push_record(values);
            return Ok(());
        }
        let err = DriverError::protocol(format!(
            "Unexpected RECORD for {} request #{}",
            handler.kind(),
            handler.seq()
        ));
        self.mark_defunct(&err);
        Err(err)
    }

    fn on_failure(&mut self, handler: &ResponseHandler, failure: ServerFailure) {
        match self.failure.as_ref().map(|r| (r.seq, r.error.clone())) {
            Some((episode, error)) => {
                debug!(
                    connection = self.id,
                    seq = handler.seq(),
                    episode,
                    code = %failure.code,
                    "failure suppressed"
                );
                handler.suppress(error);
            }
            None => {
                debug!(connection = self.id, seq = handler.seq(), code = %failure.code, "failure episode opened");
                self.failure = Some(FailureRecord {
                    seq: handler.seq(),
                    error: failure.clone(),
                    reported: false,
                });
                self.episode_owner = Some(handler.clone());
                handler.complete_failure(failure);
            }
        }
    }

    fn mark_defunct(&mut self, err: &DriverError) {
        if !err.is_fatal_to_connection() || self.defunct {
            return;
        }
        warn!(connection = self.id, address = %self.address, error = %err, "connection marked defunct");
        self.defunct = true;
        let reason = err.to_string();
        for (_, handler) in self.queue.drain(..) {
            handler.abort(reason.clone());
        }
    }

    // ========================================================================
    // Episode control
    // ========================================================================

    /// 보고되지 않은 실패를 보고된 것으로 표시하고 반환
    pub fn take_unreported_failure(&mut self) -> Option<ServerFailure> {
        self.report()
    }

    /// 에피소드를 보고됨으로 표시. 에피소드를 연 핸들러에도 같은 표시를 남겨
    /// 그 결과를 나중에 읽을 때 다시 보고되지 않게 함
    fn report(&mut self) -> Option<ServerFailure> {
        let record = self.failure.as_mut().filter(|r| !r.reported)?;
        record.reported = true;
        if let Some(owner) = &self.episode_owner {
            owner.mark_reported();
        }
        debug!(connection = self.id, seq = record.seq, code = %record.error.code, "failure raised");
        Some(record.error.clone())
    }

    /// RESET 전송 후 실패 에피소드 종료
    ///
    /// 앞선 응답은 보고 없이 소비됩니다. 보고되지 않은 실패가 있다면
    /// 호출 전에 [`take_unreported_failure`](Self::take_unreported_failure)로 꺼내야 합니다.
    pub async fn reset(&mut self) -> DriverResult<()> {
        let handler = self.request(BoltRequest::Reset)?;
        self.drain_through(handler.seq()).await?;
        if let Some(err) = handler.outcome().error() {
            return Err(err);
        }
        self.episode_owner = None;
        if self.failure.take().is_some() {
            debug!(connection = self.id, "failure episode cleared");
        }
        Ok(())
    }

    /// 연결 닫기
    pub async fn close(&mut self) {
        for (_, handler) in self.queue.drain(..) {
            handler.abort("Connection closed");
        }
        self.handle.close().await;
        self.permit = None;
        debug!(connection = self.id, address = %self.address, "connection closed");
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state())
            .field("in_flight", &self.queue.len())
            .field("age", &self.created_at.elapsed())
            .finish()
    }
}

// ============================================================================
// ConnectionLease - 공유 연결 임대
// ============================================================================

/// 세션/트랜잭션과 그 결과들이 공유하는 연결 임대
///
/// 연결이 반환되면 내부가 비어 있게 됩니다.
#[derive(Clone)]
pub struct ConnectionLease {
    inner: Arc<Mutex<Option<Connection>>>,
}

impl ConnectionLease {
    /// 새 임대 생성
    pub fn new(connection: Connection) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(connection))),
        }
    }

    /// 연결 잠금
    pub async fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.inner.lock().await
    }

    /// 연결 회수 (반환 표시)
    pub async fn take(&self) -> Option<Connection> {
        self.inner.lock().await.take()
    }

    /// 잠금 없이 회수 시도 (Drop 경로용)
    pub(crate) fn try_take(&self) -> Option<Connection> {
        self.inner.try_lock().ok().and_then(|mut guard| guard.take())
    }

    /// 같은 임대인지 여부
    pub fn same_as(&self, other: &ConnectionLease) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Ok(guard) => f
                .debug_struct("ConnectionLease")
                .field("connection", &guard.as_ref().map(Connection::id))
                .finish(),
            Err(_) => f.debug_struct("ConnectionLease").field("connection", &"<locked>").finish(),
        }
    }
}
