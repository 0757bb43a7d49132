//! Response Handler
//!
//! 연결에 보낸 요청마다 하나씩 생성되는 응답 핸들러.
//!
//! 핸들러는 연결의 요청 큐에 발행 순서(seq)대로 쌓이고, 큐 앞에서부터
//! 하나씩 완료됩니다. 핸들러 자체는 결과 상태만 보관하며 응답을 읽고
//! 해석하는 일은 [`Connection`](super::connection::Connection)이 맡습니다.
//! 상태는 공유되므로 연결이 반환된 뒤에도 결과 쪽에서 읽을 수 있습니다.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::bolt::{RequestKind, SuccessMetadata};
use super::error::{DriverError, ServerFailure};
use super::types::Value;

/// 성공 시 한 번 호출되는 콜백 (북마크 갱신 등)
pub type SuccessCallback = Box<dyn FnOnce(&SuccessMetadata) + Send>;

// ============================================================================
// HandlerOutcome - 핸들러 결과
// ============================================================================

/// 핸들러 결과
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// 응답 대기 중
    Pending,
    /// 성공
    Succeeded(SuccessMetadata),
    /// 이 요청이 실패 에피소드를 시작함
    Failed(ServerFailure),
    /// 앞선 요청의 실패로 무시됨 (에피소드 에러를 그대로 관찰)
    Suppressed(ServerFailure),
    /// 응답을 받기 전에 연결이 끊김
    Aborted(String),
}

impl HandlerOutcome {
    /// 완료 여부
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// 결과에 담긴 에러 (에피소드가 이미 보고되었는지는 따지지 않음)
    pub fn error(&self) -> Option<DriverError> {
        match self {
            Self::Failed(failure) | Self::Suppressed(failure) => Some(failure.clone().into()),
            Self::Aborted(reason) => Some(DriverError::connection(reason.clone())),
            Self::Pending | Self::Succeeded(_) => None,
        }
    }
}

// ============================================================================
// ResponseHandler
// ============================================================================

struct HandlerState {
    outcome: HandlerOutcome,
    records: VecDeque<Vec<Value>>,
    on_success: Option<SuccessCallback>,
    reported: bool,
}

/// 요청 하나에 대한 응답 핸들러
#[derive(Clone)]
pub struct ResponseHandler {
    seq: u64,
    kind: RequestKind,
    state: Arc<Mutex<HandlerState>>,
}

impl ResponseHandler {
    pub(crate) fn new(seq: u64, kind: RequestKind, on_success: Option<SuccessCallback>) -> Self {
        Self {
            seq,
            kind,
            state: Arc::new(Mutex::new(HandlerState {
                outcome: HandlerOutcome::Pending,
                records: VecDeque::new(),
                on_success,
                reported: false,
            })),
        }
    }

    /// 발행 순번
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// 요청 종류
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// 현재 결과
    pub fn outcome(&self) -> HandlerOutcome {
        self.state.lock().outcome.clone()
    }

    /// 완료 여부
    pub fn is_finished(&self) -> bool {
        self.state.lock().outcome.is_finished()
    }

    /// 실패 정보 (직접 실패했거나 억제된 경우)
    pub fn failure(&self) -> Option<ServerFailure> {
        match &self.state.lock().outcome {
            HandlerOutcome::Failed(f) | HandlerOutcome::Suppressed(f) => Some(f.clone()),
            _ => None,
        }
    }

    /// 이 핸들러가 연 실패 에피소드가 이미 호출자에게 보고되었는지 여부
    pub fn is_reported(&self) -> bool {
        self.state.lock().reported
    }

    /// 보고됨으로 표시. 처음 표시한 경우에만 true
    pub(crate) fn mark_reported(&self) -> bool {
        let mut state = self.state.lock();
        !std::mem::replace(&mut state.reported, true)
    }

    /// 버퍼링된 레코드 하나 꺼내기
    pub(crate) fn take_record(&self) -> Option<Vec<Value>> {
        self.state.lock().records.pop_front()
    }

    /// 버퍼링된 레코드 수
    pub fn buffered_records(&self) -> usize {
        self.state.lock().records.len()
    }

    /// 버퍼링된 레코드 버리기
    pub(crate) fn discard_records(&self) {
        self.state.lock().records.clear();
    }

    pub(crate) fn push_record(&self, values: Vec<Value>) {
        self.state.lock().records.push_back(values);
    }

    /// 성공 처리. 콜백은 락 밖에서 한 번만 호출
    pub(crate) fn complete_success(&self, metadata: SuccessMetadata) {
        let callback = {
            let mut state = self.state.lock();
            if state.outcome.is_finished() {
                return;
            }
            state.outcome = HandlerOutcome::Succeeded(metadata.clone());
            state.on_success.take()
        };
        if let Some(callback) = callback {
            callback(&metadata);
        }
    }

    pub(crate) fn complete_failure(&self, failure: ServerFailure) {
        self.finish(HandlerOutcome::Failed(failure));
    }

    pub(crate) fn suppress(&self, failure: ServerFailure) {
        self.finish(HandlerOutcome::Suppressed(failure));
    }

    pub(crate) fn abort(&self, reason: impl Into<String>) {
        self.finish(HandlerOutcome::Aborted(reason.into()));
    }

    fn finish(&self, outcome: HandlerOutcome) {
        let mut state = self.state.lock();
        if !state.outcome.is_finished() {
            state.outcome = outcome;
            state.on_success = None;
        }
    }
}

impl fmt::Debug for ResponseHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResponseHandler")
            .field("seq", &self.seq)
            .field("kind", &self.kind)
            .field("outcome", &state.outcome)
            .field("buffered", &state.records.len())
            .finish()
    }
}
