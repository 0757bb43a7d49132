//! Retry Policy
//!
//! 트랜잭션 함수(`read_transaction`/`write_transaction`)의 재시도 정책.
//! 트랜잭션 자체는 재시도를 가정하지 않으며, 매 시도는 새 트랜잭션과
//! 새 연결 임대로 시작합니다.

use std::fmt;
use std::time::Duration;

use super::error::DriverError;

/// 기본 최대 재시도 시간
pub const DEFAULT_MAX_RETRY_TIME: Duration = Duration::from_secs(30);

/// 재시도 정책
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// 이 에러 후에 다시 시도할지 여부
    fn should_retry(&self, error: &DriverError) -> bool;

    /// `attempt`번째 시도 실패 후 대기 시간 (1부터 시작)
    fn backoff(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }

    /// 첫 시도부터 재시도를 허용하는 최대 경과 시간
    fn max_retry_time(&self) -> Duration;
}

// ============================================================================
// TransientRetryPolicy - 기본 정책
// ============================================================================

/// 일시적 에러만 재시도하는 기본 정책
///
/// 대기 시간은 시도마다 `step`씩 늘어나며 `max_delay`를 넘지 않습니다.
#[derive(Debug, Clone)]
pub struct TransientRetryPolicy {
    max_retry_time: Duration,
    step: Duration,
    max_delay: Duration,
}

impl TransientRetryPolicy {
    /// 새 정책 생성
    pub fn new(max_retry_time: Duration) -> Self {
        Self {
            max_retry_time,
            step: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }

    /// 대기 시간 증가폭 설정
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }
}

impl Default for TransientRetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRY_TIME)
    }
}

impl RetryPolicy for TransientRetryPolicy {
    fn should_retry(&self, error: &DriverError) -> bool {
        error.is_retryable()
    }

    fn backoff(&self, attempt: u32) -> Duration {
        std::cmp::min(self.step.saturating_mul(attempt), self.max_delay)
    }

    fn max_retry_time(&self) -> Duration {
        self.max_retry_time
    }
}

// ============================================================================
// NoRetry
// ============================================================================

/// 재시도하지 않음
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn should_retry(&self, _error: &DriverError) -> bool {
        false
    }

    fn max_retry_time(&self) -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_policy_classification() {
        let policy = TransientRetryPolicy::default();

        assert!(policy.should_retry(&DriverError::server(
            "Neo.TransientError.Transaction.DeadlockDetected",
            "Deadlock"
        )));
        assert!(policy.should_retry(&DriverError::service_unavailable("No writers")));
        assert!(!policy.should_retry(&DriverError::server(
            "Neo.ClientError.Statement.ArithmeticError",
            "/ by zero"
        )));
        assert!(!policy.should_retry(&DriverError::server(
            "Neo.TransientError.Transaction.Terminated",
            "Terminated"
        )));
    }

    #[test]
    fn test_transient_policy_backoff() {
        let policy = TransientRetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(3), Duration::from_millis(300));
        assert_eq!(policy.backoff(1000), Duration::from_secs(5));
        assert_eq!(policy.max_retry_time(), DEFAULT_MAX_RETRY_TIME);
    }

    #[test]
    fn test_no_retry() {
        let policy = NoRetry;
        assert!(!policy.should_retry(&DriverError::connection("refused")));
        assert_eq!(policy.backoff(1), Duration::ZERO);
    }
}
