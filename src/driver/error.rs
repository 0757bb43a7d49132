//! Driver Error Types
//!
//! 드라이버 에러 정의

use std::fmt;
use thiserror::Error;

// ============================================================================
// DriverError - 드라이버 에러
// ============================================================================

/// 드라이버 에러
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// 연결 에러 (대상 서버에 도달 불가)
    #[error("Connection error: {0}")]
    Connection(String),

    /// 인증 에러
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// 프로토콜 에러
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 응답 순서 위반 (내부 불변식 위반, 사용자에게 노출되면 안 됨)
    #[error("Protocol ordering violation: expected response for request #{expected}, got #{actual}")]
    OrderingViolation { expected: u64, actual: u64 },

    /// 세션 에러
    #[error("Session error: {0}")]
    Session(String),

    /// 트랜잭션 에러
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// 서버가 보고한 쿼리/트랜잭션 실패
    #[error("Server error: {0}")]
    Server(ServerFailure),

    /// 타임아웃 에러
    #[error("Timeout: {0}")]
    Timeout(String),

    /// 풀 에러
    #[error("Pool error: {0}")]
    Pool(String),

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 타입 변환 에러
    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    /// 서비스 불가
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl DriverError {
    /// 연결 에러 생성
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// 인증 에러 생성
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// 프로토콜 에러 생성
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// 세션 에러 생성
    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    /// 트랜잭션 에러 생성
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// 서버 에러 생성
    pub fn server(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Server(ServerFailure::new(code, message))
    }

    /// 타임아웃 에러 생성
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// 풀 에러 생성
    pub fn pool(msg: impl Into<String>) -> Self {
        Self::Pool(msg.into())
    }

    /// 설정 에러 생성
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// 서비스 불가 에러 생성
    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// 타입 변환 에러 생성
    pub fn type_conversion(msg: impl Into<String>) -> Self {
        Self::TypeConversion(msg.into())
    }

    /// 서버 실패 정보 (서버 에러인 경우)
    pub fn server_failure(&self) -> Option<&ServerFailure> {
        match self {
            Self::Server(failure) => Some(failure),
            _ => None,
        }
    }

    /// 재시도 가능 여부
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) | Self::ServiceUnavailable(_) => true,
            Self::Server(failure) => is_retryable_code(&failure.code),
            _ => false,
        }
    }

    /// 클라이언트 에러 여부
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Authentication(_) | Self::Configuration(_) | Self::TypeConversion(_) => true,
            Self::Server(failure) => failure.is_client_error(),
            _ => false,
        }
    }

    /// 연결을 더 이상 사용할 수 없게 만드는 에러인지 여부
    pub(crate) fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Protocol(_) | Self::OrderingViolation { .. }
        )
    }
}

impl From<ServerFailure> for DriverError {
    fn from(failure: ServerFailure) -> Self {
        if failure.is_authentication_error() {
            DriverError::Authentication(failure.message)
        } else {
            DriverError::Server(failure)
        }
    }
}

/// 재시도 가능한 에러 코드 확인
fn is_retryable_code(code: &str) -> bool {
    // 트랜잭션 종료 계열은 TransientError 네임스페이스지만 재시도 대상이 아님
    if code == "Neo.TransientError.Transaction.Terminated"
        || code == "Neo.TransientError.Transaction.LockClientStopped"
    {
        return false;
    }
    code.starts_with("Neo.TransientError")
        || code == "Neo.ClientError.Cluster.NotALeader"
        || code == "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase"
}

// ============================================================================
// Result Type
// ============================================================================

/// 드라이버 결과 타입
pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// ServerFailure - 서버 실패
// ============================================================================

/// 서버가 보고한 실패
///
/// Codec이 FAILURE 응답의 페이로드를 해석한 결과입니다.
/// 에러 코드는 "Neo.{Category}.{SubCategory}.{ErrorType}" 형식을 따릅니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFailure {
    /// 에러 코드
    pub code: String,
    /// 에러 메시지
    pub message: String,
}

impl ServerFailure {
    /// 새 실패 생성
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// 클라이언트 에러 여부
    pub fn is_client_error(&self) -> bool {
        self.code.starts_with("Neo.ClientError")
    }

    /// 데이터베이스 에러 여부
    pub fn is_database_error(&self) -> bool {
        self.code.starts_with("Neo.DatabaseError")
    }

    /// 트랜지언트 에러 여부 (재시도 가능)
    pub fn is_transient_error(&self) -> bool {
        self.code.starts_with("Neo.TransientError")
    }

    /// 인증 에러 여부
    pub fn is_authentication_error(&self) -> bool {
        self.code.starts_with("Neo.ClientError.Security.Unauthorized")
            || self.code.contains("Authentication")
    }

    /// 권한 에러 여부
    pub fn is_authorization_error(&self) -> bool {
        self.code.contains("Forbidden") || self.code.contains("Authorization")
    }
}

impl fmt::Display for ServerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ServerFailure {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_creation() {
        let err = DriverError::connection("Connection refused");
        assert!(matches!(err, DriverError::Connection(_)));

        let err = DriverError::authentication("Invalid credentials");
        assert!(matches!(err, DriverError::Authentication(_)));

        let err = DriverError::server("Neo.ClientError.Statement.SyntaxError", "Invalid syntax");
        assert!(matches!(err, DriverError::Server(_)));
    }

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::connection("Connection refused");
        assert_eq!(err.to_string(), "Connection error: Connection refused");

        let err = DriverError::server("Neo.ClientError.Statement.ArithmeticError", "/ by zero");
        assert_eq!(
            err.to_string(),
            "Server error: Neo.ClientError.Statement.ArithmeticError: / by zero"
        );

        let err = DriverError::OrderingViolation { expected: 1, actual: 2 };
        assert!(err.to_string().contains("#1"));
    }

    #[test]
    fn test_driver_error_retryable() {
        assert!(DriverError::connection("Connection refused").is_retryable());
        assert!(DriverError::timeout("Operation timed out").is_retryable());
        assert!(!DriverError::authentication("Invalid credentials").is_retryable());

        let err = DriverError::server("Neo.TransientError.General.TemporarilyUnavailable", "Server busy");
        assert!(err.is_retryable());

        let err = DriverError::server("Neo.TransientError.Transaction.DeadlockDetected", "Deadlock");
        assert!(err.is_retryable());

        let err = DriverError::server("Neo.TransientError.Transaction.Terminated", "Terminated");
        assert!(!err.is_retryable());

        let err = DriverError::server("Neo.ClientError.Statement.ArithmeticError", "/ by zero");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_driver_error_client_error() {
        assert!(DriverError::authentication("Invalid credentials").is_client_error());
        assert!(DriverError::configuration("Invalid URI").is_client_error());
        assert!(DriverError::server("Neo.ClientError.Statement.SyntaxError", "bad").is_client_error());
        assert!(!DriverError::connection("Connection refused").is_client_error());
    }

    #[test]
    fn test_server_failure_classification() {
        let failure = ServerFailure::new("Neo.ClientError.Statement.SyntaxError", "Invalid syntax");
        assert!(failure.is_client_error());
        assert!(!failure.is_database_error());
        assert!(!failure.is_transient_error());

        let failure = ServerFailure::new("Neo.DatabaseError.General.UnknownError", "Unknown error");
        assert!(failure.is_database_error());

        let failure = ServerFailure::new("Neo.ClientError.Security.Forbidden", "Nope");
        assert!(failure.is_authorization_error());
        assert!(!failure.is_authentication_error());
    }

    #[test]
    fn test_server_failure_into_driver_error() {
        let failure = ServerFailure::new("Neo.ClientError.Security.Unauthorized", "Invalid credentials");
        let err: DriverError = failure.into();
        assert!(matches!(err, DriverError::Authentication(_)));

        let failure = ServerFailure::new("Neo.ClientError.Statement.SyntaxError", "Invalid syntax");
        let err: DriverError = failure.clone().into();
        assert_eq!(err.server_failure(), Some(&failure));
    }

    #[test]
    fn test_fatal_to_connection() {
        assert!(DriverError::connection("reset by peer").is_fatal_to_connection());
        assert!(DriverError::OrderingViolation { expected: 1, actual: 3 }.is_fatal_to_connection());
        assert!(!DriverError::server("Neo.ClientError.Statement.SyntaxError", "x").is_fatal_to_connection());
    }
}
