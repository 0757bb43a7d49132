//! Driver Module
//!
//! 그래프 데이터베이스 클라이언트 드라이버의 코어.
//!
//! # 구성
//!
//! - 응답 핸들러 체인 (ResponseHandler, Connection)
//! - 연결 풀과 연결 제공자 (ConnectionPool, DirectConnectionProvider, RoutingConnectionProvider)
//! - 세션 (Session, SessionConfig, Bookmark)
//! - 트랜잭션 (Transaction, TransactionConfig, RetryPolicy)
//! - 드라이버 (Driver, DriverConfig, AuthToken)
//!
//! 요청은 연결에 파이프라인으로 쌓이고 결과는 지연 평가됩니다. 서버 실패는
//! 실패 에피소드마다 정확히 한 번, 가장 먼저 실패한 요청의 에러로 보고됩니다.
//!
//! # Example
//!
//! ```ignore
//! use graphbolt_driver::driver::{AuthToken, Driver, SessionConfig};
//!
//! let driver = Driver::connect("bolt://localhost:7687", AuthToken::basic("neo4j", "password"), transport).await?;
//! let session = driver.session(SessionConfig::default())?;
//!
//! let mut result = session.run("MATCH (n) RETURN n LIMIT 10", None).await?;
//! while let Some(record) = result.next().await? {
//!     println!("{:?}", record);
//! }
//!
//! let tx = session.begin_transaction(None).await?;
//! tx.run("CREATE (n:Person {name: $name})", Some(params! {"name" => "Alice"})).await?;
//! tx.commit().await?;
//!
//! session.close().await?;
//! driver.close().await?;
//! ```

pub mod bolt;
pub mod routing;
mod connection;
mod driver;
mod error;
mod handler;
mod pool;
mod provider;
mod record;
mod result;
mod retry;
mod session;
mod transaction;
mod types;

// Re-exports
pub use connection::{Connection, ConnectionLease, ConnectionState, FailureRecord};
pub use driver::{
    AuthToken, BoltUri, Driver, DriverConfig, DriverConfigBuilder, DriverMetrics, ServerAddress,
    SessionFactory, Topology, TrustStrategy, DEFAULT_PORT,
};
pub use error::{DriverError, DriverResult, ServerFailure};
pub use handler::{HandlerOutcome, ResponseHandler, SuccessCallback};
pub use pool::{ConnectionPool, Connector, PoolConfig, PoolConfigBuilder, PoolMetrics};
pub use provider::{ConnectionProvider, DirectConnectionProvider};
pub use record::{Record, RecordKeys};
pub use result::{Counters, QueryResult, QueryType, ResultSummary};
pub use retry::{NoRetry, RetryPolicy, TransientRetryPolicy, DEFAULT_MAX_RETRY_TIME};
pub use session::{AccessMode, Bookmark, Query, Session, SessionConfig, SessionConfigBuilder};
pub use transaction::{Transaction, TransactionConfig, TransactionState};
pub use types::{Node, Relationship, Value};

/// 파라미터 맵 생성 매크로
#[macro_export]
macro_rules! params {
    () => {
        std::collections::HashMap::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = std::collections::HashMap::new();
        $(
            map.insert(::std::string::String::from($key), $crate::driver::Value::from($value));
        )+
        map
    }};
}
