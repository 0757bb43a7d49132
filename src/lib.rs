//! # GraphBolt Driver
//!
//! The client driver core for Bolt-speaking graph databases: pipelined
//! request/response handling, connection pooling, sessions, transactions
//! and the driver factory that assembles them.
//!
//! ## Features
//!
//! - **Pipelining** - Requests are queued on a connection without waiting; results are lazy
//! - **Exactly-once failures** - A server failure is raised once, attributed to the first failing request
//! - **Async/Await** - Built on Tokio
//! - **Connection Pooling** - Bounded per-address pools, direct or routed
//! - **Transactions** - Explicit transactions and retrying transaction functions
//!
//! The wire itself is behind the [`driver::bolt::Transport`] trait. An
//! in-memory [`driver::bolt::ScriptedTransport`] is included for tests.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use graphbolt_driver::{params, AuthToken, Driver, SessionConfig};
//! use graphbolt_driver::driver::bolt::ScriptedTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(ScriptedTransport::new());
//!     let driver = Driver::connect(
//!         "bolt://localhost:7687",
//!         AuthToken::basic("neo4j", "password"),
//!         transport,
//!     )
//!     .await?;
//!
//!     let session = driver.session(SessionConfig::builder().with_write_access().build())?;
//!     let mut result = session
//!         .run("CREATE (n:Person {name: $name}) RETURN n", Some(params! {"name" => "Alice"}))
//!         .await?;
//!
//!     while let Some(record) = result.next().await? {
//!         println!("{:?}", record);
//!     }
//!
//!     // A failure nobody read is reported here
//!     session.close().await?;
//!     driver.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Transactions
//!
//! ```rust,no_run
//! # use graphbolt_driver::Session;
//! # async fn example(session: &Session) -> Result<(), Box<dyn std::error::Error>> {
//! let tx = session.begin_transaction(None).await?;
//! tx.run("CREATE (n:Node {id: 1})", None).await?;
//! tx.run("CREATE (n:Node {id: 2})", None).await?;
//!
//! // failure() always wins over success()
//! tx.success();
//! tx.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Transaction Functions
//!
//! The work is committed when it returns `Ok` and rolled back when it
//! returns `Err`. Transient failures are retried with a fresh transaction.
//!
//! ```rust,no_run
//! # use graphbolt_driver::Session;
//! # async fn example(session: &Session) -> Result<(), Box<dyn std::error::Error>> {
//! let created = session
//!     .write_transaction(|tx| async move {
//!         let summary = tx.run("CREATE (n:Node) RETURN n", None).await?.consume().await?;
//!         Ok(summary.counters.nodes_created)
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use graphbolt_driver::{AuthToken, DriverConfig};
//! use std::time::Duration;
//!
//! let config = DriverConfig::builder("neo4j://localhost:7687", AuthToken::basic("u", "p"))
//!     .unwrap()
//!     .with_max_connection_pool_size(50)
//!     .with_connection_timeout(Duration::from_secs(10))
//!     .with_option("max_transaction_retry_time", "15s")
//!     .unwrap()
//!     .build();
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod driver;

// Re-exports for convenience
pub use driver::{
    AccessMode, AuthToken, Bookmark, ConnectionProvider, Driver, DriverConfig,
    DriverConfigBuilder, DriverError, DriverMetrics, DriverResult, Query, QueryResult, Record,
    ResultSummary, RetryPolicy, ServerAddress, ServerFailure, Session, SessionConfig,
    SessionConfigBuilder, Transaction, TransactionConfig, TransactionState, TrustStrategy, Value,
};

/// Config alias for convenience
pub type Config = DriverConfig;
