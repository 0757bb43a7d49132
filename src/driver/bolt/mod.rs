//! Bolt collaborator contracts for the driver core.
//!
//! The driver core never touches sockets or bytes. It talks to a
//! [`Transport`] that opens [`TransportHandle`]s, pipelines requests on them
//! and hands back one response message at a time, and to a [`Codec`] that
//! turns FAILURE payloads and SUCCESS metadata into typed values.
//!
//! # Architecture
//!
//! ```text
//! Session / Transaction
//!   └── Connection (handler queue, failure episode)
//!         ├── TransportHandle   send(request) -> token, fetch(token) -> response
//!         └── Codec             FAILURE -> ServerFailure, SUCCESS -> SuccessMetadata
//! ```
//!
//! [`ScriptedTransport`] is an in-memory implementation that behaves like a
//! server on the other end of the wire and records what it was sent.

pub mod scripted;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use super::driver::{AuthToken, ServerAddress};
use super::error::{DriverResult, ServerFailure};
use super::result::{Counters, QueryType};
use super::session::{AccessMode, Bookmark};
use super::types::Value;

pub use scripted::{ScriptedQuery, ScriptedTransport};

/// Client user agent string
pub const CLIENT_USER_AGENT: &str = concat!("GraphBolt-Driver/", env!("CARGO_PKG_VERSION"));

/// Map-shaped metadata carried by SUCCESS and FAILURE messages
pub type Metadata = HashMap<String, Value>;

// ============================================================================
// Requests
// ============================================================================

/// Transaction parameters carried by BEGIN and by auto-commit RUN
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransactionParameters {
    /// Bookmarks the server must have applied before running the work
    pub bookmarks: Vec<String>,
    /// Access mode
    pub mode: AccessMode,
    /// Target database
    pub database: Option<String>,
    /// Server-side transaction timeout
    pub timeout: Option<Duration>,
    /// Transaction metadata
    pub metadata: HashMap<String, Value>,
    /// Impersonated user
    pub impersonated_user: Option<String>,
}

/// A request sent on a connection
#[derive(Debug, Clone, PartialEq)]
pub enum BoltRequest {
    /// Open an explicit transaction
    Begin(TransactionParameters),
    /// Run a query; `auto_commit` is set outside explicit transactions
    Run {
        query: String,
        parameters: HashMap<String, Value>,
        auto_commit: Option<TransactionParameters>,
    },
    /// Stream `n` records of the last RUN (-1 for all)
    Pull { n: i64 },
    /// Discard `n` records of the last RUN (-1 for all)
    Discard { n: i64 },
    /// Commit the open transaction
    Commit,
    /// Roll back the open transaction
    Rollback,
    /// Return the connection to a clean state, clearing any failure
    Reset,
}

impl BoltRequest {
    /// Request kind
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Begin(_) => RequestKind::Begin,
            Self::Run { .. } => RequestKind::Run,
            Self::Pull { .. } => RequestKind::Pull,
            Self::Discard { .. } => RequestKind::Discard,
            Self::Commit => RequestKind::Commit,
            Self::Rollback => RequestKind::Rollback,
            Self::Reset => RequestKind::Reset,
        }
    }
}

/// Request kind, used for logging and for routing RECORD messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// BEGIN
    Begin,
    /// RUN
    Run,
    /// PULL
    Pull,
    /// DISCARD
    Discard,
    /// COMMIT
    Commit,
    /// ROLLBACK
    Rollback,
    /// RESET
    Reset,
}

impl RequestKind {
    /// Protocol message name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Begin => "BEGIN",
            Self::Run => "RUN",
            Self::Pull => "PULL",
            Self::Discard => "DISCARD",
            Self::Commit => "COMMIT",
            Self::Rollback => "ROLLBACK",
            Self::Reset => "RESET",
        }
    }

    /// Whether RECORD messages may precede the summary
    pub fn streams_records(&self) -> bool {
        matches!(self, Self::Pull)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque token identifying a sent request on its handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestToken(pub u64);

// ============================================================================
// Responses
// ============================================================================

/// A single response message
#[derive(Debug, Clone, PartialEq)]
pub enum BoltResponse {
    /// One record of a streaming request
    Record(Vec<Value>),
    /// Request succeeded
    Success(Metadata),
    /// Request failed
    Failure(Metadata),
    /// Request skipped because an earlier request on the connection failed
    Ignored,
}

impl BoltResponse {
    /// Whether this message ends the request's response
    pub fn is_summary(&self) -> bool {
        !matches!(self, Self::Record(_))
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Opens transport handles to a server.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Connect and authenticate.
    ///
    /// Fails with [`DriverError::Connection`](super::DriverError::Connection) when the
    /// target is unreachable and [`DriverError::Authentication`](super::DriverError::Authentication)
    /// when the credentials are rejected.
    async fn connect(
        &self,
        address: &ServerAddress,
        auth: &AuthToken,
        user_agent: &str,
    ) -> DriverResult<Box<dyn TransportHandle>>;
}

/// One open connection on the wire.
#[async_trait]
pub trait TransportHandle: Send + fmt::Debug {
    /// Queue a request. Never waits for the server.
    fn send(&mut self, request: BoltRequest) -> DriverResult<RequestToken>;

    /// Receive the next response message for `token`.
    ///
    /// Responses arrive in send order; asking for any token other than the
    /// oldest unanswered one is an ordering violation.
    async fn fetch(&mut self, token: RequestToken) -> DriverResult<BoltResponse>;

    /// Close the handle. Idempotent.
    async fn close(&mut self);

    /// Whether the handle can still carry requests
    fn is_open(&self) -> bool;
}

// ============================================================================
// Codec
// ============================================================================

/// Typed view of SUCCESS metadata
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuccessMetadata {
    /// Result columns (RUN)
    pub fields: Option<Vec<String>>,
    /// Bookmark (COMMIT, auto-commit PULL)
    pub bookmark: Option<Bookmark>,
    /// Update statistics
    pub counters: Counters,
    /// Query type
    pub query_type: Option<QueryType>,
    /// Time until the first record was available
    pub result_available_after: Option<Duration>,
    /// Time until the result was consumed
    pub result_consumed_after: Option<Duration>,
    /// Database the query ran against
    pub database: Option<String>,
    /// Server agent
    pub server: Option<String>,
    /// More records remain on the server
    pub has_more: bool,
}

/// Decodes wire payloads into host values.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Decode a FAILURE payload
    fn decode_failure(&self, payload: &Metadata) -> ServerFailure;

    /// Decode SUCCESS metadata
    fn decode_success(&self, metadata: &Metadata) -> SuccessMetadata;
}

/// Default codec for Bolt-shaped metadata maps
#[derive(Debug, Clone, Copy, Default)]
pub struct BoltCodec;

impl BoltCodec {
    fn millis(metadata: &Metadata, key: &str) -> Option<Duration> {
        metadata
            .get(key)
            .and_then(Value::as_int)
            .filter(|ms| *ms >= 0)
            .map(|ms| Duration::from_millis(ms as u64))
    }

    fn string(metadata: &Metadata, key: &str) -> Option<String> {
        metadata.get(key).and_then(Value::as_str).map(String::from)
    }

    fn counters(stats: &HashMap<String, Value>) -> Counters {
        let get = |key: &str| stats.get(key).and_then(Value::as_int).unwrap_or(0);
        Counters {
            nodes_created: get("nodes-created"),
            nodes_deleted: get("nodes-deleted"),
            relationships_created: get("relationships-created"),
            relationships_deleted: get("relationships-deleted"),
            properties_set: get("properties-set"),
            labels_added: get("labels-added"),
            labels_removed: get("labels-removed"),
            indexes_added: get("indexes-added"),
            indexes_removed: get("indexes-removed"),
            constraints_added: get("constraints-added"),
            constraints_removed: get("constraints-removed"),
        }
    }
}

impl Codec for BoltCodec {
    fn decode_failure(&self, payload: &Metadata) -> ServerFailure {
        ServerFailure::new(
            Self::string(payload, "code")
                .unwrap_or_else(|| "Neo.DatabaseError.General.UnknownError".to_string()),
            Self::string(payload, "message").unwrap_or_default(),
        )
    }

    fn decode_success(&self, metadata: &Metadata) -> SuccessMetadata {
        let fields = metadata.get("fields").and_then(Value::as_list).map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        });

        SuccessMetadata {
            fields,
            bookmark: Self::string(metadata, "bookmark")
                .filter(|b| !b.is_empty())
                .map(Bookmark::new),
            counters: metadata
                .get("stats")
                .and_then(Value::as_map)
                .map(Self::counters)
                .unwrap_or_default(),
            query_type: metadata
                .get("type")
                .and_then(Value::as_str)
                .and_then(QueryType::from_code),
            result_available_after: Self::millis(metadata, "t_first"),
            result_consumed_after: Self::millis(metadata, "t_last"),
            database: Self::string(metadata, "db"),
            server: Self::string(metadata, "server"),
            has_more: metadata
                .get("has_more")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }
}
