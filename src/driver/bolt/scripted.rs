//! In-memory scripted server.
//!
//! [`ScriptedTransport`] answers requests the way a Bolt server does:
//! responses come back in request order, a failed request puts the
//! connection into a failed state in which everything is IGNORED until a
//! RESET, and COMMIT and auto-commit PULL hand out fresh bookmarks.
//!
//! Queries are matched by their exact text. Unknown queries succeed with an
//! empty result.
//!
//! ```rust,ignore
//! let transport = ScriptedTransport::new();
//! transport.on_query("RETURN 1 AS n", ScriptedQuery::returning(&["n"], vec![vec![1.into()]]));
//! transport.on_query("RETURN 1/0", ScriptedQuery::failing("Neo.ClientError.Statement.ArithmeticError", "/ by zero"));
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BoltRequest, BoltResponse, Metadata, RequestKind, RequestToken, Transport, TransportHandle};
use crate::driver::driver::{AuthToken, ServerAddress};
use crate::driver::error::{DriverError, DriverResult, ServerFailure};
use crate::driver::types::Value;

// ============================================================================
// ScriptedQuery - 쿼리별 응답 스크립트
// ============================================================================

/// Scripted outcome of one query
#[derive(Debug, Clone, Default)]
pub struct ScriptedQuery {
    fields: Vec<String>,
    records: Vec<Vec<Value>>,
    run_failure: Option<ServerFailure>,
    stream_failure: Option<ServerFailure>,
    stats: HashMap<String, Value>,
    query_type: Option<&'static str>,
    disconnect_on_pull: bool,
}

impl ScriptedQuery {
    /// Query that returns records
    pub fn returning(fields: &[&str], records: Vec<Vec<Value>>) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            records,
            ..Default::default()
        }
    }

    /// Query with no result columns
    pub fn empty() -> Self {
        Self::default()
    }

    /// Query whose RUN fails
    pub fn failing(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            run_failure: Some(ServerFailure::new(code, message)),
            ..Default::default()
        }
    }

    /// Stream the records, then fail the PULL
    pub fn then_failing(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.stream_failure = Some(ServerFailure::new(code, message));
        self
    }

    /// Report an update statistic in the PULL summary
    pub fn with_stat(mut self, key: &str, count: i64) -> Self {
        self.stats.insert(key.to_string(), Value::Integer(count));
        self
    }

    /// Report the query as a write
    pub fn writes(mut self) -> Self {
        self.query_type = Some("w");
        self
    }

    /// Drop the connection instead of answering the PULL
    pub fn disconnecting(mut self) -> Self {
        self.disconnect_on_pull = true;
        self
    }
}

// ============================================================================
// ScriptedTransport
// ============================================================================

#[derive(Debug, Default)]
struct ScriptState {
    queries: HashMap<String, ScriptedQuery>,
    unreachable: HashSet<ServerAddress>,
    all_unreachable: bool,
    credentials: Option<(String, String)>,
    sent: Vec<(u64, BoltRequest)>,
    opened: u64,
    closed: u64,
    bookmarks_issued: u64,
}

impl ScriptState {
    fn next_bookmark(&mut self) -> String {
        self.bookmarks_issued += 1;
        format!("bm:{}", self.bookmarks_issued)
    }
}

/// In-memory transport that emulates a server
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    /// 새 스크립트 트랜스포트 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the response to a query
    pub fn on_query(&self, query: impl Into<String>, script: ScriptedQuery) -> &Self {
        self.state.lock().queries.insert(query.into(), script);
        self
    }

    /// Refuse connections to `address`
    pub fn set_unreachable(&self, address: ServerAddress) {
        self.state.lock().unreachable.insert(address);
    }

    /// Accept connections to `address` again
    pub fn set_reachable(&self, address: &ServerAddress) {
        self.state.lock().unreachable.remove(address);
    }

    /// Refuse every connection
    pub fn refuse_all(&self, refuse: bool) {
        self.state.lock().all_unreachable = refuse;
    }

    /// Only accept basic authentication with these credentials
    pub fn require_basic_auth(&self, username: impl Into<String>, password: impl Into<String>) {
        self.state.lock().credentials = Some((username.into(), password.into()));
    }

    /// Every request received so far, in arrival order
    pub fn sent_requests(&self) -> Vec<BoltRequest> {
        self.state.lock().sent.iter().map(|(_, r)| r.clone()).collect()
    }

    /// Number of requests of `kind` received so far
    pub fn count(&self, kind: RequestKind) -> usize {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|(_, r)| r.kind() == kind)
            .count()
    }

    /// Queries received in RUN requests, in arrival order
    pub fn queries_run(&self) -> Vec<String> {
        self.state
            .lock()
            .sent
            .iter()
            .filter_map(|(_, r)| match r {
                BoltRequest::Run { query, .. } => Some(query.clone()),
                _ => None,
            })
            .collect()
    }

    /// Connections opened so far
    pub fn connections_opened(&self) -> u64 {
        self.state.lock().opened
    }

    /// Connections closed so far
    pub fn connections_closed(&self) -> u64 {
        self.state.lock().closed
    }

    /// Most recent bookmark handed out
    pub fn last_bookmark(&self) -> Option<String> {
        let issued = self.state.lock().bookmarks_issued;
        (issued > 0).then(|| format!("bm:{}", issued))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(
        &self,
        address: &ServerAddress,
        auth: &AuthToken,
        _user_agent: &str,
    ) -> DriverResult<Box<dyn TransportHandle>> {
        let mut state = self.state.lock();
        if state.all_unreachable || state.unreachable.contains(address) {
            return Err(DriverError::connection(format!(
                "Unable to connect to {}",
                address
            )));
        }

        if let Some((username, password)) = &state.credentials {
            let accepted = matches!(
                auth,
                AuthToken::Basic { username: u, password: p, .. } if u == username && p == password
            );
            if !accepted {
                return Err(DriverError::authentication(
                    "The client is unauthorized due to authentication failure.",
                ));
            }
        }

        state.opened += 1;
        let id = state.opened;
        Ok(Box::new(ScriptedHandle {
            id,
            state: Arc::clone(&self.state),
            outbox: VecDeque::new(),
            next_token: 0,
            failed: false,
            in_transaction: false,
            stream: None,
            open: true,
        }))
    }
}

// ============================================================================
// ScriptedHandle
// ============================================================================

#[derive(Debug)]
enum Reply {
    Message(BoltResponse),
    Disconnect,
}

#[derive(Debug)]
struct ScriptedHandle {
    id: u64,
    state: Arc<Mutex<ScriptState>>,
    outbox: VecDeque<(RequestToken, VecDeque<Reply>)>,
    next_token: u64,
    failed: bool,
    in_transaction: bool,
    stream: Option<ScriptedQuery>,
    open: bool,
}

fn failure(failure: &ServerFailure) -> BoltResponse {
    let mut metadata = Metadata::new();
    metadata.insert("code".to_string(), Value::from(failure.code.as_str()));
    metadata.insert("message".to_string(), Value::from(failure.message.as_str()));
    BoltResponse::Failure(metadata)
}

fn success(pairs: Vec<(&str, Value)>) -> BoltResponse {
    BoltResponse::Success(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

impl ScriptedHandle {
    fn answer(&mut self, request: &BoltRequest) -> Vec<Reply> {
        if self.failed && !matches!(request, BoltRequest::Reset) {
            return vec![Reply::Message(BoltResponse::Ignored)];
        }

        let message = match request {
            BoltRequest::Reset => {
                self.failed = false;
                self.in_transaction = false;
                self.stream = None;
                success(vec![])
            }
            BoltRequest::Begin(_) => {
                self.in_transaction = true;
                success(vec![])
            }
            BoltRequest::Run { query, .. } => {
                let script = self
                    .state
                    .lock()
                    .queries
                    .get(query)
                    .cloned()
                    .unwrap_or_default();
                match &script.run_failure {
                    Some(f) => {
                        self.failed = true;
                        failure(f)
                    }
                    None => {
                        let fields = Value::from(script.fields.clone());
                        self.stream = Some(script);
                        success(vec![("fields", fields), ("t_first", Value::Integer(1))])
                    }
                }
            }
            BoltRequest::Pull { .. } | BoltRequest::Discard { .. } => {
                return self.stream_replies(matches!(request, BoltRequest::Pull { .. }));
            }
            BoltRequest::Commit => {
                if !self.in_transaction {
                    self.failed = true;
                    failure(&ServerFailure::new(
                        "Neo.ClientError.Request.Invalid",
                        "No transaction to commit",
                    ))
                } else {
                    self.in_transaction = false;
                    let bookmark = self.state.lock().next_bookmark();
                    success(vec![("bookmark", Value::from(bookmark))])
                }
            }
            BoltRequest::Rollback => {
                self.in_transaction = false;
                success(vec![])
            }
        };
        vec![Reply::Message(message)]
    }

    fn stream_replies(&mut self, with_records: bool) -> Vec<Reply> {
        let script = match self.stream.take() {
            Some(script) => script,
            None => {
                self.failed = true;
                return vec![Reply::Message(failure(&ServerFailure::new(
                    "Neo.ClientError.Request.Invalid",
                    "No result to stream",
                )))];
            }
        };

        if script.disconnect_on_pull {
            return vec![Reply::Disconnect];
        }

        let mut replies: Vec<Reply> = if with_records {
            script
                .records
                .into_iter()
                .map(|r| Reply::Message(BoltResponse::Record(r)))
                .collect()
        } else {
            Vec::new()
        };

        if let Some(f) = &script.stream_failure {
            self.failed = true;
            replies.push(Reply::Message(failure(f)));
            return replies;
        }

        let mut summary = vec![
            ("t_last", Value::Integer(1)),
            ("type", Value::from(script.query_type.unwrap_or("r"))),
            ("db", Value::from("neo4j")),
            ("stats", Value::Map(script.stats)),
        ];
        if !self.in_transaction {
            let bookmark = self.state.lock().next_bookmark();
            summary.push(("bookmark", Value::from(bookmark)));
        }
        replies.push(Reply::Message(success(summary)));
        replies
    }
}

#[async_trait]
impl TransportHandle for ScriptedHandle {
    fn send(&mut self, request: BoltRequest) -> DriverResult<RequestToken> {
        if !self.open {
            return Err(DriverError::connection("Connection is closed"));
        }
        self.state.lock().sent.push((self.id, request.clone()));

        self.next_token += 1;
        let token = RequestToken(self.next_token);
        let replies = self.answer(&request).into_iter().collect();
        self.outbox.push_back((token, replies));
        Ok(token)
    }

    async fn fetch(&mut self, token: RequestToken) -> DriverResult<BoltResponse> {
        if !self.open {
            return Err(DriverError::connection("Connection is closed"));
        }
        let (front, replies) = self
            .outbox
            .front_mut()
            .ok_or_else(|| DriverError::protocol("No response pending"))?;
        if *front != token {
            return Err(DriverError::OrderingViolation {
                expected: front.0,
                actual: token.0,
            });
        }

        let reply = replies.pop_front();
        if replies.is_empty() {
            self.outbox.pop_front();
        }

        match reply {
            Some(Reply::Message(message)) => Ok(message),
            Some(Reply::Disconnect) | None => {
                self.close().await;
                Err(DriverError::connection("Connection reset by peer"))
            }
        }
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.outbox.clear();
            self.state.lock().closed += 1;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect(transport: &ScriptedTransport) -> Box<dyn TransportHandle> {
        transport
            .connect(&ServerAddress::default(), &AuthToken::none(), "test")
            .await
            .unwrap()
    }

    fn run(query: &str) -> BoltRequest {
        BoltRequest::Run {
            query: query.to_string(),
            parameters: HashMap::new(),
            auto_commit: None,
        }
    }

    #[tokio::test]
    async fn test_records_then_summary() {
        let transport = ScriptedTransport::new();
        transport.on_query(
            "RETURN 1 AS n",
            ScriptedQuery::returning(&["n"], vec![vec![Value::Integer(1)]]),
        );
        let mut handle = connect(&transport).await;

        let run_token = handle.send(run("RETURN 1 AS n")).unwrap();
        let pull_token = handle.send(BoltRequest::Pull { n: -1 }).unwrap();

        assert!(matches!(handle.fetch(run_token).await.unwrap(), BoltResponse::Success(_)));
        assert_eq!(
            handle.fetch(pull_token).await.unwrap(),
            BoltResponse::Record(vec![Value::Integer(1)])
        );
        match handle.fetch(pull_token).await.unwrap() {
            BoltResponse::Success(meta) => assert_eq!(meta.get("bookmark"), Some(&Value::from("bm:1"))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ignored_until_reset() {
        let transport = ScriptedTransport::new();
        transport.on_query("RETURN 1/0", ScriptedQuery::failing("Neo.ClientError.Statement.ArithmeticError", "/ by zero"));
        let mut handle = connect(&transport).await;

        let failed = handle.send(run("RETURN 1/0")).unwrap();
        let ignored = handle.send(BoltRequest::Pull { n: -1 }).unwrap();
        let reset = handle.send(BoltRequest::Reset).unwrap();
        let after = handle.send(run("RETURN 2")).unwrap();

        assert!(matches!(handle.fetch(failed).await.unwrap(), BoltResponse::Failure(_)));
        assert_eq!(handle.fetch(ignored).await.unwrap(), BoltResponse::Ignored);
        assert!(matches!(handle.fetch(reset).await.unwrap(), BoltResponse::Success(_)));
        assert!(matches!(handle.fetch(after).await.unwrap(), BoltResponse::Success(_)));
    }

    #[tokio::test]
    async fn test_out_of_order_fetch() {
        let transport = ScriptedTransport::new();
        let mut handle = connect(&transport).await;

        let _first = handle.send(run("RETURN 1")).unwrap();
        let second = handle.send(BoltRequest::Pull { n: -1 }).unwrap();

        let err = handle.fetch(second).await.unwrap_err();
        assert!(matches!(err, DriverError::OrderingViolation { expected: 1, actual: 2 }));
    }

    #[tokio::test]
    async fn test_unreachable_and_credentials() {
        let transport = ScriptedTransport::new();
        let address = ServerAddress::new("db1", 7687);
        transport.set_unreachable(address.clone());

        let err = transport.connect(&address, &AuthToken::none(), "test").await.unwrap_err();
        assert!(matches!(err, DriverError::Connection(_)));

        transport.require_basic_auth("neo4j", "secret");
        let err = transport
            .connect(&ServerAddress::default(), &AuthToken::basic("neo4j", "wrong"), "test")
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Authentication(_)));

        assert!(transport
            .connect(&ServerAddress::default(), &AuthToken::basic("neo4j", "secret"), "test")
            .await
            .is_ok());
        assert_eq!(transport.connections_opened(), 1);
    }

    #[tokio::test]
    async fn test_commit_issues_bookmark() {
        let transport = ScriptedTransport::new();
        let mut handle = connect(&transport).await;

        let begin = handle.send(BoltRequest::Begin(Default::default())).unwrap();
        let commit = handle.send(BoltRequest::Commit).unwrap();
        handle.fetch(begin).await.unwrap();
        match handle.fetch(commit).await.unwrap() {
            BoltResponse::Success(meta) => assert_eq!(meta.get("bookmark"), Some(&Value::from("bm:1"))),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(transport.last_bookmark().as_deref(), Some("bm:1"));
        assert_eq!(transport.count(RequestKind::Commit), 1);
    }

    #[tokio::test]
    async fn test_disconnect_on_pull() {
        let transport = ScriptedTransport::new();
        transport.on_query("MATCH (n) RETURN n", ScriptedQuery::empty().disconnecting());
        let mut handle = connect(&transport).await;

        let run_token = handle.send(run("MATCH (n) RETURN n")).unwrap();
        let pull = handle.send(BoltRequest::Pull { n: -1 }).unwrap();
        handle.fetch(run_token).await.unwrap();

        assert!(matches!(handle.fetch(pull).await, Err(DriverError::Connection(_))));
        assert!(!handle.is_open());
        assert_eq!(transport.connections_closed(), 1);
    }
}
