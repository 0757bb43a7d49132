//! Query Result
//!
//! RUN과 PULL 핸들러 한 쌍을 감싼 지연 결과. 한 방향으로 한 번만 읽을 수 있습니다.
//!
//! 레코드는 핸들러에 버퍼링되므로 다른 요청이나 세션 종료가 응답을
//! 먼저 소비했더라도 연결 반환 후에 계속 읽을 수 있습니다.
//!
//! 실패 에피소드는 한 번만 에러가 됩니다. 앞선 실패로 무시된 결과나
//! 실패가 이미 다른 곳(다음 `run`, 세션 종료 등)에서 보고된 결과는
//! 레코드 없이 끝나고 기본 요약을 돌려줍니다.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::bolt::SuccessMetadata;
use super::connection::ConnectionLease;
use super::error::{DriverError, DriverResult};
use super::handler::{HandlerOutcome, ResponseHandler};
use super::record::{Record, RecordKeys};
use super::session::{Bookmark, Query};

// ============================================================================
// ResultSummary - 결과 요약
// ============================================================================

/// 결과 요약
#[derive(Debug, Clone, Default)]
pub struct ResultSummary {
    /// 쿼리
    pub query: Query,
    /// 쿼리 타입
    pub query_type: QueryType,
    /// 카운터
    pub counters: Counters,
    /// 결과 대기 시간
    pub result_available_after: Duration,
    /// 결과 소비 시간
    pub result_consumed_after: Duration,
    /// 데이터베이스 정보
    pub database: Option<String>,
    /// 서버 정보
    pub server: Option<String>,
    /// 자동 커밋 쿼리가 받은 북마크
    pub bookmark: Option<Bookmark>,
}

/// 쿼리 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryType {
    /// 읽기 전용
    #[default]
    ReadOnly,
    /// 읽기/쓰기
    ReadWrite,
    /// 쓰기 전용
    WriteOnly,
    /// 스키마 변경
    SchemaWrite,
}

impl QueryType {
    /// 서버 코드("r", "rw", "w", "s")에서 변환
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "r" => Some(Self::ReadOnly),
            "rw" => Some(Self::ReadWrite),
            "w" => Some(Self::WriteOnly),
            "s" => Some(Self::SchemaWrite),
            _ => None,
        }
    }
}

/// 카운터
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    /// 생성된 노드 수
    pub nodes_created: i64,
    /// 삭제된 노드 수
    pub nodes_deleted: i64,
    /// 생성된 관계 수
    pub relationships_created: i64,
    /// 삭제된 관계 수
    pub relationships_deleted: i64,
    /// 설정된 속성 수
    pub properties_set: i64,
    /// 추가된 레이블 수
    pub labels_added: i64,
    /// 제거된 레이블 수
    pub labels_removed: i64,
    /// 생성된 인덱스 수
    pub indexes_added: i64,
    /// 제거된 인덱스 수
    pub indexes_removed: i64,
    /// 추가된 제약조건 수
    pub constraints_added: i64,
    /// 제거된 제약조건 수
    pub constraints_removed: i64,
}

impl Counters {
    /// 변경 사항 존재 여부
    pub fn contains_updates(&self) -> bool {
        self.nodes_created > 0
            || self.nodes_deleted > 0
            || self.relationships_created > 0
            || self.relationships_deleted > 0
            || self.properties_set > 0
            || self.labels_added > 0
            || self.labels_removed > 0
    }

    /// 스키마 변경 존재 여부
    pub fn contains_system_updates(&self) -> bool {
        self.indexes_added > 0
            || self.indexes_removed > 0
            || self.constraints_added > 0
            || self.constraints_removed > 0
    }
}

// ============================================================================
// QueryResult - 지연 결과
// ============================================================================

/// 쿼리 결과
pub struct QueryResult {
    query: Query,
    lease: ConnectionLease,
    run: ResponseHandler,
    pull: ResponseHandler,
    keys: Option<Arc<RecordKeys>>,
    summary: Option<ResultSummary>,
    failure: Option<DriverError>,
}

impl QueryResult {
    pub(crate) fn new(
        query: Query,
        lease: ConnectionLease,
        run: ResponseHandler,
        pull: ResponseHandler,
    ) -> Self {
        Self {
            query,
            lease,
            run,
            pull,
            keys: None,
            summary: None,
            failure: None,
        }
    }

    /// 쿼리
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// 컬럼 키
    pub async fn keys(&mut self) -> DriverResult<Vec<String>> {
        Ok(self.record_keys().await?.names().to_vec())
    }

    /// 다음 레코드 (끝이면 None)
    pub async fn next(&mut self) -> DriverResult<Option<Record>> {
        let keys = self.record_keys().await?;
        loop {
            if let Some(values) = self.pull.take_record() {
                return Ok(Some(Record::with_keys(Arc::clone(&keys), values)));
            }
            if self.pull.is_finished() {
                self.settle(&self.pull.clone()).await?;
                return Ok(None);
            }
            let mut guard = self.lease.lock().await;
            match guard.as_mut() {
                Some(conn) => conn.fill(&self.pull).await?,
                None => return Err(detached()),
            }
        }
    }

    /// 남은 레코드 전부
    pub async fn list(&mut self) -> DriverResult<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// 정확히 하나인 레코드
    pub async fn single(&mut self) -> DriverResult<Record> {
        let first = self.next().await?.ok_or_else(|| {
            DriverError::session("Cannot retrieve a single record, because this result is empty.")
        })?;
        if self.next().await?.is_some() {
            return Err(DriverError::session(
                "Expected a result with a single record, but this result contains at least one more.",
            ));
        }
        Ok(first)
    }

    /// 남은 레코드를 버퍼링한 뒤 요약 반환
    pub async fn summary(&mut self) -> DriverResult<ResultSummary> {
        if let Some(summary) = &self.summary {
            return Ok(summary.clone());
        }
        self.settle(&self.run.clone()).await?;
        self.settle(&self.pull.clone()).await?;

        let summary = self.build_summary();
        self.summary = Some(summary.clone());
        Ok(summary)
    }

    /// 남은 레코드를 버리고 요약 반환
    pub async fn consume(&mut self) -> DriverResult<ResultSummary> {
        let summary = self.summary().await;
        self.pull.discard_records();
        summary
    }

    async fn record_keys(&mut self) -> DriverResult<Arc<RecordKeys>> {
        if let Some(keys) = &self.keys {
            return Ok(Arc::clone(keys));
        }
        self.settle(&self.run.clone()).await?;
        let fields = match self.run.outcome() {
            HandlerOutcome::Succeeded(meta) => meta.fields.unwrap_or_default(),
            _ => Vec::new(),
        };
        let keys = RecordKeys::new(fields);
        self.keys = Some(Arc::clone(&keys));
        Ok(keys)
    }

    /// 핸들러를 완료시키고 이 결과가 보고해야 할 에러를 돌려줌
    ///
    /// 연결이 여기서 보고한 에피소드 에러, 또는 아직 아무도 보고하지 않은
    /// 이 결과 자신의 실패만 에러가 됩니다. 한 번 돌려준 에러는 이 결과를
    /// 다시 읽을 때마다 같은 에러로 반복됩니다.
    async fn settle(&mut self, handler: &ResponseHandler) -> DriverResult<()> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let raised = {
            let mut guard = self.lease.lock().await;
            match guard.as_mut() {
                Some(conn) => conn.finalize(handler).await.err(),
                None => None,
            }
        };
        let err = match raised {
            Some(err) => err,
            None => match handler.outcome() {
                HandlerOutcome::Pending => return Err(detached()),
                HandlerOutcome::Failed(failure) if handler.mark_reported() => failure.into(),
                HandlerOutcome::Aborted(reason) => DriverError::connection(reason),
                _ => return Ok(()),
            },
        };
        self.failure = Some(err.clone());
        Err(err)
    }

    fn build_summary(&self) -> ResultSummary {
        let run = succeeded(&self.run);
        let pull = succeeded(&self.pull);
        ResultSummary {
            query: self.query.clone(),
            query_type: pull.query_type.unwrap_or_default(),
            counters: pull.counters,
            result_available_after: run.result_available_after.unwrap_or_default(),
            result_consumed_after: pull.result_consumed_after.unwrap_or_default(),
            database: pull.database.or(run.database),
            server: pull.server.or(run.server),
            bookmark: pull.bookmark,
        }
    }
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("query", &self.query.text)
            .field("run", &self.run)
            .field("pull", &self.pull)
            .finish()
    }
}

fn succeeded(handler: &ResponseHandler) -> SuccessMetadata {
    match handler.outcome() {
        HandlerOutcome::Succeeded(meta) => meta,
        _ => SuccessMetadata::default(),
    }
}

fn detached() -> DriverError {
    DriverError::session("Result is no longer attached to a connection")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::bolt::{BoltCodec, BoltRequest, ScriptedQuery, ScriptedTransport, Transport};
    use crate::driver::connection::Connection;
    use crate::driver::driver::{AuthToken, ServerAddress};
    use crate::driver::types::Value;
    use std::collections::HashMap;

    async fn lease(transport: &ScriptedTransport) -> ConnectionLease {
        let address = ServerAddress::default();
        let handle = transport.connect(&address, &AuthToken::none(), "test").await.unwrap();
        ConnectionLease::new(Connection::new(1, address, handle, Arc::new(BoltCodec)))
    }

    async fn start(lease: &ConnectionLease, query: &str) -> QueryResult {
        let mut guard = lease.lock().await;
        let conn = guard.as_mut().unwrap();
        let run = conn
            .request(BoltRequest::Run {
                query: query.to_string(),
                parameters: HashMap::new(),
                auto_commit: None,
            })
            .unwrap();
        let pull = conn.request(BoltRequest::Pull { n: -1 }).unwrap();
        QueryResult::new(Query::new(query), lease.clone(), run, pull)
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
            .on_query(
                "CREATE (n:Person) RETURN n",
                ScriptedQuery::returning(&["n"], vec![vec![Value::Null]])
                    .writes()
                    .with_stat("nodes-created", 1)
                    .with_stat("labels-added", 1),
            )
            .on_query(
                "UNWIND [1, 0] AS d RETURN 1/d",
                ScriptedQuery::returning(&["1/d"], vec![vec![Value::Integer(1)]])
                    .then_failing("Neo.ClientError.Statement.ArithmeticError", "/ by zero"),
            )
            .on_query(
                "RETURN 10/0",
                ScriptedQuery::failing("Neo.ClientError.Statement.ArithmeticError", "/ by zero"),
            )
            .on_query(
                "RETURN x",
                ScriptedQuery::failing("Neo.ClientError.Statement.SyntaxError", "Variable `x` not defined"),
            );
        transport
    }

    #[tokio::test]
    async fn test_forward_only_iteration() {
        let transport = transport();
        let lease = lease(&transport).await;
        let mut result = start(&lease, "UNWIND [1, 2, 3] AS n RETURN n").await;

        assert_eq!(result.keys().await.unwrap(), vec!["n"]);
        let first = result.next().await.unwrap().unwrap();
        assert_eq!(first.get_int("n").unwrap(), 1);

        let rest = result.list().await.unwrap();
        assert_eq!(rest.len(), 2);
        assert!(result.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_summary_counters() {
        let transport = transport();
        let lease = lease(&transport).await;
        let mut result = start(&lease, "CREATE (n:Person) RETURN n").await;

        let summary = result.consume().await.unwrap();
        assert_eq!(summary.counters.nodes_created, 1);
        assert!(summary.counters.contains_updates());
        assert!(!summary.counters.contains_system_updates());
        assert_eq!(summary.query_type, QueryType::WriteOnly);
        assert_eq!(summary.query.text, "CREATE (n:Person) RETURN n");
        assert!(result.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_summary_keeps_records() {
        let transport = transport();
        let lease = lease(&transport).await;
        let mut result = start(&lease, "UNWIND [1, 2, 3] AS n RETURN n").await;

        result.summary().await.unwrap();
        assert_eq!(result.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failure_after_records() {
        let transport = transport();
        let lease = lease(&transport).await;
        let mut result = start(&lease, "UNWIND [1, 0] AS d RETURN 1/d").await;

        assert!(result.next().await.unwrap().is_some());
        let err = result.next().await.unwrap_err();
        assert!(err.to_string().contains("/ by zero"));

        // 이 결과를 다시 읽어도 같은 에러
        assert!(result.summary().await.is_err());
    }

    #[tokio::test]
    async fn test_ignored_result_ends_quietly() {
        let transport = transport();
        let lease = lease(&transport).await;
        let mut failed = start(&lease, "RETURN 10/0").await;
        let mut ignored = start(&lease, "RETURN x").await;

        let err = failed.consume().await.unwrap_err();
        assert!(err.to_string().contains("/ by zero"));

        assert!(ignored.keys().await.unwrap().is_empty());
        assert!(ignored.next().await.unwrap().is_none());
        let summary = ignored.consume().await.unwrap();
        assert_eq!(summary.counters, Counters::default());
        assert_eq!(summary.query.text, "RETURN x");
    }

    #[tokio::test]
    async fn test_failure_raised_by_later_result_is_not_repeated() {
        let transport = transport();
        let lease = lease(&transport).await;
        let mut failed = start(&lease, "RETURN 10/0").await;
        let mut ignored = start(&lease, "RETURN x").await;

        // 뒤의 결과를 먼저 읽으면 그 결과가 에피소드를 보고함
        let err = ignored.list().await.unwrap_err();
        assert!(err.to_string().contains("/ by zero"));
        assert!(ignored.summary().await.is_err());

        assert!(failed.next().await.unwrap().is_none());
        assert!(failed.consume().await.is_ok());
    }

    #[tokio::test]
    async fn test_records_readable_after_release() {
        let transport = transport();
        let lease = lease(&transport).await;
        let mut result = start(&lease, "UNWIND [1, 2, 3] AS n RETURN n").await;

        {
            let mut guard = lease.lock().await;
            guard.as_mut().unwrap().finalize_all().await.unwrap();
        }
        lease.take().await;

        let records = result.list().await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2]["n"], Value::Integer(3));
    }

    #[tokio::test]
    async fn test_single() {
        let transport = transport();
        let lease = lease(&transport).await;

        let mut result = start(&lease, "CREATE (n:Person) RETURN n").await;
        assert!(result.single().await.is_ok());

        let mut result = start(&lease, "UNWIND [1, 2, 3] AS n RETURN n").await;
        assert!(matches!(result.single().await, Err(DriverError::Session(_))));
    }

    #[test]
    fn test_query_type_codes() {
        assert_eq!(QueryType::from_code("rw"), Some(QueryType::ReadWrite));
        assert_eq!(QueryType::from_code("s"), Some(QueryType::SchemaWrite));
        assert_eq!(QueryType::from_code("x"), None);
    }
}
