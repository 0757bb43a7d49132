//! Connection Provider
//!
//! 세션과 트랜잭션에 연결을 임대하고 돌려받는 계약.
//! 한 연결은 동시에 하나의 임차인에게만 주어집니다.

use std::fmt;

use async_trait::async_trait;

use super::connection::Connection;
use super::error::DriverResult;
use super::pool::{ConnectionPool, PoolMetrics};
use super::session::AccessMode;

/// 연결 제공자
#[async_trait]
pub trait ConnectionProvider: Send + Sync + fmt::Debug {
    /// 접근 모드에 맞는 연결 획득
    async fn acquire(&self, mode: AccessMode) -> DriverResult<Connection>;

    /// 연결 반환
    ///
    /// 남은 응답을 소비하며, 보고되지 않은 서버 실패가 있으면 여기서 반환합니다.
    async fn release(&self, connection: Connection) -> DriverResult<()>;

    /// 런타임 밖(Drop 경로)에서 반환할 수 없는 연결을 버림
    ///
    /// 응답을 소비하지 않으며, 풀 메트릭이 어긋나지 않도록 카운터만 맞춥니다.
    fn discard(&self, connection: Connection);

    /// 연결 하나를 받아 바로 반환해 설정/인증 오류를 미리 드러냄
    async fn verify_connectivity(&self) -> DriverResult<()> {
        let connection = self.acquire(AccessMode::Write).await?;
        self.release(connection).await
    }

    /// 모든 풀 닫기
    async fn close(&self);

    /// 풀 메트릭 합계
    fn metrics(&self) -> PoolMetrics;
}

// ============================================================================
// DirectConnectionProvider
// ============================================================================

/// 고정된 단일 주소로 연결하는 제공자
#[derive(Debug)]
pub struct DirectConnectionProvider {
    pool: ConnectionPool,
}

impl DirectConnectionProvider {
    /// 새 제공자 생성
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// 연결 풀
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

#[async_trait]
impl ConnectionProvider for DirectConnectionProvider {
    async fn acquire(&self, _mode: AccessMode) -> DriverResult<Connection> {
        self.pool.acquire().await
    }

    async fn release(&self, connection: Connection) -> DriverResult<()> {
        self.pool.release(connection).await
    }

    fn discard(&self, connection: Connection) {
        self.pool.forget(connection);
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn metrics(&self) -> PoolMetrics {
        self.pool.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::bolt::ScriptedTransport;
    use crate::driver::driver::{AuthToken, ServerAddress};
    use crate::driver::error::DriverError;
    use crate::driver::pool::{Connector, PoolConfig};
    use std::sync::Arc;

    fn provider(transport: &ScriptedTransport, auth: AuthToken) -> DirectConnectionProvider {
        DirectConnectionProvider::new(ConnectionPool::new(
            ServerAddress::new("localhost", 7687),
            PoolConfig::default(),
            Connector::new(Arc::new(transport.clone()), auth),
        ))
    }

    #[tokio::test]
    async fn test_acquire_ignores_mode() {
        let transport = ScriptedTransport::new();
        let provider = provider(&transport, AuthToken::none());

        let read = provider.acquire(AccessMode::Read).await.unwrap();
        let write = provider.acquire(AccessMode::Write).await.unwrap();
        assert_eq!(read.address(), write.address());
        assert_eq!(provider.metrics().in_use, 2);

        provider.release(read).await.unwrap();
        provider.release(write).await.unwrap();
        assert_eq!(provider.metrics().idle, 2);
    }

    #[tokio::test]
    async fn test_verify_connectivity() {
        let transport = ScriptedTransport::new();
        transport.require_basic_auth("neo4j", "secret");

        let ok = provider(&transport, AuthToken::basic("neo4j", "secret"));
        ok.verify_connectivity().await.unwrap();
        assert_eq!(ok.metrics().idle, 1);

        let bad = provider(&transport, AuthToken::basic("neo4j", "nope"));
        assert!(matches!(
            bad.verify_connectivity().await,
            Err(DriverError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_discard() {
        let transport = ScriptedTransport::new();
        let provider = provider(&transport, AuthToken::none());

        let conn = provider.acquire(AccessMode::Write).await.unwrap();
        provider.discard(conn);

        let metrics = provider.metrics();
        assert_eq!((metrics.size, metrics.in_use, metrics.idle), (0, 0, 0));
        assert_eq!(metrics.total_closed, 1);
    }

    #[tokio::test]
    async fn test_close() {
        let transport = ScriptedTransport::new();
        let provider = provider(&transport, AuthToken::none());
        provider.verify_connectivity().await.unwrap();

        provider.close().await;
        assert_eq!(transport.connections_closed(), 1);
        assert!(provider.acquire(AccessMode::Write).await.is_err());
    }
}
