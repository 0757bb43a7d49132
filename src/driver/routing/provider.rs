//! 라우팅 연결 제공자
//!
//! 접근 모드에 맞는 역할의 서버를 라우팅 테이블에서 고르고, 주소별 풀에
//! 획득/반환을 위임합니다.
//!
//! 초기 주소는 테이블과 별도로 보관되는 예비 라우터입니다. 역할에 맞는
//! 서버가 남지 않았거나 테이블이 만료되면 초기 주소로 테이블을 다시 시드합니다.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::policy::{RoutingPolicy, ServerSelector};
use super::table::{RoutingTable, ServerRole};
use crate::driver::connection::Connection;
use crate::driver::driver::ServerAddress;
use crate::driver::error::{DriverError, DriverResult};
use crate::driver::pool::{ConnectionPool, Connector, PoolConfig, PoolMetrics};
use crate::driver::provider::ConnectionProvider;
use crate::driver::session::AccessMode;

/// 라우팅 연결 제공자
pub struct RoutingConnectionProvider {
    seed: ServerAddress,
    table: RwLock<RoutingTable>,
    selector: ServerSelector,
    pools: RwLock<HashMap<ServerAddress, Arc<ConnectionPool>>>,
    pool_config: PoolConfig,
    connector: Connector,
    next_id: Arc<AtomicU64>,
}

impl RoutingConnectionProvider {
    /// 초기 주소로 시드된 제공자 생성
    pub fn new(address: ServerAddress, pool_config: PoolConfig, connector: Connector) -> Self {
        Self {
            table: RwLock::new(RoutingTable::seeded(address.clone())),
            seed: address,
            selector: ServerSelector::default(),
            pools: RwLock::new(HashMap::new()),
            pool_config,
            connector,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// 서버 선택 정책 설정
    pub fn with_routing_policy(mut self, policy: RoutingPolicy) -> Self {
        self.selector = ServerSelector::new(policy);
        self
    }

    /// 예비 라우터 (초기 주소)
    pub fn seed(&self) -> &ServerAddress {
        &self.seed
    }

    /// 현재 라우팅 테이블
    pub fn routing_table(&self) -> RoutingTable {
        self.table.read().clone()
    }

    /// 라우팅 테이블 교체 (테이블에서 빠진 주소의 풀은 닫음)
    pub async fn update_routing_table(&self, table: RoutingTable) {
        let keep = table.all_servers();
        *self.table.write() = table;

        let stale: Vec<Arc<ConnectionPool>> = {
            let mut pools = self.pools.write();
            let gone: Vec<ServerAddress> =
                pools.keys().filter(|a| !keep.contains(a)).cloned().collect();
            gone.iter().filter_map(|a| pools.remove(a)).collect()
        };
        for pool in stale {
            self.selector.forget(pool.address());
            pool.close().await;
        }
    }

    /// 주소를 테이블에서 빼고 그 풀을 닫음
    pub async fn forget(&self, address: &ServerAddress) {
        self.table.write().forget(address);
        self.selector.forget(address);
        let pool = self.pools.write().remove(address);
        if let Some(pool) = pool {
            pool.close().await;
        }
        debug!(address = %address, "server removed from routing table");
    }

    fn pool_for(&self, address: &ServerAddress) -> Arc<ConnectionPool> {
        if let Some(pool) = self.pools.read().get(address) {
            return Arc::clone(pool);
        }

        let mut pools = self.pools.write();
        let pool = pools.entry(address.clone()).or_insert_with(|| {
            Arc::new(ConnectionPool::with_id_source(
                address.clone(),
                self.pool_config.clone(),
                self.connector.clone(),
                Arc::clone(&self.next_id),
            ))
        });
        Arc::clone(pool)
    }

    /// 역할에 맞는 서버 선택
    ///
    /// 고를 서버가 없거나 테이블이 만료되었으면 초기 주소로 다시 시드합니다.
    /// 한 번의 획득에서 재시드는 `reseeded`로 한 번만 허용합니다.
    async fn select(&self, role: ServerRole, reseeded: &mut bool) -> Option<ServerAddress> {
        let current = {
            let table = self.table.read();
            if table.is_expired() {
                None
            } else {
                self.selector.select(table.servers(role))
            }
        };
        if current.is_some() || *reseeded {
            return current;
        }

        *reseeded = true;
        debug!(seed = %self.seed, role = role.as_str(), "reseeding routing table from initial address");
        self.update_routing_table(RoutingTable::seeded(self.seed.clone()))
            .await;
        let table = self.table.read();
        self.selector.select(table.servers(role))
    }
}

#[async_trait]
impl ConnectionProvider for RoutingConnectionProvider {
    async fn acquire(&self, mode: AccessMode) -> DriverResult<Connection> {
        let role = ServerRole::from(mode);
        let mut last_error = None;
        let mut reseeded = false;

        while let Some(address) = self.select(role, &mut reseeded).await {
            match self.pool_for(&address).acquire().await {
                Ok(connection) => {
                    self.selector.on_acquired(&address);
                    return Ok(connection);
                }
                Err(e @ DriverError::Connection(_)) => {
                    warn!(address = %address, error = %e, "server unreachable, forgetting it");
                    self.forget(&address).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(DriverError::service_unavailable(match last_error {
            Some(e) => format!("No {} server available: {}", role.as_str(), e),
            None => format!("No {} server available", role.as_str()),
        }))
    }

    async fn release(&self, mut connection: Connection) -> DriverResult<()> {
        let address = connection.address().clone();
        self.selector.on_released(&address);

        let pool = self.pools.read().get(&address).cloned();
        match pool {
            Some(pool) => pool.release(connection).await,
            None => {
                let outcome = connection.finalize_all().await;
                connection.close().await;
                outcome
            }
        }
    }

    fn discard(&self, connection: Connection) {
        let address = connection.address().clone();
        self.selector.on_released(&address);

        let pool = self.pools.read().get(&address).cloned();
        match pool {
            Some(pool) => pool.forget(connection),
            None => drop(connection),
        }
    }

    async fn close(&self) {
        let pools: Vec<Arc<ConnectionPool>> = self.pools.write().drain().map(|(_, p)| p).collect();
        for pool in pools {
            pool.close().await;
        }
    }

    fn metrics(&self) -> PoolMetrics {
        self.pools
            .read()
            .values()
            .fold(PoolMetrics::default(), |acc, pool| acc.merge(&pool.metrics()))
    }
}

impl fmt::Debug for RoutingConnectionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingConnectionProvider")
            .field("seed", &self.seed)
            .field("table", &*self.table.read())
            .field("policy", &self.selector.policy())
            .field("pools", &self.pools.read().len())
            .finish()
    }
}
