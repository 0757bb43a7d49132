//! 서버 선택 정책

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rand::Rng;

use crate::driver::driver::ServerAddress;

/// 라우팅 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingPolicy {
    /// 라운드 로빈 (기본값)
    #[default]
    RoundRobin,
    /// 임대 중인 연결이 가장 적은 서버
    LeastConnections,
    /// 랜덤
    Random,
}

/// 서버 선택기
#[derive(Debug, Default)]
pub struct ServerSelector {
    policy: RoutingPolicy,
    next: AtomicUsize,
    leased: Mutex<HashMap<ServerAddress, usize>>,
}

impl ServerSelector {
    /// 새 선택기 생성
    pub fn new(policy: RoutingPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    /// 현재 정책
    pub fn policy(&self) -> RoutingPolicy {
        self.policy
    }

    /// 서버 목록에서 하나 선택
    pub fn select(&self, servers: &[ServerAddress]) -> Option<ServerAddress> {
        if servers.is_empty() {
            return None;
        }

        let index = match self.policy {
            RoutingPolicy::RoundRobin => self.next.fetch_add(1, Ordering::Relaxed) % servers.len(),
            RoutingPolicy::Random => rand::thread_rng().gen_range(0..servers.len()),
            RoutingPolicy::LeastConnections => {
                let leased = self.leased.lock();
                (0..servers.len())
                    .min_by_key(|&i| leased.get(&servers[i]).copied().unwrap_or(0))
                    .unwrap_or(0)
            }
        };
        Some(servers[index].clone())
    }

    /// 연결 임대 알림
    pub fn on_acquired(&self, server: &ServerAddress) {
        *self.leased.lock().entry(server.clone()).or_insert(0) += 1;
    }

    /// 연결 반환 알림
    pub fn on_released(&self, server: &ServerAddress) {
        if let Some(count) = self.leased.lock().get_mut(server) {
            *count = count.saturating_sub(1);
        }
    }

    /// 서버의 임대 중인 연결 수
    pub fn leased(&self, server: &ServerAddress) -> usize {
        self.leased.lock().get(server).copied().unwrap_or(0)
    }

    /// 서버 잊기
    pub fn forget(&self, server: &ServerAddress) {
        self.leased.lock().remove(server);
    }
}
