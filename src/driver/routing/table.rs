//! 라우팅 테이블
//!
//! 역할별 서버 목록. 서버에서 테이블을 받아오는 일은 이 크레이트 밖의
//! 몫이며, 여기서는 URI 주소로 초기화하고 외부에서 교체할 수 있게만 합니다.

use std::time::{Duration, Instant};

use crate::driver::driver::ServerAddress;
use crate::driver::session::AccessMode;

/// 서버 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerRole {
    /// 라우팅 테이블 제공자
    Route,
    /// 쓰기 트랜잭션 처리
    Write,
    /// 읽기 트랜잭션 처리
    Read,
}

impl ServerRole {
    /// 문자열에서 역할 파싱
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ROUTE" => Some(Self::Route),
            "WRITE" => Some(Self::Write),
            "READ" => Some(Self::Read),
            _ => None,
        }
    }

    /// 역할 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Route => "ROUTE",
            Self::Write => "WRITE",
            Self::Read => "READ",
        }
    }
}

impl From<AccessMode> for ServerRole {
    fn from(mode: AccessMode) -> Self {
        match mode {
            AccessMode::Read => Self::Read,
            AccessMode::Write => Self::Write,
        }
    }
}

/// 라우팅 테이블
#[derive(Debug, Clone)]
pub struct RoutingTable {
    /// 라우터 목록
    pub routers: Vec<ServerAddress>,
    /// 라이터 목록
    pub writers: Vec<ServerAddress>,
    /// 리더 목록
    pub readers: Vec<ServerAddress>,
    /// 유효 기간
    pub ttl: Duration,
    /// 갱신 시간
    pub updated_at: Instant,
}

impl RoutingTable {
    /// 빈 테이블 생성
    pub fn new(ttl: Duration) -> Self {
        Self {
            routers: Vec::new(),
            writers: Vec::new(),
            readers: Vec::new(),
            ttl,
            updated_at: Instant::now(),
        }
    }

    /// 초기 주소 하나를 모든 역할에 넣은 테이블
    pub fn seeded(address: ServerAddress) -> Self {
        let mut table = Self::default();
        for role in [ServerRole::Route, ServerRole::Read, ServerRole::Write] {
            table.add_server(role, address.clone());
        }
        table
    }

    /// 역할별 서버 추가 (중복 무시)
    pub fn add_server(&mut self, role: ServerRole, address: ServerAddress) {
        let servers = self.servers_mut(role);
        if !servers.contains(&address) {
            servers.push(address);
        }
    }

    /// 역할별 서버 목록
    pub fn servers(&self, role: ServerRole) -> &[ServerAddress] {
        match role {
            ServerRole::Route => &self.routers,
            ServerRole::Write => &self.writers,
            ServerRole::Read => &self.readers,
        }
    }

    fn servers_mut(&mut self, role: ServerRole) -> &mut Vec<ServerAddress> {
        match role {
            ServerRole::Route => &mut self.routers,
            ServerRole::Write => &mut self.writers,
            ServerRole::Read => &mut self.readers,
        }
    }

    /// 테이블에 있는 모든 주소 (중복 제거)
    pub fn all_servers(&self) -> Vec<ServerAddress> {
        let mut all: Vec<ServerAddress> = Vec::new();
        for address in self.routers.iter().chain(&self.writers).chain(&self.readers) {
            if !all.contains(address) {
                all.push(address.clone());
            }
        }
        all
    }

    /// 테이블이 만료되었는지 확인
    pub fn is_expired(&self) -> bool {
        self.updated_at.elapsed() >= self.ttl
    }

    /// 주소를 모든 역할에서 제거
    pub fn forget(&mut self, address: &ServerAddress) {
        self.routers.retain(|a| a != address);
        self.writers.retain(|a| a != address);
        self.readers.retain(|a| a != address);
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_role_parse() {
        assert_eq!(ServerRole::parse("route"), Some(ServerRole::Route));
        assert_eq!(ServerRole::parse("WRITE"), Some(ServerRole::Write));
        assert_eq!(ServerRole::parse("UNKNOWN"), None);
        assert_eq!(ServerRole::from(AccessMode::Read).as_str(), "READ");
    }

    #[test]
    fn test_seeded_table() {
        let address = ServerAddress::new("core1", 7687);
        let table = RoutingTable::seeded(address.clone());

        assert_eq!(table.servers(ServerRole::Route), &[address.clone()]);
        assert_eq!(table.servers(ServerRole::Read), &[address.clone()]);
        assert_eq!(table.servers(ServerRole::Write), &[address]);
        assert_eq!(table.all_servers().len(), 1);
        assert!(!table.is_expired());
    }

    #[test]
    fn test_no_duplicates_and_forget() {
        let mut table = RoutingTable::default();
        let a = ServerAddress::new("a", 7687);
        let b = ServerAddress::new("b", 7687);

        table.add_server(ServerRole::Read, a.clone());
        table.add_server(ServerRole::Read, a.clone());
        table.add_server(ServerRole::Read, b.clone());
        table.add_server(ServerRole::Write, a.clone());
        assert_eq!(table.readers.len(), 2);

        table.forget(&a);
        assert_eq!(table.readers, vec![b]);
        assert!(table.writers.is_empty());
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let table = RoutingTable::new(Duration::ZERO);
        assert!(table.is_expired());
    }
}
