//! 라우팅 모듈
//!
//! `neo4j://`, `bolt+routing://` 스킴의 드라이버는 라우팅 테이블을 가진
//! 제공자를 사용합니다. 읽기 세션은 리더로, 쓰기 세션은 라이터로 갑니다.
//!
//! # 예시
//!
//! ```ignore
//! use graphbolt_driver::driver::{AccessMode, AuthToken, Driver, SessionConfig};
//!
//! let driver = Driver::new("neo4j://core1:7687", AuthToken::basic("neo4j", "password"), transport)?;
//!
//! let read_session = driver.session(
//!     SessionConfig::builder()
//!         .with_read_access()
//!         .build()
//! )?;
//! ```

mod policy;
mod provider;
mod table;

pub use policy::{RoutingPolicy, ServerSelector};
pub use provider::RoutingConnectionProvider;
pub use table::{RoutingTable, ServerRole};
