//! SeaORM repositories
//!
//! Each repository wraps an `Arc<DatabaseConnection>`. Operations that must
//! join a caller's transaction are associated functions generic over
//! `ConnectionTrait`.

pub mod provider;
pub mod schedule;

pub use provider::ProviderSeaOrmRepository;
pub use schedule::{ScheduleFilter, ScheduleSeaOrmRepository};
