//! SeaORM entity definitions

pub mod prelude;

pub mod provider_locks;
pub mod providers;
pub mod queue_jobs;
pub mod schedules;
