pub use super::provider_locks::Entity as ProviderLocks;
pub use super::providers::Entity as Providers;
pub use super::queue_jobs::Entity as QueueJobs;
pub use super::schedules::Entity as Schedules;
