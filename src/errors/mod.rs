//! Centralized error handling for the probe scheduler
//!
//! # Error Categories
//!
//! - **Configuration Errors**: unreadable files, invalid maintenance windows, zero limits
//! - **Repository Errors**: Schedule Store and queue table access
//! - **Scheduler Errors**: failures surfaced by the engine and the operator API
//!
//! Repositories and background services return `anyhow::Result` so a failing
//! tick can carry context; these types are used where callers need to match.

pub mod types;

pub use types::*;

/// Convenience type alias for Results using SchedulerError
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Convenience type alias for Repository Results
pub type RepositoryResult<T> = Result<T, RepositoryError>;
