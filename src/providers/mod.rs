//! Collaborator interfaces the scheduler calls into
//!
//! The roster source, the two per-provider checks and the global maintenance
//! jobs live outside the scheduling core. The engine only needs to invoke
//! them as cancellable, outcome-returning operations.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub mod http_checks;
pub mod tasks;

pub use http_checks::{HttpRetrievalCheck, HttpUploadCheck};
pub use tasks::LoggingTask;

/// A monitored storage provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub address: String,
    pub service_url: String,
    pub active: bool,
    pub approved: bool,
}

/// Source of the monitored provider set
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderRoster: Send + Sync {
    /// Active providers, optionally restricted to approved ones
    async fn list_active_providers(&self, approved_only: bool) -> Result<Vec<Provider>>;

    async fn get_provider(&self, address: &str) -> Result<Option<Provider>>;
}

/// Upload-style check against one provider. Must observe `token`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UploadCheck: Send + Sync {
    async fn run(&self, provider: &Provider, token: CancellationToken) -> Result<()>;
}

/// Retrieval-style check against one provider. Must observe `token`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RetrievalCheck: Send + Sync {
    async fn run(&self, provider_address: &str, token: CancellationToken) -> Result<()>;
}

/// Zero-argument global job (metrics aggregation, cleanup, external poll)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MaintenanceTask: Send + Sync {
    async fn run(&self) -> Result<()>;
}
