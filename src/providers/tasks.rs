//! Default global task wiring

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use super::MaintenanceTask;

/// Placeholder binding for global jobs whose logic is deployed outside this
/// service.
///
/// Performs no work: a run only logs that the schedule fired, so the worker
/// completes the job and the execution recorder keeps its history and metrics.
#[derive(Debug, Clone)]
pub struct LoggingTask {
    name: &'static str,
}

impl LoggingTask {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl MaintenanceTask for LoggingTask {
    async fn run(&self) -> Result<()> {
        info!("Global task '{}' triggered", self.name);
        Ok(())
    }
}
