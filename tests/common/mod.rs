//! Shared fixtures for integration tests

#![allow(dead_code)]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use probe_scheduler::{
    config::{Config, RunMode},
    database::Database,
    job_scheduling::{Collaborators, GlobalTasks, ProviderChecks, SchedulerEngine},
    observability::InMemoryMetrics,
    providers::{MaintenanceTask, Provider, ProviderRoster, RetrievalCheck, UploadCheck},
};

pub fn provider(address: &str) -> Provider {
    Provider {
        address: address.to_string(),
        service_url: format!("http://{address}.invalid"),
        active: true,
        approved: true,
    }
}

/// Roster backed by a replaceable in-memory list
#[derive(Default)]
pub struct StaticRoster {
    providers: Mutex<Vec<Provider>>,
}

impl StaticRoster {
    pub fn with(addresses: &[&str]) -> Arc<Self> {
        let roster = Self::default();
        roster.set(addresses);
        Arc::new(roster)
    }

    pub fn set(&self, addresses: &[&str]) {
        let mut providers = self.providers.lock().unwrap();
        *providers = addresses.iter().map(|address| provider(address)).collect();
    }
}

#[async_trait]
impl ProviderRoster for StaticRoster {
    async fn list_active_providers(&self, approved_only: bool) -> Result<Vec<Provider>> {
        Ok(self
            .providers
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.active && (!approved_only || p.approved))
            .cloned()
            .collect())
    }

    async fn get_provider(&self, address: &str) -> Result<Option<Provider>> {
        Ok(self
            .providers
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.address == address)
            .cloned())
    }
}

/// How a fake check behaves when called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    /// Wait for cancellation, then fail the way an interrupted request would
    WaitForCancel,
}

pub struct FakeCheck {
    behavior: Behavior,
    calls: AtomicUsize,
    targets: Mutex<Vec<String>>,
}

impl FakeCheck {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn targets(&self) -> Vec<String> {
        let mut targets = self.targets.lock().unwrap().clone();
        targets.sort();
        targets
    }

    async fn perform(&self, target: &str, token: CancellationToken) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().unwrap().push(target.to_string());
        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(anyhow!("provider {target} rejected the probe")),
            Behavior::WaitForCancel => {
                token.cancelled().await;
                Err(anyhow!("request to {target} interrupted"))
            }
        }
    }
}

#[async_trait]
impl UploadCheck for FakeCheck {
    async fn run(&self, provider: &Provider, token: CancellationToken) -> Result<()> {
        self.perform(&provider.address, token).await
    }
}

#[async_trait]
impl RetrievalCheck for FakeCheck {
    async fn run(&self, provider_address: &str, token: CancellationToken) -> Result<()> {
        self.perform(provider_address, token).await
    }
}

#[derive(Default)]
pub struct CountingTask {
    calls: AtomicUsize,
}

impl CountingTask {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MaintenanceTask for CountingTask {
    async fn run(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// An engine over a private in-memory database with observable fakes
pub struct Harness {
    pub database: Database,
    pub engine: Arc<SchedulerEngine>,
    pub metrics: Arc<InMemoryMetrics>,
    pub roster: Arc<StaticRoster>,
    pub upload: Arc<FakeCheck>,
    pub retrieval: Arc<FakeCheck>,
    pub metrics_task: Arc<CountingTask>,
}

pub fn test_config(mode: RunMode) -> Config {
    let mut config = Config::default();
    config.database.url = "sqlite::memory:".to_string();
    config.scheduling.mode = mode;
    config.scheduling.stagger_seconds = 0;
    config.advisory_lock.enabled = false;
    config
}

pub async fn harness(config: Config, addresses: &[&str], upload: Behavior) -> Harness {
    let database = Database::in_memory().await.unwrap();
    let metrics = Arc::new(InMemoryMetrics::new());
    let roster = StaticRoster::with(addresses);
    let upload = FakeCheck::new(upload);
    let retrieval = FakeCheck::new(Behavior::Succeed);
    let metrics_task = Arc::new(CountingTask::default());

    let collaborators = Collaborators {
        roster: roster.clone(),
        checks: ProviderChecks {
            upload: upload.clone(),
            retrieval: retrieval.clone(),
        },
        tasks: GlobalTasks {
            metrics: metrics_task.clone(),
            metrics_cleanup: Arc::new(CountingTask::default()),
            external_poll: Arc::new(CountingTask::default()),
        },
    };

    let engine = SchedulerEngine::new(&config, &database, collaborators, metrics.clone()).unwrap();

    Harness {
        database,
        engine: Arc::new(engine),
        metrics,
        roster,
        upload,
        retrieval,
        metrics_task,
    }
}
