//! Web layer module
//!
//! Operator HTTP interface: health, schedule inspection with pause and
//! resume, queue statistics and an on-demand reconciliation. Handlers are
//! thin and delegate to the scheduler engine.

use anyhow::Result;
use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::{Config, RunMode},
    database::Database,
    job_scheduling::SchedulerEngine,
};

pub mod handlers;
pub mod responses;

pub use responses::{ApiResponse, handle_error, handle_result};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub database: Database,
    pub engine: Arc<SchedulerEngine>,
    pub mode: RunMode,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(config: &Config, database: Database, engine: Arc<SchedulerEngine>) -> Result<Self> {
        let app = Self::create_router(AppState {
            database,
            engine,
            mode: config.scheduling.mode,
            start_time: chrono::Utc::now(),
        });

        let addr: SocketAddr = format!("{}:{}", config.web.host, config.web.port).parse()?;

        Ok(Self { app, addr })
    }

    /// Create the router with all routes and middleware
    pub fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(handlers::health::health_check))
            .nest("/api/v1", Self::api_v1_routes())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    fn api_v1_routes() -> Router<AppState> {
        Router::new()
            .route("/schedules", get(handlers::schedules::list_schedules))
            .route(
                "/schedules/{job_type}/pause",
                post(handlers::schedules::pause_schedule),
            )
            .route(
                "/schedules/{job_type}/resume",
                post(handlers::schedules::resume_schedule),
            )
            .route("/queue/stats", get(handlers::queue::queue_stats))
            .route("/reconcile", post(handlers::schedules::reconcile))
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Serve until `token` is cancelled. `ready_signal` reports whether the
    /// listener could be bound.
    pub async fn serve_with_cancellation(
        self,
        ready_signal: tokio::sync::oneshot::Sender<Result<()>>,
        token: CancellationToken,
    ) -> Result<()> {
        match tokio::net::TcpListener::bind(&self.addr).await {
            Ok(listener) => {
                let _ = ready_signal.send(Ok(()));

                let shutdown_signal = async move {
                    token.cancelled().await;
                    tracing::info!("Web server received cancellation signal, shutting down gracefully");
                };

                axum::serve(listener, self.app)
                    .with_graceful_shutdown(shutdown_signal)
                    .await?;
                Ok(())
            }
            Err(e) => {
                let message = format!("Failed to bind {}: {}", self.addr, e);
                let _ = ready_signal.send(Err(anyhow::anyhow!(message.clone())));
                Err(anyhow::anyhow!(message))
            }
        }
    }
}
