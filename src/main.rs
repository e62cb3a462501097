use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Use the library instead of redeclaring modules
use probe_scheduler::{
    config::{Config, RunMode},
    database::{Database, repositories::ProviderSeaOrmRepository},
    job_scheduling::{Collaborators, GlobalTasks, ProviderChecks, SchedulerEngine},
    observability::SchedulerMetrics,
    providers::{HttpRetrievalCheck, HttpUploadCheck, LoggingTask, ProviderRoster},
    web::WebServer,
};

#[derive(Parser)]
#[command(name = "probe-scheduler")]
#[command(version)]
#[command(about = "Job scheduler and execution engine for storage provider checks")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Run mode (api, worker, both)
    #[arg(short, long, value_name = "MODE")]
    mode: Option<RunMode>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Log output format (text, json)
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn init_tracing(cli: &Cli) {
    let log_filter = if cli.log_level == "trace" {
        format!("probe_scheduler={},tower_http=trace", cli.log_level)
    } else {
        format!("probe_scheduler={}", cli.log_level)
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_filter.into());

    if cli.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let mut config = Config::load_from_file(&cli.config)?;

    // Override config with CLI arguments
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }
    if let Some(mode) = cli.mode {
        config.scheduling.mode = mode;
    }
    config.validate()?;

    if cli.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    info!(
        "Starting probe-scheduler v{} (mode: {})",
        env!("CARGO_PKG_VERSION"),
        config.scheduling.mode
    );

    let (metrics, meter_provider) = SchedulerMetrics::init("probe-scheduler")?;

    let database = Database::new(&config.database).await?;
    database.migrate().await?;

    let roster: Arc<dyn ProviderRoster> =
        Arc::new(ProviderSeaOrmRepository::new(database.connection()));
    let collaborators = Collaborators {
        roster: roster.clone(),
        checks: ProviderChecks {
            upload: Arc::new(HttpUploadCheck::new(&config.probes)?),
            retrieval: Arc::new(HttpRetrievalCheck::new(&config.probes, roster)?),
        },
        tasks: GlobalTasks {
            metrics: Arc::new(LoggingTask::new("metrics")),
            metrics_cleanup: Arc::new(LoggingTask::new("metrics_cleanup")),
            external_poll: Arc::new(LoggingTask::new("external_poll")),
        },
    };

    let engine = Arc::new(SchedulerEngine::new(
        &config,
        &database,
        collaborators,
        Arc::new(metrics),
    )?);

    let token = CancellationToken::new();
    let web_server = WebServer::new(&config, database, engine.clone())?;
    info!(
        "Starting web server on {}:{}",
        web_server.host(),
        web_server.port()
    );

    // Create a channel to signal when the server is ready or fails to bind
    let (server_ready_tx, server_ready_rx) = tokio::sync::oneshot::channel();
    let server_token = token.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = web_server
            .serve_with_cancellation(server_ready_tx, server_token)
            .await
        {
            error!("Web server failed: {}", e);
        }
    });

    match server_ready_rx.await {
        Ok(Ok(())) => info!("Web server is now listening, starting scheduler engine"),
        Ok(Err(bind_error)) => {
            error!("Failed to bind web server: {}", bind_error);
            return Err(bind_error);
        }
        Err(_) => {
            error!("Web server task completed without signaling");
            return Err(anyhow::anyhow!("Web server failed to start"));
        }
    }

    let engine_token = token.clone();
    let engine_handle = tokio::spawn(async move { engine.run(engine_token).await });

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, stopping services");
    token.cancel();

    match engine_handle.await {
        Ok(Err(e)) => error!("Scheduler engine failed: {:#}", e),
        Err(e) => error!("Scheduler engine task failed: {}", e),
        Ok(Ok(())) => {}
    }
    server_handle.await?;

    if let Err(e) = meter_provider.shutdown() {
        error!("Failed to flush metrics: {}", e);
    }
    info!("Shutdown complete");
    Ok(())
}
