//! SeaORM-based database implementation
//!
//! Database-agnostic access using SeaORM with support for:
//! - SQLite (single writer, file or in-memory)
//! - PostgreSQL (row locks with `SKIP LOCKED`)
//! - MySQL 8 (row locks with `SKIP LOCKED`)

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, Database as SeaOrmDatabase, DatabaseBackend, DatabaseConnection};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::config::defaults::DEFAULT_MAX_CONNECTIONS;

pub mod migrations;
pub mod repositories;

/// Database connection manager with multi-database support
#[derive(Clone)]
pub struct Database {
    pub connection: Arc<DatabaseConnection>,
    /// Database backend type for query selection
    pub backend: DatabaseBackend,
    pub database_type: DatabaseType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    SQLite,
    PostgreSQL,
    MySQL,
}

impl Database {
    /// Create a new database connection
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let database_type = Self::detect_database_type(&config.url)?;
        let backend = database_type.backend();

        info!("Connecting to {} database", database_type.as_str());

        let connection_url = match database_type {
            DatabaseType::SQLite => Self::ensure_sqlite_auto_creation(&config.url)?,
            _ => config.url.clone(),
        };

        let mut connect_options = ConnectOptions::new(&connection_url);

        if Self::is_in_memory(&connection_url) {
            // Every pooled connection to :memory: is a separate database
            connect_options
                .max_connections(1)
                .min_connections(1)
                .connect_timeout(Duration::from_secs(5))
                .acquire_timeout(Duration::from_secs(30));
        } else {
            connect_options
                .max_connections(config.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS))
                .min_connections(1)
                .connect_timeout(Duration::from_secs(5)) // Fast fail for offline database
                .acquire_timeout(Duration::from_secs(3)) // Fast fail for pool exhaustion
                .idle_timeout(Duration::from_secs(600))
                .max_lifetime(Duration::from_secs(1800));
        }

        connect_options.sqlx_logging_level(tracing::log::LevelFilter::Debug);

        let connection = match SeaOrmDatabase::connect(connect_options).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!("Database connection failed: {:?}", e);
                let mut source = e.source();
                let mut level = 0;
                while let Some(err) = source {
                    tracing::error!("  Level {}: {}", level, err);
                    source = err.source();
                    level += 1;
                }
                return Err(anyhow::anyhow!(
                    "Failed to connect to {} database: {}",
                    database_type.as_str(),
                    e
                ));
            }
        };

        debug!("Database connection established successfully");

        Ok(Self {
            connection: Arc::new(connection),
            backend,
            database_type,
        })
    }

    /// Connect to a private in-memory SQLite database and run migrations
    pub async fn in_memory() -> Result<Self> {
        let database = Self::new(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: Some(1),
        })
        .await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Detect the database type from the URL
    pub fn detect_database_type(url: &str) -> Result<DatabaseType> {
        if url.starts_with("sqlite:") {
            Ok(DatabaseType::SQLite)
        } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            Ok(DatabaseType::PostgreSQL)
        } else if url.starts_with("mysql:") {
            Ok(DatabaseType::MySQL)
        } else {
            anyhow::bail!("Unsupported database URL format: {}", url);
        }
    }

    fn is_in_memory(url: &str) -> bool {
        url.contains(":memory:") || url.contains("mode=memory")
    }

    /// Ensure SQLite URL includes auto-creation mode if needed
    fn ensure_sqlite_auto_creation(url: &str) -> Result<String> {
        if url.contains("mode=") || url.contains(":memory:") {
            debug!("SQLite URL needs no modification: {}", url);
            return Ok(url.to_string());
        }

        let file_path = if let Some(path) = url.strip_prefix("sqlite://") {
            path
        } else if let Some(path) = url.strip_prefix("sqlite:") {
            path
        } else {
            anyhow::bail!("Invalid SQLite URL format: {}", url);
        };

        let path = std::path::Path::new(file_path);

        if path.exists() {
            debug!("SQLite database file already exists: {}", file_path);
            return Ok(url.to_string());
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create directory for SQLite database: {}",
                        parent.display()
                    )
                })?;
                info!("Created directory for SQLite database: {}", parent.display());
            }
        }

        let auto_create_url = if url.contains('?') {
            format!("{}&mode=rwc", url)
        } else {
            format!("{}?mode=rwc", url)
        };

        info!(
            "Modified SQLite URL to enable auto-creation: {} -> {}",
            url, auto_create_url
        );
        Ok(auto_create_url)
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        use migrations::Migrator;
        use sea_orm_migration::MigratorTrait;

        info!(
            "Running database migrations for {}",
            self.database_type.as_str()
        );

        Migrator::up(&*self.connection, None)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the main database connection
    pub fn connection(&self) -> Arc<DatabaseConnection> {
        self.connection.clone()
    }

    pub fn database_type(&self) -> DatabaseType {
        self.database_type
    }
}

impl DatabaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::SQLite => "SQLite",
            DatabaseType::PostgreSQL => "PostgreSQL",
            DatabaseType::MySQL => "MySQL",
        }
    }

    pub fn backend(&self) -> DatabaseBackend {
        match self {
            DatabaseType::SQLite => DatabaseBackend::Sqlite,
            DatabaseType::PostgreSQL => DatabaseBackend::Postgres,
            DatabaseType::MySQL => DatabaseBackend::MySql,
        }
    }

    pub fn from_backend(backend: DatabaseBackend) -> Self {
        match backend {
            DatabaseBackend::Postgres => DatabaseType::PostgreSQL,
            DatabaseBackend::MySql => DatabaseType::MySQL,
            DatabaseBackend::Sqlite => DatabaseType::SQLite,
        }
    }

    /// Whether `SELECT ... FOR UPDATE SKIP LOCKED` is available
    pub fn supports_skip_locked(&self) -> bool {
        matches!(self, DatabaseType::PostgreSQL | DatabaseType::MySQL)
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
