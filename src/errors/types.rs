//! Error type definitions for the probe scheduler

use thiserror::Error;

/// Top-level scheduler error type
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Database-related errors (SeaORM)
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Repository layer errors
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Payload encoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No schedule row for the given key
    #[error("Schedule not found: {job_type} / '{target_key}'")]
    ScheduleNotFound { job_type: String, target_key: String },

    /// A job type name that is not part of the vocabulary
    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Repository layer specific errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Database errors from SeaORM
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Record not found
    #[error("Record not found: {table} with {field} = {value}")]
    RecordNotFound {
        table: String,
        field: String,
        value: String,
    },

    /// Stored payload could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored value outside the known vocabulary
    #[error("Invalid stored value in {table}.{field}: {value}")]
    InvalidValue {
        table: String,
        field: String,
        value: String,
    },
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// figment could not read or extract the configuration
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// Configuration could not be rendered as TOML
    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    /// Maintenance window that does not parse or has an invalid duration
    #[error("Invalid maintenance window '{start_utc}': {message}")]
    InvalidWindow { start_utc: String, message: String },

    /// Any other out-of-range value
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl RepositoryError {
    pub fn not_found(table: &str, field: &str, value: impl Into<String>) -> Self {
        Self::RecordNotFound {
            table: table.to_string(),
            field: field.to_string(),
            value: value.into(),
        }
    }
}
