//! services/api/src/error.rs
//!
//! Failures that stop the service (or the `openapi` tool) before it can serve.
//! Request-time failures never reach this type; handlers reduce them to a status
//! code and a short message.

use crate::config::ConfigError;
use residency_core::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Seeding the step catalog failed.
    #[error("Startup write failed: {0}")]
    Port(#[from] PortError),

    /// The database stayed unreachable through every reconnect attempt.
    #[error("Database unreachable: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Could not serialize the OpenAPI document: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binding the listener or writing an output file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
