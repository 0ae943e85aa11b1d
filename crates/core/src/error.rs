//! Error types for the DMS core crate.

use thiserror::Error;

/// Top-level error type for all DMS core operations.
///
/// Expected per-request outcomes (authorization denials, missing documents,
/// unresolved references) are modelled as result values elsewhere and never
/// show up here. Everything in this enum is either a backend failure or a
/// fatal inconsistency in the loaded schema.
#[derive(Debug, Error)]
pub enum DmsError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("invalid JSONPath '{path}': {reason}")]
    JsonPath { path: String, reason: String },

    #[error("resource dependency graph is not acyclic, unable to break cycle: {cycle}")]
    NonAcyclicGraph { cycle: String },

    /// The loaded schema is internally inconsistent.
    #[error("schema configuration error: {0}")]
    Configuration(String),

    #[error("update cascade error: {0}")]
    Cascade(String),

    #[error("document store circuit breaker is open")]
    CircuitOpen,
}

impl From<serde_json::Error> for DmsError {
    fn from(err: serde_json::Error) -> Self {
        DmsError::Serialization(err.to_string())
    }
}

/// A convenience Result alias that defaults to [`DmsError`].
pub type Result<T> = std::result::Result<T, DmsError>;
