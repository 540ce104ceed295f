//! Error types for the wellness SMS engine.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Carrier error: {0}")]
    Carrier(#[from] CarrierError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors from the outbound carrier call.
///
/// `NoSenderIdentity` is a configuration failure raised before any network
/// traffic; the other variants wrap a single attempted API call.
#[derive(Debug, thiserror::Error)]
pub enum CarrierError {
    #[error("No sender identity configured (need a messaging service SID or a from number)")]
    NoSenderIdentity,

    #[error("Carrier request failed: {0}")]
    Request(String),

    #[error("Carrier rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid carrier response: {0}")]
    InvalidResponse(String),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
