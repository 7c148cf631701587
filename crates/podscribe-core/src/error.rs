use thiserror::Error;

/// Raised when required process configuration is missing or malformed.
/// Fatal for process startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(String),
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
}

/// Object store failure. Transient network errors are retried internally
/// by the adapter before this is ever surfaced; anything reaching a
/// caller is persistent for that call.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object store error for key {key}: {kind}")]
    Failed { key: String, kind: String },
    #[error("operation timed out for key {key}")]
    Timeout { key: String },
}

/// Queue / broker failure (stream append, group read, ack, lock, dedup).
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker error during {operation}: {detail}")]
    Failed { operation: String, detail: String },
}

/// Speech-to-text model failure.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model load failed: {0}")]
    LoadFailed(String),
    #[error("transcription failed for {path}: {detail}")]
    TranscriptionFailed { path: String, detail: String },
    #[error("batch call timed out after {0:?}")]
    BatchTimeout(std::time::Duration),
}

/// Aggregate error type for call sites (scheduler, supervisor) that need
/// one error type across adapters, mirroring the one-aggregate-per-crate
/// pattern used for storage errors in the teacher codebase.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Model(#[from] ModelError),
}
