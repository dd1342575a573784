//! Store error types
//!
//! Defines all errors that can occur in the storage layer.

use thiserror::Error;

/// Errors that can occur while operating on a store
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Flat-file backend failed to read or write CSV data
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Document backend failed
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Time-series database backend failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Write batch is incompatible with the form established by the store.
    /// Never retried; surfaced to the caller immediately.
    #[error("form mismatch: store holds [{expected}], batch has [{found}]")]
    FormMismatch { expected: String, found: String },

    /// A read against the backend failed or returned nothing usable.
    /// Not retried by the core; the external scheduler calls again.
    #[error("failed to read from store: {0}")]
    ReadStore(String),

    /// The store (or one of its locations) holds no records
    #[error("store location '{0}' has no records")]
    Empty(String),

    /// A record is missing a field, or the field is not usable for the
    /// requested operation (e.g. not numeric, not a timestamp)
    #[error("field '{0}' is missing or has an unusable type")]
    BadField(String),

    /// The backend does not implement this operation
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
