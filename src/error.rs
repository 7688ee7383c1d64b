//! Error types for spatio-live.

use crate::storage::StoreError;
use thiserror::Error;

/// Errors produced by the geo codec, the query engine and the store facade.
#[derive(Debug, Error)]
pub enum GeoError {
    /// Latitude or longitude outside the valid range, or not finite
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    /// Query radius is negative or not finite
    #[error("Invalid radius: {0}")]
    InvalidRadius(String),

    /// Geohash string contains characters outside the base-32 alphabet
    #[error("Invalid geohash: {0}")]
    InvalidGeohash(String),

    /// Key cannot be used as a store path
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The listener is already registered on this query
    #[error("Listener is already registered on this query")]
    DuplicateListener,

    /// The listener was never added, or was removed already
    #[error("Listener is not registered on this query")]
    UnknownListener,

    /// A stored value does not decode to a valid coordinate pair
    #[error("Malformed stored value: {0}")]
    MalformedStoredValue(String),

    /// Failure reported by the backend store
    #[error("Backend error: {0}")]
    Backend(#[from] StoreError),

    /// No tokio runtime to run subscriptions and dispatch on
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for spatio-live operations
pub type Result<T> = std::result::Result<T, GeoError>;
