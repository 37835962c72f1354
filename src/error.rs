//! Error types for the cache client
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Driver Error Enum ==
/// Failure reported by the underlying cache driver.
///
/// Delivered through the asynchronous result of every driver-backed operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// `add` found the key already holding a value
    #[error("Item not stored: {0}")]
    NotStored(String),

    /// Network or connection failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Server or protocol failure
    #[error("Server error: {0}")]
    Server(String),

    /// Payload could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// The driver dropped the completion without answering
    #[error("Driver disconnected before completing the request")]
    Disconnected,
}

impl DriverError {
    /// True when the failure is the benign "already stored" outcome of `add`.
    pub fn is_not_stored(&self) -> bool {
        matches!(self, DriverError::NotStored(_))
    }
}

// == Validation Error Enum ==
/// Caller misuse, raised synchronously before any I/O.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Cache.{operation}: Expiration must be no greater than {max} seconds (got {requested}).")]
    ExpirationTooLong {
        operation: &'static str,
        requested: u32,
        max: u32,
    },
}

// == Cache Error Enum ==
/// Unified error type for the cache client.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Invalid call arguments
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Driver reported a failure
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Configuration could not be loaded
    #[error("Invalid configuration: {0}")]
    Config(String),
}

// == Result Type Alias ==
/// Convenience Result type for the cache client.
pub type Result<T> = std::result::Result<T, CacheError>;
