//! Error types for guardian-core.
//!
//! Per-provider failures never reach this type — they stay inside a
//! `ProviderResponse`'s `error_kind`. These variants cover the
//! request-level and infrastructure failures that *do* cross the public
//! API boundary: config rejection, storage failures, and cancellation.

use thiserror::Error;

/// Result type alias using guardian-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while operating the Convergence Engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Audit log or training sink storage failure.
    #[error("storage error: {0}")]
    MemoryStorage(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration rejected at construction or reload time (`config_error`).
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant violation (e.g. a poisoned lock).
    #[error("internal error: {0}")]
    Internal(String),

    /// Request was cancelled before completion (`cancelled`).
    #[error("request cancelled: {0}")]
    Cancelled(String),
}

impl Error {
    /// Create a cancellation error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }
}
