// SPDX-License-Identifier: MIT
//
// Entropy Server: Hardware Random Numbers over HTTP
// Copyright (c) 2025 Entropy Server Contributors

//! Error types for the entropy server
//!
//! Provides a unified error taxonomy using `thiserror` for ergonomic error handling.

pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for entropy operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Withdrawal attempted with fewer bytes stored than requested.
    ///
    /// Internal to the buffer: waiting withdrawals retry instead of surfacing it.
    #[error("Insufficient data: requested {requested} bytes, {available} available")]
    InsufficientData { requested: usize, available: usize },

    /// Request can never be satisfied by a buffer of this capacity
    #[error("Request of {requested} bytes exceeds buffer capacity {capacity}")]
    RequestTooLarge { requested: usize, capacity: usize },

    /// Withdrawal deadline expired before enough data arrived
    #[error("Operation timed out")]
    Timeout,

    /// Withdrawal abandoned because its cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Entropy device misbehaved
    #[error("Device error: {0}")]
    Device(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if error is transient and retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Device(_) | Error::Timeout)
    }

    /// Check if the caller should see this as a temporary unavailability
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Timeout | Error::Cancelled)
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<envy::Error> for Error {
    fn from(e: envy::Error) -> Self {
        Error::Config(format!("Failed to parse environment variables: {}", e))
    }
}
