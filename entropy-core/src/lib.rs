// SPDX-License-Identifier: MIT
//
// Entropy Server: Hardware Random Numbers over HTTP
// Copyright (c) 2025 Entropy Server Contributors

//! Entropy Core Library
//!
//! This crate provides the building blocks of the entropy server: a fixed-capacity
//! circular byte store fed by a hardware random number generator, the synchronized
//! buffer that producers and request handlers share, and the ambient pieces
//! (configuration, errors, metrics, wire types) around it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    push     ┌──────────────────────────┐    pop      ┌──────────────┐
//! │   Hardware   │ ──────────> │      EntropyBuffer       │ ──────────> │    HTTP      │
//! │    Device    │  (chunks)   │  Mutex<RingStore> + wake │  (n bytes)  │   Handlers   │
//! └──────────────┘             └──────────────────────────┘             └──────────────┘
//! ```
//!
//! The library is organized into modules representing core concerns:
//! - `ring`: circular byte storage and its cursor arithmetic
//! - `buffer`: synchronized buffer with blocking, deadline-bounded withdrawal
//! - `source`: producer adapter that drains an entropy device into the buffer
//! - `config`: configuration management with validation
//! - `protocol`: JSON response types and entropy encodings
//! - `metrics`: counters and Prometheus exposition
//! - `retry`: backoff policy for device reads
//! - `error`: unified error types

pub mod buffer;
pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod retry;
pub mod ring;
pub mod source;

pub use buffer::EntropyBuffer;
pub use error::{Error, Result};
pub use ring::{IngestOutcome, RingStore};

/// Library version reported by the server
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default buffer capacity (64 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Default smallest number of bytes served per request
pub const DEFAULT_MIN_REQUEST_BYTES: usize = 64;

/// Default largest number of bytes served per request
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 4096;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 11372;

/// Default device read size (4 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 4096;
