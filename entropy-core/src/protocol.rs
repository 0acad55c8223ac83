// SPDX-License-Identifier: MIT
//
// Entropy Server: Hardware Random Numbers over HTTP
// Copyright (c) 2025 Entropy Server Contributors

//! Response types for the JSON API
//!
//! Entropy is returned as `{ "bytes": N, "entropy": ... }`. The `entropy` field is
//! a JSON array of integers by default, or a hex/base64 string on request.

use crate::buffer::{BufferStats, WatermarkLevel};
use crate::config::{RateLimit, ServerConfig};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Successful entropy response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntropyResponse {
    /// Number of bytes served (after clamping)
    pub bytes: usize,
    pub entropy: EncodedEntropy,
}

/// Entropy payload in the requested encoding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum EncodedEntropy {
    Array(Vec<u8>),
    Text(String),
}

/// Server description returned by `/api/info/`
///
/// Field names are kept compact for compatibility with existing clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub server: String,
    pub protocolversions: Vec<String>,
    pub source: String,
    pub bitsofentropy: u32,
    pub minrequestbytes: usize,
    pub maxrequestbytes: usize,
    pub ratelimits: Vec<RateLimit>,
}

impl From<&ServerConfig> for ServerInfo {
    fn from(config: &ServerConfig) -> Self {
        Self {
            server: config.server.clone(),
            protocolversions: config.protocol_versions.clone(),
            source: config.source.clone(),
            bitsofentropy: config.bits_of_entropy,
            minrequestbytes: config.min_request_bytes,
            maxrequestbytes: config.max_request_bytes,
            ratelimits: config.rate_limits.clone(),
        }
    }
}

/// Health status for system monitoring
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Server status response
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    /// Overall health status
    pub status: HealthStatus,

    pub watermark: WatermarkLevel,

    /// Buffer fill percentage (0-100)
    pub buffer_fill_percent: f64,

    /// Available bytes in buffer
    pub buffer_bytes_available: usize,

    pub buffer_capacity: usize,

    /// Timestamp of last data received from the device
    pub last_data_received: Option<DateTime<Utc>>,

    /// Seconds since the device last delivered data
    pub data_freshness_seconds: Option<u64>,

    /// Service uptime in seconds
    pub uptime_seconds: u64,

    /// Total requests served
    pub total_requests_served: u64,

    /// Total bytes served
    pub total_bytes_served: u64,

    /// Current requests per second
    pub requests_per_second: f64,

    pub buffer: BufferStats,

    /// Any warnings or issues
    pub warnings: Vec<String>,
}

/// Encoding format for served entropy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncodingFormat {
    /// JSON array of byte values
    #[default]
    Array,
    /// Hexadecimal encoding
    Hex,
    /// Base64 encoding
    Base64,
}

impl EncodingFormat {
    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "array" | "json" => Some(Self::Array),
            "hex" | "hexadecimal" => Some(Self::Hex),
            "base64" | "b64" => Some(Self::Base64),
            _ => None,
        }
    }

    pub fn encode(&self, data: &[u8]) -> EncodedEntropy {
        match self {
            Self::Array => EncodedEntropy::Array(data.to_vec()),
            Self::Hex => EncodedEntropy::Text(hex::encode(data)),
            Self::Base64 => {
                EncodedEntropy::Text(base64::engine::general_purpose::STANDARD.encode(data))
            }
        }
    }
}
