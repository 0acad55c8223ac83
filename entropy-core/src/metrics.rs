// SPDX-License-Identifier: MIT
//
// Entropy Server: Hardware Random Numbers over HTTP
// Copyright (c) 2025 Entropy Server Contributors

//! Metrics collection and reporting

use crate::buffer::EntropyBuffer;
use parking_lot::RwLock;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

const MAX_LATENCY_SAMPLES: usize = 10_000;

/// Process-wide metrics collector
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    start_time: Instant,

    // Request metrics
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
    requests_timed_out: AtomicU64,
    requests_rate_limited: AtomicU64,
    bytes_served: AtomicU64,

    // Device metrics
    device_reads: AtomicU64,
    device_read_failures: AtomicU64,

    // Latency tracking (microseconds)
    request_latencies: RwLock<Vec<u64>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                start_time: Instant::now(),
                requests_total: AtomicU64::new(0),
                requests_failed: AtomicU64::new(0),
                requests_timed_out: AtomicU64::new(0),
                requests_rate_limited: AtomicU64::new(0),
                bytes_served: AtomicU64::new(0),
                device_reads: AtomicU64::new(0),
                device_read_failures: AtomicU64::new(0),
                request_latencies: RwLock::new(Vec::with_capacity(MAX_LATENCY_SAMPLES)),
            }),
        }
    }

    // Request metrics
    pub fn record_request(&self, bytes: usize, latency_micros: u64) {
        self.inner.requests_total.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_served.fetch_add(bytes as u64, Ordering::Relaxed);

        let mut latencies = self.inner.request_latencies.write();
        latencies.push(latency_micros);
        if latencies.len() > MAX_LATENCY_SAMPLES {
            latencies.drain(0..MAX_LATENCY_SAMPLES / 2);
        }
    }

    pub fn record_request_failure(&self) {
        self.inner.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_timeout(&self) {
        self.inner.requests_timed_out.fetch_add(1, Ordering::Relaxed);
        self.record_request_failure();
    }

    pub fn record_rate_limited(&self) {
        self.inner.requests_rate_limited.fetch_add(1, Ordering::Relaxed);
        self.record_request_failure();
    }

    pub fn requests_total(&self) -> u64 {
        self.inner.requests_total.load(Ordering::Relaxed)
    }

    pub fn requests_failed(&self) -> u64 {
        self.inner.requests_failed.load(Ordering::Relaxed)
    }

    pub fn requests_timed_out(&self) -> u64 {
        self.inner.requests_timed_out.load(Ordering::Relaxed)
    }

    pub fn requests_rate_limited(&self) -> u64 {
        self.inner.requests_rate_limited.load(Ordering::Relaxed)
    }

    pub fn bytes_served(&self) -> u64 {
        self.inner.bytes_served.load(Ordering::Relaxed)
    }

    // Device metrics
    pub fn record_device_read(&self) {
        self.inner.device_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_device_failure(&self) {
        self.inner.device_read_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn device_reads(&self) -> u64 {
        self.inner.device_reads.load(Ordering::Relaxed)
    }

    pub fn device_read_failures(&self) -> u64 {
        self.inner.device_read_failures.load(Ordering::Relaxed)
    }

    // Derived metrics
    pub fn uptime_seconds(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }

    pub fn requests_per_second(&self) -> f64 {
        let uptime = self.uptime_seconds() as f64;
        if uptime > 0.0 {
            self.requests_total() as f64 / uptime
        } else {
            0.0
        }
    }

    pub fn latency_percentile(&self, percentile: f64) -> Option<u64> {
        let latencies = self.inner.request_latencies.read();
        if latencies.is_empty() {
            return None;
        }

        let mut sorted = latencies.clone();
        sorted.sort_unstable();
        let index = ((sorted.len() as f64 * percentile).ceil() as usize).min(sorted.len() - 1);
        Some(sorted[index])
    }

    pub fn latency_p50(&self) -> Option<u64> {
        self.latency_percentile(0.50)
    }

    pub fn latency_p99(&self) -> Option<u64> {
        self.latency_percentile(0.99)
    }

    /// Generate Prometheus-compatible metrics output, including buffer gauges
    pub fn prometheus_format(&self, buffer: &EntropyBuffer) -> String {
        let stats = buffer.stats();
        let mut output = String::new();

        let counters = [
            ("entropy_requests_total", "Total number of requests served", self.requests_total()),
            ("entropy_requests_failed", "Total number of failed requests", self.requests_failed()),
            ("entropy_requests_timed_out", "Requests that gave up waiting for entropy", self.requests_timed_out()),
            ("entropy_requests_rate_limited", "Requests rejected by rate limits", self.requests_rate_limited()),
            ("entropy_bytes_served", "Total bytes served", self.bytes_served()),
            ("entropy_device_reads", "Chunks read from the entropy device", self.device_reads()),
            ("entropy_device_read_failures", "Failed entropy device reads", self.device_read_failures()),
            ("entropy_buffer_bytes_ingested", "Bytes stored in the buffer", stats.bytes_pushed),
            ("entropy_buffer_bytes_dropped", "Bytes dropped because the buffer was full", stats.bytes_dropped),
            ("entropy_buffer_truncated_pushes", "Device chunks only partially stored", stats.truncated_pushes),
            ("entropy_buffer_pop_retries", "Withdrawals that lost a race and retried", stats.pop_retries),
        ];

        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP {} {}", name, help);
            let _ = writeln!(output, "# TYPE {} counter", name);
            let _ = writeln!(output, "{} {}", name, value);
        }

        let gauges = [
            ("entropy_buffer_bytes", "Bytes currently buffered", buffer.len() as u64),
            ("entropy_buffer_capacity_bytes", "Buffer capacity in bytes", buffer.capacity() as u64),
            ("entropy_uptime_seconds", "Service uptime in seconds", self.uptime_seconds()),
        ];

        for (name, help, value) in gauges {
            let _ = writeln!(output, "# HELP {} {}", name, help);
            let _ = writeln!(output, "# TYPE {} gauge", name);
            let _ = writeln!(output, "{} {}", name, value);
        }

        if let Some(p50) = self.latency_p50() {
            output.push_str("# HELP entropy_latency_p50_microseconds Request latency 50th percentile\n");
            output.push_str("# TYPE entropy_latency_p50_microseconds gauge\n");
            let _ = writeln!(output, "entropy_latency_p50_microseconds {}", p50);
        }

        if let Some(p99) = self.latency_p99() {
            output.push_str("# HELP entropy_latency_p99_microseconds Request latency 99th percentile\n");
            output.push_str("# TYPE entropy_latency_p99_microseconds gauge\n");
            let _ = writeln!(output, "entropy_latency_p99_microseconds {}", p99);
        }

        output
    }
}
