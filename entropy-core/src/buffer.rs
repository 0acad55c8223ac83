//! Synchronized entropy buffer with FIFO semantics and bounded waiting
//!
//! [`EntropyBuffer`] owns the single [`RingStore`] of the process and is the only
//! way to reach it. One producer pushes device chunks; any number of request
//! handlers pop exact byte counts, waiting for data when the ring runs short.
//!
//! # Design
//!
//! - A `parking_lot::Mutex` guards the ring and its statistics; it is held only
//!   for the duration of one ingest or one withdrawal.
//! - An atomic occupancy mirror, written under the lock, lets waiters check for
//!   data without taking it. The check is advisory: the withdrawal re-checks
//!   under the lock and retries when another consumer got there first.
//! - Every push wakes waiters: async tasks through `tokio::sync::Notify`,
//!   threads through a `parking_lot::Condvar`.
//! - Every wait is bounded by a deadline and, for async callers, optionally by a
//!   `CancellationToken`.

use crate::ring::{IngestOutcome, RingStore};
use crate::{Error, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Thread-safe entropy buffer shared by the producer and request handlers
///
/// Cloning is cheap and yields another handle to the same ring.
#[derive(Clone)]
pub struct EntropyBuffer {
    inner: Arc<Shared>,
}

struct Shared {
    state: Mutex<BufferInner>,
    /// Occupancy as of the last completed operation
    occupied: AtomicUsize,
    capacity: usize,
    ingested: Notify,
    ingested_sync: Condvar,
}

struct BufferInner {
    ring: RingStore,
    stats: BufferStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BufferStats {
    pub total_pushes: u64,
    pub total_pops: u64,
    pub bytes_pushed: u64,
    pub bytes_popped: u64,
    /// Bytes discarded on ingest because the ring was full
    pub bytes_dropped: u64,
    pub truncated_pushes: u64,
    pub pop_timeouts: u64,
    pub pop_cancellations: u64,
    /// Pre-checks that saw enough data but lost the race for it
    pub pop_retries: u64,
    pub last_push: Option<DateTime<Utc>>,
}

/// Buffer watermark levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkLevel {
    Low,      // < 10%
    Medium,   // 10-80%
    High,     // 80-95%
    Critical, // > 95%
}

impl EntropyBuffer {
    /// Create an empty buffer of `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Shared {
                state: Mutex::new(BufferInner {
                    ring: RingStore::new(capacity),
                    stats: BufferStats::default(),
                }),
                occupied: AtomicUsize::new(0),
                capacity,
                ingested: Notify::new(),
                ingested_sync: Condvar::new(),
            }),
        }
    }

    /// Append a chunk from the entropy source.
    ///
    /// Never blocks on consumers and never fails. Bytes beyond the free space
    /// are dropped and counted in [`BufferStats::bytes_dropped`].
    pub fn push(&self, chunk: &[u8]) -> IngestOutcome {
        if chunk.is_empty() {
            return IngestOutcome::default();
        }

        let outcome = {
            let mut inner = self.inner.state.lock();
            let outcome = inner.ring.ingest(chunk);
            self.inner
                .occupied
                .store(inner.ring.occupied(), Ordering::Release);

            let stats = &mut inner.stats;
            stats.total_pushes += 1;
            stats.bytes_pushed += outcome.accepted as u64;
            stats.last_push = Some(Utc::now());
            if outcome.is_truncated() {
                stats.bytes_dropped += outcome.dropped as u64;
                stats.truncated_pushes += 1;
            }
            outcome
        };

        if outcome.is_truncated() {
            warn!(
                accepted = outcome.accepted,
                dropped = outcome.dropped,
                capacity = self.inner.capacity,
                "Buffer full, dropped entropy bytes"
            );
        }

        if outcome.accepted > 0 {
            self.inner.ingested.notify_waiters();
            self.inner.ingested_sync.notify_all();
        }

        outcome
    }

    /// Withdraw exactly `count` bytes, waiting up to `timeout` for them.
    pub async fn pop(&self, count: usize, timeout: Duration) -> Result<Bytes> {
        let deadline = tokio::time::Instant::now() + timeout;
        self.wait_and_pop(count, deadline, None).await
    }

    /// Withdraw exactly `count` bytes, waiting until `deadline` or until `cancel` fires.
    ///
    /// Returns [`Error::Timeout`] or [`Error::Cancelled`] with the buffer untouched
    /// when the wait ends without data.
    pub async fn pop_until(
        &self,
        count: usize,
        deadline: tokio::time::Instant,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        self.wait_and_pop(count, deadline, Some(cancel)).await
    }

    async fn wait_and_pop(
        &self,
        count: usize,
        deadline: tokio::time::Instant,
        cancel: Option<&CancellationToken>,
    ) -> Result<Bytes> {
        self.check_request(count)?;

        loop {
            // Register before checking so a push between the check and the await is not missed
            let notified = self.inner.ingested.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.occupied.load(Ordering::Acquire) >= count {
                if let Some(data) = self.try_pop(count) {
                    return Ok(data);
                }
                self.inner.state.lock().stats.pop_retries += 1;
                debug!(count, "Lost race for buffered entropy, retrying");
                continue;
            }

            let cancelled = async {
                match cancel {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending().await,
                }
            };

            // Data that arrived by the deadline is served rather than timed out
            tokio::select! {
                biased;
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    self.inner.state.lock().stats.pop_timeouts += 1;
                    debug!(count, available = self.len(), "Timed out waiting for entropy");
                    return Err(Error::Timeout);
                }
                _ = cancelled => {
                    self.inner.state.lock().stats.pop_cancellations += 1;
                    return Err(Error::Cancelled);
                }
            }
        }
    }

    /// Withdraw exactly `count` bytes from a plain thread, blocking up to `timeout`.
    pub fn pop_blocking(&self, count: usize, timeout: Duration) -> Result<Bytes> {
        self.check_request(count)?;
        let deadline = Instant::now() + timeout;

        let mut inner = self.inner.state.lock();
        loop {
            if inner.ring.occupied() >= count {
                return self.withdraw_locked(&mut inner, count);
            }

            // Releases the lock while parked
            if self
                .inner
                .ingested_sync
                .wait_until(&mut inner, deadline)
                .timed_out()
                && inner.ring.occupied() < count
            {
                inner.stats.pop_timeouts += 1;
                return Err(Error::Timeout);
            }
        }
    }

    /// Withdraw exactly `count` bytes if they are stored right now.
    pub fn try_pop(&self, count: usize) -> Option<Bytes> {
        let mut inner = self.inner.state.lock();
        self.withdraw_locked(&mut inner, count).ok()
    }

    fn withdraw_locked(&self, inner: &mut BufferInner, count: usize) -> Result<Bytes> {
        let data = inner.ring.withdraw(count)?;
        self.inner
            .occupied
            .store(inner.ring.occupied(), Ordering::Release);
        inner.stats.total_pops += 1;
        inner.stats.bytes_popped += count as u64;
        Ok(data)
    }

    fn check_request(&self, count: usize) -> Result<()> {
        if count > self.inner.capacity {
            return Err(Error::RequestTooLarge {
                requested: count,
                capacity: self.inner.capacity,
            });
        }
        Ok(())
    }

    /// Get current buffer utilization (bytes)
    pub fn len(&self) -> usize {
        self.inner.occupied.load(Ordering::Acquire)
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get buffer capacity (bytes)
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Get fill percentage (0.0 - 100.0)
    pub fn fill_percent(&self) -> f64 {
        (self.len() as f64 / self.inner.capacity as f64) * 100.0
    }

    /// Get current watermark level
    pub fn watermark(&self) -> WatermarkLevel {
        match self.fill_percent() {
            p if p < 10.0 => WatermarkLevel::Low,
            p if p < 80.0 => WatermarkLevel::Medium,
            p if p < 95.0 => WatermarkLevel::High,
            _ => WatermarkLevel::Critical,
        }
    }

    /// Get timestamp of the most recent ingest
    pub fn last_push(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().stats.last_push
    }

    /// Seconds since the device last delivered data
    pub fn freshness_seconds(&self) -> Option<u64> {
        self.last_push().map(|ts| {
            Utc::now()
                .signed_duration_since(ts)
                .num_seconds()
                .max(0) as u64
        })
    }

    /// Get buffer statistics
    pub fn stats(&self) -> BufferStats {
        self.inner.state.lock().stats.clone()
    }

    /// Clear all data from buffer
    pub fn clear(&self) {
        let mut inner = self.inner.state.lock();
        inner.ring.clear();
        self.inner.occupied.store(0, Ordering::Release);
    }
}
