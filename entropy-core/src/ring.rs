// SPDX-License-Identifier: MIT
//
// Entropy Server: Hardware Random Numbers over HTTP
// Copyright (c) 2025 Entropy Server Contributors

//! Fixed-capacity circular byte storage
//!
//! [`RingStore`] is the plain data structure behind the entropy buffer: one
//! allocation of `capacity` bytes, a write cursor, a read cursor and a flag that
//! tells "empty" apart from "full" when the two cursors meet. It knows nothing
//! about threads; [`crate::buffer::EntropyBuffer`] serializes access to it.
//!
//! # Layout
//!
//! ```text
//!  write_ahead = true                     write_ahead = false
//!  ┌────┬──────────────┬─────────┐        ┌─────────┬──────────┬──────────┐
//!  │free│   occupied   │  free   │        │occupied │   free   │ occupied │
//!  └────┴──────────────┴─────────┘        └─────────┴──────────┴──────────┘
//!       ^read          ^write                       ^write     ^read
//! ```
//!
//! # Overflow
//!
//! Ingest never blocks and never fails: bytes that do not fit are dropped. The
//! returned [`IngestOutcome`] reports how many, so callers can count them.

use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Result of a single ingest call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Bytes copied into storage
    pub accepted: usize,
    /// Bytes discarded because the ring was full
    pub dropped: usize,
}

impl IngestOutcome {
    /// True when part of the chunk was discarded
    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }
}

/// Circular byte store with full/empty disambiguation
#[derive(Debug)]
pub struct RingStore {
    storage: Box<[u8]>,
    write: usize,
    read: usize,
    /// `true`: write is at or ahead of read within the current lap (equal means empty).
    /// `false`: write has wrapped behind read (equal means full).
    write_ahead: bool,
}

impl RingStore {
    /// Create an empty ring of `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be positive");
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            write: 0,
            read: 0,
            write_ahead: true,
        }
    }

    /// Total byte slots
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes stored and not yet withdrawn
    pub fn occupied(&self) -> usize {
        if self.write_ahead {
            self.write - self.read
        } else {
            self.capacity() - self.read + self.write
        }
    }

    /// Bytes that can be ingested without truncation
    pub fn free(&self) -> usize {
        self.capacity() - self.occupied()
    }

    pub fn is_empty(&self) -> bool {
        self.write_ahead && self.write == self.read
    }

    pub fn is_full(&self) -> bool {
        !self.write_ahead && self.write == self.read
    }

    /// Append `chunk`, dropping whatever does not fit.
    pub fn ingest(&mut self, chunk: &[u8]) -> IngestOutcome {
        let mut accepted = 0;

        if self.write_ahead {
            // Tail span: from the write cursor to the end of storage
            let span = (self.capacity() - self.write).min(chunk.len());
            self.storage[self.write..self.write + span].copy_from_slice(&chunk[..span]);
            self.write += span;
            accepted = span;

            if self.write == self.capacity() {
                self.write = 0;
                self.write_ahead = false;
            }
        }

        if !self.write_ahead {
            // Reclaimed front span: up to the read cursor
            let span = (self.read - self.write).min(chunk.len() - accepted);
            self.storage[self.write..self.write + span]
                .copy_from_slice(&chunk[accepted..accepted + span]);
            self.write += span;
            accepted += span;
        }

        IngestOutcome {
            accepted,
            dropped: chunk.len() - accepted,
        }
    }

    /// Remove exactly `count` bytes, oldest first.
    ///
    /// Fails with [`Error::InsufficientData`] and leaves the ring untouched when
    /// fewer than `count` bytes are stored.
    pub fn withdraw(&mut self, count: usize) -> Result<Bytes> {
        let available = self.occupied();
        if count > available {
            return Err(Error::InsufficientData {
                requested: count,
                available,
            });
        }

        let mut out = BytesMut::with_capacity(count);
        let tail = self.capacity() - self.read;

        if self.write_ahead || count <= tail {
            out.put_slice(&self.storage[self.read..self.read + count]);
            self.read += count;

            if self.read == self.capacity() {
                self.read = 0;
                self.write_ahead = true;
            }
        } else {
            let head = count - tail;
            out.put_slice(&self.storage[self.read..]);
            out.put_slice(&self.storage[..head]);
            self.read = head;
            self.write_ahead = true;
        }

        Ok(out.freeze())
    }

    /// Discard all stored bytes
    pub fn clear(&mut self) {
        self.write = 0;
        self.read = 0;
        self.write_ahead = true;
    }
}
