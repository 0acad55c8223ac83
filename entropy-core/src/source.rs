// SPDX-License-Identifier: MIT
//
// Entropy Server: Hardware Random Numbers over HTTP
// Copyright (c) 2025 Entropy Server Contributors

//! Producer side: draining an entropy device into the buffer
//!
//! The device is read on a dedicated thread. Each chunk is pushed into the
//! [`EntropyBuffer`] as soon as it arrives; a full buffer drops the excess rather
//! than stalling the device.

use crate::buffer::EntropyBuffer;
use crate::config::ServerConfig;
use crate::metrics::Metrics;
use crate::retry::RetryPolicy;
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Pause between pushes while the buffer is completely full
const FULL_BUFFER_PAUSE: Duration = Duration::from_millis(50);

/// A blocking source of random bytes
pub trait EntropySource: Send {
    /// Fill the front of `buf`, returning how many bytes were written.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Recover after a failed read, e.g. by reopening the device.
    fn reopen(&mut self) -> Result<()> {
        Ok(())
    }

    /// Human-readable origin for logs
    fn describe(&self) -> String;
}

/// Character device such as `/dev/hwrng` or a USB serial RNG
pub struct DeviceSource {
    path: PathBuf,
    init_command: Option<Vec<u8>>,
    file: Option<File>,
}

impl DeviceSource {
    /// Open the device and send the start command, if configured
    pub fn open(path: impl AsRef<Path>, init_command: Option<Vec<u8>>) -> Result<Self> {
        let mut source = Self {
            path: path.as_ref().to_path_buf(),
            init_command,
            file: None,
        };
        source.reopen()?;
        Ok(source)
    }
}

impl EntropySource for DeviceSource {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Device(format!("{} is not open", self.path.display())))?;

        match file.read(buf)? {
            0 => Err(Error::Device(format!(
                "{} reached end of stream",
                self.path.display()
            ))),
            n => Ok(n),
        }
    }

    fn reopen(&mut self) -> Result<()> {
        self.file = None;

        let mut file = OpenOptions::new()
            .read(true)
            .write(self.init_command.is_some())
            .open(&self.path)
            .map_err(|e| Error::Device(format!("Failed to open {}: {}", self.path.display(), e)))?;

        if let Some(command) = &self.init_command {
            file.write_all(command).map_err(|e| {
                Error::Device(format!(
                    "Failed to send start command to {}: {}",
                    self.path.display(),
                    e
                ))
            })?;
            debug!(bytes = command.len(), "Sent device start command");
        }

        self.file = Some(file);
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Pseudo-random stand-in for a device, paced like one
///
/// Not a source of real entropy; intended for development and tests.
pub struct PseudoSource {
    rng: StdRng,
    interval: Duration,
}

impl PseudoSource {
    pub fn new(interval: Duration) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            interval,
        }
    }

    pub fn seeded(seed: u64, interval: Duration) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            interval,
        }
    }
}

impl EntropySource for PseudoSource {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.interval.is_zero() {
            std::thread::sleep(self.interval);
        }
        self.rng.fill_bytes(buf);
        Ok(buf.len())
    }

    fn describe(&self) -> String {
        "pseudo-random (simulated)".to_string()
    }
}

/// Build the source selected by the configuration
pub fn from_config(config: &ServerConfig) -> Result<Box<dyn EntropySource>> {
    if config.simulate {
        warn!("Simulation mode: serving pseudo-random bytes, not hardware entropy");
        return Ok(Box::new(PseudoSource::new(Duration::from_millis(10))));
    }

    let source = DeviceSource::open(&config.device_path, config.device_init_bytes()?)?;
    Ok(Box::new(source))
}

/// Producer loop: read chunks from `source` and push them into `buffer`.
///
/// Returns `Ok(())` once `cancel` fires, or the last error when the source
/// fails permanently.
#[instrument(skip_all, fields(source = %source.describe(), chunk_size = chunk_size))]
pub fn run_producer(
    mut source: Box<dyn EntropySource>,
    buffer: EntropyBuffer,
    metrics: Metrics,
    chunk_size: usize,
    retry: RetryPolicy,
    cancel: CancellationToken,
) -> Result<()> {
    info!("Starting entropy producer");
    let mut chunk = vec![0u8; chunk_size];

    while !cancel.is_cancelled() {
        let read = retry.execute(
            &cancel,
            || source.read_chunk(&mut chunk),
            |e| {
                metrics.record_device_failure();
                debug!("Device read failed: {}", e);
            },
        );

        // The retry closure holds `source` mutably, so reopening happens here
        let n = match read {
            Ok(n) => n,
            Err(Error::Cancelled) => break,
            Err(e) if e.is_retryable() => {
                metrics.record_device_failure();
                warn!("Device read keeps failing, reopening: {}", e);
                if let Err(e) = source.reopen() {
                    error!("Failed to reopen entropy source: {}", e);
                    return Err(e);
                }
                continue;
            }
            Err(e) => {
                metrics.record_device_failure();
                error!("Entropy source failed: {}", e);
                return Err(e);
            }
        };

        metrics.record_device_read();
        let outcome = buffer.push(&chunk[..n]);

        // Keep draining the device so its output stays fresh, but don't spin on a full buffer
        if outcome.accepted == 0 {
            std::thread::sleep(FULL_BUFFER_PAUSE);
        }
    }

    info!("Entropy producer stopped");
    Ok(())
}

/// Spawn [`run_producer`] on a dedicated, named thread.
pub fn spawn_producer(
    source: Box<dyn EntropySource>,
    buffer: EntropyBuffer,
    metrics: Metrics,
    chunk_size: usize,
    cancel: CancellationToken,
) -> Result<std::thread::JoinHandle<Result<()>>> {
    std::thread::Builder::new()
        .name("entropy-producer".to_string())
        .spawn(move || {
            run_producer(
                source,
                buffer,
                metrics,
                chunk_size,
                RetryPolicy::default(),
                cancel,
            )
        })
        .map_err(Error::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Replays scripted reads, then reports a permanent failure
    struct ScriptedSource {
        reads: VecDeque<Result<Vec<u8>>>,
        reopens: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(reads: Vec<Result<Vec<u8>>>) -> (Self, Arc<AtomicUsize>) {
            let reopens = Arc::new(AtomicUsize::new(0));
            let source = Self {
                reads: reads.into(),
                reopens: Arc::clone(&reopens),
            };
            (source, reopens)
        }
    }

    impl EntropySource for ScriptedSource {
        fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(Error::Config("script exhausted".into())),
            }
        }

        fn reopen(&mut self) -> Result<()> {
            self.reopens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_producer_pushes_in_order() {
        let buffer = EntropyBuffer::new(64);
        let metrics = Metrics::new();
        let (source, reopens) = ScriptedSource::new(vec![
            Ok(vec![1, 2, 3]),
            Err(Error::Device("glitch".into())),
            Ok(vec![4, 5]),
        ]);

        let result = run_producer(
            Box::new(source),
            buffer.clone(),
            metrics.clone(),
            16,
            quick_retry(),
            CancellationToken::new(),
        );

        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(buffer.try_pop(5).unwrap().as_ref(), &[1, 2, 3, 4, 5]);
        assert_eq!(metrics.device_reads(), 2);
        assert_eq!(metrics.device_read_failures(), 2);
        assert_eq!(reopens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_producer_reopens_after_exhausted_retries() {
        let buffer = EntropyBuffer::new(64);
        let (source, reopens) = ScriptedSource::new(vec![
            Err(Error::Device("unplugged".into())),
            Err(Error::Device("unplugged".into())),
            Err(Error::Device("unplugged".into())),
            Ok(vec![9]),
        ]);

        let result = run_producer(
            Box::new(source),
            buffer.clone(),
            Metrics::new(),
            16,
            quick_retry(),
            CancellationToken::new(),
        );

        assert!(result.is_err());
        assert_eq!(reopens.load(Ordering::SeqCst), 1);
        assert_eq!(buffer.try_pop(1).unwrap().as_ref(), &[9]);
    }

    #[test]
    fn test_producer_drops_overflow() {
        let buffer = EntropyBuffer::new(4);
        let (source, _) = ScriptedSource::new(vec![Ok(vec![1, 2, 3]), Ok(vec![4, 5, 6])]);

        let _ = run_producer(
            Box::new(source),
            buffer.clone(),
            Metrics::new(),
            8,
            quick_retry(),
            CancellationToken::new(),
        );

        assert_eq!(buffer.stats().bytes_dropped, 2);
        assert_eq!(buffer.try_pop(4).unwrap().as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_producer_stops_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_producer(
            Box::new(PseudoSource::seeded(7, Duration::ZERO)),
            EntropyBuffer::new(16),
            Metrics::new(),
            8,
            quick_retry(),
            cancel,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_pseudo_source_is_deterministic_when_seeded() {
        let mut a = PseudoSource::seeded(42, Duration::ZERO);
        let mut b = PseudoSource::seeded(42, Duration::ZERO);
        let (mut x, mut y) = ([0u8; 32], [0u8; 32]);
        assert_eq!(a.read_chunk(&mut x).unwrap(), 32);
        b.read_chunk(&mut y).unwrap();
        assert_eq!(x, y);
    }

    #[test]
    fn test_device_source_reads_file() {
        let path = std::env::temp_dir().join(format!("entropy-device-{}", std::process::id()));
        std::fs::write(&path, [7u8, 8, 9]).unwrap();

        let mut source = DeviceSource::open(&path, None).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(source.read_chunk(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[7, 8, 9]);

        // A regular file runs dry; a device would not
        assert!(matches!(source.read_chunk(&mut buf), Err(Error::Device(_))));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_device_source_missing_path() {
        let result = DeviceSource::open("/nonexistent/hwrng", None);
        assert!(matches!(result, Err(Error::Device(_))));
    }
}
