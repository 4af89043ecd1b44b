//! Instrument sources and the sampling task.
//!
//! A [`SampleSource`] yields one validated sample per read. Two sources are
//! provided: [`LineSource`] parses JSON lines from any line-oriented reader
//! (a serial tty opened as a file, stdin, an in-memory cursor in tests) and
//! gates each record on its payload checksum; [`SimulatedSource`] fabricates
//! plausible readings for running the relay without an instrument attached.
//!
//! The sampling task stamps each sample (capture time, device id) and
//! enqueues it. A read failure is fatal to the whole relay: a misbehaving
//! instrument invalidates the premise of continued sampling.

use std::io::BufRead;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::queue::QueueProducer;
use crate::sample::{payload_checksum, Sample};

/// Errors that can occur while reading from an instrument source.
#[derive(Debug)]
pub enum SourceError {
    /// Underlying reader failed
    Read(std::io::Error),

    /// Line was not a well-formed sample record
    Parse(String),

    /// Record parsed but its checksum did not match the payload
    Checksum { expected: u32, actual: u32 },

    /// The input ended; the instrument is gone
    Closed,
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Read(e) => write!(f, "Instrument read failed: {}", e),
            SourceError::Parse(e) => write!(f, "Malformed sample record: {}", e),
            SourceError::Checksum { expected, actual } => {
                write!(
                    f,
                    "Checksum mismatch: record says {}, payload sums to {}",
                    expected, actual
                )
            }
            SourceError::Closed => write!(f, "Instrument input ended"),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Read(e) => Some(e),
            _ => None,
        }
    }
}

/// Produces one validated sample record per read. Reads may block.
pub trait SampleSource {
    fn read_sample(&mut self) -> Result<Sample, SourceError>;
}

/// Line-oriented instrument source: one JSON record per line, checksum
/// verified before the record is surfaced.
pub struct LineSource<R: BufRead> {
    reader: R,
}

impl<R: BufRead> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> SampleSource for LineSource<R> {
    fn read_sample(&mut self) -> Result<Sample, SourceError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).map_err(SourceError::Read)?;
        if n == 0 {
            return Err(SourceError::Closed);
        }

        let sample: Sample =
            serde_json::from_str(line.trim()).map_err(|e| SourceError::Parse(e.to_string()))?;

        if !sample.checksum_ok() {
            return Err(SourceError::Checksum {
                expected: sample.chksum,
                actual: payload_checksum(&sample.data),
            });
        }

        debug!(payload_len = sample.payload_len(), "Instrument line parsed");
        Ok(sample)
    }
}

/// Default channels reported by the simulated instrument.
const DEFAULT_CHANNELS: &[&str] = &["ph", "ec", "water_temp", "flow"];

/// Simulated instrument for running the relay without hardware.
///
/// Each read waits one sampling interval and produces a record with a
/// random reading per channel and a matching checksum.
pub struct SimulatedSource {
    channels: Vec<String>,
    interval: Duration,
}

impl SimulatedSource {
    pub fn new(channels: Vec<String>, interval: Duration) -> Self {
        Self { channels, interval }
    }

    pub fn with_defaults() -> Self {
        Self::new(
            DEFAULT_CHANNELS.iter().map(|s| s.to_string()).collect(),
            Duration::from_millis(500),
        )
    }
}

impl SampleSource for SimulatedSource {
    fn read_sample(&mut self) -> Result<Sample, SourceError> {
        std::thread::sleep(self.interval);

        let mut rng = rand::thread_rng();
        let mut data = Map::new();
        for channel in &self.channels {
            // One decimal place keeps the serialized payload stable.
            let reading = (rng.gen_range(0.0..100.0_f64) * 10.0).round() / 10.0;
            data.insert(channel.clone(), Value::from(reading));
        }

        Ok(Sample::new(payload_checksum(&data), data))
    }
}

/// Read, stamp, and enqueue samples until cancelled.
///
/// Designed to run under `tokio::task::spawn_blocking`: sources block, so
/// the token is observed between reads rather than inside them. A read
/// error cancels the token, taking the relay loop down with the sampler,
/// and the error is returned for the terminal report.
pub fn sampler_task<S: SampleSource>(
    mut source: S,
    producer: QueueProducer,
    device_id: String,
    cancel: CancellationToken,
) -> Result<(), SourceError> {
    info!(device_id = %device_id, "Sampling task started");

    while !cancel.is_cancelled() {
        match source.read_sample() {
            Ok(mut sample) => {
                sample.stamp(&device_id, Utc::now());
                producer.enqueue(sample);
            }
            Err(e) => {
                error!(error = %e, "Instrument failure; stopping relay");
                cancel.cancel();
                return Err(e);
            }
        }
    }

    info!("Sampling task stopped");
    Ok(())
}
