//! Edge Relay Library
//!
//! This library provides components for relaying instrument telemetry from
//! an edge device to a remote collector:
//!
//! - **config**: Environment-based configuration for the relay
//! - **sample**: Sample records, stamping, and the payload checksum
//! - **source**: Instrument sources and the sampling task
//! - **queue**: Bounded most-recent-biased outgoing queue
//! - **transport**: HTTP submit exchange with the collector
//! - **ledger**: Outcome classification and retry policy
//! - **relay**: The relay loop state machine
//!
//! # Example
//!
//! ```no_run
//! use edge_relay::config::Config;
//! use edge_relay::queue::OutgoingQueue;
//! use edge_relay::relay::{RelayLoop, RelaySettings};
//! use edge_relay::source::{sampler_task, SimulatedSource};
//! use edge_relay::transport::HttpTransport;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Load configuration from environment
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     // Build the HTTP transport
//!     let transport = HttpTransport::new(&config).expect("Failed to build transport");
//!
//!     // Shared queue and cancellation signal
//!     let (producer, queue) = OutgoingQueue::new();
//!     let cancel = CancellationToken::new();
//!
//!     // Sampling task: read, stamp, enqueue
//!     let sampler = {
//!         let producer = producer.clone();
//!         let device_id = config.device_id.clone();
//!         let cancel = cancel.clone();
//!         tokio::task::spawn_blocking(move || {
//!             sampler_task(SimulatedSource::with_defaults(), producer, device_id, cancel)
//!         })
//!     };
//!
//!     // Relay loop: returns only on termination
//!     let relay = RelayLoop::new(
//!         queue,
//!         producer,
//!         transport,
//!         RelaySettings::from(&config),
//!         cancel,
//!         None,
//!     );
//!     let report = relay.run().await;
//!     let _ = sampler.await;
//!     println!("stopped after {} iterations", report.iterations);
//! }
//! ```

// Module declarations
pub mod config;
pub mod ledger;
pub mod queue;
pub mod relay;
pub mod sample;
pub mod source;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use config::{Config, ConfigError};
pub use ledger::{classify, Classification, ErrorLedger, PassSummary, RetryPolicy};
pub use queue::{OutgoingQueue, QueueProducer};
pub use relay::{RelayLoop, RelayReport, RelaySettings, StopCause};
pub use sample::{payload_checksum, Sample};
pub use source::{sampler_task, LineSource, SampleSource, SimulatedSource, SourceError};
pub use transport::{HttpTransport, Outcome, SubmitAck, Transport, TransportError};
