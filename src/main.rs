//! Edge Relay - telemetry forwarding daemon for edge devices
//!
//! This service reads samples from a local instrument, keeps the freshest
//! readings in a bounded queue, and relays them one at a time to a remote
//! collector over HTTP. The collector's response may carry a pending task
//! for this device, which is handed to the task consumer.
//!
//! ## Features
//!
//! - Independent sampling and relay tasks sharing a bounded queue
//! - Freshness-first transmission (newest sample sent, oldest evicted)
//! - Outcome classification with a fatal budget for unrecognized statuses
//! - Graceful shutdown on SIGINT via a shared cancellation token
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `RELAY_COLLECTOR_URL`: Collector base URL (default: http://localhost:8000)
//! - `RELAY_DEVICE_ID`: Device identifier (default: edge-000)
//! - `RELAY_QUEUE_LIMIT`: Max buffered samples (default: 16)
//! - `RELAY_ERROR_LIMIT`: Unclassified-outcome budget, 0 = unbounded (default: 8)
//! - `RELAY_SEND_INTERVAL_MS`: Relay cadence (default: 1000)
//! - `RELAY_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 10)
//! - `RELAY_RETRY_SERVER_ERRORS`: Re-enqueue samples behind 5xx (default: true)
//! - `RELAY_SOURCE`: `sim` (default) or `stdin` for JSON lines on stdin
//! - `RUST_LOG`: Logging level filter (default: info)

use std::io::BufReader;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use edge_relay::config::Config;
use edge_relay::queue::OutgoingQueue;
use edge_relay::relay::{RelayLoop, RelaySettings, StopCause};
use edge_relay::source::{sampler_task, LineSource, SimulatedSource};
use edge_relay::transport::HttpTransport;

/// Capacity of the channel carrying pending remote tasks
const TASK_CHANNEL_CAPACITY: usize = 16;

/// How long to wait for the sampling task on shutdown
const SAMPLER_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    info!("Starting Edge Relay...");

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                collector_url = %config.collector_url,
                device_id = %config.device_id,
                queue_limit = config.queue_limit,
                error_limit = ?config.error_limit,
                send_interval_ms = config.send_interval.as_millis() as u64,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    // Build the HTTP transport
    let transport = match HttpTransport::new(&config) {
        Ok(transport) => {
            info!(submit_url = %transport.submit_url(), "HTTP transport initialized");
            transport
        }
        Err(e) => {
            error!(error = %e, "Failed to build HTTP transport");
            std::process::exit(1);
        }
    };

    // Shared queue and cancellation signal for both tasks
    let (producer, queue) = OutgoingQueue::new();
    let cancel = CancellationToken::new();

    // Spawn the sampling task on a blocking thread; sources block on reads
    let source_kind = std::env::var("RELAY_SOURCE").unwrap_or_else(|_| "sim".to_string());
    let sampler_handle = {
        let producer = producer.clone();
        let device_id = config.device_id.clone();
        let cancel = cancel.clone();
        match source_kind.as_str() {
            "stdin" => {
                info!("Sampling from stdin (JSON lines)");
                tokio::task::spawn_blocking(move || {
                    sampler_task(
                        LineSource::new(BufReader::new(std::io::stdin())),
                        producer,
                        device_id,
                        cancel,
                    )
                })
            }
            _ => {
                info!("Sampling from simulated instrument");
                tokio::task::spawn_blocking(move || {
                    sampler_task(SimulatedSource::with_defaults(), producer, device_id, cancel)
                })
            }
        }
    };

    // Consume pending remote tasks; executing them belongs to whatever
    // embeds the relay, so the daemon just surfaces them.
    let (task_tx, mut task_rx) = mpsc::channel(TASK_CHANNEL_CAPACITY);
    let task_handle = tokio::spawn(async move {
        while let Some(task) = task_rx.recv().await {
            info!(task = %task, "Remote task received");
        }
    });

    // Run the relay loop; it returns only on termination
    let relay = RelayLoop::new(
        queue,
        producer,
        transport,
        RelaySettings::from(&config),
        cancel.clone(),
        Some(task_tx),
    );
    let relay_handle = tokio::spawn(relay.run());

    // Wait for either an interrupt or an internal fatal stop
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Shutdown signal received, stopping..."),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
            cancel.cancel();
        }
        _ = cancel.cancelled() => {
            info!("Internal stop signalled");
        }
    }

    // Collect the terminal report
    let report = match relay_handle.await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Relay task panicked");
            std::process::exit(1);
        }
    };

    info!(
        iterations = report.iterations,
        sent = report.sent,
        stop_cause = ?report.stop_cause,
        "Relay stopped"
    );
    for (status, detail) in &report.remaining_errors {
        warn!(status = ?status, detail = %detail, "Unresolved outcome at stop");
    }

    // Give the sampling task a bounded window to observe cancellation
    let shutdown_timeout = Duration::from_secs(SAMPLER_SHUTDOWN_TIMEOUT_SECS);
    let instrument_failed = match tokio::time::timeout(shutdown_timeout, sampler_handle).await {
        Ok(Ok(Ok(()))) => false,
        Ok(Ok(Err(e))) => {
            error!(error = %e, "Sampling task stopped on instrument failure");
            true
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Sampling task panicked");
            true
        }
        Err(_) => {
            warn!(
                timeout_secs = SAMPLER_SHUTDOWN_TIMEOUT_SECS,
                "Sampling task did not stop in time; abandoning it"
            );
            false
        }
    };

    task_handle.abort();

    info!("Edge Relay stopped");

    if instrument_failed || report.stop_cause == StopCause::ErrorBudgetExhausted {
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}
