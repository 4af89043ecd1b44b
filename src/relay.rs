//! The relay loop: cadenced transmission of the freshest queued sample.
//!
//! The loop is a two-state machine, RUNNING and STOPPED, with no way back:
//! once stopped, resuming means constructing a new instance. Each iteration
//! trims the queue, transmits the newest sample, classifies accumulated
//! outcomes, forwards any pending remote task outward, and emits a one-line
//! summary. The loop stops on cancellation, or when the unclassified-outcome
//! count reaches the configured error budget.
//!
//! Failure iterations (no response, or a 5xx from the collector) apply a
//! capped exponential backoff with jitter on top of the regular cadence.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::ledger::{ErrorLedger, RetryPolicy};
use crate::queue::{OutgoingQueue, QueueProducer};
use crate::transport::Transport;

/// Base delay for failure backoff (in milliseconds).
const DEFAULT_BACKOFF_BASE_MS: u64 = 500;

/// Maximum backoff delay (in milliseconds).
const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Why the relay loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// External stop signal, or instrument failure signalled through the
    /// shared cancellation token
    Cancelled,

    /// Unclassified outcomes reached the configured error budget
    ErrorBudgetExhausted,
}

/// Terminal report returned to the caller once the loop has stopped.
#[derive(Debug)]
pub struct RelayReport {
    /// Iterations executed, including empty-queue no-ops
    pub iterations: u64,

    /// Samples handed to the transport
    pub sent: u64,

    /// Why the loop stopped
    pub stop_cause: StopCause,

    /// Ledger contents at stop time, for diagnostics
    pub remaining_errors: Vec<(Option<u16>, String)>,
}

/// Tunables for the relay loop, normally derived from [`Config`].
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub queue_limit: usize,
    pub error_limit: Option<usize>,
    pub send_interval: Duration,
    pub retry_policy: RetryPolicy,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            queue_limit: 16,
            error_limit: Some(8),
            send_interval: Duration::from_millis(1_000),
            retry_policy: RetryPolicy::default(),
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
        }
    }
}

impl From<&Config> for RelaySettings {
    fn from(config: &Config) -> Self {
        Self {
            queue_limit: config.queue_limit,
            error_limit: config.error_limit,
            send_interval: config.send_interval,
            retry_policy: RetryPolicy {
                retry_server_errors: config.retry_server_errors,
            },
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
        }
    }
}

/// Orchestrator for the transmission side of the relay.
///
/// Owns the consumer end of the outgoing queue and the error ledger,
/// drives transmission cadence, applies error policy, and forwards pending
/// remote tasks through the task channel. The sampling task only ever
/// touches the producer handle.
pub struct RelayLoop<T: Transport> {
    queue: OutgoingQueue,
    requeue: QueueProducer,
    transport: T,
    ledger: ErrorLedger,
    settings: RelaySettings,
    cancel: CancellationToken,
    task_tx: Option<mpsc::Sender<Value>>,
}

impl<T: Transport> RelayLoop<T> {
    /// Assemble a relay loop.
    ///
    /// `requeue` must be a producer handle of `queue`; it is used to put
    /// samples back when the retry policy asks for it.
    pub fn new(
        queue: OutgoingQueue,
        requeue: QueueProducer,
        transport: T,
        settings: RelaySettings,
        cancel: CancellationToken,
        task_tx: Option<mpsc::Sender<Value>>,
    ) -> Self {
        Self {
            queue,
            requeue,
            transport,
            ledger: ErrorLedger::new(),
            settings,
            cancel,
            task_tx,
        }
    }

    /// Run until stopped. Returns only on termination; the terminal ledger
    /// contents ride along in the report.
    pub async fn run(mut self) -> RelayReport {
        let mut ticker = interval(self.settings.send_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let cancel = self.cancel.clone();
        let mut iterations: u64 = 0;
        let mut sent: u64 = 0;
        let mut consecutive_failures: u32 = 0;

        let stop_cause = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Relay loop cancelled");
                    break StopCause::Cancelled;
                }

                _ = ticker.tick() => {
                    iterations += 1;

                    // Steps 1-2: trim, take the newest sample, send it.
                    let depth = self.queue.len();
                    let mut outcome_label = "idle".to_string();
                    let mut payload_len = 0;

                    if depth > 0 {
                        self.queue.trim(self.settings.queue_limit);
                        if let Some(sample) = self.queue.take_newest() {
                            payload_len = sample.payload_len();
                            let outcome = self.transport.send(sample).await;
                            sent += 1;
                            outcome_label = match outcome.status {
                                Some(code) => code.to_string(),
                                None => "no-response".to_string(),
                            };
                            self.ledger.record(outcome);
                        }
                    }

                    // Step 3: classify and resolve accumulated outcomes.
                    let summary = self.ledger.classify_pass(self.settings.retry_policy);
                    for sample in summary.requeue {
                        self.requeue.enqueue(sample);
                    }
                    for task in summary.tasks {
                        self.forward_task(task);
                    }

                    // Step 4: one-line progress summary.
                    info!(
                        queue_depth = depth,
                        outcome = %outcome_label,
                        payload_len = payload_len,
                        retained_errors = summary.retained,
                        "Relay iteration"
                    );

                    // Fatal check: the budget counts unclassified outcomes.
                    if let Some(limit) = self.settings.error_limit {
                        if summary.retained >= limit {
                            warn!(
                                retained = summary.retained,
                                limit = limit,
                                "Error budget exhausted"
                            );
                            break StopCause::ErrorBudgetExhausted;
                        }
                    }

                    // Backoff after failure iterations; cadence otherwise.
                    if summary.saw_failure {
                        consecutive_failures += 1;
                        let delay = backoff_delay(
                            consecutive_failures,
                            self.settings.backoff_base,
                            self.settings.backoff_max,
                        );
                        warn!(
                            consecutive_failures = consecutive_failures,
                            delay_ms = delay.as_millis() as u64,
                            "Backing off after failed exchange"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => break StopCause::Cancelled,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    } else {
                        consecutive_failures = 0;
                    }
                }
            }
        };

        // A fatal stop takes the sampling task down with the relay.
        if stop_cause == StopCause::ErrorBudgetExhausted {
            cancel.cancel();
        }

        RelayReport {
            iterations,
            sent,
            stop_cause,
            remaining_errors: self.ledger.drain_remaining(),
        }
    }

    /// Hand a pending remote task to whoever executes tasks. The relay
    /// never blocks on the task channel; a full or closed channel drops
    /// the task with a warning.
    fn forward_task(&self, task: Value) {
        match &self.task_tx {
            Some(tx) => {
                if let Err(e) = tx.try_send(task) {
                    warn!(error = %e, "Dropping remote task: channel unavailable");
                }
            }
            None => {
                info!("Remote task received but no executor is attached; dropping");
            }
        }
    }
}

/// Exponential backoff with jitter: `base * 2^(attempt-1) + jitter`,
/// capped at `max`.
fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let exponential = base_ms.saturating_mul(1 << (attempt.saturating_sub(1)).min(10));
    let jitter = rand::random::<u64>() % (exponential / 4 + 1);
    let total = exponential
        .saturating_add(jitter)
        .min(max.as_millis() as u64);
    Duration::from_millis(total)
}
