//! Error ledger: classification of transmission outcomes.
//!
//! The ledger is a transient in-flight record, not a durable log. The relay
//! appends the outcome of every exchange and drains the ledger on the same
//! iteration's classification pass. Outcomes in a known bucket resolve
//! immediately; unrecognized status codes are retained and accumulate toward
//! the fatal error budget. The budget therefore counts *unclassified*
//! outcomes, not all failures: a peer that responds, however negatively, is
//! never grounds for shutting the relay down.

use serde_json::Value;
use tracing::{debug, warn};

use crate::sample::Sample;
use crate::transport::Outcome;

/// Severity bucket of one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// 2xx: accepted by the collector
    Success,

    /// 4xx: the collector rejected this sample
    ClientRejection,

    /// 5xx: the collector is reachable but failing
    ServerFailure,

    /// No response at all: connection refused, timeout, malformed body
    TransportFailure,

    /// Status code outside every known bucket
    Unclassified,
}

/// Bucket a status code.
pub fn classify(status: Option<u16>) -> Classification {
    match status {
        Some(code) if (200..300).contains(&code) => Classification::Success,
        Some(code) if (400..500).contains(&code) => Classification::ClientRejection,
        Some(code) if (500..600).contains(&code) => Classification::ServerFailure,
        None => Classification::TransportFailure,
        Some(_) => Classification::Unclassified,
    }
}

/// What to do with samples that the collector failed on.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Re-enqueue the sample behind a 5xx outcome. 4xx rejections are
    /// always dropped: the peer has seen and refused this exact payload.
    pub retry_server_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_server_errors: true,
        }
    }
}

/// Result of one classification pass.
#[derive(Debug, Default)]
pub struct PassSummary {
    /// Outcomes resolved (removed from the ledger) this pass
    pub resolved: usize,

    /// Outcomes retained; equals the ledger length after the pass
    pub retained: usize,

    /// Samples to put back on the outgoing queue per the retry policy
    pub requeue: Vec<Sample>,

    /// Tasks carried on successful outcomes, to forward outward
    pub tasks: Vec<Value>,

    /// Whether any resolved outcome was a transport or server failure,
    /// which the relay answers with backoff
    pub saw_failure: bool,
}

/// Bounded record of recent transmission outcomes.
#[derive(Debug, Default)]
pub struct ErrorLedger {
    entries: Vec<Outcome>,
}

impl ErrorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one outcome for the next classification pass.
    pub fn record(&mut self, outcome: Outcome) {
        self.entries.push(outcome);
    }

    /// Number of outcomes currently held; after a pass this is the count of
    /// unclassified outcomes and the input to the fatal/continue decision.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Classify and resolve every held outcome.
    ///
    /// Known buckets resolve: successes surrender their task, server
    /// failures surrender their sample for requeue when the policy asks for
    /// it, client rejections and transport failures are logged and dropped.
    /// Unclassified outcomes stay in the ledger. Running the pass on an
    /// empty ledger is a no-op.
    pub fn classify_pass(&mut self, policy: RetryPolicy) -> PassSummary {
        let mut summary = PassSummary::default();

        self.entries.retain_mut(|outcome| {
            match classify(outcome.status) {
                Classification::Success => {
                    summary.resolved += 1;
                    if let Some(task) = outcome.task.take() {
                        summary.tasks.push(task);
                    }
                    false
                }
                Classification::ClientRejection => {
                    summary.resolved += 1;
                    warn!(
                        status = outcome.status,
                        detail = %outcome.detail,
                        "Sample rejected by collector; dropping"
                    );
                    false
                }
                Classification::ServerFailure => {
                    summary.resolved += 1;
                    summary.saw_failure = true;
                    warn!(
                        status = outcome.status,
                        detail = %outcome.detail,
                        requeue = policy.retry_server_errors,
                        "Collector failed on sample"
                    );
                    if policy.retry_server_errors {
                        if let Some(sample) = outcome.sample.take() {
                            summary.requeue.push(sample);
                        }
                    }
                    false
                }
                Classification::TransportFailure => {
                    summary.resolved += 1;
                    summary.saw_failure = true;
                    warn!(detail = %outcome.detail, "No response from collector; sample dropped");
                    false
                }
                Classification::Unclassified => {
                    debug!(
                        status = outcome.status,
                        detail = %outcome.detail,
                        "Unrecognized status retained in ledger"
                    );
                    true
                }
            }
        });

        summary.retained = self.entries.len();
        summary
    }

    /// Detail lines of everything still held, for the terminal report.
    pub fn drain_remaining(&mut self) -> Vec<(Option<u16>, String)> {
        self.entries
            .drain(..)
            .map(|o| (o.status, o.detail))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Sample {
        let mut data = serde_json::Map::new();
        data.insert("x".to_string(), json!(1));
        Sample::new(0, data)
    }

    fn outcome(status: Option<u16>) -> Outcome {
        match status {
            Some(code) => Outcome::with_status(code, "scripted", None, sample()),
            None => Outcome::no_response("scripted", sample()),
        }
    }

    #[test]
    fn test_classify_buckets() {
        assert_eq!(classify(Some(200)), Classification::Success);
        assert_eq!(classify(Some(204)), Classification::Success);
        assert_eq!(classify(Some(404)), Classification::ClientRejection);
        assert_eq!(classify(Some(500)), Classification::ServerFailure);
        assert_eq!(classify(Some(503)), Classification::ServerFailure);
        assert_eq!(classify(None), Classification::TransportFailure);
        assert_eq!(classify(Some(999)), Classification::Unclassified);
        assert_eq!(classify(Some(302)), Classification::Unclassified);
        assert_eq!(classify(Some(101)), Classification::Unclassified);
    }

    #[test]
    fn test_known_buckets_all_resolve() {
        let mut ledger = ErrorLedger::new();
        for status in [Some(200), Some(404), None, Some(500), Some(200)] {
            ledger.record(outcome(status));
            let summary = ledger.classify_pass(RetryPolicy {
                retry_server_errors: false,
            });
            assert_eq!(summary.retained, 0);
            assert!(ledger.is_empty());
        }
    }

    #[test]
    fn test_unclassified_outcomes_accumulate() {
        let mut ledger = ErrorLedger::new();
        for i in 1..=3 {
            ledger.record(outcome(Some(999)));
            let summary = ledger.classify_pass(RetryPolicy::default());
            assert_eq!(summary.retained, i);
            assert_eq!(ledger.len(), i);
        }
    }

    #[test]
    fn test_mixed_pass_retains_only_unclassified() {
        let mut ledger = ErrorLedger::new();
        ledger.record(outcome(Some(200)));
        ledger.record(outcome(Some(999)));
        ledger.record(outcome(Some(404)));
        ledger.record(outcome(None));

        let summary = ledger.classify_pass(RetryPolicy::default());

        assert_eq!(summary.resolved, 3);
        assert_eq!(summary.retained, 1);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_pass_on_empty_ledger_is_idempotent() {
        let mut ledger = ErrorLedger::new();
        for _ in 0..2 {
            let summary = ledger.classify_pass(RetryPolicy::default());
            assert_eq!(summary.resolved, 0);
            assert_eq!(summary.retained, 0);
            assert!(summary.requeue.is_empty());
            assert!(summary.tasks.is_empty());
        }
    }

    #[test]
    fn test_server_failure_requeues_sample_under_policy() {
        let mut ledger = ErrorLedger::new();
        ledger.record(outcome(Some(500)));

        let summary = ledger.classify_pass(RetryPolicy {
            retry_server_errors: true,
        });

        assert_eq!(summary.requeue.len(), 1);
        assert!(summary.saw_failure);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_server_failure_dropped_without_policy() {
        let mut ledger = ErrorLedger::new();
        ledger.record(outcome(Some(500)));

        let summary = ledger.classify_pass(RetryPolicy {
            retry_server_errors: false,
        });

        assert!(summary.requeue.is_empty());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_client_rejection_never_requeues() {
        let mut ledger = ErrorLedger::new();
        ledger.record(outcome(Some(400)));

        let summary = ledger.classify_pass(RetryPolicy {
            retry_server_errors: true,
        });

        assert!(summary.requeue.is_empty());
        assert_eq!(summary.resolved, 1);
    }

    #[test]
    fn test_success_forwards_task() {
        let mut ledger = ErrorLedger::new();
        let task = json!({"op": "pump", "seconds": 30});
        ledger.record(Outcome::with_status(200, "stored", Some(task.clone()), sample()));

        let summary = ledger.classify_pass(RetryPolicy::default());

        assert_eq!(summary.tasks, vec![task]);
        assert!(!summary.saw_failure);
    }

    #[test]
    fn test_transport_failure_resolves_without_requeue() {
        let mut ledger = ErrorLedger::new();
        ledger.record(outcome(None));

        let summary = ledger.classify_pass(RetryPolicy::default());

        assert_eq!(summary.resolved, 1);
        assert!(summary.requeue.is_empty());
        assert!(summary.saw_failure);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_drain_remaining_surfaces_retained_entries() {
        let mut ledger = ErrorLedger::new();
        ledger.record(outcome(Some(999)));
        ledger.classify_pass(RetryPolicy::default());

        let remaining = ledger.drain_remaining();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, Some(999));
        assert!(ledger.is_empty());
    }
}
