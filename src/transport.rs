//! HTTP transport for submitting samples to the remote collector.
//!
//! One [`Transport::send`] call is exactly one network round trip. The
//! transport never raises past its own boundary: connection failures,
//! timeouts, and malformed responses all come back as an [`Outcome`] with a
//! null status and a diagnostic detail. Retry policy lives in the relay
//! loop, not here.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::sample::Sample;

/// Result of one submit exchange with the collector.
///
/// `status` is the HTTP status code when the peer responded at all, `None`
/// for connection-level failures, timeouts, and unparseable responses.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// HTTP status code, or `None` when no well-formed response arrived
    pub status: Option<u16>,

    /// Diagnostic detail: server reason or local error description
    pub detail: String,

    /// Pending remote task carried on a successful response; opaque here
    pub task: Option<Value>,

    /// The sample this outcome belongs to, kept for retry policy
    pub sample: Option<Sample>,
}

impl Outcome {
    /// Outcome for an exchange that produced no usable response.
    pub fn no_response(detail: impl Into<String>, sample: Sample) -> Self {
        Self {
            status: None,
            detail: detail.into(),
            task: None,
            sample: Some(sample),
        }
    }

    /// Outcome for a response with the given status code.
    pub fn with_status(
        status: u16,
        detail: impl Into<String>,
        task: Option<Value>,
        sample: Sample,
    ) -> Self {
        Self {
            status: Some(status),
            detail: detail.into(),
            task,
            sample: Some(sample),
        }
    }
}

/// Body of a successful submit response.
///
/// The collector acknowledges the sample and may attach a pending task for
/// this device. The task's shape is not modeled here; whatever executes
/// tasks receives it verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitAck {
    /// Status message from the collector
    #[serde(default)]
    pub status: String,

    /// Pending task matched to this device, if any
    #[serde(default)]
    pub task: Option<Value>,
}

/// A blocking request/response exchange posting one sample.
///
/// Implemented by [`HttpTransport`] in production and by scripted stand-ins
/// in tests.
pub trait Transport {
    /// Post one sample; exactly one round trip, no internal retry.
    fn send(&self, sample: Sample) -> impl std::future::Future<Output = Outcome> + Send;
}

/// Errors that can occur while constructing the transport.
#[derive(Debug)]
pub struct TransportError {
    pub message: String,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Transport configuration error: {}", self.message)
    }
}

impl std::error::Error for TransportError {}

/// HTTP transport backed by a pooled reqwest client.
pub struct HttpTransport {
    /// The underlying HTTP client (reused for connection pooling)
    client: Client,

    /// URL of the sample submit endpoint
    submit_url: String,
}

impl HttpTransport {
    /// Build the transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        Self::with_settings(config.submit_url.clone(), config.request_timeout)
    }

    /// Build the transport with explicit settings, for tests and embedders.
    pub fn with_settings(
        submit_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TransportError {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            submit_url: submit_url.into(),
        })
    }

    /// The configured submit endpoint.
    pub fn submit_url(&self) -> &str {
        &self.submit_url
    }
}

impl Transport for HttpTransport {
    async fn send(&self, sample: Sample) -> Outcome {
        debug!(
            url = %self.submit_url,
            payload_len = sample.payload_len(),
            "Submitting sample"
        );

        let response = match self
            .client
            .post(&self.submit_url)
            .json(&sample)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let detail = if e.is_timeout() {
                    "request timed out".to_string()
                } else if e.is_connect() {
                    format!("connection failed: {}", e)
                } else {
                    format!("request failed: {}", e)
                };
                return Outcome::no_response(detail, sample);
            }
        };

        let status = response.status();

        if status.is_success() {
            match response.json::<SubmitAck>().await {
                Ok(ack) => Outcome::with_status(status.as_u16(), ack.status, ack.task, sample),
                Err(e) => {
                    Outcome::no_response(format!("malformed response body: {}", e), sample)
                }
            }
        } else {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown").to_string());
            Outcome::with_status(status.as_u16(), detail, None, sample)
        }
    }
}
