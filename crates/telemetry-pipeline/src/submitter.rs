//! Network submission of serialized batches.

use crate::PipelineResult;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use telemetry_database::{Batch, Stream};
use tracing::debug;
use url::Url;

/// Header carrying the project token.
pub const TOKEN_HEADER: &str = "X-Telemetry-Token";

/// Result of a single submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The endpoint took the batch; its records can be deleted.
    Accepted,
    /// The batch can never be delivered (malformed data, revoked token).
    RejectedPermanently(String),
    /// Worth retrying later (network down, server overloaded, timeout).
    TransientFailure(String),
}

/// Collaborator that delivers one batch.
///
/// Called from the worker task only. Implementations must not retry
/// internally; the flush protocol owns retry and backoff.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, stream: Stream, body: &str, token: &str) -> SubmitOutcome;
}

/// Serialize a batch as a JSON array of its stored payloads, in order.
///
/// Payloads are stored already serialized and are spliced in verbatim.
pub fn serialize_batch(batch: &Batch) -> String {
    let mut body = String::with_capacity(batch.payload_bytes() + batch.len() + 2);
    body.push('[');
    for (i, record) in batch.records.iter().enumerate() {
        if i > 0 {
            body.push(',');
        }
        body.push_str(&record.data);
    }
    body.push(']');
    body
}

/// Path segment each stream is posted to.
pub fn stream_path(stream: Stream) -> &'static str {
    match stream {
        Stream::Events => "track",
        Stream::People => "engage",
        Stream::Groups => "groups",
    }
}

/// Map an HTTP status to a submission outcome.
pub fn classify_status(status: StatusCode) -> SubmitOutcome {
    if status.is_success() {
        SubmitOutcome::Accepted
    } else if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        SubmitOutcome::TransientFailure(format!("HTTP {}", status))
    } else {
        SubmitOutcome::RejectedPermanently(format!("HTTP {}", status))
    }
}

/// Submitter posting batches to an HTTP ingestion endpoint.
#[derive(Clone)]
pub struct HttpSubmitter {
    client: Client,
    endpoint: Url,
}

impl HttpSubmitter {
    /// Create a submitter for `endpoint`. `timeout` bounds each request.
    pub fn new(endpoint: Url, timeout: Duration) -> PipelineResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    /// Full URL for a stream, e.g. `https://host/api/track`.
    pub fn url_for(&self, stream: Stream) -> Option<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .push(stream_path(stream));
        Some(url)
    }
}

#[async_trait]
impl Submitter for HttpSubmitter {
    async fn submit(&self, stream: Stream, body: &str, token: &str) -> SubmitOutcome {
        let Some(url) = self.url_for(stream) else {
            return SubmitOutcome::RejectedPermanently(format!(
                "endpoint {} cannot take a path",
                self.endpoint
            ));
        };

        debug!(url = %url, stream = %stream, bytes = body.len(), "Submitting batch");

        let response = self
            .client
            .post(url)
            .header(TOKEN_HEADER, token)
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                match classify_status(status) {
                    SubmitOutcome::Accepted => SubmitOutcome::Accepted,
                    SubmitOutcome::RejectedPermanently(reason) => {
                        let detail = response.text().await.unwrap_or_default();
                        SubmitOutcome::RejectedPermanently(join_detail(reason, &detail))
                    }
                    transient => transient,
                }
            }
            // Connect errors, resets and timeouts all leave the batch intact.
            Err(e) => SubmitOutcome::TransientFailure(e.to_string()),
        }
    }
}

fn join_detail(reason: String, detail: &str) -> String {
    let detail = detail.trim();
    if detail.is_empty() {
        reason
    } else {
        format!("{}: {}", reason, detail)
    }
}
