//! Blocking receive calls against the external queue service.
//!
//! One poll is one `POST {queueApiUrl}/queue/receive` with a short timeout.
//! A non-success status is "no messages this cycle" — logged, never escalated.
//! Transport-level faults (refused connection, timeout, DNS) surface as
//! [`PollError`] so the worker loop can apply its longer backoff. The poller
//! itself never retries.

use crate::config::WorkerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One delivery from the queue service. Immutable after receipt.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(rename = "MessageId")]
    pub id: String,

    /// Task-type label; downstream defaults to `"unknown"` when absent.
    #[serde(rename = "taskType", default)]
    pub task_type: Option<String>,

    /// Trace continuation header from the upstream caller.
    #[serde(rename = "sentryTrace", default)]
    pub sentry_trace: Option<String>,

    /// Opaque propagation metadata, forwarded but never interpreted.
    #[serde(default)]
    pub baggage: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReceiveRequest<'a> {
    #[serde(rename = "queueName")]
    queue_name: &'a str,
    #[serde(rename = "maxMessages")]
    max_messages: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ReceiveResponse {
    #[serde(default)]
    messages: Vec<Message>,
}

/// Transport-level poll failure; the caller treats it as transient.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("queue transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Issues receive calls against the queue endpoint.
pub struct QueuePoller {
    client: reqwest::Client,
    endpoint: String,
    queue_name: String,
    max_messages: u32,
}

impl QueuePoller {
    pub fn new(config: &WorkerConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.receive_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/queue/receive",
                config.queue_api_url.trim_end_matches('/')
            ),
            queue_name: config.queue_name.clone(),
            max_messages: config.max_messages,
        })
    }

    /// One blocking receive call. Returns zero or more messages.
    pub async fn poll(&self) -> Result<Vec<Message>, PollError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ReceiveRequest {
                queue_name: &self.queue_name,
                max_messages: self.max_messages,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%status, "queue service returned non-success status");
            return Ok(Vec::new());
        }

        let body: ReceiveResponse = response.json().await?;
        Ok(body.messages)
    }
}
