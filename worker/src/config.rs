//! Worker configuration, read once at startup.
//!
//! There are no CLI flags; everything comes from the environment with
//! defaults that match the local development queue service.

use std::env;
use std::time::Duration;

/// Environment variable names consumed by the worker.
pub mod env_vars {
    /// Base URL of the queue HTTP API.
    pub const QUEUE_API_URL: &str = "QUEUE_API_URL";

    /// Name of the queue this worker drains.
    pub const QUEUE_NAME: &str = "QUEUE_NAME";
}

const DEFAULT_QUEUE_API_URL: &str = "http://localhost:3002";
const DEFAULT_QUEUE_NAME: &str = "gpu-worker-queue";

/// Runtime configuration for the polling loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Base URL of the queue HTTP API.
    pub queue_api_url: String,
    /// Queue to receive from.
    pub queue_name: String,
    /// Messages requested per receive call.
    pub max_messages: u32,
    /// Wait between polls when the queue is idle.
    pub poll_interval: Duration,
    /// Wait after a transport-level poll failure.
    pub error_backoff: Duration,
    /// HTTP timeout for one receive call.
    pub receive_timeout: Duration,
    /// Bounded wait for the per-message telemetry flush.
    pub flush_timeout: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let queue_api_url = env::var(env_vars::QUEUE_API_URL)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_QUEUE_API_URL.to_owned());
        let queue_name = env::var(env_vars::QUEUE_NAME)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_owned());

        Self {
            queue_api_url,
            queue_name,
            max_messages: 1,
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            receive_timeout: Duration::from_secs(5),
            flush_timeout: Duration::from_secs(2),
        }
    }
}
