//! The polling loop: receive, dispatch, wait, repeat.
//!
//! One message is processed at a time, start to finish, before the next poll.
//! A processing fault is captured and logged in isolation — it never aborts
//! the loop or affects subsequent messages. The loop only terminates on an
//! interrupt signal, between iterations, without cancelling in-flight work.

use crate::config::WorkerConfig;
use crate::handler::process_message;
use crate::poller::QueuePoller;
use opentelemetry_sdk::trace::Tracer;
use sentry_otel_lite::TelemetryHandle;

/// Outcome of one poll-and-dispatch iteration.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    /// Poll succeeded but returned no messages.
    Idle,
    /// Poll succeeded; this many messages completed processing.
    Processed(usize),
    /// Transport-level poll failure; the loop backs off longer.
    PollFailed,
}

pub struct WorkerLoop {
    poller: QueuePoller,
    tracer: Tracer,
    handle: TelemetryHandle,
    config: WorkerConfig,
}

impl WorkerLoop {
    pub fn new(
        poller: QueuePoller,
        tracer: Tracer,
        handle: TelemetryHandle,
        config: WorkerConfig,
    ) -> Self {
        Self {
            poller,
            tracer,
            handle,
            config,
        }
    }

    /// Run until interrupted. No terminal state under normal operation.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(
            queue = %self.config.queue_name,
            "worker started, polling for messages"
        );

        let interrupt = tokio::signal::ctrl_c();
        tokio::pin!(interrupt);

        loop {
            let wait = match self.tick().await {
                TickOutcome::PollFailed => self.config.error_backoff,
                TickOutcome::Idle | TickOutcome::Processed(_) => self.config.poll_interval,
            };

            tokio::select! {
                _ = &mut interrupt => {
                    tracing::info!("interrupt received, shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// One iteration: poll once, process every returned message in order.
    pub(crate) async fn tick(&self) -> TickOutcome {
        let messages = match self.poller.poll().await {
            Ok(messages) => messages,
            Err(error) => {
                tracing::warn!(%error, "error polling queue");
                return TickOutcome::PollFailed;
            }
        };

        if messages.is_empty() {
            return TickOutcome::Idle;
        }

        let mut completed = 0;
        for message in &messages {
            match process_message(&self.tracer, &self.handle, &self.config, message).await {
                Ok(result) => {
                    completed += 1;
                    tracing::info!(
                        message_id = %message.id,
                        result = %serde_json::to_string(&result).unwrap_or_default(),
                        "message processed"
                    );
                }
                // Already recorded on the span as an exception; isolation
                // means the loop just moves on to the next message.
                Err(error) => {
                    tracing::error!(
                        message_id = %message.id,
                        error = %format!("{error:#}"),
                        "error processing message"
                    );
                }
            }
        }
        TickOutcome::Processed(completed)
    }
}
