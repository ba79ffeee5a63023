//! Constants for the sentry-otel-lite package.
//!
//! This file centralizes all constants to ensure consistency across the codebase
//! and provide a single source of truth for configuration parameters.

/// Environment variable names for configuration.
pub mod env_vars {
    /// Sentry DSN for the envelope transport. Absent or empty means telemetry
    /// is a no-op.
    pub const DSN: &str = "SENTRY_DSN";

    /// Environment tag attached to every outgoing event.
    pub const ENVIRONMENT: &str = "SENTRY_ENVIRONMENT";

    /// Service name for telemetry.
    pub const SERVICE_NAME: &str = "OTEL_SERVICE_NAME";

    /// Maximum number of spans to buffer in the WorkerSpanProcessor.
    pub const SPAN_QUEUE_SIZE: &str = "WORKER_SPAN_QUEUE_SIZE";

    /// Maximum batch size for span export.
    pub const SPAN_BATCH_SIZE: &str = "WORKER_SPAN_BATCH_SIZE";
}

/// Default values for configuration parameters.
pub mod defaults {
    /// Default maximum queue size for WorkerSpanProcessor.
    pub const SPAN_QUEUE_SIZE: usize = 2048;

    /// Default maximum batch size for WorkerSpanProcessor.
    pub const SPAN_BATCH_SIZE: usize = 512;

    /// Default service name if not provided.
    pub const SERVICE_NAME: &str = "gpu-queue-worker";

    /// Default environment tag if not provided.
    pub const ENVIRONMENT: &str = "development";

    /// Timeout for the HTTP envelope transport.
    pub const TRANSPORT_TIMEOUT_SECS: u64 = 2;
}
