//! Envelope transport for finished spans.
//!
//! [`SentryEnvelopeExporter`] implements the OpenTelemetry [`SpanExporter`]
//! trait: each export batch is converted into transaction events, run through
//! the composed [`BeforeSend`] hook, and posted as a single envelope to the
//! DSN's ingest endpoint.
//!
//! A missing or unparseable DSN disables the transport entirely — export
//! becomes a successful no-op so a worker without credentials keeps running.
//!
//! The HTTP client is `reqwest::blocking`: exports are driven synchronously
//! from `force_flush`, which callers run off the async runtime.

use crate::constants::{defaults, env_vars};
use crate::envelope::{build_transaction_events, serialize_envelope};
use crate::filter::{default_before_send, BeforeSend};
use bon::bon;
use chrono::Utc;
use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use opentelemetry_sdk::trace::{SpanData, SpanExporter};
use reqwest::header::CONTENT_TYPE;
use std::env;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const ENVELOPE_CONTENT_TYPE: &str = "application/x-sentry-envelope";

/// Failure to interpret a DSN string.
#[derive(Debug, Error)]
pub enum DsnError {
    #[error("invalid DSN url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported DSN scheme: {0}")]
    UnsupportedScheme(String),
    #[error("DSN is missing a public key")]
    MissingPublicKey,
    #[error("DSN is missing a host")]
    MissingHost,
    #[error("DSN is missing a project id")]
    MissingProjectId,
}

/// A parsed DSN: `{scheme}://{public_key}@{host}/{project_id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dsn {
    scheme: String,
    public_key: String,
    host: String,
    port: Option<u16>,
    project_id: String,
}

impl Dsn {
    /// The ingest endpoint envelopes are posted to.
    pub fn envelope_url(&self) -> String {
        let mut authority = self.host.clone();
        if let Some(port) = self.port {
            authority.push_str(&format!(":{port}"));
        }
        format!(
            "{}://{}/api/{}/envelope/",
            self.scheme, authority, self.project_id
        )
    }

    /// The `X-Sentry-Auth` header value for this DSN.
    pub fn auth_header(&self) -> String {
        format!(
            "Sentry sentry_version=7, sentry_client={}/{}, sentry_key={}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            self.public_key
        )
    }
}

impl FromStr for Dsn {
    type Err = DsnError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(raw)?;
        let scheme = url.scheme().to_owned();
        if scheme != "http" && scheme != "https" {
            return Err(DsnError::UnsupportedScheme(scheme));
        }
        let public_key = url.username().to_owned();
        if public_key.is_empty() {
            return Err(DsnError::MissingPublicKey);
        }
        let host = url
            .host_str()
            .map(str::to_owned)
            .ok_or(DsnError::MissingHost)?;
        let project_id = url
            .path()
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .map(str::to_owned)
            .ok_or(DsnError::MissingProjectId)?;

        Ok(Self {
            scheme,
            public_key,
            host,
            port: url.port(),
            project_id,
        })
    }
}

#[derive(Debug)]
struct Transport {
    client: reqwest::blocking::Client,
    endpoint: String,
    auth: String,
}

impl Transport {
    fn new(dsn: &Dsn) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(defaults::TRANSPORT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            endpoint: dsn.envelope_url(),
            auth: dsn.auth_header(),
        })
    }
}

/// Exports finished spans as Sentry envelopes.
pub struct SentryEnvelopeExporter {
    transport: Option<Transport>,
    before_send: BeforeSend,
    environment: String,
}

#[bon]
impl SentryEnvelopeExporter {
    /// Create an exporter.
    ///
    /// `dsn` falls back to `SENTRY_DSN`, `environment` to `SENTRY_ENVIRONMENT`.
    /// Without a usable DSN the exporter is disabled and exports succeed
    /// without sending anything.
    #[builder]
    pub fn new(
        dsn: Option<String>,
        environment: Option<String>,
        before_send: Option<BeforeSend>,
    ) -> Self {
        let environment = environment
            .or_else(|| env::var(env_vars::ENVIRONMENT).ok())
            .unwrap_or_else(|| defaults::ENVIRONMENT.to_owned());
        let dsn = dsn
            .or_else(|| env::var(env_vars::DSN).ok())
            .filter(|raw| !raw.trim().is_empty());

        let transport = dsn.and_then(|raw| match raw.parse::<Dsn>() {
            // The blocking client must not be created on an async runtime
            // thread, so construction happens on a short-lived helper thread.
            Ok(parsed) => match std::thread::spawn(move || Transport::new(&parsed)).join() {
                Ok(Ok(transport)) => Some(transport),
                Ok(Err(error)) => {
                    tracing::warn!(%error, "failed to build envelope transport, telemetry disabled");
                    None
                }
                Err(_) => {
                    tracing::warn!("envelope transport construction panicked, telemetry disabled");
                    None
                }
            },
            Err(error) => {
                tracing::warn!(%error, "invalid DSN, telemetry disabled");
                None
            }
        });
        if transport.is_none() {
            tracing::info!("no usable DSN configured, span export is a no-op");
        }

        Self {
            transport,
            before_send: before_send.unwrap_or_else(default_before_send),
            environment,
        }
    }

    /// Whether a transport is configured.
    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    fn export_batch(&self, batch: Vec<SpanData>) -> OTelSdkResult {
        let Some(transport) = &self.transport else {
            tracing::debug!(spans = batch.len(), "telemetry disabled, dropping spans");
            return Ok(());
        };

        let events: Vec<_> = build_transaction_events(&batch, &self.environment)
            .into_iter()
            .map(|event| (self.before_send)(event))
            .collect();
        if events.is_empty() {
            return Ok(());
        }

        let body = serialize_envelope(&events, Utc::now());
        let response = transport
            .client
            .post(&transport.endpoint)
            .header("X-Sentry-Auth", &transport.auth)
            .header(CONTENT_TYPE, ENVELOPE_CONTENT_TYPE)
            .body(body)
            .send()
            .map_err(|e| OTelSdkError::InternalFailure(format!("envelope send failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OTelSdkError::InternalFailure(format!(
                "ingest endpoint returned status {status}"
            )));
        }
        tracing::debug!(events = events.len(), "envelope delivered");
        Ok(())
    }
}

impl fmt::Debug for SentryEnvelopeExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SentryEnvelopeExporter")
            .field("transport", &self.transport)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

impl SpanExporter for SentryEnvelopeExporter {
    fn export(
        &self,
        batch: Vec<SpanData>,
    ) -> Pin<Box<dyn Future<Output = OTelSdkResult> + Send>> {
        let result = self.export_batch(batch);
        Box::pin(std::future::ready(result))
    }

    fn shutdown(&mut self) -> OTelSdkResult {
        Ok(())
    }
}
