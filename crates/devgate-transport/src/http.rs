//! HTTP transport for terminals that accept commands as POST requests.
//!
//! A non-2xx status is a business-level failure: the result carries the status
//! and the response body so callers can see what the device objected to.

use std::time::{Duration, Instant};

use bytes::Bytes;
use devgate_core::constants::DEFAULT_HTTP_TIMEOUT_MS;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adapter::{HTTP_PRIORITY, TransportAdapter, TransportKind};
use crate::error::{Result, TransportError};
use crate::types::{CommandResult, DataResult, DeviceCommand, DeviceEndpoint, Endpoint, TransportResult};

/// Longest response body kept in a failed result.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpTransportConfig {
    pub timeout_ms: u64,
    pub content_type: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
            content_type: "application/octet-stream".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// # Errors
    /// `TransportError::Http` if the HTTP client cannot be initialized.
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn map_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::ReadTimeout(self.config.timeout_ms)
        } else if err.is_connect() {
            TransportError::ConnectionLost(err.to_string())
        } else {
            TransportError::Http(err.to_string())
        }
    }

    async fn post(&self, url: &str, payload: Bytes) -> Result<Bytes> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, self.config.content_type.as_str())
            .body(payload)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;
        debug!(url, status = status.as_u16(), bytes = body.len(), "HTTP response");

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body[..body.len().min(MAX_ERROR_BODY)]).into_owned();
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(body)
    }
}

impl TransportAdapter for HttpTransport {
    fn protocol_type(&self) -> TransportKind {
        TransportKind::Http
    }

    fn priority(&self) -> u8 {
        HTTP_PRIORITY
    }

    fn supports(&self, endpoint: &Endpoint) -> bool {
        matches!(endpoint, Endpoint::Http { .. })
    }

    async fn send_command(
        &self,
        device: &DeviceEndpoint,
        command: &DeviceCommand,
    ) -> CommandResult {
        let started = Instant::now();
        let Endpoint::Http { url } = &device.endpoint else {
            let err = TransportError::UnsupportedEndpoint(device.endpoint.to_string());
            return TransportResult::failed(&err, started.elapsed());
        };

        let outcome = self
            .post(url, command.payload.clone())
            .await
            .map(|body| command.expect_reply.then_some(body));
        if let Err(e) = &outcome {
            warn!(
                device = %device.device_id,
                url = %url,
                command = %command.name,
                error = %e,
                "HTTP command failed"
            );
        }
        TransportResult::from_outcome(outcome, started.elapsed())
    }

    async fn receive_data(&self, _device: &DeviceEndpoint, raw: &[u8]) -> DataResult {
        let started = Instant::now();
        if raw.is_empty() {
            return TransportResult::failed(&TransportError::frame("empty body"), started.elapsed());
        }
        TransportResult::ok(
            format!("{} bytes received", raw.len()),
            Some(Bytes::copy_from_slice(raw)),
            started.elapsed(),
        )
    }
}
