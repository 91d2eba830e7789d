//! TCP transport for socket-speaking terminals.
//!
//! ```text
//! TcpTransport::send_command
//!     │
//!     └─> TcpClient ───(TCP)───> device
//!            │
//!            └─> FrameCodec (framing from the command)
//! ```
//!
//! Each command opens a short-lived connection: connect, write, read one
//! frame, close. Every step is bounded by the configured timeout, and a
//! timeout is reported as a failed result.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use devgate_core::constants::DEFAULT_TCP_TIMEOUT_MS;
use devgate_protocol::{FrameCodec, Framing};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::adapter::{TCP_PRIORITY, TransportAdapter, TransportKind};
use crate::error::{Result, TransportError};
use crate::types::{CommandResult, DataResult, DeviceCommand, DeviceEndpoint, Endpoint, TransportResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpTransportConfig {
    /// Timeout for each of connect, write and read.
    pub timeout_ms: u64,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TCP_TIMEOUT_MS,
        }
    }
}

/// Framed TCP connection to one device.
pub struct TcpClient {
    addr: SocketAddr,
    framed: Option<Framed<TcpStream, FrameCodec>>,
    timeout: Duration,
}

impl TcpClient {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self {
            addr,
            framed: None,
            timeout,
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    pub async fn connect(&mut self, framing: Framing) -> Result<()> {
        debug!(addr = %self.addr, "Connecting to device");

        let stream = match tokio::time::timeout(self.timeout, TcpStream::connect(self.addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!(addr = %self.addr, error = %e, "Connection failed");
                return Err(e.into());
            }
            Err(_) => {
                warn!(addr = %self.addr, timeout_ms = self.timeout_ms(), "Connection timeout");
                return Err(TransportError::ConnectionTimeout(self.timeout_ms()));
            }
        };

        // Small request/response frames; do not wait for Nagle coalescing.
        if let Err(e) = stream.set_nodelay(true) {
            warn!(addr = %self.addr, error = %e, "Failed to set TCP_NODELAY");
        }

        self.framed = Some(Framed::new(stream, FrameCodec::new(framing)));
        Ok(())
    }

    pub async fn send(&mut self, payload: Bytes) -> Result<()> {
        let timeout_ms = self.timeout_ms();
        let framed = self.framed.as_mut().ok_or(TransportError::NotConnected)?;
        trace!(bytes = payload.len(), "Sending frame");

        match tokio::time::timeout(self.timeout, framed.send(payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(TransportError::WriteTimeout(timeout_ms)),
        }
    }

    pub async fn recv(&mut self) -> Result<Bytes> {
        let timeout_ms = self.timeout_ms();
        let framed = self.framed.as_mut().ok_or(TransportError::NotConnected)?;

        match tokio::time::timeout(self.timeout, framed.next()).await {
            Ok(Some(Ok(frame))) => {
                trace!(bytes = frame.len(), "Received frame");
                Ok(frame)
            }
            Ok(Some(Err(e))) => Err(e.into()),
            Ok(None) => Err(TransportError::ConnectionLost(
                "device closed connection".to_string(),
            )),
            Err(_) => Err(TransportError::ReadTimeout(timeout_ms)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    /// Flush and shut down; idempotent.
    pub async fn close(&mut self) {
        if let Some(mut framed) = self.framed.take() {
            let grace = Duration::from_millis(500);
            if let Ok(Err(e)) = tokio::time::timeout(grace, framed.flush()).await {
                debug!(addr = %self.addr, error = %e, "Flush failed during close");
            }
            let mut stream = framed.into_inner();
            if let Ok(Err(e)) = tokio::time::timeout(grace, stream.shutdown()).await {
                debug!(addr = %self.addr, error = %e, "Shutdown failed during close");
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    config: TcpTransportConfig,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Self {
        Self { config }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    async fn exchange(&self, addr: SocketAddr, command: &DeviceCommand) -> Result<Option<Bytes>> {
        let mut client = TcpClient::new(addr, self.timeout());
        client.connect(command.framing).await?;
        let outcome = async {
            client.send(command.payload.clone()).await?;
            if command.expect_reply {
                client.recv().await.map(Some)
            } else {
                Ok(None)
            }
        }
        .await;
        client.close().await;
        outcome
    }
}

impl TransportAdapter for TcpTransport {
    fn protocol_type(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn priority(&self) -> u8 {
        TCP_PRIORITY
    }

    fn supports(&self, endpoint: &Endpoint) -> bool {
        matches!(endpoint, Endpoint::Tcp { .. })
    }

    async fn send_command(
        &self,
        device: &DeviceEndpoint,
        command: &DeviceCommand,
    ) -> CommandResult {
        let started = Instant::now();
        let Endpoint::Tcp { addr } = &device.endpoint else {
            let err = TransportError::UnsupportedEndpoint(device.endpoint.to_string());
            return TransportResult::failed(&err, started.elapsed());
        };

        let outcome = self.exchange(*addr, command).await;
        if let Err(e) = &outcome {
            warn!(
                device = %device.device_id,
                addr = %addr,
                command = %command.name,
                error = %e,
                "TCP command failed"
            );
        }
        TransportResult::from_outcome(outcome, started.elapsed())
    }

    async fn receive_data(&self, _device: &DeviceEndpoint, raw: &[u8]) -> DataResult {
        let started = Instant::now();
        if raw.is_empty() {
            let err = TransportError::frame("empty payload");
            return TransportResult::failed(&err, started.elapsed());
        }
        TransportResult::ok(
            format!("{} bytes received", raw.len()),
            Some(Bytes::copy_from_slice(raw)),
            started.elapsed(),
        )
    }
}
