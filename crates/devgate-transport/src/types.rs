use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use devgate_core::DeviceId;
use devgate_protocol::Framing;

use crate::error::{FailureKind, TransportError};

/// Where a device can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { addr: SocketAddr },
    /// Unit `unit` on the RS485 bus named `bus`.
    Serial { bus: String, unit: u8 },
    Http { url: String },
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { addr } => write!(f, "tcp://{addr}"),
            Self::Serial { bus, unit } => write!(f, "rs485://{bus}/{unit}"),
            Self::Http { url } => f.write_str(url),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    pub device_id: DeviceId,
    pub endpoint: Endpoint,
}

impl DeviceEndpoint {
    pub fn new(device_id: DeviceId, endpoint: Endpoint) -> Self {
        Self {
            device_id,
            endpoint,
        }
    }
}

/// An outbound request to a device.
///
/// For TCP and HTTP the payload is sent as-is. For RS485 it is the Modbus PDU
/// (function code plus data); the transport adds unit address and CRC.
#[derive(Debug, Clone)]
pub struct DeviceCommand {
    pub name: String,
    pub payload: Bytes,
    /// How the reply is delimited on a stream transport.
    pub framing: Framing,
    pub expect_reply: bool,
}

impl DeviceCommand {
    pub fn new(name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            framing: Framing::Whole,
            expect_reply: true,
        }
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Fire-and-forget: succeed once the payload is written.
    pub fn without_reply(mut self) -> Self {
        self.expect_reply = false;
        self
    }
}

/// Outcome of a transport operation, identical in shape for every transport.
#[derive(Debug, Clone)]
pub struct TransportResult {
    pub success: bool,
    pub message: String,
    pub payload: Option<Bytes>,
    pub elapsed: Duration,
    pub failure: Option<FailureKind>,
}

/// Result of [`crate::TransportAdapter::send_command`].
pub type CommandResult = TransportResult;

/// Result of [`crate::TransportAdapter::receive_data`].
pub type DataResult = TransportResult;

impl TransportResult {
    pub fn ok(message: impl Into<String>, payload: Option<Bytes>, elapsed: Duration) -> Self {
        Self {
            success: true,
            message: message.into(),
            payload,
            elapsed,
            failure: None,
        }
    }

    pub fn failed(error: &TransportError, elapsed: Duration) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            payload: None,
            elapsed,
            failure: Some(error.kind()),
        }
    }

    pub(crate) fn from_outcome(
        outcome: Result<Option<Bytes>, TransportError>,
        elapsed: Duration,
    ) -> Self {
        match outcome {
            Ok(payload) => {
                let message = match &payload {
                    Some(p) => format!("{} bytes received", p.len()),
                    None => "sent".to_string(),
                };
                Self::ok(message, payload, elapsed)
            }
            Err(e) => Self::failed(&e, elapsed),
        }
    }

    pub fn payload_hex(&self) -> Option<String> {
        self.payload.as_ref().map(hex::encode)
    }
}
