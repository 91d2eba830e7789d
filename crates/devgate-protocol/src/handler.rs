//! The per-vendor handler contract and the business hand-off boundary.
//!
//! A handler owns one wire format end to end:
//!
//! ```text
//! raw bytes ──parse──> ProtocolMessage ──validate──> bool
//!                             │
//!                             ├──process──> MessageSink (business layer)
//!                             └──build_response──> reply bytes
//! ```
//!
//! Parsing, validation and response building are synchronous and never touch
//! I/O. Processing hands the message to a [`MessageSink`] without waiting on
//! downstream work.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use devgate_core::{DeviceId, DeviceType, Manufacturer, ProtocolType};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::{ParseError, ProcessError, ProcessErrorCode, ValidationIssue};
use crate::framing::Framing;
use crate::message::ProtocolMessage;

/// Static identity and capabilities of a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerDescriptor {
    pub protocol_type: ProtocolType,
    pub manufacturer: Manufacturer,
    pub version: String,
    pub device_type: DeviceType,
    /// Commands and features the handler understands.
    pub capabilities: Vec<String>,
    /// Device models known to speak this protocol.
    pub models: Vec<String>,
    /// Tie-break when more than one handler could claim a device; higher wins.
    pub priority: u8,
}

impl HandlerDescriptor {
    pub fn supports_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m.eq_ignore_ascii_case(model.trim()))
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Contract implemented once per (manufacturer, device type, version).
pub trait ProtocolHandler {
    fn descriptor(&self) -> &HandlerDescriptor;

    fn protocol_type(&self) -> &ProtocolType {
        &self.descriptor().protocol_type
    }

    fn manufacturer(&self) -> &Manufacturer {
        &self.descriptor().manufacturer
    }

    fn version(&self) -> &str {
        &self.descriptor().version
    }

    fn device_type(&self) -> DeviceType {
        self.descriptor().device_type
    }

    /// How frames of this protocol are delimited on a stream.
    fn framing(&self) -> Framing;

    /// Decode one complete frame in its native binary form.
    fn parse_bytes(&self, raw: &[u8]) -> Result<ProtocolMessage, ParseError>;

    /// Decode one frame from its textual form (hex dump or text payload).
    fn parse_str(&self, text: &str) -> Result<ProtocolMessage, ParseError>;

    /// Explain why a message is not acceptable, if it is not.
    fn check(&self, message: &ProtocolMessage) -> Result<(), ValidationIssue>;

    /// Pure integrity and legality check.
    fn validate(&self, message: &ProtocolMessage) -> bool {
        self.check(message).is_ok()
    }

    /// Hand a validated message to the business layer.
    fn process(
        &self,
        message: &ProtocolMessage,
        device_id: &DeviceId,
        sink: &dyn MessageSink,
    ) -> Result<(), ProcessError>;

    /// Build the wire reply for `request`. Never fails.
    fn build_response(
        &self,
        request: &ProtocolMessage,
        success: bool,
        error_code: &str,
        error_message: &str,
    ) -> Bytes;
}

/// A decoded message attributed to a device, as seen by business services.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceEvent {
    pub device_id: DeviceId,
    pub message: ProtocolMessage,
    pub received_at: DateTime<Utc>,
}

impl DeviceEvent {
    pub fn new(device_id: DeviceId, message: ProtocolMessage) -> Self {
        Self {
            device_id,
            message,
            received_at: Utc::now(),
        }
    }

    pub fn command(&self) -> &str {
        &self.message.command
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("consumer queue is full")]
    Full,

    #[error("consumer has shut down")]
    Closed,

    #[error("consumer rejected event: {0}")]
    Rejected(String),
}

/// Business callback boundary. Implementations must not block.
pub trait MessageSink: Send + Sync {
    fn deliver(&self, event: DeviceEvent) -> Result<(), SinkError>;
}

/// Sink that forwards events into a bounded channel.
///
/// A full channel is reported as a downstream rejection rather than awaited.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<DeviceEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<DeviceEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiver business services read from.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DeviceEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl MessageSink for ChannelSink {
    fn deliver(&self, event: DeviceEvent) -> Result<(), SinkError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Deliver `message` to `sink`, mapping sink failures to a process error.
pub(crate) fn deliver(
    sink: &dyn MessageSink,
    device_id: &DeviceId,
    message: &ProtocolMessage,
) -> Result<(), ProcessError> {
    sink.deliver(DeviceEvent::new(device_id.clone(), message.clone()))
        .map_err(|e| ProcessError::new(ProcessErrorCode::DownstreamRejected, e.to_string()))
}

/// Decode a whitespace-tolerant hex dump into bytes.
pub(crate) fn decode_hex(text: &str) -> Result<Vec<u8>, ParseError> {
    use crate::error::ParseErrorCode;

    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(ParseError::new(ParseErrorCode::EmptyFrame, "empty hex string", &[]));
    }
    hex::decode(&compact).map_err(|e| {
        ParseError::new(ParseErrorCode::BadHex, e.to_string(), compact.as_bytes())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Fields, MessageType};

    fn message() -> ProtocolMessage {
        ProtocolMessage {
            protocol_type: ProtocolType::new("TEST_V1").unwrap(),
            message_type: MessageType::Heartbeat,
            type_code: 3,
            command_code: 0,
            command: "heartbeat".into(),
            device_code: "DEV".into(),
            sequence: Some(1),
            timestamp: Utc::now(),
            declared_length: None,
            raw: Bytes::new(),
            fields: Fields::new(),
        }
    }

    #[test]
    fn descriptor_model_lookup_is_case_insensitive() {
        let descriptor = HandlerDescriptor {
            protocol_type: ProtocolType::new("TEST_V1").unwrap(),
            manufacturer: Manufacturer::new("Acme"),
            version: "1.0".into(),
            device_type: DeviceType::AccessController,
            capabilities: vec!["open-door".into()],
            models: vec!["MA300".into()],
            priority: 5,
        };
        assert!(descriptor.supports_model("ma300"));
        assert!(!descriptor.supports_model("MA301"));
        assert!(descriptor.has_capability("open-door"));
    }

    #[test]
    fn channel_sink_reports_full_and_closed() {
        let (sink, rx) = ChannelSink::channel(1);
        let id = DeviceId::new("DEV").unwrap();
        assert!(sink.deliver(DeviceEvent::new(id.clone(), message())).is_ok());
        assert_eq!(
            sink.deliver(DeviceEvent::new(id.clone(), message())),
            Err(SinkError::Full)
        );
        drop(rx);
        assert_eq!(
            sink.deliver(DeviceEvent::new(id, message())),
            Err(SinkError::Closed)
        );
    }

    #[test]
    fn deliver_maps_rejection() {
        let (sink, rx) = ChannelSink::channel(1);
        drop(rx);
        let err = deliver(&sink, &DeviceId::new("DEV").unwrap(), &message()).unwrap_err();
        assert_eq!(err.code, ProcessErrorCode::DownstreamRejected);
    }

    #[test]
    fn decode_hex_ignores_whitespace() {
        assert_eq!(decode_hex("45 48\n0a").unwrap(), vec![0x45, 0x48, 0x0a]);
        assert!(decode_hex("   ").is_err());
        assert!(decode_hex("4g").is_err());
    }
}
