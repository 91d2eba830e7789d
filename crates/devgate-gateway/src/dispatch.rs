//! Per-frame pipeline.
//!
//! ```text
//! frame ──parse──┬─ error ──> Dropped (logged with hex, no reply)
//!                └─ message ──validate──┬─ false ──> Rejected (VALIDATION_FAILED reply)
//!                                       └─ true ──process──┬─ error ──> Failed (error-code reply)
//!                                                          └─ ok ─────> Completed (success reply)
//! ```
//!
//! Every stage is synchronous; only the connection loop around it awaits.

use std::sync::Arc;

use bytes::Bytes;
use devgate_core::{DeviceId, DeviceType, Manufacturer, ProtocolType};
use devgate_protocol::{
    AnyProtocolHandler, HandlerRegistry, MessageSink, ParseError, ProcessError, ProtocolHandler,
    VALIDATION_FAILED, ValidationIssue,
};
use tracing::{debug, warn};

use crate::error::Result;

/// What happened to one frame.
#[derive(Debug, Clone)]
pub enum FrameOutcome {
    /// Unparseable; nothing is sent back.
    Dropped(ParseError),
    /// Parsed but failed validation.
    Rejected { reply: Bytes, issue: ValidationIssue },
    /// Valid, but the business hand-off refused it.
    Failed { reply: Bytes, error: ProcessError },
    /// Delivered to the sink.
    Completed { reply: Bytes, device_id: DeviceId },
}

impl FrameOutcome {
    /// Bytes to write back to the device, if any.
    pub fn reply(&self) -> Option<&Bytes> {
        match self {
            Self::Dropped(_) => None,
            Self::Rejected { reply, .. } | Self::Failed { reply, .. } | Self::Completed { reply, .. } => {
                Some(reply)
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Dropped(_) => "dropped",
            Self::Rejected { .. } => "rejected",
            Self::Failed { .. } => "failed",
            Self::Completed { .. } => "completed",
        }
    }
}

/// Drives frames of one protocol through its handler.
#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<AnyProtocolHandler>,
    sink: Arc<dyn MessageSink>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("protocol", self.handler.protocol_type())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(handler: Arc<AnyProtocolHandler>, sink: Arc<dyn MessageSink>) -> Self {
        Self { handler, sink }
    }

    /// # Errors
    /// `Error::UnknownProtocolType` when nothing is registered for `protocol_type`.
    pub fn for_protocol(
        registry: &HandlerRegistry,
        protocol_type: &ProtocolType,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Self> {
        let handler = registry.handler(protocol_type).ok_or_else(|| {
            devgate_core::Error::UnknownProtocolType(protocol_type.to_string())
        })?;
        Ok(Self::new(handler, sink))
    }

    /// # Errors
    /// `Error::UnknownProtocolType` when no route covers the pair.
    pub fn for_device(
        registry: &HandlerRegistry,
        device_type: DeviceType,
        manufacturer: &Manufacturer,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Self> {
        let handler = registry
            .get_for_device(device_type, manufacturer)
            .ok_or_else(|| {
                devgate_core::Error::UnknownProtocolType(format!(
                    "no route for {device_type}/{manufacturer}"
                ))
            })?;
        Ok(Self::new(handler, sink))
    }

    pub fn handler(&self) -> &AnyProtocolHandler {
        &self.handler
    }

    /// Run one frame through parse, validate, process and reply.
    ///
    /// The device is identified by the serial number in the frame when it
    /// carries a usable one, otherwise by `fallback` (usually the peer address).
    pub fn handle(&self, frame: &[u8], fallback: &DeviceId) -> FrameOutcome {
        let handler = self.handler.as_ref();
        let protocol = handler.protocol_type();

        let message = match handler.parse_bytes(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    protocol = %protocol,
                    device = %fallback,
                    code = %e.code,
                    detail = %e.detail,
                    raw = %e.raw_hex(),
                    "Dropping unparseable frame"
                );
                return FrameOutcome::Dropped(e);
            }
        };

        let device_id = DeviceId::new(&message.device_code).unwrap_or_else(|_| fallback.clone());

        if let Err(issue) = handler.check(&message) {
            warn!(
                protocol = %protocol,
                device = %device_id,
                command = %message.command,
                issue = %issue,
                "Frame failed validation"
            );
            let reply = handler.build_response(&message, false, VALIDATION_FAILED, &issue.to_string());
            return FrameOutcome::Rejected { reply, issue };
        }

        if let Err(error) = handler.process(&message, &device_id, self.sink.as_ref()) {
            warn!(
                protocol = %protocol,
                device = %device_id,
                command = %message.command,
                code = %error.code,
                error = %error.message,
                "Frame processing failed"
            );
            let reply = handler.build_response(&message, false, error.code.as_str(), &error.message);
            return FrameOutcome::Failed { reply, error };
        }

        debug!(
            protocol = %protocol,
            device = %device_id,
            command = %message.command,
            sequence = ?message.sequence,
            "Frame processed"
        );
        let reply = handler.build_response(&message, true, "", "");
        FrameOutcome::Completed { reply, device_id }
    }
}
