//! Enum wrapper for protocol handler dispatch.
//!
//! The registry stores handlers as concrete values rather than trait objects.
//! Adding a wire format means adding a variant here and a line to
//! [`crate::registry::default_registry`].
//!
//! ```
//! use devgate_protocol::{AnyProtocolHandler, EntropyAccessHandler, ProtocolHandler};
//!
//! let handler = AnyProtocolHandler::from(EntropyAccessHandler::new());
//! assert_eq!(handler.protocol_type().as_str(), "ACCESS_ENTROPY_V4.8");
//! ```

use bytes::Bytes;
use devgate_core::DeviceId;

use crate::error::{ParseError, ProcessError, ValidationIssue};
use crate::framing::Framing;
use crate::handler::{HandlerDescriptor, MessageSink, ProtocolHandler};
use crate::handlers::{
    EntropyAccessHandler, EntropyAttendanceHandler, Rs485ModbusHandler, ZktecoConsumeHandler,
};
use crate::message::ProtocolMessage;

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum AnyProtocolHandler {
    /// Entropy access controllers, binary over TCP.
    EntropyAccess(EntropyAccessHandler),
    /// ZKTeco consumption terminals, binary over TCP.
    ZktecoConsume(ZktecoConsumeHandler),
    /// Entropy attendance clocks, text pushed over HTTP.
    EntropyAttendance(EntropyAttendanceHandler),
    /// Modbus-RTU terminals on an RS485 bus.
    Rs485Modbus(Rs485ModbusHandler),
}

macro_rules! dispatch {
    ($self:ident, $h:ident => $body:expr) => {
        match $self {
            Self::EntropyAccess($h) => $body,
            Self::ZktecoConsume($h) => $body,
            Self::EntropyAttendance($h) => $body,
            Self::Rs485Modbus($h) => $body,
        }
    };
}

impl ProtocolHandler for AnyProtocolHandler {
    fn descriptor(&self) -> &HandlerDescriptor {
        dispatch!(self, h => h.descriptor())
    }

    fn framing(&self) -> Framing {
        dispatch!(self, h => h.framing())
    }

    fn parse_bytes(&self, raw: &[u8]) -> Result<ProtocolMessage, ParseError> {
        dispatch!(self, h => h.parse_bytes(raw))
    }

    fn parse_str(&self, text: &str) -> Result<ProtocolMessage, ParseError> {
        dispatch!(self, h => h.parse_str(text))
    }

    fn check(&self, message: &ProtocolMessage) -> Result<(), ValidationIssue> {
        dispatch!(self, h => h.check(message))
    }

    fn process(
        &self,
        message: &ProtocolMessage,
        device_id: &DeviceId,
        sink: &dyn MessageSink,
    ) -> Result<(), ProcessError> {
        dispatch!(self, h => h.process(message, device_id, sink))
    }

    fn build_response(
        &self,
        request: &ProtocolMessage,
        success: bool,
        error_code: &str,
        error_message: &str,
    ) -> Bytes {
        dispatch!(self, h => h.build_response(request, success, error_code, error_message))
    }
}

impl From<EntropyAccessHandler> for AnyProtocolHandler {
    fn from(handler: EntropyAccessHandler) -> Self {
        Self::EntropyAccess(handler)
    }
}

impl From<ZktecoConsumeHandler> for AnyProtocolHandler {
    fn from(handler: ZktecoConsumeHandler) -> Self {
        Self::ZktecoConsume(handler)
    }
}

impl From<EntropyAttendanceHandler> for AnyProtocolHandler {
    fn from(handler: EntropyAttendanceHandler) -> Self {
        Self::EntropyAttendance(handler)
    }
}

impl From<Rs485ModbusHandler> for AnyProtocolHandler {
    fn from(handler: Rs485ModbusHandler) -> Self {
        Self::Rs485Modbus(handler)
    }
}
