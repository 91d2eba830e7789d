//! Wire formats spoken by devgate terminals.
//!
//! Every vendor format is a [`ProtocolHandler`]: it turns raw bytes into a
//! [`ProtocolMessage`], validates it, hands it to a [`MessageSink`] and builds
//! the acknowledgement the device expects. Handlers are collected into a
//! read-only [`HandlerRegistry`] at startup.
//!
//! Streaming transports split bytes into frames with [`FrameCodec`], driven by
//! the [`Framing`] policy each handler declares.

pub mod any;
pub mod checksum;
pub mod codec;
pub mod error;
pub mod framing;
pub mod handler;
pub mod handlers;
pub mod message;
pub mod registry;

pub use any::AnyProtocolHandler;
pub use codec::FrameCodec;
pub use error::{
    CodecError, ParseError, ParseErrorCode, ProcessError, ProcessErrorCode, VALIDATION_FAILED,
    ValidationIssue,
};
pub use framing::{FrameParser, Framing, ParserState};
pub use handler::{
    ChannelSink, DeviceEvent, HandlerDescriptor, MessageSink, ProtocolHandler, SinkError,
};
pub use handlers::{
    ConsumeRecord, DoorCommand, EntropyAccessHandler, EntropyAttendanceHandler,
    Rs485ModbusHandler, ZktecoConsumeHandler,
};
pub use message::{FieldValue, Fields, MessageType, ProtocolMessage};
pub use registry::{DEFAULT_ROUTES, HandlerRegistry, RegistryBuilder, default_registry};
