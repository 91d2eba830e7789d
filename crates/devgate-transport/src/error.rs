use serde::Serialize;
use thiserror::Error;

/// Errors raised while talking to a device.
///
/// Adapters fold these into a failed [`crate::CommandResult`]; they are only
/// surfaced directly by the lower-level clients.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection timeout after {0}ms")]
    ConnectionTimeout(u64),

    #[error("Read timeout after {0}ms")]
    ReadTimeout(u64),

    #[error("Write timeout after {0}ms")]
    WriteTimeout(u64),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("CRC error: expected {expected:#06x}, got {actual:#06x}")]
    Crc { expected: u16, actual: u16 },

    #[error("Address mismatch: expected unit {expected}, got {actual}")]
    AddressMismatch { expected: u8, actual: u8 },

    #[error("Device exception: function {function:#04x}, code {code:#04x}")]
    Exception { function: u8, code: u8 },

    #[error("Frame format error: {0}")]
    FrameFormat(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Unknown RS485 bus: {0}")]
    UnknownBus(String),

    #[error("Endpoint not supported by this transport: {0}")]
    UnsupportedEndpoint(String),
}

/// Coarse failure classification carried in transport results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    Timeout,
    Connection,
    Io,
    Checksum,
    AddressMismatch,
    DeviceException,
    FrameFormat,
    HttpStatus,
    Configuration,
}

impl TransportError {
    pub fn frame(message: impl Into<String>) -> Self {
        Self::FrameFormat(message.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::ConnectionTimeout(_) | Self::ReadTimeout(_) | Self::WriteTimeout(_) => {
                FailureKind::Timeout
            }
            Self::NotConnected | Self::ConnectionLost(_) | Self::Serial(_) | Self::Http(_) => {
                FailureKind::Connection
            }
            Self::Io(_) | Self::Codec(_) => FailureKind::Io,
            Self::Crc { .. } => FailureKind::Checksum,
            Self::AddressMismatch { .. } => FailureKind::AddressMismatch,
            Self::Exception { .. } => FailureKind::DeviceException,
            Self::FrameFormat(_) => FailureKind::FrameFormat,
            Self::HttpStatus { .. } => FailureKind::HttpStatus,
            Self::UnknownBus(_) | Self::UnsupportedEndpoint(_) => FailureKind::Configuration,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == FailureKind::Timeout
    }
}

impl From<devgate_protocol::CodecError> for TransportError {
    fn from(err: devgate_protocol::CodecError) -> Self {
        match err {
            devgate_protocol::CodecError::Io(e) => Self::Io(e),
            other => Self::Codec(other.to_string()),
        }
    }
}

impl From<tokio_serial::Error> for TransportError {
    fn from(err: tokio_serial::Error) -> Self {
        Self::Serial(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
