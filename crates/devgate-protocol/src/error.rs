//! Per-frame failure types.
//!
//! A [`ParseError`] means the raw bytes never became a message; it keeps the
//! offending bytes for forensic logging. A [`ProcessError`] means a valid
//! message was refused by business processing; the payload is already known
//! good, so no raw bytes are carried. A [`ValidationIssue`] explains why
//! `validate` returned false. None of them is fatal beyond the current frame.

use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Why raw bytes could not be turned into a [`crate::ProtocolMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseErrorCode {
    EmptyFrame,
    FrameTooShort,
    BadMagic,
    UnsupportedVersion,
    LengthMismatch,
    ChecksumMismatch,
    BodyTruncated,
    BadHex,
    BadEncoding,
    BadTimestamp,
    BadRecord,
}

impl ParseErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyFrame => "EMPTY_FRAME",
            Self::FrameTooShort => "FRAME_TOO_SHORT",
            Self::BadMagic => "BAD_MAGIC",
            Self::UnsupportedVersion => "UNSUPPORTED_VERSION",
            Self::LengthMismatch => "LENGTH_MISMATCH",
            Self::ChecksumMismatch => "CHECKSUM_MISMATCH",
            Self::BodyTruncated => "BODY_TRUNCATED",
            Self::BadHex => "BAD_HEX",
            Self::BadEncoding => "BAD_ENCODING",
            Self::BadTimestamp => "BAD_TIMESTAMP",
            Self::BadRecord => "BAD_RECORD",
        }
    }
}

impl fmt::Display for ParseErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("{code}: {detail}")]
pub struct ParseError {
    pub code: ParseErrorCode,
    pub detail: String,
    pub raw: Bytes,
}

impl ParseError {
    pub fn new(code: ParseErrorCode, detail: impl Into<String>, raw: &[u8]) -> Self {
        Self {
            code,
            detail: detail.into(),
            raw: Bytes::copy_from_slice(raw),
        }
    }

    pub fn too_short(needed: usize, raw: &[u8]) -> Self {
        Self::new(
            ParseErrorCode::FrameTooShort,
            format!("need at least {needed} bytes, got {}", raw.len()),
            raw,
        )
    }

    pub fn checksum(expected: u32, actual: u32, raw: &[u8]) -> Self {
        Self::new(
            ParseErrorCode::ChecksumMismatch,
            format!("expected {expected:#x}, got {actual:#x}"),
            raw,
        )
    }

    /// Raw bytes rendered as lowercase hex for log fields.
    pub fn raw_hex(&self) -> String {
        hex::encode(&self.raw)
    }
}

/// Why a well-formed message was refused by business processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessErrorCode {
    UnsupportedCommand,
    DownstreamRejected,
    UnexpectedMessage,
}

impl ProcessErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedCommand => "UNSUPPORTED_COMMAND",
            Self::DownstreamRejected => "DOWNSTREAM_REJECTED",
            Self::UnexpectedMessage => "UNEXPECTED_MESSAGE",
        }
    }
}

impl fmt::Display for ProcessErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ProcessError {
    pub code: ProcessErrorCode,
    pub message: String,
}

impl ProcessError {
    pub fn new(code: ProcessErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unsupported(command: impl fmt::Display) -> Self {
        Self::new(
            ProcessErrorCode::UnsupportedCommand,
            format!("command {command} is not supported"),
        )
    }
}

/// Error code used in failure responses for messages that fail validation.
pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";

/// Reason a parsed message failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{check}: {detail}")]
pub struct ValidationIssue {
    pub check: &'static str,
    pub detail: String,
}

impl ValidationIssue {
    pub fn new(check: &'static str, detail: impl Into<String>) -> Self {
        Self {
            check,
            detail: detail.into(),
        }
    }
}

/// Errors surfaced by the tokio codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },
}
