//! Transport-independent message envelope.
//!
//! Every handler turns its wire format into a [`ProtocolMessage`]: header
//! fields common to all vendors (type, command, device code, sequence,
//! timestamp) plus a map of handler-specific [`FieldValue`]s. The raw frame is
//! kept alongside so validation can re-check integrity and failures can be
//! logged with the exact bytes that arrived.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use devgate_core::ProtocolType;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of message carried by a frame, shared across vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    // Access control
    RealtimeEvent,
    DeviceStatus,
    Heartbeat,
    PermissionRequest,
    VerifyResult,
    ErrorReport,
    DoorControl,

    // Consumption
    ConsumeRecord,
    AccountQuery,
    RechargeRecord,
    SubsidyRecord,

    // Attendance
    AttendanceRecord,

    // RS485 register access
    RegisterRead,
    RegisterWrite,
    Exception,

    // Replies
    Ack,
    Nak,

    /// Type byte not defined by the protocol; rejected at validation.
    Unknown,
}

impl MessageType {
    /// True for reply frames that acknowledge an earlier request.
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::Ack | Self::Nak)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RealtimeEvent => "REALTIME_EVENT",
            Self::DeviceStatus => "DEVICE_STATUS",
            Self::Heartbeat => "HEARTBEAT",
            Self::PermissionRequest => "PERMISSION_REQUEST",
            Self::VerifyResult => "VERIFY_RESULT",
            Self::ErrorReport => "ERROR_REPORT",
            Self::DoorControl => "DOOR_CONTROL",
            Self::ConsumeRecord => "CONSUME_RECORD",
            Self::AccountQuery => "ACCOUNT_QUERY",
            Self::RechargeRecord => "RECHARGE_RECORD",
            Self::SubsidyRecord => "SUBSIDY_RECORD",
            Self::AttendanceRecord => "ATTENDANCE_RECORD",
            Self::RegisterRead => "REGISTER_READ",
            Self::RegisterWrite => "REGISTER_WRITE",
            Self::Exception => "EXCEPTION",
            Self::Ack => "ACK",
            Self::Nak => "NAK",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single decoded field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Uint(u64),
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Time(DateTime<Utc>),
    List(Vec<Fields>),
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        Self::Uint(v.into())
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        Self::Uint(v.into())
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        Self::Uint(v.into())
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<i16> for FieldValue {
    fn from(v: i16) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Time(v)
    }
}

/// Ordered field map extracted by a handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Fields(BTreeMap<String, FieldValue>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<FieldValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.0.get(key)? {
            FieldValue::Uint(v) => Some(*v),
            FieldValue::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Uint(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn get_text(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_list(&self, key: &str) -> Option<&[Fields]> {
        match self.0.get(key)? {
            FieldValue::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }
}

/// Decoded frame produced by a handler's parse step.
///
/// One is created per inbound frame and handed by reference through
/// validation, processing and response building.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtocolMessage {
    /// Protocol that produced this message.
    pub protocol_type: ProtocolType,

    pub message_type: MessageType,

    /// Wire value of the message type byte (or function code).
    pub type_code: u8,

    /// Wire value of the command byte.
    pub command_code: u8,

    /// Human readable command name, e.g. `open-door`.
    pub command: String,

    /// Device identity as carried in the frame (serial number, unit address).
    pub device_code: String,

    /// Correlation number echoed by responses, when the protocol has one.
    pub sequence: Option<u32>,

    pub timestamp: DateTime<Utc>,

    /// Frame length declared by the header, when the protocol declares one.
    pub declared_length: Option<usize>,

    #[serde(serialize_with = "serialize_hex")]
    pub raw: Bytes,

    pub fields: Fields,
}

impl ProtocolMessage {
    /// Short identity used in log fields.
    pub fn summary(&self) -> String {
        match self.sequence {
            Some(seq) => format!("{}/{}#{}", self.message_type, self.command, seq),
            None => format!("{}/{}", self.message_type, self.command),
        }
    }
}

fn serialize_hex<S: Serializer>(raw: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(raw))
}
