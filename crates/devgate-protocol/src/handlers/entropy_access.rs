//! Entropy access controller protocol, version 4.8 (`ACCESS_ENTROPY_V4.8`).
//!
//! Binary, little-endian, length-prefixed frames over TCP. See
//! [`binary`](super::binary) for the common header; this module owns the
//! message bodies:
//!
//! | Type | Name | Body |
//! |------|------|------|
//! | `0x01` | realtime event | 53 bytes: kind, event no, user, card, verify method/result, face and liveness scores, access point, direction, access time |
//! | `0x02` | device status | 18 bytes |
//! | `0x03` | heartbeat | 11 bytes |
//! | `0x04` | permission request | 27 bytes |
//! | `0x05` | verify result | 24 bytes |
//! | `0x06` | error report | 7 bytes + description |
//! | `0x07` | door control | door `u8`, hold seconds `u16`; command selects the action |
//! | `0x10`/`0x11` | ACK / NAK | request type, result, code, text |

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use devgate_core::constants::DEFAULT_MAX_CLOCK_SKEW_SECS;
use devgate_core::{DeviceId, DeviceType, Manufacturer, ProtocolType};

use super::binary::{BinaryLayout, Reader, TYPE_ACK, TYPE_NAK, reply_body};
use crate::error::{ParseError, ProcessError, ProcessErrorCode, ValidationIssue};
use crate::framing::Framing;
use crate::handler::{HandlerDescriptor, MessageSink, ProtocolHandler, decode_hex, deliver};
use crate::message::{Fields, MessageType, ProtocolMessage};

pub const PROTOCOL_TYPE: &str = "ACCESS_ENTROPY_V4.8";

const LAYOUT: BinaryLayout = BinaryLayout {
    magic: 0x4845,
    version: 0x0480,
    id_len: 16,
};

pub const TYPE_REALTIME_EVENT: u8 = 0x01;
pub const TYPE_DEVICE_STATUS: u8 = 0x02;
pub const TYPE_HEARTBEAT: u8 = 0x03;
pub const TYPE_PERMISSION_REQUEST: u8 = 0x04;
pub const TYPE_VERIFY_RESULT: u8 = 0x05;
pub const TYPE_ERROR_REPORT: u8 = 0x06;
pub const TYPE_DOOR_CONTROL: u8 = 0x07;

/// Door control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DoorCommand {
    Open = 0x01,
    Close = 0x02,
    HoldOpen = 0x03,
    Lockdown = 0x04,
}

impl DoorCommand {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Open),
            0x02 => Some(Self::Close),
            0x03 => Some(Self::HoldOpen),
            0x04 => Some(Self::Lockdown),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "open-door",
            Self::Close => "close-door",
            Self::HoldOpen => "hold-open",
            Self::Lockdown => "lockdown",
        }
    }
}

const MODELS: &[&str] = &[
    "MA300", "MA300T", "SC405", "SC700", "SC705", "F18", "TA800C", "TA800T", "WK2600", "WK2600P",
];

const CAPABILITIES: &[&str] = &[
    "realtime-event",
    "device-status",
    "heartbeat",
    "permission-request",
    "verify-result",
    "error-report",
    "open-door",
    "close-door",
    "hold-open",
    "lockdown",
];

fn event_kind(code: u8) -> &'static str {
    match code {
        0x01 => "card",
        0x02 => "face",
        0x03 => "fingerprint",
        0x04 => "password",
        0x05 => "qr-code",
        0x06 => "duress",
        0x07 => "tailgating",
        0x08 => "anti-passback",
        0x09 => "door-magnetic",
        0x0A => "alarm",
        _ => "unknown",
    }
}

fn verify_outcome(code: u8) -> &'static str {
    match code {
        0 => "success",
        1 => "failed",
        2 => "timeout",
        3 => "invalid",
        _ => "unknown",
    }
}

#[derive(Debug, Clone)]
pub struct EntropyAccessHandler {
    descriptor: HandlerDescriptor,
    max_clock_skew: Duration,
}

impl Default for EntropyAccessHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropyAccessHandler {
    pub fn new() -> Self {
        Self {
            descriptor: HandlerDescriptor {
                protocol_type: ProtocolType::from_static(PROTOCOL_TYPE),
                manufacturer: Manufacturer::new("Entropy"),
                version: "4.8".to_string(),
                device_type: DeviceType::AccessController,
                capabilities: CAPABILITIES.iter().map(ToString::to_string).collect(),
                models: MODELS.iter().map(ToString::to_string).collect(),
                priority: 10,
            },
            max_clock_skew: Duration::seconds(DEFAULT_MAX_CLOCK_SKEW_SECS),
        }
    }

    /// Override the accepted distance between device and gateway clocks.
    pub fn with_max_clock_skew(mut self, skew: Duration) -> Self {
        self.max_clock_skew = skew;
        self
    }

    /// Encode an arbitrary frame of this protocol.
    pub fn encode_frame(
        &self,
        device_sn: &str,
        type_code: u8,
        command_code: u8,
        sequence: u32,
        timestamp: DateTime<Utc>,
        body: &[u8],
    ) -> Bytes {
        LAYOUT.encode(device_sn, type_code, command_code, sequence, timestamp, body)
    }

    /// Encode a door control command stamped with the current time.
    pub fn door_control(
        &self,
        device_sn: &str,
        sequence: u32,
        command: DoorCommand,
        door_no: u8,
        hold_secs: u16,
    ) -> Bytes {
        let mut body = Vec::with_capacity(3);
        body.push(door_no);
        body.extend_from_slice(&hold_secs.to_le_bytes());
        self.encode_frame(
            device_sn,
            TYPE_DOOR_CONTROL,
            command as u8,
            sequence,
            Utc::now(),
            &body,
        )
    }

    fn parse_body(
        &self,
        type_code: u8,
        command_code: u8,
        body: &[u8],
        raw: &[u8],
    ) -> Result<(MessageType, String, Fields), ParseError> {
        let mut r = Reader::new(body, raw);
        let mut f = Fields::new();
        let (message_type, command) = match type_code {
            TYPE_REALTIME_EVENT => {
                let kind = r.u8("event_type")?;
                f.insert("event_type", kind);
                f.insert("event_kind", event_kind(kind));
                f.insert("event_no", r.u64("event_no")?);
                f.insert("user_id", r.u32("user_id")?);
                f.insert("card_no", r.fixed_str("card_no", 20)?);
                f.insert("verify_method", r.u8("verify_method")?);
                let result = r.u8("verify_result")?;
                f.insert("verify_result", result);
                f.insert("verify_outcome", verify_outcome(result));
                f.insert("face_confidence", f64::from(r.u16("face_confidence")?) / 100.0);
                f.insert("liveness", r.u8("liveness")? != 0);
                f.insert(
                    "liveness_confidence",
                    f64::from(r.u16("liveness_confidence")?) / 100.0,
                );
                f.insert("access_point", r.u32("access_point")?);
                f.insert("direction", if r.u8("direction")? == 0 { "in" } else { "out" });
                f.insert("access_time", r.time("access_time")?);
                (MessageType::RealtimeEvent, event_kind(kind).to_string())
            }
            TYPE_DEVICE_STATUS => {
                f.insert("device_status", r.u8("device_status")?);
                f.insert("door_status", r.u8("door_status")?);
                f.insert("lock_status", r.u8("lock_status")?);
                f.insert("online", r.u8("online")? != 0);
                f.insert("battery_level", r.u8("battery_level")?);
                f.insert("signal_strength", r.u8("signal_strength")?);
                f.insert("cpu_usage", f64::from(r.u16("cpu_usage")?) / 100.0);
                f.insert("memory_usage", f64::from(r.u16("memory_usage")?) / 100.0);
                f.insert("storage_used_kb", r.u32("storage_used_kb")?);
                f.insert("error_code", r.u32("error_code")?);
                (MessageType::DeviceStatus, "device-status".to_string())
            }
            TYPE_HEARTBEAT => {
                f.insert("interval_secs", r.u16("interval_secs")?);
                f.insert("uptime_secs", r.u32("uptime_secs")?);
                f.insert("connection_count", r.u8("connection_count")?);
                f.insert("temperature", f64::from(r.i16("temperature")?) / 10.0);
                f.insert("humidity", f64::from(r.u16("humidity")?) / 10.0);
                (MessageType::Heartbeat, "heartbeat".to_string())
            }
            TYPE_PERMISSION_REQUEST => {
                f.insert("user_id", r.u32("user_id")?);
                f.insert("access_level", r.u8("access_level")?);
                f.insert("group_id", r.u32("group_id")?);
                f.insert("valid_from", r.time("valid_from")?);
                f.insert("valid_until", r.time("valid_until")?);
                f.insert("multi_factor", r.u8("multi_factor")? != 0);
                f.insert("anti_passback", r.u8("anti_passback")? != 0);
                (MessageType::PermissionRequest, "permission-request".to_string())
            }
            TYPE_VERIFY_RESULT => {
                let result = r.u8("result")?;
                f.insert("result", result);
                f.insert("outcome", verify_outcome(result));
                f.insert("score", f64::from(r.u16("score")?) / 100.0);
                f.insert("failure_reason", r.u8("failure_reason")?);
                f.insert("process_ms", r.u32("process_ms")?);
                f.insert("session_id", hex::encode(r.take("session_id", 16)?));
                (MessageType::VerifyResult, "verify-result".to_string())
            }
            TYPE_ERROR_REPORT => {
                f.insert("error_code", r.u32("error_code")?);
                f.insert("error_level", r.u8("error_level")?);
                f.insert("description", r.text_u16("description")?);
                (MessageType::ErrorReport, "error-report".to_string())
            }
            TYPE_DOOR_CONTROL => {
                f.insert("door_no", r.u8("door_no")?);
                f.insert("hold_secs", r.u16("hold_secs")?);
                let command = DoorCommand::from_code(command_code)
                    .map(|c| c.name().to_string())
                    .unwrap_or_else(|| format!("door-{command_code:#04x}"));
                (MessageType::DoorControl, command)
            }
            TYPE_ACK | TYPE_NAK => {
                f.insert("request_type", r.u8("request_type")?);
                f.insert("result", r.u8("result")?);
                f.insert("error_code", r.u16("error_code")?);
                f.insert("error_message", r.text_u8("error_message")?);
                if type_code == TYPE_ACK {
                    (MessageType::Ack, "ack".to_string())
                } else {
                    (MessageType::Nak, "nak".to_string())
                }
            }
            other => {
                f.insert("payload", hex::encode(body));
                (MessageType::Unknown, format!("type-{other:#04x}"))
            }
        };
        Ok((message_type, command, f))
    }
}

impl ProtocolHandler for EntropyAccessHandler {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    fn framing(&self) -> Framing {
        LAYOUT.framing()
    }

    fn parse_bytes(&self, raw: &[u8]) -> Result<ProtocolMessage, ParseError> {
        let (header, body) = LAYOUT.parse(raw)?;
        let (message_type, command, fields) =
            self.parse_body(header.type_code, header.command_code, body, raw)?;
        Ok(ProtocolMessage {
            protocol_type: self.descriptor.protocol_type.clone(),
            message_type,
            type_code: header.type_code,
            command_code: header.command_code,
            command,
            device_code: header.device_code,
            sequence: Some(header.sequence),
            timestamp: header.timestamp,
            declared_length: Some(header.declared_len),
            raw: Bytes::copy_from_slice(raw),
            fields,
        })
    }

    fn parse_str(&self, text: &str) -> Result<ProtocolMessage, ParseError> {
        self.parse_bytes(&decode_hex(text)?)
    }

    fn check(&self, message: &ProtocolMessage) -> Result<(), ValidationIssue> {
        if message.protocol_type != self.descriptor.protocol_type {
            return Err(ValidationIssue::new(
                "protocol",
                format!("message belongs to {}", message.protocol_type),
            ));
        }
        if message.declared_length != Some(message.raw.len()) {
            return Err(ValidationIssue::new(
                "length",
                format!(
                    "declared {:?}, actual {}",
                    message.declared_length,
                    message.raw.len()
                ),
            ));
        }
        if !LAYOUT.crc_matches(&message.raw) {
            return Err(ValidationIssue::new("checksum", "CRC-32 trailer mismatch"));
        }
        if message.message_type == MessageType::Unknown {
            return Err(ValidationIssue::new(
                "message_type",
                format!("undefined type {:#04x}", message.type_code),
            ));
        }
        if message.message_type == MessageType::DoorControl
            && DoorCommand::from_code(message.command_code).is_none()
        {
            return Err(ValidationIssue::new(
                "command",
                format!("undefined door command {:#04x}", message.command_code),
            ));
        }
        if message.device_code.is_empty() {
            return Err(ValidationIssue::new("device", "empty device serial"));
        }
        let skew = (Utc::now() - message.timestamp).abs();
        if skew > self.max_clock_skew {
            return Err(ValidationIssue::new(
                "timestamp",
                format!("clock skew of {}s exceeds limit", skew.num_seconds()),
            ));
        }
        Ok(())
    }

    fn process(
        &self,
        message: &ProtocolMessage,
        device_id: &DeviceId,
        sink: &dyn MessageSink,
    ) -> Result<(), ProcessError> {
        match message.message_type {
            MessageType::Unknown => Err(ProcessError::new(
                ProcessErrorCode::UnexpectedMessage,
                format!("undefined type {:#04x}", message.type_code),
            )),
            MessageType::DoorControl if DoorCommand::from_code(message.command_code).is_none() => {
                Err(ProcessError::unsupported(&message.command))
            }
            _ => deliver(sink, device_id, message),
        }
    }

    fn build_response(
        &self,
        request: &ProtocolMessage,
        success: bool,
        error_code: &str,
        error_message: &str,
    ) -> Bytes {
        let reply_type = if success { TYPE_ACK } else { TYPE_NAK };
        let body = reply_body(request.type_code, success, error_code, error_message);
        LAYOUT.encode(
            &request.device_code,
            reply_type,
            request.command_code,
            request.sequence.unwrap_or(0),
            Utc::now(),
            &body,
        )
    }
}
