//! Entropy attendance clock push protocol, version 4.0 (`ATTENDANCE_ENTROPY_V4.0`).
//!
//! Clocks push batches of punch records as UTF-8 text over HTTP. Each line is
//! one record of tab-separated fields:
//!
//! ```text
//! pin  time                 status verify workcode reserved1 reserved2 [mask temperature conv_temperature]
//! 1001 2024-03-01 08:59:12  0      1      0        0         0
//! ```
//!
//! An optional first line `SN=<serial>` names the pushing device. The HTTP
//! body is always one complete frame, so this handler is
//! frame-boundary-ignorant. Replies are plain text (`OK:<n>` or
//! `ERROR:<code>:<message>`) and are not themselves parseable as pushes.

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use devgate_core::{DeviceId, DeviceType, Manufacturer, ProtocolType};

use crate::error::{ParseError, ParseErrorCode, ProcessError, ValidationIssue};
use crate::framing::Framing;
use crate::handler::{HandlerDescriptor, MessageSink, ProtocolHandler, deliver};
use crate::message::{FieldValue, Fields, MessageType, ProtocolMessage};

pub const PROTOCOL_TYPE: &str = "ATTENDANCE_ENTROPY_V4.0";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const OPTIONAL_COLUMNS: &[&str] = &[
    "status",
    "verify",
    "workcode",
    "reserved1",
    "reserved2",
    "mask_flag",
    "temperature",
    "conv_temperature",
];

const MODELS: &[&str] = &["iFace702", "iClock680", "MB460", "SpeedFace-V5L", "UA760"];

#[derive(Debug, Clone)]
pub struct EntropyAttendanceHandler {
    descriptor: HandlerDescriptor,
}

impl Default for EntropyAttendanceHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropyAttendanceHandler {
    pub fn new() -> Self {
        Self {
            descriptor: HandlerDescriptor {
                protocol_type: ProtocolType::from_static(PROTOCOL_TYPE),
                manufacturer: Manufacturer::new("Entropy"),
                version: "4.0".to_string(),
                device_type: DeviceType::AttendanceClock,
                capabilities: vec!["attendance-upload".to_string()],
                models: MODELS.iter().map(ToString::to_string).collect(),
                priority: 10,
            },
        }
    }
}

fn column_value(column: &str, text: &str) -> FieldValue {
    if column.ends_with("temperature") {
        if let Ok(v) = text.parse::<f64>() {
            return FieldValue::Float(v);
        }
    } else if let Ok(v) = text.parse::<u64>() {
        return FieldValue::Uint(v);
    }
    FieldValue::Text(text.to_string())
}

fn parse_record(line: &str, raw: &[u8]) -> Result<(Fields, DateTime<Utc>), ParseError> {
    let mut cols = line.split('\t').map(str::trim);
    let pin = cols.next().unwrap_or_default();
    if pin.is_empty() {
        return Err(ParseError::new(ParseErrorCode::BadRecord, "record without pin", raw));
    }
    let time_text = cols
        .next()
        .ok_or_else(|| ParseError::new(ParseErrorCode::BadRecord, format!("record {pin} has no time"), raw))?;
    let time = NaiveDateTime::parse_from_str(time_text, TIME_FORMAT)
        .map_err(|e| {
            ParseError::new(
                ParseErrorCode::BadTimestamp,
                format!("record {pin}: {time_text:?}: {e}"),
                raw,
            )
        })?
        .and_utc();

    let mut record = Fields::new().with("pin", pin).with("time", time);
    for (column, text) in OPTIONAL_COLUMNS.iter().zip(cols) {
        if !text.is_empty() {
            record.insert(column, column_value(column, text));
        }
    }
    Ok((record, time))
}

impl ProtocolHandler for EntropyAttendanceHandler {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    fn framing(&self) -> Framing {
        Framing::Whole
    }

    fn parse_bytes(&self, raw: &[u8]) -> Result<ProtocolMessage, ParseError> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| ParseError::new(ParseErrorCode::BadEncoding, e.to_string(), raw))?;
        self.parse_str(text)
    }

    fn parse_str(&self, text: &str) -> Result<ProtocolMessage, ParseError> {
        let raw = text.as_bytes();
        let mut device_code = String::new();
        let mut records = Vec::new();
        let mut latest: Option<DateTime<Utc>> = None;

        for line in text.lines().map(|l| l.trim_end_matches('\r')) {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(sn) = line.trim().strip_prefix("SN=") {
                device_code = sn.trim().to_string();
                continue;
            }
            let (record, time) = parse_record(line, raw)?;
            latest = Some(latest.map_or(time, |t| t.max(time)));
            records.push(record);
        }

        if records.is_empty() {
            return Err(ParseError::new(
                ParseErrorCode::EmptyFrame,
                "no attendance records",
                raw,
            ));
        }

        let fields = Fields::new()
            .with("record_count", records.len() as u64)
            .with("records", FieldValue::List(records));

        Ok(ProtocolMessage {
            protocol_type: self.descriptor.protocol_type.clone(),
            message_type: MessageType::AttendanceRecord,
            type_code: 0,
            command_code: 0,
            command: "attendance-upload".to_string(),
            device_code,
            sequence: None,
            timestamp: latest.unwrap_or_else(Utc::now),
            declared_length: None,
            raw: Bytes::copy_from_slice(raw),
            fields,
        })
    }

    fn check(&self, message: &ProtocolMessage) -> Result<(), ValidationIssue> {
        if message.protocol_type != self.descriptor.protocol_type {
            return Err(ValidationIssue::new(
                "protocol",
                format!("message belongs to {}", message.protocol_type),
            ));
        }
        if message.message_type != MessageType::AttendanceRecord {
            return Err(ValidationIssue::new(
                "message_type",
                format!("unexpected {}", message.message_type),
            ));
        }
        let records = message.fields.get_list("records").unwrap_or_default();
        if records.is_empty() {
            return Err(ValidationIssue::new("records", "no records"));
        }
        if message.fields.get_u64("record_count") != Some(records.len() as u64) {
            return Err(ValidationIssue::new("records", "record count mismatch"));
        }
        if let Some(bad) = records
            .iter()
            .find(|r| r.get_text("pin").is_none_or(str::is_empty) || r.get("time").is_none())
        {
            return Err(ValidationIssue::new(
                "records",
                format!("incomplete record {:?}", bad.get_text("pin")),
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
        deliver(sink, device_id, message)
    }

    fn build_response(
        &self,
        request: &ProtocolMessage,
        success: bool,
        error_code: &str,
        error_message: &str,
    ) -> Bytes {
        let body = if success {
            let count = request.fields.get_u64("record_count").unwrap_or(0);
            format!("OK:{count}")
        } else {
            let message = error_message.replace(['\r', '\n'], " ");
            format!("ERROR:{error_code}:{message}")
        };
        Bytes::from(body)
    }
}
