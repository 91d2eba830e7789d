//! ZKTeco consumption POS protocol, version 1.0 (`CONSUME_ZKTECO_V1.0`).
//!
//! Same binary envelope as the access protocol with a `ZK` magic and a
//! 12-byte device id. Terminals upload offline records in bulk after a link
//! outage, so device timestamps are not checked against the gateway clock.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use devgate_core::{DeviceId, DeviceType, Manufacturer, ProtocolType};

use super::binary::{BinaryLayout, Reader, TYPE_ACK, TYPE_NAK, reply_body};
use crate::error::{ParseError, ProcessError, ProcessErrorCode, ValidationIssue};
use crate::framing::Framing;
use crate::handler::{HandlerDescriptor, MessageSink, ProtocolHandler, decode_hex, deliver};
use crate::message::{Fields, MessageType, ProtocolMessage};

pub const PROTOCOL_TYPE: &str = "CONSUME_ZKTECO_V1.0";

const LAYOUT: BinaryLayout = BinaryLayout {
    magic: 0x5A4B,
    version: 0x0100,
    id_len: 12,
};

pub const TYPE_CONSUME_RECORD: u8 = 0x01;
pub const TYPE_DEVICE_STATUS: u8 = 0x02;
pub const TYPE_HEARTBEAT: u8 = 0x03;
pub const TYPE_ACCOUNT_QUERY: u8 = 0x04;
pub const TYPE_RECHARGE: u8 = 0x06;
pub const TYPE_SUBSIDY: u8 = 0x07;
pub const TYPE_ERROR_REPORT: u8 = 0x08;

/// Command byte of a consume record.
pub const CMD_CONSUME: u8 = 0x01;
pub const CMD_OFFLINE_CONSUME: u8 = 0x02;
pub const CMD_REFUND: u8 = 0x03;

const MODELS: &[&str] = &["IC-600T", "IC-700A", "IC-800A", "F2", "SC700", "SC810"];

const CAPABILITIES: &[&str] = &[
    "consume",
    "offline-consume",
    "refund",
    "device-status",
    "heartbeat",
    "account-query",
    "recharge",
    "subsidy",
    "error-report",
];

fn consume_command(code: u8) -> Option<&'static str> {
    match code {
        CMD_CONSUME => Some("consume"),
        CMD_OFFLINE_CONSUME => Some("offline-consume"),
        CMD_REFUND => Some("refund"),
        _ => None,
    }
}

/// Consume record fields used by [`ZktecoConsumeHandler::consume_record`].
#[derive(Debug, Clone)]
pub struct ConsumeRecord<'a> {
    pub card_no: &'a str,
    pub user_id: u32,
    pub amount_cents: u32,
    pub balance_cents: u32,
    pub transaction_no: u32,
    pub meal_type: u8,
}

#[derive(Debug, Clone)]
pub struct ZktecoConsumeHandler {
    descriptor: HandlerDescriptor,
}

impl Default for ZktecoConsumeHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ZktecoConsumeHandler {
    pub fn new() -> Self {
        Self {
            descriptor: HandlerDescriptor {
                protocol_type: ProtocolType::from_static(PROTOCOL_TYPE),
                manufacturer: Manufacturer::new("ZKTeco"),
                version: "1.0".to_string(),
                device_type: DeviceType::ConsumePos,
                capabilities: CAPABILITIES.iter().map(ToString::to_string).collect(),
                models: MODELS.iter().map(ToString::to_string).collect(),
                priority: 5,
            },
        }
    }

    pub fn encode_frame(
        &self,
        device_id: &str,
        type_code: u8,
        command_code: u8,
        sequence: u32,
        timestamp: DateTime<Utc>,
        body: &[u8],
    ) -> Bytes {
        LAYOUT.encode(device_id, type_code, command_code, sequence, timestamp, body)
    }

    /// Encode an online consume record.
    pub fn consume_record(&self, device_id: &str, sequence: u32, record: &ConsumeRecord<'_>) -> Bytes {
        let mut body = Vec::with_capacity(41);
        body.extend_from_slice(&[0x01, 0x01, 0x01]);
        super::binary::put_fixed(&mut body, record.card_no, 20);
        body.extend_from_slice(&record.user_id.to_le_bytes());
        body.extend_from_slice(&record.amount_cents.to_le_bytes());
        body.extend_from_slice(&record.balance_cents.to_le_bytes());
        body.extend_from_slice(&record.transaction_no.to_le_bytes());
        body.push(0);
        body.push(record.meal_type);
        self.encode_frame(
            device_id,
            TYPE_CONSUME_RECORD,
            CMD_CONSUME,
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
            TYPE_CONSUME_RECORD => {
                f.insert("transaction_type", r.u8("transaction_type")?);
                f.insert("consume_method", r.u8("consume_method")?);
                f.insert("payment_method", r.u8("payment_method")?);
                f.insert("card_no", r.fixed_str("card_no", 20)?);
                f.insert("user_id", r.u32("user_id")?);
                f.insert("amount_cents", r.u32("amount_cents")?);
                f.insert("balance_cents", r.u32("balance_cents")?);
                f.insert("transaction_no", r.u32("transaction_no")?);
                f.insert("status", r.u8("status")?);
                f.insert("meal_type", r.u8("meal_type")?);
                let command = consume_command(command_code)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("consume-{command_code:#04x}"));
                (MessageType::ConsumeRecord, command)
            }
            TYPE_DEVICE_STATUS => {
                f.insert("device_status", r.u8("device_status")?);
                f.insert("online", r.u8("online")? != 0);
                f.insert("pending_records", r.u32("pending_records")?);
                f.insert("firmware", r.u16("firmware")?);
                (MessageType::DeviceStatus, "device-status".to_string())
            }
            TYPE_HEARTBEAT => {
                f.insert("interval_secs", r.u16("interval_secs")?);
                f.insert("uptime_secs", r.u32("uptime_secs")?);
                (MessageType::Heartbeat, "heartbeat".to_string())
            }
            TYPE_ACCOUNT_QUERY => {
                f.insert("card_no", r.fixed_str("card_no", 20)?);
                f.insert("user_id", r.u32("user_id")?);
                (MessageType::AccountQuery, "account-query".to_string())
            }
            TYPE_RECHARGE | TYPE_SUBSIDY => {
                f.insert("card_no", r.fixed_str("card_no", 20)?);
                f.insert("user_id", r.u32("user_id")?);
                f.insert("amount_cents", r.u32("amount_cents")?);
                f.insert("balance_cents", r.u32("balance_cents")?);
                f.insert("method", r.u8("method")?);
                if type_code == TYPE_RECHARGE {
                    (MessageType::RechargeRecord, "recharge".to_string())
                } else {
                    (MessageType::SubsidyRecord, "subsidy".to_string())
                }
            }
            TYPE_ERROR_REPORT => {
                f.insert("error_code", r.u32("error_code")?);
                f.insert("error_level", r.u8("error_level")?);
                f.insert("description", r.text_u16("description")?);
                (MessageType::ErrorReport, "error-report".to_string())
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

impl ProtocolHandler for ZktecoConsumeHandler {
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
        if message.device_code.is_empty() {
            return Err(ValidationIssue::new("device", "empty device id"));
        }
        match message.message_type {
            MessageType::Unknown => Err(ValidationIssue::new(
                "message_type",
                format!("undefined type {:#04x}", message.type_code),
            )),
            MessageType::ConsumeRecord => {
                if consume_command(message.command_code).is_none() {
                    return Err(ValidationIssue::new(
                        "command",
                        format!("undefined consume command {:#04x}", message.command_code),
                    ));
                }
                positive_amount(message)
            }
            MessageType::RechargeRecord | MessageType::SubsidyRecord => positive_amount(message),
            _ => Ok(()),
        }
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
            MessageType::ConsumeRecord if consume_command(message.command_code).is_none() => {
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

fn positive_amount(message: &ProtocolMessage) -> Result<(), ValidationIssue> {
    match message.fields.get_u64("amount_cents") {
        Some(amount) if amount > 0 => Ok(()),
        _ => Err(ValidationIssue::new("amount", "amount must be greater than zero")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseErrorCode;
    use chrono::Duration;

    fn record(amount: u32) -> ConsumeRecord<'static> {
        ConsumeRecord {
            card_no: "0012345678",
            user_id: 1001,
            amount_cents: amount,
            balance_cents: 50_000,
            transaction_no: 88,
            meal_type: 2,
        }
    }

    #[test]
    fn consume_record_parses() {
        let h = ZktecoConsumeHandler::new();
        let msg = h.parse_bytes(&h.consume_record("POS-01", 5, &record(1250))).unwrap();
        assert_eq!(msg.message_type, MessageType::ConsumeRecord);
        assert_eq!(msg.command, "consume");
        assert_eq!(msg.device_code, "POS-01");
        assert_eq!(msg.fields.get_text("card_no"), Some("0012345678"));
        assert_eq!(msg.fields.get_u64("amount_cents"), Some(1250));
        assert!(h.validate(&msg));
    }

    #[test]
    fn zero_amount_fails_validation() {
        let h = ZktecoConsumeHandler::new();
        let msg = h.parse_bytes(&h.consume_record("POS-01", 5, &record(0))).unwrap();
        assert_eq!(h.check(&msg).unwrap_err().check, "amount");
    }

    #[test]
    fn old_offline_records_are_accepted() {
        let h = ZktecoConsumeHandler::new();
        let mut body = vec![0u8; 41];
        body[27] = 0x10; // amount_cents low byte
        let frame = h.encode_frame(
            "POS-01",
            TYPE_CONSUME_RECORD,
            CMD_OFFLINE_CONSUME,
            1,
            Utc::now() - Duration::days(3),
            &body,
        );
        let msg = h.parse_bytes(&frame).unwrap();
        assert_eq!(msg.command, "offline-consume");
        assert!(h.validate(&msg));
    }

    #[test]
    fn access_frame_is_bad_magic() {
        let access = super::super::EntropyAccessHandler::new();
        let frame = access.door_control("ACCESS_001", 1, super::super::DoorCommand::Open, 1, 3);
        let err = ZktecoConsumeHandler::new().parse_bytes(&frame).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::BadMagic);
    }

    #[test]
    fn ack_echoes_sequence() {
        let h = ZktecoConsumeHandler::new();
        let req = h.parse_bytes(&h.consume_record("POS-01", 31337, &record(900))).unwrap();
        let ack = h.parse_bytes(&h.build_response(&req, true, "", "")).unwrap();
        assert_eq!(ack.message_type, MessageType::Ack);
        assert_eq!(ack.sequence, Some(31337));
        assert_eq!(ack.device_code, "POS-01");
        assert_eq!(ack.fields.get_u64("result"), Some(0));
    }
}
