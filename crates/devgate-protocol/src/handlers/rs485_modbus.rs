//! Generic RS485 terminal speaking Modbus-RTU framing (`RS485_MODBUS_V1.0`).
//!
//! ```text
//! address(1) function(1) data(N) crc16(2, low byte first)
//! ```
//!
//! RTU has no length field; frames are delimited by line silence, which the
//! serial transport resolves. This handler only ever sees complete frames.

use bytes::Bytes;
use chrono::Utc;
use devgate_core::{DeviceId, DeviceType, Manufacturer, ProtocolType};

use crate::checksum::{append_crc16, verify_crc16};
use crate::error::{ParseError, ParseErrorCode, ProcessError, ProcessErrorCode, ValidationIssue};
use crate::framing::Framing;
use crate::handler::{HandlerDescriptor, MessageSink, ProtocolHandler, decode_hex, deliver};
use crate::message::{Fields, MessageType, ProtocolMessage};

pub const PROTOCOL_TYPE: &str = "RS485_MODBUS_V1.0";

pub const FC_READ_COILS: u8 = 0x01;
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

const EXCEPTION_FLAG: u8 = 0x80;

/// Smallest valid frame: address, function, CRC.
pub const MIN_FRAME_LEN: usize = 4;

/// Largest RTU frame on the wire.
pub const MAX_FRAME_LEN: usize = 256;

/// Standard exception codes.
pub const EX_ILLEGAL_FUNCTION: u8 = 0x01;
pub const EX_ILLEGAL_DATA_ADDRESS: u8 = 0x02;
pub const EX_ILLEGAL_DATA_VALUE: u8 = 0x03;
pub const EX_SERVER_DEVICE_FAILURE: u8 = 0x04;

fn function_name(function: u8) -> Option<&'static str> {
    match function {
        FC_READ_COILS => Some("read-coils"),
        FC_READ_DISCRETE_INPUTS => Some("read-discrete-inputs"),
        FC_READ_HOLDING_REGISTERS => Some("read-holding-registers"),
        FC_READ_INPUT_REGISTERS => Some("read-input-registers"),
        FC_WRITE_SINGLE_COIL => Some("write-single-coil"),
        FC_WRITE_SINGLE_REGISTER => Some("write-single-register"),
        FC_WRITE_MULTIPLE_COILS => Some("write-multiple-coils"),
        FC_WRITE_MULTIPLE_REGISTERS => Some("write-multiple-registers"),
        _ => None,
    }
}

/// Map a failure code to the exception code sent back on the bus.
pub fn exception_code_for(error_code: &str) -> u8 {
    match error_code {
        "ILLEGAL_FUNCTION" => EX_ILLEGAL_FUNCTION,
        "ILLEGAL_DATA_ADDRESS" => EX_ILLEGAL_DATA_ADDRESS,
        "ILLEGAL_DATA_VALUE" => EX_ILLEGAL_DATA_VALUE,
        c if c == ProcessErrorCode::UnsupportedCommand.as_str() => EX_ILLEGAL_FUNCTION,
        _ => EX_SERVER_DEVICE_FAILURE,
    }
}

/// Build an RTU frame with CRC.
pub fn encode_rtu(address: u8, function: u8, data: &[u8]) -> Bytes {
    let mut frame = Vec::with_capacity(data.len() + MIN_FRAME_LEN);
    frame.push(address);
    frame.push(function);
    frame.extend_from_slice(data);
    append_crc16(&mut frame);
    Bytes::from(frame)
}

/// `FC 0x03` request for `count` registers starting at `start`.
pub fn read_holding_registers(address: u8, start: u16, count: u16) -> Bytes {
    let mut data = [0u8; 4];
    data[..2].copy_from_slice(&start.to_be_bytes());
    data[2..].copy_from_slice(&count.to_be_bytes());
    encode_rtu(address, FC_READ_HOLDING_REGISTERS, &data)
}

/// `FC 0x06` request writing `value` to `register`.
pub fn write_single_register(address: u8, register: u16, value: u16) -> Bytes {
    let mut data = [0u8; 4];
    data[..2].copy_from_slice(&register.to_be_bytes());
    data[2..].copy_from_slice(&value.to_be_bytes());
    encode_rtu(address, FC_WRITE_SINGLE_REGISTER, &data)
}

#[derive(Debug, Clone)]
pub struct Rs485ModbusHandler {
    descriptor: HandlerDescriptor,
}

impl Default for Rs485ModbusHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Rs485ModbusHandler {
    pub fn new() -> Self {
        let capabilities = [
            FC_READ_COILS,
            FC_READ_DISCRETE_INPUTS,
            FC_READ_HOLDING_REGISTERS,
            FC_READ_INPUT_REGISTERS,
            FC_WRITE_SINGLE_COIL,
            FC_WRITE_SINGLE_REGISTER,
            FC_WRITE_MULTIPLE_COILS,
            FC_WRITE_MULTIPLE_REGISTERS,
        ]
        .into_iter()
        .filter_map(function_name)
        .map(str::to_string)
        .collect();

        Self {
            descriptor: HandlerDescriptor {
                protocol_type: ProtocolType::from_static(PROTOCOL_TYPE),
                manufacturer: Manufacturer::new("Generic"),
                version: "1.0".to_string(),
                device_type: DeviceType::Rs485Terminal,
                capabilities,
                models: vec!["RS485-IO".to_string(), "RS485-READER".to_string()],
                priority: 1,
            },
        }
    }
}

fn be_u16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

impl ProtocolHandler for Rs485ModbusHandler {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    fn framing(&self) -> Framing {
        Framing::Whole
    }

    fn parse_bytes(&self, raw: &[u8]) -> Result<ProtocolMessage, ParseError> {
        if raw.is_empty() {
            return Err(ParseError::new(ParseErrorCode::EmptyFrame, "no bytes", raw));
        }
        if raw.len() < MIN_FRAME_LEN {
            return Err(ParseError::too_short(MIN_FRAME_LEN, raw));
        }
        if let Err((expected, actual)) = verify_crc16(raw) {
            return Err(ParseError::checksum(expected.into(), actual.into(), raw));
        }

        let address = raw[0];
        let function = raw[1];
        let data = &raw[2..raw.len() - 2];
        let mut fields = Fields::new()
            .with("address", address)
            .with("function", function & !EXCEPTION_FLAG);

        let (message_type, command) = if function & EXCEPTION_FLAG != 0 {
            let Some(&code) = data.first() else {
                return Err(ParseError::new(
                    ParseErrorCode::BodyTruncated,
                    "exception frame without code",
                    raw,
                ));
            };
            fields.insert("exception_code", code);
            (MessageType::Exception, "exception".to_string())
        } else {
            match function {
                FC_READ_COILS..=FC_READ_INPUT_REGISTERS => {
                    if let Some((&count, values)) = data.split_first()
                        && usize::from(count) == values.len()
                    {
                        fields.insert("direction", "response");
                        fields.insert("byte_count", count);
                        fields.insert("values", hex::encode(values));
                    } else if data.len() == 4 {
                        fields.insert("direction", "request");
                        fields.insert("start", be_u16(data, 0));
                        fields.insert("quantity", be_u16(data, 2));
                    } else {
                        fields.insert("direction", "unknown");
                        fields.insert("payload", hex::encode(data));
                    }
                    (MessageType::RegisterRead, command_for(function))
                }
                FC_WRITE_SINGLE_COIL | FC_WRITE_SINGLE_REGISTER => {
                    if data.len() < 4 {
                        return Err(ParseError::new(
                            ParseErrorCode::BodyTruncated,
                            format!("write needs 4 data bytes, got {}", data.len()),
                            raw,
                        ));
                    }
                    fields.insert("register", be_u16(data, 0));
                    fields.insert("value", be_u16(data, 2));
                    (MessageType::RegisterWrite, command_for(function))
                }
                FC_WRITE_MULTIPLE_COILS | FC_WRITE_MULTIPLE_REGISTERS => {
                    if data.len() < 4 {
                        return Err(ParseError::new(
                            ParseErrorCode::BodyTruncated,
                            format!("write needs at least 4 data bytes, got {}", data.len()),
                            raw,
                        ));
                    }
                    fields.insert("start", be_u16(data, 0));
                    fields.insert("quantity", be_u16(data, 2));
                    if data.len() > 4 {
                        fields.insert("direction", "request");
                        fields.insert("byte_count", data[4]);
                        fields.insert("values", hex::encode(&data[5..]));
                    } else {
                        fields.insert("direction", "response");
                    }
                    (MessageType::RegisterWrite, command_for(function))
                }
                other => {
                    fields.insert("payload", hex::encode(data));
                    (MessageType::Unknown, format!("function-{other:#04x}"))
                }
            }
        };

        Ok(ProtocolMessage {
            protocol_type: self.descriptor.protocol_type.clone(),
            message_type,
            type_code: function,
            command_code: function & !EXCEPTION_FLAG,
            command,
            device_code: address.to_string(),
            sequence: None,
            timestamp: Utc::now(),
            declared_length: None,
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
        if verify_crc16(&message.raw).is_err() {
            return Err(ValidationIssue::new("checksum", "CRC-16 trailer mismatch"));
        }
        let address = message.fields.get_u64("address").unwrap_or(0);
        if !(1..=247).contains(&address) {
            return Err(ValidationIssue::new(
                "address",
                format!("unit address {address} outside 1-247"),
            ));
        }
        if function_name(message.command_code).is_none() {
            return Err(ValidationIssue::new(
                "function",
                format!("undefined function {:#04x}", message.type_code),
            ));
        }
        if message.message_type == MessageType::RegisterRead
            && message.fields.get_text("direction") == Some("unknown")
        {
            return Err(ValidationIssue::new(
                "byte_count",
                "read frame is neither a request nor a consistent response",
            ));
        }
        if let (Some(count), Some(values)) = (
            message.fields.get_u64("byte_count"),
            message.fields.get_text("values"),
        ) && count as usize != values.len() / 2
        {
            return Err(ValidationIssue::new(
                "byte_count",
                format!("byte count {count} but {} data bytes", values.len() / 2),
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
        if message.message_type == MessageType::Unknown {
            return Err(ProcessError::unsupported(&message.command));
        }
        deliver(sink, device_id, message)
    }

    fn build_response(
        &self,
        request: &ProtocolMessage,
        success: bool,
        error_code: &str,
        _error_message: &str,
    ) -> Bytes {
        let address = request.raw.first().copied().unwrap_or(0);
        let function = request.command_code;
        if success {
            let data_end = request.raw.len().saturating_sub(2);
            let data = request.raw.get(2..data_end).unwrap_or_default();
            let echo = &data[..data.len().min(4)];
            encode_rtu(address, function, echo)
        } else {
            encode_rtu(
                address,
                function | EXCEPTION_FLAG,
                &[exception_code_for(error_code)],
            )
        }
    }
}

fn command_for(function: u8) -> String {
    function_name(function)
        .map(str::to_string)
        .unwrap_or_else(|| format!("function-{function:#04x}"))
}
