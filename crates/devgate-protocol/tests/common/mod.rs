//! Shared fixtures for protocol integration tests.

#![allow(dead_code)]

use bytes::Bytes;
use devgate_core::DeviceId;
use devgate_protocol::handlers::rs485_modbus;
use devgate_protocol::{
    ConsumeRecord, DoorCommand, EntropyAccessHandler, HandlerRegistry, ZktecoConsumeHandler,
    default_registry,
};

pub const ACCESS_SN: &str = "ACCESS_001";
pub const POS_ID: &str = "POS_0007";

pub fn registry() -> HandlerRegistry {
    default_registry().expect("built-in registry is consistent")
}

pub fn device(id: &str) -> DeviceId {
    DeviceId::new(id).expect("valid device id")
}

pub fn open_door_frame(sequence: u32) -> Bytes {
    EntropyAccessHandler::new().door_control(ACCESS_SN, sequence, DoorCommand::Open, 1, 5)
}

pub fn consume_frame(sequence: u32, amount_cents: u32) -> Bytes {
    ZktecoConsumeHandler::new().consume_record(
        POS_ID,
        sequence,
        &ConsumeRecord {
            card_no: "0012345678",
            user_id: 42,
            amount_cents,
            balance_cents: 10_000,
            transaction_no: 9001,
            meal_type: 2,
        },
    )
}

pub fn modbus_read(address: u8) -> Bytes {
    rs485_modbus::read_holding_registers(address, 0x0000, 2)
}

pub const ATTENDANCE_PUSH: &str = "SN=CKJ1234567\n1001\t2024-03-01 08:59:12\t0\t1\t0\t0\t0\n";

/// Every well-formed sample, paired with the protocol type that owns it.
pub fn well_formed_samples() -> Vec<(&'static str, Bytes)> {
    vec![
        ("ACCESS_ENTROPY_V4.8", open_door_frame(1)),
        ("CONSUME_ZKTECO_V1.0", consume_frame(1, 1250)),
        (
            "ATTENDANCE_ENTROPY_V4.0",
            Bytes::from_static(ATTENDANCE_PUSH.as_bytes()),
        ),
        ("RS485_MODBUS_V1.0", modbus_read(3)),
    ]
}
