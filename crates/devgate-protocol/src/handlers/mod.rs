//! Vendor handlers, one module per wire format.

pub mod binary;
pub mod entropy_access;
pub mod entropy_attendance;
pub mod rs485_modbus;
pub mod zkteco_consume;

pub use entropy_access::{DoorCommand, EntropyAccessHandler};
pub use entropy_attendance::EntropyAttendanceHandler;
pub use rs485_modbus::Rs485ModbusHandler;
pub use zkteco_consume::{ConsumeRecord, ZktecoConsumeHandler};
