//! Device transports for devgate.
//!
//! Transports own the physical link and know nothing about vendor wire
//! formats beyond where one frame ends:
//!
//! - [`TcpTransport`]: connect, write, read one frame, close
//! - [`Rs485Transport`]: Modbus-RTU framing on a shared serial bus, one
//!   exchange at a time per bus
//! - [`HttpTransport`]: POST the payload, non-2xx is a failure
//!
//! All of them implement [`TransportAdapter`] and report every outcome,
//! timeouts included, as a [`CommandResult`] / [`DataResult`].
//!
//! # Example
//!
//! ```no_run
//! use devgate_core::DeviceId;
//! use devgate_transport::{
//!     DeviceCommand, DeviceEndpoint, Endpoint, TcpTransport, TcpTransportConfig, TransportAdapter,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = TcpTransport::new(TcpTransportConfig::default());
//! let device = DeviceEndpoint::new(
//!     DeviceId::new("ACCESS_001")?,
//!     Endpoint::Tcp { addr: "192.168.1.20:4370".parse()? },
//! );
//! let result = transport
//!     .send_command(&device, &DeviceCommand::new("ping", &b"ping"[..]))
//!     .await;
//! println!("{} in {:?}", result.message, result.elapsed);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod error;
pub mod http;
pub mod rs485;
pub mod tcp;
pub mod types;

pub use adapter::{AnyTransport, TransportAdapter, TransportKind, TransportSet};
pub use error::{FailureKind, Result, TransportError};
pub use http::{HttpTransport, HttpTransportConfig};
pub use rs485::{BusStream, Parity, Rs485Bus, Rs485Transport, SerialSettings};
pub use tcp::{TcpClient, TcpTransport, TcpTransportConfig};
pub use types::{
    CommandResult, DataResult, DeviceCommand, DeviceEndpoint, Endpoint, TransportResult,
};
