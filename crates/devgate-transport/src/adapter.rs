//! Uniform transport contract and its enum dispatch.
//!
//! Native `async fn` in traits is not object safe, so adapters are collected
//! as [`AnyTransport`] values rather than `Box<dyn TransportAdapter>`.

#![allow(async_fn_in_trait)]

use crate::http::HttpTransport;
use crate::rs485::Rs485Transport;
use crate::tcp::TcpTransport;
use crate::types::{CommandResult, DataResult, DeviceCommand, DeviceEndpoint, Endpoint};

/// Physical transport family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Tcp,
    Rs485,
    Http,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Rs485 => "RS485",
            Self::Http => "HTTP",
        }
    }
}

pub const RS485_PRIORITY: u8 = 30;
pub const TCP_PRIORITY: u8 = 20;
pub const HTTP_PRIORITY: u8 = 10;

/// Contract shared by every transport.
///
/// Neither operation returns an error: failures, timeouts included, come back
/// as a result with `success == false`.
pub trait TransportAdapter {
    fn protocol_type(&self) -> TransportKind;

    /// Preference when more than one transport can reach a device; higher wins.
    fn priority(&self) -> u8;

    fn supports(&self, endpoint: &Endpoint) -> bool;

    async fn send_command(&self, device: &DeviceEndpoint, command: &DeviceCommand)
    -> CommandResult;

    /// Check transport-level integrity of bytes a device sent unprompted.
    async fn receive_data(&self, device: &DeviceEndpoint, raw: &[u8]) -> DataResult;
}

#[derive(Debug)]
#[non_exhaustive]
pub enum AnyTransport {
    Tcp(TcpTransport),
    Rs485(Rs485Transport),
    Http(HttpTransport),
}

impl TransportAdapter for AnyTransport {
    fn protocol_type(&self) -> TransportKind {
        match self {
            Self::Tcp(t) => t.protocol_type(),
            Self::Rs485(t) => t.protocol_type(),
            Self::Http(t) => t.protocol_type(),
        }
    }

    fn priority(&self) -> u8 {
        match self {
            Self::Tcp(t) => t.priority(),
            Self::Rs485(t) => t.priority(),
            Self::Http(t) => t.priority(),
        }
    }

    fn supports(&self, endpoint: &Endpoint) -> bool {
        match self {
            Self::Tcp(t) => t.supports(endpoint),
            Self::Rs485(t) => t.supports(endpoint),
            Self::Http(t) => t.supports(endpoint),
        }
    }

    async fn send_command(
        &self,
        device: &DeviceEndpoint,
        command: &DeviceCommand,
    ) -> CommandResult {
        match self {
            Self::Tcp(t) => t.send_command(device, command).await,
            Self::Rs485(t) => t.send_command(device, command).await,
            Self::Http(t) => t.send_command(device, command).await,
        }
    }

    async fn receive_data(&self, device: &DeviceEndpoint, raw: &[u8]) -> DataResult {
        match self {
            Self::Tcp(t) => t.receive_data(device, raw).await,
            Self::Rs485(t) => t.receive_data(device, raw).await,
            Self::Http(t) => t.receive_data(device, raw).await,
        }
    }
}

impl From<TcpTransport> for AnyTransport {
    fn from(t: TcpTransport) -> Self {
        Self::Tcp(t)
    }
}

impl From<Rs485Transport> for AnyTransport {
    fn from(t: Rs485Transport) -> Self {
        Self::Rs485(t)
    }
}

impl From<HttpTransport> for AnyTransport {
    fn from(t: HttpTransport) -> Self {
        Self::Http(t)
    }
}

/// Transports ordered by priority.
#[derive(Debug, Default)]
pub struct TransportSet {
    transports: Vec<AnyTransport>,
}

impl TransportSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, transport: impl Into<AnyTransport>) -> Self {
        self.transports.push(transport.into());
        self.transports
            .sort_by_key(|t| std::cmp::Reverse(t.priority()));
        self
    }

    /// Highest-priority transport able to reach `endpoint`.
    pub fn select(&self, endpoint: &Endpoint) -> Option<&AnyTransport> {
        self.transports.iter().find(|t| t.supports(endpoint))
    }

    pub fn kinds(&self) -> Vec<TransportKind> {
        self.transports.iter().map(|t| t.protocol_type()).collect()
    }
}
