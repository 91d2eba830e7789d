use std::net::SocketAddr;

use thiserror::Error;

/// Startup and runtime errors of the gateway process.
///
/// Per-frame failures never surface here; they end as a
/// [`crate::FrameOutcome`] and the connection carries on.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Core(#[from] devgate_core::Error),

    #[error(transparent)]
    Transport(#[from] devgate_transport::TransportError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to initialize logging: {0}")]
    Telemetry(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for GatewayError {
    fn from(e: figment::Error) -> Self {
        Self::Core(devgate_core::Error::config(e.to_string()))
    }
}

impl GatewayError {
    pub fn is_fatal_config(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_fatal_config())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
