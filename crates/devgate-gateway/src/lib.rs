//! Devgate gateway process.
//!
//! Ties the workspace together: configuration loading, logging setup, TCP
//! listeners that feed device frames through protocol handlers, HTTP push
//! listeners for devices that post whole batches, and the outbound transport
//! set used to command devices.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use devgate_gateway::{Gateway, GatewayConfig};
//! use devgate_protocol::ChannelSink;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> devgate_gateway::Result<()> {
//! let config = GatewayConfig::load(Some("devgate.toml".as_ref()))?;
//! let (sink, mut events) = ChannelSink::channel(1024);
//! let gateway = Gateway::bind(&config, Arc::new(sink)).await?;
//!
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         println!("{}: {}", event.device_id, event.message.command);
//!     }
//! });
//! gateway.run(CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod push;
pub mod server;
pub mod telemetry;

pub use config::{GatewayConfig, ListenerConfig, PushListenerConfig, RouteConfig, TransportConfig};
pub use dispatch::{Dispatcher, FrameOutcome};
pub use error::{GatewayError, Result};
pub use push::PushListener;
pub use server::{Gateway, Listener};
pub use telemetry::LoggingConfig;
