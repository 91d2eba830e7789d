//! Inbound TCP listeners and the gateway that owns them.
//!
//! ```text
//! device ──TCP──> Listener (one per configured bind, one protocol each)
//!                    │  accept, at most `max_connections` at once
//!                    └─> connection task
//!                          │  Framed<TcpStream, FrameCodec>
//!                          └─> Dispatcher::handle ──> reply written back
//! ```
//!
//! A connection ends when the peer closes it, a read or write fails, it stays
//! silent past the idle timeout, or the gateway shuts down. Bad frames never
//! end a connection.
//!
//! A TCP stream only carries frames whose boundaries the codec can find, so
//! protocols without them are served by [`PushListener`]s instead.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use devgate_core::constants::DEFAULT_TCP_TIMEOUT_MS;
use devgate_core::{DeviceId, Error, ProtocolType};
use devgate_protocol::{FrameCodec, HandlerRegistry, MessageSink, ProtocolHandler};
use devgate_transport::{
    CommandResult, DeviceCommand, DeviceEndpoint, TransportAdapter, TransportError,
    TransportResult, TransportSet,
};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{GatewayConfig, ListenerConfig};
use crate::dispatch::Dispatcher;
use crate::error::{GatewayError, Result};
use crate::push::PushListener;

const WRITE_TIMEOUT: Duration = Duration::from_millis(DEFAULT_TCP_TIMEOUT_MS);

/// A bound TCP listener serving one protocol.
#[derive(Debug)]
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ListenerConfig,
    dispatcher: Dispatcher,
    slots: Arc<Semaphore>,
}

impl Listener {
    /// # Errors
    /// A configuration error when the protocol has no frame boundaries,
    /// [`GatewayError::Bind`] when the address cannot be bound.
    pub async fn bind(config: ListenerConfig, dispatcher: Dispatcher) -> Result<Self> {
        if dispatcher.handler().framing().is_boundary_ignorant() {
            return Err(Error::config(format!(
                "{} has no frame boundaries and cannot be served over TCP at {}; use a push listener",
                dispatcher.handler().protocol_type(),
                config.bind
            ))
            .into());
        }
        let listener = TcpListener::bind(config.bind)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: config.bind,
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            protocol = %dispatcher.handler().protocol_type(),
            max_connections = config.max_connections,
            idle_timeout_secs = config.idle_timeout_secs,
            "Listener bound"
        );
        Ok(Self {
            listener,
            local_addr,
            slots: Arc::new(Semaphore::new(config.max_connections)),
            config,
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn protocol_type(&self) -> &ProtocolType {
        self.dispatcher.handler().protocol_type()
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.config.max_connections - self.slots.available_permits()
    }

    /// Accept connections until `shutdown` fires, then wait for the open
    /// connections to close.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut connections = JoinSet::new();

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            while connections.try_join_next().is_some() {}

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(addr = %self.local_addr, error = %e, "Accept failed");
                    continue;
                }
            };

            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                warn!(
                    addr = %self.local_addr,
                    peer = %peer,
                    max_connections = self.config.max_connections,
                    "Connection rejected: maximum connections reached"
                );
                drop(stream);
                continue;
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
            }

            let dispatcher = self.dispatcher.clone();
            let idle = self.config.idle_timeout();
            let shutdown = shutdown.clone();
            connections.spawn(async move {
                let _permit = permit;
                serve_connection(stream, peer, dispatcher, idle, shutdown).await;
            });
        }

        info!(
            addr = %self.local_addr,
            open = connections.len(),
            "Listener stopping"
        );
        while connections.join_next().await.is_some() {}
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    idle: Duration,
    shutdown: CancellationToken,
) {
    let fallback = match DeviceId::new(&peer.to_string()) {
        Ok(id) => id,
        Err(e) => {
            warn!(peer = %peer, error = %e, "Cannot name peer");
            return;
        }
    };
    let protocol = dispatcher.handler().protocol_type().clone();
    info!(peer = %peer, protocol = %protocol, "Device connected");

    let mut framed = Framed::new(stream, FrameCodec::new(dispatcher.handler().framing()));
    let mut frames = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = timeout(idle, framed.next()) => next,
        };
        let frame = match next {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                warn!(peer = %peer, error = %e, "Read failed");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                info!(peer = %peer, idle_secs = idle.as_secs(), "Closing idle connection");
                break;
            }
        };
        frames += 1;

        let outcome = dispatcher.handle(&frame, &fallback);
        trace!(peer = %peer, outcome = outcome.label(), len = frame.len(), "Frame handled");

        if let Some(reply) = outcome.reply() {
            match timeout(WRITE_TIMEOUT, framed.send(reply.clone())).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(peer = %peer, error = %e, "Reply write failed");
                    break;
                }
                Err(_) => {
                    warn!(peer = %peer, "Reply write timed out");
                    break;
                }
            }
        }
    }

    info!(
        peer = %peer,
        protocol = %protocol,
        frames,
        discarded_bytes = framed.codec().discarded_bytes(),
        "Device disconnected"
    );
}

/// Listeners, handler registry and outbound transports of one process.
#[derive(Debug)]
pub struct Gateway {
    registry: Arc<HandlerRegistry>,
    transports: TransportSet,
    listeners: Vec<Listener>,
    push_listeners: Vec<PushListener>,
}

impl Gateway {
    /// Build the registry and transports and bind every listener.
    ///
    /// # Errors
    /// Any configuration error, no listeners configured, or a failed bind.
    pub async fn bind(config: &GatewayConfig, sink: Arc<dyn MessageSink>) -> Result<Self> {
        config.validate()?;
        if config.listeners.is_empty() && config.push_listeners.is_empty() {
            return Err(Error::MissingConfig("listeners".to_string()).into());
        }
        let registry = Arc::new(config.registry()?);
        let transports = config.transports()?;

        let mut listeners = Vec::with_capacity(config.listeners.len());
        for listener in &config.listeners {
            let protocol = ProtocolType::new(&listener.protocol_type)?;
            let dispatcher = Dispatcher::for_protocol(&registry, &protocol, Arc::clone(&sink))?;
            listeners.push(Listener::bind(listener.clone(), dispatcher).await?);
        }
        let mut push_listeners = Vec::with_capacity(config.push_listeners.len());
        for push in &config.push_listeners {
            let protocol = ProtocolType::new(&push.protocol_type)?;
            let dispatcher = Dispatcher::for_protocol(&registry, &protocol, Arc::clone(&sink))?;
            push_listeners.push(PushListener::bind(push.clone(), dispatcher).await?);
        }

        info!(
            listeners = listeners.len(),
            push_listeners = push_listeners.len(),
            handlers = registry.all_handlers().len(),
            transports = ?transports.kinds(),
            "Gateway ready"
        );
        Ok(Self {
            registry,
            transports,
            listeners,
            push_listeners,
        })
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn transports(&self) -> &TransportSet {
        &self.transports
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    pub fn push_listeners(&self) -> &[PushListener] {
        &self.push_listeners
    }

    /// Addresses of the TCP listeners, in configuration order.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(Listener::local_addr).collect()
    }

    /// Addresses of the push listeners, in configuration order.
    pub fn push_addrs(&self) -> Vec<SocketAddr> {
        self.push_listeners.iter().map(PushListener::local_addr).collect()
    }

    /// Send a command over the best transport for the device's endpoint.
    pub async fn send_command(
        &self,
        device: &DeviceEndpoint,
        command: &DeviceCommand,
    ) -> CommandResult {
        let Some(transport) = self.transports.select(&device.endpoint) else {
            let error = TransportError::UnsupportedEndpoint(device.endpoint.to_string());
            warn!(device = %device.device_id, endpoint = %device.endpoint, "No transport for endpoint");
            return TransportResult::failed(&error, Duration::ZERO);
        };
        let result = transport.send_command(device, command).await;
        debug!(
            device = %device.device_id,
            transport = transport.protocol_type().as_str(),
            command = %command.name,
            success = result.success,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Command sent"
        );
        result
    }

    /// Serve every listener until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        futures::future::join(
            futures::future::join_all(
                self.listeners
                    .iter()
                    .map(|listener| listener.run(shutdown.clone())),
            ),
            futures::future::join_all(
                self.push_listeners
                    .iter()
                    .map(|push| push.run(shutdown.clone())),
            ),
        )
        .await;
        info!("Gateway stopped");
    }
}
