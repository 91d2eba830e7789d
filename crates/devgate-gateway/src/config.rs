//! Gateway configuration.
//!
//! Sources, lowest priority first:
//!
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. `DEVGATE_*` environment variables, `__` separating nested keys
//!    (`DEVGATE_LOGGING__LEVEL=debug`, `DEVGATE_DISCOVERY__FAN_OUT=8`)
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [[listeners]]
//! bind = "0.0.0.0:4370"
//! protocol_type = "ACCESS_ENTROPY_V4.8"
//!
//! [[push_listeners]]
//! bind = "0.0.0.0:8081"
//! protocol_type = "ATTENDANCE_ENTROPY_V4.0"
//! path = "/iclock/cdata"
//!
//! [transport.buses.bus0]
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//!
//! [[routes]]
//! device_type = "access_controller"
//! manufacturer = "Entropy"
//! protocol_type = "ACCESS_ENTROPY_V4.8"
//! ```
//!
//! A `routes` list in the file replaces the built-in routes entirely.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use devgate_core::constants::{DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_CONNECTIONS, ENV_PREFIX};
use devgate_core::{DeviceType, Error, ProtocolType};
use devgate_discovery::DiscoveryConfig;
use devgate_protocol::registry::default_handlers;
use devgate_protocol::{DEFAULT_ROUTES, HandlerRegistry};
use devgate_transport::{
    HttpTransport, HttpTransportConfig, Rs485Bus, Rs485Transport, SerialSettings, TcpTransport,
    TcpTransportConfig, TransportSet,
};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::telemetry::LoggingConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub logging: LoggingConfig,
    pub listeners: Vec<ListenerConfig>,
    pub push_listeners: Vec<PushListenerConfig>,
    pub transport: TransportConfig,
    pub discovery: DiscoveryConfig,
    pub routes: Vec<RouteConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            listeners: Vec::new(),
            push_listeners: Vec::new(),
            transport: TransportConfig::default(),
            discovery: DiscoveryConfig::default(),
            routes: DEFAULT_ROUTES
                .iter()
                .map(|(device_type, manufacturer, protocol_type)| RouteConfig {
                    device_type: *device_type,
                    manufacturer: manufacturer.to_string(),
                    protocol_type: protocol_type.to_string(),
                })
                .collect(),
        }
    }
}

/// One TCP listener serving exactly one protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub bind: SocketAddr,
    pub protocol_type: String,
    pub max_connections: usize,
    /// Connections silent for this long are closed.
    pub idle_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 4370)),
            protocol_type: "ACCESS_ENTROPY_V4.8".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
        }
    }
}

impl ListenerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// One HTTP listener taking pushed frames, one request body per frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushListenerConfig {
    pub bind: SocketAddr,
    pub protocol_type: String,
    pub path: String,
    pub max_body_bytes: usize,
}

impl Default for PushListenerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8081)),
            protocol_type: "ATTENDANCE_ENTROPY_V4.0".to_string(),
            path: "/iclock/cdata".to_string(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub tcp: TcpTransportConfig,
    pub http: HttpTransportConfig,
    /// RS485 lines by name; devices address them as `Endpoint::Serial { bus, .. }`.
    pub buses: BTreeMap<String, SerialSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub device_type: DeviceType,
    pub manufacturer: String,
    pub protocol_type: String,
}

impl GatewayConfig {
    /// The merged provider chain, before extraction.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(GatewayConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and check the configuration.
    ///
    /// # Errors
    /// A missing file, a value that does not deserialize, or a config that
    /// fails [`Self::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path
            && !path.is_file()
        {
            return Err(Error::config(format!("config file {} not found", path.display())).into());
        }
        let config: Self = Self::figment(path).extract()?;
        config.validate()?;
        debug!(
            listeners = config.listeners.len(),
            push_listeners = config.push_listeners.len(),
            buses = config.transport.buses.len(),
            routes = config.routes.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Structural checks that do not need the registry. Binds on port 0
    /// may repeat since each gets its own ephemeral port.
    pub fn validate(&self) -> Result<()> {
        let mut binds = HashSet::new();
        let all_binds = self
            .listeners
            .iter()
            .map(|l| l.bind)
            .chain(self.push_listeners.iter().map(|l| l.bind));
        for bind in all_binds {
            if bind.port() != 0 && !binds.insert(bind) {
                return Err(Error::config(format!("two listeners bind {bind}")).into());
            }
        }
        for listener in &self.listeners {
            ProtocolType::new(&listener.protocol_type)?;
            if listener.max_connections == 0 {
                return Err(Error::config(format!(
                    "listener {} allows no connections",
                    listener.bind
                ))
                .into());
            }
            if listener.idle_timeout_secs == 0 {
                return Err(Error::config(format!(
                    "listener {} has a zero idle timeout",
                    listener.bind
                ))
                .into());
            }
        }
        for push in &self.push_listeners {
            ProtocolType::new(&push.protocol_type)?;
            let plain = push.path.starts_with('/')
                && !push.path.contains(|c: char| matches!(c, ':' | '*' | '{' | '}'));
            if !plain {
                return Err(Error::config(format!(
                    "push listener {} path {:?} must be a plain absolute path",
                    push.bind, push.path
                ))
                .into());
            }
            if push.max_body_bytes == 0 {
                return Err(Error::config(format!(
                    "push listener {} accepts no body",
                    push.bind
                ))
                .into());
            }
        }
        if self.discovery.fan_out == 0 {
            return Err(Error::config("discovery.fan_out must be at least 1").into());
        }
        Ok(())
    }

    /// Built-in handlers plus the configured routes.
    ///
    /// # Errors
    /// Duplicate routes, or a route naming an unregistered protocol type.
    pub fn registry(&self) -> Result<HandlerRegistry> {
        let builder = self.routes.iter().try_fold(default_handlers()?, |builder, route| {
            builder.route(route.device_type, route.manufacturer.as_str(), &route.protocol_type)
        })?;
        Ok(builder.build()?)
    }

    /// Outbound transports: TCP and HTTP always, RS485 when buses are configured.
    pub fn transports(&self) -> Result<TransportSet> {
        let mut set = TransportSet::new()
            .with(TcpTransport::new(self.transport.tcp.clone()))
            .with(HttpTransport::new(self.transport.http.clone())?);
        if !self.transport.buses.is_empty() {
            let rs485 = self
                .transport
                .buses
                .iter()
                .fold(Rs485Transport::new(), |rs485, (name, settings)| {
                    rs485.with_bus(Rs485Bus::new(name.as_str(), settings.clone()))
                });
            set = set.with(rs485);
        }
        Ok(set)
    }
}
