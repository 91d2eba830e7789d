//! Protocol handler registry.
//!
//! Built once at startup from an explicit list and read-only afterwards. Two
//! lookup paths exist:
//!
//! ```text
//! "ACCESS_ENTROPY_V4.8" ────────────────────────────────┐
//!                                                       ├──> Arc<AnyProtocolHandler>
//! (AccessController, "entropy") ──route──> protocol ────┘
//! ```
//!
//! Registration mistakes (a protocol type registered twice, a route naming a
//! handler that does not exist) fail [`RegistryBuilder::build`], never a
//! lookup.

use std::collections::HashMap;
use std::sync::Arc;

use devgate_core::{DeviceType, Error, Manufacturer, ProtocolType, Result};
use tracing::{debug, info};

use crate::any::AnyProtocolHandler;
use crate::handler::{HandlerDescriptor, ProtocolHandler};
use crate::handlers::{
    EntropyAccessHandler, EntropyAttendanceHandler, Rs485ModbusHandler, ZktecoConsumeHandler,
    entropy_access, entropy_attendance, rs485_modbus, zkteco_consume,
};

/// Routes installed by [`default_registry`]: device type, manufacturer, protocol type.
pub const DEFAULT_ROUTES: &[(DeviceType, &str, &str)] = &[
    (DeviceType::AccessController, "Entropy", entropy_access::PROTOCOL_TYPE),
    (DeviceType::AttendanceClock, "Entropy", entropy_attendance::PROTOCOL_TYPE),
    (DeviceType::ConsumePos, "ZKTeco", zkteco_consume::PROTOCOL_TYPE),
    (DeviceType::Rs485Terminal, "Generic", rs485_modbus::PROTOCOL_TYPE),
];

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    handlers: Vec<AnyProtocolHandler>,
    routes: Vec<((DeviceType, Manufacturer), ProtocolType)>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler.
    ///
    /// # Errors
    /// `Error::DuplicateProtocolType` if a handler with the same protocol type
    /// is already registered.
    pub fn register(mut self, handler: impl Into<AnyProtocolHandler>) -> Result<Self> {
        let handler = handler.into();
        let protocol_type = handler.protocol_type();
        if self.handlers.iter().any(|h| h.protocol_type() == protocol_type) {
            return Err(Error::DuplicateProtocolType(protocol_type.to_string()));
        }
        self.handlers.push(handler);
        Ok(self)
    }

    /// Map a (device type, manufacturer) pair to a protocol type.
    ///
    /// The target is checked at [`Self::build`], so routes may be declared
    /// before their handler.
    ///
    /// # Errors
    /// `Error::InvalidProtocolType` for a malformed code, `Error::DuplicateRoute`
    /// if the pair is already routed.
    pub fn route(
        mut self,
        device_type: DeviceType,
        manufacturer: impl Into<Manufacturer>,
        protocol_type: &str,
    ) -> Result<Self> {
        let key = (device_type, manufacturer.into());
        let protocol_type = ProtocolType::new(protocol_type)?;
        if self.routes.iter().any(|(k, _)| *k == key) {
            return Err(Error::DuplicateRoute {
                device_type: key.0.to_string(),
                manufacturer: key.1.to_string(),
            });
        }
        self.routes.push((key, protocol_type));
        Ok(self)
    }

    /// Freeze the registry.
    ///
    /// # Errors
    /// `Error::UnknownProtocolType` if a route names an unregistered handler.
    pub fn build(self) -> Result<HandlerRegistry> {
        let mut order = Vec::with_capacity(self.handlers.len());
        let mut handlers = HashMap::with_capacity(self.handlers.len());
        for handler in self.handlers {
            let protocol_type = handler.protocol_type().clone();
            order.push(protocol_type.clone());
            handlers.insert(protocol_type, Arc::new(handler));
        }

        let mut routes = HashMap::with_capacity(self.routes.len());
        for ((device_type, manufacturer), protocol_type) in self.routes {
            if !handlers.contains_key(&protocol_type) {
                return Err(Error::UnknownProtocolType(format!(
                    "{protocol_type} (routed from {device_type}/{manufacturer})"
                )));
            }
            debug!(
                device_type = %device_type,
                manufacturer = %manufacturer,
                protocol = %protocol_type,
                "Route registered"
            );
            routes.insert((device_type, manufacturer), protocol_type);
        }

        info!(
            handlers = order.len(),
            routes = routes.len(),
            "Handler registry built"
        );
        Ok(HandlerRegistry {
            order,
            handlers,
            routes,
        })
    }
}

/// Immutable handler lookup table. Share it behind an `Arc`.
#[derive(Debug)]
pub struct HandlerRegistry {
    order: Vec<ProtocolType>,
    handlers: HashMap<ProtocolType, Arc<AnyProtocolHandler>>,
    routes: HashMap<(DeviceType, Manufacturer), ProtocolType>,
}

impl HandlerRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Look up by protocol type code; case and surrounding whitespace are ignored.
    pub fn get(&self, protocol_type: &str) -> Option<Arc<AnyProtocolHandler>> {
        let key = ProtocolType::new(protocol_type).ok()?;
        self.handler(&key)
    }

    pub fn handler(&self, protocol_type: &ProtocolType) -> Option<Arc<AnyProtocolHandler>> {
        self.handlers.get(protocol_type).cloned()
    }

    pub fn get_for_device(
        &self,
        device_type: DeviceType,
        manufacturer: &Manufacturer,
    ) -> Option<Arc<AnyProtocolHandler>> {
        let protocol_type = self.routes.get(&(device_type, manufacturer.clone()))?;
        self.handler(protocol_type)
    }

    pub fn has_handler(&self, protocol_type: &str) -> bool {
        self.get(protocol_type).is_some()
    }

    /// Descriptors in registration order.
    pub fn all_handlers(&self) -> Vec<HandlerDescriptor> {
        self.order
            .iter()
            .filter_map(|p| self.handlers.get(p))
            .map(|h| h.descriptor().clone())
            .collect()
    }

    /// Highest-priority handler listing `model`; registration order breaks ties.
    pub fn resolve_model(&self, model: &str) -> Option<Arc<AnyProtocolHandler>> {
        let mut best: Option<&Arc<AnyProtocolHandler>> = None;
        for handler in self.order.iter().filter_map(|p| self.handlers.get(p)) {
            let descriptor = handler.descriptor();
            if !descriptor.supports_model(model) {
                continue;
            }
            if best.is_none_or(|b| descriptor.priority > b.descriptor().priority) {
                best = Some(handler);
            }
        }
        best.cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Every built-in handler, without routes.
///
/// # Errors
/// Only if two built-in handlers share a protocol type.
pub fn default_handlers() -> Result<RegistryBuilder> {
    RegistryBuilder::new()
        .register(EntropyAccessHandler::new())?
        .register(ZktecoConsumeHandler::new())?
        .register(EntropyAttendanceHandler::new())?
        .register(Rs485ModbusHandler::new())
}

/// Built-in handlers plus [`DEFAULT_ROUTES`].
///
/// # Errors
/// Only if the built-in tables are inconsistent.
pub fn default_registry() -> Result<HandlerRegistry> {
    DEFAULT_ROUTES
        .iter()
        .try_fold(default_handlers()?, |builder, (device_type, manufacturer, protocol)| {
            builder.route(*device_type, *manufacturer, protocol)
        })?
        .build()
}
