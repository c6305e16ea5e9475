//! The handler registry maps destinations to handlers.
//!
//! It's built in two phases.  [`HandlerRegistryBuilder`] collects handler groups and rejects
//! ambiguous mappings; [`HandlerRegistryBuilder::build`] then freezes the result into an
//! immutable [`HandlerRegistry`] that can be shared by dispatchers without any locking.
use std::collections::HashMap;
use std::sync::Arc;

use itertools::Itertools;
use tracing::{debug, info};

use crate::handler::{ExceptionHandlerMethod, HandlerGroup, HandlerMethod, MappingKind, OwnerType};
use crate::{Result, RpcBusError};

/// Decides the destination a handler is registered under.
pub trait DestinationMapping: Send + Sync {
    /// `None` leaves the handler unregistered.
    fn mapping_for_method(&self, method: &HandlerMethod, group: &HandlerGroup) -> Option<String>;
}

/// Request and subscribe handlers share one namespace: the group prefix followed by the
/// handler's declared destination.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonRpcDestinationMapping;

impl DestinationMapping for JsonRpcDestinationMapping {
    fn mapping_for_method(&self, method: &HandlerMethod, group: &HandlerGroup) -> Option<String> {
        let destination = method.declared_destination();
        if destination.is_empty() {
            return None;
        }

        Some(format!("{}{}", group.prefix().unwrap_or_default(), destination))
    }
}

pub struct HandlerRegistryBuilder {
    mapping: Arc<dyn DestinationMapping>,
    handlers: HashMap<String, Arc<HandlerMethod>>,
    exception_handlers: HashMap<OwnerType, Vec<ExceptionHandlerMethod>>,
}

impl Default for HandlerRegistryBuilder {
    fn default() -> Self {
        Self::new(Arc::new(JsonRpcDestinationMapping))
    }
}

impl HandlerRegistryBuilder {
    pub fn new(mapping: Arc<dyn DestinationMapping>) -> Self {
        Self {
            mapping,
            handlers: HashMap::new(),
            exception_handlers: HashMap::new(),
        }
    }

    /// Register every handler of a group.
    ///
    /// Fails if a destination is already taken by a different handler.  Registering the same
    /// handler twice under one destination is harmless.
    pub fn register_group(mut self, group: HandlerGroup) -> Result<Self> {
        let mapped = group
            .methods()
            .iter()
            .map(|method| {
                let destination = self.mapping.mapping_for_method(method, &group);
                if destination.is_none() {
                    debug!(handler = %method.short_log_message(), "Handler has no destination mapping; skipping");
                }
                destination
            })
            .collect::<Vec<_>>();

        let (owner, _prefix, methods, exception_handlers) = group.into_parts();
        for (method, destination) in methods.into_iter().zip(mapped) {
            if let Some(destination) = destination {
                self.register_handler(destination, method)?;
            }
        }

        self.exception_handlers.entry(owner).or_insert(exception_handlers);

        Ok(self)
    }

    fn register_handler(&mut self, destination: String, method: HandlerMethod) -> Result<()> {
        let method = method.with_mapped_destination(destination.clone());

        if let Some(existing) = self.handlers.get(&destination) {
            if existing.is_same_handler(&method) {
                debug!(%destination, handler = %method.short_log_message(), "Handler already registered");
                return Ok(());
            }

            return Err(RpcBusError::AmbiguousMapping {
                destination,
                existing_handler: existing.short_log_message(),
                new_handler: method.short_log_message(),
            });
        }

        debug!(%destination, kind = ?method.kind(), handler = %method.short_log_message(), "Mapped handler");
        self.handlers.insert(destination, Arc::new(method));
        Ok(())
    }

    pub fn build(self) -> HandlerRegistry {
        info!(
            destinations = %self.handlers.keys().sorted().join(", "),
            "Handler registry ready"
        );

        HandlerRegistry {
            handlers: self.handlers,
            exception_handlers: self.exception_handlers,
        }
    }
}

/// Immutable destination → handler map.
#[derive(Debug)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<HandlerMethod>>,
    exception_handlers: HashMap<OwnerType, Vec<ExceptionHandlerMethod>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn get(&self, destination: &str) -> Option<&Arc<HandlerMethod>> {
        self.handlers.get(destination)
    }

    pub fn mapping_kind(&self, destination: &str) -> Option<MappingKind> {
        self.get(destination).map(|handler| handler.kind())
    }

    pub fn destinations(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Exception handlers declared by `owner`, in declaration order.
    pub fn exception_handlers_for(&self, owner: &OwnerType) -> &[ExceptionHandlerMethod] {
        self.exception_handlers
            .get(owner)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}
