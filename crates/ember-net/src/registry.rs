//! Packet handler registry: dispatch decoded packets by identifier.
//!
//! Handlers are registered on a [`HandlerRegistryBuilder`] at startup, before
//! the listener opens. [`HandlerRegistryBuilder::build`] freezes the table into
//! an immutable [`HandlerRegistry`] that every session shares through an
//! [`Arc`] without further synchronization.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use crate::error::{HandlerError, RegistryError};
use crate::packet::Packet;
use crate::session::ClientSession;

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// The single capability every packet handler provides.
pub trait PacketHandler: Send + Sync {
    /// Act on one decoded packet received by `session`.
    fn handle(&self, session: &ClientSession, packet: &Packet) -> Result<(), HandlerError>;
}

/// Blanket implementation for closures.
impl<F> PacketHandler for F
where
    F: Fn(&ClientSession, &Packet) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, session: &ClientSession, packet: &Packet) -> Result<(), HandlerError> {
        self(session, packet)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Mutable handler table used during startup.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Box<dyn PacketHandler>>,
}

impl HandlerRegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `identifier`.
    ///
    /// A second registration for the same identifier is a configuration
    /// error and leaves the first one in place.
    pub fn register<H: PacketHandler + 'static>(
        &mut self,
        identifier: impl Into<String>,
        handler: H,
    ) -> Result<&mut Self, RegistryError> {
        let identifier = identifier.into();
        if identifier.is_empty() {
            return Err(RegistryError::EmptyIdentifier);
        }
        match self.handlers.entry(identifier) {
            Entry::Occupied(entry) => Err(RegistryError::DuplicateHandler(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(Box::new(handler));
                Ok(self)
            }
        }
    }

    /// Freeze the table.
    pub fn build(self) -> Arc<HandlerRegistry> {
        Arc::new(HandlerRegistry {
            handlers: self.handlers,
        })
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable identifier → handler table shared by all sessions.
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn PacketHandler>>,
}

impl HandlerRegistry {
    /// Start building a registry.
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    /// Look up the handler for `identifier`. `None` is an expected outcome.
    pub fn resolve(&self, identifier: &str) -> Option<&dyn PacketHandler> {
        self.handlers.get(identifier).map(|h| h.as_ref())
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered identifiers in sorted order (for startup logging).
    pub fn identifiers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("identifiers", &self.identifiers())
            .finish()
    }
}
