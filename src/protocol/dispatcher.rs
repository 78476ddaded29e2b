use crate::core::packet::{Packet, PacketType};
use crate::error::{constants, ProtocolError, Result};
use crate::service::connection::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

type HandlerFn = dyn Fn(&Connection, &Packet) -> Result<()> + Send + Sync + 'static;
type OnceFn = dyn FnOnce(&Connection, &Packet) -> Result<()> + Send + 'static;

/// Typed packet handler registry.
///
/// Handlers are keyed by [`PacketType`], so they can only be registered for
/// types the protocol version actually declares. Persistent handlers run for
/// every matching packet; one-shot handlers run for the next one and are then
/// dropped. Clones share the same handler table.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<PacketType, Vec<Arc<HandlerFn>>>>>,
    once: Arc<Mutex<HashMap<PacketType, Vec<Box<OnceFn>>>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `handler` for every packet of type `kind`
    pub fn register<F>(&self, kind: PacketType, handler: F) -> Result<()>
    where
        F: Fn(&Connection, &Packet) -> Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::TransportError(constants::ERR_DISPATCHER_WRITE_LOCK.into()))?;

        handlers.entry(kind).or_default().push(Arc::new(handler));
        Ok(())
    }

    /// Run `handler` for the next packet of type `kind` only
    pub fn once<F>(&self, kind: PacketType, handler: F) -> Result<()>
    where
        F: FnOnce(&Connection, &Packet) -> Result<()> + Send + 'static,
    {
        let mut once = self
            .once
            .lock()
            .map_err(|_| ProtocolError::TransportError(constants::ERR_LOCK_POISONED.into()))?;

        once.entry(kind).or_default().push(Box::new(handler));
        Ok(())
    }

    /// Whether any handler is waiting for `kind`
    pub fn has_handler(&self, kind: &PacketType) -> bool {
        let persistent = self
            .handlers
            .read()
            .map(|h| h.get(kind).is_some_and(|v| !v.is_empty()))
            .unwrap_or(false);
        persistent
            || self
                .once
                .lock()
                .map(|h| h.get(kind).is_some_and(|v| !v.is_empty()))
                .unwrap_or(false)
    }

    /// Invoke every handler for the packet's type.
    ///
    /// Handlers run outside the table locks, so they may register further
    /// handlers. All handlers run even if one fails; the first error is
    /// returned. Yields the number of handlers invoked.
    pub fn dispatch(&self, connection: &Connection, packet: &Packet) -> Result<usize> {
        let persistent: Vec<Arc<HandlerFn>> = {
            let handlers = self
                .handlers
                .read()
                .map_err(|_| ProtocolError::TransportError(constants::ERR_DISPATCHER_READ_LOCK.into()))?;
            handlers.get(&packet.kind).cloned().unwrap_or_default()
        };
        let once: Vec<Box<OnceFn>> = {
            let mut once = self
                .once
                .lock()
                .map_err(|_| ProtocolError::TransportError(constants::ERR_LOCK_POISONED.into()))?;
            once.remove(&packet.kind).unwrap_or_default()
        };

        let invoked = persistent.len() + once.len();
        let mut first_error = None;
        let results = persistent
            .iter()
            .map(|handler| handler(connection, packet))
            .chain(once.into_iter().map(|handler| handler(connection, packet)));
        for result in results {
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(invoked),
        }
    }

    /// Drop every handler
    pub fn clear(&self) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.clear();
        }
        if let Ok(mut once) = self.once.lock() {
            once.clear();
        }
    }
}
