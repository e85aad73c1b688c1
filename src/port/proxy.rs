//! Proxy handle factory: the object whoever holds instance handles uses to
//! reach the port, close instances, and listen for closes.

use std::fmt;

use super::handles::{HandleTable, InterfaceHandle};
use super::interface::ProviderInterface;
use super::messages::OutboundMessage;
use super::router::ProviderPort;
use super::signals::ListenerId;

/// Bound to one port and one id↔handle table.
///
/// Creating it wires the table to the port's close signal, so closing the
/// port tears down every handle and runs their per-instance handlers. A
/// table is wired to a given port once, however many proxies share it.
#[derive(Clone)]
pub struct ProxyInterface {
    port: ProviderPort,
    handles: HandleTable,
}

impl ProxyInterface {
    pub(crate) fn new(port: ProviderPort, handles: HandleTable) -> Self {
        if handles.attach(port.id()) {
            let table = handles.clone();
            port.on_close(move || table.teardown_all());
        }
        Self { port, handles }
    }

    /// The live interface for a minted handle; `None` if the handle is unknown
    /// or was torn down.
    pub fn resolve(&self, handle: &InterfaceHandle) -> Option<ProviderInterface> {
        if self.handles.contains(handle) {
            Some(self.port.get_interface())
        } else {
            None
        }
    }

    /// Close one instance, or the whole port when `handle` is `None`.
    ///
    /// For a single instance: its handle is torn down, the instance is
    /// removed from the port, and a close notice addressed to it is emitted.
    pub fn close(&self, handle: Option<&InterfaceHandle>) {
        let Some(handle) = handle else {
            self.port.close();
            return;
        };

        let Some(id) = self.handles.id_of(handle) else {
            log::debug!("{} close for unknown {}", self.port, handle);
            return;
        };

        self.handles.teardown(&id);
        self.port.remove_instance(&id);
        self.port.emit_egress(OutboundMessage::InstanceClose { to: id });
    }

    /// Register a one-shot listener for the port's close.
    pub fn on_close(&self, handler: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.port.once_close(handler)
    }

    /// Register a handler for when the instance behind `handle` is torn down.
    /// Returns `false` if the handle is unknown.
    pub fn on_instance_close(
        &self,
        handle: &InterfaceHandle,
        handler: impl FnOnce() + Send + 'static,
    ) -> bool {
        match self.handles.id_of(handle) {
            Some(id) => {
                self.handles.add_close_handler(&id, handler);
                true
            }
            None => {
                log::debug!("{} onClose for unknown {}", self.port, handle);
                false
            }
        }
    }

    pub fn port(&self) -> &ProviderPort {
        &self.port
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }
}

impl fmt::Debug for ProxyInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyInterface")
            .field("port", &self.port)
            .field("handles", &self.handles)
            .finish()
    }
}
