//! Bidirectional instance-id ↔ interface-handle table.
//!
//! The surrounding system mints one opaque [`InterfaceHandle`] per instance
//! it hands out. This table is the bookkeeping that maps handles back to
//! instance ids (and the other way) and runs per-instance close handlers
//! when an instance is torn down. It is distinct from the port's own
//! registry of dispatchers; keeping the two consistent is the caller's job.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

/// Opaque per-instance handle. Two handles are the same handle iff their
/// tokens match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceHandle {
    token: Uuid,
}

impl InterfaceHandle {
    fn mint() -> Self {
        Self {
            token: Uuid::new_v4(),
        }
    }

    pub fn token(&self) -> Uuid {
        self.token
    }
}

impl fmt::Display for InterfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle:{}", self.token)
    }
}

/// Per-instance close callback.
pub type CloseHandler = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct TableInner {
    by_id: HashMap<String, InterfaceHandle>,
    by_handle: HashMap<InterfaceHandle, String>,
    close_handlers: HashMap<String, Vec<CloseHandler>>,
    attached_ports: HashSet<Uuid>,
}

/// Shared id↔handle table. Clones share state.
#[derive(Clone, Default)]
pub struct HandleTable {
    inner: Arc<Mutex<TableInner>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a handle for `id`. A previous handle for the same id stops
    /// resolving; its pending close handlers are kept for the new one.
    pub fn mint(&self, id: impl Into<String>) -> InterfaceHandle {
        let id = id.into();
        let handle = InterfaceHandle::mint();
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.by_id.insert(id.clone(), handle) {
            inner.by_handle.remove(&previous);
        }
        inner.by_handle.insert(handle, id);
        handle
    }

    /// Instance id a handle was minted for.
    pub fn id_of(&self, handle: &InterfaceHandle) -> Option<String> {
        self.inner.lock().by_handle.get(handle).cloned()
    }

    /// Current handle for an instance id.
    pub fn handle_of(&self, id: &str) -> Option<InterfaceHandle> {
        self.inner.lock().by_id.get(id).copied()
    }

    pub fn contains(&self, handle: &InterfaceHandle) -> bool {
        self.inner.lock().by_handle.contains_key(handle)
    }

    /// Queue a handler for when `id` is torn down.
    pub fn add_close_handler(&self, id: &str, handler: impl FnOnce() + Send + 'static) {
        self.inner
            .lock()
            .close_handlers
            .entry(id.to_string())
            .or_default()
            .push(Box::new(handler));
    }

    /// Forget `id` in both directions and run its close handlers in
    /// registration order. Returns `false` if nothing was known about it.
    pub fn teardown(&self, id: &str) -> bool {
        let (known, handlers) = {
            let mut inner = self.inner.lock();
            let handle = inner.by_id.remove(id);
            if let Some(handle) = &handle {
                inner.by_handle.remove(handle);
            }
            let handlers = inner.close_handlers.remove(id).unwrap_or_default();
            (handle.is_some() || !handlers.is_empty(), handlers)
        };

        for handler in handlers {
            handler();
        }
        known
    }

    /// Tear down every known id.
    pub fn teardown_all(&self) {
        let ids: Vec<String> = {
            let inner = self.inner.lock();
            let mut ids: Vec<String> = inner
                .by_id
                .keys()
                .chain(inner.close_handlers.keys())
                .cloned()
                .collect();
            ids.sort();
            ids.dedup();
            ids
        };
        for id in ids {
            self.teardown(&id);
        }
    }

    /// Record that the table is wired to the port `port_id`. Returns `false`
    /// if it already was.
    pub(crate) fn attach(&self, port_id: Uuid) -> bool {
        self.inner.lock().attached_ports.insert(port_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().by_id.is_empty()
    }
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("HandleTable")
            .field("ids", &inner.by_id.keys().collect::<Vec<_>>())
            .field("pending_close_handlers", &inner.close_handlers.len())
            .finish()
    }
}
