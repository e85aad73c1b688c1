//! Local port signals.
//!
//! Besides wire traffic a port raises two local signals: `Start` once its
//! egress channel is bound and `Close` when it is torn down. Listeners are
//! registered per signal and may be one-shot.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Signals a port raises locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortSignal {
    Start,
    Close,
}

impl fmt::Display for PortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::Close => f.write_str("close"),
        }
    }
}

/// A registered listener callback.
pub type SignalHandler = Arc<dyn Fn() + Send + Sync>;

/// Identifies a registered listener so it can be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static LISTENER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    fn next() -> Self {
        Self(LISTENER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone)]
struct ListenerEntry {
    id: ListenerId,
    handler: SignalHandler,
    once: bool,
}

/// Listener table for [`PortSignal`]s.
#[derive(Default)]
pub struct PortSignals {
    listeners: Mutex<HashMap<PortSignal, Vec<ListenerEntry>>>,
}

impl PortSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener invoked every time `signal` is raised.
    pub fn on(&self, signal: PortSignal, handler: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.add(signal, Arc::new(handler), false)
    }

    /// Register a listener invoked the next time `signal` is raised only.
    pub fn once(
        &self,
        signal: PortSignal,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> ListenerId {
        self.add(signal, Arc::new(handler), true)
    }

    fn add(&self, signal: PortSignal, handler: SignalHandler, once: bool) -> ListenerId {
        let id = ListenerId::next();
        self.listeners
            .lock()
            .entry(signal)
            .or_default()
            .push(ListenerEntry { id, handler, once });
        id
    }

    /// Remove a listener. Returns `true` if it was registered.
    pub fn off(&self, signal: PortSignal, id: ListenerId) -> bool {
        let mut map = self.listeners.lock();
        match map.get_mut(&signal) {
            Some(entries) => {
                let before = entries.len();
                entries.retain(|e| e.id != id);
                before != entries.len()
            }
            None => false,
        }
    }

    /// Raise a signal. Handlers run after the table lock is released so they
    /// may register further listeners.
    pub fn emit(&self, signal: PortSignal) {
        let entries: Vec<ListenerEntry> = {
            let mut map = self.listeners.lock();
            match map.get_mut(&signal) {
                Some(entries) => {
                    let snapshot = entries.clone();
                    entries.retain(|e| !e.once);
                    snapshot
                }
                None => return,
            }
        };

        for entry in entries {
            (entry.handler)();
        }
    }

    pub fn listener_count(&self, signal: PortSignal) -> usize {
        self.listeners.lock().get(&signal).map_or(0, Vec::len)
    }
}

impl fmt::Debug for PortSignals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = self.listeners.lock();
        f.debug_struct("PortSignals")
            .field("start", &map.get(&PortSignal::Start).map_or(0, Vec::len))
            .field("close", &map.get(&PortSignal::Close).map_or(0, Vec::len))
            .finish()
    }
}
