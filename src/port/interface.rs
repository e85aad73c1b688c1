//! The implementor-facing interface of a port.
//!
//! Built once per port from its schema and cached. It carries the two
//! provision operations, `close`, and every `constant` member of the schema
//! as a deep copy taken at build time. Constants are handed out by shared
//! reference only, so they cannot be written through the interface.
//! Properties, methods and events are not materialized here; they exist only
//! on the wire.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use serde_json::Value;

use super::instance::{Provider, ProviderFactory};
use super::router::PortInner;

/// Handle given to whoever implements the capability.
#[derive(Clone)]
pub struct ProviderInterface {
    port: Weak<PortInner>,
    constants: Arc<BTreeMap<String, Arc<Value>>>,
}

impl ProviderInterface {
    pub(crate) fn build(port: &Arc<PortInner>) -> Self {
        let constants = port
            .schema()
            .constants()
            .map(|(name, value)| (name.to_string(), Arc::new(value.clone())))
            .collect();

        Self {
            port: Arc::downgrade(port),
            constants: Arc::new(constants),
        }
    }

    /// Register a provider whose methods return their result directly.
    ///
    /// Replaces any earlier registration. Instances already live keep the
    /// convention they were created with.
    pub fn provide_synchronous<P, F>(&self, factory: F)
    where
        P: Provider + 'static,
        F: Fn() -> P + Send + Sync + 'static,
    {
        self.register(factory, true);
    }

    /// Register a provider whose methods reply through a [`ReplyHandle`].
    ///
    /// [`ReplyHandle`]: super::instance::ReplyHandle
    pub fn provide_asynchronous<P, F>(&self, factory: F)
    where
        P: Provider + 'static,
        F: Fn() -> P + Send + Sync + 'static,
    {
        self.register(factory, false);
    }

    fn register<P, F>(&self, factory: F, synchronous: bool)
    where
        P: Provider + 'static,
        F: Fn() -> P + Send + Sync + 'static,
    {
        let factory: ProviderFactory = Arc::new(move || Box::new(factory()) as Box<dyn Provider>);
        match self.port.upgrade() {
            Some(port) => port.register(factory, synchronous),
            None => log::warn!("Provider registered on a dropped port; ignoring"),
        }
    }

    /// Close the port this interface belongs to.
    pub fn close(&self) {
        if let Some(port) = self.port.upgrade() {
            port.close();
        }
    }

    /// A constant declared by the schema.
    pub fn constant(&self, name: &str) -> Option<&Value> {
        self.constants.get(name).map(|v| v.as_ref())
    }

    /// Shared ownership of a constant, for callers that outlive the interface.
    pub fn constant_shared(&self, name: &str) -> Option<Arc<Value>> {
        self.constants.get(name).cloned()
    }

    /// All constants in name order.
    pub fn constants(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.constants.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn has_constant(&self, name: &str) -> bool {
        self.constants.contains_key(name)
    }
}

impl fmt::Debug for ProviderInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderInterface")
            .field("constants", &self.constants.keys().collect::<Vec<_>>())
            .finish()
    }
}
