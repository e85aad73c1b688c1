//! Provider instances and their wire dispatch.
//!
//! A port instantiates its registered provider once per peer-chosen id. Each
//! instance is wrapped in an [`InstanceDispatcher`] that accepts inbound
//! payloads, invokes the provider under the port's calling convention, and
//! shapes the reply. Providers emit declared events through the
//! [`EventDispatcher`] handed to them at construction.
//!
//! # Calling conventions
//!
//! - **Synchronous**: [`Provider::call`] runs and its return value is sent as
//!   the reply before dispatch returns.
//! - **Asynchronous**: [`Provider::call_async`] receives a [`ReplyHandle`] and
//!   replies whenever it is ready, possibly from another task.
//!
//! Both produce the same reply shape on the wire.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use super::messages::{DataPayload, MethodCall, OutboundMessage};
use super::router::PortInner;
use crate::config::{MissingMethodPolicy, ReplyPolicy};
use crate::error::{PortError, PortResult};

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// A capability implementation. One value is created per instance id.
///
/// Implement [`call`](Self::call) for providers registered with
/// `provide_synchronous`, or [`call_async`](Self::call_async) for providers
/// registered with `provide_asynchronous`.
pub trait Provider: Send {
    /// Whether this provider implements `method`.
    fn responds_to(&self, method: &str) -> bool;

    /// Synchronous convention: return the reply value.
    fn call(&mut self, method: &str, args: Vec<Value>) -> Value {
        log::debug!("{}() has no synchronous implementation", method);
        let _ = args;
        Value::Null
    }

    /// Asynchronous convention: reply through `reply` when the result is
    /// ready. Defaults to answering with [`call`](Self::call).
    fn call_async(&mut self, method: &str, args: Vec<Value>, reply: ReplyHandle) {
        let value = self.call(method, args);
        reply.send(value);
    }

    /// Receives the event dispatcher once, right after construction.
    fn bind_events(&mut self, events: EventDispatcher) {
        let _ = events;
    }
}

/// Creates a fresh provider for each constructed instance.
pub type ProviderFactory = Arc<dyn Fn() -> Box<dyn Provider> + Send + Sync>;

// ---------------------------------------------------------------------------
// ReplyHandle
// ---------------------------------------------------------------------------

/// Completion handle for one method call, keyed by `(to, reqId, method)`.
///
/// Cloneable and `Send`, so it can be moved into a spawned task. Under
/// [`ReplyPolicy::Repeatable`] every invocation emits a reply; under
/// [`ReplyPolicy::OneShot`] only the first does. Closing the instance or
/// the port does not cancel it, but a reply sent after the port lost its
/// egress channel is suppressed.
#[derive(Clone)]
pub struct ReplyHandle {
    port: Weak<PortInner>,
    to: String,
    req_id: Value,
    method: String,
    policy: ReplyPolicy,
    sent: Arc<AtomicBool>,
}

impl ReplyHandle {
    fn new(port: &Arc<PortInner>, call: &MethodCall) -> Self {
        Self {
            port: Arc::downgrade(port),
            to: call.to.clone(),
            req_id: call.req_id.clone(),
            method: call.method.clone(),
            policy: port.config().reply_policy,
            sent: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reply with a result value.
    pub fn send(&self, value: Value) {
        self.emit(value, None);
    }

    /// Reply with an error. The reply carries `value: null` and `error`.
    pub fn reject(&self, error: impl Into<String>) {
        self.emit(Value::Null, Some(error.into()));
    }

    fn emit(&self, value: Value, error: Option<String>) {
        let already_sent = self.sent.swap(true, Ordering::SeqCst);
        if already_sent && self.policy == ReplyPolicy::OneShot {
            log::warn!(
                "Ignoring repeated reply to {}() for '{}' (reqId {})",
                self.method,
                self.to,
                self.req_id
            );
            return;
        }

        match self.port.upgrade() {
            Some(port) => port.emit_egress(OutboundMessage::MethodReply {
                to: self.to.clone(),
                req_id: self.req_id.clone(),
                name: self.method.clone(),
                value,
                error,
            }),
            None => log::debug!("Port dropped before reply to {}() was sent", self.method),
        }
    }

    /// Whether a reply has been sent through this handle or a clone of it.
    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn req_id(&self) -> &Value {
        &self.req_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Debug for ReplyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyHandle")
            .field("to", &self.to)
            .field("req_id", &self.req_id)
            .field("method", &self.method)
            .field("policy", &self.policy)
            .field("sent", &self.is_sent())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EventDispatcher
// ---------------------------------------------------------------------------

/// Lets a provider instance emit the events its schema declares.
#[derive(Clone)]
pub struct EventDispatcher {
    port: Weak<PortInner>,
    to: String,
    events: Arc<BTreeMap<String, Value>>,
}

impl EventDispatcher {
    /// Emit event `name`. The value is conformed against the declared payload
    /// shape first. Undeclared names are ignored.
    ///
    /// Returns `true` if the event was declared and handed to the port.
    pub fn dispatch(&self, name: &str, value: Value) -> bool {
        let Some(shape) = self.events.get(name) else {
            log::debug!("Instance '{}' dispatched undeclared event '{}'", self.to, name);
            return false;
        };
        let Some(port) = self.port.upgrade() else {
            return false;
        };

        let value = port.conformer().conform(shape, &value);
        port.emit_egress(OutboundMessage::Event {
            to: self.to.clone(),
            name: name.to_string(),
            value,
        });
        true
    }

    pub fn declares(&self, name: &str) -> bool {
        self.events.contains_key(name)
    }

    /// Id of the instance this dispatcher emits for.
    pub fn instance_id(&self) -> &str {
        &self.to
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("to", &self.to)
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// InstanceDispatcher
// ---------------------------------------------------------------------------

/// A live provider instance bound to its port.
///
/// The provider is checked out of its slot for the duration of a call, so
/// replies and events are emitted without any instance lock held. A call
/// that arrives while the provider is checked out (for example one issued
/// by the peer from inside a reply callback) is queued and run by the
/// dispatch already in progress, in arrival order.
pub struct InstanceDispatcher {
    id: String,
    port: Weak<PortInner>,
    slot: Mutex<ProviderSlot>,
    synchronous: bool,
}

struct ProviderSlot {
    provider: Option<Box<dyn Provider>>,
    queue: VecDeque<MethodCall>,
}

impl InstanceDispatcher {
    pub(crate) fn new(
        port: &Arc<PortInner>,
        id: String,
        mut provider: Box<dyn Provider>,
        synchronous: bool,
    ) -> Self {
        provider.bind_events(EventDispatcher {
            port: Arc::downgrade(port),
            to: id.clone(),
            events: Arc::new(port.schema().events()),
        });

        Self {
            id,
            port: Arc::downgrade(port),
            slot: Mutex::new(ProviderSlot {
                provider: Some(provider),
                queue: VecDeque::new(),
            }),
            synchronous,
        }
    }

    /// Handle one inbound payload. Anything but a method call is ignored.
    ///
    /// A call queued behind a dispatch in progress returns `Ok(())`; its own
    /// failure is logged by the dispatch that eventually runs it.
    pub fn dispatch(&self, payload: DataPayload) -> PortResult<()> {
        let DataPayload::MethodCall(call) = payload else {
            return Ok(());
        };

        let mut provider = {
            let mut slot = self.slot.lock();
            match slot.provider.take() {
                Some(provider) => provider,
                None => {
                    log::debug!("Instance '{}' busy, queueing {}()", self.id, call.method);
                    slot.queue.push_back(call);
                    return Ok(());
                }
            }
        };

        let result = self.invoke(provider.as_mut(), call);

        loop {
            let next = {
                let mut slot = self.slot.lock();
                match slot.queue.pop_front() {
                    Some(next) => next,
                    None => {
                        slot.provider = Some(provider);
                        break;
                    }
                }
            };
            if let Err(e) = self.invoke(provider.as_mut(), next) {
                log::warn!("Instance '{}': {}", self.id, e);
            }
        }

        result
    }

    fn invoke(&self, provider: &mut dyn Provider, call: MethodCall) -> PortResult<()> {
        let Some(port) = self.port.upgrade() else {
            return Err(PortError::PortClosed);
        };

        if !provider.responds_to(&call.method) {
            let err = PortError::MethodNotFound {
                method: call.method.clone(),
            };
            if port.config().missing_method == MissingMethodPolicy::ErrorReply {
                port.emit_egress(OutboundMessage::MethodReply {
                    to: call.to.clone(),
                    req_id: call.req_id.clone(),
                    name: call.method.clone(),
                    value: Value::Null,
                    error: Some(err.to_string()),
                });
            }
            return Err(err);
        }

        let reply = ReplyHandle::new(&port, &call);
        drop(port);

        if self.synchronous {
            let value = provider.call(&call.method, call.args);
            reply.send(value);
        } else {
            provider.call_async(&call.method, call.args, reply);
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }
}

impl fmt::Debug for InstanceDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceDispatcher")
            .field("id", &self.id)
            .field("synchronous", &self.synchronous)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
