//! The provider port and its message router.
//!
//! Every inbound message enters through [`ProviderPort::on_message`], is
//! parsed once into an [`InboundMessage`], and is matched against the port's
//! state:
//!
//! ```text
//! control {reverse, channel}      → bind egress, announce, raise Start
//! control {type: setup, channel}  → record control channel
//! control {type: close, channel}  → (if it is ours) close the port
//! default {channel}               → adopt egress if unbound, raise Start
//! default {to, message: close}    → forget instance `to`
//! default {to, message: construct}→ create (or replace) instance `to`
//! default {to, message: ...}      → forward to live instance `to`
//! anything else                   → log and drop
//! ```
//!
//! Failures never leave the port: each is logged and the message dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use super::handles::HandleTable;
use super::instance::{InstanceDispatcher, Provider, ProviderFactory};
use super::interface::ProviderInterface;
use super::messages::{DataMessage, DataPayload, InboundMessage, OutboundMessage, Source};
use super::proxy::ProxyInterface;
use super::signals::{ListenerId, PortSignal, PortSignals};
use super::sink::MessageSink;
use crate::config::PortConfig;
use crate::error::{PortError, PortResult};
use crate::schema::{CapabilitySchema, Conform, SchemaConformer};

// ---------------------------------------------------------------------------
// PortState
// ---------------------------------------------------------------------------

/// Lifecycle phase of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    /// Constructed; no egress channel yet, so outbound traffic is suppressed.
    AwaitingChannel,
    /// Egress channel bound.
    Active,
    /// Torn down. Terminal.
    Closed,
}

struct Registration {
    factory: ProviderFactory,
    synchronous: bool,
}

#[derive(Default)]
struct Bindings {
    state: Option<PortState>,
    control_channel: Option<String>,
    emit_channel: Option<String>,
    registration: Option<Registration>,
    instances: HashMap<String, Arc<InstanceDispatcher>>,
}

impl Bindings {
    fn state(&self) -> PortState {
        self.state.unwrap_or(PortState::AwaitingChannel)
    }
}

// ---------------------------------------------------------------------------
// PortInner
// ---------------------------------------------------------------------------

/// Shared state behind a [`ProviderPort`]. Reply and event handles keep a
/// `Weak` reference to it so they never extend the port's lifetime.
pub(crate) struct PortInner {
    id: Uuid,
    schema: Arc<CapabilitySchema>,
    config: PortConfig,
    sink: Arc<dyn MessageSink>,
    conformer: Arc<dyn Conform>,
    signals: PortSignals,
    bindings: Mutex<Bindings>,
    interface: OnceLock<ProviderInterface>,
}

impl PortInner {
    pub(crate) fn schema(&self) -> &Arc<CapabilitySchema> {
        &self.schema
    }

    pub(crate) fn config(&self) -> &PortConfig {
        &self.config
    }

    pub(crate) fn conformer(&self) -> &dyn Conform {
        self.conformer.as_ref()
    }

    /// Emit on the egress channel, or drop with a debug line if unbound.
    pub(crate) fn emit_egress(&self, message: OutboundMessage) {
        let channel = self.bindings.lock().emit_channel.clone();
        match channel {
            Some(channel) => self.sink.emit(&channel, message),
            None => log::debug!("{} suppressing outbound {:?}: no egress channel", self, message),
        }
    }

    pub(crate) fn register(&self, factory: ProviderFactory, synchronous: bool) {
        let mut bindings = self.bindings.lock();
        if bindings.registration.is_some() {
            log::debug!("{} replacing registered provider", DescribeBindings(&bindings, &self.config));
        }
        bindings.registration = Some(Registration {
            factory,
            synchronous,
        });
    }

    pub(crate) fn remove_instance(&self, id: &str) -> bool {
        self.bindings.lock().instances.remove(id).is_some()
    }

    /// Tear the port down. Idempotent.
    pub(crate) fn close(&self) {
        let control = {
            let mut bindings = self.bindings.lock();
            if bindings.state() == PortState::Closed {
                return;
            }
            bindings.state = Some(PortState::Closed);
            bindings.control_channel.take()
        };

        if let Some(channel) = control {
            self.sink.emit(&channel, OutboundMessage::ProviderClosing);
        }
        self.signals.emit(PortSignal::Close);

        let mut bindings = self.bindings.lock();
        bindings.instances.clear();
        bindings.emit_channel = None;
        log::debug!("{} closed", DescribeBindings(&bindings, &self.config));
    }
}

impl fmt::Display for PortInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bindings = self.bindings.lock();
        fmt::Display::fmt(&DescribeBindings(&bindings, &self.config), f)
    }
}

/// Display helper usable while the bindings lock is already held.
struct DescribeBindings<'a>(&'a Bindings, &'a PortConfig);

impl fmt::Display for DescribeBindings<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.1.label.as_deref().map(|l| format!(" ({})", l)).unwrap_or_default();
        match &self.0.emit_channel {
            Some(channel) => write!(f, "[Provider {}{}]", channel, label),
            None => write!(f, "[unbound Provider{}]", label),
        }
    }
}

// ---------------------------------------------------------------------------
// ProviderPort
// ---------------------------------------------------------------------------

/// Routing endpoint for one exposed capability binding.
///
/// Cheap to clone; clones share the same port.
#[derive(Clone)]
pub struct ProviderPort {
    inner: Arc<PortInner>,
}

/// Builder for [`ProviderPort`].
pub struct PortBuilder {
    schema: Arc<CapabilitySchema>,
    sink: Arc<dyn MessageSink>,
    config: PortConfig,
    conformer: Arc<dyn Conform>,
}

impl PortBuilder {
    pub fn config(mut self, config: PortConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default [`SchemaConformer`].
    pub fn conformer(mut self, conformer: impl Conform + 'static) -> Self {
        self.conformer = Arc::new(conformer);
        self
    }

    pub fn build(self) -> ProviderPort {
        let inner = Arc::new(PortInner {
            id: Uuid::new_v4(),
            schema: self.schema,
            config: self.config,
            sink: self.sink,
            conformer: self.conformer,
            signals: PortSignals::new(),
            bindings: Mutex::new(Bindings::default()),
            interface: OnceLock::new(),
        });
        log::debug!("{} created (port {})", inner, inner.id);
        ProviderPort { inner }
    }
}

impl ProviderPort {
    /// Create a port with default configuration.
    pub fn new(
        schema: impl Into<Arc<CapabilitySchema>>,
        sink: impl MessageSink + 'static,
    ) -> Self {
        Self::builder(schema, sink).build()
    }

    pub fn builder(
        schema: impl Into<Arc<CapabilitySchema>>,
        sink: impl MessageSink + 'static,
    ) -> PortBuilder {
        PortBuilder {
            schema: schema.into(),
            sink: Arc::new(sink),
            config: PortConfig::default(),
            conformer: Arc::new(SchemaConformer),
        }
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    /// Single entry point for inbound wire messages.
    pub fn on_message(&self, source: Source, message: Value) {
        let parsed = InboundMessage::parse(source, message);

        if self.state() == PortState::Closed {
            log::debug!("{} closed, dropping {:?}", self, parsed);
            return;
        }

        match parsed {
            InboundMessage::ControlReverse { reverse, channel } => {
                {
                    let mut bindings = self.inner.bindings.lock();
                    bindings.emit_channel = Some(channel.clone());
                    bindings.state = Some(PortState::Active);
                }
                self.inner
                    .sink
                    .emit(&channel, OutboundMessage::ChannelAnnouncement { channel: reverse });
                self.inner.signals.emit(PortSignal::Start);
            }
            InboundMessage::ControlSetup { channel } => {
                self.inner.bindings.lock().control_channel = Some(channel);
            }
            InboundMessage::ControlClose { channel } => {
                let matched = {
                    let mut bindings = self.inner.bindings.lock();
                    if bindings.control_channel == channel {
                        bindings.control_channel = None;
                        true
                    } else {
                        false
                    }
                };
                if matched {
                    self.inner.close();
                } else {
                    log::warn!(
                        "{} dropping close for foreign control channel {:?}",
                        self,
                        channel
                    );
                }
            }
            InboundMessage::Data(data) => {
                if let Err(e) = self.route_data(data) {
                    log::warn!("{} {}", self, e);
                }
            }
            InboundMessage::Unrecognized { source, raw } => {
                log::warn!("{} dropping {} message {}", self, source, raw);
            }
        }
    }

    fn route_data(&self, data: DataMessage) -> PortResult<()> {
        let existing = {
            let mut bindings = self.inner.bindings.lock();

            if bindings.emit_channel.is_none() {
                if let Some(channel) = &data.channel {
                    bindings.emit_channel = Some(channel.clone());
                    bindings.state = Some(PortState::Active);
                    drop(bindings);
                    self.inner.signals.emit(PortSignal::Start);
                    return Ok(());
                }
            }

            if data.is_instance_close() {
                if let Some(to) = &data.to {
                    if bindings.instances.remove(to).is_none() {
                        log::debug!("close for unknown instance '{}'", to);
                    }
                }
                return Ok(());
            }

            let found = data
                .to
                .as_ref()
                .and_then(|to| bindings.instances.get(to).cloned());
            found
        };

        match (data.to, data.payload) {
            (Some(to), Some(DataPayload::Construct)) => {
                // A construct always yields a fresh instance; one already
                // living under `to` is replaced. Construct is therefore never
                // forwarded to a live instance, unlike every other payload.
                if let Ok(dispatcher) = self.create_instance(&to) {
                    let replaced = self
                        .inner
                        .bindings
                        .lock()
                        .instances
                        .insert(to.clone(), Arc::new(dispatcher));
                    if replaced.is_some() {
                        log::debug!("{} replaced instance '{}'", self, to);
                    }
                }
                Ok(())
            }
            (Some(to), Some(payload)) => match existing {
                Some(dispatcher) => dispatcher.dispatch(payload.addressed_to(&to)),
                None => Err(PortError::UnrecognizedMessage(format!(
                    "dropping message {}",
                    data.raw
                ))),
            },
            _ => Err(PortError::UnrecognizedMessage(format!(
                "dropping message {}",
                data.raw
            ))),
        }
    }

    // -----------------------------------------------------------------------
    // Instances
    // -----------------------------------------------------------------------

    /// Instantiate the registered provider for `id`.
    ///
    /// Does not store the result; the router does that on `construct`.
    /// Logs and returns [`PortError::NotProvided`] when nothing is registered.
    pub fn create_instance(&self, id: &str) -> PortResult<InstanceDispatcher> {
        let (factory, synchronous) = {
            let bindings = self.inner.bindings.lock();
            match &bindings.registration {
                Some(reg) => (reg.factory.clone(), reg.synchronous),
                None => {
                    drop(bindings);
                    log::warn!("{} {}", self, PortError::NotProvided);
                    return Err(PortError::NotProvided);
                }
            }
        };

        let provider: Box<dyn Provider> = factory();
        Ok(InstanceDispatcher::new(
            &self.inner,
            id.to_string(),
            provider,
            synchronous,
        ))
    }

    pub fn has_instance(&self, id: &str) -> bool {
        self.inner.bindings.lock().instances.contains_key(id)
    }

    /// The live dispatcher for `id`, if any.
    pub fn instance(&self, id: &str) -> Option<Arc<InstanceDispatcher>> {
        self.inner.bindings.lock().instances.get(id).cloned()
    }

    pub fn instance_count(&self) -> usize {
        self.inner.bindings.lock().instances.len()
    }

    /// Ids of live instances, sorted.
    pub fn instance_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.bindings.lock().instances.keys().cloned().collect();
        ids.sort();
        ids
    }

    // -----------------------------------------------------------------------
    // Interfaces
    // -----------------------------------------------------------------------

    /// The implementor-facing interface. Built on first use, then cached.
    pub fn get_interface(&self) -> ProviderInterface {
        self.inner
            .interface
            .get_or_init(|| ProviderInterface::build(&self.inner))
            .clone()
    }

    /// A proxy handle factory backed by the given id↔handle table.
    pub fn proxy_interface(&self, handles: HandleTable) -> ProxyInterface {
        ProxyInterface::new(self.clone(), handles)
    }

    /// Close the port: closing notice on the control channel (if any), local
    /// `Close` signal, registry and egress cleared.
    pub fn close(&self) {
        self.inner.close();
    }

    pub(crate) fn remove_instance(&self, id: &str) -> bool {
        self.inner.remove_instance(id)
    }

    pub(crate) fn emit_egress(&self, message: OutboundMessage) {
        self.inner.emit_egress(message);
    }

    // -----------------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------------

    pub fn on_start(&self, handler: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.inner.signals.on(PortSignal::Start, handler)
    }

    /// Register a one-shot listener for the port's close.
    pub fn once_close(&self, handler: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.inner.signals.once(PortSignal::Close, handler)
    }

    pub fn on_close(&self, handler: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.inner.signals.on(PortSignal::Close, handler)
    }

    pub fn off(&self, signal: PortSignal, id: ListenerId) -> bool {
        self.inner.signals.off(signal, id)
    }

    /// Number of listeners registered for `signal`.
    pub fn listener_count(&self, signal: PortSignal) -> usize {
        self.inner.signals.listener_count(signal)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn state(&self) -> PortState {
        self.inner.bindings.lock().state()
    }

    pub fn emit_channel(&self) -> Option<String> {
        self.inner.bindings.lock().emit_channel.clone()
    }

    pub fn control_channel(&self) -> Option<String> {
        self.inner.bindings.lock().control_channel.clone()
    }

    /// Whether a provider has been registered.
    pub fn is_provided(&self) -> bool {
        self.inner.bindings.lock().registration.is_some()
    }

    /// Calling convention of the current registration; `false` if none.
    pub fn is_synchronous(&self) -> bool {
        self.inner
            .bindings
            .lock()
            .registration
            .as_ref()
            .map_or(false, |r| r.synchronous)
    }

    pub fn schema(&self) -> &Arc<CapabilitySchema> {
        self.inner.schema()
    }

    pub fn config(&self) -> &PortConfig {
        self.inner.config()
    }
}

impl fmt::Display for ProviderPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

impl fmt::Debug for ProviderPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bindings = self.inner.bindings.lock();
        f.debug_struct("ProviderPort")
            .field("id", &self.inner.id)
            .field("state", &bindings.state())
            .field("control_channel", &bindings.control_channel)
            .field("emit_channel", &bindings.emit_channel)
            .field("provided", &bindings.registration.is_some())
            .field("instances", &bindings.instances.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::instance::ReplyHandle;
    use crate::port::sink::RecordingSink;
    use crate::schema::MemberDescriptor;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Process-wide logger that keeps records per thread, so each test only
    /// sees what it logged itself.
    mod capture {
        use std::sync::{Mutex, Once};
        use std::thread::{self, ThreadId};

        use log::{Level, LevelFilter, Log, Metadata, Record};

        struct ThreadLog;

        static LOGGER: ThreadLog = ThreadLog;
        static INSTALL: Once = Once::new();
        static RECORDS: Mutex<Vec<(ThreadId, Level, String)>> = Mutex::new(Vec::new());

        impl Log for ThreadLog {
            fn enabled(&self, _metadata: &Metadata) -> bool {
                true
            }

            fn log(&self, record: &Record) {
                let mut records = RECORDS.lock().unwrap_or_else(|e| e.into_inner());
                records.push((thread::current().id(), record.level(), record.args().to_string()));
            }

            fn flush(&self) {}
        }

        fn drain(me: ThreadId) -> Vec<(Level, String)> {
            let mut records = RECORDS.lock().unwrap_or_else(|e| e.into_inner());
            let mut mine = Vec::new();
            records.retain(|(thread, level, message)| {
                if *thread == me {
                    mine.push((*level, message.clone()));
                    false
                } else {
                    true
                }
            });
            mine
        }

        /// Run `f` and return the records it logged on the current thread.
        pub fn logs_during(f: impl FnOnce()) -> Vec<(Level, String)> {
            INSTALL.call_once(|| {
                if log::set_logger(&LOGGER).is_ok() {
                    log::set_max_level(LevelFilter::Trace);
                }
            });
            let me = thread::current().id();
            drain(me);
            f();
            drain(me)
        }
    }

    struct Doubler;

    impl Provider for Doubler {
        fn responds_to(&self, method: &str) -> bool {
            method == "ping"
        }

        fn call(&mut self, _method: &str, args: Vec<Value>) -> Value {
            let s = args.first().and_then(Value::as_str).unwrap_or_default();
            json!(format!("{}{}", s, s))
        }
    }

    fn ping_schema() -> CapabilitySchema {
        CapabilitySchema::new().with_member("ping", MemberDescriptor::method(vec![json!("string")]))
    }

    fn port() -> (ProviderPort, RecordingSink) {
        let sink = RecordingSink::new();
        (ProviderPort::new(ping_schema(), sink.clone()), sink)
    }

    fn adopt(port: &ProviderPort, channel: &str) {
        port.on_message(Source::Default, json!({"channel": channel}));
    }

    fn construct(port: &ProviderPort, id: &str) {
        port.on_message(Source::Default, json!({"to": id, "message": {"type": "construct"}}));
    }

    fn call(port: &ProviderPort, id: &str, method: &str, value: Value, req: &str) {
        port.on_message(
            Source::Default,
            json!({"to": id, "message": {"action": "method", "type": method, "value": value, "reqId": req}}),
        );
    }

    #[test]
    fn test_end_to_end_synchronous_ping() {
        let (port, sink) = port();
        port.get_interface().provide_synchronous(|| Doubler);

        adopt(&port, "egress");
        construct(&port, "i1");
        call(&port, "i1", "ping", json!("ab"), "r1");

        assert_eq!(
            sink.wire(),
            vec![(
                "egress".to_string(),
                json!({
                    "type": "method",
                    "to": "i1",
                    "message": {"to": "i1", "type": "method", "reqId": "r1", "name": "ping", "value": "abab"}
                })
            )]
        );
    }

    #[test]
    fn test_control_reverse_binds_and_announces() {
        let (port, sink) = port();
        let started = Arc::new(AtomicUsize::new(0));
        let s = started.clone();
        port.on_start(move || {
            s.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(port.state(), PortState::AwaitingChannel);
        port.on_message(Source::Control, json!({"reverse": "back", "channel": "out"}));

        assert_eq!(port.state(), PortState::Active);
        assert_eq!(port.emit_channel().as_deref(), Some("out"));
        assert_eq!(
            sink.wire(),
            vec![("out".to_string(), json!({"type": "channel announcement", "channel": "back"}))]
        );
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_adoption_consumes_message() {
        let (port, sink) = port();
        port.get_interface().provide_synchronous(|| Doubler);

        // Carries both a channel and a construct; only the adoption happens.
        port.on_message(
            Source::Default,
            json!({"channel": "egress", "to": "i1", "message": {"type": "construct"}}),
        );
        assert_eq!(port.emit_channel().as_deref(), Some("egress"));
        assert!(!port.has_instance("i1"));

        // Once bound, a channel field no longer short-circuits routing.
        port.on_message(
            Source::Default,
            json!({"channel": "other", "to": "i1", "message": {"type": "construct"}}),
        );
        assert_eq!(port.emit_channel().as_deref(), Some("egress"));
        assert!(port.has_instance("i1"));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_outbound_suppressed_until_bound() {
        let (port, sink) = port();
        port.get_interface().provide_synchronous(|| Doubler);

        construct(&port, "i1");
        call(&port, "i1", "ping", json!("x"), "r1");
        assert!(sink.is_empty());

        adopt(&port, "egress");
        call(&port, "i1", "ping", json!("x"), "r2");
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_construct_without_provider_yields_nothing() {
        let (port, _sink) = port();
        assert!(matches!(port.create_instance("i1"), Err(PortError::NotProvided)));

        adopt(&port, "egress");
        construct(&port, "i1");
        assert!(!port.has_instance("i1"));
        assert_eq!(port.instance_count(), 0);
    }

    #[test]
    fn test_construct_without_provider_logs_once() {
        let (port, _sink) = port();
        adopt(&port, "egress");

        let records = capture::logs_during(|| construct(&port, "i1"));

        assert_eq!(records.len(), 1, "{:?}", records);
        assert_eq!(records[0].0, log::Level::Warn);
        assert!(records[0].1.contains("not provided"));
    }

    #[test]
    fn test_construct_on_live_id_replaces_instance() {
        let (port, _sink) = port();
        port.get_interface().provide_synchronous(|| Doubler);
        adopt(&port, "egress");

        construct(&port, "i1");
        let first = port.instance("i1").unwrap();
        construct(&port, "i1");
        let second = port.instance("i1").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(port.instance_count(), 1);
    }

    #[test]
    fn test_reconstruct_after_close_creates_fresh_instance() {
        let (port, sink) = port();
        port.get_interface().provide_synchronous(|| Doubler);
        adopt(&port, "egress");

        construct(&port, "i1");
        let first = port.instance("i1").unwrap();

        port.on_message(Source::Default, json!({"to": "i1", "message": {"type": "close"}}));
        assert!(!port.has_instance("i1"));

        call(&port, "i1", "ping", json!("x"), "r1");
        assert!(sink.is_empty());

        construct(&port, "i1");
        let second = port.instance("i1").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_instances_are_multiplexed() {
        let (port, sink) = port();
        port.get_interface().provide_synchronous(|| Doubler);
        adopt(&port, "egress");

        construct(&port, "a");
        construct(&port, "b");
        call(&port, "b", "ping", json!("b"), "1");
        call(&port, "a", "ping", json!("a"), "2");

        let replies: Vec<(String, Value)> = sink
            .wire()
            .into_iter()
            .map(|(_, v)| (v["to"].as_str().unwrap().to_string(), v["message"]["value"].clone()))
            .collect();
        assert_eq!(
            replies,
            vec![("b".to_string(), json!("bb")), ("a".to_string(), json!("aa"))]
        );
        assert_eq!(port.instance_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_unrecognized_messages_are_dropped() {
        let (port, sink) = port();
        adopt(&port, "egress");

        port.on_message(Source::Default, json!({"to": "nobody", "message": {"type": "hello"}}));
        port.on_message(Source::Default, json!({"unexpected": true}));
        port.on_message(Source::Control, json!({"type": "bogus"}));
        port.on_message(Source::Default, json!(42));

        assert!(sink.is_empty());
        assert_eq!(port.state(), PortState::Active);
    }

    #[test]
    fn test_control_close_closes_port() {
        let (port, sink) = port();
        port.get_interface().provide_synchronous(|| Doubler);
        let closes = Arc::new(AtomicUsize::new(0));
        let c = closes.clone();
        port.once_close(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        port.on_message(Source::Control, json!({"type": "setup", "channel": "ctl"}));
        assert_eq!(port.control_channel().as_deref(), Some("ctl"));
        adopt(&port, "egress");
        construct(&port, "i1");

        port.on_message(Source::Control, json!({"type": "close", "channel": "ctl"}));

        assert_eq!(port.state(), PortState::Closed);
        assert_eq!(port.control_channel(), None);
        assert_eq!(port.emit_channel(), None);
        assert_eq!(port.instance_count(), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        // Control channel was cleared before the close, so no notice.
        assert!(sink.is_empty());
    }

    #[test]
    fn test_foreign_control_close_is_ignored() {
        let (port, _sink) = port();
        port.on_message(Source::Control, json!({"type": "setup", "channel": "ctl"}));
        port.on_message(Source::Control, json!({"type": "close", "channel": "someone-else"}));
        assert_ne!(port.state(), PortState::Closed);
        assert_eq!(port.control_channel().as_deref(), Some("ctl"));
    }

    #[test]
    fn test_explicit_close_emits_single_notice() {
        let (port, sink) = port();
        let closes = Arc::new(AtomicUsize::new(0));
        let c = closes.clone();
        port.on_close(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        port.on_message(Source::Control, json!({"type": "setup", "channel": "ctl"}));
        adopt(&port, "egress");
        port.close();
        port.close();

        assert_eq!(
            sink.wire(),
            vec![("ctl".to_string(), json!({"type": "Provider Closing", "request": "close"}))]
        );
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_without_control_channel_emits_nothing() {
        let (port, sink) = port();
        adopt(&port, "egress");
        port.close();
        assert!(sink.is_empty());
        assert_eq!(port.state(), PortState::Closed);
    }

    #[test]
    fn test_closed_is_terminal() {
        let (port, sink) = port();
        port.get_interface().provide_synchronous(|| Doubler);
        adopt(&port, "egress");
        port.close();

        adopt(&port, "again");
        port.on_message(Source::Control, json!({"reverse": "r", "channel": "again"}));
        construct(&port, "i1");

        assert_eq!(port.state(), PortState::Closed);
        assert_eq!(port.emit_channel(), None);
        assert!(!port.has_instance("i1"));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_display() {
        let (port, _sink) = port();
        assert_eq!(port.to_string(), "[unbound Provider]");
        adopt(&port, "egress");
        assert_eq!(port.to_string(), "[Provider egress]");

        let labelled = ProviderPort::builder(ping_schema(), RecordingSink::new())
            .config(PortConfig::default().with_label("social"))
            .build();
        assert_eq!(labelled.to_string(), "[unbound Provider (social)]");
    }

    #[test]
    fn test_provision_last_write_wins() {
        struct Echo;
        impl Provider for Echo {
            fn responds_to(&self, method: &str) -> bool {
                method == "ping"
            }
            fn call_async(&mut self, _method: &str, args: Vec<Value>, reply: ReplyHandle) {
                reply.send(args.into_iter().next().unwrap_or(Value::Null));
            }
        }

        let (port, sink) = port();
        let iface = port.get_interface();
        iface.provide_synchronous(|| Doubler);
        assert!(port.is_synchronous());
        iface.provide_asynchronous(|| Echo);
        assert!(!port.is_synchronous());

        adopt(&port, "egress");
        construct(&port, "i1");
        call(&port, "i1", "ping", json!("ab"), "r1");
        assert_eq!(sink.wire()[0].1["message"]["value"], json!("ab"));
    }
}
