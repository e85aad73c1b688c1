//! # Provider Port
//!
//! Exposes a schema-described capability to a peer across a single channel
//! and multiplexes many live instances of it over that channel.
//!
//! ## Architecture
//!
//! ```text
//! transport ──on_message(source, msg)──▶ ProviderPort (router)
//!                                          │ construct  → ProviderFactory → InstanceDispatcher
//!                                          │ method     → InstanceDispatcher → Provider::call / call_async
//!                                          │ close      → registry / port teardown
//!                                          ▼
//!                                    MessageSink::emit(channel, OutboundMessage)
//! ```
//!
//! The implementor receives a [`ProviderInterface`] (provision + constants);
//! holders of instance handles receive a [`ProxyInterface`].

pub mod handles;
pub mod instance;
pub mod interface;
pub mod messages;
pub mod proxy;
pub mod router;
pub mod signals;
pub mod sink;

pub use handles::{HandleTable, InterfaceHandle};
pub use instance::{EventDispatcher, InstanceDispatcher, Provider, ReplyHandle};
pub use interface::ProviderInterface;
pub use messages::{DataPayload, InboundMessage, MethodCall, OutboundMessage, Source};
pub use proxy::ProxyInterface;
pub use router::{PortBuilder, PortState, ProviderPort};
pub use signals::{ListenerId, PortSignal};
pub use sink::{ChannelSink, MessageSink, RecordingSink};
