//! # capability-port
//!
//! Provider-side routing for capability messaging. A [`ProviderPort`] lets an
//! isolated context expose a schema-described capability to a peer over one
//! logical channel: it answers the channel handshakes, creates one provider
//! instance per peer-chosen id, dispatches method calls under either a
//! synchronous or an asynchronous calling convention, and emits replies and
//! declared events back over a single egress channel.
//!
//! ```
//! use capability_port::port::{Provider, ProviderPort, RecordingSink, Source};
//! use capability_port::schema::CapabilitySchema;
//! use serde_json::{json, Value};
//!
//! struct Doubler;
//!
//! impl Provider for Doubler {
//!     fn responds_to(&self, method: &str) -> bool {
//!         method == "ping"
//!     }
//!     fn call(&mut self, _method: &str, args: Vec<Value>) -> Value {
//!         let s = args[0].as_str().unwrap_or_default();
//!         json!(format!("{s}{s}"))
//!     }
//! }
//!
//! let schema = CapabilitySchema::from_yaml("ping:\n  type: method\n  value: [string]\n").unwrap();
//! let sink = RecordingSink::new();
//! let port = ProviderPort::new(schema, sink.clone());
//! port.get_interface().provide_synchronous(|| Doubler);
//!
//! port.on_message(Source::Default, json!({"channel": "egress"}));
//! port.on_message(Source::Default, json!({"to": "i1", "message": {"type": "construct"}}));
//! port.on_message(
//!     Source::Default,
//!     json!({"to": "i1", "message": {"action": "method", "type": "ping", "value": "ab", "reqId": "r1"}}),
//! );
//!
//! let (_, reply) = &sink.wire()[0];
//! assert_eq!(reply["message"]["value"], "abab");
//! ```

pub mod config;
pub mod error;
pub mod port;
pub mod schema;

pub use config::PortConfig;
pub use error::{PortError, PortResult};
pub use port::{ProviderInterface, ProviderPort, ProxyInterface};
pub use schema::{CapabilitySchema, SchemaRegistry};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
