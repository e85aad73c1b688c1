//! # Capability Schemas
//!
//! A capability schema is the declarative description of what a provider
//! exposes: constants, properties, methods and events. The port never
//! mutates a schema; it reads it to build the implementor-facing interface,
//! to decide which events may be emitted, and to conform event payloads.
//!
//! ```yaml
//! ERRCODE:
//!   type: constant
//!   value: { OFFLINE: "User is currently offline" }
//! sendMessage:
//!   type: method
//!   value: [string, string]
//! onMessage:
//!   type: event
//!   value: { from: string, message: string }
//! ```

pub mod conform;
pub mod definition;
pub mod registry;

pub use conform::{Conform, SchemaConformer};
pub use definition::{CapabilitySchema, MemberDescriptor, MemberKind};
pub use registry::SchemaRegistry;
