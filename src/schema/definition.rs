//! Capability schema definition: member name → `{type, value}` descriptor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PortError, PortResult};

/// The kind of a schema member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    /// A value exposed frozen on the provider interface.
    Constant,
    /// A property; carried only on the wire.
    Property,
    /// A callable method. `value` lists parameter type tags.
    Method,
    /// An event the provider may emit. `value` describes the payload shape.
    Event,
}

/// One schema entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberDescriptor {
    #[serde(rename = "type", alias = "kind")]
    pub kind: MemberKind,

    #[serde(default)]
    pub value: Value,
}

impl MemberDescriptor {
    pub fn new(kind: MemberKind, value: Value) -> Self {
        Self { kind, value }
    }

    pub fn constant(value: Value) -> Self {
        Self::new(MemberKind::Constant, value)
    }

    pub fn property(value: Value) -> Self {
        Self::new(MemberKind::Property, value)
    }

    /// A method descriptor from its ordered parameter type tags.
    pub fn method(params: Vec<Value>) -> Self {
        Self::new(MemberKind::Method, Value::Array(params))
    }

    pub fn event(shape: Value) -> Self {
        Self::new(MemberKind::Event, shape)
    }
}

/// Immutable mapping from member name to descriptor.
///
/// Ordered by name so that interface construction and diagnostics are
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySchema {
    members: BTreeMap<String, MemberDescriptor>,
}

impl CapabilitySchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style member insertion.
    pub fn with_member(mut self, name: impl Into<String>, descriptor: MemberDescriptor) -> Self {
        self.members.insert(name.into(), descriptor);
        self
    }

    /// Insert or replace a member.
    pub fn insert(&mut self, name: impl Into<String>, descriptor: MemberDescriptor) {
        self.members.insert(name.into(), descriptor);
    }

    /// Parse a schema from YAML and validate it.
    pub fn from_yaml(yaml: &str) -> PortResult<Self> {
        let schema: Self = serde_yaml::from_str(yaml)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Parse a schema from JSON text and validate it.
    pub fn from_json(json: &str) -> PortResult<Self> {
        let schema: Self = serde_json::from_str(json)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Build a schema from an already-parsed JSON value.
    pub fn from_value(value: Value) -> PortResult<Self> {
        let schema: Self = serde_json::from_value(value)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Structural checks: method values must be parameter lists, event
    /// values must be a shape (object, list or type tag).
    pub fn validate(&self) -> PortResult<()> {
        for (name, member) in &self.members {
            match member.kind {
                MemberKind::Method if !member.value.is_array() => {
                    return Err(PortError::Schema(format!(
                        "method '{}' must declare a parameter list, got {}",
                        name, member.value
                    )));
                }
                MemberKind::Event
                    if !(member.value.is_object()
                        || member.value.is_array()
                        || member.value.is_string()) =>
                {
                    return Err(PortError::Schema(format!(
                        "event '{}' must declare a payload shape, got {}",
                        name, member.value
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&MemberDescriptor> {
        self.members.get(name)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// All members in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MemberDescriptor)> {
        self.members.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Members of a single kind.
    pub fn of_kind(&self, kind: MemberKind) -> impl Iterator<Item = (&str, &MemberDescriptor)> {
        self.iter().filter(move |(_, m)| m.kind == kind)
    }

    pub fn constants(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.of_kind(MemberKind::Constant).map(|(k, m)| (k, &m.value))
    }

    /// Declared events and their payload shapes.
    pub fn events(&self) -> BTreeMap<String, Value> {
        self.of_kind(MemberKind::Event)
            .map(|(k, m)| (k.to_string(), m.value.clone()))
            .collect()
    }

    /// Declared method names.
    pub fn method_names(&self) -> Vec<&str> {
        self.of_kind(MemberKind::Method).map(|(k, _)| k).collect()
    }
}
