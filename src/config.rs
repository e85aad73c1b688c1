//! Port configuration.
//!
//! Decides the two protocol behaviours the wire format leaves open: what
//! happens when a call names a method the provider lacks, and whether an
//! asynchronous reply handle may be used more than once.
//!
//! ```rust
//! use capability_port::config::{MissingMethodPolicy, PortConfig, ReplyPolicy};
//!
//! let config = PortConfig::default()
//!     .with_missing_method(MissingMethodPolicy::ErrorReply)
//!     .with_reply_policy(ReplyPolicy::OneShot)
//!     .with_label("social");
//! assert_eq!(config.label.as_deref(), Some("social"));
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PortResult;

/// Behaviour when a method call targets a method the instance lacks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingMethodPolicy {
    /// Log and drop. The caller's pending request is never answered.
    #[default]
    Drop,
    /// Log, then emit a method reply with `value: null` and an `error` field.
    ErrorReply,
}

/// How often an asynchronous reply handle may emit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyPolicy {
    /// Every invocation emits a reply.
    #[default]
    Repeatable,
    /// Only the first invocation emits; later ones are logged and ignored.
    OneShot,
}

impl std::str::FromStr for MissingMethodPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "error_reply" | "error-reply" => Ok(Self::ErrorReply),
            other => Err(format!("unknown missing-method policy '{}'", other)),
        }
    }
}

impl std::str::FromStr for ReplyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "repeatable" => Ok(Self::Repeatable),
            "one_shot" | "one-shot" | "oneshot" => Ok(Self::OneShot),
            other => Err(format!("unknown reply policy '{}'", other)),
        }
    }
}

/// Configuration for a [`ProviderPort`](crate::port::ProviderPort).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    #[serde(default)]
    pub missing_method: MissingMethodPolicy,

    #[serde(default)]
    pub reply_policy: ReplyPolicy,

    /// Optional label included in diagnostics.
    #[serde(default)]
    pub label: Option<String>,
}

impl PortConfig {
    pub fn with_missing_method(mut self, policy: MissingMethodPolicy) -> Self {
        self.missing_method = policy;
        self
    }

    pub fn with_reply_policy(mut self, policy: ReplyPolicy) -> Self {
        self.reply_policy = policy;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Parse a configuration from YAML.
    pub fn from_yaml(yaml: &str) -> PortResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse a configuration from a YAML file.
    pub fn from_yaml_file(path: &Path) -> PortResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Apply `CAPABILITY_PORT_*` environment overrides.
    ///
    /// Unparseable values are logged and ignored.
    pub fn with_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup("CAPABILITY_PORT_MISSING_METHOD") {
            match raw.parse() {
                Ok(policy) => self.missing_method = policy,
                Err(e) => log::warn!("Ignoring CAPABILITY_PORT_MISSING_METHOD: {}", e),
            }
        }
        if let Some(raw) = lookup("CAPABILITY_PORT_REPLY_POLICY") {
            match raw.parse() {
                Ok(policy) => self.reply_policy = policy,
                Err(e) => log::warn!("Ignoring CAPABILITY_PORT_REPLY_POLICY: {}", e),
            }
        }
        if let Some(label) = lookup("CAPABILITY_PORT_LABEL") {
            self.label = Some(label);
        }
        self
    }
}
