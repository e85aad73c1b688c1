//! Wire messages exchanged with the transport.
//!
//! Inbound traffic arrives as loosely-shaped JSON tagged by `type`/`action`
//! fields. It is parsed exactly once into [`InboundMessage`], a closed union
//! the router matches exhaustively; anything that fits no variant becomes
//! [`InboundMessage::Unrecognized`]. Outbound traffic is built as
//! [`OutboundMessage`] and rendered to JSON only at the sink boundary.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Which inbound flow a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// Port lifecycle handshakes.
    Control,
    /// Capability traffic.
    Default,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Default => "default",
        }
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "control" => Ok(Self::Control),
            "default" => Ok(Self::Default),
            other => Err(format!("unknown message source '{}'", other)),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A parsed inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// `{reverse, channel}` on control: bind the egress channel.
    ControlReverse { reverse: String, channel: String },
    /// `{type: setup, channel}` on control.
    ControlSetup { channel: String },
    /// `{type: close, channel}` on control.
    ControlClose { channel: Option<String> },
    /// Anything on the default flow that parsed structurally.
    Data(DataMessage),
    /// Fits no variant; logged and dropped.
    Unrecognized { source: Source, raw: Value },
}

/// A data-flow message. Which router rule applies depends on port state, so
/// the optional fields are kept rather than collapsed into a single variant.
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    /// Channel carried by an adoption handshake.
    pub channel: Option<String>,
    /// Target instance id.
    pub to: Option<String>,
    /// Outer `type`, used by the outer-form instance close.
    pub kind: Option<String>,
    /// Parsed inner payload.
    pub payload: Option<DataPayload>,
    pub raw: Value,
}

impl DataMessage {
    /// `{to, message: {type: close}}`, or the outer form `{type: close, to}`.
    pub fn is_instance_close(&self) -> bool {
        self.to.is_some()
            && (self.kind.as_deref() == Some("close")
                || matches!(self.payload, Some(DataPayload::Close)))
    }
}

/// The inner `message` of a data-flow message.
#[derive(Debug, Clone, PartialEq)]
pub enum DataPayload {
    Construct,
    Close,
    MethodCall(MethodCall),
    /// Structurally valid but not meaningful to a provider.
    Other(Value),
}

/// A method invocation addressed to an instance.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    /// Instance id the call is addressed to (patched from the outer `to`).
    pub to: String,
    pub method: String,
    /// Positional arguments; a bare or absent value becomes a single argument.
    pub args: Vec<Value>,
    /// Correlation token echoed in the reply.
    pub req_id: Value,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    channel: Option<String>,
    reverse: Option<String>,
    to: Option<String>,
    message: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    action: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    value: Option<Value>,
    #[serde(rename = "reqId")]
    req_id: Option<Value>,
}

impl InboundMessage {
    /// Parse a raw message received on `source`.
    pub fn parse(source: Source, raw: Value) -> Self {
        let msg: RawMessage = match serde_json::from_value(raw.clone()) {
            Ok(m) => m,
            Err(_) => return Self::Unrecognized { source, raw },
        };

        match source {
            Source::Control => {
                if let (Some(reverse), Some(channel)) = (msg.reverse, msg.channel.clone()) {
                    return Self::ControlReverse { reverse, channel };
                }
                match msg.kind.as_deref() {
                    Some("setup") => match msg.channel {
                        Some(channel) => Self::ControlSetup { channel },
                        None => Self::Unrecognized { source, raw },
                    },
                    Some("close") => Self::ControlClose {
                        channel: msg.channel,
                    },
                    _ => Self::Unrecognized { source, raw },
                }
            }
            Source::Default => {
                let payload = msg.message.map(DataPayload::parse);
                Self::Data(DataMessage {
                    channel: msg.channel,
                    to: msg.to,
                    kind: msg.kind,
                    payload,
                    raw,
                })
            }
        }
    }
}

impl DataPayload {
    fn parse(raw: Value) -> Self {
        let payload: RawPayload = match serde_json::from_value(raw.clone()) {
            Ok(p) => p,
            Err(_) => return Self::Other(raw),
        };

        if payload.action.as_deref() == Some("method") {
            return match payload.kind {
                Some(method) => Self::MethodCall(MethodCall {
                    to: String::new(),
                    method,
                    args: normalize_args(payload.value),
                    req_id: payload.req_id.unwrap_or(Value::Null),
                }),
                None => Self::Other(raw),
            };
        }

        match payload.kind.as_deref() {
            Some("construct") => Self::Construct,
            Some("close") => Self::Close,
            _ => Self::Other(raw),
        }
    }

    /// Attach the routing target to a method call.
    pub fn addressed_to(self, to: &str) -> Self {
        match self {
            Self::MethodCall(mut call) => {
                call.to = to.to_string();
                Self::MethodCall(call)
            }
            other => other,
        }
    }
}

/// A list stays positional; anything else, including an absent value, is a
/// single argument.
fn normalize_args(value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(args)) => args,
        Some(other) => vec![other],
        None => vec![Value::Null],
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Messages the port emits.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Sent after a control-reverse handshake, carrying the reverse channel.
    ChannelAnnouncement { channel: String },
    /// Reply to a method call.
    MethodReply {
        to: String,
        req_id: Value,
        name: String,
        value: Value,
        error: Option<String>,
    },
    /// Event emitted by a provider instance.
    Event { to: String, name: String, value: Value },
    /// Notice that one instance was closed locally.
    InstanceClose { to: String },
    /// Closing notice on the control channel.
    ProviderClosing,
}

impl OutboundMessage {
    /// Render to the wire shape.
    pub fn to_value(&self) -> Value {
        match self {
            Self::ChannelAnnouncement { channel } => json!({
                "type": "channel announcement",
                "channel": channel,
            }),
            Self::MethodReply {
                to,
                req_id,
                name,
                value,
                error,
            } => {
                let mut message = json!({
                    "to": to,
                    "type": "method",
                    "reqId": req_id,
                    "name": name,
                    "value": value,
                });
                if let Some(error) = error {
                    message["error"] = Value::String(error.clone());
                }
                json!({
                    "type": "method",
                    "to": to,
                    "message": message,
                })
            }
            Self::Event { to, name, value } => json!({
                "type": "message",
                "to": to,
                "message": {
                    "name": name,
                    "type": "event",
                    "value": value,
                },
            }),
            Self::InstanceClose { to } => json!({
                "type": "close",
                "to": to,
            }),
            Self::ProviderClosing => json!({
                "type": "Provider Closing",
                "request": "close",
            }),
        }
    }
}

impl From<&OutboundMessage> for Value {
    fn from(message: &OutboundMessage) -> Self {
        message.to_value()
    }
}
