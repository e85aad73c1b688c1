//! Egress boundary, where outbound messages leave the port.
//!
//! The transport that carries messages between isolation contexts is not part
//! of this crate. A port only needs something that accepts `(channel,
//! message)` pairs; [`MessageSink`] is that seam.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::messages::OutboundMessage;

/// Accepts outbound messages addressed to a channel.
pub trait MessageSink: Send + Sync {
    fn emit(&self, channel: &str, message: OutboundMessage);
}

/// Forwards rendered messages into a tokio channel.
///
/// A send on a dropped receiver is logged and ignored: there is no one left
/// to deliver to.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(String, Value)>,
}

impl ChannelSink {
    /// Create a sink and the receiver the transport drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, Value)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MessageSink for ChannelSink {
    fn emit(&self, channel: &str, message: OutboundMessage) {
        if self.tx.send((channel.to_string(), message.to_value())).is_err() {
            log::debug!("ChannelSink: receiver dropped, discarding message for {}", channel);
        }
    }
}

/// Keeps every emitted message in memory, in emission order.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<(String, OutboundMessage)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn messages(&self) -> Vec<(String, OutboundMessage)> {
        self.records.lock().clone()
    }

    /// Emitted messages rendered to their wire shape.
    pub fn wire(&self) -> Vec<(String, Value)> {
        self.records
            .lock()
            .iter()
            .map(|(channel, msg)| (channel.clone(), msg.to_value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drain and return everything recorded.
    pub fn take(&self) -> Vec<(String, OutboundMessage)> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl MessageSink for RecordingSink {
    fn emit(&self, channel: &str, message: OutboundMessage) {
        self.records.lock().push((channel.to_string(), message));
    }
}

impl<S: MessageSink + ?Sized> MessageSink for Arc<S> {
    fn emit(&self, channel: &str, message: OutboundMessage) {
        (**self).emit(channel, message)
    }
}
