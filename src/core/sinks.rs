//! Fire-and-forget event sinks fed by the executor.

use std::sync::mpsc::{self, Receiver, Sender};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("sink disconnected: {0}")]
    Disconnected(String),
    #[error("sink rejected event: {0}")]
    Rejected(String),
}

/// One executor event, published on a named channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecEvent {
    pub channel: String,
    pub payload: Value,
}

impl ExecEvent {
    pub fn new(channel: impl Into<String>, payload: Value) -> Self {
        Self { channel: channel.into(), payload }
    }
}

/// Receiver of executor events. `emit` must not block; the executor logs and
/// drops any error it returns.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ExecEvent) -> Result<(), SinkError>;
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<ExecEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExecEvent> {
        self.events.lock().clone()
    }

    pub fn drain(&self) -> Vec<ExecEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &ExecEvent) -> Result<(), SinkError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Forwards events over an unbounded std channel.
pub struct ChannelSink {
    tx: Mutex<Sender<ExecEvent>>,
}

impl ChannelSink {
    pub fn new(tx: Sender<ExecEvent>) -> Self {
        Self { tx: Mutex::new(tx) }
    }

    /// A sink plus the receiving end of its channel.
    pub fn channel() -> (Self, Receiver<ExecEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &ExecEvent) -> Result<(), SinkError> {
        self.tx
            .lock()
            .send(event.clone())
            .map_err(|e| SinkError::Disconnected(e.0.channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_sink_collects() {
        let sink = MemorySink::new();
        sink.emit(&ExecEvent::new("codex.node", json!({"op": "logic:∧"}))).unwrap();
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.drain().len(), 1);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn channel_sink_reports_disconnect() {
        let (sink, rx) = ChannelSink::channel();
        sink.emit(&ExecEvent::new("a", Value::Null)).unwrap();
        assert_eq!(rx.recv().unwrap().channel, "a");
        drop(rx);
        assert_eq!(
            sink.emit(&ExecEvent::new("b", Value::Null)),
            Err(SinkError::Disconnected("b".into()))
        );
    }
}
