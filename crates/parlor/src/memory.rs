//! The memory-store seam: the narrow interface to durable session
//! storage.
//!
//! The core owns no persistent state. When a router decides something
//! is worth keeping (room-wide SET.DATA traffic), it appends through
//! this trait; what durability means is the collaborator's business.

use parlor_protocol::ClientId;

/// A shared append-only memory log keyed by (text, data, from).
pub trait MemoryStore: Send {
    /// Appends one entry.
    fn add(&mut self, key: &str, value: &serde_json::Value, from: &ClientId);

    /// Flushes and closes the sink. Called exactly once at shutdown;
    /// later `add` calls are allowed to be dropped.
    fn close(&mut self);
}

/// A memory store that keeps nothing. The default when no store is
/// configured.
#[derive(Debug, Default)]
pub struct NullMemory;

impl MemoryStore for NullMemory {
    fn add(&mut self, _key: &str, _value: &serde_json::Value, _from: &ClientId) {}

    fn close(&mut self) {}
}

/// One recorded entry in a [`BufferMemory`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntry {
    /// The entry key (the message's text label).
    pub key: String,
    /// The recorded payload.
    pub value: serde_json::Value,
    /// Who produced it.
    pub from: ClientId,
}

/// An in-process memory store. Good enough for short sessions and for
/// asserting on recorded traffic in tests.
#[derive(Debug, Default)]
pub struct BufferMemory {
    /// Recorded entries, in arrival order.
    pub entries: Vec<MemoryEntry>,
    closed: bool,
}

impl BufferMemory {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once the sink was closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl MemoryStore for BufferMemory {
    fn add(&mut self, key: &str, value: &serde_json::Value, from: &ClientId) {
        if self.closed {
            tracing::debug!(key, "memory add after close, dropping");
            return;
        }
        self.entries.push(MemoryEntry {
            key: key.to_string(),
            value: value.clone(),
            from: from.clone(),
        });
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
