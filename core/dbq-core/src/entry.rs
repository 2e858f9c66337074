//! The abstract queue entry handed in and out by the façade.

use crate::id::next_unique_id;

/// Lowest priority.
pub const MIN_PRIORITY: i32 = 0;
/// Default priority.
pub const NORM_PRIORITY: i32 = 5;
/// Highest priority.
pub const MAX_PRIORITY: i32 = 9;

/// One queue entry: placement metadata plus payload.
///
/// `unique_id` orders entries of equal priority (FIFO) and identifies the
/// entry's ref. `meat_id` identifies the payload; entries of a ref-counted
/// store that share a `meat_id` share one payload row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub unique_id: i64,
    pub priority: i32,
    pub persistent: bool,
    pub size_in_bytes: i64,
    /// Tells the codec how to rehydrate the entry, e.g. `MSG_RAW|callback`
    pub embedded_type: String,
    pub meat_id: i64,
    /// Number of refs sharing the payload, as last read from the store
    pub ref_count: i64,
    pub content: Vec<u8>,
    pub qos: Option<String>,
    pub key: Option<String>,
    pub method_name: String,
    pub meta_info: String,
    pub flag1: String,
}

impl QueueEntry {
    /// New entry with a fresh id. Its size defaults to the payload length.
    pub fn new(priority: i32, embedded_type: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self::with_id(next_unique_id(), priority, embedded_type, content)
    }

    /// New entry with an explicit id (also used as its meat id).
    pub fn with_id(
        unique_id: i64,
        priority: i32,
        embedded_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        let content = content.into();
        Self {
            unique_id,
            priority,
            persistent: true,
            size_in_bytes: content.len() as i64,
            embedded_type: embedded_type.into(),
            meat_id: unique_id,
            ref_count: 0,
            content,
            qos: None,
            key: None,
            method_name: String::new(),
            meta_info: String::new(),
            flag1: String::new(),
        }
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn size(mut self, size_in_bytes: i64) -> Self {
        self.size_in_bytes = size_in_bytes;
        self
    }

    /// Share the payload of another entry with the same meat id.
    pub fn meat_id(mut self, meat_id: i64) -> Self {
        self.meat_id = meat_id;
        self
    }

    pub fn qos(mut self, qos: impl Into<String>) -> Self {
        self.qos = Some(qos.into());
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn method_name(mut self, method_name: impl Into<String>) -> Self {
        self.method_name = method_name.into();
        self
    }

    pub fn meta_info(mut self, meta_info: impl Into<String>) -> Self {
        self.meta_info = meta_info.into();
        self
    }

    /// Delivery order: priority descending, then id ascending.
    pub fn delivery_cmp(&self, other: &QueueEntry) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(self.unique_id.cmp(&other.unique_id))
    }

    /// Eviction order: priority ascending, then id descending.
    pub fn eviction_cmp(&self, other: &QueueEntry) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then(other.unique_id.cmp(&self.unique_id))
    }
}
