//! Physical data model: Store, Meat and Ref rows plus aggregate counts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical identity of a store: `(node, type, postfix)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageId {
    /// Cluster node scope
    pub node: String,
    /// Queue category: history, callback, session, msgUnitStore, ...
    pub store_type: String,
    /// Disambiguating suffix, e.g. the client name
    pub postfix: String,
}

impl StorageId {
    pub fn new(
        node: impl Into<String>,
        store_type: impl Into<String>,
        postfix: impl Into<String>,
    ) -> Self {
        Self {
            node: node.into(),
            store_type: store_type.into(),
            postfix: postfix.into(),
        }
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.node, self.store_type, self.postfix)
    }
}

/// A persisted store row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store {
    /// Surrogate key, generated once at creation
    pub id: i64,
    pub storage_id: StorageId,
    /// Entries are refs pointing at shared meats (otherwise meat-only)
    pub ref_counted: bool,
    pub flag1: String,
}

impl Store {
    pub fn node(&self) -> &str {
        &self.storage_id.node
    }

    pub fn store_type(&self) -> &str {
        &self.storage_id.store_type
    }

    pub fn postfix(&self) -> &str {
        &self.storage_id.postfix
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.storage_id, self.id)
    }
}

/// A payload row, possibly shared by several refs of the same store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Meat {
    pub id: i64,
    pub store_id: i64,
    pub durable: bool,
    /// Number of refs pointing at this meat
    pub ref_count: i64,
    pub byte_size: i64,
    /// Embedded type discriminator used to rehydrate the entry
    pub data_type: String,
    pub flag1: String,
    pub qos: Option<String>,
    pub content: Option<Vec<u8>>,
    pub key: Option<String>,
}

/// A placement row inside a queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ref {
    /// Insertion-ordered id, tie-break within equal priority
    pub id: i64,
    pub store_id: i64,
    pub meat_id: Option<i64>,
    pub durable: bool,
    pub byte_size: i64,
    pub meta_info: String,
    pub flag1: String,
    /// Higher is more urgent
    pub prio: i32,
    pub method_name: String,
}

/// Aggregate entry/byte counts of a store, split by durability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryCount {
    pub num_of_entries: i64,
    pub num_of_bytes: i64,
    pub num_of_persistent_entries: i64,
    pub num_of_persistent_bytes: i64,
}

impl EntryCount {
    pub const ZERO: EntryCount = EntryCount {
        num_of_entries: 0,
        num_of_bytes: 0,
        num_of_persistent_entries: 0,
        num_of_persistent_bytes: 0,
    };

    /// Count of a single entry.
    pub fn of(byte_size: i64, persistent: bool) -> Self {
        Self {
            num_of_entries: 1,
            num_of_bytes: byte_size,
            num_of_persistent_entries: i64::from(persistent),
            num_of_persistent_bytes: if persistent { byte_size } else { 0 },
        }
    }

    pub fn add(&mut self, other: &EntryCount) {
        self.num_of_entries += other.num_of_entries;
        self.num_of_bytes += other.num_of_bytes;
        self.num_of_persistent_entries += other.num_of_persistent_entries;
        self.num_of_persistent_bytes += other.num_of_persistent_bytes;
    }

    /// Subtract, clamping every field at zero.
    pub fn subtract(&mut self, other: &EntryCount) {
        self.num_of_entries = (self.num_of_entries - other.num_of_entries).max(0);
        self.num_of_bytes = (self.num_of_bytes - other.num_of_bytes).max(0);
        self.num_of_persistent_entries =
            (self.num_of_persistent_entries - other.num_of_persistent_entries).max(0);
        self.num_of_persistent_bytes =
            (self.num_of_persistent_bytes - other.num_of_persistent_bytes).max(0);
    }
}

impl fmt::Display for EntryCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entries={} bytes={} persistentEntries={} persistentBytes={}",
            self.num_of_entries,
            self.num_of_bytes,
            self.num_of_persistent_entries,
            self.num_of_persistent_bytes
        )
    }
}
