//! Accessor: the transactional engine behind every queue.
//!
//! [`QueueStorage`] is the operation interface. [`DatabaseAccessor`] implements
//! it against a [`ConnectionPool`]; [`RetryingAccessor`] decorates any
//! implementation with bounded retries of transient failures.
//! [`AccessorRegistry`] shares one accessor between all queues configured
//! with the same key.

mod engine;
mod listener;
mod registry;
mod retry;

pub use engine::DatabaseAccessor;
pub use listener::{ProblemListeners, StorageProblemListener, StorageStatus};
pub use registry::AccessorRegistry;
pub use retry::{RetryingAccessor, retry_transient};

use crate::config::AccessorConfig;
use crate::entry::QueueEntry;
use crate::error::DbqResult;
use crate::model::{EntryCount, Meat, StorageId, Store};
use crate::pool::ConnectionPool;
use crate::schema::LowestWalk;
use std::sync::Arc;

/// How [`QueueStorage::modify_entry`] rewrites a meat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyMode {
    /// Rewrite content, qos, key, flags, size and counter
    Full,
    /// Only overwrite the reference counter
    RefCountersOnly,
}

/// Read selections served by [`QueueStorage::get_entries`].
///
/// Limits follow one rule everywhere: negative means unlimited, and a byte
/// limit never prevents the first entry from being returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryQuery {
    /// Head of the queue in delivery order
    First { max_entries: i64, max_bytes: i64 },
    /// Delivery order restricted to `min_prio..=max_prio`
    ByPriority {
        max_entries: i64,
        max_bytes: i64,
        min_prio: i32,
        max_prio: i32,
    },
    /// Entries sharing the highest priority present
    SamePriority { max_entries: i64, max_bytes: i64 },
    /// Entries after `(prio, id)` in delivery order
    StartAt {
        max_entries: i64,
        max_bytes: i64,
        prio: i32,
        id: i64,
    },
    /// Entries before `(prio, id)` in delivery order
    WithLimit { prio: i32, id: i64, inclusive: bool },
    /// Explicit ids, missing ones skipped
    ByIds(Vec<i64>),
    /// Non-persistent entries
    Transients,
}

impl EntryQuery {
    pub fn first(max_entries: i64, max_bytes: i64) -> Self {
        EntryQuery::First {
            max_entries,
            max_bytes,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            EntryQuery::First { .. } => "getEntries",
            EntryQuery::ByPriority { .. } => "getEntriesByPriority",
            EntryQuery::SamePriority { .. } => "getEntriesBySamePriority",
            EntryQuery::StartAt { .. } => "getEntriesStartAt",
            EntryQuery::WithLimit { .. } => "getEntriesWithLimit",
            EntryQuery::ByIds(_) => "getEntriesByIds",
            EntryQuery::Transients => "getTransientEntries",
        }
    }
}

/// Result of [`QueueStorage::get_and_delete_lowest`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LowestResult {
    /// Entries in eviction order
    pub entries: Vec<QueueEntry>,
    pub count: EntryCount,
}

/// The queue storage operations.
///
/// # Contract
///
/// - Every operation fails with `Unavailable` without touching the pool while
///   the storage is disconnected; a successful [`ping`](Self::ping) reconnects.
/// - Failures are classified as `Unavailable` (backend lost, decided by
///   re-pinging) or `Unknown` (single operation failed); raw driver errors
///   never escape.
/// - Multi-statement mutations run in one transaction.
/// - Deleting a ref decrements its meat's counter and deletes the meat when
///   the counter reaches zero, in the same transaction.
pub trait QueueStorage: Send + Sync {
    /// Probe the backend, updating the connection state and notifying
    /// problem listeners on transitions.
    fn ping(&self) -> bool;

    fn is_connected(&self) -> bool;

    /// Returns false if the listener was already registered.
    fn register_problem_listener(&self, listener: &Arc<dyn StorageProblemListener>) -> bool;

    /// Returns false if the listener was not registered.
    fn unregister_problem_listener(&self, listener: &Arc<dyn StorageProblemListener>) -> bool;

    /// Look up a store by identity, creating it on first use.
    fn get_or_create_store(&self, storage_id: &StorageId, ref_counted: bool) -> DbqResult<Store>;

    /// Delete the store row together with all its entries.
    fn delete_store(&self, store: &Store) -> DbqResult<bool>;

    /// Returns false if the entry already existed.
    fn add_entry(&self, store: &Store, entry: &QueueEntry) -> DbqResult<bool>;

    /// Per-entry outcome, true where the entry was persisted by this call.
    fn add_entries(&self, store: &Store, entries: &[QueueEntry]) -> DbqResult<Vec<bool>>;

    /// Returns the byte-size delta of the rewrite.
    fn modify_entry(
        &self,
        store: &Store,
        new_meat: &Meat,
        old_meat: Option<&Meat>,
        mode: ModifyMode,
    ) -> DbqResult<i64>;

    /// Add `delta` to a meat's reference counter, returning the new value or
    /// `None` if the meat does not exist.
    fn adjust_ref_count(&self, store: &Store, meat_id: i64, delta: i64) -> DbqResult<Option<i64>>;

    fn get_entry(&self, store: &Store, unique_id: i64) -> DbqResult<Option<QueueEntry>>;

    fn get_entries(&self, store: &Store, query: &EntryQuery) -> DbqResult<Vec<QueueEntry>>;

    /// Walk the store in eviction order (priority ascending, id descending)
    /// and optionally delete what was collected, in one transaction.
    ///
    /// With `leave_one` the last collected entry is given back if the walk
    /// consumed the whole store.
    fn get_and_delete_lowest(
        &self,
        store: &Store,
        walk: &LowestWalk,
        leave_one: bool,
        do_delete: bool,
    ) -> DbqResult<LowestResult>;

    /// Delete by id, chunked, all or nothing. Returns the rows deleted.
    fn delete_entries(&self, store: &Store, ids: &[i64]) -> DbqResult<usize>;

    fn delete_entry(&self, store: &Store, unique_id: i64) -> DbqResult<bool> {
        Ok(self.delete_entries(store, &[unique_id])? > 0)
    }

    /// Delete every entry before `(prio, id)` in delivery order, and the
    /// entry itself if `inclusive`, in one transaction. Returns what was
    /// removed. Needs a ref-counted store.
    fn delete_entries_with_limit(
        &self,
        store: &Store,
        prio: i32,
        id: i64,
        inclusive: bool,
    ) -> DbqResult<EntryCount>;

    /// Delete the head of the queue, returning what was removed.
    fn delete_first_entries(
        &self,
        store: &Store,
        max_entries: i64,
        max_bytes: i64,
    ) -> DbqResult<EntryCount>;

    /// Delete non-persistent entries of one store, or of all stores.
    fn delete_all_transient(&self, store: Option<&Store>) -> DbqResult<usize>;

    /// Delete all entries of the store, keeping the store row.
    fn clear_store(&self, store: &Store) -> DbqResult<usize>;

    /// True totals recomputed from the rows.
    fn get_num_of_all(&self, store: &Store) -> DbqResult<EntryCount>;

    /// Drop all tables, optionally recreating them. Requires `dbAdmin`.
    fn wipe_out_db(&self, recreate: bool) -> DbqResult<usize>;

    /// Release the pool. Further operations fail with `IllegalState`.
    fn shutdown(&self);
}

/// Build the accessor described by `config`, decorated with retries when
/// `use_retry_delegate` is set.
pub fn open_storage(
    pool: Arc<dyn ConnectionPool>,
    config: AccessorConfig,
) -> DbqResult<Arc<dyn QueueStorage>> {
    let use_retry = config.use_retry_delegate;
    let retry_config = config.clone();
    let accessor = DatabaseAccessor::new(pool, config)?;
    Ok(if use_retry {
        Arc::new(RetryingAccessor::from_config(accessor, &retry_config))
    } else {
        Arc::new(accessor)
    })
}
