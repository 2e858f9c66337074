//! Bounded retry of transient failures.

use super::{EntryQuery, LowestResult, ModifyMode, QueueStorage, StorageProblemListener};
use crate::config::AccessorConfig;
use crate::entry::QueueEntry;
use crate::error::{DbqError, DbqResult};
use crate::model::{EntryCount, Meat, StorageId, Store};
use crate::schema::LowestWalk;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Run `f` up to `max_retries` times (at least once) while it fails with a
/// transient error, sleeping `sleep_gap` between attempts.
///
/// Non-transient errors are returned immediately. When all attempts fail the
/// last error is wrapped as `Unavailable`.
pub fn retry_transient<T>(
    operation: &str,
    max_retries: u32,
    sleep_gap: Duration,
    mut f: impl FnMut() -> DbqResult<T>,
) -> DbqResult<T> {
    let attempts = max_retries.max(1);
    let mut attempt = 1;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= attempts => {
                return Err(DbqError::unavailable_from(
                    format!("{operation}: giving up after {attempts} attempts"),
                    e,
                ));
            }
            Err(e) => {
                warn!(
                    operation,
                    attempt,
                    max = attempts,
                    error = %e,
                    "transient failure, retrying"
                );
                attempt += 1;
                thread::sleep(sleep_gap);
            }
        }
    }
}

/// Decorates a [`QueueStorage`] with [`retry_transient`] around the bulk
/// read and write operations.
pub struct RetryingAccessor<S> {
    inner: S,
    max_retries: u32,
    sleep_gap: Duration,
}

impl<S: QueueStorage> RetryingAccessor<S> {
    pub fn new(inner: S, max_retries: u32, sleep_gap: Duration) -> Self {
        Self {
            inner,
            max_retries,
            sleep_gap,
        }
    }

    pub fn from_config(inner: S, config: &AccessorConfig) -> Self {
        Self::new(
            inner,
            config.max_resource_exhaust_retries,
            Duration::from_millis(config.resource_exhaust_sleep_gap),
        )
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn retry<T>(&self, operation: &str, f: impl FnMut() -> DbqResult<T>) -> DbqResult<T> {
        retry_transient(operation, self.max_retries, self.sleep_gap, f)
    }
}

impl<S: QueueStorage> QueueStorage for RetryingAccessor<S> {
    fn ping(&self) -> bool {
        self.inner.ping()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn register_problem_listener(&self, listener: &Arc<dyn StorageProblemListener>) -> bool {
        self.inner.register_problem_listener(listener)
    }

    fn unregister_problem_listener(&self, listener: &Arc<dyn StorageProblemListener>) -> bool {
        self.inner.unregister_problem_listener(listener)
    }

    fn get_or_create_store(&self, storage_id: &StorageId, ref_counted: bool) -> DbqResult<Store> {
        self.inner.get_or_create_store(storage_id, ref_counted)
    }

    fn delete_store(&self, store: &Store) -> DbqResult<bool> {
        self.inner.delete_store(store)
    }

    fn add_entry(&self, store: &Store, entry: &QueueEntry) -> DbqResult<bool> {
        self.retry("addEntry", || self.inner.add_entry(store, entry))
    }

    fn add_entries(&self, store: &Store, entries: &[QueueEntry]) -> DbqResult<Vec<bool>> {
        self.retry("addEntries", || self.inner.add_entries(store, entries))
    }

    fn modify_entry(
        &self,
        store: &Store,
        new_meat: &Meat,
        old_meat: Option<&Meat>,
        mode: ModifyMode,
    ) -> DbqResult<i64> {
        self.retry("modifyEntry", || {
            self.inner.modify_entry(store, new_meat, old_meat, mode)
        })
    }

    fn adjust_ref_count(&self, store: &Store, meat_id: i64, delta: i64) -> DbqResult<Option<i64>> {
        self.inner.adjust_ref_count(store, meat_id, delta)
    }

    fn get_entry(&self, store: &Store, unique_id: i64) -> DbqResult<Option<QueueEntry>> {
        self.retry("getEntry", || self.inner.get_entry(store, unique_id))
    }

    fn get_entries(&self, store: &Store, query: &EntryQuery) -> DbqResult<Vec<QueueEntry>> {
        self.retry(query.name(), || self.inner.get_entries(store, query))
    }

    fn get_and_delete_lowest(
        &self,
        store: &Store,
        walk: &LowestWalk,
        leave_one: bool,
        do_delete: bool,
    ) -> DbqResult<LowestResult> {
        self.inner
            .get_and_delete_lowest(store, walk, leave_one, do_delete)
    }

    fn delete_entries(&self, store: &Store, ids: &[i64]) -> DbqResult<usize> {
        self.retry("deleteEntries", || self.inner.delete_entries(store, ids))
    }

    fn delete_entries_with_limit(
        &self,
        store: &Store,
        prio: i32,
        id: i64,
        inclusive: bool,
    ) -> DbqResult<EntryCount> {
        self.retry("deleteEntriesWithLimit", || {
            self.inner.delete_entries_with_limit(store, prio, id, inclusive)
        })
    }

    fn delete_first_entries(
        &self,
        store: &Store,
        max_entries: i64,
        max_bytes: i64,
    ) -> DbqResult<EntryCount> {
        self.inner.delete_first_entries(store, max_entries, max_bytes)
    }

    fn delete_all_transient(&self, store: Option<&Store>) -> DbqResult<usize> {
        self.inner.delete_all_transient(store)
    }

    fn clear_store(&self, store: &Store) -> DbqResult<usize> {
        self.inner.clear_store(store)
    }

    fn get_num_of_all(&self, store: &Store) -> DbqResult<EntryCount> {
        self.inner.get_num_of_all(store)
    }

    fn wipe_out_db(&self, recreate: bool) -> DbqResult<usize> {
        self.inner.wipe_out_db(recreate)
    }

    fn shutdown(&self) {
        self.inner.shutdown()
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for RetryingAccessor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingAccessor")
            .field("inner", &self.inner)
            .field("max_retries", &self.max_retries)
            .field("sleep_gap", &self.sleep_gap)
            .finish()
    }
}
