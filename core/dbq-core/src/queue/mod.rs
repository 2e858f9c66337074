//! PersistentQueue: the queue façade over one store.
//!
//! # Counters
//!
//! The façade caches the store's entry and byte totals so capacity checks
//! and size queries need no database round-trip. Every mutation runs under a
//! per-queue mutation lock and adjusts the cache with what it changed. A
//! database failure invalidates the cache; the next reader recounts from the
//! rows.
//!
//! The mutation lock is reentrant. Storage problem listeners run on the
//! thread that saw the connection drop, which may be inside a mutation, and
//! may call back into the same queue.
//!
//! # Ordering
//!
//! `peek*`/`take*` follow delivery order (priority descending, id
//! ascending). `peek_lowest`/`take_lowest` follow eviction order (priority
//! ascending, id descending).
//!
//! # Example
//!
//! ```rust,no_run
//! use dbq_core::{
//!     AccessorConfig, PersistentQueue, PoolConfig, QueueConfig, QueueEntry, SqlitePool,
//!     StorageId, open_storage,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> dbq_core::DbqResult<()> {
//! let pool = SqlitePool::open("queue.db", PoolConfig::default())?;
//! let storage = open_storage(Arc::new(pool), AccessorConfig::default())?;
//! let config = QueueConfig::new(StorageId::new("node1", "callback", "joe"));
//! let queue = PersistentQueue::new(storage, config)?;
//!
//! queue.put(&QueueEntry::new(5, "MSG_RAW", b"hello".to_vec()), false)?;
//! let next = queue.take()?;
//! # Ok(())
//! # }
//! ```

mod counters;
mod listener;

pub use listener::{PutInterceptor, StorageSizeListener};

use crate::accessor::{
    AccessorRegistry, EntryQuery, ModifyMode, QueueStorage, StorageProblemListener,
};
use crate::codec::{EntryCodec, EntryFactory};
use crate::config::QueueConfig;
use crate::entry::QueueEntry;
use crate::error::{DbqError, DbqResult};
use crate::model::{EntryCount, Meat, StorageId, Store};
use crate::schema::LowestWalk;
use counters::Counters;
use listener::SizeListeners;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, instrument, warn};

struct Lease {
    registry: Arc<AccessorRegistry>,
    key: String,
}

pub struct PersistentQueue {
    storage: Arc<dyn QueueStorage>,
    store: Store,
    config: QueueConfig,
    codec: Arc<dyn EntryFactory>,
    lease: Mutex<Option<Lease>>,
    mutation: ReentrantMutex<()>,
    counters: Counters,
    size_listeners: SizeListeners,
    interceptor: RwLock<Option<Arc<dyn PutInterceptor>>>,
    shut_down: AtomicBool,
}

impl PersistentQueue {
    /// Attach to the store named by `config`, creating it on first use.
    #[instrument(skip(storage, config), fields(store = %config.storage_id))]
    pub fn new(storage: Arc<dyn QueueStorage>, config: QueueConfig) -> DbqResult<Self> {
        let store = storage.get_or_create_store(&config.storage_id, config.ref_counted)?;
        let queue = Self {
            storage,
            store,
            config,
            codec: Arc::new(EntryCodec),
            lease: Mutex::new(None),
            mutation: ReentrantMutex::new(()),
            counters: Counters::new(),
            size_listeners: SizeListeners::default(),
            interceptor: RwLock::new(None),
            shut_down: AtomicBool::new(false),
        };
        let count = queue.recount()?;
        info!(
            store = %queue.store,
            entries = count.num_of_entries,
            bytes = count.num_of_bytes,
            max_entries = queue.config.max_entries,
            max_bytes = queue.config.max_bytes,
            "queue ready"
        );
        Ok(queue)
    }

    /// Lease the accessor registered under `key` (building it with `build` on
    /// first use) and attach to the store. The lease is returned on
    /// [`shutdown`](Self::shutdown).
    pub fn open(
        registry: &Arc<AccessorRegistry>,
        key: &str,
        build: impl FnOnce() -> DbqResult<Arc<dyn QueueStorage>>,
        config: QueueConfig,
    ) -> DbqResult<Self> {
        let storage = registry.acquire(key, build)?;
        match Self::new(storage, config) {
            Ok(queue) => {
                *queue.lease.lock() = Some(Lease {
                    registry: Arc::clone(registry),
                    key: key.to_string(),
                });
                Ok(queue)
            }
            Err(e) => {
                registry.release(key);
                Err(e)
            }
        }
    }

    /// Replace the codec used to rebuild meats for [`change`](Self::change)
    /// and [`update_counters`](Self::update_counters). It must match the
    /// accessor's codec.
    pub fn with_codec(mut self, codec: Arc<dyn EntryFactory>) -> Self {
        self.codec = codec;
        self
    }

    pub fn storage_id(&self) -> &StorageId {
        &self.store.storage_id
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn max_entries(&self) -> i64 {
        self.config.max_entries
    }

    pub fn max_bytes(&self) -> i64 {
        self.config.max_bytes
    }

    pub fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    // ════════════════════════════════════════════
    // Counters
    // ════════════════════════════════════════════

    fn recount(&self) -> DbqResult<EntryCount> {
        let count = self.storage.get_num_of_all(&self.store)?;
        self.counters.set(count);
        Ok(count)
    }

    /// Cached totals, recounted when stale or in debug mode.
    pub fn entry_count(&self) -> DbqResult<EntryCount> {
        if self.config.debug {
            let cached = self.counters.get();
            let actual = self.recount()?;
            if cached.is_some_and(|cached| cached != actual) {
                error!(
                    store = %self.store,
                    cached = ?cached,
                    actual = %actual,
                    "cached counters diverged from the rows"
                );
            }
            return Ok(actual);
        }
        match self.counters.get() {
            Some(count) => Ok(count),
            None => self.recount(),
        }
    }

    /// Like [`entry_count`](Self::entry_count) but answers with the last
    /// known totals if a recount fails.
    fn entry_count_lenient(&self) -> EntryCount {
        self.entry_count().unwrap_or_else(|e| {
            warn!(store = %self.store, error = %e, "recount failed, using last known counters");
            self.counters.last_known()
        })
    }

    pub fn num_of_entries(&self) -> i64 {
        self.entry_count_lenient().num_of_entries
    }

    pub fn num_of_bytes(&self) -> i64 {
        self.entry_count_lenient().num_of_bytes
    }

    pub fn num_of_persistent_entries(&self) -> i64 {
        self.entry_count_lenient().num_of_persistent_entries
    }

    pub fn num_of_persistent_bytes(&self) -> i64 {
        self.entry_count_lenient().num_of_persistent_bytes
    }

    /// Fail with `Overflow` naming the limit if `entries`/`bytes` more would
    /// not fit. Negative limits are unlimited.
    fn space_left(&self, count: &EntryCount, entries: i64, bytes: i64) -> DbqResult<()> {
        let max_entries = self.config.max_entries;
        if max_entries >= 0 && count.num_of_entries + entries > max_entries {
            return Err(DbqError::overflow(
                self.config.prop_name("maxEntries"),
                format!(
                    "queue {} holds {} of max {} entries, cannot add {}",
                    self.store, count.num_of_entries, max_entries, entries
                ),
            ));
        }
        let max_bytes = self.config.max_bytes;
        if max_bytes >= 0 && count.num_of_bytes + bytes > max_bytes {
            return Err(DbqError::overflow(
                self.config.prop_name("maxBytes"),
                format!(
                    "queue {} holds {} of max {} bytes, cannot add {}",
                    self.store, count.num_of_bytes, max_bytes, bytes
                ),
            ));
        }
        Ok(())
    }

    // ════════════════════════════════════════════
    // Mutation plumbing
    // ════════════════════════════════════════════

    fn check_alive(&self, operation: &str) -> DbqResult<()> {
        if self.is_shutdown() {
            return Err(DbqError::IllegalState(format!(
                "{operation}: queue {} is shut down",
                self.store
            )));
        }
        Ok(())
    }

    /// Run `op` under the mutation lock. Database failures invalidate the
    /// counters; successes are announced to the size listeners.
    fn mutate<T>(&self, operation: &str, op: impl FnOnce() -> DbqResult<T>) -> DbqResult<T> {
        self.check_alive(operation)?;
        let result = {
            let _guard = self.mutation.lock();
            let result = op();
            if matches!(&result, Err(e) if e.is_unavailable() || e.is_transient()) {
                self.counters.invalidate();
            }
            result
        };
        if result.is_ok() {
            self.notify_size();
        }
        result
    }

    fn notify_size(&self) {
        if self.size_listeners.is_empty() {
            return;
        }
        let count = self.entry_count_lenient();
        self.size_listeners.notify(&self.store.storage_id, &count);
    }

    fn sum_of(entries: &[QueueEntry]) -> EntryCount {
        let mut count = EntryCount::ZERO;
        for entry in entries {
            count.add(&EntryCount::of(entry.size_in_bytes, entry.persistent));
        }
        count
    }

    /// Settle counters after deleting `entries`: exact on full success,
    /// recount otherwise. Caller holds the mutation lock.
    fn account_removal(&self, entries: &[QueueEntry], deleted: usize) -> DbqResult<()> {
        if deleted == entries.len() {
            self.counters.subtract(&Self::sum_of(entries));
        } else {
            debug!(
                store = %self.store,
                expected = entries.len(),
                deleted,
                "partial delete, recounting"
            );
            self.recount()?;
        }
        Ok(())
    }

    fn delete_exactly(&self, entries: &[QueueEntry]) -> DbqResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let ids: Vec<i64> = entries.iter().map(|e| e.unique_id).collect();
        let deleted = self.storage.delete_entries(&self.store, &ids)?;
        self.account_removal(entries, deleted)?;
        Ok(deleted)
    }

    // ════════════════════════════════════════════
    // Put
    // ════════════════════════════════════════════

    /// Store one entry. Returns false if an entry with the same id already
    /// existed.
    ///
    /// Fails with `Overflow` before touching the database if the entry does
    /// not fit.
    pub fn put(&self, entry: &QueueEntry, bypass_interceptor: bool) -> DbqResult<bool> {
        let persisted = self.put_all(std::slice::from_ref(entry), bypass_interceptor)?;
        Ok(persisted.first().copied().unwrap_or(false))
    }

    /// Store several entries with one capacity check. Returns the per-entry
    /// outcome.
    pub fn put_all(&self, entries: &[QueueEntry], bypass_interceptor: bool) -> DbqResult<Vec<bool>> {
        self.check_alive("put")?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let interceptor = if bypass_interceptor {
            None
        } else {
            self.interceptor.read().clone()
        };
        if let Some(interceptor) = &interceptor {
            interceptor.put_pre(entries)?;
        }

        let persisted = self.mutate("put", || {
            let count = self.entry_count()?;
            let bytes: i64 = entries.iter().map(|e| e.size_in_bytes).sum();
            self.space_left(&count, entries.len() as i64, bytes)?;

            let persisted = if let [entry] = entries {
                vec![self.storage.add_entry(&self.store, entry)?]
            } else {
                self.storage.add_entries(&self.store, entries)?
            };
            for (entry, stored) in entries.iter().zip(&persisted) {
                if *stored {
                    self.counters
                        .add(&EntryCount::of(entry.size_in_bytes, entry.persistent));
                }
            }
            Ok(persisted)
        })?;

        if let Some(interceptor) = &interceptor {
            interceptor.put_post(entries, &persisted);
        }
        Ok(persisted)
    }

    /// Install the put interceptor. Only one may be registered.
    pub fn set_put_interceptor(&self, interceptor: Arc<dyn PutInterceptor>) -> DbqResult<()> {
        let mut slot = self.interceptor.write();
        if slot.is_some() {
            return Err(DbqError::IllegalState(format!(
                "queue {} already has a put interceptor",
                self.store
            )));
        }
        *slot = Some(interceptor);
        Ok(())
    }

    pub fn remove_put_interceptor(&self) -> Option<Arc<dyn PutInterceptor>> {
        self.interceptor.write().take()
    }

    // ════════════════════════════════════════════
    // Peek
    // ════════════════════════════════════════════

    pub fn peek(&self) -> DbqResult<Option<QueueEntry>> {
        Ok(self.peek_n(1, -1)?.into_iter().next())
    }

    /// Head of the queue: at most `max_entries` entries and `max_bytes`
    /// bytes (negative = unlimited), the first entry always included.
    pub fn peek_n(&self, max_entries: i64, max_bytes: i64) -> DbqResult<Vec<QueueEntry>> {
        self.storage
            .get_entries(&self.store, &EntryQuery::first(max_entries, max_bytes))
    }

    pub fn peek_with_priority(
        &self,
        max_entries: i64,
        max_bytes: i64,
        min_prio: i32,
        max_prio: i32,
    ) -> DbqResult<Vec<QueueEntry>> {
        self.storage.get_entries(
            &self.store,
            &EntryQuery::ByPriority {
                max_entries,
                max_bytes,
                min_prio,
                max_prio,
            },
        )
    }

    /// Entries sharing the highest priority present.
    pub fn peek_same_priority(&self, max_entries: i64, max_bytes: i64) -> DbqResult<Vec<QueueEntry>> {
        self.storage.get_entries(
            &self.store,
            &EntryQuery::SamePriority {
                max_entries,
                max_bytes,
            },
        )
    }

    /// Entries after `first_exclusive` in delivery order.
    pub fn peek_start_at(
        &self,
        max_entries: i64,
        max_bytes: i64,
        first_exclusive: &QueueEntry,
    ) -> DbqResult<Vec<QueueEntry>> {
        self.storage.get_entries(
            &self.store,
            &EntryQuery::StartAt {
                max_entries,
                max_bytes,
                prio: first_exclusive.priority,
                id: first_exclusive.unique_id,
            },
        )
    }

    /// Entries before `limit` in delivery order, `limit` itself excluded.
    pub fn peek_with_limit_entry(&self, limit: &QueueEntry) -> DbqResult<Vec<QueueEntry>> {
        self.storage.get_entries(
            &self.store,
            &EntryQuery::WithLimit {
                prio: limit.priority,
                id: limit.unique_id,
                inclusive: false,
            },
        )
    }

    pub fn get_entries_by_ids(&self, ids: &[i64]) -> DbqResult<Vec<QueueEntry>> {
        self.storage
            .get_entries(&self.store, &EntryQuery::ByIds(ids.to_vec()))
    }

    fn lowest_walk(max_entries: i64, max_bytes: i64, limit: Option<&QueueEntry>) -> LowestWalk {
        match limit {
            Some(limit) => LowestWalk {
                max_entries,
                max_bytes,
                max_priority: limit.priority,
                min_unique_id: limit.unique_id,
            },
            None => LowestWalk::unbounded(max_entries, max_bytes),
        }
    }

    /// Tail of the queue in eviction order, strictly below `limit` if given.
    pub fn peek_lowest(
        &self,
        max_entries: i64,
        max_bytes: i64,
        limit: Option<&QueueEntry>,
        leave_one: bool,
    ) -> DbqResult<Vec<QueueEntry>> {
        let walk = Self::lowest_walk(max_entries, max_bytes, limit);
        Ok(self
            .storage
            .get_and_delete_lowest(&self.store, &walk, leave_one, false)?
            .entries)
    }

    // ════════════════════════════════════════════
    // Take
    // ════════════════════════════════════════════

    fn take_query(&self, operation: &str, query: EntryQuery) -> DbqResult<Vec<QueueEntry>> {
        self.mutate(operation, || {
            let entries = self.storage.get_entries(&self.store, &query)?;
            self.delete_exactly(&entries)?;
            Ok(entries)
        })
    }

    pub fn take(&self) -> DbqResult<Option<QueueEntry>> {
        Ok(self.take_n(1, -1)?.into_iter().next())
    }

    pub fn take_n(&self, max_entries: i64, max_bytes: i64) -> DbqResult<Vec<QueueEntry>> {
        self.take_query("take", EntryQuery::first(max_entries, max_bytes))
    }

    pub fn take_with_priority(
        &self,
        max_entries: i64,
        max_bytes: i64,
        min_prio: i32,
        max_prio: i32,
    ) -> DbqResult<Vec<QueueEntry>> {
        self.take_query(
            "takeWithPriority",
            EntryQuery::ByPriority {
                max_entries,
                max_bytes,
                min_prio,
                max_prio,
            },
        )
    }

    /// Remove from the tail in eviction order. With `leave_one` the store is
    /// never emptied by this call.
    pub fn take_lowest(
        &self,
        max_entries: i64,
        max_bytes: i64,
        limit: Option<&QueueEntry>,
        leave_one: bool,
    ) -> DbqResult<Vec<QueueEntry>> {
        let walk = Self::lowest_walk(max_entries, max_bytes, limit);
        self.mutate("takeLowest", || {
            let result = self
                .storage
                .get_and_delete_lowest(&self.store, &walk, leave_one, true)?;
            self.counters.subtract(&result.count);
            Ok(result.entries)
        })
    }

    // ════════════════════════════════════════════
    // Remove
    // ════════════════════════════════════════════

    /// Remove the head entry. Returns the number removed.
    pub fn remove(&self) -> DbqResult<usize> {
        self.remove_num(1, -1)
    }

    /// Remove from the head, bounded like [`peek_n`](Self::peek_n).
    pub fn remove_num(&self, max_entries: i64, max_bytes: i64) -> DbqResult<usize> {
        self.mutate("remove", || {
            let removed = self
                .storage
                .delete_first_entries(&self.store, max_entries, max_bytes)?;
            self.counters.subtract(&removed);
            Ok(removed.num_of_entries as usize)
        })
    }

    pub fn remove_with_priority(
        &self,
        max_entries: i64,
        max_bytes: i64,
        min_prio: i32,
        max_prio: i32,
    ) -> DbqResult<usize> {
        Ok(self
            .take_with_priority(max_entries, max_bytes, min_prio, max_prio)?
            .len())
    }

    /// Remove one known entry. Returns false if it was not in the store.
    pub fn remove_random(&self, entry: &QueueEntry) -> DbqResult<bool> {
        Ok(self.remove_random_entries(std::slice::from_ref(entry))? == 1)
    }

    /// Remove known entries, adjusting counters by their sizes. A partial
    /// delete triggers a recount.
    pub fn remove_random_entries(&self, entries: &[QueueEntry]) -> DbqResult<usize> {
        self.mutate("removeRandom", || self.delete_exactly(entries))
    }

    pub fn remove_random_id(&self, unique_id: i64) -> DbqResult<bool> {
        Ok(self.remove_random_ids(&[unique_id])? == 1)
    }

    /// Remove by id. Sizes are unknown to the caller, so counters are
    /// recounted.
    pub fn remove_random_ids(&self, ids: &[i64]) -> DbqResult<usize> {
        self.mutate("removeRandom", || {
            if ids.is_empty() {
                return Ok(0);
            }
            let deleted = self.storage.delete_entries(&self.store, ids)?;
            self.recount()?;
            Ok(deleted)
        })
    }

    /// Remove everything before `limit` in delivery order, and `limit`
    /// itself if `inclusive`. Counters are recounted afterwards.
    pub fn remove_with_limit_entry(&self, limit: &QueueEntry, inclusive: bool) -> DbqResult<usize> {
        self.mutate("removeWithLimitEntry", || {
            let removed = self.storage.delete_entries_with_limit(
                &self.store,
                limit.priority,
                limit.unique_id,
                inclusive,
            )?;
            self.recount()?;
            Ok(removed.num_of_entries as usize)
        })
    }

    /// Remove all non-persistent entries.
    pub fn remove_transient(&self) -> DbqResult<usize> {
        self.mutate("removeTransient", || {
            let deleted = self.storage.delete_all_transient(Some(&self.store))?;
            self.recount()?;
            Ok(deleted)
        })
    }

    /// Remove every entry; counters become zero.
    pub fn clear(&self) -> DbqResult<usize> {
        self.mutate("clear", || {
            let deleted = self.storage.clear_store(&self.store)?;
            self.counters.set(EntryCount::ZERO);
            Ok(deleted)
        })
    }

    // ════════════════════════════════════════════
    // Map access
    // ════════════════════════════════════════════

    pub fn get(&self, unique_id: i64) -> DbqResult<Option<QueueEntry>> {
        self.storage.get_entry(&self.store, unique_id)
    }

    pub fn get_all(&self) -> DbqResult<Vec<QueueEntry>> {
        self.peek_n(-1, -1)
    }

    /// Map-style insert, bypassing the put interceptor.
    pub fn put_map(&self, entry: &QueueEntry) -> DbqResult<bool> {
        self.put(entry, true)
    }

    pub fn remove_map(&self, entry: &QueueEntry) -> DbqResult<bool> {
        self.remove_random(entry)
    }

    fn meat_of(&self, entry: &QueueEntry) -> DbqResult<Meat> {
        let mut meat = self
            .codec
            .decompose(&self.store, entry)
            .meat
            .ok_or_else(|| {
                DbqError::InvalidArguments(format!(
                    "entry {} has no payload row in {}",
                    entry.unique_id, self.store
                ))
            })?;
        meat.ref_count = entry.ref_count;
        Ok(meat)
    }

    /// Rewrite an entry's payload in place. `f` receives the stored entry
    /// and returns its replacement, which must keep the id.
    pub fn change(
        &self,
        unique_id: i64,
        f: impl FnOnce(QueueEntry) -> QueueEntry,
    ) -> DbqResult<QueueEntry> {
        self.mutate("change", || {
            let old = self.get(unique_id)?.ok_or_else(|| {
                DbqError::InvalidArguments(format!(
                    "entry {unique_id} does not exist in {}",
                    self.store
                ))
            })?;
            let new = f(old.clone());
            if new.unique_id != old.unique_id || new.meat_id != old.meat_id {
                return Err(DbqError::InvalidArguments(format!(
                    "change of entry {unique_id} must not alter its id"
                )));
            }
            let old_meat = self.meat_of(&old)?;
            let new_meat = self.meat_of(&new)?;
            let delta = self.storage.modify_entry(
                &self.store,
                &new_meat,
                Some(&old_meat),
                ModifyMode::Full,
            )?;
            if self.store.ref_counted {
                // placement sizes live on the refs, which a payload rewrite keeps
                self.counters.invalidate();
            } else {
                self.counters.adjust_bytes(delta, new.persistent);
            }
            Ok(new)
        })
    }

    /// Persist `entry.ref_count` as the payload's reference counter.
    pub fn update_counters(&self, entry: &QueueEntry) -> DbqResult<()> {
        let meat = self.meat_of(entry)?;
        self.mutate("updateCounters", || {
            self.storage
                .modify_entry(&self.store, &meat, None, ModifyMode::RefCountersOnly)
                .map(|_| ())
        })
    }

    /// Add `delta` to the payload's reference counter, returning the new
    /// value, or `None` if the payload does not exist.
    pub fn adjust_ref_count(&self, meat_id: i64, delta: i64) -> DbqResult<Option<i64>> {
        self.check_alive("adjustRefCount")?;
        self.storage.adjust_ref_count(&self.store, meat_id, delta)
    }

    pub fn remove_oldest(&self) -> DbqResult<Option<QueueEntry>> {
        Err(DbqError::NotImplemented(
            "removeOldest is not supported by persistent queues".into(),
        ))
    }

    // ════════════════════════════════════════════
    // Unsupported
    // ════════════════════════════════════════════

    pub fn update(&self, _entry: &QueueEntry) -> DbqResult<()> {
        Err(DbqError::NotImplemented(
            "update of a queued entry is undefined for persistent queues".into(),
        ))
    }

    pub fn remove_head(&self, _to_entry: &QueueEntry) -> DbqResult<usize> {
        Err(DbqError::NotImplemented(
            "removeHead is not supported by persistent queues".into(),
        ))
    }

    pub fn get_entry_references(&self, _entry: &QueueEntry) -> DbqResult<Vec<i64>> {
        Err(DbqError::NotImplemented(
            "getEntryReferences is not supported by persistent queues".into(),
        ))
    }

    // ════════════════════════════════════════════
    // Listeners
    // ════════════════════════════════════════════

    /// Returns false if the listener was already added.
    pub fn add_storage_size_listener(&self, listener: Arc<dyn StorageSizeListener>) -> bool {
        self.size_listeners.add(listener)
    }

    pub fn remove_storage_size_listener(&self, listener: &Arc<dyn StorageSizeListener>) -> bool {
        self.size_listeners.remove(listener)
    }

    /// The listener may be invoked while this thread holds the queue's
    /// mutation lock; calling back into the queue from it is allowed.
    pub fn register_storage_problem_listener(
        &self,
        listener: &Arc<dyn StorageProblemListener>,
    ) -> bool {
        self.storage.register_problem_listener(listener)
    }

    pub fn unregister_storage_problem_listener(
        &self,
        listener: &Arc<dyn StorageProblemListener>,
    ) -> bool {
        self.storage.unregister_problem_listener(listener)
    }

    // ════════════════════════════════════════════
    // Lifecycle
    // ════════════════════════════════════════════

    /// Detach from the store. An empty store row is deleted; the registry
    /// lease, if any, is returned. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.size_listeners.clear();
        {
            let _guard = self.mutation.lock();
            match self.storage.get_num_of_all(&self.store) {
                Ok(count) if count.num_of_entries == 0 => {
                    if let Err(e) = self.storage.delete_store(&self.store) {
                        warn!(store = %self.store, error = %e, "could not delete empty store");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(store = %self.store, error = %e, "could not count entries on shutdown");
                }
            }
        }
        self.release_lease();
        info!(store = %self.store, "queue shut down");
    }

    /// Delete all entries and the store row, then shut down.
    pub fn destroy(&self) -> DbqResult<()> {
        self.check_alive("destroy")?;
        {
            let _guard = self.mutation.lock();
            self.storage.delete_store(&self.store)?;
            self.counters.set(EntryCount::ZERO);
        }
        self.shutdown();
        Ok(())
    }

    fn release_lease(&self) {
        if let Some(lease) = self.lease.lock().take() {
            let last = lease.registry.release(&lease.key);
            debug!(key = %lease.key, last, "released accessor lease");
        }
    }
}

impl std::fmt::Debug for PersistentQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentQueue")
            .field("store", &self.store)
            .field("max_entries", &self.config.max_entries)
            .field("max_bytes", &self.config.max_bytes)
            .field("shut_down", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::open_storage;
    use crate::config::AccessorConfig;
    use crate::pool::{PoolConfig, SqlitePool};
    use std::sync::atomic::AtomicUsize;
    use tempfile::{TempDir, tempdir};

    fn queue(config: QueueConfig) -> (TempDir, PersistentQueue) {
        let dir = tempdir().unwrap();
        let pool = SqlitePool::open(dir.path().join("queue.db"), PoolConfig::default()).unwrap();
        let storage = open_storage(Arc::new(pool), AccessorConfig::default()).unwrap();
        (dir, PersistentQueue::new(storage, config).unwrap())
    }

    fn callback_config() -> QueueConfig {
        QueueConfig::new(StorageId::new("node", "callback", "joe"))
    }

    fn entry(id: i64, prio: i32, size: usize) -> QueueEntry {
        QueueEntry::with_id(id, prio, "MSG_RAW", vec![7u8; size])
    }

    #[derive(Default)]
    struct Recorder {
        calls: AtomicUsize,
        last: Mutex<EntryCount>,
    }

    impl StorageSizeListener for Recorder {
        fn storage_size_changed(&self, _id: &StorageId, count: &EntryCount) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock() = *count;
        }
    }

    struct Veto;

    impl PutInterceptor for Veto {
        fn put_pre(&self, entries: &[QueueEntry]) -> DbqResult<()> {
            if entries.iter().any(|e| e.priority == 0) {
                return Err(DbqError::IllegalState("priority 0 refused".into()));
            }
            Ok(())
        }

        fn put_post(&self, _entries: &[QueueEntry], _persisted: &[bool]) {}
    }

    #[test]
    fn byte_limit_overflow_names_max_bytes() {
        let (_dir, q) = queue(callback_config().with_max_bytes(25));
        q.put(&entry(1, 5, 20), false).unwrap();
        let err = q.put(&entry(2, 5, 10), false).unwrap_err();
        match err {
            DbqError::Overflow { property, .. } => {
                assert_eq!(property, "queue/callback/maxBytes")
            }
            other => panic!("unexpected {other}"),
        }
        assert_eq!(q.num_of_entries(), 1);
    }

    #[test]
    fn size_listener_sees_every_mutation() {
        let (_dir, q) = queue(callback_config());
        let recorder = Arc::new(Recorder::default());
        assert!(q.add_storage_size_listener(recorder.clone()));
        q.put(&entry(1, 5, 10), false).unwrap();
        q.put(&entry(2, 5, 10), false).unwrap();
        q.take().unwrap();
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(recorder.last.lock().num_of_entries, 1);

        let as_dyn: Arc<dyn StorageSizeListener> = recorder.clone();
        assert!(q.remove_storage_size_listener(&as_dyn));
        q.clear().unwrap();
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn interceptor_can_refuse_and_be_bypassed() {
        let (_dir, q) = queue(callback_config());
        q.set_put_interceptor(Arc::new(Veto)).unwrap();
        assert!(q.set_put_interceptor(Arc::new(Veto)).is_err());

        assert!(q.put(&entry(1, 0, 10), false).is_err());
        assert!(q.put(&entry(1, 0, 10), true).unwrap());
        assert_eq!(q.num_of_entries(), 1);
    }

    #[test]
    fn change_rewrites_payload_of_meat_only_store() {
        let config = QueueConfig::new(StorageId::new("node", "msgUnitStore", "x")).with_ref_counted(false);
        let (_dir, q) = queue(config);
        q.put_map(&entry(1, 5, 10)).unwrap();
        let changed = q
            .change(1, |mut e| {
                e.content = vec![1u8; 30];
                e.size_in_bytes = 30;
                e
            })
            .unwrap();
        assert_eq!(changed.size_in_bytes, 30);
        assert_eq!(q.num_of_bytes(), 30);
        assert_eq!(q.get(1).unwrap().unwrap().content, vec![1u8; 30]);
        assert!(matches!(q.change(99, |e| e), Err(DbqError::InvalidArguments(_))));
    }

    #[test]
    fn unsupported_operations_say_so() {
        let (_dir, q) = queue(callback_config());
        let e = entry(1, 5, 1);
        assert!(matches!(q.update(&e), Err(DbqError::NotImplemented(_))));
        assert!(matches!(q.remove_head(&e), Err(DbqError::NotImplemented(_))));
        assert!(matches!(q.get_entry_references(&e), Err(DbqError::NotImplemented(_))));
        assert!(matches!(q.remove_oldest(), Err(DbqError::NotImplemented(_))));
    }

    #[test]
    fn mutations_after_shutdown_are_refused() {
        let (_dir, q) = queue(callback_config());
        q.shutdown();
        assert!(q.is_shutdown());
        assert!(matches!(q.put(&entry(1, 5, 1), false), Err(DbqError::IllegalState(_))));
        q.shutdown();
    }
}
