//! DatabaseAccessor: runs queue operations against pooled connections.
//!
//! Every public operation goes through [`DatabaseAccessor::run`]:
//!
//! ```text
//! usable? ─no──▶ Unavailable (pool untouched)
//!    │
//! reserve ─err─▶ Unavailable
//!    │
//! op(conn) ─ok─▶ release, Ok
//!    │err
//! ping(conn) ─ok──▶ release, Unknown
//!            └err─▶ erase, mark disconnected, Unavailable
//! ```

use super::{
    EntryQuery, LowestResult, ModifyMode, ProblemListeners, QueueStorage, StorageProblemListener,
    StorageStatus,
};
use crate::codec::{EntryCodec, EntryFactory, EntryRows};
use crate::config::AccessorConfig;
use crate::entry::QueueEntry;
use crate::error::{DbqError, DbqResult};
use crate::id::next_unique_id;
use crate::model::{EntryCount, Meat, StorageId, Store};
use crate::pool::ConnectionPool;
use crate::schema::{
    Dialect, JoinedRow, LowestWalk, MeatFactory, RefFactory, StoreFactory, TableNames,
};
use dashmap::DashMap;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// The transactional queue engine.
pub struct DatabaseAccessor {
    pool: Arc<dyn ConnectionPool>,
    config: AccessorConfig,
    dialect: Dialect,
    max_statement_length: usize,
    stores: StoreFactory,
    meats: MeatFactory,
    refs: RefFactory,
    codec: Arc<dyn EntryFactory>,
    store_cache: DashMap<StorageId, Store>,
    connected: AtomicBool,
    shut_down: AtomicBool,
    listeners: ProblemListeners,
}

/// Mutating transactions take the write lock up front so a select followed
/// by a delete cannot interleave with another writer.
fn write_tx(conn: &mut Connection) -> rusqlite::Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
}

impl DatabaseAccessor {
    /// Create the accessor with the default [`EntryCodec`].
    pub fn new(pool: Arc<dyn ConnectionPool>, config: AccessorConfig) -> DbqResult<Self> {
        Self::with_codec(pool, config, Arc::new(EntryCodec))
    }

    /// Create the accessor, creating missing tables when `dbAdmin` is set.
    #[instrument(skip(pool, config, codec), fields(url = %pool.url()))]
    pub fn with_codec(
        pool: Arc<dyn ConnectionPool>,
        config: AccessorConfig,
        codec: Arc<dyn EntryFactory>,
    ) -> DbqResult<Self> {
        config.validate()?;
        let dialect = pool.dialect();
        let names = TableNames::resolve(&config);
        let max_statement_length = dialect
            .max_statement_length()
            .unwrap_or(config.max_statement_length);

        let accessor = Self {
            stores: StoreFactory::new(dialect, &names, &config.overrides),
            meats: MeatFactory::new(dialect, &names, &config.overrides),
            refs: RefFactory::new(dialect, &names, &config.overrides),
            pool,
            dialect,
            max_statement_length,
            codec,
            store_cache: DashMap::new(),
            connected: AtomicBool::new(true),
            shut_down: AtomicBool::new(false),
            listeners: ProblemListeners::new(),
            config,
        };

        accessor.run("initialize", |conn| {
            if accessor.config.wipe_out_db && accessor.config.db_admin {
                warn!("wiping out all queue tables on startup");
                accessor.drop_tables(conn)?;
            }
            if accessor.config.db_admin {
                accessor.create_tables(conn)?;
            } else {
                for table in [
                    accessor.stores.table(),
                    accessor.meats.table(),
                    accessor.refs.table(),
                ] {
                    if !table.exists(conn)? {
                        return Err(DbqError::IllegalState(format!(
                            "table '{}' is missing and dbAdmin=false forbids creating it",
                            table.table()
                        )));
                    }
                }
            }
            Ok(())
        })?;

        info!(
            dialect = %accessor.dialect,
            store_table = %names.store,
            meat_table = %names.meat,
            ref_table = %names.reference,
            max_statement_length,
            batch_mode = accessor.config.enable_batch_mode,
            "database accessor ready"
        );
        Ok(accessor)
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn config(&self) -> &AccessorConfig {
        &self.config
    }

    pub fn problem_listeners(&self) -> &ProblemListeners {
        &self.listeners
    }

    // ════════════════════════════════════════════
    // Connection handling and failure classification
    // ════════════════════════════════════════════

    fn check_usable(&self, location: &str) -> DbqResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(DbqError::IllegalState(format!(
                "{location}: accessor is shut down"
            )));
        }
        if !self.connected.load(Ordering::Acquire) {
            return Err(DbqError::unavailable(format!(
                "{location}: storage is currently unavailable"
            )));
        }
        Ok(())
    }

    fn run<T>(
        &self,
        location: &'static str,
        op: impl FnOnce(&mut Connection) -> DbqResult<T>,
    ) -> DbqResult<T> {
        self.check_usable(location)?;
        let mut conn = self
            .pool
            .reserve()
            .map_err(|e| DbqError::unavailable_from(location, e))?;

        self.arm_timeout(&conn);
        let result = op(&mut conn);
        self.disarm_timeout(&conn);

        match result {
            Ok(value) => {
                self.pool.release(conn);
                Ok(value)
            }
            Err(e) if e.is_classified() => {
                self.pool.release(conn);
                Err(e)
            }
            Err(e) => {
                if self.ping_connection(&conn) {
                    self.pool.release(conn);
                    debug!(location, error = %e, "operation failed, backend alive");
                    Err(DbqError::unknown_from(location, e))
                } else {
                    self.pool.erase(conn);
                    self.mark_disconnected(location);
                    Err(DbqError::unavailable_from(location, e))
                }
            }
        }
    }

    fn arm_timeout(&self, conn: &Connection) {
        if self.config.query_timeout == 0 {
            return;
        }
        let deadline = Instant::now() + Duration::from_secs(self.config.query_timeout);
        conn.progress_handler(1_000, Some(move || Instant::now() > deadline));
    }

    fn disarm_timeout(&self, conn: &Connection) {
        if self.config.query_timeout > 0 {
            conn.progress_handler(0, None::<fn() -> bool>);
        }
    }

    fn ping_connection(&self, conn: &Connection) -> bool {
        self.stores.ping(conn).is_ok()
    }

    fn mark_disconnected(&self, location: &str) {
        if self.connected.swap(false, Ordering::AcqRel) {
            error!(location, url = %self.pool.url(), "lost connection to database");
            self.listeners.notify_unavailable(StorageStatus::Available);
        }
    }

    fn mark_connected(&self) {
        if !self.connected.swap(true, Ordering::AcqRel) {
            info!(url = %self.pool.url(), "connection to database re-established");
            self.listeners.notify_available(StorageStatus::Unavailable);
        }
    }

    // ════════════════════════════════════════════
    // DDL
    // ════════════════════════════════════════════

    fn create_tables(&self, conn: &Connection) -> DbqResult<usize> {
        let mut created = 0;
        created += usize::from(self.stores.create(conn)?);
        created += usize::from(self.meats.create(conn)?);
        created += usize::from(self.refs.create(conn)?);
        Ok(created)
    }

    fn drop_tables(&self, conn: &Connection) -> DbqResult<usize> {
        let mut dropped = 0;
        dropped += usize::from(self.refs.drop(conn)?);
        dropped += usize::from(self.meats.drop(conn)?);
        dropped += usize::from(self.stores.drop(conn)?);
        Ok(dropped)
    }

    // ════════════════════════════════════════════
    // Row-level helpers (caller owns the transaction)
    // ════════════════════════════════════════════

    fn insert_rows(&self, conn: &Connection, store: &Store, rows: &EntryRows) -> DbqResult<()> {
        if let Some(meat) = &rows.meat {
            let shared = store.ref_counted
                && self.meats.increment_ref_count(conn, store.id, meat.id, 1)?;
            if !shared {
                self.meats.insert(conn, meat)?;
            }
        }
        if let Some(reference) = &rows.reference {
            self.refs.insert(conn, reference)?;
        }
        Ok(())
    }

    fn rows_exist(&self, conn: &Connection, store: &Store, rows: &EntryRows) -> DbqResult<bool> {
        match (&rows.reference, &rows.meat) {
            (Some(reference), _) => self.refs.exists(conn, store.id, reference.id),
            (None, Some(meat)) => self.meats.exists(conn, store.id, meat.id),
            (None, None) => Ok(false),
        }
    }

    /// Insert one entry in its own transaction. A failure caused by a
    /// concurrent duplicate yields `Ok(false)`.
    fn add_single(&self, conn: &mut Connection, store: &Store, rows: &EntryRows) -> DbqResult<bool> {
        let attempt = write_tx(conn)
            .map_err(DbqError::from)
            .and_then(|tx| {
                self.insert_rows(&tx, store, rows)?;
                tx.commit()?;
                Ok(())
            });
        match attempt {
            Ok(()) => Ok(true),
            Err(e) => {
                if !self.ping_connection(conn) {
                    return Err(e);
                }
                match self.rows_exist(conn, store, rows) {
                    Ok(true) => {
                        debug!(store = %store, error = %e, "entry already exists, ignoring insert");
                        Ok(false)
                    }
                    _ => Err(e),
                }
            }
        }
    }

    fn insert_batch(&self, conn: &mut Connection, store: &Store, rows: &[EntryRows]) -> DbqResult<()> {
        let tx = write_tx(conn)?;
        for row in rows {
            self.insert_rows(&tx, store, row)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Replay entries one by one; on failure delete the ones this pass
    /// inserted and return the failure.
    fn insert_single_mode(
        &self,
        conn: &mut Connection,
        store: &Store,
        rows: &[EntryRows],
    ) -> DbqResult<Vec<bool>> {
        let mut outcome = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            match self.add_single(conn, store, row) {
                Ok(inserted) => outcome.push(inserted),
                Err(e) => {
                    let inserted: Vec<&EntryRows> = rows[..i]
                        .iter()
                        .zip(&outcome)
                        .filter_map(|(row, ok)| ok.then_some(row))
                        .collect();
                    self.compensate(conn, store, &inserted);
                    return Err(e);
                }
            }
        }
        Ok(outcome)
    }

    /// Best effort: failures are logged, never returned.
    fn compensate(&self, conn: &mut Connection, store: &Store, inserted: &[&EntryRows]) {
        if inserted.is_empty() {
            return;
        }
        let ids: Vec<i64> = inserted
            .iter()
            .filter_map(|rows| {
                rows.reference
                    .as_ref()
                    .map(|r| r.id)
                    .or_else(|| rows.meat.as_ref().map(|m| m.id))
            })
            .collect();
        warn!(store = %store, count = ids.len(), "compensating partially inserted batch");
        let result = write_tx(conn).map_err(DbqError::from).and_then(|tx| {
            let deleted = self.delete_ids(&tx, store, &ids)?;
            tx.commit()?;
            Ok(deleted)
        });
        match result {
            Ok(deleted) if deleted == ids.len() => {
                info!(store = %store, deleted, "compensation complete");
            }
            Ok(deleted) => {
                error!(store = %store, deleted, expected = ids.len(), "compensation incomplete");
            }
            Err(e) => {
                error!(store = %store, error = %e, ids = ?ids, "compensation failed, batch partially persisted");
            }
        }
    }

    /// Delete refs and release their meats.
    fn delete_joined(&self, conn: &Connection, store: &Store, rows: &[JoinedRow]) -> DbqResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let ids: Vec<i64> = rows.iter().map(|r| r.reference.id).collect();
        let deleted = self.refs.delete_in(
            conn,
            store.id,
            &ids,
            self.max_statement_length,
            self.config.max_num_statements,
        )?;
        self.release_meats(conn, store, rows.iter().filter_map(|r| r.reference.meat_id))?;
        Ok(deleted)
    }

    fn release_meats(
        &self,
        conn: &Connection,
        store: &Store,
        meat_ids: impl Iterator<Item = i64>,
    ) -> DbqResult<()> {
        let mut per_meat: BTreeMap<i64, i64> = BTreeMap::new();
        for id in meat_ids {
            *per_meat.entry(id).or_default() += 1;
        }
        if per_meat.is_empty() {
            return Ok(());
        }
        for (meat_id, n) in &per_meat {
            self.meats.increment_ref_count(conn, store.id, *meat_id, -n)?;
        }
        let ids: Vec<i64> = per_meat.into_keys().collect();
        let removed = self.meats.delete_unreferenced(
            conn,
            store.id,
            &ids,
            self.max_statement_length,
            self.config.max_num_statements,
        )?;
        debug!(store = %store, released = ids.len(), removed, "released meats");
        Ok(())
    }

    /// Delete entries by id for either store kind.
    fn delete_ids(&self, conn: &Connection, store: &Store, ids: &[i64]) -> DbqResult<usize> {
        if store.ref_counted {
            let rows = self.refs.get_in(
                conn,
                store,
                ids,
                self.max_statement_length,
                self.config.max_num_statements,
            )?;
            self.delete_joined(conn, store, &rows)
        } else {
            self.meats.delete_in(
                conn,
                store.id,
                ids,
                self.max_statement_length,
                self.config.max_num_statements,
            )
        }
    }

    fn compose_all(&self, store: &Store, rows: Vec<JoinedRow>) -> DbqResult<Vec<QueueEntry>> {
        rows.into_iter()
            .map(|row| self.codec.compose(store, row.meat, Some(row.reference)))
            .collect()
    }

    fn compose_meats(&self, store: &Store, meats: Vec<Meat>) -> DbqResult<Vec<QueueEntry>> {
        meats
            .into_iter()
            .map(|meat| self.codec.compose(store, Some(meat), None))
            .collect()
    }

    fn count_rows(rows: &[JoinedRow]) -> EntryCount {
        let mut count = EntryCount::ZERO;
        for row in rows {
            count.add(&EntryCount::of(row.reference.byte_size, row.reference.durable));
        }
        count
    }

    fn require_ref_counted(store: &Store, operation: &str) -> DbqResult<()> {
        if store.ref_counted {
            Ok(())
        } else {
            Err(DbqError::NotImplemented(format!(
                "{operation} needs priorities, store {store} is meat-only"
            )))
        }
    }
}

impl QueueStorage for DatabaseAccessor {
    fn ping(&self) -> bool {
        if self.shut_down.load(Ordering::Acquire) {
            return false;
        }
        let alive = match self.pool.reserve() {
            Ok(conn) => {
                let alive = self.ping_connection(&conn);
                if alive {
                    self.pool.release(conn);
                } else {
                    self.pool.erase(conn);
                }
                alive
            }
            Err(e) => {
                debug!(error = %e, "ping could not reserve a connection");
                false
            }
        };
        if alive {
            self.mark_connected();
        } else {
            self.mark_disconnected("ping");
        }
        alive
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn register_problem_listener(&self, listener: &Arc<dyn StorageProblemListener>) -> bool {
        self.listeners.register(listener)
    }

    fn unregister_problem_listener(&self, listener: &Arc<dyn StorageProblemListener>) -> bool {
        self.listeners.unregister(listener)
    }

    fn get_or_create_store(&self, storage_id: &StorageId, ref_counted: bool) -> DbqResult<Store> {
        if let Some(store) = self.store_cache.get(storage_id) {
            return Ok(store.clone());
        }
        let store = self.run("getOrCreateStore", |conn| {
            if let Some(existing) = self.stores.get_by_name(conn, storage_id)? {
                return Ok(existing);
            }
            let store = Store {
                id: next_unique_id(),
                storage_id: storage_id.clone(),
                ref_counted,
                flag1: String::new(),
            };
            match self.stores.insert(conn, &store) {
                Ok(()) => {
                    info!(store = %store, ref_counted, "created store");
                    Ok(store)
                }
                // lost a creation race against another process
                Err(e) => self.stores.get_by_name(conn, storage_id)?.ok_or(e),
            }
        })?;
        if store.ref_counted != ref_counted {
            warn!(
                store = %store,
                persisted = store.ref_counted,
                requested = ref_counted,
                "store exists with a different ref-counting mode, keeping the persisted one"
            );
        }
        self.store_cache.insert(storage_id.clone(), store.clone());
        Ok(store)
    }

    fn delete_store(&self, store: &Store) -> DbqResult<bool> {
        let deleted = self.run("deleteStore", |conn| {
            let tx = write_tx(conn)?;
            self.refs.delete_all(&tx, store.id)?;
            self.meats.delete_all(&tx, store.id)?;
            let deleted = self.stores.delete(&tx, store.id)?;
            tx.commit()?;
            Ok(deleted)
        })?;
        self.store_cache.remove(&store.storage_id);
        if deleted {
            info!(store = %store, "deleted store");
        }
        Ok(deleted)
    }

    fn add_entry(&self, store: &Store, entry: &QueueEntry) -> DbqResult<bool> {
        let rows = self.codec.decompose(store, entry);
        self.run("addEntry", |conn| self.add_single(conn, store, &rows))
    }

    fn add_entries(&self, store: &Store, entries: &[QueueEntry]) -> DbqResult<Vec<bool>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<EntryRows> = entries
            .iter()
            .map(|e| self.codec.decompose(store, e))
            .collect();
        self.run("addEntries", |conn| {
            if self.config.enable_batch_mode {
                match self.insert_batch(conn, store, &rows) {
                    Ok(()) => return Ok(vec![true; rows.len()]),
                    Err(e) => {
                        if !self.ping_connection(conn) {
                            return Err(e);
                        }
                        warn!(
                            store = %store,
                            count = rows.len(),
                            error = %e,
                            "batch insert failed, falling back to single mode"
                        );
                    }
                }
            }
            self.insert_single_mode(conn, store, &rows)
        })
    }

    fn modify_entry(
        &self,
        store: &Store,
        new_meat: &Meat,
        old_meat: Option<&Meat>,
        mode: ModifyMode,
    ) -> DbqResult<i64> {
        self.run("modifyEntry", |conn| {
            let tx = write_tx(conn)?;
            let old_size = match old_meat {
                Some(old) => Some(old.byte_size),
                None => self
                    .meats
                    .get(&tx, store.id, new_meat.id)?
                    .map(|m| m.byte_size),
            };
            let found = match mode {
                ModifyMode::Full => self.meats.update(&tx, new_meat)?,
                ModifyMode::RefCountersOnly => self.meats.update_ref_count(&tx, new_meat)?,
            };
            if !found {
                return Err(DbqError::InvalidArguments(format!(
                    "meat {} does not exist in store {store}",
                    new_meat.id
                )));
            }
            tx.commit()?;
            Ok(match mode {
                ModifyMode::Full => new_meat.byte_size - old_size.unwrap_or(0),
                ModifyMode::RefCountersOnly => 0,
            })
        })
    }

    fn adjust_ref_count(&self, store: &Store, meat_id: i64, delta: i64) -> DbqResult<Option<i64>> {
        self.run("adjustRefCount", |conn| {
            let tx = write_tx(conn)?;
            if !self.meats.increment_ref_count(&tx, store.id, meat_id, delta)? {
                return Ok(None);
            }
            let count = self.meats.get(&tx, store.id, meat_id)?.map(|m| m.ref_count);
            tx.commit()?;
            Ok(count)
        })
    }

    fn get_entry(&self, store: &Store, unique_id: i64) -> DbqResult<Option<QueueEntry>> {
        self.run("getEntry", |conn| {
            if store.ref_counted {
                self.refs
                    .get(conn, store.id, unique_id)?
                    .map(|row| self.codec.compose(store, row.meat, Some(row.reference)))
                    .transpose()
            } else {
                self.meats
                    .get(conn, store.id, unique_id)?
                    .map(|meat| self.codec.compose(store, Some(meat), None))
                    .transpose()
            }
        })
    }

    fn get_entries(&self, store: &Store, query: &EntryQuery) -> DbqResult<Vec<QueueEntry>> {
        let max_rows = self.config.max_select_limit;
        let max_length = self.max_statement_length;
        let max_ids = self.config.max_num_statements;
        self.run(query.name(), |conn| {
            if !store.ref_counted {
                let meats = match query {
                    EntryQuery::First {
                        max_entries,
                        max_bytes,
                    } => self
                        .meats
                        .get_first(conn, store, *max_entries, *max_bytes, max_rows)?,
                    EntryQuery::ByIds(ids) => {
                        self.meats.get_in(conn, store, ids, max_length, max_ids)?
                    }
                    other => {
                        Self::require_ref_counted(store, other.name())?;
                        Vec::new()
                    }
                };
                return self.compose_meats(store, meats);
            }
            let rows = match query {
                EntryQuery::First {
                    max_entries,
                    max_bytes,
                } => self
                    .refs
                    .get_first(conn, store, *max_entries, *max_bytes, max_rows)?,
                EntryQuery::ByPriority {
                    max_entries,
                    max_bytes,
                    min_prio,
                    max_prio,
                } => self.refs.get_by_priority(
                    conn,
                    store,
                    *max_entries,
                    *max_bytes,
                    *min_prio,
                    *max_prio,
                    max_rows,
                )?,
                EntryQuery::SamePriority {
                    max_entries,
                    max_bytes,
                } => self
                    .refs
                    .get_by_same_priority(conn, store, *max_entries, *max_bytes, max_rows)?,
                EntryQuery::StartAt {
                    max_entries,
                    max_bytes,
                    prio,
                    id,
                } => self.refs.get_start_at(
                    conn,
                    store,
                    *max_entries,
                    *max_bytes,
                    *prio,
                    *id,
                    max_rows,
                )?,
                EntryQuery::WithLimit {
                    prio,
                    id,
                    inclusive,
                } => self.refs.get_with_limit(conn, store, *prio, *id, *inclusive)?,
                EntryQuery::ByIds(ids) => self.refs.get_in(conn, store, ids, max_length, max_ids)?,
                EntryQuery::Transients => self.refs.get_transients(conn, store)?,
            };
            self.compose_all(store, rows)
        })
    }

    fn get_and_delete_lowest(
        &self,
        store: &Store,
        walk: &LowestWalk,
        leave_one: bool,
        do_delete: bool,
    ) -> DbqResult<LowestResult> {
        Self::require_ref_counted(store, "getAndDeleteLowest")?;
        self.run("getAndDeleteLowest", |conn| {
            let tx = write_tx(conn)?;
            let (mut rows, exhausted) = self.refs.get_lowest(&tx, store, walk)?;
            if leave_one && exhausted && rows.pop().is_some() {
                debug!(store = %store, "leaving one entry in the store");
            }
            let count = Self::count_rows(&rows);
            if do_delete {
                let deleted = self.delete_joined(&tx, store, &rows)?;
                if deleted != rows.len() {
                    return Err(DbqError::IllegalState(format!(
                        "deleted {deleted} of {} selected refs in {store}",
                        rows.len()
                    )));
                }
            }
            tx.commit()?;
            Ok(LowestResult {
                entries: self.compose_all(store, rows)?,
                count,
            })
        })
    }

    fn delete_entries(&self, store: &Store, ids: &[i64]) -> DbqResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.run("deleteEntries", |conn| {
            let tx = write_tx(conn)?;
            let deleted = self.delete_ids(&tx, store, ids)?;
            tx.commit()?;
            Ok(deleted)
        })
    }

    fn delete_entries_with_limit(
        &self,
        store: &Store,
        prio: i32,
        id: i64,
        inclusive: bool,
    ) -> DbqResult<EntryCount> {
        Self::require_ref_counted(store, "deleteEntriesWithLimit")?;
        self.run("deleteEntriesWithLimit", |conn| {
            let tx = write_tx(conn)?;
            let rows = self.refs.get_with_limit(&tx, store, prio, id, inclusive)?;
            let deleted = self.refs.delete_with_limit(&tx, store.id, prio, id, inclusive)?;
            if deleted != rows.len() {
                return Err(DbqError::IllegalState(format!(
                    "ranged delete removed {deleted} of {} selected refs in {store}",
                    rows.len()
                )));
            }
            self.release_meats(&tx, store, rows.iter().filter_map(|r| r.reference.meat_id))?;
            tx.commit()?;
            Ok(Self::count_rows(&rows))
        })
    }

    fn delete_first_entries(
        &self,
        store: &Store,
        max_entries: i64,
        max_bytes: i64,
    ) -> DbqResult<EntryCount> {
        let max_rows = self.config.max_select_limit;
        self.run("deleteFirstEntries", |conn| {
            let tx = write_tx(conn)?;
            let count = if store.ref_counted {
                let rows = self
                    .refs
                    .get_first(&tx, store, max_entries, max_bytes, max_rows)?;
                self.delete_joined(&tx, store, &rows)?;
                Self::count_rows(&rows)
            } else {
                let meats = self
                    .meats
                    .get_first(&tx, store, max_entries, max_bytes, max_rows)?;
                let ids: Vec<i64> = meats.iter().map(|m| m.id).collect();
                self.meats.delete_in(
                    &tx,
                    store.id,
                    &ids,
                    self.max_statement_length,
                    self.config.max_num_statements,
                )?;
                let mut count = EntryCount::ZERO;
                for meat in &meats {
                    count.add(&EntryCount::of(meat.byte_size, meat.durable));
                }
                count
            };
            tx.commit()?;
            Ok(count)
        })
    }

    fn delete_all_transient(&self, store: Option<&Store>) -> DbqResult<usize> {
        self.run("deleteAllTransient", |conn| {
            let stores = match store {
                Some(store) => vec![store.clone()],
                None => self.stores.get_all(conn)?,
            };
            let tx = write_tx(conn)?;
            let mut deleted = 0;
            for store in &stores {
                deleted += if store.ref_counted {
                    let rows = self.refs.get_transients(&tx, store)?;
                    self.delete_joined(&tx, store, &rows)?
                } else {
                    self.meats.delete_transients(&tx, store.id)?
                };
            }
            tx.commit()?;
            if deleted > 0 {
                info!(stores = stores.len(), deleted, "deleted transient entries");
            }
            Ok(deleted)
        })
    }

    fn clear_store(&self, store: &Store) -> DbqResult<usize> {
        self.run("clearQueue", |conn| {
            let tx = write_tx(conn)?;
            let refs = self.refs.delete_all(&tx, store.id)?;
            let meats = self.meats.delete_all(&tx, store.id)?;
            tx.commit()?;
            Ok(if store.ref_counted { refs } else { meats })
        })
    }

    fn get_num_of_all(&self, store: &Store) -> DbqResult<EntryCount> {
        self.run("getNumOfAll", |conn| {
            if store.ref_counted {
                self.refs.count(conn, store.id)
            } else {
                self.meats.count(conn, store.id)
            }
        })
    }

    fn wipe_out_db(&self, recreate: bool) -> DbqResult<usize> {
        if !self.config.db_admin {
            return Err(DbqError::IllegalState(
                "wipe-out of the queue tables requires dbAdmin=true".into(),
            ));
        }
        let dropped = self.run("wipeOutDb", |conn| {
            let dropped = self.drop_tables(conn)?;
            if recreate {
                self.create_tables(conn)?;
            }
            Ok(dropped)
        })?;
        self.store_cache.clear();
        warn!(dropped, recreate, "wiped out queue tables");
        Ok(dropped)
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.store_cache.clear();
        self.pool.shutdown();
        info!(url = %self.pool.url(), "database accessor shut down");
    }
}

impl std::fmt::Debug for DatabaseAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseAccessor")
            .field("url", &self.pool.url())
            .field("dialect", &self.dialect)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
