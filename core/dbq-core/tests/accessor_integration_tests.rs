// Accessor integration tests
//
// DatabaseAccessor 단독 검증: 장애 분류, 배치 폴백 보상, 청크 삭제, 재시도 데코레이터

use dbq_core::accessor::LowestResult;
use dbq_core::{
    AccessorConfig, ConnectionPool, DatabaseAccessor, DbqError, DbqResult, EntryQuery,
    MAX_PRIORITY, ModifyMode, PersistentQueue, PoolConfig, QueueConfig, QueueEntry, QueueStorage,
    RetryingAccessor, SqlitePool, StorageId, StorageProblemListener, StorageStatus, Store,
    LowestWalk,
};
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};
use tempfile::tempdir;

// ─── Helpers ────────────────────────────────────────────

const DB_FILE: &str = "dbq.db";

fn sqlite_pool(dir: &Path) -> DbqResult<Arc<SqlitePool>> {
    Ok(Arc::new(SqlitePool::open(dir.join(DB_FILE), PoolConfig::default())?))
}

/// Engine without the retry decorator, so raw classifications are visible.
fn engine(dir: &Path, config: AccessorConfig) -> DbqResult<DatabaseAccessor> {
    DatabaseAccessor::new(sqlite_pool(dir)?, config)
}

fn history(acc: &impl QueueStorage) -> DbqResult<Store> {
    acc.get_or_create_store(&StorageId::new("node1", "history", "topicA"), true)
}

fn entry(id: i64, prio: i32) -> QueueEntry {
    QueueEntry::with_id(id, prio, "MSG_RAW", vec![0u8; 16])
}

fn count_rows(dir: &Path, table: &str) -> i64 {
    let conn = Connection::open(dir.join(DB_FILE)).unwrap();
    conn.query_row(&format!("select count(*) from {table}"), [], |row| row.get(0))
        .unwrap()
}

/// Aborts every ref insert with priority 666.
fn install_failing_trigger(dir: &Path) {
    let conn = Connection::open(dir.join(DB_FILE)).unwrap();
    conn.execute_batch(
        "create trigger boom before insert on xbref when new.xbprio = 666 \
         begin select raise(abort, 'boom'); end;",
    )
    .unwrap();
}

/// Makes every ref insert with priority 7 scan a large cross join.
fn install_slow_trigger(dir: &Path) {
    let mut conn = Connection::open(dir.join(DB_FILE)).unwrap();
    let tx = conn.transaction().unwrap();
    tx.execute_batch("create table pad (x integer)").unwrap();
    for i in 0..2000 {
        tx.execute("insert into pad values (?1)", [i]).unwrap();
    }
    tx.commit().unwrap();
    conn.execute_batch(
        "create trigger crawl before insert on xbref when new.xbprio = 7 \
         begin select count(*) from pad a, pad b, pad c; end;",
    )
    .unwrap();
}

fn ids(result: &LowestResult) -> Vec<i64> {
    result.entries.iter().map(|e| e.unique_id).collect()
}

/// Pool wrapper that can be switched to refuse every reservation.
struct FlakyPool {
    inner: Arc<SqlitePool>,
    down: AtomicBool,
    reserves: AtomicUsize,
}

impl FlakyPool {
    fn new(inner: Arc<SqlitePool>) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
            reserves: AtomicUsize::new(0),
        }
    }
}

impl ConnectionPool for FlakyPool {
    fn reserve(&self) -> DbqResult<Connection> {
        self.reserves.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(DbqError::Pool("network unreachable".into()));
        }
        self.inner.reserve()
    }

    fn release(&self, conn: Connection) {
        self.inner.release(conn)
    }

    fn erase(&self, conn: Connection) {
        self.inner.erase(conn)
    }

    fn url(&self) -> &str {
        self.inner.url()
    }

    fn shutdown(&self) {
        self.inner.shutdown()
    }
}

#[derive(Default)]
struct StatusLog {
    lost: AtomicUsize,
    back: AtomicUsize,
}

impl StorageProblemListener for StatusLog {
    fn storage_unavailable(&self, old_status: StorageStatus) {
        assert_eq!(old_status, StorageStatus::Available);
        self.lost.fetch_add(1, Ordering::SeqCst);
    }

    fn storage_available(&self, old_status: StorageStatus) {
        assert_eq!(old_status, StorageStatus::Unavailable);
        self.back.fetch_add(1, Ordering::SeqCst);
    }
}

/// Pool wrapper whose connections interrupt every statement once `dying`
/// is set, as if the server went away mid-operation.
struct DyingPool {
    inner: Arc<SqlitePool>,
    dying: AtomicBool,
    erased: AtomicUsize,
}

impl DyingPool {
    fn new(inner: Arc<SqlitePool>) -> Self {
        Self {
            inner,
            dying: AtomicBool::new(false),
            erased: AtomicUsize::new(0),
        }
    }
}

impl ConnectionPool for DyingPool {
    fn reserve(&self) -> DbqResult<Connection> {
        let conn = self.inner.reserve()?;
        if self.dying.load(Ordering::SeqCst) {
            conn.progress_handler(1, Some(|| true));
        }
        Ok(conn)
    }

    fn release(&self, conn: Connection) {
        self.inner.release(conn)
    }

    fn erase(&self, conn: Connection) {
        self.erased.fetch_add(1, Ordering::SeqCst);
        self.inner.erase(conn)
    }

    fn url(&self) -> &str {
        self.inner.url()
    }

    fn shutdown(&self) {
        self.inner.shutdown()
    }
}

/// Puts into its queue from inside the unavailable notification.
#[derive(Default)]
struct CallsBack {
    queue: OnceLock<Weak<PersistentQueue>>,
    refused: AtomicUsize,
}

impl StorageProblemListener for CallsBack {
    fn storage_unavailable(&self, _old_status: StorageStatus) {
        if let Some(queue) = self.queue.get().and_then(Weak::upgrade) {
            if queue
                .put(&entry(99, 5), true)
                .is_err_and(|e| e.is_unavailable())
            {
                self.refused.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn storage_available(&self, _old_status: StorageStatus) {}
}

// ═══════════════════════════════════════════════════════════
// Eviction walk
// ═══════════════════════════════════════════════════════════

#[test]
fn lowest_walk_with_priority_cutoff() -> DbqResult<()> {
    let dir = tempdir()?;
    let acc = engine(dir.path(), AccessorConfig::default())?;
    let store = history(&acc)?;
    acc.add_entries(
        &store,
        &[entry(100, 5), entry(101, 5), entry(102, 3), entry(103, 9)],
    )?;

    let walk = LowestWalk {
        max_entries: 2,
        max_bytes: -1,
        max_priority: MAX_PRIORITY,
        min_unique_id: 0,
    };
    let peeked = acc.get_and_delete_lowest(&store, &walk, false, false)?;
    assert_eq!(ids(&peeked), vec![102, 101]);
    assert_eq!(acc.get_num_of_all(&store)?.num_of_entries, 4);

    let taken = acc.get_and_delete_lowest(&store, &walk, false, true)?;
    assert_eq!(ids(&taken), vec![102, 101]);
    assert_eq!(taken.count.num_of_entries, 2);
    assert_eq!(taken.count.num_of_bytes, 32);
    assert_eq!(acc.get_num_of_all(&store)?.num_of_entries, 2);

    // the cutoff excludes everything at MAX_PRIORITY
    let rest = acc.get_and_delete_lowest(&store, &LowestWalk { max_entries: -1, ..walk }, false, false)?;
    assert_eq!(ids(&rest), vec![100]);
    Ok(())
}

#[test]
fn lowest_walk_stops_at_byte_bound() -> DbqResult<()> {
    let dir = tempdir()?;
    let acc = engine(dir.path(), AccessorConfig::default())?;
    let store = history(&acc)?;
    acc.add_entries(&store, &[entry(1, 1), entry(2, 2), entry(3, 3)])?;

    // accumulate while bytes < max: 0 < 20 takes 16, 16 < 20 takes 32
    let result = acc.get_and_delete_lowest(&store, &LowestWalk::unbounded(-1, 20), false, false)?;
    assert_eq!(ids(&result), vec![1, 2]);
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Batch insert fallback
// ═══════════════════════════════════════════════════════════

#[test]
fn batch_failure_compensates_partial_inserts() -> DbqResult<()> {
    let dir = tempdir()?;
    let acc = engine(dir.path(), AccessorConfig::default())?;
    let store = history(&acc)?;
    install_failing_trigger(dir.path());

    let batch = [entry(1, 5), entry(2, 5), entry(3, 666), entry(4, 5)];
    let err = acc.add_entries(&store, &batch).unwrap_err();
    assert!(err.is_transient(), "expected Unknown, got {err}");
    assert!(acc.is_connected());

    assert_eq!(count_rows(dir.path(), "xbref"), 0);
    assert_eq!(count_rows(dir.path(), "xbmeat"), 0);

    // the store stays usable
    assert_eq!(acc.add_entries(&store, &batch[..2])?, vec![true, true]);
    Ok(())
}

#[test]
fn single_mode_without_batching() -> DbqResult<()> {
    let dir = tempdir()?;
    let config = AccessorConfig {
        enable_batch_mode: false,
        ..AccessorConfig::default()
    };
    let acc = engine(dir.path(), config)?;
    let store = history(&acc)?;
    acc.add_entry(&store, &entry(2, 5))?;

    let outcome = acc.add_entries(&store, &[entry(1, 5), entry(2, 5), entry(3, 5)])?;
    assert_eq!(outcome, vec![true, false, true]);
    assert_eq!(count_rows(dir.path(), "xbref"), 3);
    Ok(())
}

#[test]
fn retry_decorator_gives_up_as_unavailable() -> DbqResult<()> {
    let dir = tempdir()?;
    let acc = RetryingAccessor::new(
        engine(dir.path(), AccessorConfig::default())?,
        3,
        Duration::ZERO,
    );
    let store = history(&acc)?;
    install_failing_trigger(dir.path());

    let err = acc.add_entries(&store, &[entry(1, 666)]).unwrap_err();
    assert!(err.is_unavailable(), "expected Unavailable, got {err}");
    assert_eq!(count_rows(dir.path(), "xbref"), 0);

    // non-transient failures pass straight through
    let meat_only = acc.get_or_create_store(&StorageId::new("n", "msgUnitStore", "x"), false)?;
    let err = acc
        .get_and_delete_lowest(&meat_only, &LowestWalk::unbounded(-1, -1), false, true)
        .unwrap_err();
    assert!(matches!(err, DbqError::NotImplemented(_)));
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Chunked deletes
// ═══════════════════════════════════════════════════════════

#[test]
fn chunked_delete_removes_exactly_the_requested_set() -> DbqResult<()> {
    let dir = tempdir()?;
    let config = AccessorConfig {
        max_num_statements: 3,
        max_statement_length: 100,
        ..AccessorConfig::default()
    };
    let acc = engine(dir.path(), config)?;
    let store = history(&acc)?;
    let entries: Vec<QueueEntry> = (1..=40).map(|id| entry(id, (id % 10) as i32)).collect();
    acc.add_entries(&store, &entries)?;

    let doomed: Vec<i64> = (1..=40).filter(|id| id % 3 != 0).collect();
    assert_eq!(acc.delete_entries(&store, &doomed)?, doomed.len());

    let left = acc.get_entries(&store, &EntryQuery::first(-1, -1))?;
    let mut left_ids: Vec<i64> = left.iter().map(|e| e.unique_id).collect();
    left_ids.sort_unstable();
    assert_eq!(left_ids, (1..=40).filter(|id| id % 3 == 0).collect::<Vec<_>>());
    assert_eq!(count_rows(dir.path(), "xbmeat"), left_ids.len() as i64);

    let fetched = acc.get_entries(&store, &EntryQuery::ByIds((1..=40).collect()))?;
    assert_eq!(fetched.len(), left_ids.len());
    Ok(())
}

#[test]
fn ranged_delete_releases_meats_in_one_transaction() -> DbqResult<()> {
    let dir = tempdir()?;
    let acc = engine(dir.path(), AccessorConfig::default())?;
    let store = history(&acc)?;
    acc.add_entries(
        &store,
        &[entry(100, 5), entry(101, 5), entry(102, 3), entry(103, 9)],
    )?;

    let removed = acc.delete_entries_with_limit(&store, 5, 101, false)?;
    assert_eq!(removed.num_of_entries, 2);
    assert_eq!(removed.num_of_bytes, 32);
    let left = acc.get_entries(&store, &EntryQuery::first(-1, -1))?;
    assert_eq!(left.iter().map(|e| e.unique_id).collect::<Vec<_>>(), vec![101, 102]);
    assert_eq!(count_rows(dir.path(), "xbmeat"), 2);

    let removed = acc.delete_entries_with_limit(&store, 3, 102, true)?;
    assert_eq!(removed.num_of_entries, 2);
    assert_eq!(count_rows(dir.path(), "xbref"), 0);
    assert_eq!(count_rows(dir.path(), "xbmeat"), 0);

    let meat_only = acc.get_or_create_store(&StorageId::new("n", "msgUnitStore", "x"), false)?;
    assert!(matches!(
        acc.delete_entries_with_limit(&meat_only, 5, 1, true),
        Err(DbqError::NotImplemented(_))
    ));
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Statement timeout
// ═══════════════════════════════════════════════════════════

#[test]
fn query_timeout_interrupts_slow_statement() -> DbqResult<()> {
    let dir = tempdir()?;
    let config = AccessorConfig {
        query_timeout: 1,
        ..AccessorConfig::default()
    };
    let acc = engine(dir.path(), config)?;
    let store = history(&acc)?;
    install_slow_trigger(dir.path());

    let started = Instant::now();
    let err = acc.add_entry(&store, &entry(1, 7)).unwrap_err();
    let elapsed = started.elapsed();
    assert!(err.is_transient(), "expected Unknown, got {err}");
    assert!(elapsed >= Duration::from_secs(1), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(10), "returned after {elapsed:?}");

    // the connection survived the interrupt
    assert!(acc.is_connected());
    assert_eq!(count_rows(dir.path(), "xbref"), 0);
    assert_eq!(count_rows(dir.path(), "xbmeat"), 0);
    assert!(acc.add_entry(&store, &entry(2, 5))?);
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Connection loss
// ═══════════════════════════════════════════════════════════

#[test]
fn connection_dying_mid_operation_is_erased_and_reported() -> DbqResult<()> {
    let dir = tempdir()?;
    let pool = Arc::new(DyingPool::new(sqlite_pool(dir.path())?));
    let acc = DatabaseAccessor::new(
        Arc::clone(&pool) as Arc<dyn ConnectionPool>,
        AccessorConfig::default(),
    )?;
    let store = history(&acc)?;
    let log = Arc::new(StatusLog::default());
    let listener: Arc<dyn StorageProblemListener> = log.clone();
    assert!(acc.register_problem_listener(&listener));

    pool.dying.store(true, Ordering::SeqCst);
    let err = acc
        .add_entries(&store, &[entry(1, 5), entry(2, 5)])
        .unwrap_err();
    assert!(err.is_unavailable(), "expected Unavailable, got {err}");
    assert_eq!(pool.erased.load(Ordering::SeqCst), 1);
    assert!(!acc.is_connected());
    assert_eq!(log.lost.load(Ordering::SeqCst), 1);

    // disconnected: no further connection is touched
    assert!(acc.add_entry(&store, &entry(3, 5)).unwrap_err().is_unavailable());
    assert_eq!(pool.erased.load(Ordering::SeqCst), 1);

    pool.dying.store(false, Ordering::SeqCst);
    assert!(acc.ping());
    assert_eq!(log.back.load(Ordering::SeqCst), 1);
    assert_eq!(count_rows(dir.path(), "xbref"), 0);
    Ok(())
}

#[test]
fn problem_listener_may_call_back_into_the_queue() -> DbqResult<()> {
    let dir = tempdir()?;
    let pool = Arc::new(DyingPool::new(sqlite_pool(dir.path())?));
    let storage: Arc<dyn QueueStorage> = Arc::new(DatabaseAccessor::new(
        Arc::clone(&pool) as Arc<dyn ConnectionPool>,
        AccessorConfig::default(),
    )?);
    let queue = Arc::new(PersistentQueue::new(
        storage,
        QueueConfig::new(StorageId::new("node1", "callback", "reentrant")),
    )?);
    let calls_back = Arc::new(CallsBack::default());
    let _ = calls_back.queue.set(Arc::downgrade(&queue));
    let listener: Arc<dyn StorageProblemListener> = calls_back.clone();
    assert!(queue.register_storage_problem_listener(&listener));

    // the listener fires while this put holds the mutation lock
    pool.dying.store(true, Ordering::SeqCst);
    let err = queue.put(&entry(1, 5), false).unwrap_err();
    assert!(err.is_unavailable(), "expected Unavailable, got {err}");
    assert_eq!(calls_back.refused.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn lost_connection_fails_fast_until_ping_succeeds() -> DbqResult<()> {
    let dir = tempdir()?;
    let pool = Arc::new(FlakyPool::new(sqlite_pool(dir.path())?));
    let acc = DatabaseAccessor::new(Arc::clone(&pool) as Arc<dyn ConnectionPool>, AccessorConfig::default())?;
    let storage: Arc<dyn QueueStorage> = Arc::new(acc);

    let log = Arc::new(StatusLog::default());
    let listener: Arc<dyn StorageProblemListener> = log.clone();
    assert!(storage.register_problem_listener(&listener));

    let queue = PersistentQueue::new(
        Arc::clone(&storage),
        QueueConfig::new(StorageId::new("node1", "callback", "lossy")),
    )?;
    queue.put(&entry(1, 5), false)?;

    pool.down.store(true, Ordering::SeqCst);
    assert!(!storage.ping());
    assert!(!storage.is_connected());
    assert_eq!(log.lost.load(Ordering::SeqCst), 1);

    let reserves = pool.reserves.load(Ordering::SeqCst);
    let err = queue.put(&entry(2, 5), false).unwrap_err();
    assert!(err.is_unavailable());
    assert_eq!(pool.reserves.load(Ordering::SeqCst), reserves);

    // a second failing ping does not notify again
    assert!(!storage.ping());
    assert_eq!(log.lost.load(Ordering::SeqCst), 1);

    pool.down.store(false, Ordering::SeqCst);
    assert!(storage.ping());
    assert_eq!(log.back.load(Ordering::SeqCst), 1);
    assert!(queue.put(&entry(2, 5), false)?);
    assert_eq!(queue.num_of_entries(), 2);

    assert!(storage.unregister_problem_listener(&listener));
    pool.down.store(true, Ordering::SeqCst);
    storage.ping();
    assert_eq!(log.lost.load(Ordering::SeqCst), 1);
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Entry maintenance
// ═══════════════════════════════════════════════════════════

#[test]
fn modify_entry_reports_byte_delta() -> DbqResult<()> {
    let dir = tempdir()?;
    let acc = engine(dir.path(), AccessorConfig::default())?;
    let store = history(&acc)?;
    acc.add_entry(&store, &entry(1, 5))?;

    let stored = acc
        .get_entries(&store, &EntryQuery::ByIds(vec![1]))?
        .remove(0);
    let codec = dbq_core::EntryCodec;
    let mut bigger = stored.clone();
    bigger.content = vec![1u8; 40];
    bigger.size_in_bytes = 40;
    let new_meat = dbq_core::EntryFactory::decompose(&codec, &store, &bigger)
        .meat
        .unwrap();

    assert_eq!(acc.modify_entry(&store, &new_meat, None, ModifyMode::Full)?, 24);
    assert_eq!(
        acc.modify_entry(&store, &new_meat, None, ModifyMode::RefCountersOnly)?,
        0
    );

    let mut ghost = new_meat.clone();
    ghost.id = 999;
    assert!(matches!(
        acc.modify_entry(&store, &ghost, None, ModifyMode::Full),
        Err(DbqError::InvalidArguments(_))
    ));
    Ok(())
}

#[test]
fn transients_are_deleted_across_stores() -> DbqResult<()> {
    let dir = tempdir()?;
    let acc = engine(dir.path(), AccessorConfig::default())?;
    let refs = history(&acc)?;
    let meats = acc.get_or_create_store(&StorageId::new("node1", "msgUnitStore", "x"), false)?;

    acc.add_entries(&refs, &[entry(1, 5), entry(2, 5).persistent(false)])?;
    acc.add_entries(&meats, &[entry(3, 5).persistent(false), entry(4, 5)])?;

    let transients = acc.get_entries(&refs, &EntryQuery::Transients)?;
    assert_eq!(transients.len(), 1);

    assert_eq!(acc.delete_all_transient(None)?, 2);
    assert_eq!(acc.get_num_of_all(&refs)?.num_of_entries, 1);
    assert_eq!(acc.get_num_of_all(&meats)?.num_of_entries, 1);
    Ok(())
}

#[test]
fn select_limit_caps_first_entries() -> DbqResult<()> {
    let dir = tempdir()?;
    let config = AccessorConfig {
        max_select_limit: 3,
        ..AccessorConfig::default()
    };
    let acc = engine(dir.path(), config)?;
    let store = history(&acc)?;
    acc.add_entries(&store, &(1..=10).map(|id| entry(id, 5)).collect::<Vec<_>>())?;
    assert_eq!(acc.get_entries(&store, &EntryQuery::first(-1, -1))?.len(), 3);
    assert_eq!(acc.delete_first_entries(&store, -1, -1)?.num_of_entries, 3);
    assert_eq!(acc.get_num_of_all(&store)?.num_of_entries, 7);
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Schema management
// ═══════════════════════════════════════════════════════════

#[test]
fn table_prefix_is_applied() -> DbqResult<()> {
    let dir = tempdir()?;
    let config = AccessorConfig {
        table_prefix: "q_".into(),
        ..AccessorConfig::default()
    };
    let acc = engine(dir.path(), config)?;
    let store = history(&acc)?;
    acc.add_entry(&store, &entry(1, 5))?;
    assert_eq!(count_rows(dir.path(), "q_xbref"), 1);
    assert_eq!(count_rows(dir.path(), "q_xbstore"), 1);
    Ok(())
}

#[test]
fn non_admin_requires_existing_tables() -> DbqResult<()> {
    let dir = tempdir()?;
    let config = AccessorConfig {
        db_admin: false,
        ..AccessorConfig::default()
    };
    let err = engine(dir.path(), config.clone()).unwrap_err();
    assert!(matches!(err, DbqError::IllegalState(_)));

    engine(dir.path(), AccessorConfig::default())?.shutdown();
    let acc = engine(dir.path(), config)?;
    assert!(matches!(acc.wipe_out_db(false), Err(DbqError::IllegalState(_))));
    Ok(())
}

#[test]
fn wipe_out_drops_and_recreates() -> DbqResult<()> {
    let dir = tempdir()?;
    let acc = engine(dir.path(), AccessorConfig::default())?;
    let store = history(&acc)?;
    acc.add_entry(&store, &entry(1, 5))?;

    assert_eq!(acc.wipe_out_db(true)?, 3);
    assert_eq!(count_rows(dir.path(), "xbref"), 0);
    assert_eq!(count_rows(dir.path(), "xbstore"), 0);

    let store = history(&acc)?;
    assert!(acc.add_entry(&store, &entry(1, 5))?);
    Ok(())
}
