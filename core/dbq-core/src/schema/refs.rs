//! Ref table: placement rows of ref-counted stores.
//!
//! Two orders matter here and are easy to swap by accident:
//!
//! - delivery: `xbprio desc, xbrefid asc` (most urgent first, FIFO within a
//!   priority)
//! - eviction: `xbprio asc, xbrefid desc` (least urgent first, newest first
//!   within a priority)
//!
//! Reads join the meat so an entry can be rebuilt from one row.

use super::meat::read_meat_at;
use super::{
    Dialect, REF_TABLE, TableFactory, TableNames, TableStatements, count_by_durability, flag,
    is_flag_set, where_in_statements,
};
use crate::config::Properties;
use crate::error::DbqResult;
use crate::model::{EntryCount, Meat, Ref, Store};
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};

const COLUMNS: &str =
    "xbrefid, xbstoreid, xbmeatid, xbdurable, xbbytesize, xbmetainfo, xbflag1, xbprio, xbmethodname";

/// Joined select; the meat columns start at index [`MEAT_OFFSET`].
const SELECT_JOINED: &str = "select r.xbrefid, r.xbstoreid, r.xbmeatid, r.xbdurable, r.xbbytesize, \
     r.xbmetainfo, r.xbflag1, r.xbprio, r.xbmethodname, \
     m.xbmeatid, m.xbstoreid, m.xbdurable, m.xbrefcount, m.xbbytesize, m.xbdatatype, \
     m.xbflag1, m.xbmsgqos, m.xbmsgcont, m.xbmsgkey \
     from ${table} r left outer join ${meatTable} m \
     on r.xbmeatid = m.xbmeatid and r.xbstoreid = m.xbstoreid \
     where r.xbstoreid = ?";

const MEAT_OFFSET: usize = 9;
const DELIVERY_ORDER: &str = " order by r.xbprio desc, r.xbrefid asc";
const EVICTION_ORDER: &str = " order by r.xbprio asc, r.xbrefid desc";

/// One ref together with its meat, if the meat row exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedRow {
    pub reference: Ref,
    pub meat: Option<Meat>,
}

/// Bounds of an eviction-order walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowestWalk {
    /// Negative means unlimited
    pub max_entries: i64,
    /// Negative means unlimited
    pub max_bytes: i64,
    pub max_priority: i32,
    pub min_unique_id: i64,
}

impl LowestWalk {
    /// No cutoff, only entry/byte bounds.
    pub fn unbounded(max_entries: i64, max_bytes: i64) -> Self {
        Self {
            max_entries,
            max_bytes,
            max_priority: i32::MAX,
            min_unique_id: i64::MAX,
        }
    }

    /// True if `(prio, id)` sorts strictly below the `(max_priority,
    /// min_unique_id)` cutoff.
    ///
    /// The comparison is lexicographic: at `prio == max_priority` only ids
    /// smaller than `min_unique_id` qualify, so entries newer than the cutoff
    /// entry at its own priority are never walked.
    pub fn is_below_cutoff(&self, prio: i32, id: i64) -> bool {
        prio < self.max_priority || (prio == self.max_priority && id < self.min_unique_id)
    }
}

#[derive(Debug, Clone)]
pub struct RefFactory {
    base: TableFactory,
    insert_sql: String,
    get_sql: String,
    exists_sql: String,
    get_first_sql: String,
    get_by_priority_sql: String,
    get_same_priority_sql: String,
    get_start_at_sql: String,
    get_with_limit_sql: String,
    get_with_limit_inclusive_sql: String,
    get_lowest_sql: String,
    get_transients_sql: String,
    get_in_prefix: String,
    delete_sql: String,
    delete_in_prefix: String,
    delete_with_limit_sql: String,
    delete_with_limit_inclusive_sql: String,
    delete_all_sql: String,
    count_sql: String,
}

impl RefFactory {
    pub fn new(dialect: Dialect, names: &TableNames, overrides: &Properties) -> Self {
        let st = TableStatements::new(overrides, REF_TABLE, names, &names.reference);
        let cascade = if dialect.supports_cascade() {
            " on delete cascade"
        } else {
            ""
        };
        let create = format!(
            "create table ${{table}} (\
             xbrefid {int64} not null, \
             xbstoreid {int64} not null, \
             xbmeatid {int64}, \
             xbdurable {flag} default 'F' not null, \
             xbbytesize {int64}, \
             xbmetainfo {text}, \
             xbflag1 {v32} default '', \
             xbprio {int}, \
             xbmethodname {v32} default '', \
             primary key (xbrefid, xbstoreid), \
             foreign key (xbstoreid) references ${{storeTable}} (xbstoreid){cascade}, \
             foreign key (xbmeatid, xbstoreid) references ${{meatTable}} (xbmeatid, xbstoreid)); \
             create index ${{table}}stidx on ${{table}} (xbstoreid, xbdurable); \
             create index ${{table}}prioidx on ${{table}} (xbstoreid, xbprio)",
            int64 = dialect.int64_type(),
            int = dialect.int_type(),
            flag = dialect.bool_type(),
            v32 = dialect.varchar(32),
            text = dialect.text_type(),
        );
        let joined = |tail: &str| format!("{SELECT_JOINED}{tail}");
        Self {
            base: TableFactory::new(
                &names.reference,
                dialect,
                st.get("createStatement", &create),
                st.get("dropStatement", "drop table ${table}"),
            ),
            insert_sql: st.get(
                "insertStatement",
                &format!("insert into ${{table}} ({COLUMNS}) values (?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            ),
            get_sql: st.get("getStatement", &joined(" and r.xbrefid = ?")),
            exists_sql: st.get(
                "existsStatement",
                "select count(*) from ${table} where xbstoreid = ? and xbrefid = ?",
            ),
            get_first_sql: st.get("getFirstEntriesStatement", &joined(DELIVERY_ORDER)),
            get_by_priority_sql: st.get(
                "getEntriesByPriorityStatement",
                &joined(&format!(" and r.xbprio >= ? and r.xbprio <= ?{DELIVERY_ORDER}")),
            ),
            get_same_priority_sql: st.get(
                "getEntriesBySamePriorityStatement",
                &joined(&format!(
                    " and r.xbprio = (select max(xbprio) from ${{table}} where xbstoreid = ?){DELIVERY_ORDER}"
                )),
            ),
            get_start_at_sql: st.get(
                "getEntriesStartAtStatement",
                &joined(&format!(
                    " and (r.xbprio < ? or (r.xbprio = ? and r.xbrefid > ?)){DELIVERY_ORDER}"
                )),
            ),
            get_with_limit_sql: st.get(
                "getEntriesWithLimitStatement",
                &joined(&format!(
                    " and (r.xbprio > ? or (r.xbprio = ? and r.xbrefid < ?)){DELIVERY_ORDER}"
                )),
            ),
            get_with_limit_inclusive_sql: st.get(
                "getEntriesWithLimitInclusiveStatement",
                &joined(&format!(
                    " and (r.xbprio > ? or (r.xbprio = ? and r.xbrefid <= ?)){DELIVERY_ORDER}"
                )),
            ),
            get_lowest_sql: st.get("getLowestEntriesStatement", &joined(EVICTION_ORDER)),
            get_transients_sql: st.get(
                "getTransientsStatement",
                &joined(&format!(" and r.xbdurable = 'F'{DELIVERY_ORDER}")),
            ),
            get_in_prefix: st.get("getInStatement", &joined(" and r.xbrefid in (")),
            delete_sql: st.get(
                "deleteStatement",
                "delete from ${table} where xbstoreid = ? and xbrefid = ?",
            ),
            delete_in_prefix: st.get(
                "deleteInStatement",
                "delete from ${table} where xbstoreid = ? and xbrefid in (",
            ),
            delete_with_limit_sql: st.get(
                "deleteWithLimitStatement",
                "delete from ${table} where xbstoreid = ? \
                 and (xbprio > ? or (xbprio = ? and xbrefid < ?))",
            ),
            delete_with_limit_inclusive_sql: st.get(
                "deleteWithLimitInclusiveStatement",
                "delete from ${table} where xbstoreid = ? \
                 and (xbprio > ? or (xbprio = ? and xbrefid <= ?))",
            ),
            delete_all_sql: st.get(
                "deleteAllStatement",
                "delete from ${table} where xbstoreid = ?",
            ),
            count_sql: st.get(
                "getNumOfAllStatement",
                "select xbdurable, count(*), sum(xbbytesize) from ${table} \
                 where xbstoreid = ? group by xbdurable",
            ),
        }
    }

    pub fn table(&self) -> &TableFactory {
        &self.base
    }

    pub fn create(&self, conn: &Connection) -> DbqResult<bool> {
        self.base.create(conn)
    }

    pub fn drop(&self, conn: &Connection) -> DbqResult<bool> {
        self.base.drop(conn)
    }

    pub fn insert(&self, conn: &Connection, reference: &Ref) -> DbqResult<()> {
        let mut stmt = conn.prepare_cached(&self.insert_sql)?;
        stmt.execute(params![
            reference.id,
            reference.store_id,
            reference.meat_id,
            flag(reference.durable),
            reference.byte_size,
            reference.meta_info,
            reference.flag1,
            reference.prio,
            reference.method_name,
        ])?;
        Ok(())
    }

    pub fn get(&self, conn: &Connection, store_id: i64, ref_id: i64) -> DbqResult<Option<JoinedRow>> {
        let mut stmt = conn.prepare_cached(&self.get_sql)?;
        Ok(stmt
            .query_row(params![store_id, ref_id], read_joined)
            .optional()?)
    }

    pub fn exists(&self, conn: &Connection, store_id: i64, ref_id: i64) -> DbqResult<bool> {
        let mut stmt = conn.prepare_cached(&self.exists_sql)?;
        let n: i64 = stmt.query_row(params![store_id, ref_id], |r| r.get(0))?;
        Ok(n > 0)
    }

    /// Head of the queue in delivery order.
    ///
    /// Stops at `max_entries` (negative = unlimited) and at the first entry
    /// that would push the byte total over `max_bytes`; the first entry is
    /// always taken. `max_rows > 0` caps the rows read.
    pub fn get_first(
        &self,
        conn: &Connection,
        store: &Store,
        max_entries: i64,
        max_bytes: i64,
        max_rows: i64,
    ) -> DbqResult<Vec<JoinedRow>> {
        self.select_limited(conn, &self.get_first_sql, &[&store.id], max_entries, max_bytes, max_rows)
    }

    /// Delivery-ordered entries with `min_prio <= prio <= max_prio`.
    #[allow(clippy::too_many_arguments)]
    pub fn get_by_priority(
        &self,
        conn: &Connection,
        store: &Store,
        max_entries: i64,
        max_bytes: i64,
        min_prio: i32,
        max_prio: i32,
        max_rows: i64,
    ) -> DbqResult<Vec<JoinedRow>> {
        self.select_limited(
            conn,
            &self.get_by_priority_sql,
            &[&store.id, &min_prio, &max_prio],
            max_entries,
            max_bytes,
            max_rows,
        )
    }

    /// Delivery-ordered entries sharing the highest priority present.
    pub fn get_by_same_priority(
        &self,
        conn: &Connection,
        store: &Store,
        max_entries: i64,
        max_bytes: i64,
        max_rows: i64,
    ) -> DbqResult<Vec<JoinedRow>> {
        self.select_limited(
            conn,
            &self.get_same_priority_sql,
            &[&store.id, &store.id],
            max_entries,
            max_bytes,
            max_rows,
        )
    }

    /// Entries following `(prio, id)` in delivery order.
    #[allow(clippy::too_many_arguments)]
    pub fn get_start_at(
        &self,
        conn: &Connection,
        store: &Store,
        max_entries: i64,
        max_bytes: i64,
        prio: i32,
        id: i64,
        max_rows: i64,
    ) -> DbqResult<Vec<JoinedRow>> {
        self.select_limited(
            conn,
            &self.get_start_at_sql,
            &[&store.id, &prio, &prio, &id],
            max_entries,
            max_bytes,
            max_rows,
        )
    }

    /// Entries preceding `(prio, id)` in delivery order, optionally including it.
    pub fn get_with_limit(
        &self,
        conn: &Connection,
        store: &Store,
        prio: i32,
        id: i64,
        inclusive: bool,
    ) -> DbqResult<Vec<JoinedRow>> {
        let sql = if inclusive {
            &self.get_with_limit_inclusive_sql
        } else {
            &self.get_with_limit_sql
        };
        self.select_limited(conn, sql, &[&store.id, &prio, &prio, &id], -1, -1, -1)
    }

    pub fn get_transients(&self, conn: &Connection, store: &Store) -> DbqResult<Vec<JoinedRow>> {
        self.select_limited(conn, &self.get_transients_sql, &[&store.id], -1, -1, -1)
    }

    /// Walk the store in eviction order.
    ///
    /// Accumulates while both the entry and byte bounds hold and each row is
    /// below the cutoff, stopping at the first row violating either. The flag
    /// is true if the walk consumed every row of the store.
    pub fn get_lowest(
        &self,
        conn: &Connection,
        store: &Store,
        walk: &LowestWalk,
    ) -> DbqResult<(Vec<JoinedRow>, bool)> {
        let mut stmt = conn.prepare_cached(&self.get_lowest_sql)?;
        let mut rows = stmt.query(params![store.id])?;
        let mut taken = Vec::new();
        let mut bytes = 0i64;
        let exhausted = loop {
            let Some(row) = rows.next()? else {
                break true;
            };
            let count = taken.len() as i64;
            let within = (walk.max_entries < 0 || count < walk.max_entries)
                && (walk.max_bytes < 0 || bytes < walk.max_bytes);
            if !within {
                break false;
            }
            let joined = read_joined(row)?;
            if !walk.is_below_cutoff(joined.reference.prio, joined.reference.id) {
                break false;
            }
            bytes += joined.reference.byte_size;
            taken.push(joined);
        };
        Ok((taken, exhausted))
    }

    /// Refs with the given ids in delivery order; missing ids are skipped.
    pub fn get_in(
        &self,
        conn: &Connection,
        store: &Store,
        ids: &[i64],
        max_length: usize,
        max_ids: usize,
    ) -> DbqResult<Vec<JoinedRow>> {
        let mut found = Vec::with_capacity(ids.len());
        for sql in where_in_statements(&self.get_in_prefix, ids, max_length, max_ids) {
            let mut stmt = conn.prepare(&sql)?;
            let chunk = stmt
                .query_map(params![store.id], read_joined)?
                .collect::<Result<Vec<_>, _>>()?;
            found.extend(chunk);
        }
        found.sort_by(|a, b| {
            b.reference
                .prio
                .cmp(&a.reference.prio)
                .then(a.reference.id.cmp(&b.reference.id))
        });
        Ok(found)
    }

    pub fn delete(&self, conn: &Connection, store_id: i64, ref_id: i64) -> DbqResult<usize> {
        let mut stmt = conn.prepare_cached(&self.delete_sql)?;
        Ok(stmt.execute(params![store_id, ref_id])?)
    }

    /// Chunked delete. Run it inside a transaction.
    pub fn delete_in(
        &self,
        conn: &Connection,
        store_id: i64,
        ids: &[i64],
        max_length: usize,
        max_ids: usize,
    ) -> DbqResult<usize> {
        let mut deleted = 0;
        for sql in where_in_statements(&self.delete_in_prefix, ids, max_length, max_ids) {
            deleted += conn.execute(&sql, params![store_id])?;
        }
        Ok(deleted)
    }

    /// Ranged counterpart of [`get_with_limit`](Self::get_with_limit): one
    /// statement deletes every ref before `(prio, id)` in delivery order.
    /// Meats are left to the caller.
    pub fn delete_with_limit(
        &self,
        conn: &Connection,
        store_id: i64,
        prio: i32,
        id: i64,
        inclusive: bool,
    ) -> DbqResult<usize> {
        let sql = if inclusive {
            &self.delete_with_limit_inclusive_sql
        } else {
            &self.delete_with_limit_sql
        };
        let mut stmt = conn.prepare_cached(sql)?;
        Ok(stmt.execute(params![store_id, prio, prio, id])?)
    }

    pub fn delete_all(&self, conn: &Connection, store_id: i64) -> DbqResult<usize> {
        let mut stmt = conn.prepare_cached(&self.delete_all_sql)?;
        Ok(stmt.execute(params![store_id])?)
    }

    /// Entry and byte totals over the store's refs.
    pub fn count(&self, conn: &Connection, store_id: i64) -> DbqResult<EntryCount> {
        count_by_durability(conn, &self.count_sql, store_id)
    }

    fn select_limited(
        &self,
        conn: &Connection,
        sql: &str,
        args: &[&dyn ToSql],
        max_entries: i64,
        max_bytes: i64,
        max_rows: i64,
    ) -> DbqResult<Vec<JoinedRow>> {
        let mut stmt = conn.prepare_cached(sql)?;
        let mut rows = stmt.query(args)?;
        let mut found = Vec::new();
        let mut bytes = 0i64;
        while let Some(row) = rows.next()? {
            let count = found.len() as i64;
            if (max_entries >= 0 && count >= max_entries) || (max_rows > 0 && count >= max_rows) {
                break;
            }
            let joined = read_joined(row)?;
            let size = joined.reference.byte_size;
            if max_bytes >= 0 && count > 0 && bytes + size > max_bytes {
                break;
            }
            bytes += size;
            found.push(joined);
        }
        Ok(found)
    }
}

fn read_joined(row: &Row<'_>) -> rusqlite::Result<JoinedRow> {
    let durable: String = row.get(3)?;
    let meta_info: Option<String> = row.get(5)?;
    let flag1: Option<String> = row.get(6)?;
    let method_name: Option<String> = row.get(8)?;
    let reference = Ref {
        id: row.get(0)?,
        store_id: row.get(1)?,
        meat_id: row.get(2)?,
        durable: is_flag_set(&durable),
        byte_size: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
        meta_info: meta_info.unwrap_or_default(),
        flag1: flag1.unwrap_or_default(),
        prio: row.get::<_, Option<i32>>(7)?.unwrap_or(0),
        method_name: method_name.unwrap_or_default(),
    };
    let meat_id: Option<i64> = row.get(MEAT_OFFSET)?;
    let meat = match meat_id {
        Some(_) => Some(read_meat_at(row, MEAT_OFFSET)?),
        None => None,
    };
    Ok(JoinedRow { reference, meat })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccessorConfig;
    use crate::model::StorageId;
    use crate::schema::{MeatFactory, StoreFactory};

    struct Fixture {
        conn: Connection,
        meats: MeatFactory,
        refs: RefFactory,
        store: Store,
    }

    fn fixture() -> Fixture {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("pragma foreign_keys = on").unwrap();
        let config = AccessorConfig::default();
        let names = TableNames::resolve(&config);
        let stores = StoreFactory::new(Dialect::Sqlite, &names, &config.overrides);
        let meats = MeatFactory::new(Dialect::Sqlite, &names, &config.overrides);
        let refs = RefFactory::new(Dialect::Sqlite, &names, &config.overrides);
        stores.create(&conn).unwrap();
        meats.create(&conn).unwrap();
        refs.create(&conn).unwrap();
        let store = Store {
            id: 3,
            storage_id: StorageId::new("n", "callback", "joe"),
            ref_counted: true,
            flag1: String::new(),
        };
        stores.insert(&conn, &store).unwrap();
        Fixture {
            conn,
            meats,
            refs,
            store,
        }
    }

    impl Fixture {
        fn put(&self, id: i64, prio: i32, size: i64) {
            let meat = Meat {
                id,
                store_id: self.store.id,
                durable: true,
                ref_count: 1,
                byte_size: size,
                content: Some(vec![0; size as usize]),
                ..Meat::default()
            };
            self.meats.insert(&self.conn, &meat).unwrap();
            let reference = Ref {
                id,
                store_id: self.store.id,
                meat_id: Some(id),
                durable: id % 2 == 0,
                byte_size: size,
                prio,
                ..Ref::default()
            };
            self.refs.insert(&self.conn, &reference).unwrap();
        }

        fn ids(rows: &[JoinedRow]) -> Vec<i64> {
            rows.iter().map(|r| r.reference.id).collect()
        }
    }

    #[test]
    fn delivery_order_is_prio_desc_id_asc() {
        let f = fixture();
        for (id, prio) in [(100, 5), (101, 5), (102, 3), (103, 9)] {
            f.put(id, prio, 10);
        }
        let rows = f.refs.get_first(&f.conn, &f.store, 4, -1, -1).unwrap();
        assert_eq!(Fixture::ids(&rows), vec![103, 100, 101, 102]);
        assert!(rows.iter().all(|r| r.meat.is_some()));

        let by_prio = f.refs.get_by_priority(&f.conn, &f.store, -1, -1, 4, 6, -1).unwrap();
        assert_eq!(Fixture::ids(&by_prio), vec![100, 101]);

        let same = f.refs.get_by_same_priority(&f.conn, &f.store, -1, -1, -1).unwrap();
        assert_eq!(Fixture::ids(&same), vec![103]);

        let after = f.refs.get_start_at(&f.conn, &f.store, -1, -1, 5, 100, -1).unwrap();
        assert_eq!(Fixture::ids(&after), vec![101, 102]);

        let before = f.refs.get_with_limit(&f.conn, &f.store, 5, 101, false).unwrap();
        assert_eq!(Fixture::ids(&before), vec![103, 100]);
        let through = f.refs.get_with_limit(&f.conn, &f.store, 5, 101, true).unwrap();
        assert_eq!(Fixture::ids(&through), vec![103, 100, 101]);
    }

    #[test]
    fn lowest_walk_uses_eviction_order_and_cutoff() {
        let f = fixture();
        for (id, prio) in [(100, 5), (101, 5), (102, 3), (103, 9)] {
            f.put(id, prio, 10);
        }
        let (rows, exhausted) = f
            .refs
            .get_lowest(&f.conn, &f.store, &LowestWalk::unbounded(2, -1))
            .unwrap();
        assert_eq!(Fixture::ids(&rows), vec![102, 101]);
        assert!(!exhausted);

        let (rows, exhausted) = f
            .refs
            .get_lowest(&f.conn, &f.store, &LowestWalk::unbounded(-1, -1))
            .unwrap();
        assert_eq!(Fixture::ids(&rows), vec![102, 101, 100, 103]);
        assert!(exhausted);

        let cutoff = LowestWalk {
            max_entries: -1,
            max_bytes: -1,
            max_priority: 5,
            min_unique_id: 101,
        };
        let (rows, _) = f.refs.get_lowest(&f.conn, &f.store, &cutoff).unwrap();
        assert_eq!(Fixture::ids(&rows), vec![102]);

        let bytes = LowestWalk::unbounded(-1, 15);
        let (rows, _) = f.refs.get_lowest(&f.conn, &f.store, &bytes).unwrap();
        assert_eq!(Fixture::ids(&rows), vec![102, 101]);
    }

    #[test]
    fn ranged_delete_matches_the_limit_select() {
        let f = fixture();
        for (id, prio) in [(100, 5), (101, 5), (102, 3), (103, 9)] {
            f.put(id, prio, 10);
        }
        assert_eq!(f.refs.delete_with_limit(&f.conn, f.store.id, 5, 101, false).unwrap(), 2);
        let left = f.refs.get_first(&f.conn, &f.store, -1, -1, -1).unwrap();
        assert_eq!(Fixture::ids(&left), vec![101, 102]);
        assert_eq!(f.refs.delete_with_limit(&f.conn, f.store.id, 5, 101, true).unwrap(), 1);
        assert!(f.refs.exists(&f.conn, f.store.id, 102).unwrap());
    }

    #[test]
    fn cutoff_is_lexicographic_on_prio_then_id() {
        let walk = LowestWalk {
            max_entries: -1,
            max_bytes: -1,
            max_priority: 5,
            min_unique_id: 101,
        };
        assert!(walk.is_below_cutoff(4, 999));
        assert!(walk.is_below_cutoff(5, 100));
        assert!(!walk.is_below_cutoff(5, 101));
        assert!(!walk.is_below_cutoff(5, 102));
        assert!(!walk.is_below_cutoff(6, 1));
    }

    #[test]
    fn refs_keep_their_meat_alive() {
        let f = fixture();
        f.put(1, 5, 4);
        assert!(f.refs.exists(&f.conn, f.store.id, 1).unwrap());
        assert!(f.meats.delete(&f.conn, f.store.id, 1).is_err());
        assert_eq!(f.refs.delete(&f.conn, f.store.id, 1).unwrap(), 1);
        assert_eq!(f.meats.delete(&f.conn, f.store.id, 1).unwrap(), 1);
    }

    #[test]
    fn counts_and_chunked_deletes() {
        let f = fixture();
        for id in 1..=12 {
            f.put(id, 5, 10);
        }
        let count = f.refs.count(&f.conn, f.store.id).unwrap();
        assert_eq!(count.num_of_entries, 12);
        assert_eq!(count.num_of_bytes, 120);
        assert_eq!(count.num_of_persistent_entries, 6);

        let ids: Vec<i64> = (1..=9).collect();
        assert_eq!(f.refs.get_in(&f.conn, &f.store, &ids, 2048, 2).unwrap().len(), 9);
        assert_eq!(f.refs.delete_in(&f.conn, f.store.id, &ids, 2048, 2).unwrap(), 9);
        assert!(f.refs.exists(&f.conn, f.store.id, 10).unwrap());
        assert!(!f.refs.exists(&f.conn, f.store.id, 1).unwrap());
        assert_eq!(Fixture::ids(&f.refs.get_transients(&f.conn, &f.store).unwrap()), vec![11]);
        assert_eq!(f.refs.delete_all(&f.conn, f.store.id).unwrap(), 3);
    }
}
