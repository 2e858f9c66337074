//! Meat table: payload rows, reference counted in ref-counted stores.

use super::{
    Dialect, MEAT_TABLE, TableFactory, TableNames, TableStatements, count_by_durability, flag,
    is_flag_set, where_in_statements,
};
use crate::config::Properties;
use crate::error::DbqResult;
use crate::model::{EntryCount, Meat, Store};
use rusqlite::{Connection, OptionalExtension, Row, params};

const COLUMNS: &str = "xbmeatid, xbstoreid, xbdurable, xbrefcount, xbbytesize, xbdatatype, \
                       xbflag1, xbmsgqos, xbmsgcont, xbmsgkey";

#[derive(Debug, Clone)]
pub struct MeatFactory {
    base: TableFactory,
    insert_sql: String,
    update_sql: String,
    update_ref_count_sql: String,
    increment_ref_count_sql: String,
    get_sql: String,
    get_first_sql: String,
    get_in_prefix: String,
    delete_sql: String,
    delete_in_prefix: String,
    delete_unreferenced_prefix: String,
    delete_all_sql: String,
    delete_transients_sql: String,
    count_sql: String,
}

impl MeatFactory {
    pub fn new(dialect: Dialect, names: &TableNames, overrides: &Properties) -> Self {
        let st = TableStatements::new(overrides, MEAT_TABLE, names, &names.meat);
        let cascade = if dialect.supports_cascade() {
            " on delete cascade"
        } else {
            ""
        };
        let create = format!(
            "create table ${{table}} (\
             xbmeatid {int64} not null, \
             xbstoreid {int64} not null, \
             xbdurable {flag} default 'F' not null, \
             xbrefcount {int} default 0, \
             xbbytesize {int64}, \
             xbdatatype {v64} default '' not null, \
             xbflag1 {v32} default '', \
             xbmsgqos {text}, \
             xbmsgcont {blob}, \
             xbmsgkey {text}, \
             primary key (xbmeatid, xbstoreid), \
             foreign key (xbstoreid) references ${{storeTable}} (xbstoreid){cascade})",
            int64 = dialect.int64_type(),
            int = dialect.int_type(),
            flag = dialect.bool_type(),
            v64 = dialect.varchar(64),
            v32 = dialect.varchar(32),
            text = dialect.text_type(),
            blob = dialect.blob_type(),
        );
        Self {
            base: TableFactory::new(
                &names.meat,
                dialect,
                st.get("createStatement", &create),
                st.get("dropStatement", "drop table ${table}"),
            ),
            insert_sql: st.get(
                "insertStatement",
                &format!("insert into ${{table}} ({COLUMNS}) values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            ),
            update_sql: st.get(
                "updateStatement",
                "update ${table} set xbdurable = ?, xbrefcount = ?, xbbytesize = ?, \
                 xbdatatype = ?, xbflag1 = ?, xbmsgqos = ?, xbmsgcont = ?, xbmsgkey = ? \
                 where xbmeatid = ? and xbstoreid = ?",
            ),
            update_ref_count_sql: st.get(
                "updateRefCounterStatement",
                "update ${table} set xbrefcount = ? where xbmeatid = ? and xbstoreid = ?",
            ),
            increment_ref_count_sql: st.get(
                "incrementRefCounterStatement",
                "update ${table} set xbrefcount = xbrefcount + ? where xbmeatid = ? and xbstoreid = ?",
            ),
            get_sql: st.get(
                "getStatement",
                &format!("select {COLUMNS} from ${{table}} where xbmeatid = ? and xbstoreid = ?"),
            ),
            get_first_sql: st.get(
                "getFirstMeatsStatement",
                &format!("select {COLUMNS} from ${{table}} where xbstoreid = ? order by xbmeatid asc"),
            ),
            get_in_prefix: st.get(
                "getInStatement",
                &format!("select {COLUMNS} from ${{table}} where xbstoreid = ? and xbmeatid in ("),
            ),
            delete_sql: st.get(
                "deleteStatement",
                "delete from ${table} where xbmeatid = ? and xbstoreid = ?",
            ),
            delete_in_prefix: st.get(
                "deleteInStatement",
                "delete from ${table} where xbstoreid = ? and xbmeatid in (",
            ),
            delete_unreferenced_prefix: st.get(
                "deleteUnreferencedStatement",
                "delete from ${table} where xbstoreid = ? and xbrefcount <= 0 and xbmeatid in (",
            ),
            delete_all_sql: st.get(
                "deleteAllStatement",
                "delete from ${table} where xbstoreid = ?",
            ),
            delete_transients_sql: st.get(
                "deleteTransientsStatement",
                "delete from ${table} where xbstoreid = ? and xbdurable = 'F'",
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

    pub fn insert(&self, conn: &Connection, meat: &Meat) -> DbqResult<()> {
        let mut stmt = conn.prepare_cached(&self.insert_sql)?;
        stmt.execute(params![
            meat.id,
            meat.store_id,
            flag(meat.durable),
            meat.ref_count,
            meat.byte_size,
            meat.data_type,
            meat.flag1,
            meat.qos,
            meat.content,
            meat.key,
        ])?;
        Ok(())
    }

    /// Rewrite every mutable column. Returns true if the row exists.
    pub fn update(&self, conn: &Connection, meat: &Meat) -> DbqResult<bool> {
        let mut stmt = conn.prepare_cached(&self.update_sql)?;
        let changed = stmt.execute(params![
            flag(meat.durable),
            meat.ref_count,
            meat.byte_size,
            meat.data_type,
            meat.flag1,
            meat.qos,
            meat.content,
            meat.key,
            meat.id,
            meat.store_id,
        ])?;
        Ok(changed > 0)
    }

    /// Overwrite the reference counter only.
    pub fn update_ref_count(&self, conn: &Connection, meat: &Meat) -> DbqResult<bool> {
        let mut stmt = conn.prepare_cached(&self.update_ref_count_sql)?;
        Ok(stmt.execute(params![meat.ref_count, meat.id, meat.store_id])? > 0)
    }

    /// Atomically add `delta` to the counter. Returns false if the row is absent.
    pub fn increment_ref_count(
        &self,
        conn: &Connection,
        store_id: i64,
        meat_id: i64,
        delta: i64,
    ) -> DbqResult<bool> {
        let mut stmt = conn.prepare_cached(&self.increment_ref_count_sql)?;
        Ok(stmt.execute(params![delta, meat_id, store_id])? > 0)
    }

    pub fn get(&self, conn: &Connection, store_id: i64, meat_id: i64) -> DbqResult<Option<Meat>> {
        let mut stmt = conn.prepare_cached(&self.get_sql)?;
        Ok(stmt
            .query_row(params![meat_id, store_id], read_meat)
            .optional()?)
    }

    pub fn exists(&self, conn: &Connection, store_id: i64, meat_id: i64) -> DbqResult<bool> {
        Ok(self.get(conn, store_id, meat_id)?.is_some())
    }

    /// Meats of a meat-only store in id order.
    ///
    /// Stops at `max_entries` (negative = unlimited) and at the first meat that
    /// would push the byte total over `max_bytes`; the first meat is always
    /// taken. `max_rows > 0` caps the rows read.
    pub fn get_first(
        &self,
        conn: &Connection,
        store: &Store,
        max_entries: i64,
        max_bytes: i64,
        max_rows: i64,
    ) -> DbqResult<Vec<Meat>> {
        let mut stmt = conn.prepare_cached(&self.get_first_sql)?;
        let mut rows = stmt.query(params![store.id])?;
        let mut meats = Vec::new();
        let mut bytes = 0i64;
        while let Some(row) = rows.next()? {
            if max_entries >= 0 && meats.len() as i64 >= max_entries {
                break;
            }
            if max_rows > 0 && meats.len() as i64 >= max_rows {
                break;
            }
            let meat = read_meat(row)?;
            if max_bytes >= 0 && !meats.is_empty() && bytes + meat.byte_size > max_bytes {
                break;
            }
            bytes += meat.byte_size;
            meats.push(meat);
        }
        Ok(meats)
    }

    /// Meats with the given ids, in id order; missing ids are skipped.
    pub fn get_in(
        &self,
        conn: &Connection,
        store: &Store,
        ids: &[i64],
        max_length: usize,
        max_ids: usize,
    ) -> DbqResult<Vec<Meat>> {
        let mut meats = Vec::with_capacity(ids.len());
        for sql in where_in_statements(&self.get_in_prefix, ids, max_length, max_ids) {
            let mut stmt = conn.prepare(&sql)?;
            let found = stmt
                .query_map(params![store.id], read_meat)?
                .collect::<Result<Vec<_>, _>>()?;
            meats.extend(found);
        }
        meats.sort_by_key(|m| m.id);
        Ok(meats)
    }

    pub fn delete(&self, conn: &Connection, store_id: i64, meat_id: i64) -> DbqResult<usize> {
        let mut stmt = conn.prepare_cached(&self.delete_sql)?;
        Ok(stmt.execute(params![meat_id, store_id])?)
    }

    /// Chunked delete of the given meats. Run it inside a transaction.
    pub fn delete_in(
        &self,
        conn: &Connection,
        store_id: i64,
        ids: &[i64],
        max_length: usize,
        max_ids: usize,
    ) -> DbqResult<usize> {
        self.run_chunked(conn, &self.delete_in_prefix, store_id, ids, max_length, max_ids)
    }

    /// Delete those of the given meats whose counter dropped to zero.
    pub fn delete_unreferenced(
        &self,
        conn: &Connection,
        store_id: i64,
        ids: &[i64],
        max_length: usize,
        max_ids: usize,
    ) -> DbqResult<usize> {
        self.run_chunked(
            conn,
            &self.delete_unreferenced_prefix,
            store_id,
            ids,
            max_length,
            max_ids,
        )
    }

    fn run_chunked(
        &self,
        conn: &Connection,
        prefix: &str,
        store_id: i64,
        ids: &[i64],
        max_length: usize,
        max_ids: usize,
    ) -> DbqResult<usize> {
        let mut deleted = 0;
        for sql in where_in_statements(prefix, ids, max_length, max_ids) {
            deleted += conn.execute(&sql, params![store_id])?;
        }
        Ok(deleted)
    }

    pub fn delete_all(&self, conn: &Connection, store_id: i64) -> DbqResult<usize> {
        let mut stmt = conn.prepare_cached(&self.delete_all_sql)?;
        Ok(stmt.execute(params![store_id])?)
    }

    pub fn delete_transients(&self, conn: &Connection, store_id: i64) -> DbqResult<usize> {
        let mut stmt = conn.prepare_cached(&self.delete_transients_sql)?;
        Ok(stmt.execute(params![store_id])?)
    }

    /// Entry and byte totals over the store's meats.
    pub fn count(&self, conn: &Connection, store_id: i64) -> DbqResult<EntryCount> {
        count_by_durability(conn, &self.count_sql, store_id)
    }
}

/// Map a row selected with the meat column list, starting at `offset`.
pub(crate) fn read_meat_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<Meat> {
    let durable: String = row.get(offset + 2)?;
    let data_type: Option<String> = row.get(offset + 5)?;
    let flag1: Option<String> = row.get(offset + 6)?;
    Ok(Meat {
        id: row.get(offset)?,
        store_id: row.get(offset + 1)?,
        durable: is_flag_set(&durable),
        ref_count: row.get::<_, Option<i64>>(offset + 3)?.unwrap_or(0),
        byte_size: row.get::<_, Option<i64>>(offset + 4)?.unwrap_or(0),
        data_type: data_type.unwrap_or_default(),
        flag1: flag1.unwrap_or_default(),
        qos: row.get(offset + 7)?,
        content: row.get(offset + 8)?,
        key: row.get(offset + 9)?,
    })
}

fn read_meat(row: &Row<'_>) -> rusqlite::Result<Meat> {
    read_meat_at(row, 0)
}
