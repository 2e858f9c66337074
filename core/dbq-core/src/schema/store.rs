//! Store table: one row per logical queue, unique on (node, type, postfix).

use super::{Dialect, STORE_TABLE, TableFactory, TableNames, TableStatements, flag, is_flag_set};
use crate::config::Properties;
use crate::error::DbqResult;
use crate::model::{StorageId, Store};
use rusqlite::{Connection, OptionalExtension, Row, params};

const COLUMNS: &str = "xbstoreid, xbnode, xbtype, xbpostfix, xbrefcounted, xbflag1";

#[derive(Debug, Clone)]
pub struct StoreFactory {
    base: TableFactory,
    insert_sql: String,
    get_sql: String,
    get_by_name_sql: String,
    get_all_sql: String,
    delete_sql: String,
    ping_sql: String,
}

impl StoreFactory {
    pub fn new(dialect: Dialect, names: &TableNames, overrides: &Properties) -> Self {
        let st = TableStatements::new(overrides, STORE_TABLE, names, &names.store);
        let create = format!(
            "create table ${{table}} (\
             xbstoreid {int64} primary key, \
             xbnode {v256} not null, \
             xbtype {v32} not null, \
             xbpostfix {v256} not null, \
             xbrefcounted {flag} default 'F' not null, \
             xbflag1 {v32} default ''); \
             create unique index ${{table}}idx on ${{table}} (xbnode, xbtype, xbpostfix)",
            int64 = dialect.int64_type(),
            v256 = dialect.varchar(256),
            v32 = dialect.varchar(32),
            flag = dialect.bool_type(),
        );
        Self {
            base: TableFactory::new(
                &names.store,
                dialect,
                st.get("createStatement", &create),
                st.get("dropStatement", "drop table ${table}"),
            ),
            insert_sql: st.get(
                "insertStatement",
                &format!("insert into ${{table}} ({COLUMNS}) values (?, ?, ?, ?, ?, ?)"),
            ),
            get_sql: st.get(
                "getStatement",
                &format!("select {COLUMNS} from ${{table}} where xbstoreid = ?"),
            ),
            get_by_name_sql: st.get(
                "getByNameStatement",
                &format!(
                    "select {COLUMNS} from ${{table}} where xbnode = ? and xbtype = ? and xbpostfix = ?"
                ),
            ),
            get_all_sql: st.get(
                "getAllStatement",
                &format!("select {COLUMNS} from ${{table}}"),
            ),
            delete_sql: st.get(
                "deleteStatement",
                "delete from ${table} where xbstoreid = ?",
            ),
            ping_sql: st.get("pingStatement", dialect.ping_sql()),
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

    pub fn insert(&self, conn: &Connection, store: &Store) -> DbqResult<()> {
        let mut stmt = conn.prepare_cached(&self.insert_sql)?;
        stmt.execute(params![
            store.id,
            store.storage_id.node,
            store.storage_id.store_type,
            store.storage_id.postfix,
            flag(store.ref_counted),
            store.flag1,
        ])?;
        Ok(())
    }

    pub fn get(&self, conn: &Connection, id: i64) -> DbqResult<Option<Store>> {
        let mut stmt = conn.prepare_cached(&self.get_sql)?;
        Ok(stmt.query_row(params![id], read_store).optional()?)
    }

    pub fn get_by_name(&self, conn: &Connection, storage_id: &StorageId) -> DbqResult<Option<Store>> {
        let mut stmt = conn.prepare_cached(&self.get_by_name_sql)?;
        Ok(stmt
            .query_row(
                params![storage_id.node, storage_id.store_type, storage_id.postfix],
                read_store,
            )
            .optional()?)
    }

    pub fn get_all(&self, conn: &Connection) -> DbqResult<Vec<Store>> {
        let mut stmt = conn.prepare_cached(&self.get_all_sql)?;
        let stores = stmt
            .query_map([], read_store)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stores)
    }

    /// Returns true if a row was deleted.
    pub fn delete(&self, conn: &Connection, id: i64) -> DbqResult<bool> {
        let mut stmt = conn.prepare_cached(&self.delete_sql)?;
        Ok(stmt.execute(params![id])? > 0)
    }

    /// Cheap liveness probe; any error means the connection is unusable.
    pub fn ping(&self, conn: &Connection) -> DbqResult<()> {
        conn.query_row(&self.ping_sql, [], |_| Ok(()))?;
        Ok(())
    }
}

fn read_store(row: &Row<'_>) -> rusqlite::Result<Store> {
    let ref_counted: String = row.get(4)?;
    let flag1: Option<String> = row.get(5)?;
    Ok(Store {
        id: row.get(0)?,
        storage_id: StorageId {
            node: row.get(1)?,
            store_type: row.get(2)?,
            postfix: row.get(3)?,
        },
        ref_counted: is_flag_set(&ref_counted),
        flag1: flag1.unwrap_or_default(),
    })
}
