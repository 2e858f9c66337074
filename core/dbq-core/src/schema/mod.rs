//! Schema: DDL and CRUD primitives of the Store, Meat and Ref tables.
//!
//! One factory per table. Each factory owns its DDL, checks table existence
//! against the catalog before creating or dropping, and runs parameterized
//! statements on a borrowed connection. Statement templates can be replaced
//! through the [`Properties`] override layer:
//!
//! ```text
//! xbref.getFirstEntriesStatement = select ... from ${table} r ...
//! table.xbref                    = my_refs
//! ```
//!
//! Factories never swallow SQL errors; every failure propagates to the
//! accessor, which classifies it.

mod dialect;
mod meat;
mod refs;
mod store;

pub use dialect::Dialect;
pub use meat::MeatFactory;
pub use refs::{JoinedRow, LowestWalk, RefFactory};
pub use store::StoreFactory;

use crate::config::{AccessorConfig, Properties};
use crate::error::DbqResult;
use crate::model::EntryCount;
use rusqlite::{Connection, params};
use tracing::info;

pub const STORE_TABLE: &str = "xbstore";
pub const MEAT_TABLE: &str = "xbmeat";
pub const REF_TABLE: &str = "xbref";

// ════════════════════════════════════════════
// Table names and statement templates
// ════════════════════════════════════════════

/// Physical table names after prefix and overrides are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub store: String,
    pub meat: String,
    pub reference: String,
}

impl TableNames {
    /// `table.<default>` overrides win over `<prefix><default>`.
    pub fn resolve(config: &AccessorConfig) -> Self {
        let name = |default: &str| {
            config
                .overrides
                .get(&format!("table.{default}"))
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}{}", config.table_prefix, default))
        };
        Self {
            store: name(STORE_TABLE),
            meat: name(MEAT_TABLE),
            reference: name(REF_TABLE),
        }
    }
}

/// Resolves one table's statement templates.
///
/// Lookup key is `<default table name>.<statement name>`; `${table}`,
/// `${storeTable}`, `${meatTable}` and `${refTable}` are substituted.
pub struct TableStatements<'a> {
    overrides: &'a Properties,
    table_key: &'static str,
    names: &'a TableNames,
    table: &'a str,
}

impl<'a> TableStatements<'a> {
    pub fn new(
        overrides: &'a Properties,
        table_key: &'static str,
        names: &'a TableNames,
        table: &'a str,
    ) -> Self {
        Self {
            overrides,
            table_key,
            names,
            table,
        }
    }

    pub fn get(&self, name: &str, default_template: &str) -> String {
        let key = format!("{}.{}", self.table_key, name);
        let template = self.overrides.get(&key).unwrap_or(default_template);
        template
            .replace("${table}", self.table)
            .replace("${storeTable}", &self.names.store)
            .replace("${meatTable}", &self.names.meat)
            .replace("${refTable}", &self.names.reference)
    }
}

// ════════════════════════════════════════════
// Shared table plumbing
// ════════════════════════════════════════════

/// DDL half of a factory: existence check, create and drop.
#[derive(Debug, Clone)]
pub struct TableFactory {
    table: String,
    dialect: Dialect,
    create_sql: String,
    drop_sql: String,
}

impl TableFactory {
    pub fn new(table: &str, dialect: Dialect, create_sql: String, drop_sql: String) -> Self {
        Self {
            table: table.to_string(),
            dialect,
            create_sql,
            drop_sql,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Case-insensitive match against the connection's table listing.
    pub fn exists(&self, conn: &Connection) -> DbqResult<bool> {
        let mut stmt = conn.prepare(self.dialect.table_listing_sql())?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            if name.trim().eq_ignore_ascii_case(&self.table) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns false if the table already exists.
    pub fn create(&self, conn: &Connection) -> DbqResult<bool> {
        if self.exists(conn)? {
            return Ok(false);
        }
        for ddl in split_statements(&self.create_sql) {
            conn.execute_batch(ddl)?;
        }
        info!(table = %self.table, dialect = %self.dialect, "created table");
        Ok(true)
    }

    /// Returns false if the table does not exist.
    pub fn drop(&self, conn: &Connection) -> DbqResult<bool> {
        if !self.exists(conn)? {
            return Ok(false);
        }
        conn.execute_batch(&self.drop_sql)?;
        info!(table = %self.table, "dropped table");
        Ok(true)
    }
}

fn split_statements(sql: &str) -> impl Iterator<Item = &str> {
    sql.split(';').map(str::trim).filter(|s| !s.is_empty())
}

/// `T`/`F` encoding of flag columns.
pub(crate) fn flag(value: bool) -> &'static str {
    if value { "T" } else { "F" }
}

pub(crate) fn is_flag_set(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("t")
}

/// Run a `select xbdurable, count(*), sum(xbbytesize) ... group by xbdurable`.
pub(crate) fn count_by_durability(
    conn: &Connection,
    sql: &str,
    store_id: i64,
) -> DbqResult<EntryCount> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query(params![store_id])?;
    let mut count = EntryCount::ZERO;
    while let Some(row) = rows.next()? {
        let durable: String = row.get(0)?;
        let entries: i64 = row.get(1)?;
        let bytes: Option<i64> = row.get(2)?;
        let bytes = bytes.unwrap_or(0);
        count.num_of_entries += entries;
        count.num_of_bytes += bytes;
        if is_flag_set(&durable) {
            count.num_of_persistent_entries += entries;
            count.num_of_persistent_bytes += bytes;
        }
    }
    Ok(count)
}

// ════════════════════════════════════════════
// Chunked `where id in (...)`
// ════════════════════════════════════════════

/// Split an id list into `prefix + "id,id,..." + ")"` statements.
///
/// Each statement holds at most `max_ids` ids and is at most `max_length`
/// bytes long, except that a statement always holds at least one id. Chunks
/// are a statement-length workaround only; callers run all of them in one
/// transaction.
pub fn where_in_statements(
    prefix: &str,
    ids: &[i64],
    max_length: usize,
    max_ids: usize,
) -> Vec<String> {
    let max_ids = max_ids.max(1);
    let mut statements = Vec::new();
    let mut current = String::with_capacity(max_length.min(64 * 1024));
    let mut in_current = 0usize;

    for id in ids {
        let token = id.to_string();
        let needed = token.len() + 1 + usize::from(in_current > 0);
        if in_current > 0 && (in_current >= max_ids || current.len() + needed > max_length) {
            current.push(')');
            statements.push(std::mem::take(&mut current));
            in_current = 0;
        }
        if in_current == 0 {
            current.push_str(prefix);
        } else {
            current.push(',');
        }
        current.push_str(&token);
        in_current += 1;
    }
    if in_current > 0 {
        current.push(')');
        statements.push(current);
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PREFIX: &str = "delete from xbref where xbstoreid = ? and xbrefid in (";

    fn ids_of(statements: &[String]) -> Vec<i64> {
        statements
            .iter()
            .flat_map(|s| {
                let inner = s
                    .strip_prefix(PREFIX)
                    .and_then(|s| s.strip_suffix(')'))
                    .unwrap();
                inner
                    .split(',')
                    .map(|t| t.parse::<i64>().unwrap())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[test]
    fn chunks_by_id_count() {
        let ids: Vec<i64> = (1..=7).collect();
        let statements = where_in_statements(PREFIX, &ids, 10_000, 3);
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0], format!("{PREFIX}1,2,3)"));
        assert_eq!(statements[2], format!("{PREFIX}7)"));
    }

    #[test]
    fn chunks_by_length() {
        let ids = vec![1_000_000_000_000_000_001, 1_000_000_000_000_000_002];
        let statements = where_in_statements(PREFIX, &ids, PREFIX.len() + 25, 50);
        assert_eq!(statements.len(), 2);
        assert!(where_in_statements(PREFIX, &[], 100, 10).is_empty());
    }

    #[test]
    fn oversized_single_id_still_emitted() {
        let statements = where_in_statements(PREFIX, &[12345], 10, 10);
        assert_eq!(statements, vec![format!("{PREFIX}12345)")]);
    }

    #[test]
    fn table_names_honor_prefix_and_overrides() {
        let mut config = AccessorConfig {
            table_prefix: "test_".into(),
            ..AccessorConfig::default()
        };
        config.overrides.set("table.xbref", "my_refs");
        let names = TableNames::resolve(&config);
        assert_eq!(names.store, "test_xbstore");
        assert_eq!(names.reference, "my_refs");

        let statements = TableStatements::new(&config.overrides, REF_TABLE, &names, &names.reference);
        assert_eq!(
            statements.get("deleteAll", "delete from ${table} where xbstoreid = ?"),
            "delete from my_refs where xbstoreid = ?"
        );
        config.overrides.set("xbref.deleteAll", "delete from ${table} -- custom");
        let statements = TableStatements::new(&config.overrides, REF_TABLE, &names, &names.reference);
        assert_eq!(statements.get("deleteAll", "ignored"), "delete from my_refs -- custom");
    }

    proptest! {
        #[test]
        fn chunking_keeps_every_id_exactly_once(
            ids in proptest::collection::vec(any::<i64>(), 0..300),
            max_ids in 1usize..40,
            extra_len in 21usize..400,
        ) {
            let max_length = PREFIX.len() + extra_len;
            let statements = where_in_statements(PREFIX, &ids, max_length, max_ids);
            prop_assert_eq!(ids_of(&statements), ids);
            for s in &statements {
                prop_assert!(s.len() <= max_length + 1);
                prop_assert!(s.matches(',').count() < max_ids);
            }
        }
    }
}
