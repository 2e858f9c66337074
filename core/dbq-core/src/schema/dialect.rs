//! SQL dialects: selected once from the connection URL.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported database vendors.
///
/// Each variant supplies the column types used by the DDL templates, the
/// liveness probe, the catalog query backing the existence check and the
/// connection pragmas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    Postgres,
    Oracle,
    SqlServer,
    Db2,
    Hsqldb,
    MySql,
    Sqlite,
    Firebird,
    Unknown,
}

impl Dialect {
    /// Detect the dialect from a URL such as `jdbc:postgresql://host/db`,
    /// `sqlite:/var/lib/dbq/queue.db` or a bare `*.db` path.
    pub fn from_url(url: &str) -> Self {
        let url = url.to_ascii_lowercase();
        let has = |needle: &str| url.contains(needle);
        if has("postgres") {
            Dialect::Postgres
        } else if has("oracle") {
            Dialect::Oracle
        } else if has("sqlserver") || has("jtds") || has("mssql") {
            Dialect::SqlServer
        } else if has("db2") {
            Dialect::Db2
        } else if has("hsqldb") {
            Dialect::Hsqldb
        } else if has("mysql") || has("mariadb") {
            Dialect::MySql
        } else if has("sqlite") || url.ends_with(".db") || url.ends_with(".sqlite") {
            Dialect::Sqlite
        } else if has("firebird") || has("interbase") {
            Dialect::Firebird
        } else {
            Dialect::Unknown
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Oracle => "oracle",
            Dialect::SqlServer => "sqlserver",
            Dialect::Db2 => "db2",
            Dialect::Hsqldb => "hsqldb",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
            Dialect::Firebird => "firebird",
            Dialect::Unknown => "unknown",
        }
    }

    pub fn int64_type(&self) -> &'static str {
        match self {
            Dialect::Oracle => "number(19)",
            _ => "bigint",
        }
    }

    pub fn int_type(&self) -> &'static str {
        match self {
            Dialect::Oracle => "number(10)",
            _ => "integer",
        }
    }

    pub fn varchar(&self, len: u32) -> String {
        match self {
            Dialect::Oracle => format!("varchar2({len})"),
            _ => format!("varchar({len})"),
        }
    }

    pub fn blob_type(&self) -> &'static str {
        match self {
            Dialect::Postgres => "bytea",
            Dialect::SqlServer => "varbinary(max)",
            Dialect::Hsqldb => "longvarbinary",
            Dialect::MySql => "longblob",
            _ => "blob",
        }
    }

    pub fn text_type(&self) -> &'static str {
        match self {
            Dialect::Oracle | Dialect::Db2 => "clob",
            Dialect::SqlServer => "varchar(max)",
            Dialect::Hsqldb => "longvarchar",
            Dialect::MySql => "mediumtext",
            Dialect::Firebird => "blob sub_type text",
            _ => "text",
        }
    }

    /// `T`/`F` flag column.
    pub fn bool_type(&self) -> &'static str {
        "char(1)"
    }

    pub fn supports_cascade(&self) -> bool {
        !matches!(self, Dialect::Unknown)
    }

    /// Cheap liveness probe.
    pub fn ping_sql(&self) -> &'static str {
        match self {
            Dialect::Oracle => "select 1 from dual",
            Dialect::Db2 => "select 1 from sysibm.sysdummy1",
            Dialect::Firebird => "select 1 from rdb$database",
            Dialect::Hsqldb => "select 1 from information_schema.system_users",
            _ => "select 1",
        }
    }

    /// Catalog query whose first column lists the table names.
    pub fn table_listing_sql(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "select name from sqlite_master where type = 'table'",
            Dialect::Postgres => "select tablename from pg_catalog.pg_tables",
            Dialect::Oracle => "select table_name from user_tables",
            Dialect::Db2 => "select tabname from syscat.tables",
            Dialect::Firebird => "select rdb$relation_name from rdb$relations",
            _ => "select table_name from information_schema.tables",
        }
    }

    /// Hard statement-length limit of the vendor, if it has one.
    pub fn max_statement_length(&self) -> Option<usize> {
        match self {
            Dialect::Firebird => Some(65_535),
            Dialect::Db2 => Some(2_097_152),
            _ => None,
        }
    }

    /// Pragmas applied to every new connection.
    pub fn pragmas(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Dialect::Sqlite => &[
                ("journal_mode", "WAL"),
                ("foreign_keys", "ON"),
                ("synchronous", "NORMAL"),
            ],
            _ => &[],
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
