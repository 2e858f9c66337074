//! Connection pool: lends, returns and discards database connections.
//!
//! The engine depends only on the [`ConnectionPool`] trait. [`SqlitePool`] is
//! the implementation shipped with the crate.

mod sqlite;

pub use sqlite::SqlitePool;

use crate::error::DbqResult;
use crate::schema::Dialect;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pooled database connections.
///
/// # Contract
///
/// - `reserve`: blocks until a connection is available, bounded by the pool's
///   own timeout; fails with `DbqError::Pool` on exhaustion or after shutdown.
/// - `release`: returns a healthy connection for reuse.
/// - `erase`: discards a presumed-broken connection and frees its slot.
/// - `url`: the connection URL; [`ConnectionPool::dialect`] is derived from it.
pub trait ConnectionPool: Send + Sync {
    fn reserve(&self) -> DbqResult<Connection>;

    fn release(&self, conn: Connection);

    fn erase(&self, conn: Connection);

    fn url(&self) -> &str;

    fn dialect(&self) -> Dialect {
        Dialect::from_url(self.url())
    }

    /// Close idle connections and refuse further reservations.
    fn shutdown(&self);
}

/// Sizing and timeouts of a [`SqlitePool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    pub max_connections: usize,
    /// How long `reserve` waits for a free connection.
    #[serde(with = "millis")]
    pub reserve_timeout: Duration,
    /// SQLite busy handler timeout for lock contention.
    #[serde(with = "millis")]
    pub busy_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            reserve_timeout: Duration::from_secs(10),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
