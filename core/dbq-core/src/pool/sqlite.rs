//! SQLite connection pool: blocking, lazily grown up to `max_connections`.

use super::{ConnectionPool, PoolConfig};
use crate::error::{DbqError, DbqResult};
use crate::schema::Dialect;
use parking_lot::{Condvar, Mutex};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

struct PoolState {
    idle: Vec<Connection>,
    /// Connections currently alive, idle or lent out
    open: usize,
    shut_down: bool,
}

/// Pool of connections to one SQLite database file.
pub struct SqlitePool {
    path: PathBuf,
    url: String,
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl SqlitePool {
    /// Open (or create) the database file and verify it with one connection.
    #[instrument(skip(path, config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: PoolConfig) -> DbqResult<Self> {
        if config.max_connections == 0 {
            return Err(DbqError::Config("maxConnections must be > 0".into()));
        }
        let path = path.as_ref().to_path_buf();
        let url = format!("sqlite:{}", path.display());
        let pool = Self {
            path,
            url,
            config,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
                shut_down: false,
            }),
            available: Condvar::new(),
        };

        let first = pool.open_connection()?;
        {
            let mut state = pool.state.lock();
            state.idle.push(first);
            state.open = 1;
        }
        info!(url = %pool.url, max_connections = pool.config.max_connections, "sqlite pool opened");
        Ok(pool)
    }

    fn open_connection(&self) -> DbqResult<Connection> {
        let conn = Connection::open(&self.path)
            .map_err(|e| DbqError::Pool(format!("cannot open {}: {e}", self.url)))?;
        conn.busy_timeout(self.config.busy_timeout)?;
        for (name, value) in Dialect::Sqlite.pragmas() {
            // journal_mode answers with a row, foreign_keys does not
            let mut stmt = conn.prepare(&format!("pragma {name} = {value}"))?;
            let mut rows = stmt.query([])?;
            while rows.next()?.is_some() {}
        }
        debug!(url = %self.url, "opened sqlite connection");
        Ok(conn)
    }

    /// Connections alive right now, idle or lent out.
    pub fn open_count(&self) -> usize {
        self.state.lock().open
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

impl ConnectionPool for SqlitePool {
    fn reserve(&self) -> DbqResult<Connection> {
        let deadline = Instant::now() + self.config.reserve_timeout;
        let mut state = self.state.lock();
        loop {
            if state.shut_down {
                return Err(DbqError::Pool(format!("{} is shut down", self.url)));
            }
            if let Some(conn) = state.idle.pop() {
                return Ok(conn);
            }
            if state.open < self.config.max_connections {
                state.open += 1;
                drop(state);
                return self.open_connection().inspect_err(|_| {
                    self.state.lock().open -= 1;
                    self.available.notify_one();
                });
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return Err(DbqError::Pool(format!(
                    "no connection to {} available within {:?} ({} in use)",
                    self.url, self.config.reserve_timeout, state.open
                )));
            }
        }
    }

    fn release(&self, conn: Connection) {
        let mut state = self.state.lock();
        if state.shut_down {
            state.open = state.open.saturating_sub(1);
            drop(conn);
        } else {
            state.idle.push(conn);
        }
        self.available.notify_one();
    }

    fn erase(&self, conn: Connection) {
        drop(conn);
        let mut state = self.state.lock();
        state.open = state.open.saturating_sub(1);
        warn!(url = %self.url, open = state.open, "erased presumably broken connection");
        self.available.notify_one();
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        let idle = state.idle.len();
        state.idle.clear();
        state.open = state.open.saturating_sub(idle);
        self.available.notify_all();
        info!(url = %self.url, "sqlite pool shut down");
    }
}

impl std::fmt::Debug for SqlitePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePool")
            .field("url", &self.url)
            .field("config", &self.config)
            .field("open", &self.open_count())
            .field("idle", &self.idle_count())
            .finish_non_exhaustive()
    }
}
