//! Bounded pool of SQLite connections.
//!
//! Connections are opened lazily up to `max_size` and handed out through a
//! [`PooledConnection`] guard that puts them back on drop, so a connection is
//! released on every exit path of an operation, including `?` early returns
//! and unwinding.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rusqlite::Connection;
use tracing::{debug, info};

use super::StoreError;

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_size: usize,
    pub checkout_timeout: Duration,
    pub busy_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 4,
            checkout_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

struct PoolState {
    idle: Vec<Connection>,
    open: usize,
}

pub struct ConnectionPool {
    path: PathBuf,
    config: PoolConfig,
    state: Mutex<PoolState>,
    returned: Condvar,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConnectionPool")
            .field("path", &self.path)
            .field("open", &state.open)
            .field("idle", &state.idle.len())
            .finish()
    }
}

impl ConnectionPool {
    /// Create a pool for the database at `path`. No connection is opened yet.
    pub fn new(path: impl Into<PathBuf>, config: PoolConfig) -> Self {
        Self {
            path: path.into(),
            config: PoolConfig {
                max_size: config.max_size.max(1),
                ..config
            },
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
            }),
            returned: Condvar::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Connections currently opened by the pool (idle or checked out).
    pub fn open_count(&self) -> usize {
        self.state.lock().open
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Check out a connection, waiting up to the configured timeout when all
    /// `max_size` connections are in use.
    pub fn get(&self) -> Result<PooledConnection<'_>, StoreError> {
        let deadline = Instant::now() + self.config.checkout_timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                });
            }
            if state.open < self.config.max_size {
                state.open += 1;
                drop(state);
                return match self.connect() {
                    Ok(conn) => Ok(PooledConnection {
                        pool: self,
                        conn: Some(conn),
                    }),
                    Err(e) => {
                        self.state.lock().open -= 1;
                        self.returned.notify_one();
                        Err(StoreError::Database(e))
                    }
                };
            }
            if self.returned.wait_until(&mut state, deadline).timed_out() {
                return Err(StoreError::PoolTimeout(self.config.checkout_timeout));
            }
        }
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        let start = Instant::now();
        let conn = Connection::open(&self.path)?;
        apply_pragmas(&conn, self.config.busy_timeout)?;
        info!(
            path = %self.path.display(),
            elapsed_ms = start.elapsed().as_millis(),
            "opened pooled SQLite connection"
        );
        Ok(conn)
    }

    fn put_back(&self, conn: Connection) {
        self.state.lock().idle.push(conn);
        self.returned.notify_one();
    }
}

fn apply_pragmas(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        r"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;
        PRAGMA foreign_keys = ON;
        ",
    )
}

/// RAII guard that dereferences to the pooled `Connection`.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
}

impl std::fmt::Debug for PooledConnection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PooledConnection")
            .field(&self.conn.is_some())
            .finish()
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        self.conn
            .as_ref()
            .expect("pooled connection is present until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn
            .as_mut()
            .expect("pooled connection is present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // An aborted transaction would leave the connection mid-transaction.
            if conn.is_autocommit() {
                self.pool.put_back(conn);
            } else {
                debug!("discarding pooled connection left inside a transaction");
                self.pool.state.lock().open -= 1;
                self.pool.returned.notify_one();
            }
        }
    }
}
