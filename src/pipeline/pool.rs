//! Fixed-size SQLite connection pool
//!
//! Connections are opened up front, handed out through a scoped
//! [`PooledConnection`] guard and returned when the guard drops, on every exit
//! path. Release never inspects the connection. Acquire rolls back any
//! transaction left open, validates with `SELECT 1` and reopens a dead
//! connection before handing it out.

use super::types::EntityKind;
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool for {database} exhausted: no connection within {waited_ms}ms")]
    Exhausted { database: String, waited_ms: u128 },

    #[error("cannot connect to {database}: {source}")]
    Connect {
        database: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("pool for {database} is closed")]
    Closed { database: String },

    #[error("pool for {database} has a poisoned lock")]
    Poisoned { database: String },
}

/// A logical database and how to open it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTarget {
    pub name: String,
    pub path: PathBuf,
    pub busy_timeout: Duration,
}

impl DatabaseTarget {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            busy_timeout: Duration::from_millis(5_000),
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// Open a fresh connection (WAL, NORMAL sync, busy timeout)
    pub fn open(&self) -> Result<Connection, PoolError> {
        let connect_err = |source| PoolError::Connect {
            database: self.name.clone(),
            source,
        };

        ensure_parent_dir(&self.path);

        let conn = Connection::open(&self.path).map_err(connect_err)?;
        conn.busy_timeout(self.busy_timeout).map_err(connect_err)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(connect_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL").map_err(connect_err)?;

        Ok(conn)
    }
}

fn ensure_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("⚠️  Failed to create database directory {}: {}", parent.display(), e);
            }
        }
    }
}

/// Bounded pool of live connections for one database
pub struct ConnectionPool {
    target: DatabaseTarget,
    size: usize,
    acquire_timeout: Duration,
    idle: Mutex<Vec<Connection>>,
    available: Condvar,
    closed: AtomicBool,
    is_alive: fn(&Connection) -> bool,
}

fn answers_select_one(conn: &Connection) -> bool {
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok()
}

impl ConnectionPool {
    /// Open `size` connections to `target`.
    ///
    /// Fails if any connection cannot be opened; a zero size is raised to 1.
    pub fn open(
        target: DatabaseTarget,
        size: usize,
        acquire_timeout: Duration,
    ) -> Result<Self, PoolError> {
        let size = size.max(1);
        let mut idle = Vec::with_capacity(size);
        for _ in 0..size {
            idle.push(target.open()?);
        }

        log::info!(
            "🔌 Connection pool ready: {} ({} connections, {})",
            target.name,
            size,
            target.path.display()
        );

        Ok(Self {
            target,
            size,
            acquire_timeout,
            idle: Mutex::new(idle),
            available: Condvar::new(),
            closed: AtomicBool::new(false),
            is_alive: answers_select_one,
        })
    }

    /// Replace the liveness check run on every acquire.
    #[cfg(test)]
    fn with_liveness_check(mut self, is_alive: fn(&Connection) -> bool) -> Self {
        self.is_alive = is_alive;
        self
    }

    pub fn database(&self) -> &str {
        &self.target.name
    }

    pub fn target(&self) -> &DatabaseTarget {
        &self.target
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Connections currently sitting in the pool
    pub fn idle_count(&self) -> usize {
        self.lock_idle().len()
    }

    /// Acquire with the pool's configured wait.
    pub fn acquire(&self) -> Result<PooledConnection<'_>, PoolError> {
        self.acquire_timeout(self.acquire_timeout)
    }

    /// Acquire a connection, waiting at most `wait` for one to be released.
    pub fn acquire_timeout(&self, wait: Duration) -> Result<PooledConnection<'_>, PoolError> {
        let started = Instant::now();
        let deadline = started + wait;

        let mut idle = self
            .idle
            .lock()
            .map_err(|_| PoolError::Poisoned {
                database: self.target.name.clone(),
            })?;

        let conn = loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(PoolError::Closed {
                    database: self.target.name.clone(),
                });
            }

            if let Some(conn) = idle.pop() {
                break conn;
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PoolError::Exhausted {
                    database: self.target.name.clone(),
                    waited_ms: started.elapsed().as_millis(),
                });
            }

            let (guard, _) = self
                .available
                .wait_timeout(idle, deadline - now)
                .map_err(|_| PoolError::Poisoned {
                    database: self.target.name.clone(),
                })?;
            idle = guard;
        };
        drop(idle);

        match self.reset(conn) {
            Ok(conn) => Ok(PooledConnection {
                pool: self,
                conn: Some(conn),
            }),
            Err((conn, err)) => {
                // Keep the slot; the next acquire retries the reset.
                self.release(conn);
                Err(err)
            }
        }
    }

    /// Roll back leftovers and check liveness, reopening if needed.
    fn reset(&self, conn: Connection) -> Result<Connection, (Connection, PoolError)> {
        if !conn.is_autocommit() {
            log::warn!(
                "⚠️  Connection to {} returned inside a transaction, rolling back",
                self.target.name
            );
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                log::warn!("⚠️  Rollback on acquire failed for {}: {}", self.target.name, e);
            }
        }

        let alive = conn.is_autocommit() && (self.is_alive)(&conn);
        if alive {
            return Ok(conn);
        }

        log::warn!("⚠️  Stale connection to {}, reopening", self.target.name);
        match self.target.open() {
            Ok(fresh) => Ok(fresh),
            Err(err) => Err((conn, err)),
        }
    }

    fn release(&self, conn: Connection) {
        let mut idle = self.lock_idle();
        if self.closed.load(Ordering::Acquire) {
            drop(idle);
            drop(conn);
            return;
        }
        idle.push(conn);
        drop(idle);
        self.available.notify_one();
    }

    /// Tear down idle connections and refuse further acquires.
    ///
    /// Connections still checked out are closed when their guards drop.
    pub fn close(&self) {
        let drained: Vec<Connection> = {
            let mut idle = self.lock_idle();
            self.closed.store(true, Ordering::Release);
            idle.drain(..).collect()
        };
        let count = drained.len();
        drop(drained);
        self.available.notify_all();
        log::info!("🔒 Closed pool {} ({} idle connections)", self.target.name, count);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<Connection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("database", &self.target.name)
            .field("size", &self.size)
            .field("idle", &self.idle_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Scoped connection checkout; returns to the pool on drop
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// One pool per results database, selected by entity kind
#[derive(Debug, Clone)]
pub struct DatabasePools {
    pub fund_groups: Arc<ConnectionPool>,
    pub model_portfolios: Arc<ConnectionPool>,
}

impl DatabasePools {
    pub fn new(fund_groups: Arc<ConnectionPool>, model_portfolios: Arc<ConnectionPool>) -> Self {
        Self {
            fund_groups,
            model_portfolios,
        }
    }

    pub fn for_kind(&self, kind: EntityKind) -> &Arc<ConnectionPool> {
        match kind {
            EntityKind::FundGroup => &self.fund_groups,
            EntityKind::ModelPortfolio => &self.model_portfolios,
        }
    }

    pub fn close_all(&self) {
        self.fund_groups.close();
        self.model_portfolios.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_pool(dir: &Path, size: usize, wait_ms: u64) -> ConnectionPool {
        let target = DatabaseTarget::new("test_db", dir.join("test.db"));
        ConnectionPool::open(target, size, Duration::from_millis(wait_ms)).unwrap()
    }

    #[test]
    fn test_guard_returns_connection_on_drop() {
        let dir = tempdir().unwrap();
        let pool = open_pool(dir.path(), 2, 100);

        assert_eq!(pool.idle_count(), 2);
        {
            let _a = pool.acquire().unwrap();
            let _b = pool.acquire().unwrap();
            assert_eq!(pool.idle_count(), 0);
        }
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn test_exhausted_pool_times_out() {
        let dir = tempdir().unwrap();
        let pool = open_pool(dir.path(), 1, 50);

        let _held = pool.acquire().unwrap();
        let result = pool.acquire();

        assert!(matches!(result, Err(PoolError::Exhausted { .. })));
    }

    #[test]
    fn test_waiter_wakes_when_connection_released() {
        let dir = tempdir().unwrap();
        let pool = Arc::new(open_pool(dir.path(), 1, 2_000));

        let held = pool.acquire().unwrap();
        let waiter_pool = Arc::clone(&pool);
        let waiter = std::thread::spawn(move || waiter_pool.acquire().map(|_| ()).is_ok());

        std::thread::sleep(Duration::from_millis(50));
        drop(held);

        assert!(waiter.join().unwrap());
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_open_transaction_is_rolled_back_on_acquire() {
        let dir = tempdir().unwrap();
        let pool = open_pool(dir.path(), 1, 100);

        {
            let conn = pool.acquire().unwrap();
            conn.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
            conn.execute_batch("BEGIN; INSERT INTO t VALUES (1);").unwrap();
            assert!(!conn.is_autocommit());
            // Released mid-transaction on purpose.
        }

        let conn = pool.acquire().unwrap();
        assert!(conn.is_autocommit());
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_dead_connection_is_reopened_on_acquire() {
        let dir = tempdir().unwrap();
        let pool = open_pool(dir.path(), 1, 100).with_liveness_check(|_| false);

        {
            let conn = pool.acquire().unwrap();
            // Temp tables only exist on the connection that created them.
            conn.execute_batch("CREATE TEMP TABLE marker (x INTEGER)").unwrap();
        }

        let conn = pool.acquire().unwrap();
        let marker: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_temp_master WHERE name = 'marker'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(marker, 0);
        drop(conn);
        assert_eq!(pool.idle_count(), pool.size());
    }

    #[test]
    fn test_failed_reopen_keeps_slot_in_pool() {
        let dir = tempdir().unwrap();
        let pool = open_pool(dir.path(), 2, 100).with_liveness_check(|_| false);

        // Replace the database file with a directory so reopening fails.
        let db_path = dir.path().join("test.db");
        std::fs::remove_file(&db_path).unwrap();
        std::fs::create_dir(&db_path).unwrap();

        let result = pool.acquire();

        assert!(matches!(result, Err(PoolError::Connect { .. })));
        assert_eq!(pool.idle_count(), pool.size());
        assert!(matches!(pool.acquire(), Err(PoolError::Connect { .. })));
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn test_unopenable_path_is_a_connect_error() {
        let dir = tempdir().unwrap();
        // The temp directory itself is not a database file.
        let target = DatabaseTarget::new("not_a_file", dir.path());

        assert!(matches!(target.open(), Err(PoolError::Connect { .. })));

        let result = ConnectionPool::open(target, 2, Duration::from_millis(10));
        assert!(matches!(result, Err(PoolError::Connect { .. })));
    }

    #[test]
    fn test_closed_pool_refuses_acquire() {
        let dir = tempdir().unwrap();
        let pool = open_pool(dir.path(), 2, 100);

        let held = pool.acquire().unwrap();
        pool.close();

        assert!(pool.is_closed());
        assert!(matches!(pool.acquire(), Err(PoolError::Closed { .. })));

        drop(held);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_connections_use_wal() {
        let dir = tempdir().unwrap();
        let pool = open_pool(dir.path(), 1, 100);

        let conn = pool.acquire().unwrap();
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0)).unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_pools_selected_by_kind() {
        let dir = tempdir().unwrap();
        let fg = Arc::new(ConnectionPool::open(
            DatabaseTarget::new("fg", dir.path().join("fg.db")),
            1,
            Duration::from_millis(10),
        ).unwrap());
        let mp = Arc::new(ConnectionPool::open(
            DatabaseTarget::new("mp", dir.path().join("mp.db")),
            1,
            Duration::from_millis(10),
        ).unwrap());

        let pools = DatabasePools::new(fg, mp);

        assert_eq!(pools.for_kind(EntityKind::FundGroup).database(), "fg");
        assert_eq!(pools.for_kind(EntityKind::ModelPortfolio).database(), "mp");
    }
}
