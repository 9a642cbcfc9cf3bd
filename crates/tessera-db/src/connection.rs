//! The single shared SQLite connection.
//!
//! Connections are opened through `r2d2_sqlite`'s manager, which applies the
//! per-connection pragmas, but no pool is built: the engine runs every
//! statement on one handle. A liveness check runs at most once per
//! configured window; a failed check closes the handle and opens a new one
//! before the caller sees it.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use r2d2::ManageConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};

use crate::error::DbError;
use crate::stats::Stats;

/// Runtime settings for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbSettings {
    /// Path to the SQLite database file. `:memory:` opens an in-memory
    /// database, which does not survive a reconnect.
    pub path: String,

    /// Namespace prepended to every logical table name.
    pub table_prefix: String,

    /// Busy timeout for the connection, in milliseconds.
    pub busy_timeout_ms: u64,

    /// How long a connection is trusted without a liveness check, in
    /// milliseconds. Zero checks before every use.
    pub liveness_window_ms: u64,
}

impl Default for DbSettings {
    fn default() -> Self {
        Self {
            path: "tessera.db".to_string(),
            table_prefix: String::new(),
            busy_timeout_ms: 5_000,
            liveness_window_ms: 30_000,
        }
    }
}

struct Slot {
    conn: Connection,
    checked_at: Instant,
}

/// Owns the backend connection and keeps it alive.
pub struct ConnectionManager {
    manager: SqliteConnectionManager,
    window: Duration,
    check: LivenessCheck,
    stats: Arc<Stats>,
    slot: Mutex<Slot>,
}

type LivenessCheck = fn(&SqliteConnectionManager, &mut Connection) -> Result<(), rusqlite::Error>;

fn check_with_manager(
    manager: &SqliteConnectionManager,
    conn: &mut Connection,
) -> Result<(), rusqlite::Error> {
    manager.is_valid(conn)
}

/// Per-connection setup: WAL journaling, enforced foreign keys, and the
/// configured busy timeout. In-memory databases cannot journal to a WAL and
/// keep their `memory` mode.
fn configure(conn: &mut Connection, busy_timeout: Duration) -> Result<(), rusqlite::Error> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") && !mode.eq_ignore_ascii_case("memory") {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("database refused WAL journaling (mode is {mode})")),
        ));
    }
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(busy_timeout)
}

/// Exclusive access to the live connection.
///
/// Statements run while the guard is held; drop it before calling back into
/// the engine from the same thread.
pub struct ConnectionGuard<'a> {
    slot: MutexGuard<'a, Slot>,
}

impl Deref for ConnectionGuard<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.slot.conn
    }
}

impl DerefMut for ConnectionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.slot.conn
    }
}

impl ConnectionManager {
    /// Opens the connection with WAL mode, foreign keys, and the configured
    /// busy timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the database cannot be opened or
    /// the pragmas are refused.
    pub fn open(settings: &DbSettings) -> Result<Self, DbError> {
        Self::open_with_stats(settings, Arc::new(Stats::default()))
    }

    pub(crate) fn open_with_stats(settings: &DbSettings, stats: Arc<Stats>) -> Result<Self, DbError> {
        let busy_timeout = Duration::from_millis(settings.busy_timeout_ms);
        let manager = SqliteConnectionManager::file(&settings.path)
            .with_flags(
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(move |conn| configure(conn, busy_timeout));

        let conn = manager.connect().map_err(DbError::Connection)?;
        tracing::info!(path = %settings.path, "opened database connection");

        Ok(Self {
            manager,
            window: Duration::from_millis(settings.liveness_window_ms),
            check: check_with_manager,
            stats,
            slot: Mutex::new(Slot {
                conn,
                checked_at: Instant::now(),
            }),
        })
    }

    /// Replaces the liveness check.
    #[cfg(test)]
    fn with_liveness_check(mut self, check: LivenessCheck) -> Self {
        self.check = check;
        self
    }

    /// Returns the live connection, checking it first if the liveness window
    /// has elapsed and reconnecting if the check fails.
    ///
    /// The check and any reconnect happen under the same lock, so racing
    /// callers never both reconnect or observe a half-closed handle.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if a reconnect was needed and failed.
    pub fn get(&self) -> Result<ConnectionGuard<'_>, DbError> {
        let mut slot = self.lock();

        if slot.checked_at.elapsed() >= self.window {
            self.stats.liveness_check();
            if let Err(e) = (self.check)(&self.manager, &mut slot.conn) {
                tracing::warn!(error = %e, "database connection failed liveness check");
                self.replace(&mut slot)?;
            }
            slot.checked_at = Instant::now();
        }

        Ok(ConnectionGuard { slot })
    }

    /// Closes the current connection and opens a new one.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the new connection cannot be
    /// opened; the old handle is kept in that case.
    pub fn reconnect(&self) -> Result<(), DbError> {
        let mut slot = self.lock();
        self.replace(&mut slot)?;
        slot.checked_at = Instant::now();
        Ok(())
    }

    #[cfg(test)]
    fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    fn replace(&self, slot: &mut Slot) -> Result<(), DbError> {
        let fresh = self.manager.connect().map_err(DbError::Connection)?;
        let stale = std::mem::replace(&mut slot.conn, fresh);
        if let Err((_, e)) = stale.close() {
            tracing::debug!(error = %e, "closing stale connection failed");
        }
        self.stats.reconnect();
        tracing::info!("reconnected to database");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("connection lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_settings(window_ms: u64) -> DbSettings {
        DbSettings {
            path: ":memory:".to_string(),
            liveness_window_ms: window_ms,
            busy_timeout_ms: 2_500,
            ..DbSettings::default()
        }
    }

    fn pragma(conn: &Connection, name: &str) -> String {
        conn.pragma_query_value(None, name, |row| row.get::<_, rusqlite::types::Value>(0))
            .map(|value| match value {
                rusqlite::types::Value::Integer(n) => n.to_string(),
                rusqlite::types::Value::Text(text) => text,
                other => format!("{other:?}"),
            })
            .expect("pragma should be readable")
    }

    #[test]
    fn file_connections_use_wal_and_settings() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let settings = DbSettings {
            path: dir.path().join("pragmas.db").to_string_lossy().into_owned(),
            busy_timeout_ms: 1_250,
            ..DbSettings::default()
        };
        let manager = ConnectionManager::open(&settings).expect("file database should open");
        let conn = manager.get().expect("should get a connection");

        assert_eq!(pragma(&conn, "journal_mode"), "wal");
        assert_eq!(pragma(&conn, "foreign_keys"), "1");
        assert_eq!(pragma(&conn, "busy_timeout"), "1250");
    }

    #[test]
    fn memory_connections_keep_memory_journaling() {
        let manager = ConnectionManager::open(&memory_settings(60_000))
            .expect("in-memory database should open");
        let conn = manager.get().expect("should get a connection");
        assert_eq!(pragma(&conn, "journal_mode"), "memory");
        assert_eq!(pragma(&conn, "busy_timeout"), "2500");
    }

    #[test]
    fn failed_check_replaces_the_connection() {
        let manager = ConnectionManager::open(&memory_settings(0))
            .expect("in-memory database should open")
            .with_liveness_check(|_, _| Err(rusqlite::Error::InvalidQuery));

        manager
            .get()
            .expect("a replacement connection should be handed out")
            .execute_batch("CREATE TABLE after_reconnect (x INTEGER);")
            .expect("replacement connection should be usable");

        let stats = manager.stats().snapshot();
        assert_eq!(stats.liveness_checks, 1);
        assert_eq!(stats.reconnects, 1);
    }

    #[test]
    fn checks_are_throttled_by_the_window() {
        let manager = ConnectionManager::open(&memory_settings(60_000))
            .expect("in-memory database should open");
        for _ in 0..5 {
            drop(manager.get().expect("should get a connection"));
        }
        assert_eq!(manager.stats().snapshot().liveness_checks, 0);
    }

    #[test]
    fn zero_window_checks_every_time() {
        let manager =
            ConnectionManager::open(&memory_settings(0)).expect("in-memory database should open");
        for _ in 0..3 {
            drop(manager.get().expect("should get a connection"));
        }
        let stats = manager.stats().snapshot();
        assert_eq!(stats.liveness_checks, 3);
        assert_eq!(stats.reconnects, 0, "a healthy connection is kept");
    }

    #[test]
    fn reconnect_replaces_the_handle() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("reconnect.db");
        let settings = DbSettings {
            path: path.to_string_lossy().into_owned(),
            ..DbSettings::default()
        };
        let manager = ConnectionManager::open(&settings).expect("file database should open");

        manager
            .get()
            .expect("should get a connection")
            .execute_batch("CREATE TABLE marker (x INTEGER); INSERT INTO marker VALUES (1);")
            .expect("should write");

        manager.reconnect().expect("reconnect should succeed");
        assert_eq!(manager.stats().snapshot().reconnects, 1);

        let count: i64 = manager
            .get()
            .expect("should get a connection")
            .query_row("SELECT COUNT(*) FROM marker", [], |row| row.get(0))
            .expect("data should survive on disk");
        assert_eq!(count, 1);
    }
}
