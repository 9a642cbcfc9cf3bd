//! Engine counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DbStats {
    /// Statements sent to the backend (liveness checks excluded).
    pub statements: u64,
    /// `CREATE TABLE` statements issued by the schema registry.
    pub tables_created: u64,
    /// Liveness checks performed by the connection manager.
    pub liveness_checks: u64,
    /// Times the connection was re-opened.
    pub reconnects: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Stats {
    statements: AtomicU64,
    tables_created: AtomicU64,
    liveness_checks: AtomicU64,
    reconnects: AtomicU64,
}

impl Stats {
    /// Counts and logs a statement about to be executed.
    pub(crate) fn statement(&self, sql: &str) {
        self.statements.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(sql, "executing statement");
    }

    pub(crate) fn table_created(&self) {
        self.tables_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn liveness_check(&self) {
        self.liveness_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DbStats {
        DbStats {
            statements: self.statements.load(Ordering::Relaxed),
            tables_created: self.tables_created.load(Ordering::Relaxed),
            liveness_checks: self.liveness_checks.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}
