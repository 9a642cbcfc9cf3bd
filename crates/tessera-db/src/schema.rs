//! Per-entity schema registry.
//!
//! The first time an entity type is used, the registry validates its column
//! list, resolves the physical table name, and creates the table if the
//! backend does not have it yet. The result is cached for the lifetime of
//! the registry. Initialisation runs under the registry lock, so concurrent
//! first use of a type issues at most one `CREATE TABLE`.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::column::{Column, ColumnDef, ID_COLUMN};
use crate::connection::ConnectionManager;
use crate::entity::{descriptors, Entity};
use crate::error::DbError;
use crate::stats::Stats;
use crate::value::quote_ident;

/// Resolved schema of one entity type.
#[derive(Debug)]
pub struct TableSchema {
    table: String,
    columns: Arc<[ColumnDef]>,
}

impl TableSchema {
    /// Physical table name (prefix included).
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Declared columns, excluding `id`.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub(crate) fn columns_arc(&self) -> Arc<[ColumnDef]> {
        Arc::clone(&self.columns)
    }

    /// The `CREATE TABLE IF NOT EXISTS` statement for this table.
    pub fn create_statement(&self) -> String {
        let id: Column<(), i64> = Column::id();
        let mut clauses = vec![id.def().declaration()];
        clauses.extend(self.columns.iter().map(ColumnDef::declaration));
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({});",
            quote_ident(&self.table),
            clauses.join(", ")
        )
    }
}

/// Process-wide cache of entity schemas.
pub struct SchemaRegistry {
    prefix: String,
    stats: Arc<Stats>,
    tables: Mutex<HashMap<TypeId, Arc<TableSchema>>>,
}

impl SchemaRegistry {
    pub(crate) fn new(prefix: impl Into<String>, stats: Arc<Stats>) -> Self {
        Self {
            prefix: prefix.into(),
            stats,
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Physical table name for `E`.
    pub fn table_name<E: Entity>(&self) -> String {
        format!("{}{}", self.prefix, E::TABLE)
    }

    /// The cached schema of `E`, if it has been initialised.
    pub fn get<E: Entity>(&self) -> Option<Arc<TableSchema>> {
        self.lock().get(&TypeId::of::<E>()).cloned()
    }

    /// Initialises `E` once: validates its columns and creates its table if
    /// absent. Later calls return the cached schema without touching the
    /// backend.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::SchemaInit`] if the column list is invalid or the
    /// table cannot be checked or created, and [`DbError::Connection`] if no
    /// connection is available. Nothing is cached on failure.
    pub fn ensure_initialized<E: Entity>(
        &self,
        connections: &ConnectionManager,
    ) -> Result<Arc<TableSchema>, DbError> {
        let mut tables = self.lock();
        if let Some(schema) = tables.get(&TypeId::of::<E>()) {
            return Ok(Arc::clone(schema));
        }

        let schema = TableSchema {
            table: self.table_name::<E>(),
            columns: descriptors::<E>(),
        };
        validate_columns(&schema)?;

        {
            let conn = connections.get()?;
            if !self.table_exists(&conn, &schema.table)? {
                let sql = schema.create_statement();
                self.stats.statement(&sql);
                conn.execute_batch(&sql).map_err(|e| DbError::SchemaInit {
                    table: schema.table.clone(),
                    reason: "CREATE TABLE failed".to_string(),
                    source: Some(e),
                })?;
                self.stats.table_created();
                tracing::info!(table = %schema.table, "created table");
            }
        }

        let schema = Arc::new(schema);
        tables.insert(TypeId::of::<E>(), Arc::clone(&schema));
        Ok(schema)
    }

    fn table_exists(&self, conn: &Connection, table: &str) -> Result<bool, DbError> {
        let sql = "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1";
        self.stats.statement(sql);
        let count: i64 = conn
            .query_row(sql, [table], |row| row.get(0))
            .map_err(|e| DbError::SchemaInit {
                table: table.to_string(),
                reason: "table existence check failed".to_string(),
                source: Some(e),
            })?;
        Ok(count > 0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TypeId, Arc<TableSchema>>> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("schema registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

fn validate_columns(schema: &TableSchema) -> Result<(), DbError> {
    let mut seen = HashSet::new();
    for column in schema.columns() {
        if column.name() == ID_COLUMN {
            return Err(DbError::schema(
                &schema.table,
                format!("column name '{ID_COLUMN}' is reserved"),
            ));
        }
        if !seen.insert(column.name()) {
            return Err(DbError::schema(
                &schema.table,
                format!("column '{}' is declared twice", column.name()),
            ));
        }
        if let Some(reason) = column.default_error() {
            return Err(DbError::schema(
                &schema.table,
                format!("invalid default for column '{}': {reason}", column.name()),
            ));
        }
    }
    Ok(())
}
