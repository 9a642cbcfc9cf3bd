//! The query facade.
//!
//! [`Db`] owns the connection manager and the schema registry. Every typed
//! operation first makes sure the entity's table exists, then builds one
//! parameterised statement, runs it on the shared connection, and maps the
//! resulting rows back into entities.

use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Row};

use crate::column::ID_COLUMN;
use crate::connection::{ConnectionManager, DbSettings};
use crate::entity::{Entity, Record};
use crate::error::DbError;
use crate::order::Order;
use crate::predicate::{Predicate, SqlFragment};
use crate::schema::{SchemaRegistry, TableSchema};
use crate::select::Select;
use crate::stats::{DbStats, Stats};
use crate::update::UpdateBuilder;
use crate::value::quote_ident;

/// Entry point for all database work.
///
/// `Db` is `Send + Sync`; share it between threads behind an `Arc`. The
/// engine is blocking: each call runs its statement inline on the single
/// shared connection.
pub struct Db {
    connections: ConnectionManager,
    schema: SchemaRegistry,
    stats: Arc<Stats>,
}

impl Db {
    /// Opens the database described by `settings`.
    ///
    /// No table is touched until an entity type is first used.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the database cannot be opened.
    pub fn open(settings: &DbSettings) -> Result<Self, DbError> {
        let stats = Arc::new(Stats::default());
        let connections = ConnectionManager::open_with_stats(settings, Arc::clone(&stats))?;
        let schema = SchemaRegistry::new(&settings.table_prefix, Arc::clone(&stats));
        Ok(Self {
            connections,
            schema,
            stats,
        })
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Snapshot of the engine counters.
    pub fn stats(&self) -> DbStats {
        self.stats.snapshot()
    }

    /// Registers `E` and creates its table if needed. Every typed operation
    /// calls this first; calling it directly is only useful to fail early.
    pub fn ensure_initialized<E: Entity>(&self) -> Result<Arc<TableSchema>, DbError> {
        self.schema.ensure_initialized::<E>(&self.connections)
    }

    /// The row with the given id.
    pub fn get_by_id<E: Entity>(&self, id: i64) -> Result<Option<E>, DbError> {
        self.get_first(&Select::matching(E::id_column().eq(id)))
    }

    /// The rows with the given ids, ordered by id. Unknown ids are skipped.
    pub fn get_by_ids<E: Entity>(
        &self,
        ids: impl IntoIterator<Item = i64>,
    ) -> Result<Vec<E>, DbError> {
        let id = E::id_column();
        let select = Select::matching(id.is_in(ids)).order(Order::new().asc(&id));
        self.get_all(&select)
    }

    /// The first row selected by `select`; its limit is replaced by one.
    pub fn get_first<E: Entity>(&self, select: &Select<E>) -> Result<Option<E>, DbError> {
        let select = select.clone().limit(1);
        Ok(self.get_all(&select)?.into_iter().next())
    }

    /// Every row selected by `select`.
    ///
    /// # Errors
    ///
    /// Besides connection, schema, and query failures, returns
    /// [`DbError::Mapping`] for a row that does not satisfy the entity's
    /// column contract and [`DbError::Conversion`] or
    /// [`DbError::Validation`] for a stored value the column type cannot
    /// decode.
    pub fn get_all<E: Entity>(&self, select: &Select<E>) -> Result<Vec<E>, DbError> {
        let mut entities = Vec::new();
        self.for_each(select, |entity| entities.push(entity))?;
        Ok(entities)
    }

    /// Streams every row selected by `select` into `callback`.
    ///
    /// The connection stays locked while rows are streamed: `callback` must
    /// not use this `Db`. Collect with [`get_all`](Self::get_all) instead
    /// when it needs to.
    pub fn for_each<E: Entity>(
        &self,
        select: &Select<E>,
        mut callback: impl FnMut(E),
    ) -> Result<(), DbError> {
        let schema = self.ensure_initialized::<E>()?;
        let fragment = select_statement(schema.table(), select)?;

        let conn = self.connections.get()?;
        self.stats.statement(&fragment.sql);
        let query_err = |e: rusqlite::Error| DbError::query(&fragment.sql, e);

        let mut stmt = conn.prepare(&fragment.sql).map_err(query_err)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt
            .query(params_from_iter(fragment.params.iter()))
            .map_err(query_err)?;
        while let Some(row) = rows.next().map_err(query_err)? {
            callback(map_row(&schema, &names, row)?);
        }
        Ok(())
    }

    /// Number of rows matching `filter`, or of all rows.
    pub fn count<E: Entity>(&self, filter: Option<&Predicate<E>>) -> Result<u64, DbError> {
        let schema = self.ensure_initialized::<E>()?;
        let mut fragment = SqlFragment {
            sql: format!("SELECT COUNT(*) as count FROM {}", quote_ident(schema.table())),
            params: Vec::new(),
        };
        push_where(&mut fragment, filter)?;
        fragment.sql.push(';');

        let conn = self.connections.get()?;
        self.stats.statement(&fragment.sql);
        let count: i64 = conn
            .query_row(
                &fragment.sql,
                params_from_iter(fragment.params.iter()),
                |row| row.get(0),
            )
            .map_err(|e| DbError::query(&fragment.sql, e))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Deletes the rows matching `filter`; without a filter the table is
    /// emptied. Returns the number of rows deleted.
    pub fn delete<E: Entity>(&self, filter: Option<&Predicate<E>>) -> Result<usize, DbError> {
        let schema = self.ensure_initialized::<E>()?;
        let mut fragment = SqlFragment {
            sql: format!("DELETE FROM {}", quote_ident(schema.table())),
            params: Vec::new(),
        };
        push_where(&mut fragment, filter)?;
        fragment.sql.push(';');
        self.execute(&fragment.sql, &fragment.params)
    }

    /// Runs a raw row-returning statement and maps each row with `map`.
    ///
    /// Bind enum values with [`SqlEnum::to_param`](crate::SqlEnum::to_param)
    /// so they are stored by name.
    pub fn custom_query<R>(
        &self,
        sql: &str,
        params: &[Value],
        map: impl FnMut(&Row<'_>) -> rusqlite::Result<R>,
    ) -> Result<Vec<R>, DbError> {
        let conn = self.connections.get()?;
        self.stats.statement(sql);
        let mut stmt = conn.prepare(sql).map_err(|e| DbError::query(sql, e))?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), map)
            .map_err(|e| DbError::query(sql, e))?;
        let collected = rows
            .collect::<rusqlite::Result<Vec<R>>>()
            .map_err(|e| DbError::query(sql, e))?;
        Ok(collected)
    }

    /// Runs a raw statement and returns the number of rows changed.
    pub fn custom_update(&self, sql: &str, params: &[Value]) -> Result<usize, DbError> {
        self.execute(sql, params)
    }

    /// Starts a bulk UPDATE on `E`'s table.
    pub fn update<E: Entity>(&self) -> UpdateBuilder<'_, E> {
        UpdateBuilder::new(self)
    }

    /// Persists `entity`.
    ///
    /// An unstored entity is inserted with every assigned column and picks
    /// up its generated id. A stored entity is updated with its modified
    /// columns only; when none changed nothing is sent. The modified set is
    /// cleared on success and kept on failure, or when the row has been
    /// deleted behind the entity's back and the update matched nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Incomplete`](crate::ValidationError::Incomplete)
    /// if the entity is not valid for save, and [`DbError::Query`] if the
    /// backend refuses the statement.
    pub fn save<E: Entity>(&self, entity: &mut E) -> Result<(), DbError> {
        let schema = self.ensure_initialized::<E>()?;
        let record = entity.record();
        if !record.is_valid_for_save() {
            return Err(record.incomplete(schema.table()).into());
        }

        match record.id() {
            None => {
                let id = self.insert(&schema, record)?;
                entity.record_mut().mark_stored(id);
                tracing::debug!(table = %schema.table(), id, "inserted row");
            }
            Some(id) => {
                let modified = record.modified_columns();
                if modified.is_empty() {
                    tracing::debug!(table = %schema.table(), id, "no modified columns, skipping save");
                    return Ok(());
                }
                let mut update = self.update::<E>().filter(E::id_column().eq(id));
                for name in modified {
                    let value = record.value(name).cloned().unwrap_or(Value::Null);
                    update = update.put(name, Ok(value));
                }
                if update.execute()? == 0 {
                    tracing::warn!(
                        table = %schema.table(),
                        id,
                        "row no longer exists, save changed nothing"
                    );
                    return Ok(());
                }
                entity.record_mut().mark_clean();
            }
        }
        Ok(())
    }

    /// Deletes `entity`'s row. The instance becomes unstored with every
    /// assigned column modified, so saving it again inserts a new row.
    /// Unstored entities are left untouched.
    pub fn remove<E: Entity>(&self, entity: &mut E) -> Result<(), DbError> {
        let Some(id) = entity.id() else {
            tracing::debug!(table = E::TABLE, "entity is not stored, nothing to delete");
            return Ok(());
        };
        self.delete(Some(&E::id_column().eq(id)))?;
        entity.record_mut().mark_deleted();
        Ok(())
    }

    fn insert(&self, schema: &TableSchema, record: &Record) -> Result<i64, DbError> {
        let assigned = record.assigned();
        let table = quote_ident(schema.table());
        let sql = if assigned.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES RETURNING {};", quote_ident(ID_COLUMN))
        } else {
            let names: Vec<String> = assigned.iter().map(|(name, _)| quote_ident(name)).collect();
            let placeholders = vec!["?"; assigned.len()].join(", ");
            format!(
                "INSERT INTO {table} ({}) VALUES ({placeholders}) RETURNING {};",
                names.join(", "),
                quote_ident(ID_COLUMN)
            )
        };

        let conn = self.connections.get()?;
        self.stats.statement(&sql);
        conn.query_row(
            &sql,
            params_from_iter(assigned.iter().map(|(_, value)| *value)),
            |row| row.get(0),
        )
        .map_err(|e| DbError::query(&sql, e))
    }

    /// Runs a statement that returns no rows.
    pub(crate) fn execute(&self, sql: &str, params: &[Value]) -> Result<usize, DbError> {
        let conn = self.connections.get()?;
        self.stats.statement(sql);
        conn.execute(sql, params_from_iter(params.iter()))
            .map_err(|e| DbError::query(sql, e))
    }
}

fn push_where<E>(fragment: &mut SqlFragment, filter: Option<&Predicate<E>>) -> Result<(), DbError> {
    if let Some(filter) = filter {
        let condition = filter.to_sql()?;
        fragment.sql.push_str(" WHERE ");
        fragment.sql.push_str(&condition.sql);
        fragment.params.extend(condition.params);
    }
    Ok(())
}

fn select_statement<E>(table: &str, select: &Select<E>) -> Result<SqlFragment, DbError> {
    let mut fragment = SqlFragment {
        sql: format!("SELECT * FROM {}", quote_ident(table)),
        params: Vec::new(),
    };
    push_where(&mut fragment, select.filter.as_ref())?;

    if let Some(order) = select.order.as_ref().filter(|o| !o.is_empty()) {
        fragment.sql.push_str(" ORDER BY ");
        fragment.sql.push_str(&order.to_sql());
    }
    // SQLite integers are signed 64-bit.
    let clamp = |n: u64| i64::try_from(n).unwrap_or(i64::MAX);
    match (select.limit, select.offset) {
        (Some(limit), _) => fragment.sql.push_str(&format!(" LIMIT {}", clamp(limit))),
        // SQLite only accepts OFFSET after a LIMIT.
        (None, Some(_)) => fragment.sql.push_str(" LIMIT -1"),
        (None, None) => {}
    }
    if let Some(offset) = select.offset {
        fragment.sql.push_str(&format!(" OFFSET {}", clamp(offset)));
    }
    fragment.sql.push(';');
    Ok(fragment)
}

/// Hydrates one entity from a result row.
fn map_row<E: Entity>(schema: &TableSchema, names: &[String], row: &Row<'_>) -> Result<E, DbError> {
    let mapping = |reason: String| DbError::Mapping {
        table: schema.table().to_string(),
        reason,
    };

    let id_index = names
        .iter()
        .position(|name| name == ID_COLUMN)
        .ok_or_else(|| mapping(format!("result has no '{ID_COLUMN}' column")))?;
    let id: i64 = row
        .get(id_index)
        .map_err(|e| mapping(format!("unreadable '{ID_COLUMN}': {e}")))?;

    let mut record = Record::hydrate(schema.columns_arc(), id);
    for (index, name) in names.iter().enumerate() {
        let Some(column) = schema.columns().iter().find(|c| c.name() == name.as_str()) else {
            continue;
        };
        let value: Value = row
            .get(index)
            .map_err(|e| mapping(format!("unreadable column '{name}': {e}")))?;
        column.check_stored(&value)?;
        record.load(column.name(), value);
    }
    record.mark_clean();

    if !record.is_valid_for_save() {
        return Err(mapping(format!(
            "row {id} lacks required columns: {}",
            record.missing_columns().join(", ")
        )));
    }
    Ok(E::from_record(record))
}
