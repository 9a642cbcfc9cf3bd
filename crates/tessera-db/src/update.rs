//! Bulk UPDATE builder.

use rusqlite::types::Value;

use crate::column::Column;
use crate::column_type::ColumnValue;
use crate::entity::Entity;
use crate::error::DbError;
use crate::facade::Db;
use crate::predicate::Predicate;
use crate::value::quote_ident;

/// Accumulates `column = value` assignments and runs one UPDATE.
///
/// Assignment errors (null in a `NOT NULL` column, rejected values, codec
/// failures) are reported by [`execute`](Self::execute).
#[must_use = "an update does nothing until executed"]
pub struct UpdateBuilder<'db, E> {
    db: &'db Db,
    values: Vec<(&'static str, Result<Value, DbError>)>,
    filter: Option<Predicate<E>>,
}

impl<'db, E: Entity> UpdateBuilder<'db, E> {
    pub(crate) fn new(db: &'db Db) -> Self {
        Self {
            db,
            values: Vec::new(),
            filter: None,
        }
    }

    /// Assigns `column`; a later assignment to the same column wins.
    pub fn set<T: ColumnValue>(self, column: &Column<E, T>, value: impl Into<Option<T>>) -> Self {
        let encoded = column.encode(value.into().as_ref());
        self.put(column.name(), encoded)
    }

    pub(crate) fn put(mut self, name: &'static str, value: Result<Value, DbError>) -> Self {
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
        self
    }

    /// Restricts the rows updated; repeated calls are ANDed together.
    pub fn filter(mut self, predicate: Predicate<E>) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Number of pending assignments.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Runs the UPDATE and returns the number of rows changed.
    ///
    /// With no assignments this is a logged no-op returning zero.
    ///
    /// # Errors
    ///
    /// Returns the first assignment error, a predicate serialisation error,
    /// or [`DbError::Query`] if the backend rejects the statement.
    pub fn execute(self) -> Result<usize, DbError> {
        if self.values.is_empty() {
            tracing::warn!(table = E::TABLE, "update has no assignments, nothing to do");
            return Ok(0);
        }

        let schema = self.db.ensure_initialized::<E>()?;
        let mut assignments = Vec::with_capacity(self.values.len());
        let mut params = Vec::with_capacity(self.values.len());
        for (name, value) in self.values {
            assignments.push(format!("{} = ?", quote_ident(name)));
            params.push(value?);
        }

        let mut sql = format!(
            "UPDATE {} SET {}",
            quote_ident(schema.table()),
            assignments.join(", ")
        );
        if let Some(filter) = &self.filter {
            let fragment = filter.to_sql()?;
            sql.push_str(" WHERE ");
            sql.push_str(&fragment.sql);
            params.extend(fragment.params);
        }
        sql.push(';');

        self.db.execute(&sql, &params)
    }
}
