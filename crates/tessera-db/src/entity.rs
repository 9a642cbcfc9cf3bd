//! Persistable records and dirty tracking.
//!
//! An entity type declares its table name and column list once, by
//! implementing [`Entity`]. Each instance wraps a [`Record`]: the row id
//! (present once stored), the current value of every assigned column, and
//! the set of columns modified since the last successful save.
//!
//! Values are kept in their encoded (SQLite) form, so assigning a value that
//! encodes identically to the current one is a no-op and never produces an
//! UPDATE.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use rusqlite::types::Value;

use crate::column::{Column, ColumnDef};
use crate::column_type::ColumnValue;
use crate::error::{DbError, ValidationError};
use crate::facade::Db;

/// A record type mapped to one table.
///
/// Implementors provide the schema and access to their [`Record`]; every
/// other operation has a default implementation.
///
/// ```rust,ignore
/// struct Player(Record);
///
/// static NAME: LazyLock<Column<Player, String>> =
///     LazyLock::new(|| Column::new("name", ColumnType::varchar(16)));
///
/// impl Entity for Player {
///     const TABLE: &'static str = "players";
///     fn columns() -> Vec<ColumnDef> { vec![NAME.def().clone()] }
///     fn from_record(record: Record) -> Self { Player(record) }
///     fn record(&self) -> &Record { &self.0 }
///     fn record_mut(&mut self) -> &mut Record { &mut self.0 }
/// }
/// ```
pub trait Entity: Sized + Send + 'static {
    /// Logical table name; the configured prefix is prepended to it.
    const TABLE: &'static str;

    /// Declares the entity's columns, excluding the reserved `id`.
    ///
    /// Called at most once per process; the result is cached.
    fn columns() -> Vec<ColumnDef>;

    /// Wraps a record.
    fn from_record(record: Record) -> Self;

    /// The wrapped record.
    fn record(&self) -> &Record;

    /// The wrapped record, mutably.
    fn record_mut(&mut self) -> &mut Record;

    /// A new, unsaved instance with defaults pre-filled and every pre-filled
    /// column marked modified.
    fn create() -> Self {
        Self::from_record(Record::fresh(descriptors::<Self>()))
    }

    /// Typed descriptor of the reserved id column.
    fn id_column() -> Column<Self, i64> {
        Column::id()
    }

    /// Row id, once stored.
    fn id(&self) -> Option<i64> {
        self.record().id()
    }

    /// Whether the instance corresponds to a stored row.
    fn is_stored(&self) -> bool {
        self.record().is_stored()
    }

    /// Assigns a column. Pass `None` to assign null.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Validation`] if the value is null for a `NOT NULL`
    /// column or is refused by the column type, [`DbError::Conversion`] if
    /// a codec fails, and [`DbError::Logic`] if the column is not one of
    /// this entity's declared columns.
    fn set<T: ColumnValue>(
        &mut self,
        column: &Column<Self, T>,
        value: impl Into<Option<T>>,
    ) -> Result<(), DbError> {
        let encoded = column.encode(value.into().as_ref())?;
        self.record_mut().assign(column.name(), encoded)
    }

    /// Reads a column; `None` means the column holds null.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Logic`] if the column was never assigned and
    /// [`DbError::Conversion`] if the stored value cannot be decoded.
    fn get<T: ColumnValue>(&self, column: &Column<Self, T>) -> Result<Option<T>, DbError> {
        let value = self.record().value(column.name()).ok_or_else(|| {
            DbError::Logic(format!(
                "column '{}' of '{}' has never been assigned",
                column.name(),
                Self::TABLE
            ))
        })?;
        column.decode(value.clone())
    }

    /// Reads a column that must not be null.
    fn require<T: ColumnValue>(&self, column: &Column<Self, T>) -> Result<T, DbError> {
        self.get(column)?.ok_or_else(|| {
            DbError::Logic(format!(
                "column '{}' of '{}' is null",
                column.name(),
                Self::TABLE
            ))
        })
    }

    /// Whether the column changed since the last save.
    fn is_modified<T: ColumnValue>(&self, column: &Column<Self, T>) -> bool {
        self.record().is_modified(column.name())
    }

    /// Columns changed since the last save, in declaration order.
    fn modified_columns(&self) -> Vec<&'static str> {
        self.record().modified_columns()
    }

    /// Whether every declared column holds a value allowed by its
    /// nullability.
    fn is_valid_for_save(&self) -> bool {
        self.record().is_valid_for_save()
    }

    /// Inserts or updates the row. See [`Db::save`].
    fn save(&mut self, db: &Db) -> Result<(), DbError> {
        db.save(self)
    }

    /// Deletes the row. See [`Db::remove`].
    fn delete(&mut self, db: &Db) -> Result<(), DbError> {
        db.remove(self)
    }
}

/// The column descriptors of `E`, derived once per process.
pub(crate) fn descriptors<E: Entity>() -> Arc<[ColumnDef]> {
    static CACHE: OnceLock<Mutex<HashMap<TypeId, Arc<[ColumnDef]>>>> = OnceLock::new();

    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cache = match cache.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("column descriptor cache lock poisoned, recovering");
            poisoned.into_inner()
        }
    };
    Arc::clone(
        cache
            .entry(TypeId::of::<E>())
            .or_insert_with(|| E::columns().into()),
    )
}

/// State of one entity instance.
#[derive(Clone)]
pub struct Record {
    columns: Arc<[ColumnDef]>,
    id: Option<i64>,
    values: HashMap<&'static str, Value>,
    dirty: HashSet<&'static str>,
}

impl Record {
    /// A not-yet-stored record: defaults pre-filled (null for nullable
    /// columns without one) and every pre-filled column marked modified.
    pub(crate) fn fresh(columns: Arc<[ColumnDef]>) -> Self {
        let mut values = HashMap::new();
        for column in columns.iter() {
            if let Some(default) = column.default_value() {
                values.insert(column.name(), default.clone());
            } else if column.is_nullable() {
                values.insert(column.name(), Value::Null);
            }
        }
        let dirty = values.keys().copied().collect();
        Self {
            columns,
            id: None,
            values,
            dirty,
        }
    }

    /// A hydration target for a fetched row. The mapper overwrites fields
    /// with [`load`](Self::load) and finishes with [`mark_clean`](Self::mark_clean).
    pub(crate) fn hydrate(columns: Arc<[ColumnDef]>, id: i64) -> Self {
        let mut record = Self::fresh(columns);
        record.id = Some(id);
        record
    }

    pub(crate) fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name() == name)
    }

    /// Assigns a value, marking the column modified only if it changed.
    pub(crate) fn assign(&mut self, name: &'static str, value: Value) -> Result<(), DbError> {
        if self.column(name).is_none() {
            return Err(DbError::Logic(format!(
                "column '{name}' is not declared by this entity"
            )));
        }
        if self.values.get(name) != Some(&value) {
            self.values.insert(name, value);
            self.dirty.insert(name);
        }
        Ok(())
    }

    /// Hydration variant of [`assign`](Self::assign) that never marks dirty.
    pub(crate) fn load(&mut self, name: &'static str, value: Value) {
        self.values.insert(name, value);
        self.dirty.remove(name);
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty.clear();
    }

    /// Records a successful insert.
    pub(crate) fn mark_stored(&mut self, id: i64) {
        self.id = Some(id);
        self.dirty.clear();
    }

    /// Records a delete: the instance may be saved again as a new row.
    pub(crate) fn mark_deleted(&mut self) {
        self.id = None;
        self.dirty = self.values.keys().copied().collect();
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn is_stored(&self) -> bool {
        self.id.is_some()
    }

    /// Declared columns, excluding `id`.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Encoded value of a column, if assigned.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn is_modified(&self, name: &str) -> bool {
        self.dirty.contains(name)
    }

    /// Modified columns in declaration order.
    pub fn modified_columns(&self) -> Vec<&'static str> {
        self.columns
            .iter()
            .map(ColumnDef::name)
            .filter(|name| self.dirty.contains(name))
            .collect()
    }

    /// Assigned columns in declaration order, with their values.
    pub(crate) fn assigned(&self) -> Vec<(&'static str, &Value)> {
        self.columns
            .iter()
            .filter_map(|c| self.values.get(c.name()).map(|v| (c.name(), v)))
            .collect()
    }

    /// Columns that are unassigned, or null although `NOT NULL`.
    pub fn missing_columns(&self) -> Vec<&'static str> {
        self.columns
            .iter()
            .filter(|c| match self.values.get(c.name()) {
                None => true,
                Some(Value::Null) => !c.is_nullable(),
                Some(_) => false,
            })
            .map(ColumnDef::name)
            .collect()
    }

    pub fn is_valid_for_save(&self) -> bool {
        self.missing_columns().is_empty()
    }

    pub(crate) fn incomplete(&self, table: &str) -> ValidationError {
        ValidationError::Incomplete {
            table: table.to_string(),
            missing: self
                .missing_columns()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id)
            .field("values", &self.assigned())
            .field("modified", &self.modified_columns())
            .finish()
    }
}
