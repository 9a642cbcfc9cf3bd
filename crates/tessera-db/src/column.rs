//! Column descriptors.
//!
//! A [`Column<E, T>`] is an immutable, typed handle on one column of entity
//! `E`. It never evaluates anything: its comparison methods only build
//! [`Predicate`] nodes. [`ColumnDef`] is the same descriptor with the value
//! type erased, which is what the schema registry and row mapper work with.

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use rusqlite::types::Value;

use crate::column_type::{ColumnType, ColumnValue, TypeFailure};
use crate::error::{ConversionError, DbError, ValidationError};
use crate::predicate::{CompareOp, Predicate};
use crate::value::{quote_ident, sql_literal};

/// Name of the reserved identity column every table carries.
pub const ID_COLUMN: &str = "id";

type CheckFn = dyn Fn(Value) -> Result<(), TypeFailure> + Send + Sync;

#[derive(Clone)]
struct ColumnInfo {
    name: &'static str,
    sql_type: String,
    allowed: Option<Vec<&'static str>>,
    nullable: bool,
    auto_increment: bool,
    default: Option<Result<Value, String>>,
    value_type: &'static str,
    check: Arc<CheckFn>,
}

/// A column descriptor with its value type erased.
#[derive(Clone)]
pub struct ColumnDef(Arc<ColumnInfo>);

impl ColumnDef {
    /// Column name.
    pub fn name(&self) -> &'static str {
        self.0.name
    }

    /// SQL type keyword, e.g. `VARCHAR(16)`.
    pub fn sql_type(&self) -> &str {
        &self.0.sql_type
    }

    /// Whether the column accepts null.
    pub fn is_nullable(&self) -> bool {
        self.0.nullable
    }

    /// Whether the backend generates the column's value.
    pub fn is_auto_increment(&self) -> bool {
        self.0.auto_increment
    }

    /// The encoded default value, if one was declared and could be encoded.
    pub fn default_value(&self) -> Option<&Value> {
        match &self.0.default {
            Some(Ok(value)) => Some(value),
            _ => None,
        }
    }

    /// Rust type name of the column's in-memory values.
    pub fn value_type(&self) -> &'static str {
        self.0.value_type
    }

    /// The column clause used inside `CREATE TABLE`.
    pub fn declaration(&self) -> String {
        let info = &*self.0;
        let name = quote_ident(info.name);
        let mut sql = format!("{name} {}", info.sql_type);

        if info.auto_increment {
            sql.push_str(" NOT NULL PRIMARY KEY AUTOINCREMENT");
            return sql;
        }

        sql.push_str(if info.nullable { " NULL" } else { " NOT NULL" });

        if let Some(allowed) = &info.allowed {
            let values: Vec<String> = allowed
                .iter()
                .map(|v| sql_literal(&Value::Text((*v).to_string())))
                .collect();
            sql.push_str(&format!(" CHECK ({name} IN ({}))", values.join(", ")));
        }

        if let Some(Ok(default)) = &info.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&sql_literal(default));
        }

        sql
    }

    /// Returns the reason the declared default could not be encoded.
    pub(crate) fn default_error(&self) -> Option<&str> {
        match &self.0.default {
            Some(Err(reason)) => Some(reason),
            _ => None,
        }
    }

    /// Verifies a value read from the backend decodes into the column type.
    pub(crate) fn check_stored(&self, value: &Value) -> Result<(), DbError> {
        if matches!(value, Value::Null) {
            return Ok(());
        }
        (self.0.check)(value.clone()).map_err(|failure| self.failure(failure))
    }

    fn failure(&self, failure: TypeFailure) -> DbError {
        match failure {
            TypeFailure::Rejected => ValidationError::Rejected {
                column: self.0.name.to_string(),
                expected: self.0.sql_type.clone(),
                actual: self.0.value_type,
            }
            .into(),
            TypeFailure::Conversion { from, to, reason } => ConversionError {
                column: self.0.name.to_string(),
                from,
                to,
                reason,
            }
            .into(),
        }
    }
}

impl fmt::Debug for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDef")
            .field("name", &self.0.name)
            .field("sql_type", &self.0.sql_type)
            .field("nullable", &self.0.nullable)
            .field("auto_increment", &self.0.auto_increment)
            .field("default", &self.0.default)
            .finish()
    }
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.declaration())
    }
}

/// A typed column of entity `E` holding values of type `T`.
///
/// Columns are `NOT NULL` unless built with [`nullable`](Self::nullable).
pub struct Column<E, T> {
    def: ColumnDef,
    ty: ColumnType<T>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Column<E, i64> {
    /// Descriptor for the reserved, backend-generated `id` column.
    pub fn id() -> Self {
        let mut column = Self::new(ID_COLUMN, ColumnType::row_id());
        column.info_mut().auto_increment = true;
        column
    }
}

impl<E, T: ColumnValue> Column<E, T> {
    /// Declares a `NOT NULL` column without a default.
    pub fn new(name: &'static str, ty: ColumnType<T>) -> Self {
        let decode_ty = ty.clone();
        let info = ColumnInfo {
            name,
            sql_type: ty.declaration().to_string(),
            allowed: ty.allowed_values().map(<[_]>::to_vec),
            nullable: false,
            auto_increment: false,
            default: None,
            value_type: type_name::<T>(),
            check: Arc::new(move |value: Value| decode_ty.decode(value).map(|_| ())),
        };
        Self {
            def: ColumnDef(Arc::new(info)),
            ty,
            _entity: PhantomData,
        }
    }

    /// Allows null values.
    pub fn nullable(mut self) -> Self {
        self.info_mut().nullable = true;
        self
    }

    /// Declares the value new records start with and the table's `DEFAULT`.
    ///
    /// A default the column type refuses is remembered; table creation for
    /// the owning entity then fails with a schema error naming this column.
    pub fn with_default(mut self, value: T) -> Self {
        let encoded = self
            .ty
            .encode(&value)
            .map_err(|failure| match failure {
                TypeFailure::Rejected => format!("default rejected by {}", self.ty.declaration()),
                TypeFailure::Conversion { reason, .. } => reason,
            })
            .and_then(|encoded| match encoded {
                Value::Real(r) if r.is_nan() => Err("NaN has no SQL literal".to_string()),
                encoded => Ok(encoded),
            });
        self.info_mut().default = Some(encoded);
        self
    }

    fn info_mut(&mut self) -> &mut ColumnInfo {
        Arc::make_mut(&mut self.def.0)
    }

    /// Column name.
    pub fn name(&self) -> &'static str {
        self.def.name()
    }

    /// The erased descriptor.
    pub fn def(&self) -> &ColumnDef {
        &self.def
    }

    /// The column's type.
    pub fn column_type(&self) -> &ColumnType<T> {
        &self.ty
    }

    /// Whether the column accepts null.
    pub fn is_nullable(&self) -> bool {
        self.def.is_nullable()
    }

    /// Validates and encodes a value for assignment.
    pub(crate) fn encode(&self, value: Option<&T>) -> Result<Value, DbError> {
        match value {
            None if self.is_nullable() => Ok(Value::Null),
            None => Err(ValidationError::NullNotAllowed {
                column: self.name().to_string(),
                expected: self.ty.declaration().to_string(),
            }
            .into()),
            Some(value) => self
                .ty
                .encode(value)
                .map_err(|failure| self.def.failure(failure)),
        }
    }

    /// Decodes a stored value; SQL null becomes `None`.
    pub(crate) fn decode(&self, value: Value) -> Result<Option<T>, DbError> {
        if matches!(value, Value::Null) {
            return Ok(None);
        }
        self.ty
            .decode(value)
            .map(Some)
            .map_err(|failure| self.def.failure(failure))
    }

    fn operand(&self, value: &T) -> Result<Value, ConversionError> {
        self.ty.param(value).map_err(|failure| match failure {
            TypeFailure::Conversion { from, to, reason } => ConversionError {
                column: self.name().to_string(),
                from,
                to,
                reason,
            },
            TypeFailure::Rejected => ConversionError {
                column: self.name().to_string(),
                from: type_name::<T>(),
                to: self.ty.intermediate_type(),
                reason: "value rejected by column type".to_string(),
            },
        })
    }

    fn compare(&self, op: CompareOp, value: &T) -> Predicate<E> {
        Predicate::comparison(self.name(), op, self.operand(value))
    }

    /// `column = value`
    pub fn eq(&self, value: impl Into<T>) -> Predicate<E> {
        self.compare(CompareOp::Eq, &value.into())
    }

    /// `column != value`
    pub fn neq(&self, value: impl Into<T>) -> Predicate<E> {
        self.compare(CompareOp::Neq, &value.into())
    }

    /// `column > value`
    pub fn gt(&self, value: impl Into<T>) -> Predicate<E> {
        self.compare(CompareOp::Gt, &value.into())
    }

    /// `column >= value`
    pub fn geq(&self, value: impl Into<T>) -> Predicate<E> {
        self.compare(CompareOp::Geq, &value.into())
    }

    /// `column < value`
    pub fn lt(&self, value: impl Into<T>) -> Predicate<E> {
        self.compare(CompareOp::Lt, &value.into())
    }

    /// `column <= value`
    pub fn leq(&self, value: impl Into<T>) -> Predicate<E> {
        self.compare(CompareOp::Leq, &value.into())
    }

    /// `column LIKE pattern`. Use [`escape_like`](crate::escape_like) on
    /// literal fragments embedded in the pattern.
    pub fn like(&self, pattern: impl Into<String>) -> Predicate<E> {
        Predicate::pattern(self.name(), pattern.into())
    }

    /// `column IN (values…)`; an empty set matches no row.
    pub fn is_in<I>(&self, values: I) -> Predicate<E>
    where
        I: IntoIterator,
        I::Item: Into<T>,
    {
        let operands = values
            .into_iter()
            .map(|v| self.operand(&v.into()))
            .collect();
        Predicate::membership(self.name(), operands)
    }

    /// `column IS NULL`
    pub fn is_null(&self) -> Predicate<E> {
        self.null_check(true)
    }

    /// `column IS NOT NULL`
    pub fn is_not_null(&self) -> Predicate<E> {
        self.null_check(false)
    }

    fn null_check(&self, is_null: bool) -> Predicate<E> {
        if !self.is_nullable() {
            tracing::warn!(
                column = self.name(),
                "null check against a NOT NULL column always yields the same result"
            );
        }
        Predicate::null_check(self.name(), is_null)
    }
}

impl<E, T> Clone for Column<E, T> {
    fn clone(&self) -> Self {
        Self {
            def: self.def.clone(),
            ty: self.ty.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E, T> fmt::Debug for Column<E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("def", &self.def)
            .field("entity", &type_name::<E>())
            .finish()
    }
}
