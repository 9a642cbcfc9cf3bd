//! Column types: the SQL declaration of a column paired with the Rust type it
//! holds.
//!
//! Native types map a [`Storable`] value straight onto a SQLite value. Types
//! SQLite cannot represent go through a [`Codec`], which translates to an
//! intermediate storable type first (see [`ColumnType::custom`]).
//!
//! Two column types are equal when they render the same SQL text, so
//! independently built descriptors are interchangeable.

use std::any::type_name;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::NaiveDate;
use rusqlite::types::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::value::{storage_class, Storable};

/// Bounds every in-memory column value satisfies.
pub trait ColumnValue: Clone + fmt::Debug + Send + Sync + 'static {}

impl<T: Clone + fmt::Debug + Send + Sync + 'static> ColumnValue for T {}

/// Why a value could not be turned into (or read back from) its stored form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TypeFailure {
    /// The column type does not accept the value at all.
    Rejected,
    /// A codec step failed.
    Conversion {
        from: &'static str,
        to: &'static str,
        reason: String,
    },
}

type EncodeFn<T> = dyn Fn(&T) -> Result<Value, TypeFailure> + Send + Sync;
type DecodeFn<T> = dyn Fn(Value) -> Result<T, TypeFailure> + Send + Sync;

/// A pluggable translation between an in-memory type and a storable one.
///
/// Both directions may fail; failures are reported as
/// [`ConversionError`](crate::ConversionError)s naming the column and both
/// types.
pub trait Codec: Send + Sync + 'static {
    /// The in-memory type exposed to callers.
    type Target: ColumnValue;
    /// The intermediate type actually written to the backend.
    type Storage: Storable;

    /// Translates an in-memory value into its intermediate form.
    fn to_storage(&self, value: &Self::Target) -> Result<Self::Storage, String>;

    /// Translates a stored intermediate value back into memory.
    fn from_storage(&self, stored: Self::Storage) -> Result<Self::Target, String>;
}

/// An enumeration persisted by variant name.
///
/// Enum values are always bound by their symbolic name, never an ordinal.
pub trait SqlEnum: Copy + fmt::Debug + Send + Sync + 'static {
    /// Every variant, in declaration order.
    const VARIANTS: &'static [Self];

    /// Stable name stored in the database.
    fn name(self) -> &'static str;

    /// Looks a variant up by its stored name.
    fn from_name(name: &str) -> Option<Self> {
        Self::VARIANTS.iter().copied().find(|v| v.name() == name)
    }

    /// Encodes the variant as a raw query parameter.
    fn to_param(self) -> Value {
        Value::Text(self.name().to_string())
    }
}

/// SQL declaration plus conversion logic for one in-memory type.
pub struct ColumnType<T> {
    declaration: String,
    allowed: Option<Vec<&'static str>>,
    intermediate: &'static str,
    encode: Arc<EncodeFn<T>>,
    param: Arc<EncodeFn<T>>,
    decode: Arc<DecodeFn<T>>,
}

impl<T: Storable> ColumnType<T> {
    fn native(declaration: String, accepts: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            declaration,
            allowed: None,
            intermediate: type_name::<T>(),
            encode: Arc::new(move |value: &T| {
                if accepts(value) {
                    Ok(value.to_value())
                } else {
                    Err(TypeFailure::Rejected)
                }
            }),
            param: Arc::new(|value: &T| -> Result<Value, TypeFailure> { Ok(value.to_value()) }),
            decode: Arc::new(|value: Value| {
                let from = storage_class(&value);
                T::from_value(value).map_err(|reason| TypeFailure::Conversion {
                    from,
                    to: type_name::<T>(),
                    reason,
                })
            }),
        }
    }
}

impl ColumnType<i8> {
    /// `TINYINT`
    pub fn tinyint() -> Self {
        Self::native("TINYINT".to_string(), |_| true)
    }
}

impl ColumnType<i16> {
    /// `SMALLINT`
    pub fn smallint() -> Self {
        Self::native("SMALLINT".to_string(), |_| true)
    }
}

impl ColumnType<i32> {
    /// `INTEGER`
    pub fn integer() -> Self {
        Self::native("INTEGER".to_string(), |_| true)
    }
}

impl ColumnType<i64> {
    /// `BIGINT`
    pub fn bigint() -> Self {
        Self::native("BIGINT".to_string(), |_| true)
    }

    /// The reserved id column. SQLite only aliases the rowid (and honours
    /// `AUTOINCREMENT`) for a column declared exactly `INTEGER`.
    pub(crate) fn row_id() -> Self {
        Self::native("INTEGER".to_string(), |_| true)
    }
}

impl ColumnType<f32> {
    /// `FLOAT`
    pub fn float() -> Self {
        Self::native("FLOAT".to_string(), |_| true)
    }
}

impl ColumnType<f64> {
    /// `DOUBLE`
    pub fn double() -> Self {
        Self::native("DOUBLE".to_string(), |_| true)
    }
}

impl ColumnType<bool> {
    /// `BOOLEAN`
    pub fn boolean() -> Self {
        Self::native("BOOLEAN".to_string(), |_| true)
    }
}

impl ColumnType<String> {
    /// `CHAR(n)`; accepts strings of at most `n` characters.
    pub fn char(n: usize) -> Self {
        Self::native(format!("CHAR({n})"), move |s: &String| s.chars().count() <= n)
    }

    /// `VARCHAR(n)`; accepts strings of at most `n` characters.
    pub fn varchar(n: usize) -> Self {
        Self::native(format!("VARCHAR({n})"), move |s: &String| s.chars().count() <= n)
    }

    /// `TEXT`
    pub fn text() -> Self {
        Self::native("TEXT".to_string(), |_| true)
    }
}

impl ColumnType<Vec<u8>> {
    /// `VARBINARY(n)`; accepts at most `n` bytes.
    pub fn varbinary(n: usize) -> Self {
        Self::native(format!("VARBINARY({n})"), move |b: &Vec<u8>| b.len() <= n)
    }

    /// `BLOB`
    pub fn blob() -> Self {
        Self::native("BLOB".to_string(), |_| true)
    }
}

impl<E: SqlEnum> ColumnType<E> {
    /// A column restricted to the names of `E`'s variants.
    pub fn enumeration() -> Self {
        let names: Vec<&'static str> = E::VARIANTS.iter().map(|v| v.name()).collect();
        let width = names.iter().map(|n| n.chars().count()).max().unwrap_or(1).max(1);
        Self {
            declaration: format!("VARCHAR({width})"),
            allowed: Some(names),
            intermediate: type_name::<String>(),
            encode: Arc::new(|value: &E| -> Result<Value, TypeFailure> { Ok(value.to_param()) }),
            param: Arc::new(|value: &E| -> Result<Value, TypeFailure> { Ok(value.to_param()) }),
            decode: Arc::new(|value: Value| match value {
                Value::Text(name) => E::from_name(&name).ok_or_else(|| TypeFailure::Conversion {
                    from: type_name::<String>(),
                    to: type_name::<E>(),
                    reason: format!("unknown variant '{name}'"),
                }),
                other => Err(TypeFailure::Conversion {
                    from: storage_class(&other),
                    to: type_name::<E>(),
                    reason: "enum values are stored as text".to_string(),
                }),
            }),
        }
    }
}

impl<T: ColumnValue> ColumnType<T> {
    /// Builds a column type whose values pass through `codec` before being
    /// stored as `base`.
    pub fn custom<C>(base: ColumnType<C::Storage>, codec: C) -> Self
    where
        C: Codec<Target = T>,
    {
        let codec = Arc::new(codec);
        let encode = Self::through_codec(Arc::clone(&codec), Arc::clone(&base.encode));
        let param = Self::through_codec(Arc::clone(&codec), Arc::clone(&base.param));
        let base_decode = Arc::clone(&base.decode);

        Self {
            declaration: base.declaration,
            allowed: base.allowed,
            intermediate: type_name::<C::Storage>(),
            encode,
            param,
            decode: Arc::new(move |value: Value| {
                let stored = base_decode(value)?;
                codec
                    .from_storage(stored)
                    .map_err(|reason| TypeFailure::Conversion {
                        from: type_name::<C::Storage>(),
                        to: type_name::<T>(),
                        reason,
                    })
            }),
        }
    }

    fn through_codec<C>(codec: Arc<C>, next: Arc<EncodeFn<C::Storage>>) -> Arc<EncodeFn<T>>
    where
        C: Codec<Target = T>,
    {
        Arc::new(move |value: &T| {
            let stored = codec
                .to_storage(value)
                .map_err(|reason| TypeFailure::Conversion {
                    from: type_name::<T>(),
                    to: type_name::<C::Storage>(),
                    reason,
                })?;
            next(&stored)
        })
    }

    /// The SQL type keyword and parameters, e.g. `VARCHAR(16)`.
    pub fn declaration(&self) -> &str {
        &self.declaration
    }

    /// Names a `CHECK ... IN (...)` constraint limits the column to, if any.
    pub fn allowed_values(&self) -> Option<&[&'static str]> {
        self.allowed.as_deref()
    }

    /// Name of the type handed to SQLite (the codec's storage type for
    /// custom columns).
    pub fn intermediate_type(&self) -> &'static str {
        self.intermediate
    }

    /// Whether `value` can be stored in a column of this type.
    pub fn accepts(&self, value: &T) -> bool {
        (self.encode)(value).is_ok()
    }

    pub(crate) fn encode(&self, value: &T) -> Result<Value, TypeFailure> {
        (self.encode)(value)
    }

    /// Encodes a comparison operand. Unlike [`encode`](Self::encode) this
    /// skips the acceptance check: comparing against an out-of-range value
    /// is legal and simply matches nothing.
    pub(crate) fn param(&self, value: &T) -> Result<Value, TypeFailure> {
        (self.param)(value)
    }

    pub(crate) fn decode(&self, value: Value) -> Result<T, TypeFailure> {
        (self.decode)(value)
    }
}

impl ColumnType<NaiveDate> {
    /// Calendar dates stored as ISO-8601 text in a `CHAR(10)`.
    pub fn date() -> Self {
        Self::custom(ColumnType::char(10), DateCodec)
    }
}

impl ColumnType<Uuid> {
    /// UUIDs stored in hyphenated form in a `CHAR(36)`.
    pub fn uuid() -> Self {
        Self::custom(ColumnType::char(36), UuidCodec)
    }
}

impl<T> ColumnType<T>
where
    T: Serialize + DeserializeOwned + ColumnValue,
{
    /// Any serde value object, stored as JSON `TEXT`.
    pub fn json() -> Self {
        Self::custom(ColumnType::text(), JsonCodec(PhantomData))
    }
}

impl<T> Clone for ColumnType<T> {
    fn clone(&self) -> Self {
        Self {
            declaration: self.declaration.clone(),
            allowed: self.allowed.clone(),
            intermediate: self.intermediate,
            encode: Arc::clone(&self.encode),
            param: Arc::clone(&self.param),
            decode: Arc::clone(&self.decode),
        }
    }
}

impl<T> fmt::Debug for ColumnType<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnType")
            .field("declaration", &self.declaration)
            .field("allowed", &self.allowed)
            .field("intermediate", &self.intermediate)
            .finish()
    }
}

impl<T> PartialEq for ColumnType<T> {
    fn eq(&self, other: &Self) -> bool {
        self.declaration == other.declaration && self.allowed == other.allowed
    }
}

impl<T> Eq for ColumnType<T> {}

impl<T> Hash for ColumnType<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.declaration.hash(state);
        self.allowed.hash(state);
    }
}

/// ISO-8601 (`YYYY-MM-DD`) dates.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateCodec;

impl Codec for DateCodec {
    type Target = NaiveDate;
    type Storage = String;

    fn to_storage(&self, value: &NaiveDate) -> Result<String, String> {
        Ok(value.format("%Y-%m-%d").to_string())
    }

    fn from_storage(&self, stored: String) -> Result<NaiveDate, String> {
        NaiveDate::parse_from_str(&stored, "%Y-%m-%d").map_err(|e| e.to_string())
    }
}

/// Hyphenated UUID text.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidCodec;

impl Codec for UuidCodec {
    type Target = Uuid;
    type Storage = String;

    fn to_storage(&self, value: &Uuid) -> Result<String, String> {
        Ok(value.hyphenated().to_string())
    }

    fn from_storage(&self, stored: String) -> Result<Uuid, String> {
        Uuid::parse_str(&stored).map_err(|e| e.to_string())
    }
}

/// JSON documents via `serde_json`.
pub struct JsonCodec<T>(PhantomData<fn() -> T>);

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + ColumnValue,
{
    type Target = T;
    type Storage = String;

    fn to_storage(&self, value: &T) -> Result<String, String> {
        serde_json::to_string(value).map_err(|e| e.to_string())
    }

    fn from_storage(&self, stored: String) -> Result<T, String> {
        serde_json::from_str(&stored).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Rank {
        Guest,
        Moderator,
    }

    impl SqlEnum for Rank {
        const VARIANTS: &'static [Self] = &[Rank::Guest, Rank::Moderator];

        fn name(self) -> &'static str {
            match self {
                Rank::Guest => "GUEST",
                Rank::Moderator => "MODERATOR",
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Position {
        x: i32,
        y: i32,
    }

    #[test]
    fn declarations_render_parameters() {
        assert_eq!(ColumnType::varchar(16).declaration(), "VARCHAR(16)");
        assert_eq!(ColumnType::char(36).declaration(), "CHAR(36)");
        assert_eq!(ColumnType::integer().declaration(), "INTEGER");
        assert_eq!(ColumnType::varbinary(8).declaration(), "VARBINARY(8)");
    }

    #[test]
    fn equality_is_defined_by_sql_text() {
        assert_eq!(ColumnType::varchar(16), ColumnType::varchar(16));
        assert_ne!(ColumnType::varchar(16), ColumnType::varchar(17));
        // A custom type over CHAR(36) renders the same SQL as its base.
        assert_eq!(ColumnType::uuid().declaration(), "CHAR(36)");
    }

    #[test]
    fn varchar_accepts_up_to_width() {
        let ty = ColumnType::varchar(3);
        assert!(ty.accepts(&"abc".to_string()));
        assert!(ty.accepts(&"äöü".to_string()));
        assert!(!ty.accepts(&"abcd".to_string()));
    }

    #[test]
    fn enumeration_stores_names() {
        let ty = ColumnType::<Rank>::enumeration();
        assert_eq!(ty.declaration(), "VARCHAR(9)");
        assert_eq!(ty.allowed_values(), Some(&["GUEST", "MODERATOR"][..]));
        assert_eq!(
            ty.encode(&Rank::Moderator),
            Ok(Value::Text("MODERATOR".into()))
        );
        assert_eq!(ty.decode(Value::Text("GUEST".into())), Ok(Rank::Guest));
        assert!(matches!(
            ty.decode(Value::Text("ADMIN".into())),
            Err(TypeFailure::Conversion { .. })
        ));
    }

    #[test]
    fn uuid_codec_round_trips_through_text() {
        let ty = ColumnType::uuid();
        let id = Uuid::new_v4();
        let stored = ty.encode(&id).expect("uuid should encode");
        assert_eq!(stored, Value::Text(id.hyphenated().to_string()));
        assert_eq!(ty.decode(stored), Ok(id));
        assert_eq!(ty.intermediate_type(), type_name::<String>());
    }

    #[test]
    fn codec_failure_names_both_types() {
        let ty = ColumnType::date();
        match ty.decode(Value::Text("not a date".into())) {
            Err(TypeFailure::Conversion { from, to, .. }) => {
                assert_eq!(from, type_name::<String>());
                assert_eq!(to, type_name::<NaiveDate>());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn json_codec_stores_documents_as_text() {
        let ty = ColumnType::<Position>::json();
        assert_eq!(ty.declaration(), "TEXT");
        let stored = ty
            .encode(&Position { x: 1, y: -2 })
            .expect("position should encode");
        assert_eq!(stored, Value::Text(r#"{"x":1,"y":-2}"#.into()));
        assert_eq!(ty.decode(stored), Ok(Position { x: 1, y: -2 }));
    }

    #[test]
    fn custom_types_respect_base_constraints() {
        // The base CHAR(10) bounds what the codec may produce.
        let ty = ColumnType::custom(ColumnType::char(2), DateCodec);
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date");
        assert!(!ty.accepts(&date));
    }
}
