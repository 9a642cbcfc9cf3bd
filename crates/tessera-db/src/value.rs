//! Native value types and their SQLite representation.

use std::fmt;

use rusqlite::types::Value;

/// A Rust type SQLite can store without a codec.
pub trait Storable: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Converts the value into its SQLite representation.
    fn to_value(&self) -> Value;

    /// Reads the value back from SQLite.
    ///
    /// # Errors
    ///
    /// Returns a description of the mismatch when `value` has the wrong
    /// storage class or does not fit in `Self`.
    fn from_value(value: Value) -> Result<Self, String>;
}

macro_rules! storable_integer {
    ($($ty:ty),*) => {
        $(
            impl Storable for $ty {
                fn to_value(&self) -> Value {
                    Value::Integer(i64::from(*self))
                }

                fn from_value(value: Value) -> Result<Self, String> {
                    match value {
                        Value::Integer(n) => <$ty>::try_from(n)
                            .map_err(|_| format!("{n} is out of range for {}", stringify!($ty))),
                        other => Err(format!("expected integer, found {}", storage_class(&other))),
                    }
                }
            }
        )*
    };
}

storable_integer!(i8, i16, i32, i64);

impl Storable for bool {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }

    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Integer(n) => Ok(n != 0),
            other => Err(format!("expected boolean, found {}", storage_class(&other))),
        }
    }
}

impl Storable for f64 {
    fn to_value(&self) -> Value {
        Value::Real(*self)
    }

    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Real(r) => Ok(r),
            // SQLite may hand back whole reals as integers.
            Value::Integer(n) => Ok(n as f64),
            other => Err(format!("expected real, found {}", storage_class(&other))),
        }
    }
}

impl Storable for f32 {
    fn to_value(&self) -> Value {
        Value::Real(f64::from(*self))
    }

    fn from_value(value: Value) -> Result<Self, String> {
        f64::from_value(value).map(|r| r as f32)
    }
}

impl Storable for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(format!("expected text, found {}", storage_class(&other))),
        }
    }
}

impl Storable for Vec<u8> {
    fn to_value(&self) -> Value {
        Value::Blob(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Blob(b) => Ok(b),
            other => Err(format!("expected blob, found {}", storage_class(&other))),
        }
    }
}

/// Name of the SQLite storage class holding `value`.
pub(crate) fn storage_class(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Integer(_) => "integer",
        Value::Real(_) => "real",
        Value::Text(_) => "text",
        Value::Blob(_) => "blob",
    }
}

/// Renders `value` as an SQL literal.
///
/// Only used where SQLite refuses bound parameters, i.e. `DEFAULT` clauses
/// in `CREATE TABLE`.
pub(crate) fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(n) => n.to_string(),
        Value::Real(r) if r.is_nan() => "NULL".to_string(),
        // SQLite has no infinity literal; an overflowing one parses as it.
        Value::Real(r) if *r == f64::INFINITY => "9e999".to_string(),
        Value::Real(r) if *r == f64::NEG_INFINITY => "-9e999".to_string(),
        Value::Real(r) => {
            let text = r.to_string();
            if text.contains(['.', 'e', 'E']) {
                text
            } else {
                format!("{text}.0")
            }
        }
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Blob(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
            format!("X'{hex}'")
        }
    }
}

/// Quotes an identifier with backticks, doubling embedded backticks.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
