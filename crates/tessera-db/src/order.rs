//! ORDER BY specifications.

use std::fmt;
use std::marker::PhantomData;

use crate::column::Column;
use crate::column_type::ColumnValue;
use crate::value::quote_ident;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Ordered list of `(column, direction)` pairs for entity `E`.
pub struct Order<E> {
    keys: Vec<(&'static str, Direction)>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Order<E> {
    /// An empty ordering; renders no ORDER BY clause.
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            _entity: PhantomData,
        }
    }

    /// Appends an ascending key.
    pub fn asc<T: ColumnValue>(mut self, column: &Column<E, T>) -> Self {
        self.keys.push((column.def().name(), Direction::Asc));
        self
    }

    /// Appends a descending key.
    pub fn desc<T: ColumnValue>(mut self, column: &Column<E, T>) -> Self {
        self.keys.push((column.def().name(), Direction::Desc));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Renders the key list without the `ORDER BY` keyword, e.g.
    /// `` `score` DESC, `name` ASC ``.
    pub fn to_sql(&self) -> String {
        self.keys
            .iter()
            .map(|(name, dir)| format!("{} {}", quote_ident(name), dir.as_sql()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl<E> Default for Order<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Order<E> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> fmt::Debug for Order<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.keys).finish()
    }
}
