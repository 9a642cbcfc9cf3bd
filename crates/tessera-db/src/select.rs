//! Options for row-returning queries.

use std::fmt;

use crate::order::Order;
use crate::predicate::Predicate;

/// Filter, ordering, and paging for [`Db::get_all`](crate::Db::get_all)
/// and friends. Every field is optional; [`Select::all`] selects every row.
pub struct Select<E> {
    /// WHERE clause.
    pub filter: Option<Predicate<E>>,
    /// ORDER BY clause.
    pub order: Option<Order<E>>,
    /// Maximum number of rows.
    pub limit: Option<u64>,
    /// Rows to skip.
    pub offset: Option<u64>,
}

impl<E> Select<E> {
    /// No filter, ordering, or paging.
    pub fn all() -> Self {
        Self {
            filter: None,
            order: None,
            limit: None,
            offset: None,
        }
    }

    /// Rows matching `predicate`.
    pub fn matching(predicate: Predicate<E>) -> Self {
        Self::all().filter(predicate)
    }

    pub fn filter(mut self, predicate: Predicate<E>) -> Self {
        self.filter = Some(predicate);
        self
    }

    pub fn order(mut self, order: Order<E>) -> Self {
        self.order = Some(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

impl<E> Default for Select<E> {
    fn default() -> Self {
        Self::all()
    }
}

impl<E> Clone for Select<E> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            order: self.order.clone(),
            limit: self.limit,
            offset: self.offset,
        }
    }
}

impl<E> fmt::Debug for Select<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Select")
            .field("filter", &self.filter)
            .field("order", &self.order)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .finish()
    }
}
