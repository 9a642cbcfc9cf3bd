//! WHERE-clause algebra.
//!
//! A [`Predicate`] is a small expression tree built from column methods
//! (`eq`, `is_in`, `like`, …) and combined with AND/OR chains. Serialising it
//! needs no connection: [`Predicate::to_sql`] yields the SQL fragment and
//! the parameters for its `?` placeholders, in textual order. The same
//! predicate type is accepted by SELECT, COUNT, DELETE and UPDATE.

use std::fmt;
use std::marker::PhantomData;

use rusqlite::types::Value;

use crate::error::{ConversionError, DbError};
use crate::value::quote_ident;

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Geq,
    Lt,
    Leq,
}

impl CompareOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Gt => ">",
            Self::Geq => ">=",
            Self::Lt => "<",
            Self::Leq => "<=",
        }
    }
}

/// Logical connective of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOp {
    And,
    Or,
}

impl ChainOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::And => " AND ",
            Self::Or => " OR ",
        }
    }
}

/// A serialised predicate: SQL text and the values for its placeholders.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlFragment {
    /// SQL with `?` placeholders.
    pub sql: String,
    /// One value per placeholder, left to right.
    pub params: Vec<Value>,
}

type Operand = Result<Value, ConversionError>;

#[derive(Debug, Clone)]
enum Node {
    Comparison {
        column: &'static str,
        op: CompareOp,
        value: Operand,
    },
    Membership {
        column: &'static str,
        values: Vec<Operand>,
    },
    Pattern {
        column: &'static str,
        pattern: String,
    },
    NullCheck {
        column: &'static str,
        is_null: bool,
    },
    Chain {
        op: ChainOp,
        items: Vec<Node>,
    },
}

/// A boolean expression over the columns of entity `E`.
pub struct Predicate<E> {
    node: Node,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Predicate<E> {
    fn from_node(node: Node) -> Self {
        Self {
            node,
            _entity: PhantomData,
        }
    }

    pub(crate) fn comparison(column: &'static str, op: CompareOp, value: Operand) -> Self {
        Self::from_node(Node::Comparison { column, op, value })
    }

    pub(crate) fn membership(column: &'static str, values: Vec<Operand>) -> Self {
        Self::from_node(Node::Membership { column, values })
    }

    pub(crate) fn pattern(column: &'static str, pattern: String) -> Self {
        Self::from_node(Node::Pattern { column, pattern })
    }

    pub(crate) fn null_check(column: &'static str, is_null: bool) -> Self {
        Self::from_node(Node::NullCheck { column, is_null })
    }

    /// AND chain over `predicates`. Serialising an empty chain is an error.
    pub fn all(predicates: impl IntoIterator<Item = Predicate<E>>) -> Self {
        Self::chain(ChainOp::And, predicates)
    }

    /// OR chain over `predicates`. Serialising an empty chain is an error.
    pub fn any(predicates: impl IntoIterator<Item = Predicate<E>>) -> Self {
        Self::chain(ChainOp::Or, predicates)
    }

    fn chain(op: ChainOp, predicates: impl IntoIterator<Item = Predicate<E>>) -> Self {
        Self::from_node(Node::Chain {
            op,
            items: predicates.into_iter().map(|p| p.node).collect(),
        })
    }

    /// `self AND other`; extends `self` if it already is an AND chain.
    pub fn and(self, other: Predicate<E>) -> Self {
        self.join(ChainOp::And, other)
    }

    /// `self OR other`; extends `self` if it already is an OR chain.
    pub fn or(self, other: Predicate<E>) -> Self {
        self.join(ChainOp::Or, other)
    }

    fn join(self, op: ChainOp, other: Predicate<E>) -> Self {
        match self.node {
            Node::Chain { op: own, mut items } if own == op => {
                items.push(other.node);
                Self::from_node(Node::Chain { op, items })
            }
            node => Self::from_node(Node::Chain {
                op,
                items: vec![node, other.node],
            }),
        }
    }

    /// Serialises the predicate.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Logic`] if any chain is empty and
    /// [`DbError::Conversion`] if an operand failed to encode when the
    /// predicate was built.
    pub fn to_sql(&self) -> Result<SqlFragment, DbError> {
        let mut fragment = SqlFragment::default();
        render(&self.node, &mut fragment)?;
        Ok(fragment)
    }
}

fn render(node: &Node, out: &mut SqlFragment) -> Result<(), DbError> {
    match node {
        Node::Comparison { column, op, value } => {
            out.sql
                .push_str(&format!("{} {} ?", quote_ident(column), op.as_sql()));
            out.params.push(value.clone()?);
        }
        Node::Membership { column, values } => {
            if values.is_empty() {
                // `IN ()` is a syntax error; this matches no row instead.
                out.sql.push_str("1 = 0");
                return Ok(());
            }
            let placeholders = vec!["?"; values.len()].join(", ");
            out.sql
                .push_str(&format!("{} IN ({placeholders})", quote_ident(column)));
            for value in values {
                out.params.push(value.clone()?);
            }
        }
        Node::Pattern { column, pattern } => {
            out.sql
                .push_str(&format!("{} LIKE ? ESCAPE '\\'", quote_ident(column)));
            out.params.push(Value::Text(pattern.clone()));
        }
        Node::NullCheck { column, is_null } => {
            let test = if *is_null { "IS NULL" } else { "IS NOT NULL" };
            out.sql.push_str(&format!("{} {test}", quote_ident(column)));
        }
        Node::Chain { op, items } => {
            if items.is_empty() {
                return Err(DbError::Logic(format!(
                    "cannot serialise an empty{}chain",
                    op.as_sql()
                )));
            }
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.sql.push_str(op.as_sql());
                }
                out.sql.push('(');
                render(item, out)?;
                out.sql.push(')');
            }
        }
    }
    Ok(())
}

/// Escapes `\`, `%` and `_` so `text` matches literally inside a LIKE
/// pattern built by the caller.
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl<E> Clone for Predicate<E> {
    fn clone(&self) -> Self {
        Self::from_node(self.node.clone())
    }
}

impl<E> fmt::Debug for Predicate<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.node.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Column;
    use crate::column_type::ColumnType;

    struct Player;

    fn name() -> Column<Player, String> {
        Column::new("name", ColumnType::varchar(16))
    }

    fn score() -> Column<Player, i32> {
        Column::new("score", ColumnType::integer()).nullable()
    }

    #[test]
    fn comparison_binds_exactly_one_parameter() {
        let fragment = score().eq(42).to_sql().expect("should serialise");
        assert_eq!(fragment.sql, "`score` = ?");
        assert_eq!(fragment.params, vec![Value::Integer(42)]);

        let fragment = score().geq(3).to_sql().expect("should serialise");
        assert_eq!(fragment.sql, "`score` >= ?");
    }

    #[test]
    fn comparison_allows_values_outside_the_column_width() {
        let fragment = name()
            .eq("a name far longer than sixteen characters")
            .to_sql()
            .expect("comparisons are not width-checked");
        assert_eq!(fragment.params.len(), 1);
    }

    #[test]
    fn empty_membership_matches_nothing_without_parameters() {
        let fragment = score()
            .is_in(Vec::<i32>::new())
            .to_sql()
            .expect("should serialise");
        assert_eq!(fragment.sql, "1 = 0");
        assert!(fragment.params.is_empty());
    }

    #[test]
    fn membership_binds_one_parameter_per_element() {
        let fragment = score().is_in([3, 1, 2]).to_sql().expect("should serialise");
        assert_eq!(fragment.sql, "`score` IN (?, ?, ?)");
        assert_eq!(
            fragment.params,
            vec![Value::Integer(3), Value::Integer(1), Value::Integer(2)]
        );
    }

    #[test]
    fn pattern_and_null_checks() {
        let fragment = name().like("ab%").to_sql().expect("should serialise");
        assert_eq!(fragment.sql, "`name` LIKE ? ESCAPE '\\'");
        assert_eq!(fragment.params, vec![Value::Text("ab%".into())]);

        let fragment = score().is_null().to_sql().expect("should serialise");
        assert_eq!(fragment.sql, "`score` IS NULL");
        assert!(fragment.params.is_empty());

        let fragment = name().is_not_null().to_sql().expect("should serialise");
        assert_eq!(fragment.sql, "`name` IS NOT NULL");
    }

    #[test]
    fn chains_parenthesise_children_and_keep_parameter_order() {
        let predicate = name()
            .eq("abc")
            .and(Predicate::any([score().lt(10), score().is_null()]));
        let fragment = predicate.to_sql().expect("should serialise");
        assert_eq!(
            fragment.sql,
            "(`name` = ?) AND ((`score` < ?) OR (`score` IS NULL))"
        );
        assert_eq!(
            fragment.params,
            vec![Value::Text("abc".into()), Value::Integer(10)]
        );
    }

    #[test]
    fn and_extends_an_existing_and_chain() {
        let predicate = score().gt(1).and(score().lt(9)).and(name().eq("x"));
        let fragment = predicate.to_sql().expect("should serialise");
        assert_eq!(fragment.sql, "(`score` > ?) AND (`score` < ?) AND (`name` = ?)");
    }

    #[test]
    fn empty_chain_is_an_error() {
        let err = Predicate::<Player>::all(Vec::new())
            .to_sql()
            .expect_err("empty chain must not serialise");
        assert!(matches!(err, DbError::Logic(_)));

        let nested = score().eq(1).or(Predicate::all(Vec::new()));
        assert!(nested.to_sql().is_err());
    }

    #[test]
    fn codec_failures_surface_on_serialisation() {
        let bad = Column::<Player, String>::new(
            "when",
            ColumnType::custom(ColumnType::text(), FailingCodec),
        );
        let err = bad.eq("x").to_sql().expect_err("codec fails");
        assert!(matches!(err, DbError::Conversion(ConversionError { column, .. }) if column == "when"));
    }

    struct FailingCodec;

    impl crate::column_type::Codec for FailingCodec {
        type Target = String;
        type Storage = String;

        fn to_storage(&self, _: &String) -> Result<String, String> {
            Err("always fails".to_string())
        }

        fn from_storage(&self, stored: String) -> Result<String, String> {
            Ok(stored)
        }
    }

    #[test]
    fn escape_like_neutralises_wildcards() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        let pattern = format!("{}%", escape_like("a_b"));
        let fragment = name().like(pattern).to_sql().expect("should serialise");
        assert_eq!(fragment.params, vec![Value::Text("a\\_b%".into())]);
    }
}
