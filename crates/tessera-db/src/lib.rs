//! Embedded object-relational mapping for Tessera.
//!
//! Entity types declare their table and typed columns once; the engine
//! creates tables on first use, tracks which columns each instance changed,
//! and turns a small predicate algebra into parameterised SQL. Everything
//! runs on a single SQLite connection owned by [`Db`].
//!
//! # Design decisions
//!
//! - **SQLite via `rusqlite`**: the store is a single file next to the
//!   process, opened in WAL mode. Connections are produced by
//!   `r2d2_sqlite`'s manager, which also provides the liveness check.
//! - **Explicit column registration**: [`Entity::columns`] returns the
//!   column list; it is evaluated once per type and cached.
//! - **Encoded dirty tracking**: records store SQLite values, so an
//!   assignment that encodes to the current value never triggers an UPDATE.
//! - **Values are always bound**: user data reaches SQL only as `?`
//!   parameters. Table `DEFAULT`s are the one exception, rendered as escaped
//!   literals because SQLite refuses parameters in DDL.

mod column;
mod column_type;
mod connection;
mod entity;
mod error;
mod facade;
mod order;
mod predicate;
mod schema;
mod select;
mod stats;
mod update;
mod value;

pub use column::{Column, ColumnDef, ID_COLUMN};
pub use column_type::{Codec, ColumnType, ColumnValue, DateCodec, JsonCodec, SqlEnum, UuidCodec};
pub use connection::{ConnectionGuard, ConnectionManager, DbSettings};
pub use entity::{Entity, Record};
pub use error::{ConversionError, DbError, ValidationError};
pub use facade::Db;
pub use order::{Direction, Order};
pub use predicate::{escape_like, ChainOp, CompareOp, Predicate, SqlFragment};
pub use schema::{SchemaRegistry, TableSchema};
pub use select::Select;
pub use stats::DbStats;
pub use update::UpdateBuilder;
pub use value::Storable;

pub use rusqlite::types::Value;
