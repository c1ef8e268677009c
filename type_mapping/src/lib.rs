//! Unified value mapping between the JSON value currency and typed SQL values
//! This crate provides the binding and decoding classification used across the relhaus ecosystem

pub mod convert;
pub mod sql;
pub mod types;

pub use convert::{is_text_value, json_to_postgres_value, postgres_value_to_json};
pub use sql::{ColumnKind, pg_type_to_column_kind};
pub use types::PostgresValue;
