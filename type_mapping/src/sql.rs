//! SQL type classification
//!
//! This module maps database column type names onto the kinds used
//! to decode result columns back into JSON values.

/// Decoding kind of a result column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Boolean,
    Text,
    Uuid,
    TimestampTz,
    Timestamp,
    Date,
    Json,
    Numeric,
    Unknown,
}

/// Map a PostgreSQL type name (as reported by the driver) to a decoding kind
pub fn pg_type_to_column_kind(pg_type: &str) -> ColumnKind {
    match pg_type.to_ascii_uppercase().as_str() {
        "INT2" | "SMALLINT" | "SMALLSERIAL" => ColumnKind::SmallInt,
        "INT4" | "INT" | "INTEGER" | "SERIAL" => ColumnKind::Integer,
        "INT8" | "BIGINT" | "BIGSERIAL" => ColumnKind::BigInt,
        "FLOAT4" | "REAL" => ColumnKind::Real,
        "FLOAT8" | "DOUBLE PRECISION" => ColumnKind::Double,
        "BOOL" | "BOOLEAN" => ColumnKind::Boolean,
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "CITEXT" => ColumnKind::Text,
        "UUID" => ColumnKind::Uuid,
        "TIMESTAMPTZ" => ColumnKind::TimestampTz,
        "TIMESTAMP" => ColumnKind::Timestamp,
        "DATE" => ColumnKind::Date,
        "JSON" | "JSONB" => ColumnKind::Json,
        "NUMERIC" | "DECIMAL" => ColumnKind::Numeric,
        _ => ColumnKind::Unknown,
    }
}
