use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row, TypeInfo};
use std::sync::Arc;
use type_mapping::{json_to_postgres_value, pg_type_to_column_kind, postgres_value_to_json, ColumnKind, PostgresValue};

use super::{ConnectionSource, SqlRow};
use crate::errors::MapperError;
use crate::query_builder::Statement;

// Shared parameter binding by value kind
macro_rules! bind_json_param {
    ($query:expr, $param:expr) => {
        match json_to_postgres_value($param) {
            PostgresValue::Text(s) => $query.bind(s),
            PostgresValue::Integer(i) => $query.bind(i),
            PostgresValue::BigInt(i) => $query.bind(i),
            PostgresValue::SmallInt(i) => $query.bind(i),
            PostgresValue::Float(f) => $query.bind(f),
            PostgresValue::Boolean(b) => $query.bind(b),
            PostgresValue::Uuid(u) => $query.bind(u),
            PostgresValue::Timestamp(ts) => $query.bind(ts),
            PostgresValue::Date(d) => $query.bind(d),
            PostgresValue::Decimal(s) => $query.bind(s),
            PostgresValue::Json(v) => $query.bind(sqlx::types::Json(v)),
            PostgresValue::Null => $query.bind(Option::<String>::None),
        }
    };
}

/// [`ConnectionSource`] over a `sqlx` Postgres pool
#[derive(Debug, Clone)]
pub struct PgConnectionSource {
    pool: PgPool,
}

impl PgConnectionSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn build_query(statement: &Statement) -> Query<'_, Postgres, PgArguments> {
    let mut query = sqlx::query(&statement.sql);
    for param in &statement.params {
        query = bind_json_param!(query, param);
    }
    query
}

fn decode_column(row: &PgRow, index: usize) -> Result<Value, sqlx::Error> {
    let type_name = row.columns()[index].type_info().name().to_string();
    let value = match pg_type_to_column_kind(&type_name) {
        ColumnKind::SmallInt => row.try_get::<Option<i16>, _>(index)?.map(PostgresValue::SmallInt),
        ColumnKind::Integer => row.try_get::<Option<i32>, _>(index)?.map(PostgresValue::Integer),
        ColumnKind::BigInt => row.try_get::<Option<i64>, _>(index)?.map(PostgresValue::BigInt),
        ColumnKind::Real => row
            .try_get::<Option<f32>, _>(index)?
            .map(|f| PostgresValue::Float(f as f64)),
        ColumnKind::Double => row.try_get::<Option<f64>, _>(index)?.map(PostgresValue::Float),
        ColumnKind::Boolean => row.try_get::<Option<bool>, _>(index)?.map(PostgresValue::Boolean),
        ColumnKind::Text => row.try_get::<Option<String>, _>(index)?.map(PostgresValue::Text),
        ColumnKind::Uuid => row.try_get::<Option<uuid::Uuid>, _>(index)?.map(PostgresValue::Uuid),
        ColumnKind::TimestampTz => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
            .map(PostgresValue::Timestamp),
        ColumnKind::Timestamp => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)?
            .map(|ts| PostgresValue::Timestamp(ts.and_utc())),
        ColumnKind::Date => row.try_get::<Option<chrono::NaiveDate>, _>(index)?.map(PostgresValue::Date),
        ColumnKind::Json => row.try_get::<Option<Value>, _>(index)?.map(PostgresValue::Json),
        ColumnKind::Numeric => row
            .try_get::<Option<rust_decimal::Decimal>, _>(index)?
            .map(|d| PostgresValue::Decimal(d.to_string())),
        ColumnKind::Unknown => {
            tracing::warn!(column = index, pg_type = %type_name, "decoding column of unmapped type as text");
            row.try_get_unchecked::<Option<String>, _>(index)?
                .map(PostgresValue::Text)
        }
    };
    Ok(postgres_value_to_json(value.unwrap_or(PostgresValue::Null)))
}

fn decode_row(row: &PgRow, labels: &mut Option<Arc<Vec<String>>>) -> Result<SqlRow, sqlx::Error> {
    let columns = labels
        .get_or_insert_with(|| Arc::new(row.columns().iter().map(|c| c.name().to_string()).collect()))
        .clone();
    let values = (0..columns.len())
        .map(|index| decode_column(row, index))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SqlRow::new(columns, values))
}

#[async_trait]
impl ConnectionSource for PgConnectionSource {
    async fn fetch(&self, statement: &Statement) -> Result<Vec<SqlRow>, MapperError> {
        crate::debug_log!(
            "Fetching ({} params, streaming: {}): {}",
            statement.params.len(),
            statement.streaming,
            statement.sql
        );
        let wrap = |e: sqlx::Error| MapperError::statement(&statement.sql, None, e);
        let mut conn = self.pool.acquire().await.map_err(wrap)?;
        let mut labels = None;

        if statement.streaming {
            let mut rows = Vec::new();
            let mut stream = build_query(statement).fetch(&mut *conn);
            while let Some(row) = stream.try_next().await.map_err(wrap)? {
                rows.push(decode_row(&row, &mut labels).map_err(wrap)?);
            }
            Ok(rows)
        } else {
            let rows = build_query(statement)
                .fetch_all(&mut *conn)
                .await
                .map_err(wrap)?;
            rows.iter()
                .map(|row| decode_row(row, &mut labels).map_err(wrap))
                .collect()
        }
    }

    async fn execute(&self, statement: &Statement) -> Result<u64, MapperError> {
        crate::debug_log!("Executing ({} params): {}", statement.params.len(), statement.sql);
        let table = statement.delete_target.as_deref();
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| MapperError::statement(&statement.sql, None, e))?;
        let result = build_query(statement)
            .execute(&mut *conn)
            .await
            .map_err(|e| MapperError::statement(&statement.sql, table, e))?;
        Ok(result.rows_affected())
    }

    async fn insert(&self, statement: &Statement) -> Result<Option<Value>, MapperError> {
        if statement.returning.is_none() {
            self.execute(statement).await?;
            return Ok(None);
        }
        crate::debug_log!("Inserting ({} params): {}", statement.params.len(), statement.sql);
        let wrap = |e: sqlx::Error| MapperError::statement(&statement.sql, None, e);
        let mut conn = self.pool.acquire().await.map_err(wrap)?;
        let row = build_query(statement)
            .fetch_one(&mut *conn)
            .await
            .map_err(wrap)?;
        let id = decode_column(&row, 0).map_err(wrap)?;
        Ok((!id.is_null()).then_some(id))
    }
}
