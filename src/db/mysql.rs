//! MySQL driver backed by an sqlx connection pool

use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Column, Connection, MySql, Row as _, TypeInfo};

use super::backend::{Backend, ExecSummary, Rows};
use super::value::{Row, SqlValue};
use super::DriverKind;
use crate::config::DatabaseConfig;
use crate::error::DbError;

pub struct MySqlBackend {
    pool: MySqlPool,
}

impl MySqlBackend {
    pub const fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Dial the configured server and verify the connection with a ping
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DbError> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.effective_port(DriverKind::MySql))
            .username(&config.user)
            .password(&config.password)
            .database(&config.name);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| DbError::connection(DriverKind::MySql, e))?;

        let backend = Self::new(pool);
        if let Err(e) = backend.ping().await {
            backend.pool.close().await;
            return Err(DbError::connection(DriverKind::MySql, e));
        }
        Ok(backend)
    }

    pub const fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

fn bind_args<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    args: &[SqlValue],
) -> Query<'q, MySql, MySqlArguments> {
    for arg in args {
        query = match arg.clone() {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(v) => query.bind(v),
            SqlValue::Int(v) => query.bind(v),
            SqlValue::Float(v) => query.bind(v),
            SqlValue::Text(v) => query.bind(v),
            SqlValue::Bytes(v) => query.bind(v),
            SqlValue::Date(v) => query.bind(v),
            SqlValue::Time(v) => query.bind(v),
            SqlValue::Timestamp(v) => query.bind(v),
            SqlValue::TimestampTz(v) => query.bind(v),
            SqlValue::Json(v) => query.bind(v),
        };
    }
    query
}

/// How a column is read, keyed by the server's type name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnClass {
    Date,
    Time,
    DateTime,
    Timestamp,
    Decimal,
    Json,
    Scalar,
}

impl ColumnClass {
    fn of(type_name: &str) -> Self {
        match type_name {
            "DATE" => Self::Date,
            "TIME" => Self::Time,
            "DATETIME" => Self::DateTime,
            "TIMESTAMP" => Self::Timestamp,
            "DECIMAL" => Self::Decimal,
            "JSON" => Self::Json,
            _ => Self::Scalar,
        }
    }
}

fn decode_value(row: &MySqlRow, idx: usize) -> Result<SqlValue, DbError> {
    let value = match ColumnClass::of(row.columns()[idx].type_info().name()) {
        ColumnClass::Date => row.try_get::<Option<NaiveDate>, _>(idx)?.map(SqlValue::Date),
        ColumnClass::Time => row.try_get::<Option<NaiveTime>, _>(idx)?.map(SqlValue::Time),
        ColumnClass::DateTime => row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(SqlValue::Timestamp),
        ColumnClass::Timestamp => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)?
            .map(SqlValue::TimestampTz),
        ColumnClass::Decimal => row
            .try_get::<Option<Decimal>, _>(idx)?
            .map(|d| SqlValue::Text(d.to_string())),
        ColumnClass::Json => row
            .try_get::<Option<serde_json::Value>, _>(idx)?
            .map(SqlValue::Json),
        ColumnClass::Scalar => return decode_scalar(row, idx),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

/// Decode a numeric, text or binary column by trying the widest types first
fn decode_scalar(row: &MySqlRow, idx: usize) -> Result<SqlValue, DbError> {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return Ok(v.map_or(SqlValue::Null, SqlValue::Int));
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return match v {
            None => Ok(SqlValue::Null),
            Some(v) => i64::try_from(v).map(SqlValue::Int).map_err(|e| DbError::Decode {
                column: row.columns()[idx].name().to_string(),
                reason: e.to_string(),
            }),
        };
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return Ok(v.map_or(SqlValue::Null, SqlValue::Float));
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return Ok(v.map_or(SqlValue::Null, |f| SqlValue::Float(f64::from(f))));
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return Ok(v.map_or(SqlValue::Null, SqlValue::Text));
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return Ok(v.map_or(SqlValue::Null, SqlValue::Bytes));
    }
    // ENUM, SET, BIT and spatial columns: keep the wire bytes
    row.try_get_unchecked::<Option<Vec<u8>>, _>(idx)
        .map(|v| v.map_or(SqlValue::Null, SqlValue::Bytes))
        .map_err(DbError::from)
}

fn decode_row(row: &MySqlRow, columns: &Arc<[String]>) -> Result<Row, DbError> {
    let values = (0..row.len())
        .map(|idx| decode_value(row, idx))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Row::new(Arc::clone(columns), values))
}

#[async_trait]
impl Backend for MySqlBackend {
    async fn execute(&self, query: &str, args: &[SqlValue]) -> Result<ExecSummary, DbError> {
        let result = bind_args(sqlx::query(query), args)
            .execute(&self.pool)
            .await?;
        Ok(ExecSummary {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(result.last_insert_id()),
        })
    }

    async fn query(&self, query: &str, args: &[SqlValue]) -> Result<Rows, DbError> {
        let pool = self.pool.clone();
        let sql = query.to_string();
        let args = args.to_vec();

        let mut cursor: BoxStream<'static, Result<Row, DbError>> = try_stream! {
            let mut fetched = bind_args(sqlx::query(&sql), &args).fetch(&pool);
            let mut columns: Option<Arc<[String]>> = None;
            while let Some(row) = fetched.try_next().await? {
                let names = columns.get_or_insert_with(|| {
                    row.columns().iter().map(|c| c.name().to_string()).collect()
                });
                yield decode_row(&row, names)?;
            }
        }
        .boxed();

        // sqlx only sends the statement once polled; pull the first row here so a
        // failing statement is reported by `query` rather than by the cursor.
        match cursor.next().await {
            None => Ok(Rows::empty()),
            Some(Err(e)) => Err(e),
            Some(Ok(first)) => Ok(Rows::new(stream::once(async { Ok(first) }).chain(cursor))),
        }
    }

    async fn ping(&self) -> Result<(), DbError> {
        let mut conn = self.pool.acquire().await?;
        conn.ping().await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
