//! Postgres driver backed by a single tokio-postgres client

use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::stream::{StreamExt, TryStreamExt};
use tokio::task::JoinHandle;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use uuid::Uuid;
use tokio_postgres::{Client, NoTls};

use super::backend::{Backend, ExecSummary, Rows};
use super::value::{Row, SqlValue};
use super::DriverKind;
use crate::config::DatabaseConfig;
use crate::error::DbError;

pub struct PostgresBackend {
    client: Client,
    /// Task driving the connection; aborted on close
    connection: Option<JoinHandle<()>>,
}

impl PostgresBackend {
    /// Wrap a client whose connection future is driven elsewhere
    pub const fn new(client: Client) -> Self {
        Self {
            client,
            connection: None,
        }
    }

    /// Dial the configured server and verify the connection with a ping
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DbError> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.effective_port(DriverKind::Postgres))
            .user(&config.user)
            .password(&config.password)
            .dbname(&config.name);

        let (client, connection) = pg
            .connect(NoTls)
            .await
            .map_err(|e| DbError::connection(DriverKind::Postgres, e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection terminated");
            }
        });

        let backend = Self {
            client,
            connection: Some(handle),
        };
        if let Err(e) = backend.ping().await {
            backend.close().await;
            return Err(DbError::connection(DriverKind::Postgres, e));
        }
        Ok(backend)
    }

    pub const fn client(&self) -> &Client {
        &self.client
    }
}

/// Binds with the parameter type Postgres inferred for the statement, so an
/// integer argument works against INT2, INT4 and INT8 columns alike.
impl ToSql for SqlValue {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self {
            Self::Null => Ok(IsNull::Yes),
            Self::Bool(v) => v.to_sql(ty, out),
            Self::Int(v) => match *ty {
                Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
                Type::OID => u32::try_from(*v)?.to_sql(ty, out),
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::FLOAT8 => (*v as f64).to_sql(ty, out),
                Type::BOOL => (*v != 0).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => v.to_string().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Self::Float(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Self::Text(v) => match *ty {
                Type::UUID => Uuid::parse_str(v)?.to_sql(ty, out),
                Type::NUMERIC => v.parse::<Decimal>()?.to_sql(ty, out),
                Type::JSON | Type::JSONB => serde_json::from_str::<serde_json::Value>(v)?.to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Self::Bytes(v) => v.to_sql(ty, out),
            Self::Date(v) => v.to_sql(ty, out),
            Self::Time(v) => v.to_sql(ty, out),
            Self::Timestamp(v) => match *ty {
                Type::TIMESTAMPTZ => v.and_utc().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Self::TimestampTz(v) => match *ty {
                Type::TIMESTAMP => v.naive_utc().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Self::Json(v) => match *ty {
                Type::TEXT | Type::VARCHAR => v.to_string().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Decodes any column; types without a dedicated mapping keep their raw
/// wire value, as text when it is valid UTF-8.
impl<'a> FromSql<'a> for SqlValue {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(match *ty {
            Type::BOOL => Self::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => Self::Int(i64::from(i16::from_sql(ty, raw)?)),
            Type::INT4 => Self::Int(i64::from(i32::from_sql(ty, raw)?)),
            Type::INT8 => Self::Int(i64::from_sql(ty, raw)?),
            Type::OID => Self::Int(i64::from(u32::from_sql(ty, raw)?)),
            Type::FLOAT4 => Self::Float(f64::from(f32::from_sql(ty, raw)?)),
            Type::FLOAT8 => Self::Float(f64::from_sql(ty, raw)?),
            Type::BYTEA => Self::Bytes(Vec::<u8>::from_sql(ty, raw)?),
            Type::DATE => Self::Date(NaiveDate::from_sql(ty, raw)?),
            Type::TIME => Self::Time(NaiveTime::from_sql(ty, raw)?),
            Type::TIMESTAMP => Self::Timestamp(NaiveDateTime::from_sql(ty, raw)?),
            Type::TIMESTAMPTZ => Self::TimestampTz(DateTime::<Utc>::from_sql(ty, raw)?),
            Type::NUMERIC => Self::Text(Decimal::from_sql(ty, raw)?.to_string()),
            Type::UUID => Self::Text(Uuid::from_sql(ty, raw)?.to_string()),
            Type::JSON | Type::JSONB => Self::Json(serde_json::Value::from_sql(ty, raw)?),
            _ if <String as FromSql>::accepts(ty) => Self::Text(String::from_sql(ty, raw)?),
            _ => match std::str::from_utf8(raw) {
                Ok(text) => Self::Text(text.to_string()),
                Err(_) => Self::Bytes(raw.to_vec()),
            },
        })
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(Self::Null)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn decode_row(row: &tokio_postgres::Row, columns: &Arc<[String]>) -> Result<Row, DbError> {
    let values = (0..row.len())
        .map(|idx| row.try_get::<_, SqlValue>(idx).map_err(DbError::from))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Row::new(Arc::clone(columns), values))
}

#[async_trait]
impl Backend for PostgresBackend {
    async fn execute(&self, query: &str, args: &[SqlValue]) -> Result<ExecSummary, DbError> {
        let params: Vec<&(dyn ToSql + Sync)> =
            args.iter().map(|a| a as &(dyn ToSql + Sync)).collect();
        let rows_affected = self.client.execute(query, &params).await?;
        Ok(ExecSummary {
            rows_affected,
            last_insert_id: None,
        })
    }

    async fn query(&self, query: &str, args: &[SqlValue]) -> Result<Rows, DbError> {
        let statement = self.client.prepare(query).await?;
        let columns: Arc<[String]> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let stream = self.client.query_raw(&statement, args.iter()).await?;

        Ok(Rows::new(stream.map_err(DbError::from).map(move |row| {
            row.and_then(|row| decode_row(&row, &columns))
        })))
    }

    async fn ping(&self) -> Result<(), DbError> {
        self.client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(handle) = &self.connection {
            handle.abort();
        }
    }
}
