//! Driver-neutral values and rows
//!
//! Arguments are bound from [`SqlValue`] and every result row is decoded into a
//! [`Row`] of [`SqlValue`]s, so handlers never see a driver-specific type.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::error::DbError;

/// A single bind argument or column value
///
/// Exact numerics (`NUMERIC`, `DECIMAL`) and UUIDs decode to [`SqlValue::Text`]
/// so no precision is lost.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Timestamp without a zone (`TIMESTAMP`, MySQL `DATETIME`)
    Timestamp(NaiveDateTime),
    /// Instant in time (`TIMESTAMPTZ`, MySQL `TIMESTAMP`)
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
}

impl SqlValue {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Timestamp(_) => "timestamp",
            Self::TimestampTz(_) => "timestamptz",
            Self::Json(_) => "json",
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
            Self::Bytes(v) => write!(f, "\\x{}", hex::encode(v)),
            Self::Date(v) => write!(f, "{v}"),
            Self::Time(v) => write!(f, "{v}"),
            Self::Timestamp(v) => write!(f, "{v}"),
            Self::TimestampTz(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for SqlValue {
            fn from(v: $t) -> Self {
                Self::Int(i64::from(v))
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for SqlValue {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

macro_rules! impl_from_variant {
    ($($t:ty => $variant:ident),*) => {
        $(impl From<$t> for SqlValue {
            fn from(v: $t) -> Self {
                Self::$variant(v)
            }
        })*
    };
}

impl_from_variant!(
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => Timestamp,
    DateTime<Utc> => TimestampTz,
    serde_json::Value => Json
);

impl<T: Into<Self>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Conversion out of a column value
pub trait FromSqlValue: Sized {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String>;
}

fn mismatch(expected: &str, value: &SqlValue) -> String {
    format!("expected {expected}, found {}", value.type_name())
}

impl FromSqlValue for i64 {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Int(v) => Ok(*v),
            SqlValue::Bool(v) => Ok(Self::from(*v)),
            other => Err(mismatch("int", other)),
        }
    }
}

impl FromSqlValue for i32 {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        let wide = i64::from_sql_value(value)?;
        Self::try_from(wide).map_err(|e| e.to_string())
    }
}

impl FromSqlValue for u64 {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        let wide = i64::from_sql_value(value)?;
        Self::try_from(wide).map_err(|e| e.to_string())
    }
}

impl FromSqlValue for f64 {
    #[allow(clippy::cast_precision_loss)]
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Float(v) => Ok(*v),
            SqlValue::Int(v) => Ok(*v as Self),
            other => Err(mismatch("float", other)),
        }
    }
}

impl FromSqlValue for bool {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Bool(v) => Ok(*v),
            // MySQL reports BOOLEAN columns as TINYINT(1)
            SqlValue::Int(v) => Ok(*v != 0),
            other => Err(mismatch("bool", other)),
        }
    }
}

impl FromSqlValue for String {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Text(v) => Ok(v.clone()),
            SqlValue::Bytes(v) => Self::from_utf8(v.clone()).map_err(|e| e.to_string()),
            SqlValue::Date(_)
            | SqlValue::Time(_)
            | SqlValue::Timestamp(_)
            | SqlValue::TimestampTz(_)
            | SqlValue::Json(_) => Ok(value.to_string()),
            other => Err(mismatch("text", other)),
        }
    }
}

impl FromSqlValue for NaiveDate {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Date(v) => Ok(*v),
            SqlValue::Timestamp(v) => Ok(v.date()),
            SqlValue::TimestampTz(v) => Ok(v.date_naive()),
            SqlValue::Text(v) => v.parse().map_err(|e: chrono::ParseError| e.to_string()),
            other => Err(mismatch("date", other)),
        }
    }
}

impl FromSqlValue for NaiveTime {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Time(v) => Ok(*v),
            SqlValue::Text(v) => v.parse().map_err(|e: chrono::ParseError| e.to_string()),
            other => Err(mismatch("time", other)),
        }
    }
}

impl FromSqlValue for NaiveDateTime {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Timestamp(v) => Ok(*v),
            SqlValue::TimestampTz(v) => Ok(v.naive_utc()),
            SqlValue::Text(v) => Self::parse_from_str(v, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| v.parse())
                .map_err(|e| e.to_string()),
            other => Err(mismatch("timestamp", other)),
        }
    }
}

/// Zone-less timestamps are read as UTC
impl FromSqlValue for DateTime<Utc> {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::TimestampTz(v) => Ok(*v),
            SqlValue::Timestamp(v) => Ok(v.and_utc()),
            SqlValue::Text(v) => DateTime::parse_from_rfc3339(v)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| e.to_string()),
            other => Err(mismatch("timestamptz", other)),
        }
    }
}

impl FromSqlValue for serde_json::Value {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Json(v) => Ok(v.clone()),
            SqlValue::Text(v) => serde_json::from_str(v).map_err(|e| e.to_string()),
            SqlValue::Bytes(v) => serde_json::from_slice(v).map_err(|e| e.to_string()),
            other => Err(mismatch("json", other)),
        }
    }
}

impl FromSqlValue for Vec<u8> {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Bytes(v) => Ok(v.clone()),
            SqlValue::Text(v) => Ok(v.clone().into_bytes()),
            other => Err(mismatch("bytes", other)),
        }
    }
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Null => Ok(None),
            other => T::from_sql_value(other).map(Some),
        }
    }
}

/// Column lookup by position or by name
pub trait RowIndex {
    fn position(&self, columns: &[String]) -> Option<usize>;
    fn describe(&self) -> String;
}

impl RowIndex for usize {
    fn position(&self, columns: &[String]) -> Option<usize> {
        (*self < columns.len()).then_some(*self)
    }

    fn describe(&self) -> String {
        format!("#{self}")
    }
}

impl RowIndex for &str {
    fn position(&self, columns: &[String]) -> Option<usize> {
        columns.iter().position(|c| c == *self)
    }

    fn describe(&self) -> String {
        (*self).to_string()
    }
}

/// One decoded result row
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value at `index`
    pub fn value<I: RowIndex>(&self, index: I) -> Result<&SqlValue, DbError> {
        index
            .position(&self.columns)
            .and_then(|pos| self.values.get(pos))
            .ok_or_else(|| DbError::ColumnNotFound(index.describe()))
    }

    /// Decode the value at `index`
    pub fn get<T: FromSqlValue, I: RowIndex>(&self, index: I) -> Result<T, DbError> {
        let value = index
            .position(&self.columns)
            .and_then(|pos| self.values.get(pos))
            .ok_or_else(|| DbError::ColumnNotFound(index.describe()))?;
        T::from_sql_value(value).map_err(|reason| DbError::Decode {
            column: index.describe(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        let columns: Arc<[String]> = vec!["id".to_string(), "name".to_string(), "bio".to_string()].into();
        Row::new(
            columns,
            vec![SqlValue::Int(7), SqlValue::from("ada"), SqlValue::Null],
        )
    }

    #[test]
    fn test_get_by_name_and_position() {
        let row = sample();
        assert_eq!(row.get::<i64, _>("id").unwrap(), 7);
        assert_eq!(row.get::<String, _>(1).unwrap(), "ada");
        assert_eq!(row.get::<Option<String>, _>("bio").unwrap(), None);
    }

    #[test]
    fn test_missing_column() {
        let row = sample();
        assert!(matches!(
            row.get::<i64, _>("email"),
            Err(DbError::ColumnNotFound(name)) if name == "email"
        ));
        assert!(matches!(row.get::<i64, _>(9), Err(DbError::ColumnNotFound(_))));
    }

    #[test]
    fn test_type_mismatch() {
        let row = sample();
        let err = row.get::<i64, _>("name").unwrap_err();
        assert!(matches!(err, DbError::Decode { ref column, .. } if column == "name"));
        assert!(row.get::<String, _>("bio").is_err());
    }

    #[test]
    fn test_temporal_and_json_columns() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        let columns: Arc<[String]> =
            vec!["created_at".to_string(), "seen_at".to_string(), "meta".to_string()].into();
        let row = Row::new(
            columns,
            vec![
                SqlValue::Timestamp(at),
                SqlValue::TimestampTz(at.and_utc()),
                SqlValue::Json(serde_json::json!({ "tags": ["a"] })),
            ],
        );

        assert_eq!(row.get::<NaiveDateTime, _>("created_at").unwrap(), at);
        assert_eq!(row.get::<DateTime<Utc>, _>("created_at").unwrap(), at.and_utc());
        assert_eq!(row.get::<NaiveDate, _>("seen_at").unwrap(), at.date());
        assert_eq!(row.get::<String, _>("created_at").unwrap(), "2024-03-01 12:30:00");
        assert_eq!(row.get::<serde_json::Value, _>("meta").unwrap()["tags"][0], "a");
        assert!(row.get::<i64, _>("created_at").is_err());
    }

    #[test]
    fn test_temporal_from_text() {
        let text = SqlValue::from("2024-03-01 12:30:00.5");
        let parsed = NaiveDateTime::from_sql_value(&text).unwrap();
        assert_eq!(parsed.and_utc().timestamp_subsec_millis(), 500);
        let instant = DateTime::<Utc>::from_sql_value(&SqlValue::from("2024-03-01T12:30:00+02:00")).unwrap();
        assert_eq!(instant.to_rfc3339(), "2024-03-01T10:30:00+00:00");
    }

    #[test]
    fn test_from_conversions() {
        assert_eq!(SqlValue::from(3_i32), SqlValue::Int(3));
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("x")), SqlValue::Text("x".to_string()));
        assert!(bool::from_sql_value(&SqlValue::Int(1)).unwrap());
    }
}
