//! Driver-agnostic query operations
//!
//! Every operation resolves the active backend through one exhaustive match, so
//! an unopened handle fails with [`DbError::Uninitialized`] before any
//! connection object is touched.

use std::sync::Arc;

use super::backend::{Backend, ExecSummary, Rows, SingleRow};
use super::value::SqlValue;
use super::{Driver, DriverHandle};
use crate::error::DbError;

impl DriverHandle {
    fn active(&self) -> Result<&Arc<dyn Backend>, DbError> {
        match &self.driver {
            Driver::None => Err(DbError::Uninitialized),
            Driver::MySql(backend) | Driver::Postgres(backend) => Ok(backend),
        }
    }

    /// Run a statement that returns no rows
    pub async fn exec(&self, query: &str, args: &[SqlValue]) -> Result<ExecSummary, DbError> {
        self.active()?.execute(query, args).await
    }

    /// [`Self::exec`] without the summary
    pub async fn exec_no_result(&self, query: &str, args: &[SqlValue]) -> Result<(), DbError> {
        self.exec(query, args).await.map(|_| ())
    }

    /// Run a query and return a cursor over its rows
    pub async fn query(&self, query: &str, args: &[SqlValue]) -> Result<Rows, DbError> {
        self.active()?.query(query, args).await
    }

    /// Run a query expected to return at most one row
    ///
    /// Never fails here: a missing row, a failed statement or an unopened
    /// handle is reported when the returned [`SingleRow`] is read. Extra rows
    /// are discarded.
    pub async fn query_row(&self, query: &str, args: &[SqlValue]) -> SingleRow {
        let outcome = match self.query(query, args).await {
            Ok(mut rows) => rows.next_row().await.unwrap_or(Err(DbError::NoRows)),
            Err(e) => Err(e),
        };
        SingleRow::from_outcome(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DriverKind, Row};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Backend that panics on any use
    struct PoisonedBackend;

    #[async_trait]
    impl Backend for PoisonedBackend {
        async fn execute(&self, _query: &str, _args: &[SqlValue]) -> Result<ExecSummary, DbError> {
            panic!("poisoned connection dereferenced")
        }

        async fn query(&self, _query: &str, _args: &[SqlValue]) -> Result<Rows, DbError> {
            panic!("poisoned connection dereferenced")
        }

        async fn ping(&self) -> Result<(), DbError> {
            panic!("poisoned connection dereferenced")
        }

        async fn close(&self) {}
    }

    /// Backend that records every statement it receives
    struct RecordingBackend {
        label: &'static str,
        calls: Mutex<Vec<String>>,
        rows: Vec<Row>,
    }

    impl RecordingBackend {
        fn new(label: &'static str, rows: Vec<Row>) -> Arc<Self> {
            Arc::new(Self {
                label,
                calls: Mutex::new(Vec::new()),
                rows,
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Backend for RecordingBackend {
        async fn execute(&self, query: &str, args: &[SqlValue]) -> Result<ExecSummary, DbError> {
            self.calls.lock().push(format!("{}:{query}", self.label));
            Ok(ExecSummary {
                rows_affected: args.len() as u64,
                last_insert_id: None,
            })
        }

        async fn query(&self, query: &str, _args: &[SqlValue]) -> Result<Rows, DbError> {
            self.calls.lock().push(format!("{}:{query}", self.label));
            Ok(Rows::from_rows(self.rows.clone()))
        }

        async fn ping(&self) -> Result<(), DbError> {
            Ok(())
        }

        async fn close(&self) {
            self.calls.lock().push(format!("{}:close", self.label));
        }
    }

    fn user_row(id: i64) -> Row {
        Row::new(vec!["id".to_string()].into(), vec![SqlValue::Int(id)])
    }

    #[tokio::test]
    async fn test_uninitialized_handle_fails_fast() {
        let handle = DriverHandle::new();
        assert_eq!(handle.kind(), DriverKind::None);
        assert_eq!(handle.driver_name(), "");

        assert!(matches!(
            handle.exec("DELETE FROM t", &[]).await,
            Err(DbError::Uninitialized)
        ));
        assert!(matches!(
            handle.exec_no_result("DELETE FROM t", &[]).await,
            Err(DbError::Uninitialized)
        ));
        assert!(matches!(
            handle.query("SELECT 1", &[]).await,
            Err(DbError::Uninitialized)
        ));
        let row = handle.query_row("SELECT 1", &[]).await;
        assert!(matches!(row.row(), Err(DbError::Uninitialized)));
    }

    #[tokio::test]
    async fn test_closed_handle_never_touches_old_connection() {
        let mut handle = DriverHandle::new();
        handle
            .set_driver(DriverKind::MySql, Arc::new(PoisonedBackend))
            .unwrap();
        handle.close().await;

        assert!(matches!(
            handle.exec("UPDATE t SET x = 1", &[]).await,
            Err(DbError::Uninitialized)
        ));
        assert!(matches!(
            handle.query("SELECT * FROM t", &[]).await,
            Err(DbError::Uninitialized)
        ));
    }

    #[tokio::test]
    async fn test_close_without_driver_is_noop() {
        let mut handle = DriverHandle::new();
        handle.close().await;
        assert!(!handle.is_open());
    }

    #[tokio::test]
    async fn test_switching_driver_routes_to_new_backend_only() {
        let mysql = RecordingBackend::new("mysql", vec![]);
        let postgres = RecordingBackend::new("postgres", vec![user_row(1)]);

        let mut handle = DriverHandle::new();
        handle.set_driver(DriverKind::MySql, mysql.clone()).unwrap();
        handle.exec("INSERT 1", &[]).await.unwrap();
        assert_eq!(handle.driver_name(), "mysql");

        handle
            .set_driver(DriverKind::Postgres, postgres.clone())
            .unwrap();
        assert_eq!(handle.kind(), DriverKind::Postgres);
        handle.exec("INSERT 2", &[]).await.unwrap();
        handle.query("SELECT 3", &[]).await.unwrap();
        let _ = handle.query_row("SELECT 4", &[]).await;

        assert_eq!(mysql.calls(), vec!["mysql:INSERT 1"]);
        assert_eq!(
            postgres.calls(),
            vec!["postgres:INSERT 2", "postgres:SELECT 3", "postgres:SELECT 4"]
        );
    }

    #[tokio::test]
    async fn test_set_driver_rejects_none_kind() {
        let mut handle = DriverHandle::new();
        let result = handle.set_driver(DriverKind::None, RecordingBackend::new("x", vec![]));
        assert!(matches!(result, Err(DbError::DriverDispatch(_))));
        assert_eq!(handle.kind(), DriverKind::None);
    }

    #[tokio::test]
    async fn test_exec_summary_passthrough() {
        let mut handle = DriverHandle::new();
        handle
            .set_driver(DriverKind::Postgres, RecordingBackend::new("pg", vec![]))
            .unwrap();
        let summary = handle
            .exec("UPDATE t SET a = $1, b = $2", &[1.into(), "x".into()])
            .await
            .unwrap();
        assert_eq!(summary.rows_affected, 2);
        assert!(handle.exec_no_result("UPDATE t", &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_query_row_defers_no_rows() {
        let mut handle = DriverHandle::new();
        handle
            .set_driver(DriverKind::MySql, RecordingBackend::new("mysql", vec![]))
            .unwrap();
        let row = handle.query_row("SELECT id FROM users WHERE id = ?", &[42.into()]).await;
        assert!(row.is_no_rows());
        assert!(matches!(row.get::<i64, _>("id"), Err(DbError::NoRows)));
    }

    /// Backend whose statements fail inside the driver
    struct FailingBackend;

    #[async_trait]
    impl Backend for FailingBackend {
        async fn execute(&self, _query: &str, _args: &[SqlValue]) -> Result<ExecSummary, DbError> {
            Err(DbError::MySql(sqlx::Error::PoolClosed))
        }

        async fn query(&self, _query: &str, _args: &[SqlValue]) -> Result<Rows, DbError> {
            Err(DbError::MySql(sqlx::Error::PoolClosed))
        }

        async fn ping(&self) -> Result<(), DbError> {
            Ok(())
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn test_query_row_keeps_driver_error() {
        let mut handle = DriverHandle::new();
        handle.set_driver(DriverKind::MySql, Arc::new(FailingBackend)).unwrap();

        let row = handle.query_row("SELECT id FROM users", &[]).await;
        assert!(matches!(row.error(), Some(DbError::MySql(_))));
        assert!(matches!(
            row.get::<i64, _>("id"),
            Err(DbError::MySql(sqlx::Error::PoolClosed))
        ));
    }

    #[tokio::test]
    async fn test_query_row_takes_first_row() {
        let mut handle = DriverHandle::new();
        handle
            .set_driver(
                DriverKind::MySql,
                RecordingBackend::new("mysql", vec![user_row(5), user_row(6)]),
            )
            .unwrap();
        let row = handle.query_row("SELECT id FROM users", &[]).await;
        assert_eq!(row.get::<i64, _>("id").unwrap(), 5);

        let rows = handle.query("SELECT id FROM users", &[]).await.unwrap();
        let all = rows.collect_all().await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
