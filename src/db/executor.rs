//! Query execution engine.
//!
//! Runs statements on a [`DbSession`] with a per-call timeout. Rows are
//! converted to JSON maps so callers see one row shape for every engine.
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL-specific query and write operations
//! - `postgres`: PostgreSQL-specific query and write operations
//! - `sqlite`: SQLite-specific query and write operations

use crate::db::connection::DbSession;
use crate::db::types::{RowToJson, TypedRow};
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::{DEFAULT_QUERY_TIMEOUT_SECS, MAX_QUERY_TIMEOUT_SECS, QueryParam, Row};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

/// Query executor that handles database query execution.
#[derive(Debug, Clone, Copy)]
pub struct QueryExecutor {
    timeout: Duration,
}

impl QueryExecutor {
    /// Create a new query executor with default settings.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS as u64),
        }
    }

    /// Create an executor with a custom timeout, capped at the maximum.
    pub fn with_timeout(timeout_secs: u32) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs.clamp(1, MAX_QUERY_TIMEOUT_SECS) as u64),
        }
    }

    /// Execute a statement and return the number of affected rows.
    ///
    /// Statements without parameters run as raw SQL, which DDL requires on some engines.
    pub async fn execute(
        &self,
        session: &mut DbSession<'_>,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<u64> {
        let start = Instant::now();
        debug!(sql = %sql, params = params.len(), "Executing statement");

        let rows_affected = impl_db_dispatch!(session, {
            MySql(c) => mysql::execute(c, sql, params, self.timeout).await?,
            Postgres(c) => postgres::execute(c, sql, params, self.timeout).await?,
            SQLite(c) => sqlite::execute(c, sql, params, self.timeout).await?,
        });

        debug!(
            rows_affected,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Statement complete"
        );
        Ok(rows_affected)
    }

    /// Run a query and return every row as a JSON map.
    pub async fn fetch_all(
        &self,
        session: &mut DbSession<'_>,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<Row>> {
        let rows = self.fetch_typed(session, sql, params).await?;
        Ok(rows.into_iter().map(TypedRow::into_values).collect())
    }

    /// Like [`fetch_all`](Self::fetch_all), keeping each value's type category.
    pub async fn fetch_typed(
        &self,
        session: &mut DbSession<'_>,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<TypedRow>> {
        let start = Instant::now();
        debug!(sql = %sql, params = params.len(), "Executing query");

        let rows = impl_db_dispatch!(session, {
            MySql(c) => to_rows(mysql::fetch_all(c, sql, params, self.timeout).await?),
            Postgres(c) => to_rows(postgres::fetch_all(c, sql, params, self.timeout).await?),
            SQLite(c) => to_rows(sqlite::fetch_all(c, sql, params, self.timeout).await?),
        });

        debug!(
            rows = rows.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Query complete"
        );
        Ok(rows)
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl DbSession<'_> {
    /// Execute a statement with the default timeout.
    pub async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        QueryExecutor::new().execute(self, sql, params).await
    }

    /// Fetch all rows with the default timeout.
    pub async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        QueryExecutor::new().fetch_all(self, sql, params).await
    }

    /// Fetch all rows with their type categories, with the default timeout.
    pub async fn fetch_typed(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<TypedRow>> {
        QueryExecutor::new().fetch_typed(self, sql, params).await
    }
}

fn to_rows<R: RowToJson>(rows: Vec<R>) -> Vec<TypedRow> {
    rows.iter().map(RowToJson::to_typed_row).collect()
}

fn timeout_error(operation: &str, timeout: Duration) -> DbError {
    DbError::timeout(operation, timeout.as_secs() as u32)
}

// Each module below provides the same interface adapted to its database type.

mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use sqlx::MySqlConnection;
    use sqlx::mysql::MySqlRow;

    pub async fn fetch_all(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
        query_timeout: Duration,
    ) -> DbResult<Vec<MySqlRow>> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            timeout(query_timeout, (&mut *conn).fetch_all(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            timeout(query_timeout, query.fetch_all(&mut *conn)).await
        };

        match result {
            Ok(rows) => Ok(rows?),
            Err(_) => Err(timeout_error("query execution", query_timeout)),
        }
    }

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
        query_timeout: Duration,
    ) -> DbResult<u64> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            timeout(query_timeout, (&mut *conn).execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            timeout(query_timeout, query.execute(&mut *conn)).await
        };

        match result {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("write operation", query_timeout)),
        }
    }
}

mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use sqlx::PgConnection;
    use sqlx::postgres::PgRow;

    pub async fn fetch_all(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
        query_timeout: Duration,
    ) -> DbResult<Vec<PgRow>> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            timeout(query_timeout, (&mut *conn).fetch_all(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            timeout(query_timeout, query.fetch_all(&mut *conn)).await
        };

        match result {
            Ok(rows) => Ok(rows?),
            Err(_) => Err(timeout_error("query execution", query_timeout)),
        }
    }

    pub async fn execute(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
        query_timeout: Duration,
    ) -> DbResult<u64> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            timeout(query_timeout, (&mut *conn).execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            timeout(query_timeout, query.execute(&mut *conn)).await
        };

        match result {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("write operation", query_timeout)),
        }
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::SqliteConnection;
    use sqlx::sqlite::SqliteRow;

    pub async fn fetch_all(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
        query_timeout: Duration,
    ) -> DbResult<Vec<SqliteRow>> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            timeout(query_timeout, (&mut *conn).fetch_all(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            timeout(query_timeout, query.fetch_all(&mut *conn)).await
        };

        match result {
            Ok(rows) => Ok(rows?),
            Err(_) => Err(timeout_error("query execution", query_timeout)),
        }
    }

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
        query_timeout: Duration,
    ) -> DbResult<u64> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            timeout(query_timeout, (&mut *conn).execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            timeout(query_timeout, query.execute(&mut *conn)).await
        };

        match result {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("write operation", query_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbConnection;

    #[test]
    fn test_executor_defaults() {
        let executor = QueryExecutor::new();
        assert_eq!(
            executor.timeout,
            Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS as u64)
        );
    }

    #[test]
    fn test_executor_timeout_capped() {
        assert_eq!(
            QueryExecutor::with_timeout(99999).timeout,
            Duration::from_secs(MAX_QUERY_TIMEOUT_SECS as u64)
        );
        assert_eq!(QueryExecutor::with_timeout(0).timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_execute_and_fetch_on_sqlite() {
        let mut conn = DbConnection::open("sqlite::memory:").await.unwrap();
        let mut session = conn.session();

        session
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .await
            .unwrap();
        let affected = session
            .execute(
                "INSERT INTO t (id, name) VALUES (?, ?)",
                &[QueryParam::Int(1), QueryParam::from("one")],
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let rows = session
            .fetch_all("SELECT id, name FROM t WHERE id = ?", &[QueryParam::Int(1)])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], serde_json::json!(1));
        assert_eq!(rows[0]["name"], serde_json::json!("one"));
    }

    #[tokio::test]
    async fn test_fetch_aggregate_on_sqlite() {
        let mut conn = DbConnection::open("sqlite::memory:").await.unwrap();
        let mut session = conn.session();
        session
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();
        session
            .execute("INSERT INTO t (id) VALUES (1), (2), (3)", &[])
            .await
            .unwrap();

        let rows = session
            .fetch_all("SELECT COUNT(*) AS n, 1+1 AS two, MAX(id) AS top FROM t", &[])
            .await
            .unwrap();
        assert_eq!(rows[0]["n"], serde_json::json!(3));
        assert_eq!(rows[0]["two"], serde_json::json!(2));
        assert_eq!(rows[0]["top"], serde_json::json!(3));
    }
}
