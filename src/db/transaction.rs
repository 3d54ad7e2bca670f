//! Scoped transactions.
//!
//! [`TransactionRunner::run`] begins a transaction on the session, hands the
//! callback a session bound to it, and commits or rolls back depending on the
//! callback's result. A transaction dropped mid-flight (panic, cancelled
//! future) is rolled back by sqlx.
//!
//! Running a transaction on a session that is already inside one opens a
//! savepoint instead; an inner failure rolls back to the savepoint and the
//! error reaches the outer callback.
//!
//! MySQL commits implicitly around DDL, so schema changes there are not
//! undone by a rollback.

use crate::db::connection::DbSession;
use crate::error::DbResult;
use sqlx::{Connection, Database, Transaction};
use tracing::{debug, warn};

pub struct TransactionRunner;

impl TransactionRunner {
    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
    pub async fn run<T>(
        session: &mut DbSession<'_>,
        f: impl AsyncFnOnce(&mut DbSession<'_>) -> DbResult<T>,
    ) -> DbResult<T> {
        let db_type = session.db_type();
        debug!(db_type = %db_type, "Beginning transaction");

        match session {
            DbSession::MySql(conn) => {
                let mut tx = conn.begin().await?;
                let outcome = f(&mut DbSession::MySql(&mut *tx)).await;
                finish(tx, outcome).await
            }
            DbSession::Postgres(conn) => {
                let mut tx = conn.begin().await?;
                let outcome = f(&mut DbSession::Postgres(&mut *tx)).await;
                finish(tx, outcome).await
            }
            DbSession::SQLite(conn) => {
                let mut tx = conn.begin().await?;
                let outcome = f(&mut DbSession::SQLite(&mut *tx)).await;
                finish(tx, outcome).await
            }
        }
    }
}

async fn finish<DB: Database, T>(tx: Transaction<'_, DB>, outcome: DbResult<T>) -> DbResult<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            debug!("Transaction committed");
            Ok(value)
        }
        Err(err) => {
            match tx.rollback().await {
                Ok(()) => debug!(error = %err, "Transaction rolled back"),
                Err(rollback_err) => warn!(
                    error = %err,
                    rollback_error = %rollback_err,
                    "Rollback failed"
                ),
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbConnection;
    use crate::error::DbError;
    use crate::models::QueryParam;

    async fn setup() -> DbConnection {
        let mut conn = DbConnection::open("sqlite::memory:").await.unwrap();
        conn.session()
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();
        conn
    }

    async fn count(session: &mut DbSession<'_>) -> i64 {
        let rows = session.fetch_all("SELECT COUNT(*) AS n FROM t", &[]).await.unwrap();
        rows[0]["n"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_commit_on_success() {
        let mut conn = setup().await;
        let mut session = conn.session();

        let value = TransactionRunner::run(&mut session, async |tx: &mut DbSession<'_>| {
            tx.execute("INSERT INTO t (id) VALUES (?)", &[QueryParam::Int(1)])
                .await?;
            Ok(42)
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(count(&mut session).await, 1);
    }

    #[tokio::test]
    async fn test_rollback_on_error() {
        let mut conn = setup().await;
        let mut session = conn.session();

        let err = TransactionRunner::run(&mut session, async |tx: &mut DbSession<'_>| {
            tx.execute("INSERT INTO t (id) VALUES (?)", &[QueryParam::Int(1)])
                .await?;
            Err::<(), _>(DbError::internal("boom"))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, DbError::Internal { .. }));
        assert_eq!(count(&mut session).await, 0);
    }
}
