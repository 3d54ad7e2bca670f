//! Integration tests for advisory locks.
//!
//! SQLite runs callbacks unlocked. The MySQL and PostgreSQL tests need a live
//! server and are skipped unless `TEST_MYSQL_URL` / `TEST_POSTGRES_URL` is set.

use db_toolkit::db::{DbConnection, DbSession, LockBackend, LockHandle, with_lock};
use db_toolkit::error::DbError;
use tempfile::TempDir;

#[tokio::test]
async fn test_sqlite_runs_unlocked() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}", dir.path().join("lock.db").display());
    let mut connection = DbConnection::open(&url).await.unwrap();
    let mut session = connection.session();
    assert!(!session.supports_advisory_locks());

    let rows = with_lock(&mut session, "nightly-report", 1, async |s: &mut DbSession<'_>| {
        s.execute("CREATE TABLE runs (id INTEGER PRIMARY KEY)", &[]).await?;
        s.execute("INSERT INTO runs (id) VALUES (1)", &[]).await
    })
    .await
    .unwrap();
    assert_eq!(rows, 1);
}

async fn assert_lock_excludes_second_session(url: &str) {
    let mut holder = DbConnection::open(url).await.unwrap();
    let mut contender = DbConnection::open(url).await.unwrap();
    let lock = LockHandle::new("db-toolkit-lock-test", 1);

    let mut holder_session = holder.session();
    let mut contender_session = contender.session();

    let result = lock
        .run(&mut holder_session, async |_s: &mut DbSession<'_>| {
            let second = lock
                .run(&mut contender_session, async |_c: &mut DbSession<'_>| Ok(()))
                .await;
            Ok(second)
        })
        .await
        .unwrap();
    assert!(matches!(result, Err(DbError::LockTimeout { timeout_secs: 1, .. })));

    // Released after the first run, so it can be taken again
    let again = lock
        .run(&mut contender_session, async |_c: &mut DbSession<'_>| Ok(7))
        .await
        .unwrap();
    assert_eq!(again, 7);
}

#[tokio::test]
async fn test_mysql_lock_excludes_second_session() {
    let Ok(url) = std::env::var("TEST_MYSQL_URL") else {
        eprintln!("TEST_MYSQL_URL not set; skipping");
        return;
    };
    assert_lock_excludes_second_session(&url).await;
}

#[tokio::test]
async fn test_postgres_lock_excludes_second_session() {
    let Ok(url) = std::env::var("TEST_POSTGRES_URL") else {
        eprintln!("TEST_POSTGRES_URL not set; skipping");
        return;
    };
    assert_lock_excludes_second_session(&url).await;
}
