//! Named advisory locks.
//!
//! A lock serializes a critical section across processes sharing one database
//! server. MySQL uses `GET_LOCK`/`RELEASE_LOCK`; PostgreSQL polls
//! `pg_try_advisory_lock` on a 64-bit hash of the name. SQLite has no
//! server-side named locks, so the callback runs unprotected there.
//!
//! Locks are session-scoped on both servers: the lock belongs to the
//! connection that acquired it, and the callback receives that same session.
//!
//! A dropped future cannot run the asynchronous release. If the future
//! returned by [`with_lock`] is cancelled while the lock is held (an outer
//! `tokio::time::timeout`, a losing `select!` branch), the lock stays with the
//! session until [`LockHandle::release`] is called or the connection closes.

use crate::db::connection::DbSession;
use crate::error::{DbError, DbResult};
use futures_util::FutureExt;
use sha2::{Digest, Sha256};
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Longest lock name MySQL accepts.
pub const MAX_LOCK_NAME_LEN: usize = 64;

const PG_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lock names longer than [`MAX_LOCK_NAME_LEN`] are replaced by their SHA-256 hex digest.
pub fn normalize_lock_name(name: &str) -> String {
    if name.chars().count() > MAX_LOCK_NAME_LEN {
        hex::encode(Sha256::digest(name.as_bytes()))
    } else {
        name.to_string()
    }
}

/// Primitives a session needs to provide for [`with_lock`].
#[allow(async_fn_in_trait)]
pub trait LockBackend {
    fn supports_advisory_locks(&self) -> bool;

    /// Wait up to `timeout_secs` for the lock. `Ok(false)` means the wait timed out.
    async fn acquire_lock(&mut self, name: &str, timeout_secs: u32) -> DbResult<bool>;

    async fn release_lock(&mut self, name: &str) -> DbResult<()>;
}

/// A normalized lock name plus how long to wait for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    normalized_name: String,
    timeout_secs: u32,
}

impl LockHandle {
    pub fn new(name: &str, timeout_secs: u32) -> Self {
        Self {
            normalized_name: normalize_lock_name(name),
            timeout_secs,
        }
    }

    /// The name sent to the server.
    pub fn name(&self) -> &str {
        &self.normalized_name
    }

    pub fn timeout_secs(&self) -> u32 {
        self.timeout_secs
    }

    /// Run `f` while holding the lock.
    ///
    /// If the lock cannot be acquired in time the callback does not run and
    /// [`DbError::LockTimeout`] is returned. Once acquired, the lock is released
    /// exactly once after the callback returns or panics; a panic is resumed
    /// after the release. A callback error takes precedence over a release error.
    /// See the module docs for cancellation.
    pub async fn run<S, T>(
        &self,
        session: &mut S,
        f: impl AsyncFnOnce(&mut S) -> DbResult<T>,
    ) -> DbResult<T>
    where
        S: LockBackend,
    {
        if !session.supports_advisory_locks() {
            debug!(lock = %self.normalized_name, "Advisory locks unsupported, running unlocked");
            return f(session).await;
        }

        let acquired = session
            .acquire_lock(&self.normalized_name, self.timeout_secs)
            .await?;
        if !acquired {
            warn!(
                lock = %self.normalized_name,
                timeout_secs = self.timeout_secs,
                "Advisory lock timed out"
            );
            return Err(DbError::lock_timeout(
                self.normalized_name.clone(),
                self.timeout_secs,
            ));
        }
        info!(lock = %self.normalized_name, "Advisory lock acquired");

        let mut watch = HeldLock {
            name: &self.normalized_name,
            released: false,
        };
        let outcome = AssertUnwindSafe(f(&mut *session)).catch_unwind().await;
        let released = session.release_lock(&self.normalized_name).await;
        watch.released = true;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                if let Err(release_err) = &released {
                    warn!(
                        lock = %self.normalized_name,
                        error = %release_err,
                        "Failed to release advisory lock after panic"
                    );
                }
                panic::resume_unwind(payload);
            }
        };

        match (outcome, released) {
            (Ok(value), Ok(())) => {
                debug!(lock = %self.normalized_name, "Advisory lock released");
                Ok(value)
            }
            (Ok(_), Err(release_err)) => Err(release_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => {
                warn!(
                    lock = %self.normalized_name,
                    error = %release_err,
                    "Failed to release advisory lock"
                );
                Err(err)
            }
        }
    }
}

impl LockHandle {
    /// Release the lock explicitly, e.g. after a cancelled [`run`](Self::run).
    pub async fn release<S: LockBackend>(&self, session: &mut S) -> DbResult<()> {
        session.release_lock(&self.normalized_name).await
    }
}

/// Logs when a future holding a lock is dropped before releasing it.
struct HeldLock<'a> {
    name: &'a str,
    released: bool,
}

impl Drop for HeldLock<'_> {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                lock = %self.name,
                "Lock future dropped while held; lock stays with the session until released"
            );
        }
    }
}

/// Run `f` while holding the named lock on `session`.
///
/// Cancelling the returned future while the lock is held leaves it held; see
/// the module docs.
pub async fn with_lock<S, T>(
    session: &mut S,
    lock_name: &str,
    timeout_secs: u32,
    f: impl AsyncFnOnce(&mut S) -> DbResult<T>,
) -> DbResult<T>
where
    S: LockBackend,
{
    LockHandle::new(lock_name, timeout_secs).run(session, f).await
}

impl LockBackend for DbSession<'_> {
    fn supports_advisory_locks(&self) -> bool {
        self.db_type().supports_advisory_locks()
    }

    async fn acquire_lock(&mut self, name: &str, timeout_secs: u32) -> DbResult<bool> {
        match self {
            DbSession::MySql(c) => mysql::acquire(c, name, timeout_secs).await,
            DbSession::Postgres(c) => postgres::acquire(c, name, timeout_secs).await,
            DbSession::SQLite(_) => Ok(true),
        }
    }

    async fn release_lock(&mut self, name: &str) -> DbResult<()> {
        match self {
            DbSession::MySql(c) => mysql::release(c, name).await,
            DbSession::Postgres(c) => postgres::release(c, name).await,
            DbSession::SQLite(_) => Ok(()),
        }
    }
}

mod mysql {
    use super::*;
    use sqlx::MySqlConnection;

    pub async fn acquire(
        conn: &mut MySqlConnection,
        name: &str,
        timeout_secs: u32,
    ) -> DbResult<bool> {
        // 1 = acquired, 0 = timed out, NULL = server-side error
        let result: Option<i64> = sqlx::query_scalar("SELECT GET_LOCK(?, ?)")
            .bind(name)
            .bind(i64::from(timeout_secs))
            .fetch_one(&mut *conn)
            .await?;
        match result {
            Some(1) => Ok(true),
            Some(_) => Ok(false),
            None => Err(DbError::database(
                format!("GET_LOCK failed for '{}'", name),
                None,
                "Check the server error log",
            )),
        }
    }

    pub async fn release(conn: &mut MySqlConnection, name: &str) -> DbResult<()> {
        let result: Option<i64> = sqlx::query_scalar("SELECT RELEASE_LOCK(?)")
            .bind(name)
            .fetch_one(&mut *conn)
            .await?;
        match result {
            Some(1) => Ok(()),
            _ => Err(DbError::database(
                format!("Lock '{}' was not held by this session", name),
                None,
                "The connection may have been reset while the lock was held",
            )),
        }
    }
}

mod postgres {
    use super::*;
    use sqlx::PgConnection;

    pub async fn acquire(
        conn: &mut PgConnection,
        name: &str,
        timeout_secs: u32,
    ) -> DbResult<bool> {
        let deadline = Instant::now() + Duration::from_secs(u64::from(timeout_secs));
        loop {
            let acquired: bool =
                sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtextextended($1, 0))")
                    .bind(name)
                    .fetch_one(&mut *conn)
                    .await?;
            if acquired {
                return Ok(true);
            }
            if Instant::now() + PG_POLL_INTERVAL > deadline {
                return Ok(false);
            }
            tokio::time::sleep(PG_POLL_INTERVAL).await;
        }
    }

    pub async fn release(conn: &mut PgConnection, name: &str) -> DbResult<()> {
        let released: bool =
            sqlx::query_scalar("SELECT pg_advisory_unlock(hashtextextended($1, 0))")
                .bind(name)
                .fetch_one(&mut *conn)
                .await?;
        if released {
            Ok(())
        } else {
            Err(DbError::database(
                format!("Lock '{}' was not held by this session", name),
                None,
                "The connection may have been reset while the lock was held",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend that records calls instead of talking to a server.
    #[derive(Default)]
    struct FakeBackend {
        available: bool,
        acquire_result: bool,
        fail_release: bool,
        acquired: Vec<String>,
        releases: usize,
    }

    impl FakeBackend {
        fn locking() -> Self {
            Self {
                available: true,
                acquire_result: true,
                ..Default::default()
            }
        }
    }

    impl LockBackend for FakeBackend {
        fn supports_advisory_locks(&self) -> bool {
            self.available
        }

        async fn acquire_lock(&mut self, name: &str, _timeout_secs: u32) -> DbResult<bool> {
            self.acquired.push(name.to_string());
            Ok(self.acquire_result)
        }

        async fn release_lock(&mut self, _name: &str) -> DbResult<()> {
            self.releases += 1;
            if self.fail_release {
                Err(DbError::internal("release failed"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_short_names_kept() {
        assert_eq!(normalize_lock_name("migrations"), "migrations");
        let exact = "a".repeat(MAX_LOCK_NAME_LEN);
        assert_eq!(normalize_lock_name(&exact), exact);
    }

    #[test]
    fn test_long_names_hashed() {
        let long = "x".repeat(MAX_LOCK_NAME_LEN + 1);
        let normalized = normalize_lock_name(&long);
        assert_eq!(normalized.len(), 64);
        assert!(normalized.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(normalized, normalize_lock_name(&long));
        assert_ne!(normalized, normalize_lock_name(&"y".repeat(MAX_LOCK_NAME_LEN + 1)));
    }

    #[tokio::test]
    async fn test_release_after_success() {
        let mut backend = FakeBackend::locking();
        let value = with_lock(&mut backend, "job", 5, async |_b: &mut FakeBackend| Ok(7))
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(backend.acquired, vec!["job"]);
        assert_eq!(backend.releases, 1);
    }

    #[tokio::test]
    async fn test_release_after_error() {
        let mut backend = FakeBackend::locking();
        let err = with_lock(&mut backend, "job", 5, async |_b: &mut FakeBackend| {
            Err::<(), _>(DbError::internal("callback failed"))
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("callback failed"));
        assert_eq!(backend.releases, 1);
    }

    #[tokio::test]
    async fn test_callback_error_wins_over_release_error() {
        let mut backend = FakeBackend {
            fail_release: true,
            ..FakeBackend::locking()
        };
        let err = with_lock(&mut backend, "job", 5, async |_b: &mut FakeBackend| {
            Err::<(), _>(DbError::invalid_input("bad"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
        assert_eq!(backend.releases, 1);
    }

    #[tokio::test]
    async fn test_release_error_surfaces_after_success() {
        let mut backend = FakeBackend {
            fail_release: true,
            ..FakeBackend::locking()
        };
        let err = with_lock(&mut backend, "job", 5, async |_b: &mut FakeBackend| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Internal { .. }));
    }

    #[tokio::test]
    async fn test_timeout_skips_callback_and_release() {
        let mut backend = FakeBackend {
            acquire_result: false,
            ..FakeBackend::locking()
        };
        let mut ran = false;
        let err = with_lock(&mut backend, "job", 1, async |_b: &mut FakeBackend| {
            ran = true;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DbError::LockTimeout { timeout_secs: 1, .. }));
        assert!(!ran);
        assert_eq!(backend.releases, 0);
    }

    #[tokio::test]
    async fn test_unsupported_backend_runs_unlocked() {
        let mut backend = FakeBackend::default();
        let value = with_lock(&mut backend, "job", 1, async |_b: &mut FakeBackend| Ok("ran"))
            .await
            .unwrap();
        assert_eq!(value, "ran");
        assert!(backend.acquired.is_empty());
        assert_eq!(backend.releases, 0);
    }

    #[tokio::test]
    async fn test_release_after_panic() {
        let mut backend = FakeBackend::locking();
        let handle = LockHandle::new("job", 5);
        let result = AssertUnwindSafe(handle.run(
            &mut backend,
            async |_b: &mut FakeBackend| -> DbResult<()> { panic!("callback panicked") },
        ))
        .catch_unwind()
        .await;
        assert!(result.is_err());
        assert_eq!(backend.releases, 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_leaves_lock_for_explicit_release() {
        let mut backend = FakeBackend::locking();
        let handle = LockHandle::new("job", 5);
        let outcome = tokio::time::timeout(
            Duration::from_millis(20),
            handle.run(&mut backend, async |_b: &mut FakeBackend| {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }),
        )
        .await;
        assert!(outcome.is_err());
        assert_eq!(backend.releases, 0);

        handle.release(&mut backend).await.unwrap();
        assert_eq!(backend.releases, 1);
    }

    #[tokio::test]
    async fn test_long_name_reaches_backend_hashed() {
        let mut backend = FakeBackend::locking();
        let long = "lock-".repeat(20);
        with_lock(&mut backend, &long, 5, async |_b: &mut FakeBackend| Ok(()))
            .await
            .unwrap();
        assert_eq!(backend.acquired, vec![normalize_lock_name(&long)]);
    }
}
