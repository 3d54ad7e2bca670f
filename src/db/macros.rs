//! Database dispatch macros for reducing code duplication.
//!
//! Helpers in this crate are written once per engine. The macro keeps the
//! three-way match over [`DbSession`](crate::db::DbSession) in one place.

/// Macro for generating database dispatch match arms.
///
/// This macro generates match arms for `DbSession` variants, reducing the need
/// to manually write repetitive match statements.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(session, {
///     MySql(c) => mysql::run(c).await,
///     Postgres(c) => postgres::run(c).await,
///     SQLite(c) => sqlite::run(c).await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($session:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $session {
            $(
                $crate::db::connection::DbSession::$variant($c) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
