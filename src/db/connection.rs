//! Database connections.
//!
//! Pooling belongs to sqlx; this layer works on a single open connection.
//! [`DbConnection`] owns one, and [`DbSession`] is the borrowed view every
//! helper in this crate runs against. A session can also wrap a connection
//! checked out of a caller's sqlx pool, or the connection inside a transaction.

use crate::error::{DbError, DbResult};
use crate::models::{ConnectionProfile, DatabaseType};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection, MySqlConnection, PgConnection, SqliteConnection};
use std::str::FromStr;
use tracing::{debug, info};

/// Database-specific owned connection.
#[derive(Debug)]
pub enum DbConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    SQLite(SqliteConnection),
}

impl DbConnection {
    /// Open a connection from a `mysql://`, `postgres://` or `sqlite:` URL.
    pub async fn open(connection_string: &str) -> DbResult<Self> {
        let db_type = DatabaseType::from_connection_string(connection_string).ok_or_else(|| {
            DbError::invalid_input("Unknown database type in connection string")
        })?;

        info!(db_type = %db_type, "Opening database connection");

        let connection = match db_type {
            DatabaseType::MySQL => Self::MySql(MySqlConnection::connect(connection_string).await?),
            DatabaseType::PostgreSQL => {
                Self::Postgres(PgConnection::connect(connection_string).await?)
            }
            DatabaseType::SQLite => {
                let options =
                    SqliteConnectOptions::from_str(connection_string)?.create_if_missing(true);
                Self::SQLite(options.connect().await?)
            }
        };

        debug!(db_type = %db_type, "Connection established");
        Ok(connection)
    }

    /// Open a MySQL connection from resolved environment parameters.
    pub async fn open_profile(profile: &ConnectionProfile) -> DbResult<Self> {
        info!(
            name = %profile.name,
            target = %profile.masked_url(),
            replica = profile.is_replica,
            "Opening database connection"
        );

        let url = profile.connection_url()?;
        Ok(Self::MySql(MySqlConnection::connect(&url).await?))
    }

    /// Get the database type for this connection.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbConnection::MySql(_) => DatabaseType::MySQL,
            DbConnection::Postgres(_) => DatabaseType::PostgreSQL,
            DbConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Borrow the connection as a session.
    pub fn session(&mut self) -> DbSession<'_> {
        match self {
            DbConnection::MySql(c) => DbSession::MySql(c),
            DbConnection::Postgres(c) => DbSession::Postgres(c),
            DbConnection::SQLite(c) => DbSession::SQLite(c),
        }
    }

    /// Close the connection gracefully.
    pub async fn close(self) -> DbResult<()> {
        match self {
            DbConnection::MySql(c) => c.close().await?,
            DbConnection::Postgres(c) => c.close().await?,
            DbConnection::SQLite(c) => c.close().await?,
        }
        Ok(())
    }
}

/// Borrowed, database-specific connection.
#[derive(Debug)]
pub enum DbSession<'c> {
    MySql(&'c mut MySqlConnection),
    Postgres(&'c mut PgConnection),
    SQLite(&'c mut SqliteConnection),
}

impl DbSession<'_> {
    /// Get the database type for this session.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbSession::MySql(_) => DatabaseType::MySQL,
            DbSession::Postgres(_) => DatabaseType::PostgreSQL,
            DbSession::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

impl<'c> From<&'c mut MySqlConnection> for DbSession<'c> {
    fn from(conn: &'c mut MySqlConnection) -> Self {
        DbSession::MySql(conn)
    }
}

impl<'c> From<&'c mut PgConnection> for DbSession<'c> {
    fn from(conn: &'c mut PgConnection) -> Self {
        DbSession::Postgres(conn)
    }
}

impl<'c> From<&'c mut SqliteConnection> for DbSession<'c> {
    fn from(conn: &'c mut SqliteConnection) -> Self {
        DbSession::SQLite(conn)
    }
}
