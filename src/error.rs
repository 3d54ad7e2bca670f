//! Error types for db-toolkit.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Driver failures are converted from `sqlx::Error`, with "object already exists"
//! failures split out into their own variant so schema installs can tolerate them.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message} (checked: {})", variables.join(", "))]
    Configuration {
        message: String,
        /// Environment variables that were probed
        variables: Vec<String>,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Object already exists: {message}")]
    ObjectExists { message: String },

    #[error("Schema apply failed: {message} (statement: {statement})")]
    SchemaApply { statement: String, message: String },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Lock '{lock_name}' not acquired within {timeout_secs}s")]
    LockTimeout { lock_name: String, timeout_secs: u32 },

    #[error("Failed to decode column '{column}': {message}")]
    Decode { column: String, message: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error listing the variables that were probed.
    pub fn configuration(message: impl Into<String>, variables: Vec<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            variables,
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn object_exists(message: impl Into<String>) -> Self {
        Self::ObjectExists {
            message: message.into(),
        }
    }

    /// Wrap a failed DDL statement.
    pub fn schema_apply(statement: impl Into<String>, source: &DbError) -> Self {
        Self::SchemaApply {
            statement: statement.into(),
            message: source.to_string(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    pub fn lock_timeout(lock_name: impl Into<String>, timeout_secs: u32) -> Self {
        Self::LockTimeout {
            lock_name: lock_name.into(),
            timeout_secs,
        }
    }

    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::LockTimeout { .. } => Some("Retry later or increase the lock timeout"),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::LockTimeout { .. }
        )
    }

    /// True for "table/column/index already exists" failures.
    pub fn is_object_exists(&self) -> bool {
        matches!(self, Self::ObjectExists { .. })
    }
}

// PostgreSQL: duplicate_table, duplicate_column, duplicate_object.
const PG_ALREADY_EXISTS: &[&str] = &["42P07", "42701", "42710"];
// MySQL: ER_TABLE_EXISTS_ERROR, ER_DUP_FIELDNAME, ER_DUP_KEYNAME.
const MYSQL_ALREADY_EXISTS: &[u16] = &[1050, 1060, 1061];

/// Decide whether a driver error reports that the object being created already exists.
fn is_already_exists(db_err: &(dyn sqlx::error::DatabaseError + 'static)) -> bool {
    if let Some(pg) = db_err.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        return PG_ALREADY_EXISTS.contains(&pg.code());
    }
    if let Some(my) = db_err.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
        return MYSQL_ALREADY_EXISTS.contains(&my.number());
    }
    // SQLite reports every DDL conflict as the generic SQLITE_ERROR code.
    let message = db_err.message().to_lowercase();
    message.contains("already exists") || message.contains("duplicate column name")
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                if is_already_exists(db_err.as_ref()) {
                    return DbError::object_exists(db_err.message());
                }
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::schema(format!("Column not found: {}", col), col.to_string())
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::decode(index, source.to_string())
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
