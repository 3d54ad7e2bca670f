//! Connection-related data models.
//!
//! This module defines the supported engines and the connection parameters
//! resolved for a logical database.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use url::Url;

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Whether the engine offers server-side named locks.
    pub fn supports_advisory_locks(&self) -> bool {
        !matches!(self, Self::SQLite)
    }

    /// Quote an identifier for this engine. The identifier must already be validated.
    pub fn quote_ident(&self, ident: &str) -> String {
        match self {
            Self::MySQL => format!("`{}`", ident),
            Self::PostgreSQL | Self::SQLite => format!("\"{}\"", ident),
        }
    }

    /// Bind placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Self::PostgreSQL => format!("${}", index),
            Self::MySQL | Self::SQLite => "?".to_string(),
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Validate a table, column or index name before it is interpolated into SQL.
pub fn validate_identifier(ident: &str) -> DbResult<()> {
    if ident.is_empty() {
        return Err(DbError::invalid_input("Identifier cannot be empty"));
    }
    if !ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DbError::invalid_input(format!(
            "Identifier contains invalid characters: {}",
            ident
        )));
    }
    Ok(())
}

/// Whether an operation only reads (routed to a replica) or may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ReadOnly,
    #[default]
    ReadWrite,
}

impl Intent {
    /// Safe HTTP methods default to read-only intent.
    pub fn from_request_method(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" | "HEAD" | "OPTIONS" => Self::ReadOnly,
            _ => Self::ReadWrite,
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadOnly)
    }
}

/// Concrete connection parameters for one logical database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    /// Logical database name the profile was resolved for
    pub name: String,
    pub host: String,
    pub user: String,
    /// Contains sensitive data - never log
    #[serde(skip_serializing, default)]
    pub password: String,
    pub port: u16,
    pub database: String,
    /// True if the replica variables were consulted
    #[serde(default)]
    pub is_replica: bool,
}

impl ConnectionProfile {
    /// Render a `mysql://` connection URL with percent-encoded credentials.
    pub fn connection_url(&self) -> DbResult<String> {
        let mut url = Url::parse(&format!("mysql://{}:{}", self.host, self.port))
            .map_err(|e| DbError::configuration(format!("Invalid host: {e}"), Vec::new()))?;
        url.set_username(&self.user)
            .map_err(|_| DbError::configuration("Invalid username", Vec::new()))?;
        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|_| DbError::configuration("Invalid password", Vec::new()))?;
        }
        url.set_path(&self.database);
        Ok(url.to_string())
    }

    /// Display-safe connection URL (credentials masked).
    pub fn masked_url(&self) -> String {
        format!(
            "mysql://{}:****@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}
