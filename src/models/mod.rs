//! Data models for db-toolkit.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{ConnectionProfile, DatabaseType, Intent, validate_identifier};
pub use query::{DEFAULT_QUERY_TIMEOUT_SECS, MAX_QUERY_TIMEOUT_SECS, QueryParam, Row};
pub use schema::{ColumnDefinition, IndexInfo, Schema, TableSchema};
