//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connections and borrowed sessions
//! - Query execution with parameter binding
//! - Schema introspection and declarative synchronization
//! - Transactions, advisory locks and upserts
//! - Batch loading by key
//! - Connection resolution from the environment

pub mod connection;
pub mod executor;
pub mod loader;
pub mod lock;
#[macro_use]
pub mod macros;
pub mod params;
pub mod resolver;
pub mod schema;
pub mod schema_sync;
pub mod transaction;
pub mod types;
pub mod upsert;

pub use connection::{DbConnection, DbSession};
pub use executor::QueryExecutor;
pub use loader::{BatchLoader, FetchShape, Record};
pub use lock::{LockBackend, LockHandle, normalize_lock_name, with_lock};
pub use resolver::{ConnectionResolver, ProfileSource, ResolveOptions};
pub use schema::SchemaInspector;
pub use schema_sync::{SchemaBuilder, SchemaDelta, SchemaOperation, SchemaSynchronizer};
pub use transaction::TransactionRunner;
pub use types::{TypeCategory, TypedRow};
pub use upsert::Upserter;
