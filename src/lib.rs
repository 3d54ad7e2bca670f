//! db-toolkit library.
//!
//! Database access utilities for MySQL, PostgreSQL and SQLite: connection
//! resolution from the environment, advisory locks, transactions, additive
//! schema synchronization, upserts and batch loading.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use cache::ProcessCache;
pub use config::Config;
pub use error::{DbError, DbResult};
