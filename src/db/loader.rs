//! Batch loading by key with payload decoding.
//!
//! Rows are fetched with a single `SELECT * ... WHERE key IN (...)`. A column
//! named `data` stored as text or binary holds JSON and is decoded once per row
//! before the row is handed to its [`FetchShape`]. NULL payloads and columns the
//! driver already decodes as JSON pass through unchanged; a payload that is not
//! valid JSON fails the load with [`DbError::Decode`].

use crate::db::connection::DbSession;
use crate::db::types::{TypeCategory, TypedRow};
use crate::error::{DbError, DbResult};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use crate::models::{QueryParam, Row, validate_identifier};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::ops::Deref;
use tracing::debug;

/// Column whose JSON-encoded contents are decoded on load.
pub const PAYLOAD_COLUMN: &str = "data";

/// Key column used by [`BatchLoader::load`] and [`BatchLoader::load_multiple`].
pub const DEFAULT_KEY_COLUMN: &str = "id";

/// How a loaded row is materialized.
pub trait FetchShape: Sized {
    fn materialize(row: Row) -> DbResult<Self>;
}

/// Map-like rows: column name to JSON value, payload as a [`JsonValue`].
impl FetchShape for Row {
    fn materialize(row: Row) -> DbResult<Self> {
        Ok(row)
    }
}

/// Object-like rows: the whole row, payload included, deserialized into `T`.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<T>(pub T);

impl<T> Record<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Record<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: DeserializeOwned> FetchShape for Record<T> {
    fn materialize(row: Row) -> DbResult<Self> {
        serde_json::from_value(JsonValue::Object(row))
            .map(Record)
            .map_err(|e| DbError::decode("*", e.to_string()))
    }
}

/// Replace a text or binary `data` value with its decoded JSON.
pub fn decode_payload(row: TypedRow) -> DbResult<Row> {
    let category = row.category(PAYLOAD_COLUMN);
    let mut values = row.into_values();

    let decoded: JsonValue = match (category, values.get(PAYLOAD_COLUMN)) {
        (Some(TypeCategory::Text), Some(JsonValue::String(raw))) => serde_json::from_str(raw),
        // The row decoder renders binary columns as base64
        (Some(TypeCategory::Binary), Some(JsonValue::String(encoded))) => {
            let bytes = STANDARD
                .decode(encoded)
                .map_err(|e| DbError::decode(PAYLOAD_COLUMN, e.to_string()))?;
            serde_json::from_slice(&bytes)
        }
        _ => return Ok(values),
    }
    .map_err(|e| DbError::decode(PAYLOAD_COLUMN, e.to_string()))?;

    values.insert(PAYLOAD_COLUMN.to_string(), decoded);
    Ok(values)
}

pub struct BatchLoader;

impl BatchLoader {
    /// Load every row whose `id` is in `ids`. Order follows the database.
    pub async fn load_multiple<S: FetchShape>(
        session: &mut DbSession<'_>,
        table: &str,
        ids: &[QueryParam],
    ) -> DbResult<Vec<S>> {
        Self::load_multiple_by(session, table, DEFAULT_KEY_COLUMN, ids).await
    }

    /// Load one row by `id`; `None` when it does not exist.
    pub async fn load<S: FetchShape>(
        session: &mut DbSession<'_>,
        table: &str,
        id: QueryParam,
    ) -> DbResult<Option<S>> {
        Self::load_by(session, table, DEFAULT_KEY_COLUMN, id).await
    }

    pub async fn load_multiple_by<S: FetchShape>(
        session: &mut DbSession<'_>,
        table: &str,
        key_column: &str,
        ids: &[QueryParam],
    ) -> DbResult<Vec<S>> {
        validate_identifier(table)?;
        validate_identifier(key_column)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let db = session.db_type();
        let placeholders = (1..=ids.len())
            .map(|i| db.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT * FROM {} WHERE {} IN ({})",
            db.quote_ident(table),
            db.quote_ident(key_column),
            placeholders
        );

        let rows = session.fetch_typed(&sql, ids).await?;
        debug!(table, requested = ids.len(), found = rows.len(), "Batch loaded rows");

        rows.into_iter()
            .map(|row| S::materialize(decode_payload(row)?))
            .collect()
    }

    pub async fn load_by<S: FetchShape>(
        session: &mut DbSession<'_>,
        table: &str,
        key_column: &str,
        id: QueryParam,
    ) -> DbResult<Option<S>> {
        let rows = Self::load_multiple_by(session, table, key_column, &[id]).await?;
        Ok(rows.into_iter().next())
    }
}
