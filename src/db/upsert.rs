//! Insert-or-update by key columns.

use crate::db::connection::DbSession;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam, validate_identifier};
use tracing::debug;

pub struct Upserter;

impl Upserter {
    /// Update the row matching every `keys` pair, or insert `keys` ∪ `fields`
    /// when no such row exists.
    ///
    /// The check and the write are separate statements; wrap the call in a
    /// transaction or a lock if concurrent writers can race on the same key.
    /// Returns the number of affected rows. An existing row with no `fields`
    /// to set returns 0 without writing.
    pub async fn merge(
        session: &mut DbSession<'_>,
        table: &str,
        keys: &[(&str, QueryParam)],
        fields: &[(&str, QueryParam)],
    ) -> DbResult<u64> {
        if keys.is_empty() {
            return Err(DbError::invalid_input("merge requires at least one key column"));
        }
        validate_identifier(table)?;
        for (column, _) in keys.iter().chain(fields) {
            validate_identifier(column)?;
        }

        let db = session.db_type();
        let key_params: Vec<QueryParam> = keys.iter().map(|(_, v)| v.clone()).collect();

        let exists_sql = format!(
            "SELECT 1 AS present FROM {} WHERE {} LIMIT 1",
            db.quote_ident(table),
            where_clause(db, keys, 1)
        );
        let exists = !session.fetch_all(&exists_sql, &key_params).await?.is_empty();

        if exists {
            if fields.is_empty() {
                debug!(table, "Row exists and no fields to update");
                return Ok(0);
            }
            let (sql, params) = update_statement(db, table, keys, fields);
            debug!(table, "Updating existing row");
            session.execute(&sql, &params).await
        } else {
            let (sql, params) = insert_statement(db, table, keys, fields);
            debug!(table, "Inserting new row");
            session.execute(&sql, &params).await
        }
    }
}

/// `a = ? AND b = ?` with placeholders numbered from `first`.
fn where_clause(db: DatabaseType, keys: &[(&str, QueryParam)], first: usize) -> String {
    keys.iter()
        .enumerate()
        .map(|(i, (column, _))| format!("{} = {}", db.quote_ident(column), db.placeholder(first + i)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn update_statement(
    db: DatabaseType,
    table: &str,
    keys: &[(&str, QueryParam)],
    fields: &[(&str, QueryParam)],
) -> (String, Vec<QueryParam>) {
    let assignments = fields
        .iter()
        .enumerate()
        .map(|(i, (column, _))| format!("{} = {}", db.quote_ident(column), db.placeholder(i + 1)))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        db.quote_ident(table),
        assignments,
        where_clause(db, keys, fields.len() + 1)
    );
    let params = fields
        .iter()
        .chain(keys)
        .map(|(_, value)| value.clone())
        .collect();
    (sql, params)
}

fn insert_statement(
    db: DatabaseType,
    table: &str,
    keys: &[(&str, QueryParam)],
    fields: &[(&str, QueryParam)],
) -> (String, Vec<QueryParam>) {
    // Key columns take precedence over a field with the same name
    let mut columns: Vec<&str> = Vec::with_capacity(keys.len() + fields.len());
    let mut params = Vec::with_capacity(keys.len() + fields.len());
    for (column, value) in keys.iter().chain(fields) {
        if !columns.contains(column) {
            columns.push(*column);
            params.push(value.clone());
        }
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        db.quote_ident(table),
        columns
            .iter()
            .map(|c| db.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", "),
        (1..=columns.len())
            .map(|i| db.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ")
    );
    (sql, params)
}
