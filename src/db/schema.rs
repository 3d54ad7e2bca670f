//! Schema introspection module.
//!
//! Captures the live schema of the connected database as a [`Schema`]: every
//! base table with its columns, primary key and indexes. Views, foreign keys
//! and storage metadata are not part of the snapshot.
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! database type. Database-specific implementations are in their respective
//! submodules (postgres, mysql, sqlite), each providing the same interface.

use crate::db::connection::DbSession;
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::{ColumnDefinition, IndexInfo, Schema, TableSchema};
use tracing::debug;

/// Schema inspector for database introspection.
pub struct SchemaInspector;

impl SchemaInspector {
    /// Snapshot every base table in the current database or schema.
    pub async fn snapshot(session: &mut DbSession<'_>) -> DbResult<Schema> {
        let table_names = Self::list_tables(session).await?;
        let mut schema = Schema::new();
        for name in &table_names {
            let table = Self::describe_table(session, name).await?;
            schema.tables.push(table);
        }
        debug!(
            db_type = %session.db_type(),
            tables = schema.tables.len(),
            "Captured schema snapshot"
        );
        Ok(schema)
    }

    /// List base table names, sorted.
    pub async fn list_tables(session: &mut DbSession<'_>) -> DbResult<Vec<String>> {
        impl_db_dispatch!(session, {
            MySql(c) => mysql::list_tables(c).await,
            Postgres(c) => postgres::list_tables(c).await,
            SQLite(c) => sqlite::list_tables(c).await,
        })
    }

    /// Describe a table's columns, primary key and indexes.
    pub async fn describe_table(
        session: &mut DbSession<'_>,
        table_name: &str,
    ) -> DbResult<TableSchema> {
        let (columns, indexes) = impl_db_dispatch!(session, {
            MySql(c) => (
                mysql::fetch_columns(c, table_name).await?,
                mysql::fetch_indexes(c, table_name).await?,
            ),
            Postgres(c) => (
                postgres::fetch_columns(c, table_name).await?,
                postgres::fetch_indexes(c, table_name).await?,
            ),
            SQLite(c) => (
                sqlite::fetch_columns(c, table_name).await?,
                sqlite::fetch_indexes(c, table_name).await?,
            ),
        });

        if columns.is_empty() {
            return Err(DbError::schema(
                format!("Table '{}' not found", table_name),
                table_name.to_string(),
            ));
        }

        Ok(assemble_table(table_name, columns, indexes))
    }
}

/// Each column carries its position within the primary key; the key is
/// ordered by it, columns keep their table order.
fn assemble_table(
    table_name: &str,
    columns: Vec<(ColumnDefinition, u32)>,
    indexes: Vec<IndexInfo>,
) -> TableSchema {
    let mut pk: Vec<(u32, String)> = columns
        .iter()
        .filter(|(c, _)| c.is_primary_key)
        .map(|(c, ordinal)| (*ordinal, c.name.clone()))
        .collect();
    pk.sort_by_key(|(ordinal, _)| *ordinal);

    TableSchema {
        table_name: table_name.to_string(),
        columns: columns.into_iter().map(|(c, _)| c).collect(),
        primary_key: pk.into_iter().map(|(_, name)| name).collect(),
        indexes,
    }
}

mod queries {
    pub mod postgres {
        pub const LIST_TABLES: &str = r#"
            SELECT table_name::text AS table_name
            FROM information_schema.tables
            WHERE table_schema = current_schema()
            AND table_type = 'BASE TABLE'
            ORDER BY table_name
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            c.column_name::text AS column_name,
            format_type(a.atttypid, a.atttypmod) AS column_type,
            c.is_nullable::text AS is_nullable,
            c.column_default::text AS column_default,
            c.ordinal_position::int4 AS ordinal_position,
            CASE WHEN pk.column_name IS NOT NULL THEN true ELSE false END AS is_primary_key
        FROM information_schema.columns c
        JOIN pg_class t ON t.relname = c.table_name
        JOIN pg_namespace n ON n.oid = t.relnamespace AND n.nspname = c.table_schema
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attname = c.column_name
        LEFT JOIN (
            SELECT kcu.column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            WHERE tc.table_name = $1
            AND tc.table_schema = current_schema()
            AND tc.constraint_type = 'PRIMARY KEY'
        ) pk ON c.column_name = pk.column_name
        WHERE c.table_name = $1 AND c.table_schema = current_schema()
        ORDER BY c.ordinal_position
        "#;

        pub const DESCRIBE_INDEXES: &str = r#"
        SELECT
            i.relname::text AS index_name,
            array_agg(a.attname::text ORDER BY array_position(ix.indkey, a.attnum)) AS column_names,
            ix.indisunique AS is_unique,
            ix.indisprimary AS is_primary
        FROM pg_index ix
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_class t ON t.oid = ix.indrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
        WHERE t.relname = $1 AND n.nspname = current_schema()
        GROUP BY i.relname, ix.indisunique, ix.indisprimary
        ORDER BY i.relname
        "#;
    }

    pub mod mysql {
        pub const LIST_TABLES: &str = r#"
            SELECT CONVERT(TABLE_NAME USING utf8) AS TABLE_NAME
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE()
            AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
            CONVERT(COLUMN_TYPE USING utf8) AS COLUMN_TYPE,
            CONVERT(IS_NULLABLE USING utf8) AS IS_NULLABLE,
            CONVERT(COLUMN_DEFAULT USING utf8) AS COLUMN_DEFAULT,
            CONVERT(COLUMN_KEY USING utf8) AS COLUMN_KEY,
            CONVERT(EXTRA USING utf8) AS EXTRA
        FROM information_schema.columns
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = DATABASE()
        ORDER BY ORDINAL_POSITION
        "#;

        pub const DESCRIBE_PRIMARY_KEY: &str = r#"
        SELECT CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME
        FROM information_schema.KEY_COLUMN_USAGE
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = DATABASE()
        AND CONSTRAINT_NAME = 'PRIMARY'
        ORDER BY ORDINAL_POSITION
        "#;

        pub const DESCRIBE_INDEXES: &str = r#"
        SELECT
            CONVERT(INDEX_NAME USING utf8) AS INDEX_NAME,
            CONVERT(GROUP_CONCAT(COLUMN_NAME ORDER BY SEQ_IN_INDEX) USING utf8) AS COLUMN_NAMES,
            CAST(NOT NON_UNIQUE AS SIGNED) AS IS_UNIQUE
        FROM information_schema.STATISTICS
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = DATABASE()
        GROUP BY INDEX_NAME, NON_UNIQUE
        ORDER BY INDEX_NAME
        "#;
    }

    pub mod sqlite {
        pub const LIST_TABLES: &str = r#"
            SELECT name FROM sqlite_master
            WHERE type = 'table'
            AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#;
    }
}

mod postgres {
    use super::*;
    use sqlx::{PgConnection, Row};

    pub async fn list_tables(conn: &mut PgConnection) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::postgres::LIST_TABLES)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter()
            .map(|row| Ok(row.try_get::<String, _>("table_name")?))
            .collect()
    }

    pub async fn fetch_columns(
        conn: &mut PgConnection,
        table_name: &str,
    ) -> DbResult<Vec<(ColumnDefinition, u32)>> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_COLUMNS)
            .bind(table_name)
            .fetch_all(&mut *conn)
            .await?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get("column_name")?;
                let column_type: String = row.try_get("column_type")?;
                let nullable: String = row.try_get("is_nullable")?;
                let default_value: Option<String> = row.try_get("column_default").ok().flatten();
                let ordinal: i32 = row.try_get("ordinal_position")?;
                let is_pk: bool = row.try_get("is_primary_key")?;

                let mut col = ColumnDefinition::new(&name, &column_type, nullable == "YES")
                    .with_primary_key(is_pk);
                if let Some(ref def) = default_value {
                    col = col.with_default_str(def);
                }
                Ok((col, ordinal.max(0) as u32))
            })
            .collect()
    }

    pub async fn fetch_indexes(
        conn: &mut PgConnection,
        table_name: &str,
    ) -> DbResult<Vec<IndexInfo>> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_INDEXES)
            .bind(table_name)
            .fetch_all(&mut *conn)
            .await?;

        let mut indexes = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get("index_name")?;
            let columns: Vec<String> = row.try_get("column_names")?;
            let is_unique: bool = row.try_get("is_unique")?;
            let is_primary: bool = row.try_get("is_primary")?;
            if !columns.is_empty() {
                indexes.push(
                    IndexInfo::new(name, columns)
                        .with_unique(is_unique)
                        .with_primary(is_primary),
                );
            }
        }
        Ok(indexes)
    }
}

mod mysql {
    use super::*;
    use sqlx::{MySqlConnection, Row};

    /// Safely get a string from a MySQL row.
    /// MySQL may return VARBINARY instead of VARCHAR depending on charset configuration.
    fn get_string(row: &sqlx::mysql::MySqlRow, column: &str) -> String {
        get_optional_string(row, column).unwrap_or_default()
    }

    fn get_optional_string(row: &sqlx::mysql::MySqlRow, column: &str) -> Option<String> {
        row.try_get::<Option<String>, _>(column)
            .ok()
            .flatten()
            .or_else(|| {
                row.try_get::<Option<Vec<u8>>, _>(column)
                    .ok()
                    .flatten()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
    }

    pub async fn list_tables(conn: &mut MySqlConnection) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::mysql::LIST_TABLES)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows
            .iter()
            .map(|row| get_string(row, "TABLE_NAME"))
            .filter(|name| !name.is_empty())
            .collect())
    }

    pub async fn fetch_columns(
        conn: &mut MySqlConnection,
        table_name: &str,
    ) -> DbResult<Vec<(ColumnDefinition, u32)>> {
        let pk_rows = sqlx::query(queries::mysql::DESCRIBE_PRIMARY_KEY)
            .bind(table_name)
            .fetch_all(&mut *conn)
            .await?;
        let pk_order: Vec<String> = pk_rows
            .iter()
            .map(|row| get_string(row, "COLUMN_NAME"))
            .collect();

        let rows = sqlx::query(queries::mysql::DESCRIBE_COLUMNS)
            .bind(table_name)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name = get_string(row, "COLUMN_NAME");
                let column_type = get_string(row, "COLUMN_TYPE");
                let nullable = get_string(row, "IS_NULLABLE");
                let default_value = get_optional_string(row, "COLUMN_DEFAULT");
                let is_pk = get_string(row, "COLUMN_KEY") == "PRI";
                let extra = get_optional_string(row, "EXTRA");

                let mut col = ColumnDefinition::new(&name, &column_type, nullable == "YES")
                    .with_primary_key(is_pk);
                if let Some(ref def) = default_value {
                    col = col.with_default_str(def);
                }
                if let Some(e) = extra.filter(|e| !e.is_empty()) {
                    col = col.with_extra(e);
                }
                let ordinal = pk_order
                    .iter()
                    .position(|pk| *pk == name)
                    .unwrap_or(usize::MAX) as u32;
                (col, ordinal)
            })
            .collect())
    }

    pub async fn fetch_indexes(
        conn: &mut MySqlConnection,
        table_name: &str,
    ) -> DbResult<Vec<IndexInfo>> {
        let rows = sqlx::query(queries::mysql::DESCRIBE_INDEXES)
            .bind(table_name)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name = get_string(row, "INDEX_NAME");
                let columns_str = get_string(row, "COLUMN_NAMES");
                let is_unique: i64 = row.try_get("IS_UNIQUE").unwrap_or(0);
                let columns: Vec<String> = columns_str.split(',').map(|s| s.to_string()).collect();
                let is_primary = name == "PRIMARY";

                IndexInfo::new(name, columns)
                    .with_unique(is_unique != 0)
                    .with_primary(is_primary)
            })
            .collect())
    }
}

mod sqlite {
    use super::*;
    use sqlx::{Row, SqliteConnection};

    pub async fn list_tables(conn: &mut SqliteConnection) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::sqlite::LIST_TABLES)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter()
            .map(|row| Ok(row.try_get::<String, _>("name")?))
            .collect()
    }

    pub async fn fetch_columns(
        conn: &mut SqliteConnection,
        table_name: &str,
    ) -> DbResult<Vec<(ColumnDefinition, u32)>> {
        let pragma_query = format!("PRAGMA table_info('{}')", table_name.replace('\'', "''"));
        let rows = sqlx::query(&pragma_query).fetch_all(&mut *conn).await?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get("name")?;
                let data_type: String = row.try_get("type")?;
                let notnull: i32 = row.try_get("notnull")?;
                let default_value: Option<String> = row.try_get("dflt_value").ok().flatten();
                // PRAGMA reports the 1-based position within the primary key, 0 otherwise
                let pk: i32 = row.try_get("pk")?;

                let mut col = ColumnDefinition::new(&name, &data_type, notnull == 0)
                    .with_primary_key(pk > 0);
                if let Some(ref def) = default_value {
                    col = col.with_default_str(def);
                }
                Ok((col, pk.max(0) as u32))
            })
            .collect()
    }

    pub async fn fetch_indexes(
        conn: &mut SqliteConnection,
        table_name: &str,
    ) -> DbResult<Vec<IndexInfo>> {
        let idx_query = format!("PRAGMA index_list('{}')", table_name.replace('\'', "''"));
        let idx_list = sqlx::query(&idx_query).fetch_all(&mut *conn).await?;

        let mut indexes = Vec::new();
        for idx_row in &idx_list {
            let name: String = idx_row.try_get("name")?;
            let is_unique: i32 = idx_row.try_get("unique")?;
            let origin: String = idx_row.try_get("origin").unwrap_or_default();
            let is_primary = origin == "pk";

            let columns = fetch_index_columns(conn, &name).await?;
            if !columns.is_empty() {
                indexes.push(
                    IndexInfo::new(name, columns)
                        .with_unique(is_unique != 0)
                        .with_primary(is_primary),
                );
            }
        }
        indexes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(indexes)
    }

    async fn fetch_index_columns(
        conn: &mut SqliteConnection,
        index_name: &str,
    ) -> DbResult<Vec<String>> {
        let query = format!("PRAGMA index_info('{}')", index_name.replace('\'', "''"));
        let rows = sqlx::query(&query).fetch_all(&mut *conn).await?;
        // Expression indexes report a NULL column name
        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<Option<String>, _>("name").ok().flatten())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbConnection;

    #[test]
    fn test_assemble_table_orders_primary_key() {
        let columns = vec![
            (ColumnDefinition::new("b", "INTEGER", false).with_primary_key(true), 2),
            (ColumnDefinition::new("a", "INTEGER", false).with_primary_key(true), 1),
            (ColumnDefinition::new("c", "TEXT", true), 0),
        ];
        let table = assemble_table("t", columns, Vec::new());
        assert_eq!(table.primary_key, vec!["a", "b"]);
        assert_eq!(table.columns[0].name, "b");
    }

    #[tokio::test]
    async fn test_sqlite_snapshot() {
        let mut conn = DbConnection::open("sqlite::memory:").await.unwrap();
        let mut session = conn.session();
        session
            .execute(
                "CREATE TABLE items (id INTEGER PRIMARY KEY, kind TEXT NOT NULL DEFAULT 'x', data TEXT)",
                &[],
            )
            .await
            .unwrap();
        session
            .execute("CREATE INDEX idx_items_kind ON items (kind)", &[])
            .await
            .unwrap();

        let schema = SchemaInspector::snapshot(&mut session).await.unwrap();
        let items = schema.table("items").unwrap();
        assert_eq!(items.primary_key, vec!["id"]);
        assert!(!items.column("kind").unwrap().nullable);
        assert_eq!(
            items.column("kind").unwrap().default_value,
            Some(serde_json::json!("x"))
        );
        assert!(items.has_index("idx_items_kind"));
    }

    #[tokio::test]
    async fn test_describe_missing_table() {
        let mut conn = DbConnection::open("sqlite::memory:").await.unwrap();
        let err = SchemaInspector::describe_table(&mut conn.session(), "ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Schema { .. }));
    }
}
