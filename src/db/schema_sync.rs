//! Declarative schema synchronization.
//!
//! [`SchemaSynchronizer::install`] snapshots the live schema, lets each
//! [`SchemaBuilder`] mutate a copy of it, and applies the additive difference:
//! new tables, new columns and new indexes. Nothing is dropped or altered;
//! objects that differ or disappear from the target are only reported at
//! debug level.
//!
//! Statements run one at a time. A statement that fails because its object
//! already exists is skipped so installs can be repeated; any other failure
//! aborts the install and rolls back the surrounding transaction.

use crate::db::connection::DbSession;
use crate::db::schema::SchemaInspector;
use crate::db::transaction::TransactionRunner;
use crate::db::types::normalize_type_name;
use crate::error::{DbError, DbResult};
use crate::models::{ColumnDefinition, DatabaseType, IndexInfo, Schema, TableSchema};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

/// Something that can declare tables, columns or indexes on a target schema.
pub trait SchemaBuilder {
    fn build(&self, schema: &mut Schema) -> DbResult<()>;
}

impl<F> SchemaBuilder for F
where
    F: Fn(&mut Schema) -> DbResult<()>,
{
    fn build(&self, schema: &mut Schema) -> DbResult<()> {
        self(schema)
    }
}

/// A declared schema adds whatever tables, columns and indexes the target lacks.
impl SchemaBuilder for Schema {
    fn build(&self, target: &mut Schema) -> DbResult<()> {
        for declared in &self.tables {
            let table = target.ensure_table(&declared.table_name)?;
            for column in &declared.columns {
                if !table.has_column(&column.name) {
                    table.add_column(column.clone())?;
                }
            }
            if table.primary_key.is_empty() && !declared.primary_key.is_empty() {
                let pk: Vec<&str> = declared.primary_key.iter().map(String::as_str).collect();
                table.set_primary_key(&pk)?;
            }
            for index in declared.secondary_indexes() {
                if !table.has_index(&index.name) {
                    table.add_index(index.clone())?;
                }
            }
        }
        Ok(())
    }
}

/// One additive DDL operation.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaOperation {
    CreateTable(TableSchema),
    AddColumn {
        table: String,
        column: ColumnDefinition,
    },
    CreateIndex {
        table: String,
        index: IndexInfo,
    },
}

impl SchemaOperation {
    /// Render the operation as a single statement for `db`.
    pub fn to_sql(&self, db: DatabaseType) -> String {
        match self {
            Self::CreateTable(table) => {
                let mut parts: Vec<String> = table
                    .columns
                    .iter()
                    .map(|c| column_sql(db, c))
                    .collect();
                if !table.primary_key.is_empty() {
                    parts.push(format!("PRIMARY KEY ({})", ident_list(db, &table.primary_key)));
                }
                format!(
                    "CREATE TABLE {} ({})",
                    db.quote_ident(&table.table_name),
                    parts.join(", ")
                )
            }
            Self::AddColumn { table, column } => format!(
                "ALTER TABLE {} ADD COLUMN {}",
                db.quote_ident(table),
                column_sql(db, column)
            ),
            Self::CreateIndex { table, index } => format!(
                "CREATE {}INDEX {} ON {} ({})",
                if index.is_unique { "UNIQUE " } else { "" },
                db.quote_ident(&index.name),
                db.quote_ident(table),
                ident_list(db, &index.columns)
            ),
        }
    }

    /// Short human-readable label for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::CreateTable(table) => format!("create table {}", table.table_name),
            Self::AddColumn { table, column } => format!("add column {}.{}", table, column.name),
            Self::CreateIndex { table, index } => format!("create index {} on {}", index.name, table),
        }
    }
}

fn ident_list(db: DatabaseType, names: &[String]) -> String {
    names
        .iter()
        .map(|n| db.quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_sql(db: DatabaseType, column: &ColumnDefinition) -> String {
    let mut sql = format!("{} {}", db.quote_ident(&column.name), column.data_type);
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default_value {
        sql.push_str(" DEFAULT ");
        sql.push_str(&default_literal(db, default));
    }
    if db == DatabaseType::MySQL {
        if let Some(extra) = column.extra.as_deref().filter(|e| !e.is_empty()) {
            sql.push(' ');
            sql.push_str(extra);
        }
    }
    sql
}

/// Render a default as SQL. Strings that look like expressions
/// (`CURRENT_TIMESTAMP`, `now()`) are emitted verbatim.
fn default_literal(db: DatabaseType, value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => match (db, b) {
            (DatabaseType::PostgreSQL, true) => "TRUE".to_string(),
            (DatabaseType::PostgreSQL, false) => "FALSE".to_string(),
            (_, true) => "1".to_string(),
            (_, false) => "0".to_string(),
        },
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) if is_sql_expression(s) => s.clone(),
        JsonValue::String(s) => quote_literal(s),
        other => quote_literal(&other.to_string()),
    }
}

fn is_sql_expression(s: &str) -> bool {
    let upper = s.trim().to_ascii_uppercase();
    matches!(
        upper.as_str(),
        "CURRENT_TIMESTAMP" | "CURRENT_DATE" | "CURRENT_TIME" | "NULL"
    ) || upper.ends_with(')')
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Ordered additive operations turning one schema into another.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDelta {
    pub operations: Vec<SchemaOperation>,
}

impl SchemaDelta {
    /// Diff `origin` (live) against `target` (declared). Tables are visited in
    /// target declaration order.
    pub fn between(origin: &Schema, target: &Schema) -> Self {
        let mut operations = Vec::new();

        for table in &target.tables {
            let Some(live) = origin.table(&table.table_name) else {
                operations.push(SchemaOperation::CreateTable(table.clone()));
                operations.extend(table.secondary_indexes().map(|index| {
                    SchemaOperation::CreateIndex {
                        table: table.table_name.clone(),
                        index: index.clone(),
                    }
                }));
                continue;
            };

            for column in &table.columns {
                match live.column(&column.name) {
                    None => operations.push(SchemaOperation::AddColumn {
                        table: table.table_name.clone(),
                        column: column.clone(),
                    }),
                    Some(existing) => report_column_drift(&table.table_name, existing, column),
                }
            }

            for index in table.secondary_indexes() {
                if !live.has_index(&index.name) {
                    operations.push(SchemaOperation::CreateIndex {
                        table: table.table_name.clone(),
                        index: index.clone(),
                    });
                }
            }

            for column in live.columns.iter().filter(|c| !table.has_column(&c.name)) {
                debug!(
                    table = %table.table_name,
                    column = %column.name,
                    "Live column absent from target; not dropped"
                );
            }
        }

        for live in origin.tables.iter().filter(|t| !target.has_table(&t.table_name)) {
            debug!(table = %live.table_name, "Live table absent from target; not dropped");
        }

        Self { operations }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

fn report_column_drift(table: &str, live: &ColumnDefinition, target: &ColumnDefinition) {
    let live_type = normalize_type_name(&live.data_type);
    let target_type = normalize_type_name(&target.data_type);
    if live_type != target_type || live.nullable != target.nullable {
        debug!(
            table,
            column = %target.name,
            live_type = %live.data_type,
            target_type = %target.data_type,
            live_nullable = live.nullable,
            target_nullable = target.nullable,
            "Column definition differs; not altered"
        );
    }
}

pub struct SchemaSynchronizer;

impl SchemaSynchronizer {
    /// Bring the live schema up to what `builders` declare, inside one transaction.
    pub async fn install(
        session: &mut DbSession<'_>,
        builders: &[&dyn SchemaBuilder],
    ) -> DbResult<()> {
        TransactionRunner::run(session, async |tx: &mut DbSession<'_>| {
            let origin = SchemaInspector::snapshot(tx).await?;
            let mut target = origin.clone();
            for builder in builders {
                builder.build(&mut target)?;
            }
            let delta = SchemaDelta::between(&origin, &target);
            Self::apply(tx, &delta).await
        })
        .await
    }

    /// Execute `delta` statement by statement, skipping objects that already exist.
    pub async fn apply(session: &mut DbSession<'_>, delta: &SchemaDelta) -> DbResult<()> {
        let db = session.db_type();
        let mut applied = 0usize;
        let mut tolerated = 0usize;

        for operation in &delta.operations {
            let sql = operation.to_sql(db);
            let result = if db == DatabaseType::PostgreSQL {
                // Any error aborts a PostgreSQL transaction; the savepoint contains it
                TransactionRunner::run(session, async |sp: &mut DbSession<'_>| {
                    sp.execute(&sql, &[]).await
                })
                .await
            } else {
                session.execute(&sql, &[]).await
            };

            match result {
                Ok(_) => {
                    applied += 1;
                    debug!(operation = %operation.describe(), "Applied schema operation");
                }
                Err(err) if err.is_object_exists() => {
                    tolerated += 1;
                    warn!(
                        operation = %operation.describe(),
                        error = %err,
                        "Schema object already exists; skipped"
                    );
                }
                Err(err) => return Err(DbError::schema_apply(sql, &err)),
            }
        }

        info!(
            db_type = %db,
            applied,
            tolerated,
            "Schema install complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items_table() -> TableSchema {
        let mut table = TableSchema::new("items");
        table
            .add_column(ColumnDefinition::new("id", "INTEGER", false))
            .unwrap()
            .add_column(ColumnDefinition::new("kind", "VARCHAR(20)", true).with_default(json!("misc")))
            .unwrap()
            .set_primary_key(&["id"])
            .unwrap()
            .add_index(IndexInfo::new("idx_items_kind", vec!["kind".into()]))
            .unwrap();
        table
    }

    #[test]
    fn test_new_table_creates_table_then_indexes() {
        let mut target = Schema::new();
        target.tables.push(items_table());

        let delta = SchemaDelta::between(&Schema::new(), &target);
        assert_eq!(delta.len(), 2);
        assert!(matches!(delta.operations[0], SchemaOperation::CreateTable(_)));
        assert!(matches!(
            delta.operations[1],
            SchemaOperation::CreateIndex { ref index, .. } if index.name == "idx_items_kind"
        ));
    }

    #[test]
    fn test_existing_table_adds_missing_only() {
        let mut origin = Schema::new();
        origin.tables.push(
            TableSchema::new("items")
                .with_column(ColumnDefinition::new("id", "integer", false))
                .with_primary_key(vec!["id".into()]),
        );
        let mut target = Schema::new();
        target.tables.push(items_table());

        let delta = SchemaDelta::between(&origin, &target);
        let labels: Vec<String> = delta.operations.iter().map(|o| o.describe()).collect();
        assert_eq!(
            labels,
            vec!["add column items.kind", "create index idx_items_kind on items"]
        );
    }

    #[test]
    fn test_identical_schemas_produce_empty_delta() {
        let mut schema = Schema::new();
        schema.tables.push(items_table());
        assert!(SchemaDelta::between(&schema, &schema.clone()).is_empty());
    }

    #[test]
    fn test_dropped_objects_not_emitted() {
        let mut origin = Schema::new();
        origin.tables.push(items_table());
        origin.tables.push(TableSchema::new("legacy"));
        let mut target = Schema::new();
        target.tables.push(TableSchema::new("items").with_column(ColumnDefinition::new("id", "INTEGER", false)));

        assert!(SchemaDelta::between(&origin, &target).is_empty());
    }

    #[test]
    fn test_create_table_sql_per_engine() {
        let op = SchemaOperation::CreateTable(items_table());
        assert_eq!(
            op.to_sql(DatabaseType::SQLite),
            r#"CREATE TABLE "items" ("id" INTEGER NOT NULL, "kind" VARCHAR(20) DEFAULT 'misc', PRIMARY KEY ("id"))"#
        );
        assert_eq!(
            op.to_sql(DatabaseType::MySQL),
            "CREATE TABLE `items` (`id` INTEGER NOT NULL, `kind` VARCHAR(20) DEFAULT 'misc', PRIMARY KEY (`id`))"
        );
    }

    #[test]
    fn test_mysql_extra_only_on_mysql() {
        let column = ColumnDefinition::new("id", "BIGINT", false).with_extra("auto_increment");
        assert_eq!(
            column_sql(DatabaseType::MySQL, &column),
            "`id` BIGINT NOT NULL auto_increment"
        );
        assert_eq!(column_sql(DatabaseType::PostgreSQL, &column), r#""id" BIGINT NOT NULL"#);
    }

    #[test]
    fn test_default_literals() {
        assert_eq!(default_literal(DatabaseType::SQLite, &json!("it's")), "'it''s'");
        assert_eq!(default_literal(DatabaseType::PostgreSQL, &json!(true)), "TRUE");
        assert_eq!(default_literal(DatabaseType::MySQL, &json!(false)), "0");
        assert_eq!(default_literal(DatabaseType::MySQL, &json!(12)), "12");
        assert_eq!(
            default_literal(DatabaseType::MySQL, &json!("CURRENT_TIMESTAMP")),
            "CURRENT_TIMESTAMP"
        );
    }

    #[test]
    fn test_unique_index_sql() {
        let op = SchemaOperation::CreateIndex {
            table: "users".into(),
            index: IndexInfo::new("uq_users_email", vec!["email".into()]).with_unique(true),
        };
        assert_eq!(
            op.to_sql(DatabaseType::PostgreSQL),
            r#"CREATE UNIQUE INDEX "uq_users_email" ON "users" ("email")"#
        );
    }

    #[test]
    fn test_declared_schema_merges_into_target() {
        let mut declared = Schema::new();
        declared.tables.push(items_table());

        let mut target = Schema::new();
        target.tables.push(
            TableSchema::new("items")
                .with_column(ColumnDefinition::new("id", "INTEGER", false))
                .with_column(ColumnDefinition::new("extra", "TEXT", true)),
        );

        declared.build(&mut target).unwrap();
        let items = target.table("items").unwrap();
        assert!(items.has_column("extra"));
        assert!(items.has_column("kind"));
        assert!(items.has_index("idx_items_kind"));
        assert_eq!(items.primary_key, vec!["id"]);
    }

    #[test]
    fn test_closure_builder() {
        let builder = |schema: &mut Schema| -> DbResult<()> {
            schema
                .create_table("events")?
                .add_column(ColumnDefinition::new("id", "INTEGER", false))?;
            Ok(())
        };
        let mut target = Schema::new();
        builder.build(&mut target).unwrap();
        assert!(target.has_table("events"));
    }
}
