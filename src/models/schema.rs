//! Schema-related data models.
//!
//! A [`Schema`] is either a snapshot of the live database or the target a caller
//! declares; both use the same types so they can be diffed structurally.

use crate::error::{DbError, DbResult};
use crate::models::connection::validate_identifier;
use serde::{Deserialize, Serialize};

/// An ordered collection of table definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub tables: Vec<TableSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.table_name == name)
    }

    /// Look up a table for modification; errors if it was never declared.
    pub fn table_mut(&mut self, name: &str) -> DbResult<&mut TableSchema> {
        self.tables
            .iter_mut()
            .find(|t| t.table_name == name)
            .ok_or_else(|| DbError::schema(format!("Table '{}' not found", name), name))
    }

    /// Declare a new table. Errors if the schema already has one with this name.
    pub fn create_table(&mut self, name: &str) -> DbResult<&mut TableSchema> {
        validate_identifier(name)?;
        if self.has_table(name) {
            return Err(DbError::schema(
                format!("Table '{}' already declared", name),
                name,
            ));
        }
        self.tables.push(TableSchema::new(name));
        // Just pushed, so the vector cannot be empty.
        let last = self.tables.len() - 1;
        Ok(&mut self.tables[last])
    }

    /// The existing table with this name, or a newly declared empty one.
    pub fn ensure_table(&mut self, name: &str) -> DbResult<&mut TableSchema> {
        match self.tables.iter().position(|t| t.table_name == name) {
            Some(idx) => Ok(&mut self.tables[idx]),
            None => self.create_table(name),
        }
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.table_name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub indexes: Vec<IndexInfo>,
}

impl TableSchema {
    /// Create a new table schema.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Add a column definition (builder form).
    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    /// Set the primary key columns (builder form).
    pub fn with_primary_key(mut self, columns: Vec<String>) -> Self {
        self.primary_key = columns;
        self
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.iter().any(|i| i.name == name)
    }

    /// Add a column unless one with the same name exists.
    pub fn add_column(&mut self, column: ColumnDefinition) -> DbResult<&mut Self> {
        validate_identifier(&column.name)?;
        if self.has_column(&column.name) {
            return Err(DbError::schema(
                format!("Column '{}' already declared", column.name),
                format!("{}.{}", self.table_name, column.name),
            ));
        }
        if column.is_primary_key && !self.primary_key.contains(&column.name) {
            self.primary_key.push(column.name.clone());
        }
        self.columns.push(column);
        Ok(self)
    }

    /// Set the primary key; every column must already be declared.
    pub fn set_primary_key(&mut self, columns: &[&str]) -> DbResult<&mut Self> {
        for col in columns {
            if !self.has_column(col) {
                return Err(DbError::schema(
                    format!("Primary key column '{}' is not declared", col),
                    format!("{}.{}", self.table_name, col),
                ));
            }
        }
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        for col in &mut self.columns {
            col.is_primary_key = self.primary_key.contains(&col.name);
        }
        Ok(self)
    }

    /// Add an index over declared columns.
    pub fn add_index(&mut self, index: IndexInfo) -> DbResult<&mut Self> {
        validate_identifier(&index.name)?;
        if index.columns.is_empty() {
            return Err(DbError::schema("Index has no columns", index.name));
        }
        if self.has_index(&index.name) {
            return Err(DbError::schema(
                format!("Index '{}' already declared", index.name),
                index.name,
            ));
        }
        if let Some(missing) = index.columns.iter().find(|c| !self.has_column(c)) {
            return Err(DbError::schema(
                format!("Index column '{}' is not declared", missing),
                format!("{}.{}", self.table_name, missing),
            ));
        }
        self.indexes.push(index);
        Ok(self)
    }

    /// Indexes that are not the implicit primary key index.
    pub fn secondary_indexes(&self) -> impl Iterator<Item = &IndexInfo> {
        self.indexes.iter().filter(|i| !i.is_primary)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// Full type as the engine spells it (e.g., `varchar(30)`, `bigint unsigned`)
    pub data_type: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Literal default value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
    #[serde(default)]
    pub is_primary_key: bool,
    /// MySQL only (e.g., `auto_increment`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ColumnDefinition {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            default_value: None,
            is_primary_key: false,
            extra: None,
        }
    }

    /// Set whether this is a primary key column.
    pub fn with_primary_key(mut self, is_pk: bool) -> Self {
        self.is_primary_key = is_pk;
        self
    }

    /// Set the default value (as JSON value).
    pub fn with_default(mut self, default_value: serde_json::Value) -> Self {
        self.default_value = Some(default_value);
        self
    }

    /// Set the default value from a string, converting to appropriate JSON type
    /// based on the column's data_type.
    pub fn with_default_str(mut self, default_str: &str) -> Self {
        self.default_value = Some(parse_default_value(default_str, &self.data_type));
        self
    }

    /// Set the extra attributes (MySQL only).
    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default)]
    pub is_primary: bool,
}

impl IndexInfo {
    /// Create a new index info.
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            is_unique: false,
            is_primary: false,
        }
    }

    /// Set whether this is a unique index.
    pub fn with_unique(mut self, is_unique: bool) -> Self {
        self.is_unique = is_unique;
        self
    }

    /// Set whether this is the primary key index.
    pub fn with_primary(mut self, is_primary: bool) -> Self {
        self.is_primary = is_primary;
        if is_primary {
            self.is_unique = true;
        }
        self
    }
}

/// Parse an introspected default value string into a JSON literal based on
/// the column data type. Expressions (CURRENT_TIMESTAMP, nextval) stay strings.
pub fn parse_default_value(default_str: &str, data_type: &str) -> serde_json::Value {
    let dt_lower = data_type.to_lowercase();
    let trimmed = default_str.trim_matches('\'');

    if dt_lower.contains("int") || dt_lower.contains("serial") {
        if let Ok(n) = trimmed.parse::<i64>() {
            return serde_json::Value::Number(n.into());
        }
    }

    if dt_lower.contains("float") || dt_lower.contains("double") || dt_lower == "real" {
        if let Some(num) = trimmed
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
        {
            return serde_json::Value::Number(num);
        }
    }

    if dt_lower.contains("bool") {
        match trimmed.to_lowercase().as_str() {
            "true" | "1" | "t" => return serde_json::Value::Bool(true),
            "false" | "0" | "f" => return serde_json::Value::Bool(false),
            _ => {}
        }
    }

    serde_json::Value::String(trimmed.to_string())
}
