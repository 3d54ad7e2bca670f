//! Database-agnostic type mappings.
//!
//! Rows come back from the executor as JSON maps so callers never depend on
//! a particular engine's row type.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction

use crate::models::{DatabaseType, Row};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row as SqlxRow, Type, TypeInfo};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    Text,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Checked first: "numeric" would otherwise fall through to float
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC affinity stores floats
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    // varchar, text, char, date, time, uuid...
    TypeCategory::Text
}

/// Raw DECIMAL/NUMERIC value, preserving the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Binary values are returned base64-encoded.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// A decoded row together with the category each value was decoded as.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRow {
    pub values: Row,
    categories: HashMap<String, TypeCategory>,
}

impl TypedRow {
    pub fn category(&self, column: &str) -> Option<TypeCategory> {
        self.categories.get(column).copied()
    }

    pub fn into_values(self) -> Row {
        self.values
    }
}

impl FromIterator<(String, TypeCategory, JsonValue)> for TypedRow {
    fn from_iter<I: IntoIterator<Item = (String, TypeCategory, JsonValue)>>(iter: I) -> Self {
        let mut row = TypedRow {
            values: Row::new(),
            categories: HashMap::new(),
        };
        for (name, category, value) in iter {
            row.categories.insert(name.clone(), category);
            row.values.insert(name, value);
        }
        row
    }
}

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_typed_row(&self) -> TypedRow;
    fn column_names(&self) -> Vec<String>;

    fn to_json_map(&self) -> Row {
        self.to_typed_row().into_values()
    }
}

macro_rules! impl_row_to_json {
    ($row:ty, $categorize:path, $decoder:path) => {
        impl RowToJson for $row {
            fn to_typed_row(&self) -> TypedRow {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let category = $categorize(self, idx);
                        (col.name().to_string(), category, $decoder(self, idx, category))
                    })
                    .collect()
            }

            fn column_names(&self) -> Vec<String> {
                self.columns().iter().map(|c| c.name().to_string()).collect()
            }
        }
    };
}

impl_row_to_json!(MySqlRow, mysql::column_category, mysql::decode_column);
impl_row_to_json!(PgRow, postgres::column_category, postgres::decode_column);
impl_row_to_json!(SqliteRow, sqlite::column_category, sqlite::decode_column);

mod mysql {
    use super::*;

    pub fn column_category(row: &MySqlRow, idx: usize) -> TypeCategory {
        categorize_type(row.column(idx).type_info().name(), DatabaseType::MySQL)
    }

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
                Ok(v) => v.map(|d| JsonValue::String(d.0)).unwrap_or(JsonValue::Null),
                Err(e) => {
                    tracing::error!("Failed to decode DECIMAL: {:?}", e);
                    JsonValue::Null
                }
            },
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => get::<bool>(row, idx)
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float => get::<f64>(row, idx)
                .or_else(|| get::<f32>(row, idx).map(f64::from))
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Binary => get::<Vec<u8>>(row, idx)
                .map(|v| encode_binary_value(&v))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Json => get::<JsonValue>(row, idx).unwrap_or(JsonValue::Null),
            TypeCategory::Text => get::<String>(row, idx)
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }

    fn get<'r, T>(row: &'r MySqlRow, idx: usize) -> Option<T>
    where
        T: Decode<'r, sqlx::MySql> + Type<sqlx::MySql>,
    {
        row.try_get::<Option<T>, _>(idx).ok().flatten()
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        // MySQL is strict about width and signedness
        if let Some(v) = get::<i8>(row, idx) {
            return v.into();
        }
        if let Some(v) = get::<i16>(row, idx) {
            return v.into();
        }
        if let Some(v) = get::<i32>(row, idx) {
            return v.into();
        }
        if let Some(v) = get::<i64>(row, idx) {
            return v.into();
        }
        if let Some(v) = get::<u8>(row, idx) {
            return v.into();
        }
        if let Some(v) = get::<u16>(row, idx) {
            return v.into();
        }
        if let Some(v) = get::<u32>(row, idx) {
            return v.into();
        }
        get::<u64>(row, idx).map(JsonValue::from).unwrap_or(JsonValue::Null)
    }
}

mod postgres {
    use super::*;

    pub fn column_category(row: &PgRow, idx: usize) -> TypeCategory {
        categorize_type(row.column(idx).type_info().name(), DatabaseType::PostgreSQL)
    }

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
                Ok(v) => v.map(|d| JsonValue::String(d.0)).unwrap_or(JsonValue::Null),
                Err(e) => {
                    tracing::error!("Failed to decode NUMERIC: {:?}", e);
                    JsonValue::Null
                }
            },
            TypeCategory::Integer => get::<i16>(row, idx)
                .map(i64::from)
                .or_else(|| get::<i32>(row, idx).map(i64::from))
                .or_else(|| get::<i64>(row, idx))
                .map(JsonValue::from)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Boolean => get::<bool>(row, idx)
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float => get::<f64>(row, idx)
                .or_else(|| get::<f32>(row, idx).map(f64::from))
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Binary => get::<Vec<u8>>(row, idx)
                .map(|v| encode_binary_value(&v))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Json => get::<JsonValue>(row, idx).unwrap_or(JsonValue::Null),
            TypeCategory::Text => get::<String>(row, idx)
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }

    fn get<'r, T>(row: &'r PgRow, idx: usize) -> Option<T>
    where
        T: Decode<'r, sqlx::Postgres> + Type<sqlx::Postgres>,
    {
        row.try_get::<Option<T>, _>(idx).ok().flatten()
    }
}

mod sqlite {
    use super::*;
    use sqlx::ValueRef;

    /// Category from the value's storage class. SQLite types values, not
    /// columns: expressions have no declared type and a declared type does not
    /// constrain what is stored. The declared type only refines integers
    /// declared BOOLEAN and text stored in BLOB columns.
    pub fn column_category(row: &SqliteRow, idx: usize) -> TypeCategory {
        let declared = row.column(idx).type_info();
        let declared = if declared.is_null() {
            None
        } else {
            Some(categorize_type(declared.name(), DatabaseType::SQLite))
        };

        let stored = match row.try_get_raw(idx) {
            Ok(value) if !value.is_null() => {
                categorize_type(value.type_info().name(), DatabaseType::SQLite)
            }
            _ => return declared.unwrap_or(TypeCategory::Text),
        };

        match (declared, stored) {
            (Some(TypeCategory::Boolean), TypeCategory::Integer) => TypeCategory::Boolean,
            (Some(TypeCategory::Binary), TypeCategory::Text) => TypeCategory::Binary,
            (_, stored) => stored,
        }
    }

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Integer => get::<i64>(row, idx)
                .map(JsonValue::from)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Boolean => get::<bool>(row, idx)
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float | TypeCategory::Decimal => get::<f64>(row, idx)
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            // Declared BLOB columns may still hold TEXT values
            TypeCategory::Binary => get::<Vec<u8>>(row, idx)
                .or_else(|| get::<String>(row, idx).map(String::into_bytes))
                .map(|v| encode_binary_value(&v))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Json | TypeCategory::Text => get::<String>(row, idx)
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }

    fn get<'r, T>(row: &'r SqliteRow, idx: usize) -> Option<T>
    where
        T: Decode<'r, sqlx::Sqlite> + Type<sqlx::Sqlite>,
    {
        row.try_get::<Option<T>, _>(idx).ok().flatten()
    }
}

/// Normalize a database type name to a more consistent format.
///
/// Length and precision suffixes are stripped, so `varchar(30)` and `TEXT`
/// compare equal.
pub fn normalize_type_name(type_name: &str) -> String {
    let lower = type_name.trim().to_lowercase();
    let base = lower.split('(').next().unwrap_or(&lower).trim();

    match base {
        "int4" | "integer" | "int" | "mediumint" => "integer".to_string(),
        "int8" | "bigint" | "bigserial" => "bigint".to_string(),
        "int2" | "smallint" => "smallint".to_string(),
        "tinyint" | "tiny" => "tinyint".to_string(),
        "varchar" | "character varying" | "text" | "string" | "longtext" | "mediumtext" => {
            "text".to_string()
        }
        "char" | "character" | "bpchar" => "char".to_string(),
        "bool" | "boolean" => "boolean".to_string(),
        "float4" | "real" | "float" => "real".to_string(),
        "float8" | "double precision" | "double" => "double".to_string(),
        "bytea" | "blob" | "binary" | "varbinary" | "longblob" => "binary".to_string(),
        "timestamp" | "timestamptz" | "datetime" => "timestamp".to_string(),
        "time" | "timetz" => "time".to_string(),
        "json" | "jsonb" => "json".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INTEGER", DatabaseType::SQLite),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", DatabaseType::MySQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("numeric", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_fallbacks() {
        assert_eq!(
            categorize_type("jsonb", DatabaseType::PostgreSQL),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("uuid", DatabaseType::PostgreSQL),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("BLOB", DatabaseType::SQLite),
            TypeCategory::Binary
        );
    }

    #[test]
    fn test_normalize_type_name() {
        assert_eq!(normalize_type_name("INT4"), "integer");
        assert_eq!(normalize_type_name("varchar(30)"), "text");
        assert_eq!(normalize_type_name("TEXT"), "text");
        assert_eq!(normalize_type_name("FLOAT8"), "double");
        assert_eq!(normalize_type_name("bigint(20) unsigned"), "bigint");
        assert_eq!(normalize_type_name("JSONB"), "json");
    }

    #[test]
    fn test_encode_binary_value() {
        assert_eq!(
            encode_binary_value(b"hello world"),
            JsonValue::String("aGVsbG8gd29ybGQ=".to_string())
        );
        assert_eq!(encode_binary_value(&[]), JsonValue::String(String::new()));
    }

    #[tokio::test]
    async fn test_sqlite_row_to_json() {
        use sqlx::{Connection, SqliteConnection};

        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        let row = sqlx::query("SELECT 7 AS n, 'x' AS s, 1.5 AS f, NULL AS z")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        let map = row.to_json_map();
        assert_eq!(row.column_names(), vec!["n", "s", "f", "z"]);
        assert_eq!(map["n"], JsonValue::from(7));
        assert_eq!(map["s"], JsonValue::String("x".to_string()));
        assert_eq!(map["f"], JsonValue::from(1.5));
        assert_eq!(map["z"], JsonValue::Null);
    }

    #[tokio::test]
    async fn test_sqlite_expression_columns_use_storage_class() {
        use sqlx::{Connection, Executor, SqliteConnection};

        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, body BLOB)")
            .await
            .unwrap();
        conn.execute("INSERT INTO t (id, body) VALUES (1, x'6869'), (2, NULL)")
            .await
            .unwrap();

        let row = sqlx::query("SELECT COUNT(*) AS n, 1+1 AS two, SUM(id) * 0.5 AS half FROM t")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        let typed = row.to_typed_row();
        assert_eq!(typed.values["n"], JsonValue::from(2));
        assert_eq!(typed.values["two"], JsonValue::from(2));
        assert_eq!(typed.values["half"], JsonValue::from(1.5));
        assert_eq!(typed.category("n"), Some(TypeCategory::Integer));
        assert_eq!(typed.category("missing"), None);

        let row = sqlx::query("SELECT body FROM t WHERE id = 1")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        let typed = row.to_typed_row();
        assert_eq!(typed.category("body"), Some(TypeCategory::Binary));
        assert_eq!(typed.values["body"], encode_binary_value(b"hi"));
    }
}
