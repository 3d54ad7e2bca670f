//! Integration tests for batch loading on SQLite.

use db_toolkit::db::{BatchLoader, DbConnection, Record};
use db_toolkit::error::DbError;
use db_toolkit::models::{QueryParam, Row};
use serde::Deserialize;
use serde_json::json;
use tempfile::TempDir;

async fn setup_items() -> (TempDir, DbConnection) {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}", dir.path().join("loader.db").display());
    let mut connection = DbConnection::open(&url).await.unwrap();

    let mut session = connection.session();
    session
        .execute(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, sku TEXT NOT NULL, data TEXT)",
            &[],
        )
        .await
        .unwrap();
    session
        .execute(
            "INSERT INTO items (id, sku, data) VALUES \
             (1, 'a-1', NULL), \
             (2, 'b-2', '{\"a\":1}'), \
             (3, 'c-3', NULL), \
             (4, 'd-4', '{\"color\":\"red\",\"sizes\":[1,2]}')",
            &[],
        )
        .await
        .unwrap();
    (dir, connection)
}

fn ids(values: &[i64]) -> Vec<QueryParam> {
    values.iter().copied().map(QueryParam::from).collect()
}

#[tokio::test]
async fn test_load_multiple_decodes_payload() {
    let (_dir, mut connection) = setup_items().await;
    let mut session = connection.session();

    let mut rows: Vec<Row> = BatchLoader::load_multiple(&mut session, "items", &ids(&[1, 2, 3]))
        .await
        .unwrap();
    rows.sort_by_key(|row| row["id"].as_i64());

    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["data"], serde_json::Value::Null);
    assert_eq!(rows[1]["data"], json!({"a": 1}));
    assert_eq!(rows[2]["data"], serde_json::Value::Null);
    assert_eq!(rows[2]["sku"], json!("c-3"));
}

#[tokio::test]
async fn test_load_missing_and_empty() {
    let (_dir, mut connection) = setup_items().await;
    let mut session = connection.session();

    let missing: Option<Row> = BatchLoader::load(&mut session, "items", 999.into())
        .await
        .unwrap();
    assert!(missing.is_none());

    let none: Vec<Row> = BatchLoader::load_multiple(&mut session, "items", &[])
        .await
        .unwrap();
    assert!(none.is_empty());

    let partial: Vec<Row> = BatchLoader::load_multiple(&mut session, "items", &ids(&[2, 999]))
        .await
        .unwrap();
    assert_eq!(partial.len(), 1);
}

#[tokio::test]
async fn test_load_by_other_column() {
    let (_dir, mut connection) = setup_items().await;
    let mut session = connection.session();

    let row: Option<Row> =
        BatchLoader::load_by(&mut session, "items", "sku", QueryParam::from("b-2"))
            .await
            .unwrap();
    assert_eq!(row.unwrap()["id"], json!(2));
}

#[tokio::test]
async fn test_malformed_payload_fails() {
    let (_dir, mut connection) = setup_items().await;
    let mut session = connection.session();
    session
        .execute(
            "INSERT INTO items (id, sku, data) VALUES (5, 'e-5', '{broken')",
            &[],
        )
        .await
        .unwrap();

    let err = BatchLoader::load::<Row>(&mut session, "items", 5.into())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Decode { ref column, .. } if column == "data"));
}

#[tokio::test]
async fn test_load_as_record() {
    #[derive(Debug, Deserialize)]
    struct Payload {
        color: String,
    }

    #[derive(Debug, Deserialize)]
    struct Item {
        id: i64,
        sku: String,
        data: Payload,
    }

    let (_dir, mut connection) = setup_items().await;
    let mut session = connection.session();

    let item: Record<Item> = BatchLoader::load(&mut session, "items", 4.into())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.id, 4);
    assert_eq!(item.sku, "d-4");
    assert_eq!(item.data.color, "red");
}

#[tokio::test]
async fn test_rejects_invalid_table_name() {
    let (_dir, mut connection) = setup_items().await;
    let mut session = connection.session();

    let result = BatchLoader::load::<Row>(&mut session, "items; DROP TABLE items", 1.into()).await;
    assert!(matches!(result, Err(DbError::InvalidInput { .. })));
}

#[tokio::test]
async fn test_binary_payload_column() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}", dir.path().join("blob.db").display());
    let mut connection = DbConnection::open(&url).await.unwrap();
    let mut session = connection.session();
    session
        .execute("CREATE TABLE docs (id INTEGER PRIMARY KEY, data BLOB)", &[])
        .await
        .unwrap();
    session
        .execute(
            "INSERT INTO docs (id, data) VALUES (1, '{\"a\":1}'), (2, CAST('{\"b\":[2]}' AS BLOB))",
            &[],
        )
        .await
        .unwrap();
    session
        .execute(
            "INSERT INTO docs (id, data) VALUES (?, ?)",
            &[3.into(), QueryParam::Bytes(br#"{"c":true}"#.to_vec())],
        )
        .await
        .unwrap();

    let mut rows: Vec<Row> = BatchLoader::load_multiple(&mut session, "docs", &ids(&[1, 2, 3]))
        .await
        .unwrap();
    rows.sort_by_key(|row| row["id"].as_i64());

    assert_eq!(rows[0]["data"], json!({"a": 1}));
    assert_eq!(rows[1]["data"], json!({"b": [2]}));
    assert_eq!(rows[2]["data"], json!({"c": true}));
}

#[tokio::test]
async fn test_json_declared_payload_column() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}", dir.path().join("json.db").display());
    let mut connection = DbConnection::open(&url).await.unwrap();
    let mut session = connection.session();
    session
        .execute("CREATE TABLE docs (id INTEGER PRIMARY KEY, data JSON)", &[])
        .await
        .unwrap();
    session
        .execute("INSERT INTO docs (id, data) VALUES (1, '{\"a\":1}')", &[])
        .await
        .unwrap();

    let row: Row = BatchLoader::load(&mut session, "docs", 1.into())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row["data"], json!({"a": 1}));
}
