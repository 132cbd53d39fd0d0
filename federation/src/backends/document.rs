//! MongoDB session.

use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::{Client, Cursor, Database};
use serde_json::{Map, Value};

use common::errors::{AppError, AppResult};
use common::models::{DbType, NativeQuery, QueryResult, Record, TableSchema};

use crate::introspector::FieldSampler;
use crate::session::Session;

/// MongoDB client scoped to one call; shut down on close.
pub struct MongoSession {
    client: Client,
    database: Database,
}

impl MongoSession {
    pub fn new(client: Client, database: &str) -> Self {
        let database = client.database(database);
        Self { client, database }
    }
}

/// Converts a JSON object (Extended JSON accepted) into a BSON document.
fn to_document(map: &Map<String, Value>) -> AppResult<Document> {
    match Bson::try_from(Value::Object(map.clone())) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(other) => Err(AppError::Configuration(format!(
            "expected a document, got {other}"
        ))),
        Err(e) => Err(AppError::Configuration(format!("Invalid document: {e}"))),
    }
}

fn option_document(options: &Map<String, Value>, key: &str) -> AppResult<Option<Document>> {
    match options.get(key) {
        Some(Value::Object(map)) => to_document(map).map(Some),
        _ => Ok(None),
    }
}

/// Converts a BSON value to JSON; ObjectIds and dates become plain strings,
/// everything else follows relaxed Extended JSON.
fn to_json(value: Bson) -> Value {
    match value {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => dt
            .try_to_rfc3339_string()
            .map(Value::String)
            .unwrap_or_else(|_| Bson::DateTime(dt).into_relaxed_extjson()),
        Bson::Document(doc) => Value::Object(to_record(doc)),
        Bson::Array(items) => Value::Array(items.into_iter().map(to_json).collect()),
        other => other.into_relaxed_extjson(),
    }
}

fn to_record(doc: Document) -> Record {
    doc.into_iter().map(|(k, v)| (k, to_json(v))).collect()
}

async fn drain(mut cursor: Cursor<Document>) -> AppResult<Vec<Record>> {
    let mut rows = Vec::new();
    while cursor.advance().await.map_err(AppError::backend)? {
        let doc = cursor.deserialize_current().map_err(AppError::backend)?;
        rows.push(to_record(doc));
    }
    Ok(rows)
}

/// Result whose columns are the union of document keys in first-seen order.
fn documents_to_result(rows: Vec<Record>) -> QueryResult {
    let mut columns: Vec<String> = Vec::new();
    for row in &rows {
        for key in row.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    QueryResult {
        columns,
        row_count: rows.len(),
        rows,
        ..Default::default()
    }
}

#[async_trait]
impl Session for MongoSession {
    fn backend(&self) -> DbType {
        DbType::MongoDB
    }

    async fn ping(&mut self) -> AppResult<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(AppError::backend)
    }

    async fn query(&mut self, query: &NativeQuery) -> AppResult<QueryResult> {
        let cursor = match query {
            NativeQuery::Find {
                collection,
                filter,
                options,
            } => {
                let coll = self.database.collection::<Document>(collection);
                let mut find = coll.find(to_document(filter)?);
                if let Some(projection) = option_document(options, "projection")? {
                    find = find.projection(projection);
                }
                if let Some(sort) = option_document(options, "sort")? {
                    find = find.sort(sort);
                }
                if let Some(limit) = options.get("limit").and_then(Value::as_i64) {
                    find = find.limit(limit);
                }
                if let Some(skip) = options.get("skip").and_then(Value::as_u64) {
                    find = find.skip(skip);
                }
                find.await.map_err(AppError::backend)?
            }
            NativeQuery::Aggregate {
                collection,
                pipeline,
            } => {
                let stages = pipeline
                    .iter()
                    .map(to_document)
                    .collect::<AppResult<Vec<_>>>()?;
                self.database
                    .collection::<Document>(collection)
                    .aggregate(stages)
                    .await
                    .map_err(AppError::backend)?
            }
            _ => {
                return Err(AppError::Configuration(
                    "MongoDB accepts find or aggregate queries".to_string(),
                ))
            }
        };
        Ok(documents_to_result(drain(cursor).await?))
    }

    async fn list_tables(&mut self) -> AppResult<Vec<String>> {
        let mut names = self
            .database
            .list_collection_names()
            .await
            .map_err(AppError::backend)?;
        names.sort();
        Ok(names)
    }

    async fn describe(&mut self, name: &str, sample_size: usize) -> AppResult<TableSchema> {
        let mut cursor = self
            .database
            .collection::<Document>(name)
            .find(doc! {})
            .limit(sample_size as i64)
            .await
            .map_err(AppError::backend)?;

        let mut sampler = FieldSampler::new();
        while cursor.advance().await.map_err(AppError::backend)? {
            let doc = cursor.deserialize_current().map_err(AppError::backend)?;
            sampler.observe_bson(&doc);
        }

        if sampler.sampled() == 0 {
            let exists = self
                .database
                .list_collection_names()
                .await
                .map_err(AppError::backend)?
                .iter()
                .any(|c| c == name);
            if !exists {
                return Err(AppError::NotFound(format!("Collection not found: {name}")));
            }
        }

        Ok(TableSchema {
            name: name.to_string(),
            columns: sampler.finish(),
        })
    }

    async fn close(self: Box<Self>) -> AppResult<()> {
        self.client.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{oid::ObjectId, DateTime};
    use serde_json::json;

    #[test]
    fn test_extended_json_filter() {
        let filter = json!({"_id": {"$oid": "65a1f0c2e4b0a1b2c3d4e5f6"}, "age": {"$gt": 3}});
        let doc = to_document(filter.as_object().unwrap()).unwrap();
        assert!(matches!(doc.get("_id"), Some(Bson::ObjectId(_))));
        assert_eq!(doc.get_document("age").unwrap().get_i32("$gt").unwrap(), 3);
    }

    #[test]
    fn test_document_to_row() {
        let oid = ObjectId::new();
        let doc = doc! {
            "_id": oid,
            "name": "ada",
            "tags": ["a", "b"],
            "at": DateTime::from_millis(0),
            "nested": { "n": 1_i64 },
        };
        let row = to_record(doc);
        assert_eq!(row["_id"], json!(oid.to_hex()));
        assert_eq!(row["tags"], json!(["a", "b"]));
        assert_eq!(row["at"], json!("1970-01-01T00:00:00Z"));
        assert_eq!(row["nested"], json!({"n": 1}));
    }

    #[test]
    fn test_columns_are_key_union() {
        let rows = vec![
            json!({"a": 1}).as_object().unwrap().clone(),
            json!({"b": 2, "a": 3}).as_object().unwrap().clone(),
        ];
        let result = documents_to_result(rows);
        assert_eq!(result.columns, vec!["a", "b"]);
        assert_eq!(result.row_count, 2);
    }
}
