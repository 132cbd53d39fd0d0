//! Schema introspector.
//!
//! Relational backends answer from their catalogs. MongoDB and Neo4j have
//! none, so their sessions sample up to `sample_size` records and fold them
//! through a [`FieldSampler`].

use std::collections::HashMap;

use mongodb::bson::Document;
use serde_json::{Map, Value};

use common::errors::{AppError, AppResult};
use common::models::{ColumnSchema, TableSchema, TypeTag};

use crate::broker::ConnectionHandle;
use crate::inference::{infer_bson_type, infer_type, merge_types};
use crate::session;

/// Tags and presence count observed for one field.
#[derive(Debug, Default, Clone)]
pub struct TypeSample {
    pub tags: Vec<TypeTag>,
    pub present: usize,
}

impl TypeSample {
    fn record(&mut self, tag: TypeTag) {
        self.present += 1;
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    /// Column for this field after `sampled` records.
    ///
    /// Nullable when the field was missing from at least one sampled record
    /// or carried an explicit null.
    pub fn to_column(&self, name: &str, sampled: usize) -> ColumnSchema {
        // sampled 为实际读取的记录数，集合小于采样上限时也按实际数比较；
        // 显式 null 同样视为可空
        let nullable = self.present < sampled || self.tags.contains(&TypeTag::Null);
        ColumnSchema::new(name, merge_types(&self.tags).as_str(), nullable)
    }
}

/// Accumulates per-field samples across records, keeping first-seen order.
#[derive(Debug, Default)]
pub struct FieldSampler {
    order: Vec<String>,
    fields: HashMap<String, TypeSample>,
    sampled: usize,
}

impl FieldSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observes one record given as (field, tag) pairs.
    pub fn observe<'a, I>(&mut self, record: I)
    where
        I: IntoIterator<Item = (&'a str, TypeTag)>,
    {
        self.sampled += 1;
        for (name, tag) in record {
            let sample = match self.fields.get_mut(name) {
                Some(sample) => sample,
                None => {
                    self.order.push(name.to_string());
                    self.fields.entry(name.to_string()).or_default()
                }
            };
            sample.record(tag);
        }
    }

    /// Observes one JSON object.
    pub fn observe_json(&mut self, record: &Map<String, Value>) {
        self.observe(record.iter().map(|(k, v)| (k.as_str(), infer_type(v))));
    }

    /// Observes one BSON document.
    pub fn observe_bson(&mut self, record: &Document) {
        self.observe(record.iter().map(|(k, v)| (k.as_str(), infer_bson_type(v))));
    }

    /// Number of records observed so far.
    pub fn sampled(&self) -> usize {
        self.sampled
    }

    /// One column per field, in first-seen order.
    pub fn finish(self) -> Vec<ColumnSchema> {
        self.order
            .iter()
            .filter_map(|name| {
                self.fields
                    .get(name)
                    .map(|sample| sample.to_column(name, self.sampled))
            })
            .collect()
    }
}

/// Lists and describes tables behind a connection handle.
#[derive(Debug, Clone)]
pub struct Introspector {
    sample_size: usize,
}

impl Introspector {
    pub fn new(sample_size: usize) -> Self {
        Self {
            sample_size: sample_size.max(1),
        }
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Lists tables, collections or labels.
    pub async fn list_tables(&self, handle: ConnectionHandle) -> AppResult<Vec<String>> {
        let db_type = handle.db_type();
        if db_type.is_flat_file() {
            return Err(flat_file_unsupported(db_type));
        }
        let session = handle.open().await?;
        let tables = session::list_tables(session).await?;
        tracing::debug!(backend = %db_type, count = tables.len(), "列出数据表");
        Ok(tables)
    }

    /// Describes the columns of `name`.
    pub async fn list_columns(&self, handle: ConnectionHandle, name: &str) -> AppResult<TableSchema> {
        let db_type = handle.db_type();
        if db_type.is_flat_file() {
            return Err(flat_file_unsupported(db_type));
        }
        if name.trim().is_empty() {
            handle.discard().await;
            return Err(AppError::Configuration("table name is required".to_string()));
        }
        let session = handle.open().await?;
        let schema = session::describe(session, name, self.sample_size).await?;
        tracing::debug!(
            backend = %db_type,
            table = %name,
            columns = schema.columns.len(),
            "读取表结构"
        );
        Ok(schema)
    }
}

fn flat_file_unsupported(db_type: common::models::DbType) -> AppError {
    AppError::UnsupportedBackend(format!(
        "{db_type} (flat files expose their columns through queries)"
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::session::testing::{Recorder, RecordingSession};
    use serde_json::json;

    fn recorded() -> (Arc<Recorder>, ConnectionHandle) {
        let recorder = Arc::new(Recorder::default());
        let session = RecordingSession::new(recorder.clone());
        (recorder, ConnectionHandle::Recorded(Box::new(session)))
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn test_partial_presence_is_nullable() {
        let mut sampler = FieldSampler::new();
        for i in 0..20 {
            let mut record = json!({"id": i});
            if i < 15 {
                record["email"] = json!(format!("u{i}@example.com"));
            }
            sampler.observe_json(&object(record));
        }
        let columns = sampler.finish();
        assert_eq!(columns[0], ColumnSchema::new("id", "number", false));
        assert_eq!(columns[1], ColumnSchema::new("email", "string", true));
    }

    #[test]
    fn test_full_presence_is_not_nullable() {
        let sample = TypeSample {
            tags: vec![TypeTag::String],
            present: 20,
        };
        assert!(!sample.to_column("name", 20).nullable);

        let sample = TypeSample {
            tags: vec![TypeTag::String],
            present: 15,
        };
        assert!(sample.to_column("name", 20).nullable);
    }

    #[test]
    fn test_observed_null_is_nullable() {
        let mut sampler = FieldSampler::new();
        sampler.observe_json(&object(json!({"a": 1})));
        sampler.observe_json(&object(json!({"a": null})));
        assert_eq!(sampler.finish(), vec![ColumnSchema::new("a", "number", true)]);
    }

    #[test]
    fn test_disagreeing_types_are_mixed_in_first_seen_order() {
        let mut sampler = FieldSampler::new();
        sampler.observe_json(&object(json!({"b": "x", "a": 1})));
        sampler.observe_json(&object(json!({"a": "one", "c": true, "b": "y"})));
        let columns = sampler.finish();
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
        assert_eq!(columns[1].data_type, "mixed");
        assert!(columns[2].nullable);
    }

    #[test]
    fn test_bson_sampling() {
        use mongodb::bson::{doc, DateTime};
        let mut sampler = FieldSampler::new();
        sampler.observe_bson(&doc! {"at": DateTime::now(), "n": 1_i32});
        sampler.observe_bson(&doc! {"at": DateTime::now(), "n": 2.5});
        assert_eq!(sampler.sampled(), 2);
        assert_eq!(
            sampler.finish(),
            vec![
                ColumnSchema::new("at", "date", false),
                ColumnSchema::new("n", "number", false),
            ]
        );
    }

    #[tokio::test]
    async fn test_flat_files_are_unsupported() {
        let path = std::env::temp_dir().join(format!("{}.csv", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, "a\n1\n").await.unwrap();
        let handle = ConnectionHandle::FlatFile(crate::broker::FlatFileSource {
            kind: common::models::DbType::Csv,
            path: path.clone(),
        });
        let err = Introspector::new(20).list_tables(handle).await.unwrap_err();
        assert!(matches!(err, AppError::UnsupportedBackend(_)));
        tokio::fs::remove_file(path).await.ok();
    }

    #[tokio::test]
    async fn test_catalog_calls_close_session_once() {
        let introspector = Introspector::new(20);

        let (recorder, handle) = recorded();
        let tables = introspector.list_tables(handle).await.unwrap();
        assert_eq!(tables, vec!["users"]);
        assert_eq!(recorder.closes(), 1);

        let (recorder, handle) = recorded();
        let schema = introspector.list_columns(handle, "users").await.unwrap();
        assert_eq!(schema.name, "users");
        assert_eq!(recorder.calls(), 1);
        assert_eq!(recorder.closes(), 1);
    }

    #[tokio::test]
    async fn test_blank_table_name_releases_handle() {
        let (recorder, handle) = recorded();
        let err = Introspector::new(20)
            .list_columns(handle, "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
        assert_eq!(recorder.calls(), 0);
        assert_eq!(recorder.closes(), 1);
    }
}
