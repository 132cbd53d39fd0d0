//! JSON sources, parsed in full.

use std::path::Path;

use serde_json::{Map, Value};

use common::errors::{AppError, AppResult};
use common::models::{QueryResult, Record, VirtualQuery};

use super::{cell_text, empty_result, open_error, unique_names, EphemeralStore, Window};

/// Key used for array elements that are not objects.
const SCALAR_KEY: &str = "value";

/// Flattens one level of nesting into `parent.child` keys.
fn flatten(item: Value) -> Record {
    let object = match item {
        Value::Object(object) => object,
        other => {
            let mut record = Map::new();
            record.insert(SCALAR_KEY.to_string(), other);
            return record;
        }
    };
    let mut record = Map::new();
    for (key, value) in object {
        match value {
            Value::Object(child) if !child.is_empty() => {
                for (child_key, child_value) in child {
                    record
                        .entry(format!("{key}.{child_key}"))
                        .or_insert(child_value);
                }
            }
            other => {
                // 与已展开的 `a.b` 冲突时保留先出现的值
                record.entry(key).or_insert(other);
            }
        }
    }
    record
}

/// Top-level records of a document.
fn records(bytes: &[u8]) -> AppResult<Vec<Record>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let root: Value = serde_json::from_slice(bytes)
        .map_err(|e| AppError::Format(format!("Invalid JSON: {e}")))?;
    match root {
        Value::Array(items) => Ok(items.into_iter().map(flatten).collect()),
        object @ Value::Object(_) => Ok(vec![flatten(object)]),
        _ => Err(AppError::Format(
            "JSON root must be object or array".to_string(),
        )),
    }
}

/// Union of record keys in first-seen order.
fn key_union(records: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

/// Parsed document: flattened records and the source keys backing each
/// column.
struct Parsed {
    records: Vec<Record>,
    keys: Vec<String>,
}

fn parse(bytes: &[u8], requested: Option<Vec<String>>) -> AppResult<Parsed> {
    let records = records(bytes)?;
    let keys = requested.unwrap_or_else(|| key_union(&records));
    Ok(Parsed { records, keys })
}

pub(super) async fn execute(path: &Path, query: &VirtualQuery) -> AppResult<QueryResult> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| open_error(path, e))?;
    // 整体解析与展开放到阻塞线程池，避免占用异步工作线程
    let requested = query.columns.clone();
    let Parsed { records, keys } = tokio::task::spawn_blocking(move || parse(&bytes, requested))
        .await
        .map_err(|e| AppError::Internal(format!("JSON parse task failed: {e}")))??;
    let total = records.len() as u64;

    if keys.is_empty() {
        return Ok(empty_result(total));
    }
    let columns = unique_names(keys.iter().cloned());

    let mut store = EphemeralStore::create(&query.table, &columns).await?;
    let mut window = Window::new(query.offset, query.limit);
    let loaded: AppResult<()> = async {
        for record in &records {
            if !window.admit() {
                continue;
            }
            let cells: Vec<Option<String>> = keys
                .iter()
                .map(|c| record.get(c).and_then(cell_text))
                .collect();
            store.insert(&cells).await?;
        }
        Ok(())
    }
    .await;

    store.finish(loaded, &query.sql, window.total()).await
}
