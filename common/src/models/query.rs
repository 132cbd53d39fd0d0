//! Query models.
//!
//! The wire-level [`QueryRequest`] is deliberately loose: each backend reads
//! the fields it understands. [`QueryRequest::to_native`] turns it into a
//! typed [`NativeQuery`] for the selected backend.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::errors::{AppError, AppResult};
use crate::models::connection::DbType;

/// One result row: column name → JSON value, in column order.
pub type Record = Map<String, Value>;

/// Caller-supplied column for flat-file virtualization.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SchemaField {
    /// Column name.
    pub name: String,
    /// Declared type (informational; virtual columns are always text).
    #[serde(rename = "type", default)]
    pub field_type: Option<String>,
}

/// Request body for executing a query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// SQL statement (relational backends and flat files).
    #[serde(default)]
    pub sql: Option<String>,

    /// Cypher statement (graph backend).
    #[serde(default)]
    pub cypher: Option<String>,

    /// Generic query field: a filter object for MongoDB, or a query string.
    #[serde(default)]
    pub query: Option<Value>,

    /// Positional parameters (array) or named parameters (object).
    #[serde(default)]
    pub params: Option<Value>,

    /// MongoDB collection.
    #[serde(default)]
    pub collection: Option<String>,

    /// MongoDB find options (`projection`, `sort`, `limit`, `skip`).
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub options: Option<Map<String, Value>>,

    /// MongoDB query kind; `"aggregate"` selects the pipeline path.
    #[serde(default, alias = "mongo_query_type")]
    pub mongo_query_type: Option<String>,

    /// MongoDB aggregation pipeline.
    #[serde(default)]
    pub pipeline: Option<Vec<Value>>,

    /// Flat files: maximum number of rows loaded into the window.
    #[serde(default)]
    pub limit: Option<u64>,

    /// Flat files: number of leading rows skipped before the window.
    #[serde(default)]
    pub offset: Option<u64>,

    /// Flat files: explicit column set replacing inference.
    #[serde(default, alias = "schema_override")]
    pub schema_override: Option<Vec<SchemaField>>,

    /// Flat files: name of the virtual table.
    #[serde(default)]
    pub table: Option<String>,
}

/// Default name of the virtual table built from a flat file.
pub const DEFAULT_VIRTUAL_TABLE: &str = "data";

/// Backend-native query.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeQuery {
    /// SQL with positional parameters.
    Sql { sql: String, params: Vec<Value> },
    /// MongoDB filter-based find.
    Find {
        collection: String,
        filter: Map<String, Value>,
        options: Map<String, Value>,
    },
    /// MongoDB aggregation pipeline.
    Aggregate {
        collection: String,
        pipeline: Vec<Map<String, Value>>,
    },
    /// Cypher with a parameter map.
    Cypher {
        cypher: String,
        params: Map<String, Value>,
    },
}

/// Flat-file window and column settings.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualQuery {
    pub sql: String,
    pub table: String,
    pub limit: u64,
    pub offset: u64,
    pub columns: Option<Vec<String>>,
}

impl QueryRequest {
    /// Creates a SQL request.
    pub fn sql(sql: impl Into<String>) -> Self {
        Self {
            sql: Some(sql.into()),
            ..Default::default()
        }
    }

    /// Text of the statement, from `sql`, `cypher` or a string `query`.
    fn statement(&self, primary: Option<&String>) -> Option<String> {
        primary
            .or(self.sql.as_ref())
            .cloned()
            .or_else(|| match &self.query {
                Some(Value::String(s)) => Some(s.clone()),
                _ => None,
            })
            .filter(|s| !s.trim().is_empty())
    }

    /// Converts the request into the native query for `db_type`.
    ///
    /// # Errors
    /// `Configuration` when the request lacks what the backend needs,
    /// `UnsupportedBackend` for flat files (see [`QueryRequest::to_virtual`]).
    pub fn to_native(&self, db_type: DbType) -> AppResult<NativeQuery> {
        match db_type {
            DbType::Postgres | DbType::MySQL | DbType::MsSql | DbType::SQLite => {
                let sql = self
                    .statement(None)
                    .ok_or_else(|| AppError::Configuration("SQL statement is required".into()))?;
                let params = match &self.params {
                    Some(Value::Array(items)) => items.clone(),
                    Some(Value::Null) | None => Vec::new(),
                    Some(other) => vec![other.clone()],
                };
                Ok(NativeQuery::Sql { sql, params })
            }
            DbType::MongoDB => {
                let collection = self
                    .collection
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| AppError::Configuration("collection is required".into()))?;
                let is_aggregate = self
                    .mongo_query_type
                    .as_deref()
                    .is_some_and(|kind| kind.eq_ignore_ascii_case("aggregate"));
                if is_aggregate {
                    let pipeline = self
                        .pipeline
                        .clone()
                        .unwrap_or_default()
                        .into_iter()
                        .map(|stage| match stage {
                            Value::Object(map) => Ok(map),
                            other => Err(AppError::Configuration(format!(
                                "pipeline stages must be objects, got {other}"
                            ))),
                        })
                        .collect::<AppResult<Vec<_>>>()?;
                    Ok(NativeQuery::Aggregate {
                        collection,
                        pipeline,
                    })
                } else {
                    let filter = match &self.query {
                        Some(Value::Object(map)) => map.clone(),
                        _ => Map::new(),
                    };
                    Ok(NativeQuery::Find {
                        collection,
                        filter,
                        options: self.options.clone().unwrap_or_default(),
                    })
                }
            }
            DbType::Neo4j => {
                let cypher = self
                    .statement(self.cypher.as_ref())
                    .ok_or_else(|| AppError::Configuration("cypher is required".into()))?;
                let params = match &self.params {
                    Some(Value::Object(map)) => map.clone(),
                    _ => Map::new(),
                };
                Ok(NativeQuery::Cypher { cypher, params })
            }
            DbType::Csv | DbType::Json => Err(AppError::UnsupportedBackend(format!(
                "{db_type} (flat files are queried through virtualization)"
            ))),
        }
    }

    /// Window and column settings for a flat-file query.
    ///
    /// A schema override is used only when it is well formed: non-empty,
    /// with no blank column names.
    pub fn to_virtual(&self, default_limit: u64) -> VirtualQuery {
        let table = self
            .table
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_VIRTUAL_TABLE.to_string());
        let sql = self
            .statement(None)
            .unwrap_or_else(|| format!("SELECT * FROM \"{}\"", table.replace('"', "\"\"")));
        let columns = self
            .schema_override
            .as_ref()
            .filter(|fields| {
                !fields.is_empty() && fields.iter().all(|f| !f.name.trim().is_empty())
            })
            .map(|fields| fields.iter().map(|f| f.name.clone()).collect());
        VirtualQuery {
            sql,
            table,
            limit: self.limit.unwrap_or(default_limit),
            offset: self.offset.unwrap_or(0),
            columns,
        }
    }
}

/// Result of a query execution.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Column names in result order.
    pub columns: Vec<String>,

    /// Row data, one object per row.
    #[schema(value_type = Vec<Object>)]
    pub rows: Vec<Record>,

    /// Number of rows returned.
    #[serde(default)]
    pub row_count: usize,

    /// Full source row count (flat files).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,

    /// Number of rows affected (for INSERT/UPDATE/DELETE).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,

    /// Query execution time in milliseconds.
    #[serde(default)]
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Creates a new empty query result.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a result from rows, deriving the column list from the first row.
    pub fn from_rows(rows: Vec<Record>) -> Self {
        let columns = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();
        Self {
            columns,
            row_count: rows.len(),
            rows,
            ..Default::default()
        }
    }

    /// Creates a query result with affected rows count (for non-SELECT queries).
    pub fn affected(affected: u64) -> Self {
        Self {
            affected_rows: Some(affected),
            ..Default::default()
        }
    }

    /// Sets the full source row count.
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: Value) -> QueryRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_sql_request_keeps_positional_params() {
        let req = request(json!({"sql": "SELECT * FROM t WHERE id = $1", "params": [7]}));
        assert_eq!(
            req.to_native(DbType::Postgres).unwrap(),
            NativeQuery::Sql {
                sql: "SELECT * FROM t WHERE id = $1".into(),
                params: vec![json!(7)],
            }
        );
    }

    #[test]
    fn test_mongo_find_and_aggregate() {
        let find = request(json!({"collection": "users", "query": {"age": {"$gt": 3}}}));
        assert!(matches!(
            find.to_native(DbType::MongoDB).unwrap(),
            NativeQuery::Find { ref collection, .. } if collection == "users"
        ));

        let agg = request(json!({
            "collection": "users",
            "mongoQueryType": "aggregate",
            "pipeline": [{"$match": {"active": true}}]
        }));
        match agg.to_native(DbType::MongoDB).unwrap() {
            NativeQuery::Aggregate { pipeline, .. } => assert_eq!(pipeline.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_mongo_requires_collection() {
        let err = request(json!({"query": {}})).to_native(DbType::MongoDB).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn test_cypher_from_generic_query_field() {
        let req = request(json!({"query": "MATCH (n) RETURN n", "params": {"x": 1}}));
        match req.to_native(DbType::Neo4j).unwrap() {
            NativeQuery::Cypher { cypher, params } => {
                assert_eq!(cypher, "MATCH (n) RETURN n");
                assert_eq!(params["x"], json!(1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_virtual_defaults() {
        let v = QueryRequest::default().to_virtual(100);
        assert_eq!(v.limit, 100);
        assert_eq!(v.offset, 0);
        assert_eq!(v.sql, "SELECT * FROM \"data\"");
        assert!(v.columns.is_none());
    }

    #[test]
    fn test_malformed_schema_override_is_ignored() {
        let req = request(json!({"schemaOverride": [{"name": "a"}, {"name": "  "}]}));
        assert!(req.to_virtual(100).columns.is_none());

        let req = request(json!({"schemaOverride": [{"name": "a", "type": "number"}]}));
        assert_eq!(req.to_virtual(100).columns, Some(vec!["a".to_string()]));
    }
}
