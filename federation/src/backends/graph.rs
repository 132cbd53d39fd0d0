//! Neo4j session.
//!
//! The broker hands over a driver [`Config`]; the session connects a
//! [`Graph`] from it and drops the graph on close.

use async_trait::async_trait;
use neo4rs::{query, BoltList, BoltMap, BoltNull, BoltString, BoltType, Config, Graph, Query};
use serde_json::{Map, Value};

use common::errors::{AppError, AppResult};
use common::models::{DbType, NativeQuery, QueryResult, Record, TableSchema};
use common::utils::SqlValidator;

use crate::introspector::FieldSampler;
use crate::session::Session;

pub struct Neo4jSession {
    graph: Graph,
}

impl Neo4jSession {
    pub async fn open(config: Config) -> AppResult<Self> {
        let graph = Graph::connect(config).await.map_err(AppError::backend)?;
        Ok(Self { graph })
    }

    async fn fetch(&self, q: Query) -> AppResult<Vec<neo4rs::Row>> {
        let mut stream = self.graph.execute(q).await.map_err(AppError::backend)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await.map_err(AppError::backend)? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn sample(&self, cypher: String, name: &str, limit: usize) -> AppResult<FieldSampler> {
        let rows = self
            .fetch(query(&cypher).param("limit", limit as i64))
            .await?;
        let mut sampler = FieldSampler::new();
        for row in rows {
            let props: Map<String, Value> = row.get("props").map_err(|e| {
                AppError::backend(format!("failed to read properties of {name}: {e}"))
            })?;
            sampler.observe_json(&props);
        }
        Ok(sampler)
    }
}

/// Converts a JSON parameter into a Bolt value.
fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::from(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::from(i),
            None => BoltType::from(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => BoltType::from(s.clone()),
        Value::Array(items) => {
            let mut list = BoltList::new();
            for item in items {
                list.push(to_bolt(item));
            }
            BoltType::List(list)
        }
        Value::Object(map) => {
            let mut bolt = BoltMap::new();
            for (k, v) in map {
                bolt.put(BoltString::from(k.as_str()), to_bolt(v));
            }
            BoltType::Map(bolt)
        }
    }
}

fn cypher_query(cypher: &str, params: &Map<String, Value>) -> Query {
    params
        .iter()
        .fold(query(cypher), |q, (k, v)| q.param(k, to_bolt(v)))
}

#[async_trait]
impl Session for Neo4jSession {
    fn backend(&self) -> DbType {
        DbType::Neo4j
    }

    async fn ping(&mut self) -> AppResult<()> {
        self.graph
            .run(query("RETURN 1"))
            .await
            .map_err(AppError::backend)
    }

    async fn query(&mut self, native: &NativeQuery) -> AppResult<QueryResult> {
        let NativeQuery::Cypher { cypher, params } = native else {
            return Err(AppError::Configuration(
                "Neo4j only accepts Cypher queries".to_string(),
            ));
        };
        let rows = self.fetch(cypher_query(cypher, params)).await?;
        let records = rows
            .into_iter()
            .map(|row| row.to::<Record>().map_err(AppError::backend))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(QueryResult::from_rows(records))
    }

    async fn list_tables(&mut self) -> AppResult<Vec<String>> {
        let rows = self
            .fetch(query("CALL db.labels() YIELD label RETURN label ORDER BY label"))
            .await?;
        rows.iter()
            .map(|row| row.get::<String>("label").map_err(AppError::backend))
            .collect()
    }

    async fn describe(&mut self, name: &str, sample_size: usize) -> AppResult<TableSchema> {
        let label = SqlValidator::quote_backtick(name);
        let mut sampler = self
            .sample(
                format!("MATCH (n:{label}) RETURN properties(n) AS props LIMIT $limit"),
                name,
                sample_size,
            )
            .await?;
        if sampler.sampled() == 0 {
            sampler = self
                .sample(
                    format!("MATCH ()-[r:{label}]->() RETURN properties(r) AS props LIMIT $limit"),
                    name,
                    sample_size,
                )
                .await?;
        }
        if sampler.sampled() == 0 {
            return Err(AppError::NotFound(format!("Label not found: {name}")));
        }
        Ok(TableSchema {
            name: name.to_string(),
            columns: sampler.finish(),
        })
    }

    async fn close(self: Box<Self>) -> AppResult<()> {
        drop(self.graph);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_to_bolt() {
        assert!(matches!(to_bolt(&json!(null)), BoltType::Null(_)));
        assert!(matches!(to_bolt(&json!(true)), BoltType::Boolean(_)));
        assert!(matches!(to_bolt(&json!(7)), BoltType::Integer(_)));
        assert!(matches!(to_bolt(&json!(1.5)), BoltType::Float(_)));
        assert!(matches!(to_bolt(&json!("x")), BoltType::String(_)));
        match to_bolt(&json!([1, {"a": "b"}])) {
            BoltType::List(list) => assert_eq!(list.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }
}
