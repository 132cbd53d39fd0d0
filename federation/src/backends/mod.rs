//! Native backend sessions.

mod document;
mod graph;
mod relational;

pub use document::MongoSession;
pub use graph::Neo4jSession;
pub use relational::{MsSqlSession, MySqlSession, PostgresSession, SqliteSession};

use common::errors::{AppError, AppResult};
use common::models::NativeQuery;
use serde_json::Value;

/// Statement and positional parameters of a SQL query.
pub(crate) fn expect_sql(query: &NativeQuery) -> AppResult<(&str, &[Value])> {
    match query {
        NativeQuery::Sql { sql, params } => Ok((sql.as_str(), params.as_slice())),
        _ => Err(AppError::Configuration(
            "SQL backends only accept SQL queries".to_string(),
        )),
    }
}

/// Lowercase hex rendering of binary cells.
pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
