//! Shared data models.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{
    ConnectionConfig, ConnectionItem, ConnectionParams, CreateConnectionRequest, DbType,
};
pub use query::{
    NativeQuery, QueryRequest, QueryResult, Record, SchemaField, VirtualQuery,
    DEFAULT_VIRTUAL_TABLE,
};
pub use schema::{ColumnSchema, TableList, TableSchema, TypeTag};
