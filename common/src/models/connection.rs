//! Connection configuration models.
//!
//! Contains the per-call connection parameters and the saved connection
//! records kept by the registry.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::errors::{AppError, AppResult};

/// Backend type enumeration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    /// PostgreSQL database.
    Postgres,
    /// MySQL / MariaDB database.
    MySQL,
    /// Microsoft SQL Server database.
    MsSql,
    /// SQLite database file.
    SQLite,
    /// MongoDB document store.
    MongoDB,
    /// Neo4j graph store.
    Neo4j,
    /// CSV flat file, queried through virtualization.
    Csv,
    /// JSON flat file, queried through virtualization.
    Json,
}

impl DbType {
    /// Parses a wire `type` value, accepting the common aliases.
    ///
    /// # Errors
    /// Returns `AppError::UnsupportedBackend` for anything unknown.
    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(DbType::Postgres),
            "mysql" | "mariadb" => Ok(DbType::MySQL),
            "mssql" | "sqlserver" => Ok(DbType::MsSql),
            "sqlite" | "sqlite3" => Ok(DbType::SQLite),
            "mongodb" | "mongo" => Ok(DbType::MongoDB),
            "neo4j" => Ok(DbType::Neo4j),
            "csv" => Ok(DbType::Csv),
            "json" => Ok(DbType::Json),
            _ => Err(AppError::UnsupportedBackend(raw.to_string())),
        }
    }

    /// Returns the default port for this backend type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            DbType::Postgres => Some(5432),
            DbType::MySQL => Some(3306),
            DbType::MsSql => Some(1433),
            DbType::MongoDB => Some(27017),
            DbType::Neo4j => Some(7687),
            DbType::SQLite | DbType::Csv | DbType::Json => None,
        }
    }

    /// Whether the backend is a virtualized flat file.
    pub fn is_flat_file(&self) -> bool {
        matches!(self, DbType::Csv | DbType::Json)
    }
}

impl std::fmt::Display for DbType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbType::Postgres => write!(f, "postgres"),
            DbType::MySQL => write!(f, "mysql"),
            DbType::MsSql => write!(f, "mssql"),
            DbType::SQLite => write!(f, "sqlite"),
            DbType::MongoDB => write!(f, "mongodb"),
            DbType::Neo4j => write!(f, "neo4j"),
            DbType::Csv => write!(f, "csv"),
            DbType::Json => write!(f, "json"),
        }
    }
}

/// Connection parameters for one call.
///
/// Only the fields relevant to the selected `type` are read; everything
/// else is ignored rather than rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionParams {
    /// Backend type (`postgres`, `mysql`, `mssql`, `sqlite`, `mongodb`, `neo4j`, `csv`, `json`).
    #[serde(rename = "type", default)]
    pub db_type: Option<String>,
    /// Server host.
    #[serde(default)]
    pub host: Option<String>,
    /// Server port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Login name.
    #[serde(default, alias = "user")]
    pub username: Option<String>,
    /// Login password (never serialized back).
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Database name.
    #[serde(default)]
    pub database: Option<String>,
    /// Path of a SQLite, CSV or JSON file.
    #[serde(default, alias = "file_path")]
    pub file_path: Option<String>,
    /// Explicit connection string (MongoDB, Neo4j).
    #[serde(default, alias = "connectionString", alias = "connection_string")]
    pub uri: Option<String>,
    /// Require an encrypted transport.
    #[serde(default)]
    pub ssl: Option<bool>,
    /// Connect timeout in milliseconds.
    #[serde(default)]
    pub connect_timeout: Option<u64>,
    /// Request / statement timeout in milliseconds.
    #[serde(default)]
    pub request_timeout: Option<u64>,
    /// Client application name reported to the server.
    #[serde(default)]
    pub application_name: Option<String>,
    /// PostgreSQL schema search path.
    #[serde(default)]
    pub search_path: Option<String>,
    /// MySQL character set.
    #[serde(default)]
    pub charset: Option<String>,
    /// SQL Server: accept any server certificate.
    #[serde(default)]
    pub trust_server_certificate: Option<bool>,
    /// MongoDB replica set name.
    #[serde(default)]
    pub replica_set: Option<String>,
    /// MongoDB authentication database.
    #[serde(default)]
    pub auth_source: Option<String>,
    /// Free-form driver options (object, or a JSON-encoded object string).
    #[serde(default, rename = "driverOptions", alias = "extraOptions")]
    #[schema(value_type = Option<Object>)]
    pub options: Option<serde_json::Value>,
}

impl ConnectionParams {
    /// Creates parameters for the given backend type.
    pub fn of_type(db_type: &str) -> Self {
        Self {
            db_type: Some(db_type.to_string()),
            ..Default::default()
        }
    }

    /// Resolves the backend type.
    ///
    /// # Errors
    /// `Configuration` when `type` is absent, `UnsupportedBackend` when unknown.
    pub fn backend(&self) -> AppResult<DbType> {
        match self.db_type.as_deref() {
            Some(raw) if !raw.trim().is_empty() => DbType::parse(raw),
            _ => Err(AppError::Configuration(
                "Connection type is required".to_string(),
            )),
        }
    }

    /// Host with the given fallback.
    pub fn host_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or(fallback)
    }

    /// Non-blank file path, if any.
    pub fn file_path(&self) -> Option<&str> {
        self.file_path.as_deref().filter(|p| !p.trim().is_empty())
    }

    /// Non-blank connection string, if any.
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref().filter(|u| !u.trim().is_empty())
    }
}

/// Saved connection record (stored by the registry).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectionConfig {
    /// Unique connection identifier.
    pub id: String,
    /// Connection display name.
    pub name: String,
    /// Connection parameters.
    pub params: ConnectionParams,
    /// Creation timestamp.
    pub created_at: String,
}

/// Request body for saving a new connection.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateConnectionRequest {
    /// Connection display name.
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    /// Connection parameters.
    #[serde(flatten)]
    pub params: ConnectionParams,
}

impl CreateConnectionRequest {
    /// Converts the request into a ConnectionConfig.
    ///
    /// # Errors
    /// Rejects requests whose `type` is missing or unknown.
    pub fn into_config(self, id: String, created_at: String) -> AppResult<ConnectionConfig> {
        let db_type = self.params.backend()?;
        let mut params = self.params;
        params.port = params.port.or_else(|| db_type.default_port());
        Ok(ConnectionConfig {
            id,
            name: self.name,
            params,
            created_at,
        })
    }
}

/// Connection item for API responses (excludes sensitive data).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectionItem {
    /// Unique connection identifier.
    pub id: String,
    /// Connection display name.
    pub name: String,
    /// Backend type.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub db_type: Option<String>,
    /// Server host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Server port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Login name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Database name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// File path for file-backed sources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
}

impl From<ConnectionConfig> for ConnectionItem {
    fn from(config: ConnectionConfig) -> Self {
        Self {
            id: config.id,
            name: config.name,
            db_type: config.params.db_type,
            host: config.params.host,
            port: config.params.port,
            username: config.params.username,
            database: config.params.database,
            file_path: config.params.file_path,
            created_at: config.created_at,
        }
    }
}
