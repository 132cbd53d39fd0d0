//! Connection broker.
//!
//! Turns per-call [`ConnectionParams`] into a [`ConnectionHandle`]: driver
//! options or an inert client for the selected backend. Acquisition does no
//! network I/O; a session is opened from the handle by whoever consumes it.

use std::path::PathBuf;
use std::time::Duration;

use mongodb::options::{ClientOptions, Credential, ServerAddress, Tls, TlsOptions};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlSslMode};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::sqlite::SqliteConnectOptions;
use tiberius::{AuthMethod, EncryptionLevel};

use common::config::AppConfig;
use common::errors::{AppError, AppResult};
use common::models::{ConnectionParams, DbType};
use common::utils::{merge_options_or_default, DriverOptions};

use crate::backends::{
    MongoSession, MsSqlSession, MySqlSession, Neo4jSession, PostgresSession, SqliteSession,
};
use crate::session::Session;

/// Server runtime parameters accepted from the PostgreSQL options bag,
/// with the name sent to the server.
const PG_RUNTIME_PARAMS: &[(&str, &str)] = &[
    ("statement_timeout", "statement_timeout"),
    ("lock_timeout", "lock_timeout"),
    (
        "idle_in_transaction_session_timeout",
        "idle_in_transaction_session_timeout",
    ),
    ("timezone", "TimeZone"),
    ("client_encoding", "client_encoding"),
    ("search_path", "search_path"),
    ("application_name", "application_name"),
];

/// Database used when a MongoDB connection names none.
const MONGO_DEFAULT_DATABASE: &str = "test";

/// A flat file to be virtualized.
#[derive(Debug, Clone)]
pub struct FlatFileSource {
    pub kind: DbType,
    pub path: PathBuf,
}

impl FlatFileSource {
    /// Confirms the file is still readable.
    pub async fn probe(&self) -> AppResult<()> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => Err(AppError::NotFound(format!(
                "Not a file: {}",
                self.path.display()
            ))),
            Err(_) => Err(AppError::NotFound(format!(
                "File not found: {}",
                self.path.display()
            ))),
        }
    }
}

/// Backend-specific handle, valid for one call.
pub enum ConnectionHandle {
    Postgres(PgConnectOptions),
    MySql(MySqlPool),
    MsSql(tiberius::Config),
    Sqlite(SqliteConnectOptions),
    MongoDB {
        client: mongodb::Client,
        database: String,
    },
    Neo4j(neo4rs::Config),
    FlatFile(FlatFileSource),
    /// Session double injected by tests.
    #[cfg(test)]
    Recorded(Box<dyn Session>),
}

impl ConnectionHandle {
    pub fn db_type(&self) -> DbType {
        match self {
            ConnectionHandle::Postgres(_) => DbType::Postgres,
            ConnectionHandle::MySql(_) => DbType::MySQL,
            ConnectionHandle::MsSql(_) => DbType::MsSql,
            ConnectionHandle::Sqlite(_) => DbType::SQLite,
            ConnectionHandle::MongoDB { .. } => DbType::MongoDB,
            ConnectionHandle::Neo4j(_) => DbType::Neo4j,
            ConnectionHandle::FlatFile(source) => source.kind,
            #[cfg(test)]
            ConnectionHandle::Recorded(session) => session.backend(),
        }
    }

    /// Opens a native session. Flat files have none; they are virtualized
    /// by the dispatcher instead.
    pub async fn open(self) -> AppResult<Box<dyn Session>> {
        let session: Box<dyn Session> = match self {
            ConnectionHandle::Postgres(options) => Box::new(PostgresSession::open(options).await?),
            ConnectionHandle::MySql(pool) => Box::new(MySqlSession::new(pool)),
            ConnectionHandle::MsSql(config) => Box::new(MsSqlSession::open(config).await?),
            ConnectionHandle::Sqlite(options) => Box::new(SqliteSession::open(options).await?),
            ConnectionHandle::MongoDB { client, database } => {
                Box::new(MongoSession::new(client, &database))
            }
            ConnectionHandle::Neo4j(config) => Box::new(Neo4jSession::open(config).await?),
            ConnectionHandle::FlatFile(source) => {
                return Err(AppError::UnsupportedBackend(format!(
                    "{} (flat files have no native session)",
                    source.kind
                )))
            }
            #[cfg(test)]
            ConnectionHandle::Recorded(session) => session,
        };
        Ok(session)
    }

    /// Gives up a handle that never became a session. The MySQL pool and
    /// the MongoDB client are live once acquired and are shut down here.
    pub async fn discard(self) {
        let db_type = self.db_type();
        match self {
            ConnectionHandle::MySql(pool) => pool.close().await,
            ConnectionHandle::MongoDB { client, .. } => client.shutdown().await,
            #[cfg(test)]
            ConnectionHandle::Recorded(session) => {
                if let Err(e) = session.close().await {
                    tracing::warn!(backend = %db_type, error = %e, "句柄释放失败");
                }
            }
            _ => {}
        }
        tracing::debug!(backend = %db_type, "未使用的连接句柄已释放");
    }
}

/// Builds connection handles.
#[derive(Debug, Clone)]
pub struct Broker {
    connect_timeout: Duration,
    max_connections: u32,
}

impl Broker {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            max_connections: config.max_connections,
        }
    }

    /// Validates `params` and builds the handle for its backend.
    ///
    /// # Errors
    /// `Configuration` for missing required fields, `UnsupportedBackend` for
    /// an unknown type, `NotFound` for a missing flat file.
    pub async fn acquire(&self, params: &ConnectionParams) -> AppResult<ConnectionHandle> {
        let db_type = params.backend()?;
        let options = merge_options_or_default(params.options.as_ref());

        let handle = match db_type {
            DbType::Postgres => ConnectionHandle::Postgres(postgres_options(params, &options)),
            DbType::MySQL => ConnectionHandle::MySql(self.mysql_pool(params, &options)),
            DbType::MsSql => ConnectionHandle::MsSql(mssql_config(params, &options)),
            DbType::SQLite => ConnectionHandle::Sqlite(sqlite_options(params, &options)?),
            DbType::MongoDB => self.mongo_handle(params, &options).await?,
            DbType::Neo4j => ConnectionHandle::Neo4j(neo4j_config(params, &options)?),
            DbType::Csv | DbType::Json => {
                ConnectionHandle::FlatFile(flat_file_source(db_type, params).await?)
            }
        };

        tracing::debug!(backend = %db_type, "连接句柄已创建");
        Ok(handle)
    }

    fn mysql_pool(&self, params: &ConnectionParams, options: &DriverOptions) -> MySqlPool {
        let mut connect = MySqlConnectOptions::new()
            .host(params.host_or("localhost"))
            .port(params.port.unwrap_or(3306))
            .ssl_mode(match params.ssl {
                Some(true) => MySqlSslMode::Required,
                _ => MySqlSslMode::Preferred,
            });
        if let Some(user) = &params.username {
            connect = connect.username(user);
        }
        if let Some(password) = &params.password {
            connect = connect.password(password);
        }
        if let Some(database) = &params.database {
            connect = connect.database(database);
        }
        if let Some(charset) = params.charset.clone().or_else(|| options.string("charset")) {
            connect = connect.charset(&charset);
        }
        if let Some(collation) = options.string("collation") {
            connect = connect.collation(&collation);
        }
        if let Some(timezone) = options.string("timezone") {
            connect = connect.timezone(Some(timezone));
        }
        if let Some(capacity) = options.u64("statementCacheCapacity") {
            connect = connect.statement_cache_capacity(capacity as usize);
        }

        let max_connections = options
            .u64("connectionLimit")
            .map(|n| n.clamp(1, u32::MAX as u64) as u32)
            .unwrap_or(self.max_connections);
        let acquire_timeout = params
            .connect_timeout
            .map(Duration::from_millis)
            .unwrap_or(self.connect_timeout);

        MySqlPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy_with(connect)
    }

    async fn mongo_handle(
        &self,
        params: &ConnectionParams,
        options: &DriverOptions,
    ) -> AppResult<ConnectionHandle> {
        let mut client_options = match params.uri() {
            Some(uri) => ClientOptions::parse(uri)
                .await
                .map_err(|e| AppError::Configuration(format!("Invalid MongoDB URI: {e}")))?,
            None => {
                let mut synthesized = ClientOptions::default();
                synthesized.hosts = vec![ServerAddress::Tcp {
                    host: params.host_or("localhost").to_string(),
                    port: Some(params.port.unwrap_or(27017)),
                }];
                if let Some(user) = params.username.as_ref().filter(|u| !u.is_empty()) {
                    let mut credential = Credential::default();
                    credential.username = Some(user.clone());
                    credential.password = params.password.clone();
                    credential.source =
                        Some(params.auth_source.clone().unwrap_or_else(|| "admin".into()));
                    synthesized.credential = Some(credential);
                }
                synthesized
            }
        };

        if let Some(replica_set) = &params.replica_set {
            client_options.repl_set_name = Some(replica_set.clone());
        }
        if params.ssl == Some(true) {
            client_options.tls = Some(Tls::Enabled(TlsOptions::default()));
        }
        client_options.connect_timeout = Some(
            params
                .connect_timeout
                .map(Duration::from_millis)
                .unwrap_or(self.connect_timeout),
        );
        if let Some(ms) = params.request_timeout {
            client_options.server_selection_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(app_name) = params.application_name.clone().or_else(|| options.string("appName")) {
            client_options.app_name = Some(app_name);
        }
        if let Some(n) = options.u64("maxPoolSize") {
            client_options.max_pool_size = Some(n.min(u32::MAX as u64) as u32);
        }
        if let Some(n) = options.u64("minPoolSize") {
            client_options.min_pool_size = Some(n.min(u32::MAX as u64) as u32);
        }
        if let Some(flag) = options.bool("retryWrites") {
            client_options.retry_writes = Some(flag);
        }
        if let Some(flag) = options.bool("retryReads") {
            client_options.retry_reads = Some(flag);
        }
        if let Some(flag) = options.bool("directConnection") {
            client_options.direct_connection = Some(flag);
        }

        let database = params
            .database
            .clone()
            .filter(|d| !d.trim().is_empty())
            .or_else(|| client_options.default_database.clone())
            .unwrap_or_else(|| MONGO_DEFAULT_DATABASE.to_string());

        let client = mongodb::Client::with_options(client_options).map_err(AppError::backend)?;
        Ok(ConnectionHandle::MongoDB { client, database })
    }
}

fn postgres_options(params: &ConnectionParams, options: &DriverOptions) -> PgConnectOptions {
    let mut connect = PgConnectOptions::new()
        .host(params.host_or("localhost"))
        .port(params.port.unwrap_or(5432))
        .ssl_mode(match params.ssl {
            Some(true) => PgSslMode::Require,
            _ => PgSslMode::Prefer,
        });
    if let Some(user) = &params.username {
        connect = connect.username(user);
    }
    if let Some(password) = &params.password {
        connect = connect.password(password);
    }
    if let Some(database) = &params.database {
        connect = connect.database(database);
    }
    if let Some(app) = &params.application_name {
        connect = connect.application_name(app);
    }

    let mut runtime: Vec<(String, String)> = Vec::new();
    for (key, server_name) in PG_RUNTIME_PARAMS {
        if let Some(value) = options.string(key) {
            runtime.push((server_name.to_string(), value));
        }
    }
    for (key, _) in options.iter() {
        if !PG_RUNTIME_PARAMS.iter().any(|(k, _)| k == key) {
            tracing::warn!(option = %key, "忽略未知的 PostgreSQL 连接选项");
        }
    }
    if let Some(search_path) = &params.search_path {
        runtime.retain(|(k, _)| k != "search_path");
        runtime.push(("search_path".to_string(), search_path.clone()));
    }
    if let Some(ms) = params.request_timeout {
        runtime.retain(|(k, _)| k != "statement_timeout");
        runtime.push(("statement_timeout".to_string(), ms.to_string()));
    }
    if runtime.is_empty() {
        connect
    } else {
        connect.options(runtime)
    }
}

fn mssql_config(params: &ConnectionParams, options: &DriverOptions) -> tiberius::Config {
    let mut config = tiberius::Config::new();
    config.host(params.host_or("localhost"));
    config.port(params.port.unwrap_or(1433));
    config.authentication(AuthMethod::sql_server(
        params.username.as_deref().unwrap_or_default(),
        params.password.as_deref().unwrap_or_default(),
    ));
    if let Some(database) = &params.database {
        config.database(database);
    }
    if let Some(app) = &params.application_name {
        config.application_name(app);
    }
    if let Some(instance) = options.string("instanceName") {
        config.instance_name(instance);
    }
    match options.bool("encrypt").or(params.ssl) {
        Some(true) => config.encryption(EncryptionLevel::Required),
        Some(false) => config.encryption(EncryptionLevel::Off),
        None => {}
    }
    let trust = params
        .trust_server_certificate
        .or_else(|| options.bool("trustServerCertificate"))
        .unwrap_or(false);
    if trust {
        config.trust_cert();
    }
    config
}

fn sqlite_options(
    params: &ConnectionParams,
    options: &DriverOptions,
) -> AppResult<SqliteConnectOptions> {
    let path = params
        .file_path()
        .ok_or_else(|| AppError::Configuration("SQLite requires filePath".to_string()))?;
    let mut connect = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(options.bool("createIfMissing").unwrap_or(false))
        .read_only(options.bool("readOnly").unwrap_or(false));
    if let Some(ms) = params.connect_timeout {
        connect = connect.busy_timeout(Duration::from_millis(ms));
    }
    Ok(connect)
}

fn neo4j_config(params: &ConnectionParams, options: &DriverOptions) -> AppResult<neo4rs::Config> {
    let port = params.port.unwrap_or(7687);
    let uri = params
        .uri()
        .map(str::to_string)
        .or_else(|| {
            params
                .host
                .as_deref()
                .filter(|h| !h.trim().is_empty())
                .map(|h| format!("bolt://{h}:{port}"))
        })
        .ok_or_else(|| AppError::Configuration("Neo4j requires uri or host".to_string()))?;

    let credentials = params
        .username
        .as_deref()
        .filter(|u| !u.is_empty())
        .zip(params.password.as_deref().filter(|p| !p.is_empty()));
    let Some((user, password)) = credentials else {
        return Err(AppError::Configuration(
            "Neo4j requires username and password".to_string(),
        ));
    };

    let mut builder = neo4rs::ConfigBuilder::default()
        .uri(uri)
        .user(user)
        .password(password);
    if let Some(database) = params.database.as_deref().filter(|d| !d.is_empty()) {
        builder = builder.db(database);
    }
    if let Some(n) = options.u64("fetchSize") {
        builder = builder.fetch_size(n as usize);
    }
    if let Some(n) = options.u64("maxConnections") {
        builder = builder.max_connections(n as usize);
    }
    builder
        .build()
        .map_err(|e| AppError::Configuration(format!("Invalid Neo4j configuration: {e}")))
}

async fn flat_file_source(kind: DbType, params: &ConnectionParams) -> AppResult<FlatFileSource> {
    let path = params
        .file_path()
        .ok_or_else(|| AppError::Configuration(format!("{kind} source requires filePath")))?;
    let source = FlatFileSource {
        kind,
        path: PathBuf::from(path),
    };
    source.probe().await?;
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn broker() -> Broker {
        Broker::new(&AppConfig::default())
    }

    fn params(value: serde_json::Value) -> ConnectionParams {
        serde_json::from_value(value).unwrap()
    }

    async fn temp_file(ext: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{}.{ext}", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_minimal_params_acquire_every_backend() {
        let csv = temp_file("csv", "a\n1\n").await;
        let json_file = temp_file("json", "[]").await;
        let cases = vec![
            json!({"type": "postgres", "host": "db", "username": "u", "database": "d"}),
            json!({"type": "mysql", "host": "db", "username": "u", "database": "d"}),
            json!({"type": "mssql", "host": "db", "username": "sa", "password": "p"}),
            json!({"type": "sqlite", "filePath": "/tmp/never-opened.db"}),
            json!({"type": "mongodb", "host": "db"}),
            json!({"type": "neo4j", "host": "db", "username": "neo4j", "password": "p"}),
            json!({"type": "csv", "filePath": csv.to_str().unwrap()}),
            json!({"type": "json", "filePath": json_file.to_str().unwrap()}),
        ];
        for case in cases {
            let expected = DbType::parse(case["type"].as_str().unwrap()).unwrap();
            let handle = broker().acquire(&params(case)).await.unwrap();
            assert_eq!(handle.db_type(), expected);
        }
        tokio::fs::remove_file(csv).await.ok();
        tokio::fs::remove_file(json_file).await.ok();
    }

    #[tokio::test]
    async fn test_missing_type_is_configuration_error() {
        let err = broker().acquire(&ConnectionParams::default()).await.err().unwrap();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_unknown_type_is_unsupported() {
        let err = broker()
            .acquire(&ConnectionParams::of_type("notarealdb"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Unsupported database type: notarealdb");
    }

    #[tokio::test]
    async fn test_file_backends_require_path() {
        for kind in ["sqlite", "csv", "json"] {
            let err = broker()
                .acquire(&ConnectionParams::of_type(kind))
                .await
                .err()
                .unwrap();
            assert!(matches!(err, AppError::Configuration(_)), "{kind}");
        }
    }

    #[tokio::test]
    async fn test_missing_flat_file_is_not_found() {
        let err = broker()
            .acquire(&params(json!({"type": "csv", "filePath": "/nonexistent/data.csv"})))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_neo4j_requires_credentials_and_address() {
        let err = broker()
            .acquire(&params(json!({"type": "neo4j", "host": "graph"})))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Configuration(ref m) if m.contains("username")));

        let err = broker()
            .acquire(&params(json!({"type": "neo4j", "username": "u", "password": "p"})))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Configuration(ref m) if m.contains("uri or host")));
    }

    #[tokio::test]
    async fn test_malformed_options_never_fail_acquisition() {
        let handle = broker()
            .acquire(&params(json!({
                "type": "mongodb",
                "host": "db",
                "driverOptions": "{not json"
            })))
            .await
            .unwrap();
        assert_eq!(handle.db_type(), DbType::MongoDB);

        let handle = broker()
            .acquire(&params(json!({
                "type": "mysql",
                "driverOptions": {"connectionLimit": "many", "charset": "utf8mb4"}
            })))
            .await
            .unwrap();
        assert_eq!(handle.db_type(), DbType::MySQL);
    }

    #[test]
    fn test_postgres_runtime_parameters() {
        let p = params(json!({
            "type": "postgres",
            "searchPath": "analytics",
            "driverOptions": {"timezone": "UTC", "unknown_knob": 1}
        }));
        let opts = postgres_options(&p, &merge_options_or_default(p.options.as_ref()));
        let rendered = opts.get_options().unwrap_or_default();
        assert!(rendered.contains("TimeZone=UTC"));
        assert!(rendered.contains("search_path=analytics"));
        assert!(!rendered.contains("unknown_knob"));
    }

    #[tokio::test]
    async fn test_mongo_database_falls_back_to_uri() {
        let handle = broker()
            .acquire(&params(json!({
                "type": "mongodb",
                "uri": "mongodb://localhost:27017/catalog"
            })))
            .await
            .unwrap();
        match handle {
            ConnectionHandle::MongoDB { database, .. } => assert_eq!(database, "catalog"),
            _ => panic!("expected a MongoDB handle"),
        }
    }
}
