//! Relational sessions: PostgreSQL, MySQL and SQLite through sqlx, SQL Server
//! through tiberius.
//!
//! PostgreSQL, SQLite and SQL Server sessions own a single connection opened
//! for the call. MySQL sessions own the pool built by the broker; the pool
//! connects on first use and is closed with the session.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::types::{Decimal, Uuid};
use sqlx::{
    Column, ColumnIndex, Connection, Database, Decode, Encode, Row, Type, TypeInfo, ValueRef,
};
use tiberius::{Client, ColumnData, FromSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use common::errors::{AppError, AppResult};
use common::models::{ColumnSchema, DbType, NativeQuery, QueryResult, Record, TableSchema};
use common::utils::SqlValidator;

use super::{expect_sql, hex};
use crate::session::Session;

// ============== Shared sqlx helpers ==============

/// Binds JSON values as positional parameters.
///
/// Integers bind as 64-bit, other numbers as doubles, arrays and objects as
/// their JSON text.
fn bind_params<'q, DB>(
    mut query: Query<'q, DB, <DB as Database>::Arguments<'q>>,
    params: &[Value],
) -> Query<'q, DB, <DB as Database>::Arguments<'q>>
where
    DB: Database,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    String: Encode<'q, DB> + Type<DB>,
    Option<String>: Encode<'q, DB> + Type<DB>,
{
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => query.bind(s.clone()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

/// Decodes one cell, `None` when the value is not compatible with `T`.
fn cell<'r, R, T>(row: &'r R, idx: usize) -> Option<T>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<T, _>(idx).ok()
}

/// Runtime type name of a cell, or `None` for SQL NULL.
fn cell_type<R>(row: &R, idx: usize) -> Option<String>
where
    R: Row,
    usize: ColumnIndex<R>,
{
    let raw = row.try_get_raw(idx).ok()?;
    if raw.is_null() {
        return None;
    }
    Some(raw.type_info().name().to_uppercase())
}

/// Text fallback shared by all sqlx dialects.
fn text_or_bytes<R>(row: &R, idx: usize) -> Value
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> String: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
{
    cell::<R, String>(row, idx)
        .map(Value::String)
        .or_else(|| cell::<R, Vec<u8>>(row, idx).map(|b| Value::String(hex(&b))))
        .unwrap_or(Value::Null)
}

fn rows_to_result<R: Row>(rows: &[R], decode: fn(&R, usize) -> Value) -> QueryResult {
    let records = rows
        .iter()
        .map(|row| {
            row.columns()
                .iter()
                .enumerate()
                .map(|(idx, col)| (col.name().to_string(), decode(row, idx)))
                .collect::<Record>()
        })
        .collect();
    QueryResult::from_rows(records)
}

/// Modification without a `RETURNING` clause: only the affected count comes back.
fn counts_only(sql: &str) -> bool {
    SqlValidator::is_modification(sql) && !SqlValidator::has_keyword(sql, "RETURNING")
}

fn not_found(name: &str) -> AppError {
    AppError::NotFound(format!("Table not found: {name}"))
}

// ============== PostgreSQL ==============

fn pg_value(row: &PgRow, idx: usize) -> Value {
    let Some(type_name) = cell_type(row, idx) else {
        return Value::Null;
    };
    let decoded = match type_name.as_str() {
        "BOOL" => cell::<_, bool>(row, idx).map(Value::from),
        "INT2" => cell::<_, i16>(row, idx).map(Value::from),
        "INT4" => cell::<_, i32>(row, idx).map(Value::from),
        "INT8" => cell::<_, i64>(row, idx).map(Value::from),
        "FLOAT4" => cell::<_, f32>(row, idx).map(Value::from),
        "FLOAT8" => cell::<_, f64>(row, idx).map(Value::from),
        "NUMERIC" => cell::<_, Decimal>(row, idx).map(|d| Value::String(d.to_string())),
        "JSON" | "JSONB" => cell::<_, Value>(row, idx),
        "UUID" => cell::<_, Uuid>(row, idx).map(|u| Value::String(u.to_string())),
        "DATE" => cell::<_, NaiveDate>(row, idx).map(|d| Value::String(d.to_string())),
        "TIME" => cell::<_, NaiveTime>(row, idx).map(|t| Value::String(t.to_string())),
        "TIMESTAMP" => cell::<_, NaiveDateTime>(row, idx).map(|t| Value::String(t.to_string())),
        "TIMESTAMPTZ" => {
            cell::<_, DateTime<Utc>>(row, idx).map(|t| Value::String(t.to_rfc3339()))
        }
        _ => None,
    };
    decoded.unwrap_or_else(|| text_or_bytes(row, idx))
}

/// Single PostgreSQL connection.
pub struct PostgresSession {
    conn: PgConnection,
}

impl PostgresSession {
    pub async fn open(options: PgConnectOptions) -> AppResult<Self> {
        let conn = PgConnection::connect_with(&options)
            .await
            .map_err(AppError::backend)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Session for PostgresSession {
    fn backend(&self) -> DbType {
        DbType::Postgres
    }

    async fn ping(&mut self) -> AppResult<()> {
        self.conn.ping().await.map_err(AppError::backend)
    }

    async fn query(&mut self, query: &NativeQuery) -> AppResult<QueryResult> {
        let (sql, params) = expect_sql(query)?;
        let stmt = bind_params(sqlx::query(sql), params);
        if counts_only(sql) {
            let done = stmt.execute(&mut self.conn).await.map_err(AppError::backend)?;
            return Ok(QueryResult::affected(done.rows_affected()));
        }
        let rows = stmt.fetch_all(&mut self.conn).await.map_err(AppError::backend)?;
        Ok(rows_to_result(&rows, pg_value))
    }

    async fn list_tables(&mut self) -> AppResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT table_name::text FROM information_schema.tables
             WHERE table_schema = ANY(current_schemas(false))
             ORDER BY table_name",
        )
        .fetch_all(&mut self.conn)
        .await
        .map_err(AppError::backend)
    }

    async fn describe(&mut self, name: &str, _sample_size: usize) -> AppResult<TableSchema> {
        let rows = sqlx::query(
            "SELECT column_name::text AS name, data_type::text AS data_type,
                    (is_nullable = 'YES') AS nullable
             FROM information_schema.columns
             WHERE table_schema = ANY(current_schemas(false)) AND table_name = $1
             ORDER BY ordinal_position",
        )
        .bind(name)
        .fetch_all(&mut self.conn)
        .await
        .map_err(AppError::backend)?;

        if rows.is_empty() {
            return Err(not_found(name));
        }
        let columns = rows
            .iter()
            .map(|row| {
                Ok(ColumnSchema::new(
                    row.try_get::<String, _>("name").map_err(AppError::backend)?,
                    row.try_get::<String, _>("data_type").map_err(AppError::backend)?,
                    row.try_get::<bool, _>("nullable").map_err(AppError::backend)?,
                ))
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(TableSchema {
            name: name.to_string(),
            columns,
        })
    }

    async fn close(self: Box<Self>) -> AppResult<()> {
        self.conn.close().await.map_err(AppError::backend)
    }
}

// ============== MySQL ==============

fn mysql_value(row: &MySqlRow, idx: usize) -> Value {
    let Some(type_name) = cell_type(row, idx) else {
        return Value::Null;
    };
    let decoded = if type_name.ends_with("UNSIGNED") {
        cell::<_, u64>(row, idx).map(Value::from)
    } else {
        match type_name.as_str() {
            "BOOLEAN" => cell::<_, bool>(row, idx).map(Value::from),
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
                cell::<_, i64>(row, idx).map(Value::from)
            }
            "FLOAT" => cell::<_, f32>(row, idx).map(Value::from),
            "DOUBLE" => cell::<_, f64>(row, idx).map(Value::from),
            "DECIMAL" => cell::<_, Decimal>(row, idx).map(|d| Value::String(d.to_string())),
            "JSON" => cell::<_, Value>(row, idx),
            "DATE" => cell::<_, NaiveDate>(row, idx).map(|d| Value::String(d.to_string())),
            "TIME" => cell::<_, NaiveTime>(row, idx).map(|t| Value::String(t.to_string())),
            "DATETIME" => {
                cell::<_, NaiveDateTime>(row, idx).map(|t| Value::String(t.to_string()))
            }
            "TIMESTAMP" => {
                cell::<_, DateTime<Utc>>(row, idx).map(|t| Value::String(t.to_rfc3339()))
            }
            _ => None,
        }
    };
    decoded.unwrap_or_else(|| text_or_bytes(row, idx))
}

/// MySQL session over the call-scoped pool.
pub struct MySqlSession {
    pool: MySqlPool,
}

impl MySqlSession {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Session for MySqlSession {
    fn backend(&self) -> DbType {
        DbType::MySQL
    }

    async fn ping(&mut self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(AppError::backend)
    }

    async fn query(&mut self, query: &NativeQuery) -> AppResult<QueryResult> {
        let (sql, params) = expect_sql(query)?;
        let stmt = bind_params(sqlx::query(sql), params);
        if counts_only(sql) {
            let done = stmt.execute(&self.pool).await.map_err(AppError::backend)?;
            return Ok(QueryResult::affected(done.rows_affected()));
        }
        let rows = stmt.fetch_all(&self.pool).await.map_err(AppError::backend)?;
        Ok(rows_to_result(&rows, mysql_value))
    }

    async fn list_tables(&mut self) -> AppResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT CAST(TABLE_NAME AS CHAR) FROM information_schema.TABLES
             WHERE TABLE_SCHEMA = DATABASE()
             ORDER BY TABLE_NAME",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::backend)
    }

    async fn describe(&mut self, name: &str, _sample_size: usize) -> AppResult<TableSchema> {
        let rows = sqlx::query(
            "SELECT CAST(COLUMN_NAME AS CHAR) AS name,
                    CAST(COLUMN_TYPE AS CHAR) AS data_type,
                    CAST(IS_NULLABLE AS CHAR) AS is_nullable
             FROM information_schema.COLUMNS
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
             ORDER BY ORDINAL_POSITION",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::backend)?;

        if rows.is_empty() {
            return Err(not_found(name));
        }
        let columns = rows
            .iter()
            .map(|row| {
                let nullable: String = row.try_get("is_nullable").map_err(AppError::backend)?;
                Ok(ColumnSchema::new(
                    row.try_get::<String, _>("name").map_err(AppError::backend)?,
                    row.try_get::<String, _>("data_type").map_err(AppError::backend)?,
                    nullable.eq_ignore_ascii_case("YES"),
                ))
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(TableSchema {
            name: name.to_string(),
            columns,
        })
    }

    async fn close(self: Box<Self>) -> AppResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

// ============== SQLite ==============

fn sqlite_value(row: &SqliteRow, idx: usize) -> Value {
    let Some(type_name) = cell_type(row, idx) else {
        return Value::Null;
    };
    let decoded = match type_name.as_str() {
        "INTEGER" | "INT" | "BIGINT" => cell::<_, i64>(row, idx).map(Value::from),
        "REAL" | "FLOAT" | "DOUBLE" => cell::<_, f64>(row, idx).map(Value::from),
        "BOOLEAN" => cell::<_, bool>(row, idx).map(Value::from),
        "BLOB" => cell::<_, Vec<u8>>(row, idx).map(|b| Value::String(hex(&b))),
        _ => None,
    };
    decoded.unwrap_or_else(|| text_or_bytes(row, idx))
}

/// Single SQLite connection; also backs the flat-file virtual store.
pub struct SqliteSession {
    conn: SqliteConnection,
}

impl SqliteSession {
    pub async fn open(options: SqliteConnectOptions) -> AppResult<Self> {
        let conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(AppError::backend)?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: SqliteConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Session for SqliteSession {
    fn backend(&self) -> DbType {
        DbType::SQLite
    }

    async fn ping(&mut self) -> AppResult<()> {
        self.conn.ping().await.map_err(AppError::backend)
    }

    async fn query(&mut self, query: &NativeQuery) -> AppResult<QueryResult> {
        let (sql, params) = expect_sql(query)?;
        let stmt = bind_params(sqlx::query(sql), params);
        if counts_only(sql) {
            let done = stmt.execute(&mut self.conn).await.map_err(AppError::backend)?;
            return Ok(QueryResult::affected(done.rows_affected()));
        }
        let rows = stmt.fetch_all(&mut self.conn).await.map_err(AppError::backend)?;
        Ok(rows_to_result(&rows, sqlite_value))
    }

    async fn list_tables(&mut self) -> AppResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT name FROM sqlite_master
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .fetch_all(&mut self.conn)
        .await
        .map_err(AppError::backend)
    }

    async fn describe(&mut self, name: &str, _sample_size: usize) -> AppResult<TableSchema> {
        let rows = sqlx::query(
            "SELECT name, type, \"notnull\" AS not_null FROM pragma_table_info(?) ORDER BY cid",
        )
        .bind(name)
        .fetch_all(&mut self.conn)
        .await
        .map_err(AppError::backend)?;

        if rows.is_empty() {
            return Err(not_found(name));
        }
        let columns = rows
            .iter()
            .map(|row| {
                let not_null: i64 = row.try_get("not_null").map_err(AppError::backend)?;
                Ok(ColumnSchema::new(
                    row.try_get::<String, _>("name").map_err(AppError::backend)?,
                    row.try_get::<String, _>("type").map_err(AppError::backend)?,
                    not_null == 0,
                ))
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(TableSchema {
            name: name.to_string(),
            columns,
        })
    }

    async fn close(self: Box<Self>) -> AppResult<()> {
        self.conn.close().await.map_err(AppError::backend)
    }
}

// ============== SQL Server ==============

type MsSqlClient = Client<Compat<TcpStream>>;

fn mssql_value(data: ColumnData<'static>) -> Value {
    match data {
        ColumnData::U8(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::I16(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::I32(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::I64(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::F32(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::F64(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::Bit(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::String(v) => v
            .map(|s| Value::String(s.into_owned()))
            .unwrap_or(Value::Null),
        ColumnData::Guid(v) => v
            .map(|g| Value::String(g.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Numeric(v) => v
            .map(|n| Value::String(n.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Binary(v) => v
            .map(|b| Value::String(hex(&b)))
            .unwrap_or(Value::Null),
        other => mssql_temporal(&other),
    }
}

fn mssql_temporal(data: &ColumnData<'static>) -> Value {
    if let Ok(Some(t)) = DateTime::<chrono::FixedOffset>::from_sql(data) {
        return Value::String(t.to_rfc3339());
    }
    if let Ok(Some(t)) = NaiveDateTime::from_sql(data) {
        return Value::String(t.to_string());
    }
    if let Ok(Some(d)) = NaiveDate::from_sql(data) {
        return Value::String(d.to_string());
    }
    if let Ok(Some(t)) = NaiveTime::from_sql(data) {
        return Value::String(t.to_string());
    }
    Value::Null
}

fn mssql_rows(rows: Vec<tiberius::Row>) -> QueryResult {
    let records = rows
        .into_iter()
        .map(|row| {
            let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
            names
                .into_iter()
                .zip(row)
                .map(|(name, data)| (name, mssql_value(data)))
                .collect::<Record>()
        })
        .collect();
    QueryResult::from_rows(records)
}

fn mssql_bind<'a>(query: &mut tiberius::Query<'a>, param: &Value) {
    match param {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn mssql_text(row: &tiberius::Row, idx: usize) -> AppResult<String> {
    row.try_get::<&str, _>(idx)
        .map_err(AppError::backend)
        .map(|v| v.unwrap_or_default().to_string())
}

/// Single SQL Server connection.
pub struct MsSqlSession {
    client: MsSqlClient,
}

impl MsSqlSession {
    pub async fn open(config: tiberius::Config) -> AppResult<Self> {
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(AppError::backend)?;
        tcp.set_nodelay(true).map_err(AppError::backend)?;
        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(AppError::backend)?;
        Ok(Self { client })
    }

    async fn fetch(&mut self, query: tiberius::Query<'_>) -> AppResult<Vec<tiberius::Row>> {
        query
            .query(&mut self.client)
            .await
            .map_err(AppError::backend)?
            .into_first_result()
            .await
            .map_err(AppError::backend)
    }
}

#[async_trait]
impl Session for MsSqlSession {
    fn backend(&self) -> DbType {
        DbType::MsSql
    }

    async fn ping(&mut self) -> AppResult<()> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map_err(AppError::backend)?
            .into_results()
            .await
            .map(|_| ())
            .map_err(AppError::backend)
    }

    async fn query(&mut self, query: &NativeQuery) -> AppResult<QueryResult> {
        let (sql, params) = expect_sql(query)?;
        let mut stmt = tiberius::Query::new(sql);
        for param in params {
            mssql_bind(&mut stmt, param);
        }
        if SqlValidator::is_modification(sql) && !SqlValidator::has_keyword(sql, "OUTPUT") {
            let done = stmt
                .execute(&mut self.client)
                .await
                .map_err(AppError::backend)?;
            return Ok(QueryResult::affected(done.total()));
        }
        let rows = self.fetch(stmt).await?;
        Ok(mssql_rows(rows))
    }

    async fn list_tables(&mut self) -> AppResult<Vec<String>> {
        let rows = self
            .fetch(tiberius::Query::new(
                "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES
                 WHERE TABLE_TYPE IN ('BASE TABLE', 'VIEW')
                 ORDER BY TABLE_NAME",
            ))
            .await?;
        rows.iter().map(|row| mssql_text(row, 0)).collect()
    }

    async fn describe(&mut self, name: &str, _sample_size: usize) -> AppResult<TableSchema> {
        let mut stmt = tiberius::Query::new(
            "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE
             FROM INFORMATION_SCHEMA.COLUMNS
             WHERE TABLE_NAME = @P1
             ORDER BY ORDINAL_POSITION",
        );
        stmt.bind(name.to_string());
        let rows = self.fetch(stmt).await?;

        if rows.is_empty() {
            return Err(not_found(name));
        }
        let columns = rows
            .iter()
            .map(|row| {
                Ok(ColumnSchema::new(
                    mssql_text(row, 0)?,
                    mssql_text(row, 1)?,
                    mssql_text(row, 2)?.eq_ignore_ascii_case("YES"),
                ))
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(TableSchema {
            name: name.to_string(),
            columns,
        })
    }

    async fn close(self: Box<Self>) -> AppResult<()> {
        self.client.close().await.map_err(AppError::backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    async fn memory_session() -> SqliteSession {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        SqliteSession::open(options).await.unwrap()
    }

    fn sql(sql: &str, params: Vec<Value>) -> NativeQuery {
        NativeQuery::Sql {
            sql: sql.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn test_sqlite_query_converts_types() {
        let mut session = memory_session().await;
        session
            .query(&sql(
                "CREATE TABLE t (id INTEGER NOT NULL, score REAL, name TEXT, raw BLOB)",
                vec![],
            ))
            .await
            .unwrap();
        let inserted = session
            .query(&sql(
                "INSERT INTO t VALUES (?, ?, ?, ?)",
                vec![json!(1), json!(2.5), json!("ada"), json!(null)],
            ))
            .await
            .unwrap();
        assert_eq!(inserted.affected_rows, Some(1));

        let result = session
            .query(&sql("SELECT * FROM t WHERE id = ?", vec![json!(1)]))
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["id", "score", "name", "raw"]);
        assert_eq!(result.rows[0]["id"], json!(1));
        assert_eq!(result.rows[0]["score"], json!(2.5));
        assert_eq!(result.rows[0]["name"], json!("ada"));
        assert_eq!(result.rows[0]["raw"], json!(null));
        Box::new(session).close().await.unwrap();
    }

    #[tokio::test]
    async fn test_sqlite_catalog() {
        let mut session = memory_session().await;
        session
            .query(&sql("CREATE TABLE people (id INTEGER NOT NULL, nick TEXT)", vec![]))
            .await
            .unwrap();
        assert_eq!(session.list_tables().await.unwrap(), vec!["people"]);

        let schema = session.describe("people", 20).await.unwrap();
        assert_eq!(
            schema.columns,
            vec![
                ColumnSchema::new("id", "INTEGER", false),
                ColumnSchema::new("nick", "TEXT", true),
            ]
        );

        let err = session.describe("missing", 20).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_sqlite_error_is_verbatim() {
        let mut session = memory_session().await;
        let err = session
            .query(&sql("SELECT * FROM nowhere", vec![]))
            .await
            .unwrap_err();
        match err {
            AppError::BackendExecution(msg) => assert!(msg.contains("no such table")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_insert_returning_yields_rows() {
        let mut session = memory_session().await;
        session
            .query(&sql("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", vec![]))
            .await
            .unwrap();
        let result = session
            .query(&sql(
                "INSERT INTO t (name) VALUES (?) RETURNING id, name",
                vec![json!("ada")],
            ))
            .await
            .unwrap();
        assert_eq!(result.affected_rows, None);
        assert_eq!(result.columns, vec!["id", "name"]);
        assert_eq!(result.rows[0]["id"], json!(1));
        assert_eq!(result.rows[0]["name"], json!("ada"));
    }
}
