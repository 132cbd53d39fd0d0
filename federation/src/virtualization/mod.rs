//! Flat-file virtualization.
//!
//! A CSV or JSON file is loaded into a fresh in-memory SQLite database, one
//! `TEXT` table per call, and the caller's SQL runs against it. Only the
//! requested window of rows is inserted; every row is still counted so the
//! result carries the full source `total`. The store is closed on every path
//! through the same session bracket the native backends use.

mod csv;
mod json;

use std::path::Path;

use serde_json::Value;
use sqlx::sqlite::SqliteConnection;
use sqlx::{Connection, Executor};

use common::errors::{AppError, AppResult};
use common::models::{DbType, NativeQuery, QueryResult, VirtualQuery};
use common::utils::SqlValidator;

use crate::backends::SqliteSession;
use crate::broker::FlatFileSource;
use crate::session::{self, Session};

const MEMORY_URL: &str = "sqlite::memory:";

/// Runs `query` against a virtualized flat file.
pub async fn execute(source: &FlatFileSource, query: &VirtualQuery) -> AppResult<QueryResult> {
    let result = match source.kind {
        DbType::Csv => csv::execute(&source.path, query).await?,
        DbType::Json => json::execute(&source.path, query).await?,
        other => {
            return Err(AppError::UnsupportedBackend(format!(
                "{other} is not a flat file"
            )))
        }
    };
    tracing::debug!(
        backend = %source.kind,
        rows = result.row_count,
        total = result.total.unwrap_or_default(),
        "平面文件查询完成"
    );
    Ok(result)
}

/// Row window over a source of unknown length.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    offset: u64,
    limit: u64,
    seen: u64,
    inserted: u64,
}

impl Window {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit,
            seen: 0,
            inserted: 0,
        }
    }

    /// Counts the next source row and reports whether it is inserted.
    pub fn admit(&mut self) -> bool {
        let index = self.seen;
        self.seen += 1;
        if index < self.offset || self.inserted >= self.limit {
            return false;
        }
        self.inserted += 1;
        true
    }

    /// Rows counted so far.
    pub fn total(&self) -> u64 {
        self.seen
    }
}

/// Per-call in-memory table. Rows are inserted inside one transaction
/// that is committed by [`EphemeralStore::finish`].
pub struct EphemeralStore {
    conn: SqliteConnection,
    insert_sql: String,
    width: usize,
}

impl EphemeralStore {
    /// Creates the database and the `TEXT` table, and opens the load
    /// transaction.
    pub async fn create(table: &str, columns: &[String]) -> AppResult<Self> {
        let mut conn = SqliteConnection::connect(MEMORY_URL)
            .await
            .map_err(AppError::backend)?;

        let table = SqlValidator::quote_ident(table);
        let quoted: Vec<String> = columns.iter().map(|c| SqlValidator::quote_ident(c)).collect();
        let ddl = format!(
            "CREATE TABLE {table} ({})",
            quoted
                .iter()
                .map(|c| format!("{c} TEXT"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let prepared: Result<_, sqlx::Error> = async {
            conn.execute(ddl.as_str()).await?;
            conn.execute("BEGIN").await
        }
        .await;
        if let Err(e) = prepared {
            if let Err(close_err) = conn.close().await {
                tracing::warn!(error = %close_err, "临时库关闭失败");
            }
            return Err(AppError::backend(e));
        }

        let insert_sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            quoted.join(", "),
            vec!["?"; quoted.len()].join(", ")
        );
        Ok(Self {
            conn,
            insert_sql,
            width: columns.len(),
        })
    }

    /// Inserts one row; missing trailing cells become NULL.
    pub async fn insert(&mut self, cells: &[Option<String>]) -> AppResult<()> {
        let mut stmt = sqlx::query(&self.insert_sql);
        for idx in 0..self.width {
            stmt = stmt.bind(cells.get(idx).cloned().flatten());
        }
        stmt.execute(&mut self.conn)
            .await
            .map(|_| ())
            .map_err(AppError::backend)
    }

    /// Commits the load when `loaded` succeeded, runs `sql` over the window
    /// and closes the store.
    pub async fn finish(
        mut self,
        loaded: AppResult<()>,
        sql: &str,
        total: u64,
    ) -> AppResult<QueryResult> {
        let committed = match loaded {
            Ok(()) => self
                .conn
                .execute("COMMIT")
                .await
                .map(|_| ())
                .map_err(AppError::backend),
            Err(e) => Err(e),
        };
        let mut store: Box<dyn Session> = Box::new(SqliteSession::from_connection(self.conn));
        let outcome = match committed {
            Ok(()) => {
                let query = NativeQuery::Sql {
                    sql: sql.to_string(),
                    params: Vec::new(),
                };
                store.query(&query).await
            }
            Err(e) => Err(e),
        };
        session::release(store, outcome)
            .await
            .map(|result| result.with_total(total))
    }
}

/// Result for a source with no columns; no query is run.
fn empty_result(total: u64) -> QueryResult {
    QueryResult::empty().with_total(total)
}

/// Column names made unique under SQLite's ASCII case-insensitive
/// comparison; repeats get a numeric suffix.
fn unique_names<I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut unique: Vec<String> = Vec::new();
    for base in names {
        let taken = |name: &str| unique.iter().any(|u| u.eq_ignore_ascii_case(name));
        let mut candidate = base.clone();
        let mut suffix = 2;
        while taken(&candidate) {
            candidate = format!("{base}_{suffix}");
            suffix += 1;
        }
        unique.push(candidate);
    }
    unique
}

/// Text stored for a JSON value; null stays NULL.
fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).ok(),
    }
}

fn open_error(path: &Path, err: std::io::Error) -> AppError {
    if err.kind() == std::io::ErrorKind::NotFound {
        AppError::NotFound(format!("File not found: {}", path.display()))
    } else {
        AppError::backend(format!("Failed to read {}: {err}", path.display()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::PathBuf;

    /// Temporary file removed on drop.
    pub struct TempFile(pub PathBuf);

    impl TempFile {
        pub async fn with(ext: &str, content: impl AsRef<[u8]>) -> Self {
            let path = std::env::temp_dir().join(format!("{}.{ext}", uuid::Uuid::new_v4()));
            tokio::fs::write(&path, content).await.unwrap();
            Self(path)
        }
    }

    impl Drop for TempFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }
}
