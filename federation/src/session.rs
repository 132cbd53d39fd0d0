//! Session bracket.
//!
//! A [`Session`] is a live native resource (connection, pool, client or
//! driver) opened for exactly one operation. The functions in this module
//! run that operation and then close the session on every path, so callers
//! never hold a session across calls.
//!
//! Close semantics:
//! - work ok, close ok → the work result;
//! - work ok, close failed → the close error (a failed release is never
//!   reported as success);
//! - work failed → the work error; a close failure is logged.

use async_trait::async_trait;
use common::errors::AppResult;
use common::models::{DbType, NativeQuery, QueryResult, TableSchema};

/// A live, single-operation backend session.
#[async_trait]
pub trait Session: Send {
    /// Backend behind this session.
    fn backend(&self) -> DbType;

    /// Cheapest round-trip the backend supports.
    async fn ping(&mut self) -> AppResult<()>;

    /// Runs a native query and converts the result to rows.
    async fn query(&mut self, query: &NativeQuery) -> AppResult<QueryResult>;

    /// Lists tables, collections or labels.
    async fn list_tables(&mut self) -> AppResult<Vec<String>>;

    /// Describes one table; schemaless backends sample up to `sample_size` records.
    async fn describe(&mut self, name: &str, sample_size: usize) -> AppResult<TableSchema>;

    /// Releases the native resource.
    async fn close(self: Box<Self>) -> AppResult<()>;
}

/// Pings, then closes.
pub async fn ping(mut session: Box<dyn Session>) -> AppResult<()> {
    let outcome = session.ping().await;
    release(session, outcome).await
}

/// Runs `query`, then closes.
pub async fn query(mut session: Box<dyn Session>, query: &NativeQuery) -> AppResult<QueryResult> {
    let outcome = session.query(query).await;
    release(session, outcome).await
}

/// Lists tables, then closes.
pub async fn list_tables(mut session: Box<dyn Session>) -> AppResult<Vec<String>> {
    let outcome = session.list_tables().await;
    release(session, outcome).await
}

/// Describes `name`, then closes.
pub async fn describe(
    mut session: Box<dyn Session>,
    name: &str,
    sample_size: usize,
) -> AppResult<TableSchema> {
    let outcome = session.describe(name, sample_size).await;
    release(session, outcome).await
}

/// Closes `session` and combines the close result with `outcome`.
pub async fn release<T>(session: Box<dyn Session>, outcome: AppResult<T>) -> AppResult<T> {
    let backend = session.backend();
    let closed = session.close().await;
    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => {
            tracing::error!(backend = %backend, error = %close_err, "会话关闭失败");
            Err(close_err)
        }
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            tracing::warn!(backend = %backend, error = %close_err, "操作失败后会话关闭也失败");
            Err(err)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording session double.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use common::errors::AppError;
    use common::models::ColumnSchema;

    /// Counters shared between a test and its double.
    #[derive(Default)]
    pub struct Recorder {
        pub calls: AtomicUsize,
        pub closes: AtomicUsize,
    }

    impl Recorder {
        pub fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    /// Session double that records calls and can be told to fail.
    pub struct RecordingSession {
        pub recorder: Arc<Recorder>,
        pub fail_work: bool,
        pub fail_close: bool,
    }

    impl RecordingSession {
        pub fn new(recorder: Arc<Recorder>) -> Self {
            Self {
                recorder,
                fail_work: false,
                fail_close: false,
            }
        }

        fn work<T>(&self, value: T) -> AppResult<T> {
            self.recorder.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_work {
                Err(AppError::backend("native failure"))
            } else {
                Ok(value)
            }
        }
    }

    #[async_trait]
    impl Session for RecordingSession {
        fn backend(&self) -> DbType {
            DbType::Postgres
        }

        async fn ping(&mut self) -> AppResult<()> {
            self.work(())
        }

        async fn query(&mut self, _query: &NativeQuery) -> AppResult<QueryResult> {
            self.work(QueryResult::empty())
        }

        async fn list_tables(&mut self) -> AppResult<Vec<String>> {
            self.work(vec!["users".to_string()])
        }

        async fn describe(&mut self, name: &str, _sample_size: usize) -> AppResult<TableSchema> {
            self.work(TableSchema {
                name: name.to_string(),
                columns: vec![ColumnSchema::new("id", "integer", false)],
            })
        }

        async fn close(self: Box<Self>) -> AppResult<()> {
            self.recorder.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                Err(AppError::backend("close failure"))
            } else {
                Ok(())
            }
        }
    }
}
