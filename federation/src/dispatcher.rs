//! Query dispatcher.
//!
//! Native backends get a [`NativeQuery`] run inside the session bracket;
//! flat files go through virtualization.

use std::time::Instant;

use common::errors::AppResult;
use common::models::{QueryRequest, QueryResult};

use crate::broker::ConnectionHandle;
use crate::session;
use crate::virtualization;

#[derive(Debug, Clone)]
pub struct Dispatcher {
    flat_file_default_limit: u64,
}

impl Dispatcher {
    pub fn new(flat_file_default_limit: u64) -> Self {
        Self {
            flat_file_default_limit,
        }
    }

    /// Executes `request` against `handle`.
    pub async fn execute(
        &self,
        handle: ConnectionHandle,
        request: &QueryRequest,
    ) -> AppResult<QueryResult> {
        let started = Instant::now();
        let db_type = handle.db_type();

        let mut result = match handle {
            ConnectionHandle::FlatFile(source) => {
                let query = request.to_virtual(self.flat_file_default_limit);
                virtualization::execute(&source, &query).await?
            }
            native => {
                let query = match request.to_native(db_type) {
                    Ok(query) => query,
                    Err(e) => {
                        native.discard().await;
                        return Err(e);
                    }
                };
                let session = native.open().await?;
                session::query(session, &query).await?
            }
        };

        result.execution_time_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            backend = %db_type,
            rows = result.row_count,
            elapsed_ms = result.execution_time_ms,
            "查询执行完成"
        );
        Ok(result)
    }
}
