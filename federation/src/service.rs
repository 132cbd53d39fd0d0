//! 数据源联邦服务
//!
//! 对外的统一入口：解析连接参数（或已保存连接的 `uid`），获取连接句柄，
//! 再交给查询分发器或结构探查器。

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use common::config::AppConfig;
use common::errors::AppResult;
use common::models::{
    ConnectionConfig, ConnectionItem, ConnectionParams, CreateConnectionRequest, QueryRequest,
    QueryResult, TableList, TableSchema,
};
use common::utils::IdGenerator;

use crate::broker::{Broker, ConnectionHandle};
use crate::dispatcher::Dispatcher;
use crate::introspector::Introspector;
use crate::registry::ConnectionRegistry;
use crate::session;

/// 联邦服务
#[derive(Clone)]
pub struct FederationService {
    broker: Broker,
    dispatcher: Dispatcher,
    introspector: Introspector,
    registry: Arc<dyn ConnectionRegistry>,
}

impl FederationService {
    /// 创建服务实例
    pub fn new(config: &AppConfig, registry: Arc<dyn ConnectionRegistry>) -> Self {
        Self {
            broker: Broker::new(config),
            dispatcher: Dispatcher::new(config.flat_file_default_limit),
            introspector: Introspector::new(config.sample_size),
            registry,
        }
    }

    /// 解析连接参数：给出 `uid` 时使用已保存的连接
    pub async fn resolve(
        &self,
        uid: Option<&str>,
        params: ConnectionParams,
    ) -> AppResult<ConnectionParams> {
        match uid.map(str::trim).filter(|u| !u.is_empty()) {
            Some(uid) => {
                let saved = self.registry.get(uid).await?;
                tracing::debug!(uid = %uid, name = %saved.name, "使用已保存的连接");
                Ok(saved.params)
            }
            None => Ok(params),
        }
    }

    /// 获取连接句柄
    pub async fn acquire(&self, params: &ConnectionParams) -> AppResult<ConnectionHandle> {
        self.broker.acquire(params).await
    }

    /// 测试连接，返回往返耗时（毫秒）
    pub async fn test(&self, params: &ConnectionParams) -> AppResult<u64> {
        let started = Instant::now();
        let handle = self.acquire(params).await?;
        let db_type = handle.db_type();
        match handle {
            ConnectionHandle::FlatFile(source) => source.probe().await?,
            native => session::ping(native.open().await?).await?,
        }
        let latency_ms = started.elapsed().as_millis() as u64;
        tracing::info!(backend = %db_type, latency_ms, "连接测试成功");
        Ok(latency_ms)
    }

    /// 执行查询
    pub async fn execute(
        &self,
        params: &ConnectionParams,
        request: &QueryRequest,
    ) -> AppResult<QueryResult> {
        let handle = self.acquire(params).await?;
        self.dispatcher.execute(handle, request).await
    }

    /// 列出数据表 / 集合 / 标签
    pub async fn list_tables(&self, params: &ConnectionParams) -> AppResult<TableList> {
        let handle = self.acquire(params).await?;
        let tables = self.introspector.list_tables(handle).await?;
        Ok(TableList { tables })
    }

    /// 读取表结构
    pub async fn list_columns(
        &self,
        params: &ConnectionParams,
        table: &str,
    ) -> AppResult<TableSchema> {
        let handle = self.acquire(params).await?;
        self.introspector.list_columns(handle, table).await
    }

    // ============== 已保存连接 ==============

    /// 列出所有已保存连接
    pub async fn list_connections(&self) -> Vec<ConnectionItem> {
        self.registry
            .list()
            .await
            .into_iter()
            .map(ConnectionItem::from)
            .collect()
    }

    /// 保存新连接
    pub async fn create_connection(
        &self,
        req: CreateConnectionRequest,
    ) -> AppResult<ConnectionItem> {
        let config: ConnectionConfig =
            req.into_config(IdGenerator::connection_id(), Utc::now().to_rfc3339())?;
        self.registry.save(config.clone()).await?;
        tracing::info!(id = %config.id, name = %config.name, "连接已创建");
        Ok(ConnectionItem::from(config))
    }

    /// 根据 ID 获取已保存连接
    pub async fn get_connection(&self, id: &str) -> AppResult<ConnectionItem> {
        self.registry.get(id).await.map(ConnectionItem::from)
    }

    /// 删除已保存连接
    pub async fn delete_connection(&self, id: &str) -> AppResult<()> {
        self.registry.remove(id).await?;
        tracing::info!(id = %id, "连接已删除");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use crate::virtualization::testing::TempFile;
    use common::errors::AppError;
    use serde_json::json;

    fn service() -> FederationService {
        FederationService::new(&AppConfig::default(), Arc::new(InMemoryRegistry::new()))
    }

    #[tokio::test]
    async fn test_unknown_type_fails_uniformly() {
        let svc = service();
        let params = ConnectionParams::of_type("notarealdb");
        let expected = "Unsupported database type: notarealdb";

        assert_eq!(svc.test(&params).await.unwrap_err().to_string(), expected);
        assert_eq!(
            svc.execute(&params, &QueryRequest::sql("SELECT 1"))
                .await
                .unwrap_err()
                .to_string(),
            expected
        );
        assert_eq!(svc.list_tables(&params).await.unwrap_err().to_string(), expected);
        assert_eq!(
            svc.list_columns(&params, "t").await.unwrap_err().to_string(),
            expected
        );
    }

    #[tokio::test]
    async fn test_saved_connection_is_resolved_by_uid() {
        let file = TempFile::with("csv", "k,v\na,1\n").await;
        let svc = service();
        let req: CreateConnectionRequest = serde_json::from_value(json!({
            "name": "kv",
            "type": "csv",
            "filePath": file.0.to_str().unwrap()
        }))
        .unwrap();
        let item = svc.create_connection(req).await.unwrap();

        let params = svc
            .resolve(Some(&item.id), ConnectionParams::default())
            .await
            .unwrap();
        let result = svc
            .execute(&params, &QueryRequest::sql("SELECT v FROM data WHERE k = 'a'"))
            .await
            .unwrap();
        assert_eq!(result.rows[0]["v"], json!("1"));
        assert!(svc.test(&params).await.is_ok());

        svc.delete_connection(&item.id).await.unwrap();
        let err = svc
            .resolve(Some(&item.id), ConnectionParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_flat_file_introspection_is_unsupported() {
        let file = TempFile::with("json", "[]").await;
        let mut params = ConnectionParams::of_type("json");
        params.file_path = Some(file.0.to_string_lossy().into_owned());
        let err = service().list_tables(&params).await.unwrap_err();
        assert!(matches!(err, AppError::UnsupportedBackend(_)));
    }

    #[tokio::test]
    async fn test_sqlite_catalog_through_service() {
        let path = std::env::temp_dir().join(format!("{}.db", uuid::Uuid::new_v4()));
        let svc = service();
        let params: ConnectionParams = serde_json::from_value(json!({
            "type": "sqlite",
            "filePath": path.to_str().unwrap(),
            "driverOptions": {"createIfMissing": true}
        }))
        .unwrap();
        svc.execute(&params, &QueryRequest::sql("CREATE TABLE t (id INTEGER PRIMARY KEY, note TEXT)"))
            .await
            .unwrap();

        assert_eq!(svc.list_tables(&params).await.unwrap().tables, vec!["t"]);
        let schema = svc.list_columns(&params, "t").await.unwrap();
        assert_eq!(schema.columns.len(), 2);
        assert_eq!(schema.columns[1].name, "note");
        assert!(matches!(
            svc.list_columns(&params, "nope").await,
            Err(AppError::NotFound(_))
        ));
        assert!(svc.test(&params).await.is_ok());
        tokio::fs::remove_file(&path).await.ok();
    }
}
