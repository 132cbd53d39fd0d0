//! 连接注册表
//!
//! 保存的连接记录以显式协作者的形式传入服务，不使用全局列表。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use common::errors::{AppError, AppResult};
use common::models::ConnectionConfig;

/// 连接注册表 Trait
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// 列出所有连接（按创建时间倒序）
    async fn list(&self) -> Vec<ConnectionConfig>;

    /// 根据 ID 获取连接
    async fn get(&self, id: &str) -> AppResult<ConnectionConfig>;

    /// 保存连接（同 ID 覆盖）
    async fn save(&self, config: ConnectionConfig) -> AppResult<()>;

    /// 根据 ID 删除连接
    async fn remove(&self, id: &str) -> AppResult<()>;
}

/// 内存注册表
#[derive(Default)]
pub struct InMemoryRegistry {
    connections: RwLock<HashMap<String, ConnectionConfig>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前连接数量
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Connection not found: {id}"))
}

#[async_trait]
impl ConnectionRegistry for InMemoryRegistry {
    async fn list(&self) -> Vec<ConnectionConfig> {
        let mut configs: Vec<_> = self.connections.read().await.values().cloned().collect();
        configs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        configs
    }

    async fn get(&self, id: &str) -> AppResult<ConnectionConfig> {
        self.connections
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn save(&self, config: ConnectionConfig) -> AppResult<()> {
        self.connections
            .write()
            .await
            .insert(config.id.clone(), config);
        Ok(())
    }

    async fn remove(&self, id: &str) -> AppResult<()> {
        self.connections
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found(id))
    }
}
