//! 异构数据源联邦核心
//!
//! 一套调用接口覆盖关系型（PostgreSQL、MySQL、SQL Server、SQLite）、
//! 文档型（MongoDB）、图（Neo4j）以及平面文件（CSV、JSON）数据源：
//! - `broker`：把连接参数规范化为连接句柄
//! - `dispatcher`：执行查询，平面文件走虚拟化
//! - `introspector`：列表与表结构，无模式数据源采样推断
//! - `session`：会话的获取、使用与释放
//! - `service`：统一门面

pub mod backends;
pub mod broker;
pub mod dispatcher;
pub mod inference;
pub mod introspector;
pub mod registry;
pub mod service;
pub mod session;
pub mod virtualization;

pub use broker::{Broker, ConnectionHandle, FlatFileSource};
pub use registry::{ConnectionRegistry, InMemoryRegistry};
pub use service::FederationService;
