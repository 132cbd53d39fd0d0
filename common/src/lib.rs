//! 数据源联邦层公共模块
//!
//! 包含各服务共享的内容：
//! - 配置加载
//! - 错误类型与统一响应格式
//! - 连接、查询、模式数据模型
//! - 请求 ID 中间件

pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod response;
pub mod utils;
