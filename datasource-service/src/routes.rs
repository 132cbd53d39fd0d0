//! 数据源服务路由模块

use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use common::middleware::request_id::request_id_middleware;

use crate::handlers;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "数据源服务 API",
        version = "0.1.0",
        description = "异构数据源联邦：连接测试、查询、表与字段探查"
    ),
    paths(
        handlers::test_datasource,
        handlers::query_datasource,
        handlers::list_tables,
        handlers::list_columns,
        handlers::list_connections,
        handlers::create_connection,
        handlers::get_connection,
        handlers::delete_connection,
        handlers::health_check,
    ),
    components(schemas(
        common::models::ConnectionParams,
        common::models::ConnectionItem,
        common::models::CreateConnectionRequest,
        common::models::QueryRequest,
        common::models::QueryResult,
        common::models::SchemaField,
        common::models::TableList,
        common::models::TableSchema,
        common::models::ColumnSchema,
        common::models::TypeTag,
        common::models::DbType,
        handlers::DataSourceRequest,
        handlers::QueryBody,
        handlers::ColumnsBody,
        handlers::TestResult,
        handlers::ConnectionList,
        handlers::DeletedConnection,
        handlers::HealthResponse,
    )),
    tags(
        (name = "datasources", description = "数据源操作端点"),
        (name = "connections", description = "已保存连接端点"),
        (name = "health", description = "健康检查端点")
    )
)]
pub struct ApiDoc;

/// 创建 API 路由
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/datasources/test", post(handlers::test_datasource))
        .route("/api/datasources/query", post(handlers::query_datasource))
        .route("/api/datasources/tables", post(handlers::list_tables))
        .route("/api/datasources/columns", post(handlers::list_columns))
        .route(
            "/api/connections",
            get(handlers::list_connections).post(handlers::create_connection),
        )
        .route(
            "/api/connections/{id}",
            get(handlers::get_connection).delete(handlers::delete_connection),
        )
        .route("/api/health", get(handlers::health_check))
}

/// 完整应用：路由、文档与中间件
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(router())
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
