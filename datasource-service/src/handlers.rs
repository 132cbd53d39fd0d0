//! Handler模块

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use common::errors::{AppError, AppResult};
use common::models::{
    ConnectionItem, ConnectionParams, CreateConnectionRequest, QueryRequest, QueryResult,
    TableList, TableSchema,
};
use common::response::ApiResponse;

use crate::state::AppState;

const SERVICE_NAME: &str = "datasource-service";

/// Connection parameters, or the `uid` of a saved connection.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DataSourceRequest {
    /// Saved connection ID; takes precedence over inline parameters.
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(flatten)]
    pub connection: ConnectionParams,
}

/// Query request body.
#[derive(Debug, Deserialize, ToSchema)]
pub struct QueryBody {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(flatten)]
    pub connection: ConnectionParams,
    #[serde(flatten)]
    pub request: QueryRequest,
}

/// Column listing request body.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ColumnsBody {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(flatten)]
    pub connection: ConnectionParams,
    /// Table, collection or label name.
    #[serde(alias = "tableName", alias = "collection", alias = "label")]
    pub table: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub latency_ms: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectionList {
    pub connections: Vec<ConnectionItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeletedConnection {
    pub id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub connections: usize,
}

/// Unwraps a JSON body; a malformed body becomes a validation error so it
/// is answered with the standard envelope.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

/// 测试数据源连接
#[utoipa::path(
    post,
    path = "/api/datasources/test",
    tag = "datasources",
    request_body = DataSourceRequest,
    responses(
        (status = 200, description = "连接成功", body = TestResult),
        (status = 400, description = "参数错误或不支持的类型"),
        (status = 502, description = "数据源返回错误")
    )
)]
pub async fn test_datasource(
    State(state): State<AppState>,
    payload: Result<Json<DataSourceRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<TestResult>>> {
    let req = body(payload)?;
    let params = state.federation.resolve(req.uid.as_deref(), req.connection).await?;
    let latency_ms = state.federation.test(&params).await?;
    Ok(Json(ApiResponse::ok_with_service(
        TestResult { latency_ms },
        SERVICE_NAME,
    )))
}

/// 执行查询
#[utoipa::path(
    post,
    path = "/api/datasources/query",
    tag = "datasources",
    request_body = QueryBody,
    responses(
        (status = 200, description = "查询结果", body = QueryResult),
        (status = 400, description = "参数错误或不支持的类型"),
        (status = 404, description = "文件或连接不存在"),
        (status = 422, description = "文件内容格式错误"),
        (status = 502, description = "数据源返回错误")
    )
)]
pub async fn query_datasource(
    State(state): State<AppState>,
    payload: Result<Json<QueryBody>, JsonRejection>,
) -> AppResult<Json<ApiResponse<QueryResult>>> {
    let req = body(payload)?;
    let params = state.federation.resolve(req.uid.as_deref(), req.connection).await?;
    let result = state.federation.execute(&params, &req.request).await?;
    let elapsed = result.execution_time_ms;
    Ok(Json(
        ApiResponse::ok_with_service(result, SERVICE_NAME).with_duration(elapsed),
    ))
}

/// 列出数据表 / 集合 / 标签
#[utoipa::path(
    post,
    path = "/api/datasources/tables",
    tag = "datasources",
    request_body = DataSourceRequest,
    responses(
        (status = 200, description = "表列表", body = TableList),
        (status = 400, description = "参数错误或不支持的类型")
    )
)]
pub async fn list_tables(
    State(state): State<AppState>,
    payload: Result<Json<DataSourceRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<TableList>>> {
    let req = body(payload)?;
    let params = state.federation.resolve(req.uid.as_deref(), req.connection).await?;
    let tables = state.federation.list_tables(&params).await?;
    Ok(Json(ApiResponse::ok_with_service(tables, SERVICE_NAME)))
}

/// 读取表结构
#[utoipa::path(
    post,
    path = "/api/datasources/columns",
    tag = "datasources",
    request_body = ColumnsBody,
    responses(
        (status = 200, description = "表结构", body = TableSchema),
        (status = 404, description = "表不存在")
    )
)]
pub async fn list_columns(
    State(state): State<AppState>,
    payload: Result<Json<ColumnsBody>, JsonRejection>,
) -> AppResult<Json<ApiResponse<TableSchema>>> {
    let req = body(payload)?;
    let params = state.federation.resolve(req.uid.as_deref(), req.connection).await?;
    let schema = state.federation.list_columns(&params, &req.table).await?;
    Ok(Json(ApiResponse::ok_with_service(schema, SERVICE_NAME)))
}

/// 列出所有已保存的连接
#[utoipa::path(
    get,
    path = "/api/connections",
    tag = "connections",
    responses(
        (status = 200, description = "连接列表", body = ConnectionList)
    )
)]
pub async fn list_connections(State(state): State<AppState>) -> Json<ApiResponse<ConnectionList>> {
    let connections = state.federation.list_connections().await;
    Json(ApiResponse::ok_with_service(
        ConnectionList { connections },
        SERVICE_NAME,
    ))
}

/// 保存新连接
#[utoipa::path(
    post,
    path = "/api/connections",
    tag = "connections",
    request_body = CreateConnectionRequest,
    responses(
        (status = 200, description = "连接已创建", body = ConnectionItem),
        (status = 400, description = "参数错误")
    )
)]
pub async fn create_connection(
    State(state): State<AppState>,
    payload: Result<Json<CreateConnectionRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<ConnectionItem>>> {
    let req = body(payload)?;
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let item = state.federation.create_connection(req).await?;
    Ok(Json(ApiResponse::ok_with_service(item, SERVICE_NAME)))
}

/// 根据 ID 获取连接
#[utoipa::path(
    get,
    path = "/api/connections/{id}",
    tag = "connections",
    params(
        ("id" = String, Path, description = "连接 ID")
    ),
    responses(
        (status = 200, description = "连接详情", body = ConnectionItem),
        (status = 404, description = "连接未找到")
    )
)]
pub async fn get_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<ConnectionItem>>> {
    let item = state.federation.get_connection(&id).await?;
    Ok(Json(ApiResponse::ok_with_service(item, SERVICE_NAME)))
}

/// 根据 ID 删除连接
#[utoipa::path(
    delete,
    path = "/api/connections/{id}",
    tag = "connections",
    params(
        ("id" = String, Path, description = "连接 ID")
    ),
    responses(
        (status = 200, description = "连接已删除", body = DeletedConnection),
        (status = 404, description = "连接未找到")
    )
)]
pub async fn delete_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<DeletedConnection>>> {
    state.federation.delete_connection(&id).await?;
    Ok(Json(ApiResponse::ok_with_service(
        DeletedConnection { id },
        SERVICE_NAME,
    )))
}

/// 健康检查端点
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "服务运行正常", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        connections: state.federation.list_connections().await.len(),
    })
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use common::config::AppConfig;

    use crate::routes;
    use crate::state::AppState;

    fn app() -> Router {
        routes::app(AppState::new(AppConfig::default()))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(value) => Body::from(value.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn temp_csv(content: &str) -> std::path::PathBuf {
        temp_file("csv", content).await
    }

    async fn temp_file(ext: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("{}.{ext}", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_unsupported_type_envelope() {
        let app = app();
        for uri in [
            "/api/datasources/test",
            "/api/datasources/query",
            "/api/datasources/tables",
        ] {
            let (status, body) = call(&app, "POST", uri, Some(json!({"type": "notarealdb"}))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["success"], json!(false));
            assert_eq!(body["error"], json!("Unsupported database type: notarealdb"));
        }
    }

    #[tokio::test]
    async fn test_malformed_body_uses_envelope() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/datasources/query")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["code"], json!("VALIDATION_ERROR"));
    }

    #[tokio::test]
    async fn test_csv_query_over_http() {
        let path = temp_csv("name,qty\napple,3\npear,5\n").await;
        let (status, body) = call(
            &app(),
            "POST",
            "/api/datasources/query",
            Some(json!({
                "type": "csv",
                "filePath": path.to_str().unwrap(),
                "sql": "SELECT name FROM data WHERE CAST(qty AS INTEGER) > 4"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["rows"], json!([{"name": "pear"}]));
        assert_eq!(body["total"], json!(2));
        assert_eq!(body["rowCount"], json!(1));
        tokio::fs::remove_file(path).await.ok();
    }

    #[tokio::test]
    async fn test_csv_round_trip_with_limit() {
        let path = temp_csv("a,b,c\n1,2,3\n4,5,6\n7,8,9\n").await;
        let (status, body) = call(
            &app(),
            "POST",
            "/api/datasources/query",
            Some(json!({"type": "csv", "filePath": path.to_str().unwrap(), "limit": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["columns"], json!(["a", "b", "c"]));
        assert_eq!(
            body["rows"],
            json!([{"a": "1", "b": "2", "c": "3"}, {"a": "4", "b": "5", "c": "6"}])
        );
        assert_eq!(body["rowCount"], json!(2));
        assert_eq!(body["total"], json!(3));
        tokio::fs::remove_file(path).await.ok();
    }

    #[tokio::test]
    async fn test_invalid_json_file_envelope() {
        let path = temp_file("json", "{\"a\": ").await;
        let (status, body) = call(
            &app(),
            "POST",
            "/api/datasources/query",
            Some(json!({"type": "json", "filePath": path.to_str().unwrap()})),
        )
        .await;
        assert!(status.is_client_error());
        assert_eq!(body["success"], json!(false));
        assert!(body["error"].as_str().unwrap().starts_with("Invalid JSON: "));
        tokio::fs::remove_file(path).await.ok();
    }

    #[tokio::test]
    async fn test_saved_connection_lifecycle() {
        let path = temp_csv("a\n1\n").await;
        let app = app();

        let (status, created) = call(
            &app,
            "POST",
            "/api/connections",
            Some(json!({"name": "sheet", "type": "csv", "filePath": path.to_str().unwrap()})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = created["id"].as_str().unwrap().to_string();

        let (_, listed) = call(&app, "GET", "/api/connections", None).await;
        assert_eq!(listed["connections"][0]["id"], json!(id));

        let (status, tested) =
            call(&app, "POST", "/api/datasources/test", Some(json!({"uid": id}))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(tested["latencyMs"].is_u64());

        let (status, _) = call(&app, "DELETE", &format!("/api/connections/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, missing) = call(&app, "GET", &format!("/api/connections/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(missing["success"], json!(false));
        tokio::fs::remove_file(path).await.ok();
    }

    #[tokio::test]
    async fn test_create_rejects_blank_name() {
        let (status, body) = call(
            &app(),
            "POST",
            "/api/connections",
            Some(json!({"name": "", "type": "sqlite"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], json!("VALIDATION_ERROR"));
    }

    #[tokio::test]
    async fn test_openapi_document() {
        let (status, body) = call(&app(), "GET", "/api-docs/openapi.json", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/api/datasources/query"].is_object());
    }
}
