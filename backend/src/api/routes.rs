use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{mapping, sql, AppState};
use crate::config::Config;
use crate::services::SqlService;

/// Create router with application state
pub fn create_router_with_state(service: Arc<SqlService>, config: Config) -> Router {
    let state = AppState { service, config };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/sql", post(sql::execute_sql))
        .route("/api/queries/{id}", delete(sql::close_query))
        .route("/api/queries/{id}/rows", get(sql::fetch_rows))
        .route("/api/mappings", get(mapping::list_mappings))
        .route("/api/mappings/{name}", get(mapping::get_mapping))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineContext, LocalJobEngine};
    use crate::services::MappingCatalog;
    use crate::storage::SqliteStorage;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn router() -> Router {
        let storage = SqliteStorage::new(":memory:").await.unwrap();
        let catalog = Arc::new(MappingCatalog::new(Arc::new(storage)));
        let engine = Arc::new(LocalJobEngine::new(EngineContext::new(
            Uuid::new_v4(),
            Duration::from_millis(5),
        )));
        let config = Config::from_env().unwrap();
        let service = Arc::new(SqlService::new(catalog, engine, 16));
        create_router_with_state(service, config)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_sql(sql: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/sql")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::json!({ "sql": sql }).to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router()
            .await
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_select_and_fetch_rows() {
        let app = router().await;

        let response = app.clone().oneshot(post_sql("SELECT 'a' AS letter")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["type"], "rows");
        let query_id = body["queryId"].as_str().unwrap().to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/queries/{}/rows?max=10&wait=5000", query_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = body_json(response).await;
        assert_eq!(page["rows"], serde_json::json!([{ "letter": "a" }]));
    }

    #[tokio::test]
    async fn test_unsupported_statement_is_bad_request() {
        let response = router()
            .await
            .oneshot(post_sql("SELECT * FROM t ORDER BY a LIMIT 1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"]["message"].as_str().unwrap().contains("is not supported"));
    }

    #[tokio::test]
    async fn test_unknown_mapping_is_not_found() {
        let response = router()
            .await
            .oneshot(Request::builder().uri("/api/mappings/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
