use axum::{
    extract::{Path, State},
    Json,
};

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;

/// List all mappings in the catalog
pub async fn list_mappings(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mappings = state.service.list_mappings().await?;

    Ok(Json(serde_json::json!({
        "mappings": mappings
    })))
}

pub async fn get_mapping(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mapping = state.service.get_mapping(&name).await?;
    Ok(Json(serde_json::json!({ "mapping": mapping })))
}
