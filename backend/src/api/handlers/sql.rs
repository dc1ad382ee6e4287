use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::time::Duration;

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{QueryId, SqlRequest};
use crate::services::{RowPage, SqlResponse};

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
pub struct FetchParams {
    pub max: Option<usize>,
    /// Milliseconds to wait for the first row
    pub wait: Option<u64>,
}

/// Execute one SQL statement
pub async fn execute_sql(
    State(state): State<AppState>,
    Json(payload): Json<SqlRequest>,
) -> Result<Json<SqlResponse>, AppError> {
    let sql = payload.sql.trim();
    if sql.is_empty() {
        return Err(AppError::Validation("SQL statement cannot be empty".to_string()));
    }
    tracing::info!("Executing SQL: {}", sql);

    let response = state.service.execute(sql).await?;
    Ok(Json(response))
}

/// Fetch the next page of an open row result
pub async fn fetch_rows(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<FetchParams>,
) -> Result<Json<RowPage>, AppError> {
    let query_id: QueryId = id.parse()?;
    let max = params.max.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
    let wait = params
        .wait
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(state.config.engine.fetch_wait_millis));

    let page = state.service.fetch(query_id, max, wait).await?;
    Ok(Json(page))
}

pub async fn close_query(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let query_id: QueryId = id.parse()?;
    state.service.close(query_id)?;
    Ok(StatusCode::NO_CONTENT)
}
