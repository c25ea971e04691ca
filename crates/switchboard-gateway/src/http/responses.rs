//! OpenAI Responses /v1/responses endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde_json::Value;

use crate::app::AppState;

pub async fn responses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    super::run_pipeline(state, "/v1/responses", headers, payload).await
}
