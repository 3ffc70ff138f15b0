use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Process-level probe. Answering at all means the router is serving, so
/// this never reports anything but 200.
pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
