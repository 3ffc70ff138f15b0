use axum::{extract::State, response::IntoResponse, Extension, Json};
use chrono::{DateTime, Utc};
use common::storage::types::{
    token_usage::{TokenUsage, UsageReport},
    usage_meter::{UsageMeter, UsageTier},
    user::User,
};
use serde::Deserialize;
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ReportUsageRequest {
    pub tier: UsageTier,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub model: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Which tiers the caller can still draw from in the current window. Users
/// without a meter get their free window created here on first read.
pub async fn get_available_tiers(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, ApiError> {
    let meter = UsageMeter::ensure_active(&state.db, &user.id, Utc::now()).await?;
    Ok(Json(json!({ "tiers": meter.available_tiers() })))
}

pub async fn report_usage(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Json(input): Json<ReportUsageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if input.input_tokens < 0 || input.output_tokens < 0 {
        return Err(ApiError::ValidationError(
            "Token counts cannot be negative".to_string(),
        ));
    }

    let occurred_at = input.occurred_at.unwrap_or_else(Utc::now);
    // Make sure the current window exists; reports outside any window are
    // persisted but never counted.
    UsageMeter::ensure_active(&state.db, &user.id, Utc::now()).await?;

    let report = UsageReport {
        user_id: user.id.clone(),
        tier: input.tier,
        input_tokens: input.input_tokens,
        output_tokens: input.output_tokens,
        model: input.model,
        occurred_at,
    };
    TokenUsage::report(&state.db, &report).await?;

    Ok(Json(json!({ "status": "recorded" })))
}
