use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tutor_core::conversation::ChatMessage;
use tutor_core::error::ApiError;
use tutor_core::summary::ProfileSummary;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/users/{user_id}/profile", get(get_profile))
        .route("/v1/users/{user_id}/history", get(get_history))
        .route("/v1/users/{user_id}/history/clear", post(clear_history))
        .route("/v1/users/{user_id}/export", get(export_profile))
        .route("/v1/users/{user_id}/reset", post(reset_profile))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryResponse {
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResetResponse {
    pub message: String,
}

/// Profile summary: knowledge level, overall mastery, weak and strong areas
#[utoipa::path(
    get,
    path = "/v1/users/{user_id}/profile",
    params(("user_id" = String, Path, description = "Learner id")),
    responses(
        (status = 200, description = "Profile summary", body = ProfileSummary),
        (status = 409, description = "Profile failed validation", body = ApiError)
    ),
    tag = "profile"
)]
pub async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ProfileSummary>, AppError> {
    Ok(Json(state.tutor.summary(&user_id).await?))
}

/// Full conversation history, oldest first
#[utoipa::path(
    get,
    path = "/v1/users/{user_id}/history",
    params(("user_id" = String, Path, description = "Learner id")),
    responses(
        (status = 200, description = "Conversation history", body = HistoryResponse),
        (status = 409, description = "History could not be decoded", body = ApiError)
    ),
    tag = "profile"
)]
pub async fn get_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let messages = state.tutor.history(&user_id).await?;
    Ok(Json(HistoryResponse { messages }))
}

/// Start a new session: clear the conversation, keep topics and mastery
///
/// Also the way out of a history whose timestamps went out of order.
#[utoipa::path(
    post,
    path = "/v1/users/{user_id}/history/clear",
    params(("user_id" = String, Path, description = "Learner id")),
    responses(
        (status = 200, description = "Conversation cleared", body = ResetResponse),
        (status = 503, description = "Storage unavailable after retries", body = ApiError)
    ),
    tag = "profile"
)]
pub async fn clear_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ResetResponse>, AppError> {
    let message = state.tutor.clear_history(&user_id).await?;
    Ok(Json(ResetResponse { message }))
}

/// The stored profile document exactly as persisted
///
/// Read-only. Works on documents that fail validation, for support.
#[utoipa::path(
    get,
    path = "/v1/users/{user_id}/export",
    params(("user_id" = String, Path, description = "Learner id")),
    responses(
        (status = 200, description = "Raw profile document", body = serde_json::Value)
    ),
    tag = "profile"
)]
pub async fn export_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    Ok(Json(state.tutor.export(&user_id).await?))
}

/// Replace the profile with a fresh one and clear the conversation
#[utoipa::path(
    post,
    path = "/v1/users/{user_id}/reset",
    params(("user_id" = String, Path, description = "Learner id")),
    responses(
        (status = 200, description = "Profile reset", body = ResetResponse),
        (status = 503, description = "Storage unavailable after retries", body = ApiError)
    ),
    tag = "profile"
)]
pub async fn reset_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ResetResponse>, AppError> {
    let result = state.tutor.reset(&user_id).await?;
    Ok(Json(ResetResponse {
        message: result.reply,
    }))
}
