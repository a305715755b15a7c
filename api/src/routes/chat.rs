use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tutor_core::error::ApiError;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::extract::AppJson;
use crate::orchestrator::TurnReply;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/chat", post(chat))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
}

/// Run one tutoring turn
///
/// Classifies the message, routes it (add topic, explain, assess, answer,
/// chat), persists the profile and appends the exchange to the history.
/// On a profile that fails validation the reply lists the recovery options;
/// send `repair`, `new` or `export` as the message to choose one.
#[utoipa::path(
    post,
    path = "/v1/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Tutor reply", body = TurnReply),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 503, description = "Storage unavailable after retries", body = ApiError)
    ),
    tag = "chat"
)]
pub async fn chat(
    State(state): State<AppState>,
    AppJson(req): AppJson<ChatRequest>,
) -> Result<Json<TurnReply>, AppError> {
    let reply = state.tutor.handle_turn(&req.user_id, &req.message).await?;
    Ok(Json(reply))
}
