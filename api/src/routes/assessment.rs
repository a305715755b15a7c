use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tutor_core::challenges::LengthMode;
use tutor_core::error::ApiError;
use tutor_core::profile::ScoreKind;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;
use crate::tutor::{AnswerFeedback, QuestionView};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/users/{user_id}/assessment/question",
            post(request_question),
        )
        .route("/v1/users/{user_id}/assessment/answer", post(submit_answer))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct QuestionRequest {
    pub topic: String,
    pub kind: ScoreKind,
    /// Expected answer length for open questions. Defaults to medium.
    #[serde(default)]
    pub length: Option<LengthMode>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct AnswerRequest {
    pub topic: String,
    pub kind: ScoreKind,
    pub answer: String,
}

/// Open a multiple-choice or open question on an explained topic
///
/// Replaces a pending question of the same kind on the same topic.
#[utoipa::path(
    post,
    path = "/v1/users/{user_id}/assessment/question",
    params(("user_id" = String, Path, description = "Learner id")),
    request_body = QuestionRequest,
    responses(
        (status = 200, description = "Question to answer", body = QuestionView),
        (status = 422, description = "Topic has not been explained", body = ApiError),
        (status = 502, description = "Question generation failed", body = ApiError)
    ),
    tag = "assessment"
)]
pub async fn request_question(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    AppJson(req): AppJson<QuestionRequest>,
) -> Result<Json<QuestionView>, AppError> {
    let view = state
        .tutor
        .request_question(&user_id, &req.topic, req.kind, req.length)
        .await?;
    Ok(Json(view))
}

/// Grade an answer to the pending question
///
/// When the grader is unavailable for an open question the response has
/// `scored: false, retryable: true` and the question stays open.
#[utoipa::path(
    post,
    path = "/v1/users/{user_id}/assessment/answer",
    params(("user_id" = String, Path, description = "Learner id")),
    request_body = AnswerRequest,
    responses(
        (status = 200, description = "Grading result", body = AnswerFeedback),
        (status = 422, description = "No pending question", body = ApiError)
    ),
    tag = "assessment"
)]
pub async fn submit_answer(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    AppJson(req): AppJson<AnswerRequest>,
) -> Result<Json<AnswerFeedback>, AppError> {
    let feedback = state
        .tutor
        .submit_answer(&user_id, &req.topic, req.kind, &req.answer)
        .await?;
    Ok(Json(feedback))
}
