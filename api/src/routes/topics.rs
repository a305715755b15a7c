use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tutor_core::error::ApiError;
use tutor_core::profile::Topic;
use tutor_core::summary::TopicListing;
use tutor_core::topics::TopicUpdate;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/users/{user_id}/topics",
            get(list_topics).post(create_topic),
        )
        .route("/v1/users/{user_id}/topics/{name}", patch(update_topic))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateTopicRequest {
    pub name: String,
    #[serde(default)]
    pub parent_topic_id: Option<String>,
    #[serde(default)]
    pub explanation_summary: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateTopicRequest {
    #[serde(default)]
    pub parent_topic_id: Option<String>,
    #[serde(default)]
    pub explanation_summary: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TopicResponse {
    pub topic: Topic,
    /// False when a topic with the same name (ignoring case) already existed.
    pub created: bool,
}

/// All topics, plus the weak and strong subsets
#[utoipa::path(
    get,
    path = "/v1/users/{user_id}/topics",
    params(("user_id" = String, Path, description = "Learner id")),
    responses(
        (status = 200, description = "Topic listing", body = TopicListing),
        (status = 409, description = "Profile failed validation", body = ApiError)
    ),
    tag = "topics"
)]
pub async fn list_topics(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<TopicListing>, AppError> {
    Ok(Json(state.tutor.topics(&user_id).await?))
}

/// Add a topic. Idempotent on the name, ignoring case.
#[utoipa::path(
    post,
    path = "/v1/users/{user_id}/topics",
    params(("user_id" = String, Path, description = "Learner id")),
    request_body = CreateTopicRequest,
    responses(
        (status = 201, description = "Topic created", body = TopicResponse),
        (status = 200, description = "Topic already existed", body = TopicResponse),
        (status = 400, description = "Invalid topic name", body = ApiError)
    ),
    tag = "topics"
)]
pub async fn create_topic(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    AppJson(req): AppJson<CreateTopicRequest>,
) -> Result<(StatusCode, Json<TopicResponse>), AppError> {
    let inserted = state
        .tutor
        .add_topic(
            &user_id,
            &req.name,
            req.parent_topic_id,
            req.explanation_summary,
        )
        .await?;
    let status = if inserted.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(TopicResponse {
            topic: inserted.topic,
            created: inserted.created,
        }),
    ))
}

/// Merge parent and summary into an existing topic
///
/// An empty `parent_topic_id` clears the parent. Counters cannot be set here.
#[utoipa::path(
    patch,
    path = "/v1/users/{user_id}/topics/{name}",
    params(
        ("user_id" = String, Path, description = "Learner id"),
        ("name" = String, Path, description = "Topic name, matched ignoring case")
    ),
    request_body = UpdateTopicRequest,
    responses(
        (status = 200, description = "Updated topic", body = Topic),
        (status = 422, description = "Unknown topic", body = ApiError)
    ),
    tag = "topics"
)]
pub async fn update_topic(
    State(state): State<AppState>,
    Path((user_id, name)): Path<(String, String)>,
    AppJson(req): AppJson<UpdateTopicRequest>,
) -> Result<Json<Topic>, AppError> {
    let update = TopicUpdate {
        parent_topic_id: req
            .parent_topic_id
            .map(|parent| Some(parent).filter(|p| !p.trim().is_empty())),
        explanation_summary: req.explanation_summary,
    };
    Ok(Json(state.tutor.update_topic(&user_id, &name, update).await?))
}
