use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod collaborators;
mod config;
mod error;
mod extract;
mod locks;
mod middleware;
mod orchestrator;
mod routes;
mod state;
mod store;
mod tutor;

use collaborators::OllamaClient;
use config::Config;
use store::{MemoryBackend, PgBackend, ProfileStore, StoreBackend};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Study Tutor API",
        version = "0.1.0",
        description = "Adaptive study tutor: topics, mastery tracking, assessments and a conversational turn loop."
    ),
    paths(
        routes::health::health_check,
        routes::chat::chat,
        routes::profile::get_profile,
        routes::profile::get_history,
        routes::profile::clear_history,
        routes::profile::export_profile,
        routes::profile::reset_profile,
        routes::topics::list_topics,
        routes::topics::create_topic,
        routes::topics::update_topic,
        routes::assessment::request_question,
        routes::assessment::submit_answer,
    ),
    components(schemas(
        HealthResponse,
        routes::chat::ChatRequest,
        routes::profile::HistoryResponse,
        routes::profile::ResetResponse,
        routes::topics::CreateTopicRequest,
        routes::topics::UpdateTopicRequest,
        routes::topics::TopicResponse,
        routes::assessment::QuestionRequest,
        routes::assessment::AnswerRequest,
        orchestrator::TurnReply,
        orchestrator::TurnMetadata,
        tutor::QuestionView,
        tutor::AnswerFeedback,
        tutor::RubricScores,
        tutor_core::summary::ProfileSummary,
        tutor_core::summary::TopicListing,
        tutor_core::summary::AreaList,
        tutor_core::summary::AreaEntry,
        tutor_core::profile::Topic,
        tutor_core::profile::Classification,
        tutor_core::profile::ScoreKind,
        tutor_core::profile::AnswerOutcome,
        tutor_core::profile::ResultRecord,
        tutor_core::profile::AssessmentSnapshot,
        tutor_core::challenges::LengthMode,
        tutor_core::grading::Difficulty,
        tutor_core::conversation::ChatMessage,
        tutor_core::conversation::MessageRole,
        tutor_core::error::ApiError,
    )),
    tags(
        (name = "system", description = "Health"),
        (name = "chat", description = "Conversational tutoring turns"),
        (name = "profile", description = "Profile summary, history, export and reset"),
        (name = "topics", description = "Topic registry"),
        (name = "assessment", description = "Direct question and answer flow"),
    )
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    status: String,
    version: String,
    /// "postgres" or "memory"
    storage: String,
}

fn app(app_state: state::AppState, config: &Config) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::chat::router())
        .merge(routes::profile::router())
        .merge(routes::topics::router())
        .merge(routes::assessment::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::cors::build_cors_layer(&config.cors_origins)),
        )
        .with_state(app_state)
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tutor_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env();

    let backend = match &config.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(20)
                .connect(database_url)
                .await
                .expect("Failed to connect to database");

            sqlx::migrate!("../migrations")
                .run(&pool)
                .await
                .expect("Failed to run migrations");

            StoreBackend::Postgres(PgBackend::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, profiles are kept in memory and lost on restart");
            StoreBackend::Memory(MemoryBackend::new())
        }
    };
    let storage = backend.label();

    let collaborators = OllamaClient::new(
        &config.ollama_base_url,
        &config.llm_model,
        config.llm_timeout,
        config.llm_retry,
    )
    .expect("Failed to build LLM client");

    let tutor = tutor::Tutor::new(
        ProfileStore::new(backend, config.save_retry),
        collaborators,
        config.history_window,
    );
    let app_state = state::AppState {
        tutor: Arc::new(tutor),
        storage,
    };

    let router = app(app_state, &config);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(
        %addr,
        storage,
        model = %config.llm_model,
        "Study tutor API listening"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, router)
        .await
        .expect("Server error");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::store::RetryPolicy;

    fn test_app() -> Router {
        let config = Config {
            database_url: None,
            port: 0,
            ollama_base_url: "http://127.0.0.1:9".to_string(),
            llm_model: "llama3".to_string(),
            llm_timeout: Duration::from_millis(200),
            llm_retry: RetryPolicy {
                attempts: 1,
                delay: Duration::ZERO,
            },
            save_retry: RetryPolicy::default(),
            history_window: 20,
            cors_origins: vec!["http://localhost:3000".to_string()],
        };
        let collaborators = OllamaClient::new(
            &config.ollama_base_url,
            &config.llm_model,
            config.llm_timeout,
            config.llm_retry,
        )
        .expect("client");
        let tutor = tutor::Tutor::new(
            ProfileStore::new(StoreBackend::Memory(MemoryBackend::new()), config.save_retry),
            collaborators,
            config.history_window,
        );
        app(
            state::AppState {
                tutor: Arc::new(tutor),
                storage: "memory",
            },
            &config,
        )
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .expect("request should build");

        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_memory_storage() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["storage"], "memory");
    }

    #[tokio::test]
    async fn topic_lifecycle_over_http() {
        let app = test_app();

        let (status, body) = send(
            &app,
            "POST",
            "/v1/users/u1/topics",
            Some(json!({"name": "Photosynthesis"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["created"], true);

        let (status, body) = send(
            &app,
            "POST",
            "/v1/users/u1/topics",
            Some(json!({"name": "photosynthesis"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["created"], false);

        let (status, body) = send(
            &app,
            "PATCH",
            "/v1/users/u1/topics/PHOTOSYNTHESIS",
            Some(json!({"explanation_summary": "Light to sugar."})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["explanation_summary"], "Light to sugar.");

        let (status, body) = send(&app, "GET", "/v1/users/u1/topics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["all"].as_array().map(Vec::len), Some(1));

        let (status, body) = send(&app, "GET", "/v1/users/u1/profile", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["knowledge_level"], "Unassessed");
    }

    #[tokio::test]
    async fn invalid_topic_name_is_a_validation_error() {
        let app = test_app();
        let (status, body) = send(
            &app,
            "POST",
            "/v1/users/u1/topics",
            Some(json!({"name": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_failed");
        assert_eq!(body["field"], "name");
    }

    #[tokio::test]
    async fn malformed_body_names_missing_field() {
        let app = test_app();
        let (status, body) = send(&app, "POST", "/v1/chat", Some(json!({"user_id": "u1"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "message");
    }

    #[tokio::test]
    async fn question_on_unknown_topic_is_unprocessable() {
        let app = test_app();
        let (status, body) = send(
            &app,
            "POST",
            "/v1/users/u1/assessment/question",
            Some(json!({"topic": "Graph Theory", "kind": "mcq"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "missing_context");
        assert_eq!(body["retryable"], false);
    }

    #[tokio::test]
    async fn unpatched_unknown_topic_is_unprocessable() {
        let app = test_app();
        let (status, _) = send(
            &app,
            "PATCH",
            "/v1/users/u1/topics/Nothing%20Here",
            Some(json!({"parent_topic_id": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn export_and_reset_work_on_fresh_users() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/v1/users/u9/export", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "idle");

        let (status, body) = send(&app, "POST", "/v1/users/u9/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Profile reset. How can I help you today?");

        let (status, body) = send(&app, "GET", "/v1/users/u9/history", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"], json!([]));
    }

    #[tokio::test]
    async fn clearing_history_keeps_topics() {
        let app = test_app();
        send(
            &app,
            "POST",
            "/v1/users/u3/topics",
            Some(json!({"name": "Photosynthesis"})),
        )
        .await;

        let (status, body) = send(&app, "POST", "/v1/users/u3/history/clear", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["message"],
            "New session started. Your topics and progress are kept."
        );

        let (_, body) = send(&app, "GET", "/v1/users/u3/topics", None).await;
        assert_eq!(body["all"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn chat_degrades_when_llm_is_down() {
        let app = test_app();
        let (status, body) = send(
            &app,
            "POST",
            "/v1/chat",
            Some(json!({"user_id": "u1", "message": "hello there"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metadata"]["intent"], "general_chat");
        assert_eq!(
            body["response"],
            "I'm not sure how to help with that yet, but I'm here to study with you!"
        );
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/api-doc/openapi.json", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/v1/chat"].is_object());
    }
}
