//! Document persistence: one profile document and one conversation log per user.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tutor_core::conversation::ConversationLog;
use tutor_core::error::TutorError;
use tutor_core::profile::UserProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Profile,
    Conversation,
}

impl DocumentKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Conversation => "conversation",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Unavailable(String),
}

/// Physical storage of raw JSON documents. Writes replace the whole document.
pub trait DocumentBackend: Send + Sync + 'static {
    fn read(
        &self,
        kind: DocumentKind,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<Value>, BackendError>> + Send;

    fn write(
        &self,
        kind: DocumentKind,
        user_id: &str,
        document: &Value,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn ping(&self) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// Postgres storage: a JSONB column keyed by (user_id, kind).
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DocumentBackend for PgBackend {
    async fn read(&self, kind: DocumentKind, user_id: &str) -> Result<Option<Value>, BackendError> {
        let document: Option<Value> = sqlx::query_scalar(
            "SELECT document FROM tutor_documents WHERE user_id = $1 AND kind = $2",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(document)
    }

    async fn write(
        &self,
        kind: DocumentKind,
        user_id: &str,
        document: &Value,
    ) -> Result<(), BackendError> {
        sqlx::query(
            "INSERT INTO tutor_documents (user_id, kind, document, updated_at) \
             VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (user_id, kind) \
             DO UPDATE SET document = EXCLUDED.document, updated_at = NOW()",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(document)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-process storage for dev mode and tests.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    documents: Arc<RwLock<HashMap<(DocumentKind, String), Value>>>,
    #[cfg(test)]
    failing_writes: Arc<AtomicU32>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail.
    #[cfg(test)]
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn take_injected_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[cfg(not(test))]
    fn take_injected_failure(&self) -> bool {
        false
    }
}

impl DocumentBackend for MemoryBackend {
    async fn read(&self, kind: DocumentKind, user_id: &str) -> Result<Option<Value>, BackendError> {
        let documents = self.documents.read().await;
        Ok(documents.get(&(kind, user_id.to_string())).cloned())
    }

    async fn write(
        &self,
        kind: DocumentKind,
        user_id: &str,
        document: &Value,
    ) -> Result<(), BackendError> {
        if self.take_injected_failure() {
            return Err(BackendError::Unavailable("injected write failure".to_string()));
        }
        let mut documents = self.documents.write().await;
        documents.insert((kind, user_id.to_string()), document.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// The backend chosen at startup.
#[derive(Clone)]
pub enum StoreBackend {
    Postgres(PgBackend),
    Memory(MemoryBackend),
}

impl StoreBackend {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Memory(_) => "memory",
        }
    }
}

impl DocumentBackend for StoreBackend {
    async fn read(&self, kind: DocumentKind, user_id: &str) -> Result<Option<Value>, BackendError> {
        match self {
            Self::Postgres(backend) => backend.read(kind, user_id).await,
            Self::Memory(backend) => backend.read(kind, user_id).await,
        }
    }

    async fn write(
        &self,
        kind: DocumentKind,
        user_id: &str,
        document: &Value,
    ) -> Result<(), BackendError> {
        match self {
            Self::Postgres(backend) => backend.write(kind, user_id, document).await,
            Self::Memory(backend) => backend.write(kind, user_id, document).await,
        }
    }

    async fn ping(&self) -> Result<(), BackendError> {
        match self {
            Self::Postgres(backend) => backend.ping().await,
            Self::Memory(backend) => backend.ping().await,
        }
    }
}

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Wait after failed attempt number `attempt`: `delay`, then doubling.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        self.delay.saturating_mul(1 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(100),
        }
    }
}

/// Typed load/save over a [`DocumentBackend`].
pub struct ProfileStore<B> {
    backend: B,
    retry: RetryPolicy,
}

impl<B: DocumentBackend> ProfileStore<B> {
    pub fn new(backend: B, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// The stored profile, or a fresh one if the user has none yet.
    /// A stored document that cannot be decoded is reported as corruption.
    pub async fn load(&self, user_id: &str) -> Result<UserProfile, TutorError> {
        match self.load_raw(user_id).await? {
            Some(document) => UserProfile::from_document(document),
            None => Ok(UserProfile::default()),
        }
    }

    /// The stored profile document exactly as persisted.
    pub async fn load_raw(&self, user_id: &str) -> Result<Option<Value>, TutorError> {
        self.backend
            .read(DocumentKind::Profile, user_id)
            .await
            .map_err(|err| read_failure("load_profile", err))
    }

    /// Recompute overall mastery, stamp the creation time if unset, then
    /// overwrite the stored document.
    pub async fn save(&self, user_id: &str, profile: &mut UserProfile) -> Result<(), TutorError> {
        profile.prepare_for_save(Utc::now());
        let document = profile.to_document()?;
        self.write_with_retry("save_profile", DocumentKind::Profile, user_id, &document)
            .await
    }

    pub async fn load_history(&self, user_id: &str) -> Result<ConversationLog, TutorError> {
        let document = self
            .backend
            .read(DocumentKind::Conversation, user_id)
            .await
            .map_err(|err| read_failure("load_history", err))?;
        match document {
            Some(document) => ConversationLog::from_document(document),
            None => Ok(ConversationLog::default()),
        }
    }

    pub async fn save_history(
        &self,
        user_id: &str,
        log: &ConversationLog,
    ) -> Result<(), TutorError> {
        let document = log.to_document()?;
        self.write_with_retry("save_history", DocumentKind::Conversation, user_id, &document)
            .await
    }

    pub async fn ping(&self) -> bool {
        self.backend.ping().await.is_ok()
    }

    async fn write_with_retry(
        &self,
        operation: &str,
        kind: DocumentKind,
        user_id: &str,
        document: &Value,
    ) -> Result<(), TutorError> {
        let attempts = self.retry.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.backend.write(kind, user_id, document).await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!(user_id, operation, attempt, "document write recovered");
                    }
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(
                        user_id,
                        operation,
                        attempt,
                        max_attempts = attempts,
                        error = %err,
                        "document write failed"
                    );
                    last_error = err.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
            }
        }

        tracing::error!(user_id, operation, attempts, "document write retries exhausted");
        Err(TutorError::StorageFailure {
            operation: operation.to_string(),
            attempts,
            message: last_error,
        })
    }
}

fn read_failure(operation: &str, err: BackendError) -> TutorError {
    tracing::error!(operation, error = %err, "document read failed");
    TutorError::StorageFailure {
        operation: operation.to_string(),
        attempts: 1,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sqlx::postgres::PgPoolOptions;
    use tutor_core::topics::add_topic;

    use super::*;

    fn store(backend: MemoryBackend) -> ProfileStore<MemoryBackend> {
        ProfileStore::new(
            backend,
            RetryPolicy {
                attempts: 3,
                delay: Duration::ZERO,
            },
        )
    }

    #[test]
    fn backoff_doubles_from_the_base_delay() {
        let policy = RetryPolicy {
            attempts: 4,
            delay: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn missing_profile_loads_as_default() {
        let store = store(MemoryBackend::new());
        let profile = store.load("nobody").await.expect("load");
        assert_eq!(profile, UserProfile::default());
        assert!(store.load_raw("nobody").await.expect("raw").is_none());
    }

    #[tokio::test]
    async fn save_recomputes_overall_mastery_and_stamps_creation() {
        let store = store(MemoryBackend::new());
        let mut profile = UserProfile::default();
        add_topic(&mut profile, "Recursion", None, None).expect("add");
        {
            let topic = profile.topics.get_mut("Recursion").expect("topic");
            topic.questions_attempted = 2;
            topic.correct_answers = 1;
            topic.mastery_score = 0.5;
        }
        store.save("u1", &mut profile).await.expect("save");

        let loaded = store.load("u1").await.expect("load");
        assert_eq!(loaded.mastery, 0.5);
        assert!(loaded.created_at.is_some());
        assert_eq!(loaded.topics["Recursion"].questions_attempted, 2);
    }

    #[tokio::test]
    async fn transient_write_failures_are_retried() {
        let backend = MemoryBackend::new();
        backend.fail_next_writes(2);
        let store = store(backend);

        let mut profile = UserProfile::default();
        store.save("u1", &mut profile).await.expect("third attempt succeeds");
        assert!(store.load_raw("u1").await.expect("raw").is_some());
    }

    #[tokio::test]
    async fn exhausted_retries_surface_storage_failure() {
        let backend = MemoryBackend::new();
        backend.fail_next_writes(3);
        let store = store(backend);

        let mut profile = UserProfile::default();
        let err = store.save("u1", &mut profile).await.expect_err("all attempts fail");
        match err {
            TutorError::StorageFailure {
                operation,
                attempts,
                ..
            } => {
                assert_eq!(operation, "save_profile");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(store.load_raw("u1").await.expect("raw").is_none());
    }

    #[tokio::test]
    async fn undecodable_document_is_corruption_but_still_exportable() {
        let backend = MemoryBackend::new();
        let raw = json!({ "schema_version": 1, "topics": "broken" });
        backend
            .write(DocumentKind::Profile, "u1", &raw)
            .await
            .expect("plant document");
        let store = store(backend);

        assert!(matches!(
            store.load("u1").await,
            Err(TutorError::StateCorruption { .. })
        ));
        assert_eq!(store.load_raw("u1").await.expect("raw"), Some(raw));
    }

    #[tokio::test]
    async fn history_is_stored_separately() {
        let store = store(MemoryBackend::new());
        let mut log = ConversationLog::default();
        log.push_exchange("hi", "hello", Utc::now());
        store.save_history("u1", &log).await.expect("save history");

        assert_eq!(store.load_history("u1").await.expect("history"), log);
        assert!(store.load_raw("u1").await.expect("raw").is_none());
    }

    async fn db_pool_if_available() -> Option<PgPool> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return None;
        };

        PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .ok()
    }

    #[tokio::test]
    async fn postgres_backend_upserts_documents() {
        let Some(pool) = db_pool_if_available().await else {
            return;
        };

        sqlx::migrate!("../migrations")
            .run(&pool)
            .await
            .expect("migrations should run");

        let store = ProfileStore::new(PgBackend::new(pool), RetryPolicy::default());
        let user_id = format!("store-test-{}", uuid::Uuid::now_v7());

        let mut profile = UserProfile::default();
        add_topic(&mut profile, "Sorting", None, None).expect("add");
        store.save(&user_id, &mut profile).await.expect("first save");
        add_topic(&mut profile, "Graphs", None, None).expect("add");
        store.save(&user_id, &mut profile).await.expect("second save");

        let loaded = store.load(&user_id).await.expect("load");
        assert_eq!(loaded.topics.len(), 2);
    }
}
