use std::sync::Arc;

use crate::collaborators::OllamaClient;
use crate::store::StoreBackend;
use crate::tutor::Tutor;

pub type AppTutor = Tutor<StoreBackend, OllamaClient>;

#[derive(Clone)]
pub struct AppState {
    pub tutor: Arc<AppTutor>,
    /// "postgres" or "memory", reported by the health check.
    pub storage: &'static str,
}
