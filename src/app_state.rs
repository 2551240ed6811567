use std::sync::{Arc, Mutex, MutexGuard};

use neo4rs::Graph;
use tokio::sync::oneshot;

use crate::{config::AppConfig, service::LegalQueryService};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub service: Arc<LegalQueryService>,
    /// `None` si Neo4j no estaba disponible al arrancar (modo degradado).
    pub graph: Option<Arc<Graph>>,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    pub fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Estado de los trabajos en segundo plano (ingesta de la base de conocimiento).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
}
