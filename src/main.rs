// Módulos de la aplicación
mod api;
mod app_state;
mod cache;
mod classifier;
mod config;
mod documents;
mod ingest;
mod llm;
mod memory;
mod models;
mod neo4j_client;
mod pipeline;
mod prompts;
mod retrieval;
mod service;
mod stages;
mod vector_store;

#[cfg(test)]
mod testing;

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use neo4rs::Graph;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::{AppState, Status};
use crate::cache::ResponseCache;
use crate::documents::LocalDocumentStore;
use crate::memory::ConversationMemory;
use crate::service::LegalQueryService;
use crate::vector_store::{Neo4jVectorIndex, VectorIndex};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Gestor de LLMs (chat + embeddings)
    let llm_manager = llm::LlmManager::from_config(&cfg).context("Error inicializando LLM Manager")?;

    // 4. Neo4j: si no está disponible se arranca sin índice (recuperación degradada)
    let graph = match connect_index(&cfg).await {
        Ok(graph) => Some(Arc::new(graph)),
        Err(e) => {
            warn!("⚠️ Neo4j no disponible ({e:#}). Se continúa sin índice vectorial.");
            None
        }
    };
    let index: Option<Arc<dyn VectorIndex>> = graph.as_ref().map(|graph| {
        Arc::new(Neo4jVectorIndex::new(graph.clone(), llm_manager.clone())) as Arc<dyn VectorIndex>
    });

    // 5. Servicios en memoria y orquestador
    let memory = Arc::new(ConversationMemory::new(cfg.memory_max_history));
    let cache = Arc::new(ResponseCache::new(cfg.cache_max_size, cfg.cache_ttl_hours));
    let documents = Arc::new(LocalDocumentStore::new(&cfg.documents_dir));
    let service = LegalQueryService::new(index, Arc::new(llm_manager), documents, memory, cache);

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 6. Estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        service: Arc::new(service),
        graph,
        status: Arc::new(Mutex::new(Status {
            is_busy: false,
            message: "Servidor listo.".to_string(),
            progress: 0.0,
        })),
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 7. Router de la API
    let app = api::create_router(app_state).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // 8. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}

async fn connect_index(cfg: &config::AppConfig) -> Result<Graph> {
    let graph = neo4j_client::connect_from_config(cfg).await?;
    neo4j_client::ensure_schema(&graph)
        .await
        .context("Error asegurando el esquema de Neo4j")?;
    vector_store::ensure_chunk_vector_index(&graph)
        .await
        .context("Error asegurando el índice vectorial")?;
    Ok(graph)
}
