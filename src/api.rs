use std::path::PathBuf;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::spawn;
use tracing::{error, info};

use crate::{
    app_state::AppState,
    ingest,
    models::{QueryResult, SessionSummary},
    neo4j_client,
    service::QueryRequest,
};

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

// --- Payloads ---

#[derive(Deserialize)]
pub struct IngestPayload {
    path: Option<String>,
}

#[derive(Deserialize)]
pub struct IndexDocumentPayload {
    user_id: String,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/query", post(query_handler))
        .route("/api/sessions/:id", delete(clear_session_handler))
        .route("/api/sessions/:id/summary", get(session_summary_handler))
        .route("/api/ingest", post(ingest_handler))
        .route("/api/documents/:id/index", post(index_document_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn query_handler(
    State(state): State<AppState>,
    Json(payload): Json<QueryRequest>,
) -> Json<QueryResult> {
    Json(state.service.process_query(payload).await)
}

#[axum::debug_handler]
async fn clear_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.service.clear_session(&session_id) {
        Ok((StatusCode::OK, Json(json!({ "message": "Sesión limpiada.", "session_id": session_id }))))
    } else {
        Err(api_error(StatusCode::NOT_FOUND, format!("Sesión no encontrada: {session_id}")))
    }
}

#[axum::debug_handler]
async fn session_summary_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<SessionSummary> {
    Json(state.service.session_summary(&session_id))
}

/// Lanza en segundo plano la ingesta de la base de conocimiento del sistema.
#[axum::debug_handler]
async fn ingest_handler(
    State(state): State<AppState>,
    Json(payload): Json<IngestPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let index = state.service.index().ok_or_else(|| {
        api_error(StatusCode::SERVICE_UNAVAILABLE, "Índice vectorial no disponible.")
    })?;

    let root_dir = PathBuf::from(
        payload
            .path
            .unwrap_or_else(|| state.config.knowledge_base_dir.clone()),
    );
    if !root_dir.is_dir() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "La ruta proporcionada no es un directorio válido.",
        ));
    }

    {
        let mut status = state.status();
        if status.is_busy {
            return Err(api_error(StatusCode::CONFLICT, "Ya hay una indexación en curso."));
        }
        status.is_busy = true;
        status.message = "Iniciando indexación...".to_string();
        status.progress = 0.0;
    }

    spawn(async move {
        let result = ingest::ingest_directory(index.as_ref(), &root_dir, state.status.clone()).await;

        let mut status = state.status();
        status.is_busy = false;
        status.progress = 0.0;
        match result {
            Ok(summary) => {
                status.message = format!("¡Indexación completada! {summary}");
                info!("{summary}");
            }
            Err(err) => {
                status.message = format!("Error en la indexación: {err}");
                error!("Error de ingesta: {err}");
            }
        }
    });

    Ok(StatusCode::ACCEPTED)
}

#[axum::debug_handler]
async fn index_document_handler(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Json(payload): Json<IndexDocumentPayload>,
) -> Result<impl IntoResponse, ApiError> {
    match state
        .service
        .index_user_document(&payload.user_id, &document_id)
        .await
    {
        Ok(chunks) => Ok(Json(json!({ "document_id": document_id, "chunks": chunks }))),
        Err(e) => {
            error!("Error indexando documento {document_id}: {e}");
            Err(api_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("No se pudo indexar el documento: {e}"),
            ))
        }
    }
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let neo4j = match &state.graph {
        Some(graph) => neo4j_client::ping(graph).await,
        None => false,
    };
    let background = state.status().clone();

    Json(json!({
        "server": background,
        "neo4j": if neo4j { "ok" } else { "unavailable" },
        "service": state.service.status(),
    }))
}

// --- Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    let sender = state
        .shutdown_sender
        .lock()
        .ok()
        .and_then(|mut guard| guard.take());
    if let Some(sender) = sender {
        let _ = sender.send(());
    }
    StatusCode::OK
}
