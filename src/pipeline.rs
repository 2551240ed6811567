//! Pipeline multi-etapa de razonamiento legal.
//!
//! Coordinate → Route → Specialist(área) | DocumentAnalysis → Evaluate → Done.
//! El enrutado es una función pura del estado; los cuerpos de cada etapa
//! viven en `stages.rs` y nunca propagan errores: degradan la respuesta.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::llm::CompletionService;
use crate::memory::ConversationMemory;
use crate::models::{Complexity, LegalArea, Source, StageResponse};

pub const DOCUMENT_ANALYSIS_KEY: &str = "document_analysis";

/// Respuesta final del pipeline. Se escribe una sola vez.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalAnswer {
    pub answer: String,
    pub confidence: f64,
    pub suggestions: Vec<String>,
}

/// Estado de trabajo de una consulta. Lo posee en exclusiva la petición en curso.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub question: String,
    pub context: String,
    pub sources: Vec<Source>,
    pub legal_area: LegalArea,
    pub complexity: Complexity,
    pub metadata: Map<String, Value>,
    pub has_specific_documents: bool,
    pub session_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    responses: BTreeMap<String, StageResponse>,
    final_answer: Option<FinalAnswer>,
}

impl PipelineState {
    /// `scoped` indica que la consulta se acotó a documentos del usuario.
    pub fn new(
        question: &str,
        context: String,
        sources: Vec<Source>,
        scoped: bool,
        session_id: &str,
        user_id: &str,
    ) -> Self {
        let has_specific_documents =
            scoped || sources.iter().any(|s| s.metadata.source.is_user_scoped());
        Self {
            question: question.to_string(),
            context,
            sources,
            legal_area: LegalArea::General,
            complexity: Complexity::Medium,
            metadata: Map::new(),
            has_specific_documents,
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
            responses: BTreeMap::new(),
            final_answer: None,
        }
    }

    /// Registra la respuesta de una etapa. Una respuesta ya escrita no se sustituye.
    pub fn record_response(&mut self, stage: &str, response: StageResponse) -> bool {
        if self.responses.contains_key(stage) {
            warn!("⚠️ La etapa '{stage}' ya tenía respuesta; se conserva la original");
            return false;
        }
        self.responses.insert(stage.to_string(), response);
        true
    }

    pub fn response(&self, stage: &str) -> Option<&StageResponse> {
        self.responses.get(stage)
    }

    pub fn responses(&self) -> &BTreeMap<String, StageResponse> {
        &self.responses
    }

    /// Fija la respuesta final. Sólo la primera llamada tiene efecto.
    pub fn finalize(&mut self, answer: String, confidence: f64, suggestions: Vec<String>) -> bool {
        if self.final_answer.is_some() {
            warn!("⚠️ Respuesta final ya fijada; se ignora el nuevo valor");
            return false;
        }
        self.final_answer = Some(FinalAnswer {
            answer,
            confidence: confidence.clamp(0.0, 1.0),
            suggestions,
        });
        true
    }

    pub fn final_answer(&self) -> Option<&FinalAnswer> {
        self.final_answer.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Coordinate,
    Route,
    Specialist(LegalArea),
    DocumentAnalysis,
    Evaluate,
    Done,
}

/// Área del especialista que atiende un área legal (`general` => civil).
pub fn specialist_for(area: LegalArea) -> LegalArea {
    match area {
        LegalArea::General => LegalArea::Civil,
        other => other,
    }
}

/// Los documentos del usuario tienen prioridad sobre la clasificación temática.
pub fn route(state: &PipelineState) -> Stage {
    if state.has_specific_documents {
        Stage::DocumentAnalysis
    } else {
        Stage::Specialist(specialist_for(state.legal_area))
    }
}

pub fn transition(stage: Stage, state: &PipelineState) -> Stage {
    match stage {
        Stage::Coordinate => Stage::Route,
        Stage::Route => route(state),
        Stage::Specialist(_) | Stage::DocumentAnalysis => Stage::Evaluate,
        Stage::Evaluate | Stage::Done => Stage::Done,
    }
}

pub struct LegalPipeline {
    pub(crate) completion: Arc<dyn CompletionService>,
    pub(crate) memory: Arc<ConversationMemory>,
}

impl LegalPipeline {
    pub fn new(completion: Arc<dyn CompletionService>, memory: Arc<ConversationMemory>) -> Self {
        Self { completion, memory }
    }

    /// Ejecuta todas las etapas en secuencia. Siempre termina con respuesta final.
    pub async fn run(&self, mut state: PipelineState) -> PipelineState {
        let mut stage = Stage::Coordinate;
        loop {
            debug!("Etapa del pipeline: {:?}", stage);
            match stage {
                Stage::Coordinate => self.coordinate(&mut state).await,
                Stage::Route => {
                    info!(
                        "🧭 Enrutando consulta (área: {}, documentos específicos: {})",
                        state.legal_area.as_str(),
                        state.has_specific_documents
                    );
                }
                Stage::Specialist(area) => self.specialist(area, &mut state).await,
                Stage::DocumentAnalysis => self.document_analysis(&mut state).await,
                Stage::Evaluate => self.evaluate(&mut state).await,
                Stage::Done => break,
            }
            stage = transition(stage, &state);
        }
        state
    }
}
