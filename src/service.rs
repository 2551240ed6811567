//! Servicio de orquestación: único punto de entrada de la capa HTTP.
//!
//! Caché → clasificación → recuperación → pipeline → caché. `process_query`
//! siempre devuelve un `QueryResult` bien formado; los fallos internos sólo
//! bajan la confianza.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::cache::{CacheStats, ResponseCache};
use crate::classifier::QueryClassifier;
use crate::documents::DocumentStore;
use crate::ingest;
use crate::llm::CompletionService;
use crate::memory::{truncate_chars, ConversationMemory};
use crate::models::{Category, DocumentInfo, LegalArea, QueryResult, ResultMetadata, SessionSummary};
use crate::pipeline::{LegalPipeline, PipelineState};
use crate::retrieval::RetrievalEngine;
use crate::stages::APOLOGY;
use crate::vector_store::VectorIndex;

pub const EMPTY_QUESTION_ANSWER: &str = "Por favor, proporciona una pregunta válida.";

fn default_user() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default = "default_user")]
    pub user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub document_ids: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub use_uploaded_docs: bool,
}

impl QueryRequest {
    pub fn new(question: &str, user_id: &str) -> Self {
        Self {
            question: question.to_string(),
            user_id: user_id.to_string(),
            session_id: None,
            document_ids: None,
            use_uploaded_docs: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub status: &'static str,
    pub vector_index: &'static str,
    pub categories: Vec<&'static str>,
    pub specialists: Vec<&'static str>,
    pub cache: CacheStats,
}

pub struct LegalQueryService {
    classifier: QueryClassifier,
    retrieval: RetrievalEngine,
    pipeline: LegalPipeline,
    index: Option<Arc<dyn VectorIndex>>,
    documents: Arc<dyn DocumentStore>,
    memory: Arc<ConversationMemory>,
    cache: Arc<ResponseCache>,
}

impl LegalQueryService {
    pub fn new(
        index: Option<Arc<dyn VectorIndex>>,
        completion: Arc<dyn CompletionService>,
        documents: Arc<dyn DocumentStore>,
        memory: Arc<ConversationMemory>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self {
            classifier: QueryClassifier::new(),
            retrieval: RetrievalEngine::new(index.clone(), documents.clone()),
            pipeline: LegalPipeline::new(completion, memory.clone()),
            index,
            documents,
            memory,
            cache,
        }
    }

    pub async fn process_query(&self, request: QueryRequest) -> QueryResult {
        let started = Instant::now();
        let question = request.question.trim();
        if question.is_empty() {
            warn!("Consulta vacía rechazada (usuario {})", request.user_id);
            return empty_question_result(&request, started);
        }

        let session_id = request
            .session_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| new_session_id(&request.user_id, Utc::now()));

        // Sin documentos subidos, los ids recibidos no cuentan ni para la caché.
        let requested_ids = if request.use_uploaded_docs {
            request.document_ids.clone().unwrap_or_default()
        } else {
            Vec::new()
        };
        let discriminator =
            cache_discriminator(&requested_ids, request.use_uploaded_docs, &request.user_id);

        if let Some(mut cached) = self.cache.get(question, &discriminator) {
            cached.metadata.from_cache = true;
            cached.metadata.processing_time_ms = elapsed_ms(started);
            cached.metadata.session_id = Some(session_id);
            info!("⚡ Respuesta servida desde caché en {}ms", cached.metadata.processing_time_ms);
            return cached;
        }

        let (category, classifier_complexity) = self.classifier.classify(question);
        let processed_question = self.classifier.preprocess(question, category);
        let query_type = self.classifier.query_type(question);
        info!(
            "🔍 Procesando consulta: {} ({}, {query_type})",
            category.as_str(),
            classifier_complexity.as_str()
        );

        let scope = self.resolve_scope(&request.user_id, &requested_ids).await;
        let retrieval = self
            .retrieval
            .search(&processed_question, question, category, &scope)
            .await;

        let has_conversation_history = self.memory.has_history(&session_id);
        let state = PipelineState::new(
            question,
            retrieval.context,
            retrieval.sources,
            !scope.is_empty(),
            &session_id,
            &request.user_id,
        );
        let state = self.pipeline.run(state).await;

        let (answer, confidence, pipeline_suggestions) = match state.final_answer() {
            Some(final_answer) => (
                final_answer.answer.clone(),
                final_answer.confidence,
                final_answer.suggestions.clone(),
            ),
            None => (APOLOGY.to_string(), 0.1, Vec::new()),
        };

        let related_questions = self.classifier.related_queries(category);
        let suggestions = if pipeline_suggestions.is_empty() {
            related_questions.iter().take(3).cloned().collect()
        } else {
            pipeline_suggestions
        };

        // Una evaluación degradada marca el resultado para que no se cachee.
        let error = state
            .metadata
            .get("evaluation")
            .and_then(|e| e.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let tokens_used = (question.chars().count() + answer.chars().count()) / 4;
        let result = QueryResult {
            answer,
            confidence,
            legal_area: state.legal_area.as_str().to_string(),
            complexity: state.complexity.as_str().to_string(),
            sources: state.sources.clone(),
            suggestions,
            metadata: ResultMetadata {
                processing_time_ms: elapsed_ms(started),
                from_cache: false,
                session_id: Some(session_id),
                user_id: request.user_id.clone(),
                category: Some(category),
                classifier_complexity: Some(classifier_complexity),
                processed_question: Some(processed_question),
                query_type: Some(query_type.to_string()),
                related_questions,
                has_conversation_history,
                tokens_used,
                error,
                pipeline: state.metadata.clone(),
            },
        };

        if self.cache.should_cache(question, &result) {
            self.cache.set(question, result.clone(), &discriminator);
        }

        info!(
            "✅ Consulta procesada en {}ms (área: {}, confianza: {:.2})",
            result.metadata.processing_time_ms, result.legal_area, result.confidence
        );
        result
    }

    /// Sólo se aceptan ids de documentos que pertenezcan al usuario.
    async fn resolve_scope(&self, user_id: &str, requested: &[String]) -> Vec<DocumentInfo> {
        if requested.is_empty() {
            return Vec::new();
        }

        let owned = match self.documents.get_user_documents(user_id).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!("No se pudieron listar los documentos de {user_id}: {e}");
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        let scope: Vec<DocumentInfo> = requested
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| {
                let found = owned.iter().find(|d| &d.id == id).cloned();
                if found.is_none() {
                    warn!("⏭️ Documento {id} ignorado: no pertenece a {user_id}");
                }
                found
            })
            .collect();

        info!("📄 Consulta acotada a {} documento(s) de {user_id}", scope.len());
        scope
    }

    pub fn clear_session(&self, session_id: &str) -> bool {
        self.memory.clear(session_id)
    }

    pub fn session_summary(&self, session_id: &str) -> SessionSummary {
        self.memory.summary(session_id)
    }

    /// Trocea e indexa un documento ya subido por el usuario.
    pub async fn index_user_document(&self, user_id: &str, document_id: &str) -> Result<usize> {
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| anyhow!("Índice vectorial no disponible"))?;

        let owned = self.documents.get_user_documents(user_id).await?;
        if !owned.iter().any(|d| d.id == document_id) {
            return Err(anyhow!("El documento {document_id} no pertenece a {user_id}"));
        }

        ingest::ingest_user_document(index.as_ref(), self.documents.as_ref(), user_id, document_id).await
    }

    pub fn index(&self) -> Option<Arc<dyn VectorIndex>> {
        self.index.clone()
    }

    pub fn status(&self) -> ServiceStatus {
        let expired = self.cache.clear_expired();
        if expired > 0 {
            info!("Caché: {expired} entradas expiradas purgadas");
        }
        ServiceStatus {
            status: "operational",
            vector_index: if self.retrieval.has_index() { "connected" } else { "disconnected" },
            categories: Category::SCORED.iter().map(Category::as_str).collect(),
            specialists: LegalArea::SPECIALISTS.iter().map(LegalArea::as_str).collect(),
            cache: self.cache.stats(),
        }
    }
}

fn empty_question_result(request: &QueryRequest, started: Instant) -> QueryResult {
    QueryResult {
        answer: EMPTY_QUESTION_ANSWER.to_string(),
        confidence: 0.0,
        legal_area: "error".to_string(),
        complexity: "simple".to_string(),
        sources: Vec::new(),
        suggestions: vec![
            "¿Podrías reformular tu pregunta?".to_string(),
            "¿Necesitas ayuda con algo específico?".to_string(),
        ],
        metadata: ResultMetadata {
            processing_time_ms: elapsed_ms(started),
            session_id: request.session_id.clone(),
            user_id: request.user_id.clone(),
            error: Some("empty_question".to_string()),
            ..ResultMetadata::default()
        },
    }
}

/// `{user_id}_{YYYYmmdd_HHMMSS}`
pub fn new_session_id(user_id: &str, now: DateTime<Utc>) -> String {
    format!("{user_id}_{}", now.format("%Y%m%d_%H%M%S"))
}

/// Primeros 8 hex del SHA-256 de `ids | use_uploaded_docs | user_id`.
pub fn cache_discriminator(document_ids: &[String], use_uploaded_docs: bool, user_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_ids.join(",").as_bytes());
    hasher.update(b"|");
    hasher.update(use_uploaded_docs.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(user_id.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    truncate_chars(&digest, 8).to_string()
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::classifier::category_config;
    use crate::models::Provenance;
    use crate::testing::{hit, FakeDocumentStore, FakeIndex, ScriptedCompletion};

    struct Harness {
        service: LegalQueryService,
        index: Arc<FakeIndex>,
        completion: Arc<ScriptedCompletion>,
        documents: Arc<FakeDocumentStore>,
    }

    fn harness(index: FakeIndex, completion: ScriptedCompletion, documents: FakeDocumentStore) -> Harness {
        let index = Arc::new(index);
        let completion = Arc::new(completion);
        let documents = Arc::new(documents);
        let service = LegalQueryService::new(
            Some(index.clone()),
            completion.clone(),
            documents.clone(),
            Arc::new(ConversationMemory::new(20)),
            Arc::new(ResponseCache::new(50, 12)),
        );
        Harness { service, index, completion, documents }
    }

    fn civil_completion() -> ScriptedCompletion {
        ScriptedCompletion::new()
            .with_reply("coordinador", "{\"legal_area\": \"civil\", \"complexity\": \"medium\"}")
            .with_reply("civil", "El arrendamiento se rige por la Ley 820 de 2003.")
            .with_reply(
                "evaluador",
                "{\"final_answer\": \"Debe firmar un contrato escrito según la Ley 820 de 2003.\", \"confidence\": 0.9, \"suggestions\": []}",
            )
    }

    fn system_hits() -> Vec<crate::vector_store::ScoredChunk> {
        vec![hit(
            "ARTÍCULO 1. El contrato de arrendamiento de vivienda urbana...",
            0.8,
            Some("ley-820"),
            "codigo_civil.pdf",
            Provenance::System,
        )]
    }

    #[tokio::test]
    async fn empty_question_is_rejected_before_any_stage() {
        let h = harness(FakeIndex::new(system_hits()), ScriptedCompletion::new(), FakeDocumentStore::new());

        let result = h.service.process_query(QueryRequest::new("   ", "ana")).await;

        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.legal_area, "error");
        assert!(result.sources.is_empty());
        assert_eq!(result.metadata.error.as_deref(), Some("empty_question"));
        assert!(h.index.searches().is_empty());
        assert!(h.completion.calls().is_empty());
    }

    #[tokio::test]
    async fn repeated_question_is_served_from_cache() {
        let h = harness(FakeIndex::new(system_hits()), civil_completion(), FakeDocumentStore::new());
        let request = QueryRequest::new("¿Cómo hago un contrato de arrendamiento?", "ana");

        let first = h.service.process_query(request.clone()).await;
        assert!(!first.metadata.from_cache);
        assert_eq!(first.confidence, 0.9);
        assert_eq!(first.legal_area, "civil");
        assert_eq!(first.sources[0].filename, "codigo_civil.pdf");
        // El evaluador no propuso sugerencias: se usan las relacionadas.
        assert_eq!(first.suggestions.len(), 3);
        assert_eq!(first.suggestions[0], first.metadata.related_questions[0]);

        let second = h.service.process_query(request).await;
        assert!(second.metadata.from_cache);
        assert_eq!(second.answer, first.answer);
        assert_eq!(h.index.searches().len(), 1);
        assert_eq!(h.completion.calls().len(), 3);
        assert_eq!(h.service.status().cache.total_entries, 1);
    }

    #[tokio::test]
    async fn failing_stages_still_return_a_result() {
        let completion = ScriptedCompletion::new()
            .with_failure("coordinador", "timeout")
            .with_failure("civil", "timeout")
            .with_failure("evaluador", "timeout");
        let h = harness(FakeIndex::failing(), completion, FakeDocumentStore::new());
        let request = QueryRequest::new("¿Qué pasa si no pago el arriendo a tiempo?", "ana");

        let result = h.service.process_query(request.clone()).await;

        assert!(!result.answer.is_empty());
        assert!((0.0..=1.0).contains(&result.confidence));
        assert_eq!(result.sources[0].metadata.source, Provenance::Fallback);
        assert!(result.metadata.error.is_some());

        h.service.process_query(request).await;
        assert_eq!(h.completion.calls().len(), 6, "los resultados degradados no se cachean");
    }

    #[tokio::test]
    async fn scoped_query_uses_only_owned_documents() {
        let documents = FakeDocumentStore::new().with_user_document(
            "ana",
            "doc-1",
            "contrato.txt",
            "SEXTA. PROPIEDAD INTELECTUAL: los derechos sobre los entregables pertenecen al contratante.",
        );
        let completion = ScriptedCompletion::new()
            .with_reply("coordinador", "{\"legal_area\": \"comercial\", \"complexity\": \"simple\"}")
            .with_reply("analisis_documento", "Según la cláusula SEXTA, los entregables son del contratante.");
        let h = harness(FakeIndex::failing(), completion, documents);

        let mut request = QueryRequest::new("¿De quién es la propiedad intelectual de los entregables?", "ana");
        request.document_ids = Some(vec!["doc-1".into(), "ajeno".into(), "doc-1".into()]);

        let result = h.service.process_query(request).await;

        assert_eq!(result.answer, "Según la cláusula SEXTA, los entregables son del contratante.");
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.sources[0].title, "contrato.txt");
        assert_eq!(h.documents.text_requests(), vec!["doc-1".to_string()]);
        assert!(!h.completion.called("comercial"));
    }

    fn request_question() -> String {
        "¿Cómo hago un contrato de arrendamiento?".to_string()
    }

    #[tokio::test]
    async fn uploaded_docs_flag_off_ignores_document_ids() {
        let documents = FakeDocumentStore::new().with_user_document("ana", "doc-1", "contrato.txt", "texto");
        let h = harness(FakeIndex::new(Vec::new()), civil_completion(), documents);

        let mut request = QueryRequest::new(&request_question(), "ana");
        request.document_ids = Some(vec!["doc-1".into()]);
        request.use_uploaded_docs = false;

        let result = h.service.process_query(request).await;

        assert!(h.completion.called("civil"));
        assert!(h.documents.text_requests().is_empty());
        assert_eq!(result.sources[0].content, "Documentos legales del sistema");
        let general_k = category_config(QueryClassifier::new().category(&request_question())).k;
        assert_eq!(h.index.searches()[0].1, general_k);
    }

    #[tokio::test]
    async fn sessions_can_be_summarized_and_cleared() {
        let h = harness(FakeIndex::new(system_hits()), civil_completion(), FakeDocumentStore::new());
        let mut request = QueryRequest::new("¿Cómo hago un contrato de arrendamiento?", "ana");
        request.session_id = Some("sesion-1".into());

        h.service.process_query(request).await;

        let summary = h.service.session_summary("sesion-1");
        assert_eq!(summary.exchanges, 1);
        assert_eq!(summary.topics, vec!["civil".to_string()]);
        assert!(h.service.clear_session("sesion-1"));
        assert!(!h.service.clear_session("sesion-1"));
    }

    #[test]
    fn session_ids_and_discriminators_are_deterministic() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(new_session_id("ana", now), "ana_20240309_140507");

        let a = cache_discriminator(&["doc-1".into()], true, "ana");
        assert_eq!(a.len(), 8);
        assert_eq!(a, cache_discriminator(&["doc-1".into()], true, "ana"));
        assert_ne!(a, cache_discriminator(&[], true, "ana"));
        assert_ne!(a, cache_discriminator(&["doc-1".into()], true, "luis"));
    }
}
