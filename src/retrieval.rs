//! Motor de recuperación de contexto.
//!
//! Dos caminos:
//!   - búsqueda general en la base de conocimiento del sistema, con umbral y
//!     boosts por categoría;
//!   - búsqueda acotada a documentos del usuario, con reintento a umbral bajo
//!     y, si el índice no aporta nada, análisis directo del texto de cada documento.
//!
//! `search` nunca falla: cualquier indisponibilidad se traduce en un contexto degradado.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use tracing::{info, warn};

use crate::classifier::category_config;
use crate::documents::DocumentStore;
use crate::memory::truncate_chars;
use crate::models::{Category, DocumentInfo, Provenance, Source, SourceMetadata};
use crate::vector_store::{ScoredChunk, VectorIndex};

pub const FALLBACK_CONTEXT: &str = "Legislación colombiana aplicable.";
pub const NO_SCOPED_INFO: &str = "No se encontró información relevante en los documentos específicos subidos. \
Verifica que los documentos contengan información relacionada con tu consulta.";

const RETRY_THRESHOLD: f64 = 0.2;
const SCOPED_K_FACTOR: usize = 5;
const MAX_SOURCES: usize = 5;
const GENERAL_MAX_CHUNKS: usize = 6;
const GENERAL_MAX_CHARS: usize = 3000;
const SCOPED_MAX_CHUNKS: usize = 5;
const SCOPED_MAX_CHARS: usize = 4000;
const DIRECT_MAX_CHARS: usize = 6000;
const DIRECT_MAX_PARAGRAPHS: usize = 5;
const DIRECT_FALLBACK_PARAGRAPHS: usize = 3;
const MIN_PARAGRAPH_CHARS: usize = 50;
const EXCERPT_CHARS: usize = 200;
const DIRECT_RELEVANCE: f64 = 0.9;

/// Multiplicador por tipo de documento (según el nombre del fichero).
const DOC_TYPE_BOOSTS: [(&str, f64); 4] = [
    ("codigo_civil", 1.1),
    ("codigo_comercio", 1.15),
    ("codigo_sustantivo_trabajo", 1.1),
    ("estatuto_tributario", 1.2),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    pub context: String,
    pub sources: Vec<Source>,
}

impl Retrieval {
    /// Contexto fijo cuando no hay índice o no devuelve nada útil.
    pub fn fallback() -> Self {
        Self {
            context: FALLBACK_CONTEXT.to_string(),
            sources: vec![Source {
                title: "Legislación Colombiana".to_string(),
                content: "Documentos legales del sistema".to_string(),
                relevance: 1.0,
                filename: "legislacion_colombiana".to_string(),
                metadata: SourceMetadata::new(Provenance::Fallback),
            }],
        }
    }

    fn nothing_scoped() -> Self {
        Self {
            context: NO_SCOPED_INFO.to_string(),
            sources: Vec::new(),
        }
    }
}

pub struct RetrievalEngine {
    index: Option<Arc<dyn VectorIndex>>,
    documents: Arc<dyn DocumentStore>,
    paragraph_split: Regex,
}

impl RetrievalEngine {
    pub fn new(index: Option<Arc<dyn VectorIndex>>, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            index,
            documents,
            paragraph_split: Regex::new(r"\n\s*\n").expect("patrón de párrafo válido"),
        }
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Recupera contexto y fuentes. Con `scope` no vacío sólo se consideran
    /// esos documentos del usuario.
    ///
    /// `search_text` (la pregunta preprocesada) va al índice; las palabras
    /// clave del análisis directo salen de `question`, tal como la escribió el usuario.
    pub async fn search(
        &self,
        search_text: &str,
        question: &str,
        category: Category,
        scope: &[DocumentInfo],
    ) -> Retrieval {
        if scope.is_empty() {
            self.search_general(search_text, category).await
        } else {
            self.search_scoped(search_text, question, category, scope).await
        }
    }

    async fn search_general(&self, question: &str, category: Category) -> Retrieval {
        let Some(index) = &self.index else {
            warn!("⚠️ Índice vectorial no disponible, usando contexto por defecto");
            return Retrieval::fallback();
        };
        let config = category_config(category);

        let hits = match index.similarity_search_with_score(question, config.k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("❌ Error en búsqueda vectorial: {e}");
                return Retrieval::fallback();
            }
        };
        let total = hits.len();

        // Sólo la base de conocimiento del sistema; los documentos de usuario
        // nunca se mezclan en la búsqueda general.
        let mut ranked: Vec<(f64, ScoredChunk)> = hits
            .into_iter()
            .filter(|hit| hit.metadata.source == Provenance::System)
            .map(|hit| (boosted_relevance(&hit, config.boost_keywords), hit))
            .filter(|(boosted, _)| *boosted >= config.threshold)
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

        info!(
            "🔍 Búsqueda general ({}): {} resultados, {} aceptados",
            category.as_str(),
            total,
            ranked.len()
        );

        if ranked.is_empty() {
            return Retrieval::fallback();
        }

        let context = join_capped(
            ranked.iter().take(GENERAL_MAX_CHUNKS).map(|(_, hit)| hit.content.as_str()),
            GENERAL_MAX_CHARS,
        );
        let sources = ranked
            .iter()
            .take(MAX_SOURCES)
            .map(|(boosted, hit)| chunk_source(hit, boosted.min(1.0), None))
            .collect();

        Retrieval { context, sources }
    }

    async fn search_scoped(
        &self,
        search_text: &str,
        question: &str,
        category: Category,
        scope: &[DocumentInfo],
    ) -> Retrieval {
        let config = category_config(category);
        let scope_ids: HashSet<&str> = scope.iter().map(|d| d.id.as_str()).collect();

        if let Some(index) = &self.index {
            match index
                .similarity_search_with_score(search_text, config.k * SCOPED_K_FACTOR)
                .await
            {
                Ok(hits) => {
                    let in_scope: Vec<&ScoredChunk> = hits
                        .iter()
                        .filter(|hit| {
                            hit.metadata
                                .document_id
                                .as_deref()
                                .is_some_and(|id| scope_ids.contains(id))
                        })
                        .collect();

                    let mut accepted = accept(&in_scope, config.threshold);
                    if accepted.is_empty() && !in_scope.is_empty() {
                        info!("🔄 Reintentando con umbral reducido para documentos específicos...");
                        accepted = accept(&in_scope, RETRY_THRESHOLD);
                    }

                    if !accepted.is_empty() {
                        info!("📄 {} fragmentos de documentos específicos aceptados", accepted.len());
                        return scoped_retrieval(&accepted, scope);
                    }
                    warn!("⚠️ Sin resultados en los documentos indicados, pasando a análisis directo");
                }
                Err(e) => warn!("❌ Error en búsqueda vectorial acotada: {e}"),
            }
        }

        self.analyze_directly(question, scope).await
    }

    /// Lee el texto de cada documento y se queda con los párrafos que mejor
    /// coinciden con las palabras clave de la pregunta.
    async fn analyze_directly(&self, question: &str, scope: &[DocumentInfo]) -> Retrieval {
        let keywords = question_keywords(question);
        let mut sections = Vec::new();
        let mut sources = Vec::new();

        for doc in scope {
            let (text, extraction) = match self.documents.get_document_text(&doc.id).await {
                Ok(found) => found,
                Err(e) => {
                    warn!("No se pudo leer el documento {}: {e}", doc.id);
                    continue;
                }
            };

            let Some(excerpt) = self.relevant_excerpt(&text, &keywords) else {
                continue;
            };
            info!("🔍 Análisis directo de {}: {} caracteres relevantes", doc.filename, excerpt.chars().count());

            sources.push(Source {
                title: doc.filename.clone(),
                content: excerpt_of(&excerpt),
                relevance: DIRECT_RELEVANCE,
                filename: extraction.filename.clone(),
                metadata: SourceMetadata {
                    document_id: Some(doc.id.clone()),
                    ..SourceMetadata::new(Provenance::DirectAnalysis)
                },
            });
            sections.push(format!("=== {} ===\n{}", doc.filename, excerpt));
        }

        if sections.is_empty() {
            return Retrieval::nothing_scoped();
        }

        Retrieval {
            context: join_capped(sections.iter().map(String::as_str), DIRECT_MAX_CHARS),
            sources,
        }
    }

    fn relevant_excerpt(&self, text: &str, keywords: &[String]) -> Option<String> {
        let paragraphs: Vec<&str> = self
            .paragraph_split
            .split(text)
            .map(str::trim)
            .filter(|p| p.chars().count() >= MIN_PARAGRAPH_CHARS)
            .collect();

        if paragraphs.is_empty() {
            let trimmed = text.trim();
            return (!trimmed.is_empty())
                .then(|| truncate_chars(trimmed, DIRECT_MAX_CHARS).to_string());
        }

        let min_matches = if keywords.len() <= 2 { 1 } else { 2 };
        let mut scored: Vec<(usize, usize)> = paragraphs
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let lower = p.to_lowercase();
                (i, keywords.iter().filter(|k| lower.contains(k.as_str())).count())
            })
            .filter(|(_, matches)| *matches >= min_matches)
            .collect();

        let selected: Vec<&str> = if scored.is_empty() {
            paragraphs.iter().take(DIRECT_FALLBACK_PARAGRAPHS).copied().collect()
        } else {
            scored.sort_by(|a, b| b.1.cmp(&a.1));
            scored.truncate(DIRECT_MAX_PARAGRAPHS);
            // Orden del documento para que las cláusulas se lean en secuencia.
            scored.sort_by_key(|(i, _)| *i);
            scored.iter().map(|(i, _)| paragraphs[*i]).collect()
        };

        Some(selected.join("\n\n"))
    }
}

fn accept<'a>(hits: &[&'a ScoredChunk], threshold: f64) -> Vec<&'a ScoredChunk> {
    hits.iter()
        .copied()
        .filter(|hit| relevance(hit.score) >= threshold)
        .collect()
}

fn scoped_retrieval(accepted: &[&ScoredChunk], scope: &[DocumentInfo]) -> Retrieval {
    let context = join_capped(
        accepted.iter().take(SCOPED_MAX_CHUNKS).map(|hit| hit.content.as_str()),
        SCOPED_MAX_CHARS,
    );
    let sources = accepted
        .iter()
        .take(MAX_SOURCES)
        .map(|hit| {
            let title = hit
                .metadata
                .document_id
                .as_deref()
                .and_then(|id| scope.iter().find(|d| d.id == id))
                .map(|d| d.filename.clone());
            chunk_source(hit, relevance(hit.score), title)
        })
        .collect();
    Retrieval { context, sources }
}

/// Relevancia en [0, 1] a partir de la similitud del índice (1 − distancia normalizada).
fn relevance(score: f64) -> f64 {
    let distance = (1.0 - score).clamp(0.0, 1.0);
    1.0 - distance
}

fn boosted_relevance(hit: &ScoredChunk, boost_keywords: &[&str]) -> f64 {
    let filename = hit.metadata.filename.as_deref().unwrap_or("").to_lowercase();
    let doc_boost = DOC_TYPE_BOOSTS
        .iter()
        .find(|(doc_type, _)| filename.contains(doc_type))
        .map_or(1.0, |(_, boost)| *boost);

    let content = hit.content.to_lowercase();
    let matched = boost_keywords.iter().filter(|k| content.contains(*k)).count();
    let keyword_boost = 1.0 + matched as f64 * 0.05;

    relevance(hit.score) * doc_boost * keyword_boost
}

fn chunk_source(hit: &ScoredChunk, relevance: f64, title: Option<String>) -> Source {
    let filename = hit
        .metadata
        .filename
        .clone()
        .unwrap_or_else(|| "Documento legal".to_string());
    Source {
        title: title.unwrap_or_else(|| filename.clone()),
        content: excerpt_of(&hit.content),
        relevance: round3(relevance),
        filename,
        metadata: SourceMetadata {
            source: hit.metadata.source,
            document_id: hit.metadata.document_id.clone(),
            chunk_index: hit.metadata.chunk_index,
            area: hit.metadata.area.clone(),
        },
    }
}

fn excerpt_of(text: &str) -> String {
    if text.chars().count() > EXCERPT_CHARS {
        format!("{}...", truncate_chars(text, EXCERPT_CHARS))
    } else {
        text.to_string()
    }
}

fn join_capped<'a>(parts: impl Iterator<Item = &'a str>, max_chars: usize) -> String {
    let joined = parts.collect::<Vec<_>>().join("\n\n");
    if joined.chars().count() > max_chars {
        format!("{}...", truncate_chars(&joined, max_chars))
    } else {
        joined
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Palabras de más de 3 caracteres, en minúsculas y sin repetir.
fn question_keywords(question: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    question
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3)
        .filter(|w| seen.insert(w.to_string()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{document_info, hit, FakeDocumentStore, FakeIndex};

    fn engine(index: Option<FakeIndex>, store: FakeDocumentStore) -> (RetrievalEngine, Option<Arc<FakeIndex>>) {
        let index = index.map(Arc::new);
        let dyn_index = index.clone().map(|i| i as Arc<dyn VectorIndex>);
        (RetrievalEngine::new(dyn_index, Arc::new(store)), index)
    }

    const CONTRACT: &str = "CONTRATO DE PRESTACIÓN DE SERVICIOS celebrado entre las partes abajo firmantes en Bogotá.\n\n\
SEXTA. PROPIEDAD INTELECTUAL: los derechos sobre los entregables pertenecen al contratante desde su entrega.\n\n\
corto\n\n\
SÉPTIMA. CONFIDENCIALIDAD: las partes guardarán reserva de la información durante dos años.";

    #[tokio::test]
    async fn general_search_boosts_ranks_and_is_idempotent() {
        let index = FakeIndex::new(vec![
            hit("texto general sin boost", 0.5, Some("a"), "notas.txt", Provenance::System),
            hit("impuesto de renta ante la dian", 0.45, Some("b"), "estatuto_tributario.pdf", Provenance::System),
            hit("contrato privado de otro usuario", 0.9, Some("c"), "privado.txt", Provenance::UserUpload),
            hit("ruido", 0.1, Some("d"), "ruido.txt", Provenance::System),
        ]);
        let (engine, _) = engine(Some(index), FakeDocumentStore::new());
        let question = "¿Cómo declaro renta?";

        let first = engine.search(question, question, Category::Tributario, &[]).await;
        let titles: Vec<&str> = first.sources.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["estatuto_tributario.pdf", "notas.txt"]);
        assert_eq!(first.sources[0].relevance, 0.621);
        assert_eq!(first.sources[1].relevance, 0.5);
        assert!(first.context.starts_with("impuesto de renta"));
        assert!(!first.context.contains("otro usuario"));

        let second = engine.search(question, question, Category::Tributario, &[]).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn general_search_degrades_without_usable_index() {
        let (no_index, _) = engine(None, FakeDocumentStore::new());
        let failing = engine(Some(FakeIndex::failing()), FakeDocumentStore::new()).0;
        let empty = engine(Some(FakeIndex::new(Vec::new())), FakeDocumentStore::new()).0;

        let question = "pregunta";
        for engine in [no_index, failing, empty] {
            let result = engine.search(question, question, Category::General, &[]).await;
            assert_eq!(result.context, FALLBACK_CONTEXT);
            assert_eq!(result.sources.len(), 1);
            assert_eq!(result.sources[0].metadata.source, Provenance::Fallback);
        }
    }

    #[tokio::test]
    async fn scoped_search_filters_scope_and_retries_lower_threshold() {
        let index = FakeIndex::new(vec![
            hit("fuera del alcance", 0.9, Some("doc-2"), "otro.pdf", Provenance::UserUpload),
            hit("muy lejano", 0.15, Some("doc-1"), "contrato.pdf", Provenance::UserUpload),
            hit("cláusula de terminación", 0.22, Some("doc-1"), "contrato.pdf", Provenance::UserUpload),
        ]);
        let (engine, index) = engine(Some(index), FakeDocumentStore::new());
        let scope = vec![document_info("doc-1", "Mi contrato.pdf")];
        let question = "terminación";

        let result = engine.search(question, question, Category::Contractual, &scope).await;

        assert_eq!(index.unwrap().searches()[0].1, 50);
        assert_eq!(result.context, "cláusula de terminación");
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.sources[0].title, "Mi contrato.pdf");
        assert_eq!(result.sources[0].metadata.document_id.as_deref(), Some("doc-1"));
        assert_eq!(result.sources[0].relevance, 0.22);
    }

    #[tokio::test]
    async fn direct_analysis_keeps_matching_paragraphs() {
        let store = FakeDocumentStore::new().with_document("doc-1", "contrato.txt", CONTRACT);
        let (engine, _) = engine(Some(FakeIndex::failing()), store);
        let scope = vec![document_info("doc-1", "contrato.txt")];

        let question = "¿Qué dice sobre la propiedad intelectual de los entregables?";

        let result = engine.search(question, question, Category::Contractual, &scope).await;

        assert!(result.context.contains("SEXTA. PROPIEDAD INTELECTUAL"));
        assert!(!result.context.contains("CONTRATO DE PRESTACIÓN"));
        assert!(!result.context.contains("CONFIDENCIALIDAD"));
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.sources[0].relevance, 0.9);
        assert_eq!(result.sources[0].metadata.source, Provenance::DirectAnalysis);
    }

    #[tokio::test]
    async fn direct_analysis_without_matches_uses_leading_paragraphs() {
        let store = FakeDocumentStore::new().with_document("doc-1", "contrato.txt", CONTRACT);
        let (engine, _) = engine(None, store);
        let scope = vec![document_info("doc-1", "contrato.txt")];
        let question = "arrendamiento vehículo";

        let result = engine.search(question, question, Category::General, &scope).await;

        assert!(result.context.contains("CONTRATO DE PRESTACIÓN"));
        assert!(result.context.contains("SÉPTIMA. CONFIDENCIALIDAD"));
        assert!(!result.context.contains("corto"));
    }

    #[tokio::test]
    async fn unreadable_scope_yields_no_sources() {
        let (engine, _) = engine(None, FakeDocumentStore::failing());
        let scope = vec![document_info("doc-1", "contrato.txt")];
        let question = "propiedad intelectual";

        let result = engine.search(question, question, Category::General, &scope).await;
        assert_eq!(result.context, NO_SCOPED_INFO);
        assert!(result.sources.is_empty());
    }

    #[tokio::test]
    async fn scoped_hits_below_retry_threshold_fall_through_to_direct_analysis() {
        let index = FakeIndex::new(vec![
            hit("fragmento poco parecido", 0.1, Some("doc-1"), "contrato.txt", Provenance::UserUpload),
            hit("otro fragmento lejano", 0.05, Some("doc-1"), "contrato.txt", Provenance::UserUpload),
        ]);
        let store = FakeDocumentStore::new().with_document("doc-1", "contrato.txt", CONTRACT);
        let (engine, index) = engine(Some(index), store);
        let scope = vec![document_info("doc-1", "contrato.txt")];
        let question = "propiedad intelectual entregables";

        let result = engine.search(question, question, Category::Contractual, &scope).await;

        assert_eq!(index.unwrap().searches().len(), 1);
        assert!(result.context.starts_with("=== contrato.txt ==="));
        assert!(result.context.contains("SEXTA. PROPIEDAD INTELECTUAL"));
        assert!(!result.context.contains("fragmento poco parecido"));
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.sources[0].metadata.source, Provenance::DirectAnalysis);
    }

    #[tokio::test]
    async fn short_question_needs_a_single_keyword_match() {
        let store = FakeDocumentStore::new().with_document("doc-1", "contrato.txt", CONTRACT);
        let (engine, _) = engine(None, store);
        let scope = vec![document_info("doc-1", "contrato.txt")];
        // Palabras clave: "pasa" y "entregables".
        let question = "¿Qué pasa con los entregables?";

        let result = engine.search(question, question, Category::General, &scope).await;

        assert!(result.context.contains("SEXTA. PROPIEDAD INTELECTUAL"));
        assert!(!result.context.contains("CONTRATO DE PRESTACIÓN"));
        assert!(!result.context.contains("CONFIDENCIALIDAD"));
    }

    #[tokio::test]
    async fn direct_analysis_keeps_at_most_five_paragraphs() {
        let text = (1..=7)
            .map(|i| format!("Párrafo {i}: el plazo para cumplir la obligación pactada es de treinta días hábiles."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let store = FakeDocumentStore::new().with_document("doc-1", "contrato.txt", &text);
        let (engine, _) = engine(None, store);
        let scope = vec![document_info("doc-1", "contrato.txt")];
        let question = "¿Cuál es el plazo?";

        let result = engine.search(question, question, Category::General, &scope).await;

        for i in 1..=5 {
            assert!(result.context.contains(&format!("Párrafo {i}:")));
        }
        assert!(!result.context.contains("Párrafo 6:"));
        assert!(!result.context.contains("Párrafo 7:"));
    }

    #[tokio::test]
    async fn general_context_is_capped_with_ellipsis() {
        let hits = (0..7)
            .map(|i| {
                let content = format!("fragmento {i}: {}", "texto legal ".repeat(60));
                let id = format!("ley-{i}");
                hit(&content, 0.9, Some(id.as_str()), "ley.txt", Provenance::System)
            })
            .collect();
        let (engine, _) = engine(Some(FakeIndex::new(hits)), FakeDocumentStore::new());
        let question = "obligaciones";

        let result = engine.search(question, question, Category::General, &[]).await;

        assert!(result.context.starts_with("fragmento 0:"));
        assert!(result.context.ends_with("..."));
        assert_eq!(result.context.chars().count(), GENERAL_MAX_CHARS + 3);
        assert!(!result.context.contains("fragmento 6:"));
        assert_eq!(result.sources.len(), MAX_SOURCES);
    }

    #[tokio::test]
    async fn direct_analysis_ignores_terms_appended_by_preprocessing() {
        let store = FakeDocumentStore::new().with_document("doc-1", "contrato.txt", CONTRACT);
        let (engine, _) = engine(None, store);
        let scope = vec![document_info("doc-1", "contrato.txt")];

        let result = engine
            .search(
                "y la confidencialidad colombia legislación colombiana",
                "¿Y la confidencialidad?",
                Category::General,
                &scope,
            )
            .await;

        assert!(result.context.contains("SÉPTIMA. CONFIDENCIALIDAD"));
        assert!(!result.context.contains("CONTRATO DE PRESTACIÓN"));
        assert!(!result.context.contains("SEXTA"));
    }

    #[test]
    fn keywords_skip_short_and_repeated_words() {
        assert_eq!(
            question_keywords("¿Qué plazo tiene el plazo de pago?"),
            vec!["plazo", "tiene", "pago"]
        );
    }
}
