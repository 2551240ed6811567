//! Cuerpos de las etapas del pipeline: coordinador, especialistas,
//! análisis de documentos y evaluador.

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::llm::{Completion, PromptVars};
use crate::memory::{truncate_chars, DEFAULT_CONTEXT_EXCHANGES};
use crate::models::{Complexity, LegalArea, Source, StageResponse};
use crate::pipeline::{specialist_for, LegalPipeline, PipelineState, DOCUMENT_ANALYSIS_KEY};
use crate::prompts::{
    document_analysis_suggestions, specialist_prompt, specialist_suggestions, COORDINATOR,
    DOCUMENT_ANALYSIS, EVALUATOR,
};

pub const APOLOGY: &str = "Lo siento, no pude procesar tu consulta correctamente. \
Por favor, intenta reformular tu pregunta.";
const RAW_EVALUATION_CONFIDENCE: f64 = 0.7;
const SPECIALIST_CONFIDENCE: f64 = 0.8;
const DOCUMENT_CONFIDENCE: f64 = 0.9;

/// Salida estructurada del coordinador.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Coordination {
    legal_area: String,
    complexity: String,
    #[serde(default)]
    requires_multiple_areas: bool,
    #[serde(default)]
    secondary_areas: Vec<String>,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    relates_to_previous: bool,
}

/// Salida estructurada del evaluador.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Evaluation {
    final_answer: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default)]
    relates_to_previous: bool,
    #[serde(default)]
    context_summary: String,
}

fn area_emoji(area: LegalArea) -> &'static str {
    match area {
        LegalArea::Civil | LegalArea::General => "⚖️",
        LegalArea::Comercial => "🏢",
        LegalArea::Laboral => "👷",
        LegalArea::Tributario => "💰",
        LegalArea::Constitucional => "📜",
        LegalArea::Administrativo => "🏛️",
    }
}

/// Adivina el área a partir de texto libre del coordinador.
fn guess_area(text: &str) -> LegalArea {
    let lower = text.to_lowercase();
    [
        LegalArea::Comercial,
        LegalArea::Laboral,
        LegalArea::Tributario,
        LegalArea::Constitucional,
        LegalArea::Administrativo,
    ]
    .into_iter()
    .find(|area| lower.contains(area.as_str()))
    .unwrap_or(LegalArea::Civil)
}

/// Lista numerada de fuentes para los prompts de los especialistas.
pub fn format_sources_for_prompt(sources: &[Source]) -> String {
    if sources.is_empty() {
        return "No hay fuentes documentales disponibles.".to_string();
    }

    sources
        .iter()
        .enumerate()
        .map(|(i, source)| {
            let content = if source.content.chars().count() > 150 {
                format!("{}...", truncate_chars(&source.content, 150))
            } else {
                source.content.clone()
            };
            format!(
                "{}. {} (Relevancia: {:.2})\n   Contenido: {}",
                i + 1,
                source.title,
                source.relevance,
                content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn stage_metadata(entries: &[(&str, Value)]) -> Map<String, Value> {
    let mut metadata: Map<String, Value> = entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    metadata.insert("timestamp".into(), Value::String(Utc::now().to_rfc3339()));
    metadata
}

fn generic_suggestions() -> Vec<String> {
    vec![
        "¿Necesitas más detalles sobre este tema?".to_string(),
        "¿Hay algo específico que te interese?".to_string(),
    ]
}

fn retry_suggestions() -> Vec<String> {
    vec![
        "Intenta ser más específico".to_string(),
        "Reformula tu pregunta".to_string(),
        "Verifica la información proporcionada".to_string(),
    ]
}

/// Media de las confianzas registradas; 0.7 si no hay ninguna.
fn mean_confidence(state: &PipelineState) -> f64 {
    let responses = state.responses();
    if responses.is_empty() {
        return RAW_EVALUATION_CONFIDENCE;
    }
    responses.values().map(|r| r.confidence).sum::<f64>() / responses.len() as f64
}

impl LegalPipeline {
    fn conversation_context(&self, state: &PipelineState) -> String {
        self.memory
            .get_context(&state.session_id, DEFAULT_CONTEXT_EXCHANGES)
    }

    pub(crate) async fn coordinate(&self, state: &mut PipelineState) {
        info!("🎯 Coordinador procesando pregunta: {}...", truncate_chars(&state.question, 100));

        let mut vars = PromptVars::new();
        vars.insert("question", state.question.clone());
        vars.insert("conversation_context", self.conversation_context(state));

        let coordination = match self.completion.complete(&COORDINATOR, &vars).await {
            Ok(text) => match Completion::<Coordination>::parse(&text) {
                Completion::Structured(parsed) => {
                    state.legal_area = LegalArea::parse_lenient(&parsed.legal_area);
                    state.complexity = Complexity::parse_lenient(&parsed.complexity);
                    serde_json::to_value(&parsed).unwrap_or(Value::Null)
                }
                Completion::Raw(raw) => {
                    warn!("⚠️ Coordinador sin JSON válido, se deduce el área del texto");
                    state.legal_area = guess_area(&raw);
                    state.complexity = Complexity::Medium;
                    json!({
                        "legal_area": state.legal_area.as_str(),
                        "complexity": state.complexity.as_str(),
                        "reasoning": format!("Extraído del texto: {}", truncate_chars(&raw, 100)),
                    })
                }
            },
            Err(e) => {
                error!("❌ Error en coordinador: {e}");
                state.legal_area = LegalArea::Civil;
                state.complexity = Complexity::Medium;
                json!({ "error": e.to_string(), "fallback": true })
            }
        };

        state.metadata.insert("coordination".into(), coordination);
        info!(
            "✅ Coordinación completada - Área: {}, Complejidad: {}",
            state.legal_area.as_str(),
            state.complexity.as_str()
        );
    }

    pub(crate) async fn specialist(&self, area: LegalArea, state: &mut PipelineState) {
        let name = area.as_str();
        info!("{} Procesando consulta con especialista {name}", area_emoji(area));

        let mut vars = PromptVars::new();
        vars.insert("question", state.question.clone());
        vars.insert("context", state.context.clone());
        vars.insert("formatted_sources", format_sources_for_prompt(&state.sources));

        let response = match self.completion.complete(specialist_prompt(area), &vars).await {
            Ok(content) => StageResponse::success(
                content,
                SPECIALIST_CONFIDENCE,
                specialist_suggestions(area),
                stage_metadata(&[("area", json!(name))]),
            ),
            Err(e) => {
                error!("❌ Error en especialista {name}: {e}");
                StageResponse::degraded(
                    format!("Error procesando consulta {name}. Intenta nuevamente."),
                    vec![
                        "Reformula tu pregunta".to_string(),
                        format!("Sé más específico sobre el tema {name}"),
                    ],
                    &e.to_string(),
                    stage_metadata(&[("area", json!(name))]),
                )
            }
        };
        state.record_response(name, response);
    }

    pub(crate) async fn document_analysis(&self, state: &mut PipelineState) {
        info!(
            "🔍 Análisis de documento - contexto de {} caracteres",
            state.context.chars().count()
        );

        let mut vars = PromptVars::new();
        vars.insert("question", state.question.clone());
        vars.insert("context", state.context.clone());

        let response = match self.completion.complete(&DOCUMENT_ANALYSIS, &vars).await {
            Ok(content) => StageResponse::success(
                content,
                DOCUMENT_CONFIDENCE,
                document_analysis_suggestions(),
                stage_metadata(&[("analysis_type", json!("document_specific"))]),
            ),
            Err(e) => {
                error!("❌ Error en análisis de documento: {e}");
                StageResponse::degraded(
                    "Error al analizar el documento específico. Por favor, intenta nuevamente.".to_string(),
                    vec![
                        "Intenta reformular tu pregunta".to_string(),
                        "Verifica que el documento se haya cargado correctamente".to_string(),
                    ],
                    &e.to_string(),
                    stage_metadata(&[("analysis_type", json!("document_specific"))]),
                )
            }
        };
        state.record_response(DOCUMENT_ANALYSIS_KEY, response);
    }

    pub(crate) async fn evaluate(&self, state: &mut PipelineState) {
        info!("🎓 Evaluando respuestas y consolidando resultado final");

        if state.has_specific_documents {
            if let Some(analysis) = state.response(DOCUMENT_ANALYSIS_KEY).cloned() {
                info!("📄 Usando únicamente la respuesta del análisis de documento");
                state.finalize(analysis.content.clone(), analysis.confidence, analysis.suggestions.clone());
                state.metadata.insert(
                    "evaluation".into(),
                    Value::Object(stage_metadata(&[
                        ("source", json!("document_analysis_only")),
                        ("document_citations", json!(analysis.citations)),
                    ])),
                );
                self.memory.save_exchange(
                    &state.session_id,
                    &state.question,
                    &analysis.content,
                    DOCUMENT_ANALYSIS_KEY,
                    state.metadata.clone(),
                );
                return;
            }
        }

        if let Err(e) = self.consolidate(state).await {
            error!("❌ Error en evaluador: {e}");
            let primary = state
                .response(specialist_for(state.legal_area).as_str())
                .cloned();
            match primary {
                Some(response) => {
                    state.finalize(response.content, response.confidence, response.suggestions);
                }
                None => {
                    state.finalize(APOLOGY.to_string(), 0.1, retry_suggestions());
                }
            }
            state.metadata.insert(
                "evaluation".into(),
                Value::Object(stage_metadata(&[
                    ("source", json!("fallback")),
                    ("error", json!(e.to_string())),
                ])),
            );
        }
    }

    async fn consolidate(&self, state: &mut PipelineState) -> Result<()> {
        let conversation_context = self.conversation_context(state);

        let mut vars = PromptVars::new();
        vars.insert("question", state.question.clone());
        vars.insert(
            "agent_responses",
            serde_json::to_string(state.responses()).unwrap_or_default(),
        );
        vars.insert("conversation_context", conversation_context);
        vars.insert("has_specific_documents", state.has_specific_documents.to_string());

        let text = self.completion.complete(&EVALUATOR, &vars).await?;
        if text.trim().is_empty() {
            return Err(anyhow!("Respuesta vacía del evaluador"));
        }

        let (answer, confidence, suggestions, evaluation) = match Completion::<Evaluation>::parse(&text) {
            Completion::Structured(parsed) => {
                if parsed.final_answer.trim().is_empty() {
                    return Err(anyhow!("El evaluador devolvió una respuesta final vacía"));
                }
                let confidence = parsed.confidence.unwrap_or_else(|| mean_confidence(state));
                let value = serde_json::to_value(&parsed).unwrap_or(Value::Null);
                (parsed.final_answer, confidence, parsed.suggestions, value)
            }
            Completion::Raw(raw) => {
                warn!("⚠️ Evaluador sin JSON válido, se usa el texto como respuesta");
                (
                    raw,
                    RAW_EVALUATION_CONFIDENCE,
                    generic_suggestions(),
                    json!({ "context_summary": "Respuesta procesada sin formato JSON" }),
                )
            }
        };

        state.finalize(answer.clone(), confidence, suggestions);
        let mut evaluation = match evaluation {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        evaluation.insert("timestamp".into(), Value::String(Utc::now().to_rfc3339()));
        state.metadata.insert("evaluation".into(), Value::Object(evaluation));

        self.memory.save_exchange(
            &state.session_id,
            &state.question,
            &answer,
            state.legal_area.as_str(),
            state.metadata.clone(),
        );
        info!("✅ Evaluación completada");
        Ok(())
    }
}
