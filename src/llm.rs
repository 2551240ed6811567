//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro.
//!
//! El núcleo sólo ve el trait [`CompletionService`]; `LlmManager` es la
//! implementación real. Las salidas del modelo se interpretan con
//! [`Completion`], que separa la salida estructurada (JSON) del texto libre.

use std::collections::BTreeMap;

use crate::config::{AppConfig, LlmProvider};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Variables de sustitución de una plantilla (`{nombre}` -> valor).
pub type PromptVars = BTreeMap<&'static str, String>;

/// Plantilla de prompt: mensaje de sistema + mensaje humano.
#[derive(Debug)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub system: &'static str,
    pub human: &'static str,
}

impl PromptTemplate {
    /// Sustituye sólo las claves conocidas; las llaves literales del JSON de ejemplo se respetan.
    pub fn render(&self, vars: &PromptVars) -> (String, String) {
        (render_text(self.system, vars), render_text(self.human, vars))
    }
}

/// Una sola pasada: el texto ya sustituido (p. ej. un documento con `{question}`) no se reexpande.
fn render_text(text: &str, vars: &PromptVars) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let placeholder = after
            .find('}')
            .and_then(|end| vars.get(&after[..end]).map(|value| (end, value)));
        match placeholder {
            Some((end, value)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Servicio de completado de texto consumido por el pipeline.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, template: &PromptTemplate, vars: &PromptVars) -> Result<String>;
}

/// Resultado interpretado de un completado: JSON con la forma esperada o texto libre.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion<T> {
    Structured(T),
    Raw(String),
}

impl<T: DeserializeOwned> Completion<T> {
    /// Intenta leer `T` del texto (admite bloques ```json y texto alrededor del objeto).
    pub fn parse(text: &str) -> Self {
        let cleaned = text
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        if let Ok(value) = serde_json::from_str::<T>(cleaned) {
            return Completion::Structured(value);
        }

        // Objeto JSON rodeado de prosa: del primer '{' al último '}'.
        if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
            if start < end {
                if let Ok(value) = serde_json::from_str::<T>(&cleaned[start..=end]) {
                    return Completion::Structured(value);
                }
            }
        }

        debug!("Salida del LLM sin JSON válido, se usa como texto libre");
        Completion::raw(text.trim())
    }
}

impl<T> Completion<T> {
    /// Constructor explícito de la rama de texto libre.
    pub fn raw(text: impl Into<String>) -> Self {
        Completion::Raw(text.into())
    }
}

/// Resultado de un embedding de un chunk.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub id: String,
    pub text: String,
    pub vector: Vec<f64>,
}

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
    pub temperature: f64,
    pub max_tokens: u64,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            temperature: cfg.llm_temperature,
            max_tokens: cfg.llm_max_tokens,
        })
    }

    // ---------------------------------------------------------------------
    // EMBEDDINGS
    // ---------------------------------------------------------------------

    /// Calcula embeddings para una lista de (id, texto).
    ///
    /// Nota: sólo implementado para OpenAI. Para otros proveedores
    /// se podrían añadir ramas adicionales al `match`.
    pub async fn embed_chunks(
        &self,
        chunks: &[(String, String)],
    ) -> Result<Vec<EmbeddedChunk>> {
        match self.provider {
            LlmProvider::OpenAI => self.embed_with_openai(chunks).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para embeddings",
                other
            )),
        }
    }

    /// Embedding de una consulta suelta.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f64>> {
        let embedded = self
            .embed_chunks(&[("query".to_string(), text.to_string())])
            .await?;
        embedded
            .into_iter()
            .next()
            .map(|e| e.vector)
            .ok_or_else(|| anyhow!("No se pudo generar embedding de la query"))
    }

    async fn embed_with_openai(
        &self,
        chunks: &[(String, String)],
    ) -> Result<Vec<EmbeddedChunk>> {
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};
        // Trait para client.embedding_model(...)
        use rig::client::EmbeddingsClient as _;

        let client = openai::Client::from_env();

        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };

        let embedding_model = client.embedding_model(model_name);

        let texts: Vec<String> = chunks.iter().map(|(_, text)| text.clone()).collect();
        let embeddings = embedding_model.embed_texts(texts).await?;

        if embeddings.len() != chunks.len() {
            return Err(anyhow!(
                "Número de embeddings ({}) distinto al número de chunks ({})",
                embeddings.len(),
                chunks.len()
            ));
        }

        Ok(chunks
            .iter()
            .zip(embeddings.iter())
            .map(|((id, text), emb)| EmbeddedChunk {
                id: id.clone(),
                text: text.clone(),
                vector: emb.vec.clone(),
            })
            .collect())
    }

    // ---------------------------------------------------------------------
    // CHAT / COMPLETION
    // ---------------------------------------------------------------------

    async fn complete_with_openai(&self, system: &str, human: &str) -> Result<String> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = openai::Client::from_env();

        // Modelo de chat por defecto si no se ha configurado otro
        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let agent = client
            .agent(model_name)
            .preamble(system)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build();

        let answer = agent.prompt(human).await?;
        Ok(answer)
    }
}

#[async_trait]
impl CompletionService for LlmManager {
    async fn complete(&self, template: &PromptTemplate, vars: &PromptVars) -> Result<String> {
        let (system, human) = template.render(vars);
        match self.provider {
            LlmProvider::OpenAI => {
                let answer = self.complete_with_openai(&system, &human).await?;
                if answer.trim().is_empty() {
                    warn!("⚠️ Respuesta vacía del LLM para la plantilla '{}'", template.name);
                }
                Ok(answer)
            }
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para chat",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Area {
        legal_area: String,
    }

    #[test]
    fn parses_fenced_json() {
        let parsed: Completion<Area> = Completion::parse("```json\n{\"legal_area\": \"laboral\"}\n```");
        assert_eq!(parsed, Completion::Structured(Area { legal_area: "laboral".into() }));
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let parsed: Completion<Area> =
            Completion::parse("Claro, aquí tienes: {\"legal_area\": \"civil\"} espero que sirva");
        assert_eq!(parsed, Completion::Structured(Area { legal_area: "civil".into() }));
    }

    #[test]
    fn falls_back_to_raw_text() {
        let parsed: Completion<Area> = Completion::parse("  Es un asunto comercial.  ");
        assert_eq!(parsed, Completion::raw("Es un asunto comercial."));
    }

    #[test]
    fn render_replaces_only_known_keys() {
        let template = PromptTemplate {
            name: "t",
            system: "Contexto: {context}\nJSON: {\"a\": 1}",
            human: "{question}",
        };
        let mut vars = PromptVars::new();
        vars.insert("context", "ley".into());
        vars.insert("question", "¿qué?".into());
        let (system, human) = template.render(&vars);
        assert_eq!(system, "Contexto: ley\nJSON: {\"a\": 1}");
        assert_eq!(human, "¿qué?");
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let template = PromptTemplate {
            name: "t",
            system: "Contexto: {context}",
            human: "Pregunta: {question} {sin_valor}",
        };
        let mut vars = PromptVars::new();
        vars.insert("context", "el contrato cita {question} y {formatted_sources}".into());
        vars.insert("formatted_sources", "fuentes".into());
        vars.insert("question", "¿plazo?".into());
        let (system, human) = template.render(&vars);
        assert_eq!(system, "Contexto: el contrato cita {question} y {formatted_sources}");
        assert_eq!(human, "Pregunta: ¿plazo? {sin_valor}");
    }
}
