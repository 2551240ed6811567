//! Carga y gestión de configuración de la aplicación (Neo4j + LLM + caché y memoria).

use std::env;
use std::str::FromStr;
use anyhow::{anyhow, Result};

#[derive(Clone, Debug)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    pub llm_temperature: f64,
    pub llm_max_tokens: u64,

    /// Directorio raíz de los documentos subidos (`<dir>/<user_id>/<doc_id>_<fichero>`).
    pub documents_dir: String,
    /// Directorio con la legislación a indexar como base de conocimiento (`<dir>/<área>/...`).
    pub knowledge_base_dir: String,
    pub cache_max_size: usize,
    pub cache_ttl_hours: i64,
    pub memory_max_history: usize,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let neo4j_uri = env::var("NEO4J_URI")
            .map_err(|_| anyhow!("Falta NEO4J_URI en el entorno"))?;
        let neo4j_user = env::var("NEO4J_USER")
            .map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?;
        let neo4j_password = env::var("NEO4J_PASSWORD")
            .map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?;

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_embedding_model = env::var("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        Ok(Self {
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            server_addr,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
            llm_temperature: parse_var("LLM_TEMPERATURE", 0.1)?,
            llm_max_tokens: parse_var("LLM_MAX_TOKENS", 1500)?,
            documents_dir: env::var("DOCUMENTS_DIR").unwrap_or_else(|_| "uploads".to_string()),
            knowledge_base_dir: env::var("KNOWLEDGE_BASE_DIR")
                .unwrap_or_else(|_| "legislacion".to_string()),
            cache_max_size: parse_var("CACHE_MAX_SIZE", 50)?,
            cache_ttl_hours: parse_var("CACHE_TTL_HOURS", 12)?,
            memory_max_history: parse_var("MEMORY_MAX_HISTORY", 20)?,
        })
    }
}

/// Lee una variable numérica opcional; si existe pero no es válida, es un error.
fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| anyhow!("Valor inválido para {name}: '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parsing_is_case_insensitive() {
        assert!(matches!(LlmProvider::from_str("OpenAI").unwrap(), LlmProvider::OpenAI));
        assert!(LlmProvider::from_str("claude-local").is_err());
    }

    #[test]
    fn numeric_values_are_validated() {
        assert_eq!(parse_value::<usize>("CACHE_MAX_SIZE", " 75 ").unwrap(), 75);
        let err = parse_value::<usize>("CACHE_MAX_SIZE", "muchos").unwrap_err();
        assert!(err.to_string().contains("CACHE_MAX_SIZE"));
    }
}
