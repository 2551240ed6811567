//! Memoria de conversación por sesión: historial acotado de intercambios
//! y contexto resumido para los agentes.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::models::{ConversationExchange, SessionSummary};

pub const NEW_CONVERSATION: &str = "Nueva conversación iniciada.";
pub const DEFAULT_CONTEXT_EXCHANGES: usize = 5;
const ANSWER_PREVIEW_CHARS: usize = 200;

/// Almacén en memoria `{session_id -> [intercambio...]}`. Vive lo que vive el proceso.
pub struct ConversationMemory {
    sessions: Mutex<HashMap<String, VecDeque<ConversationExchange>>>,
    max_history: usize,
}

impl ConversationMemory {
    pub fn new(max_history: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_history: max_history.max(1),
        }
    }

    /// Contexto de los últimos `max_exchanges` intercambios, listo para un prompt.
    pub fn get_context(&self, session_id: &str, max_exchanges: usize) -> String {
        let sessions = self.lock();
        let Some(history) = sessions.get(session_id) else {
            return NEW_CONVERSATION.to_string();
        };

        let skip = history.len().saturating_sub(max_exchanges);
        let mut parts = Vec::new();
        for (i, exchange) in history.iter().skip(skip).enumerate() {
            parts.push(format!("Intercambio {}:", i + 1));
            parts.push(format!("Pregunta: {}", exchange.question));
            parts.push(format!("Respuesta: {}...", truncate_chars(&exchange.answer, ANSWER_PREVIEW_CHARS)));
            parts.push(format!("Área legal: {}", exchange.legal_area));
            parts.push("---".to_string());
        }
        parts.join("\n")
    }

    pub fn save_exchange(
        &self,
        session_id: &str,
        question: &str,
        answer: &str,
        legal_area: &str,
        metadata: Map<String, Value>,
    ) {
        let exchange = ConversationExchange {
            timestamp: Utc::now(),
            question: question.to_string(),
            answer: answer.to_string(),
            legal_area: legal_area.to_string(),
            metadata,
        };

        let mut sessions = self.lock();
        let history = sessions.entry(session_id.to_string()).or_default();
        history.push_back(exchange);
        while history.len() > self.max_history {
            history.pop_front();
        }
        info!("Intercambio guardado para sesión {session_id} ({} en historial)", history.len());
    }

    /// Borra el historial. Devuelve `false` si la sesión no existía.
    pub fn clear(&self, session_id: &str) -> bool {
        let removed = self.lock().remove(session_id).is_some();
        if removed {
            info!("🧹 Historial de conversación limpiado para sesión {session_id}");
        }
        removed
    }

    pub fn summary(&self, session_id: &str) -> SessionSummary {
        let sessions = self.lock();
        match sessions.get(session_id) {
            Some(history) => {
                let topics: BTreeSet<String> =
                    history.iter().map(|e| e.legal_area.clone()).collect();
                SessionSummary {
                    exchanges: history.len(),
                    topics: topics.into_iter().collect(),
                    last_activity: history.back().map(|e| e.timestamp),
                }
            }
            None => SessionSummary {
                exchanges: 0,
                topics: Vec::new(),
                last_activity: None,
            },
        }
    }

    pub fn has_history(&self, session_id: &str) -> bool {
        self.lock().get(session_id).is_some_and(|h| !h.is_empty())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<ConversationExchange>>> {
        // Los datos son de mejor esfuerzo: un lock envenenado no debe tumbar la consulta.
        self.sessions.lock().unwrap_or_else(|poisoned| {
            warn!("Mutex de memoria envenenado; se recupera el estado");
            poisoned.into_inner()
        })
    }
}

/// Trunca por caracteres (no por bytes) para no partir UTF-8.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn save(memory: &ConversationMemory, session: &str, n: usize, area: &str) {
        memory.save_exchange(session, &format!("pregunta {n}"), &format!("respuesta {n}"), area, Map::new());
    }

    #[test]
    fn unknown_session_is_a_new_conversation() {
        let memory = ConversationMemory::new(20);
        assert_eq!(memory.get_context("nadie", 5), NEW_CONVERSATION);
        assert_eq!(memory.summary("nadie").exchanges, 0);
        assert!(!memory.clear("nadie"));
    }

    #[test]
    fn history_is_bounded_to_most_recent() {
        let memory = ConversationMemory::new(20);
        for n in 1..=25 {
            save(&memory, "s1", n, "laboral");
        }
        assert_eq!(memory.summary("s1").exchanges, 20);

        let context = memory.get_context("s1", 25);
        assert!(!context.contains("pregunta 5\n"));
        assert!(context.contains("Pregunta: pregunta 6\n"));
        assert!(context.contains("Pregunta: pregunta 25\n"));
        assert_eq!(context.matches("Intercambio ").count(), 20);
    }

    #[test]
    fn context_renders_last_exchanges_numbered() {
        let memory = ConversationMemory::new(20);
        for n in 1..=7 {
            save(&memory, "s2", n, "civil");
        }
        let context = memory.get_context("s2", 5);
        assert!(context.starts_with("Intercambio 1:\nPregunta: pregunta 3"));
        assert!(context.contains("Intercambio 5:\nPregunta: pregunta 7"));
        assert!(context.contains("Área legal: civil"));
    }

    #[test]
    fn long_answers_are_truncated_in_context() {
        let memory = ConversationMemory::new(20);
        let answer = "á".repeat(500);
        memory.save_exchange("s3", "q", &answer, "civil", Map::new());
        let context = memory.get_context("s3", 5);
        let expected = format!("Respuesta: {}...", "á".repeat(200));
        assert!(context.contains(&expected));
    }

    #[test]
    fn summary_lists_distinct_topics_and_clear_works() {
        let memory = ConversationMemory::new(20);
        save(&memory, "s4", 1, "laboral");
        save(&memory, "s4", 2, "tributario");
        save(&memory, "s4", 3, "laboral");

        let summary = memory.summary("s4");
        assert_eq!(summary.exchanges, 3);
        assert_eq!(summary.topics, vec!["laboral".to_string(), "tributario".to_string()]);
        assert!(summary.last_activity.is_some());
        assert!(memory.has_history("s4"));

        assert!(memory.clear("s4"));
        assert!(!memory.has_history("s4"));
    }
}
