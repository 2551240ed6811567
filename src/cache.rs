//! Caché en memoria de resultados completos del pipeline, con TTL y
//! desalojo por uso (menor `access_count`, luego `last_accessed` más antiguo).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::memory::truncate_chars;
use crate::models::QueryResult;

const MIN_CONFIDENCE: f64 = 0.7;
const MIN_QUESTION_CHARS: usize = 10;
const MAX_QUESTION_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub response: QueryResult,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub question_preview: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub max_size: usize,
    pub total_accesses: u64,
    pub average_accesses: f64,
    pub ttl_hours: i64,
}

pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    max_size: usize,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(max_size: usize, ttl_hours: i64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_size: max_size.max(1),
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// Huella de la consulta: SHA-256 de la pregunta normalizada y el discriminador de contexto.
    pub fn fingerprint(question: &str, discriminator: &str) -> String {
        let normalized = question.trim().to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update(b"|");
        hasher.update(discriminator.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, question: &str, discriminator: &str) -> Option<QueryResult> {
        self.get_at(question, discriminator, Utc::now())
    }

    pub fn get_at(&self, question: &str, discriminator: &str, now: DateTime<Utc>) -> Option<QueryResult> {
        let key = Self::fingerprint(question, discriminator);
        let mut entries = self.lock();

        let expired = match entries.get(&key) {
            None => return None,
            Some(entry) => entry.created_at + self.ttl < now,
        };
        if expired {
            entries.remove(&key);
            info!("🗑️ Entrada de caché expirada y eliminada: {}...", &key[..8]);
            return None;
        }

        let entry = entries.get_mut(&key)?;
        entry.last_accessed = now;
        entry.access_count += 1;
        info!("✅ Cache hit para: {}...", truncate_chars(question, 50));
        Some(entry.response.clone())
    }

    pub fn set(&self, question: &str, response: QueryResult, discriminator: &str) {
        self.set_at(question, response, discriminator, Utc::now());
    }

    pub fn set_at(&self, question: &str, response: QueryResult, discriminator: &str, now: DateTime<Utc>) {
        let key = Self::fingerprint(question, discriminator);
        let mut entries = self.lock();

        if !entries.contains_key(&key) && entries.len() >= self.max_size {
            evict_least_used(&mut entries);
        }

        entries.insert(
            key,
            CacheEntry {
                response,
                created_at: now,
                last_accessed: now,
                access_count: 1,
                question_preview: truncate_chars(question, 100).to_string(),
            },
        );
        info!("💾 Respuesta cacheada para: {}...", truncate_chars(question, 50));
    }

    /// Sólo se cachean respuestas confiables, preguntas de longitud razonable y sin error.
    pub fn should_cache(&self, question: &str, result: &QueryResult) -> bool {
        if result.confidence < MIN_CONFIDENCE {
            return false;
        }
        let len = question.trim().chars().count();
        if !(MIN_QUESTION_CHARS..=MAX_QUESTION_CHARS).contains(&len) {
            return false;
        }
        result.metadata.error.is_none()
    }

    pub fn clear_expired(&self) -> usize {
        self.clear_expired_at(Utc::now())
    }

    pub fn clear_expired_at(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at + ttl >= now);
        let removed = before - entries.len();
        if removed > 0 {
            info!("🧹 {removed} entradas expiradas eliminadas de la caché");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.lock();
        let total_entries = entries.len();
        let total_accesses: u64 = entries.values().map(|e| e.access_count).sum();
        CacheStats {
            total_entries,
            max_size: self.max_size,
            total_accesses,
            average_accesses: if total_entries > 0 {
                total_accesses as f64 / total_entries as f64
            } else {
                0.0
            },
            ttl_hours: self.ttl.num_hours(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("Mutex de caché envenenado; se recupera el estado");
            poisoned.into_inner()
        })
    }
}

fn evict_least_used(entries: &mut HashMap<String, CacheEntry>) {
    let victim = entries
        .iter()
        .min_by(|(_, a), (_, b)| {
            a.access_count
                .cmp(&b.access_count)
                .then(a.last_accessed.cmp(&b.last_accessed))
        })
        .map(|(key, _)| key.clone());

    if let Some(key) = victim {
        entries.remove(&key);
        info!("🗑️ Desalojada la entrada menos usada de la caché: {}...", &key[..8]);
    }
}
