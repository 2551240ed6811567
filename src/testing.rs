//! Dobles de prueba de los colaboradores externos (índice, LLM y documentos).

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::documents::DocumentStore;
use crate::llm::{CompletionService, PromptTemplate, PromptVars};
use crate::models::{DocumentInfo, ExtractionMetadata, Provenance};
use crate::vector_store::{ChunkMetadata, IndexDocument, ScoredChunk, VectorIndex};

/// Construye un resultado de búsqueda con los metadatos mínimos.
pub fn hit(
    content: &str,
    score: f64,
    document_id: Option<&str>,
    filename: &str,
    source: Provenance,
) -> ScoredChunk {
    let mut metadata = ChunkMetadata::new(source);
    metadata.document_id = document_id.map(str::to_string);
    metadata.filename = Some(filename.to_string());
    ScoredChunk {
        content: content.to_string(),
        metadata,
        score,
    }
}

pub struct FakeIndex {
    hits: Vec<ScoredChunk>,
    fail: bool,
    searches: Mutex<Vec<(String, usize)>>,
    added: Mutex<Vec<IndexDocument>>,
}

impl FakeIndex {
    pub fn new(hits: Vec<ScoredChunk>) -> Self {
        Self {
            hits,
            fail: false,
            searches: Mutex::new(Vec::new()),
            added: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn searches(&self) -> Vec<(String, usize)> {
        self.searches.lock().unwrap().clone()
    }

    pub fn added(&self) -> Vec<IndexDocument> {
        self.added.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorIndex for FakeIndex {
    async fn similarity_search_with_score(&self, text: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        self.searches.lock().unwrap().push((text.to_string(), k));
        if self.fail {
            return Err(anyhow!("índice no disponible"));
        }
        Ok(self.hits.iter().take(k).cloned().collect())
    }

    async fn add_documents(&self, documents: Vec<IndexDocument>) -> Result<usize> {
        if self.fail {
            return Err(anyhow!("índice no disponible"));
        }
        let count = documents.len();
        self.added.lock().unwrap().extend(documents);
        Ok(count)
    }
}

/// Completado con respuestas fijas por nombre de plantilla.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: HashMap<&'static str, std::result::Result<String, String>>,
    calls: Mutex<Vec<(&'static str, PromptVars)>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(mut self, template: &'static str, text: &str) -> Self {
        self.replies.insert(template, Ok(text.to_string()));
        self
    }

    pub fn with_failure(mut self, template: &'static str, message: &str) -> Self {
        self.replies.insert(template, Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<(&'static str, PromptVars)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, template: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|(name, _)| *name == template)
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, template: &PromptTemplate, vars: &PromptVars) -> Result<String> {
        self.calls.lock().unwrap().push((template.name, vars.clone()));
        match self.replies.get(template.name) {
            Some(Ok(text)) => Ok(text.clone()),
            Some(Err(message)) => Err(anyhow!(message.clone())),
            None => Err(anyhow!("sin respuesta programada para '{}'", template.name)),
        }
    }
}

#[derive(Default)]
pub struct FakeDocumentStore {
    texts: HashMap<String, (String, String)>,
    owners: HashMap<String, Vec<DocumentInfo>>,
    fail: bool,
    text_requests: Mutex<Vec<String>>,
}

impl FakeDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_document(mut self, id: &str, filename: &str, text: &str) -> Self {
        self.texts
            .insert(id.to_string(), (filename.to_string(), text.to_string()));
        self
    }

    /// Registra el documento y lo asigna a `user_id`.
    pub fn with_user_document(mut self, user_id: &str, id: &str, filename: &str, text: &str) -> Self {
        self.owners
            .entry(user_id.to_string())
            .or_default()
            .push(document_info(id, filename));
        self.with_document(id, filename, text)
    }

    pub fn text_requests(&self) -> Vec<String> {
        self.text_requests.lock().unwrap().clone()
    }
}

pub fn document_info(id: &str, filename: &str) -> DocumentInfo {
    DocumentInfo {
        id: id.to_string(),
        filename: filename.to_string(),
        size_bytes: 0,
        mime_type: None,
        uploaded_at: "2024-01-01T00:00:00+00:00".to_string(),
    }
}

#[async_trait]
impl DocumentStore for FakeDocumentStore {
    async fn get_document_text(&self, document_id: &str) -> Result<(String, ExtractionMetadata)> {
        self.text_requests.lock().unwrap().push(document_id.to_string());
        if self.fail {
            return Err(anyhow!("almacén no disponible"));
        }
        let (filename, text) = self
            .texts
            .get(document_id)
            .ok_or_else(|| anyhow!("Documento no encontrado: {document_id}"))?;
        Ok((
            text.clone(),
            ExtractionMetadata {
                filename: filename.clone(),
                method: "fake".to_string(),
                characters: text.chars().count(),
            },
        ))
    }

    async fn get_user_documents(&self, user_id: &str) -> Result<Vec<DocumentInfo>> {
        if self.fail {
            return Err(anyhow!("almacén no disponible"));
        }
        Ok(self.owners.get(user_id).cloned().unwrap_or_default())
    }
}
