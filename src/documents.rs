//! Almacén de documentos subidos por los usuarios.
//!
//! El núcleo sólo consume el trait [`DocumentStore`]. `LocalDocumentStore`
//! lee del sistema de archivos con la disposición
//! `<raíz>/<user_id>/<document_id>_<nombre_fichero>`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mime_guess::MimeGuess;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::models::{DocumentInfo, ExtractionMetadata};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document_text(&self, document_id: &str) -> Result<(String, ExtractionMetadata)>;
    async fn get_user_documents(&self, user_id: &str) -> Result<Vec<DocumentInfo>>;
}

/// Extrae texto de un fichero según su extensión. `Ok(None)` si el formato no se soporta.
pub fn extract_text(path: &Path) -> Result<Option<(String, &'static str)>> {
    let extension = path.extension().and_then(std::ffi::OsStr::to_str).unwrap_or("");

    match extension.to_lowercase().as_str() {
        "pdf" => {
            let text = pdf_extract::extract_text(path)
                .map_err(|e| anyhow!("No se pudo extraer texto del PDF {}: {e}", path.display()))?;
            Ok(Some((text, "pdf-extract")))
        }
        "txt" | "md" | "text" => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Fichero no-texto o no-UTF8: {}", path.display()))?;
            Ok(Some((text, "plain-text")))
        }
        _ => Ok(None),
    }
}

pub struct LocalDocumentStore {
    root: PathBuf,
}

impl LocalDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn find_document(&self, document_id: &str) -> Option<PathBuf> {
        let prefix = format!("{document_id}_");
        WalkDir::new(&self.root)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .find(|e| e.file_name().to_string_lossy().starts_with(&prefix))
            .map(|e| e.into_path())
    }
}

/// Los identificadores se usan como componentes de ruta: nada de separadores ni `..`.
fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
        return Err(anyhow!("Identificador de {kind} inválido: '{id}'"));
    }
    Ok(())
}

/// Separa `<id>_<nombre>`. Los ids son UUID, así que el primer '_' delimita.
fn split_stored_name(name: &str) -> Option<(&str, &str)> {
    name.split_once('_').filter(|(id, file)| !id.is_empty() && !file.is_empty())
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn get_document_text(&self, document_id: &str) -> Result<(String, ExtractionMetadata)> {
        validate_id("documento", document_id)?;
        let path = self
            .find_document(document_id)
            .ok_or_else(|| anyhow!("Documento no encontrado: {document_id}"))?;

        let stored_name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let filename = split_stored_name(&stored_name)
            .map(|(_, file)| file.to_string())
            .unwrap_or(stored_name);

        let extraction_path = path.clone();
        let extracted = tokio::task::spawn_blocking(move || extract_text(&extraction_path))
            .await
            .map_err(|e| anyhow!("Tarea de extracción abortada: {e}"))??;

        let (text, method) = extracted
            .ok_or_else(|| anyhow!("Formato no soportado para extracción: {}", path.display()))?;
        debug!("📄 Texto extraído de {filename}: {} caracteres", text.chars().count());

        let metadata = ExtractionMetadata {
            filename,
            method: method.to_string(),
            characters: text.chars().count(),
        };
        Ok((text, metadata))
    }

    async fn get_user_documents(&self, user_id: &str) -> Result<Vec<DocumentInfo>> {
        validate_id("usuario", user_id)?;
        let dir = self.root.join(user_id);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut documents = Vec::new();
        for entry in fs::read_dir(&dir)?.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let Some((id, filename)) = split_stored_name(&name) else {
                warn!("Fichero con nombre inesperado en {}: {name}", dir.display());
                continue;
            };
            let metadata = entry.metadata()?;
            let uploaded: DateTime<Utc> = metadata
                .modified()
                .ok()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(Utc::now);

            documents.push(DocumentInfo {
                id: id.to_string(),
                filename: filename.to_string(),
                size_bytes: metadata.len(),
                mime_type: MimeGuess::from_path(&path).first().map(|m| m.to_string()),
                uploaded_at: uploaded.to_rfc3339(),
            });
        }
        documents.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(documents)
    }
}
