//! Ingesta de texto legal en el índice vectorial.
//!
//! - `structural_chunks`: troceado que respeta la estructura del documento
//!   (cláusulas, artículos, ordinales, títulos en mayúsculas).
//! - `ingest_directory`: carga la base de conocimiento del sistema desde un
//!   directorio organizado por áreas (`<raíz>/<área>/<fichero>`).
//! - `ingest_user_document`: indexa un documento subido por un usuario.

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};
use regex::Regex;
use tracing::{error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::{
    app_state::Status,
    documents::{self, DocumentStore},
    models::Provenance,
    vector_store::{ChunkMetadata, IndexDocument, VectorIndex},
};

pub const MAX_CHUNK_CHARS: usize = 2000;

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default)]
pub struct IngestionSummary {
    pub files_scanned: u32,
    pub files_ingested: u32,
    pub files_skipped: u32,
    pub chunks_created: usize,
}

impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} ficheros escaneados, {} ingeridos, {} omitidos. {} chunks creados.",
            self.files_scanned, self.files_ingested, self.files_skipped, self.chunks_created
        )
    }
}

/// Marcadores de inicio de sección en textos legales colombianos.
struct SectionMarkers {
    patterns: Vec<Regex>,
}

impl SectionMarkers {
    fn new() -> Self {
        let sources = [
            r"(?i)^\s*(CLÁUSULA|CLAUSULA)\s+[IVX\d]+[.\-\s]",
            r"(?i)^\s*(ARTÍCULO|ARTICULO)\s+[IVX\d]+[.\-\s]",
            r"(?i)^\s*(PRIMERA|SEGUNDA|TERCERA|CUARTA|QUINTA|SEXTA|SÉPTIMA|SEPTIMA|OCTAVA|NOVENA|DÉCIMA|DECIMA)\b",
            r"^\s*[IVX]+[.\-\s]",
            r"^\s*\d+[.\-\s]",
            r"^\s*[A-ZÁÉÍÓÚÑ][A-ZÁÉÍÓÚÑ\s]+:",
            r"^\s*(PROPIEDAD|INTELECTUAL|DERECHOS)\b",
        ];
        Self {
            patterns: sources
                .iter()
                .map(|p| Regex::new(p).expect("patrón de sección válido"))
                .collect(),
        }
    }

    fn is_section_start(&self, line: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(line))
    }
}

/// Trocea un texto en chunks de ~`max_chars`, cortando preferentemente en
/// marcadores de sección. Si un chunk supera 1.5×`max_chars` se parte a ancho
/// fijo; si el texto no tiene ningún marcador, o todo queda en un único chunk
/// demasiado grande, se trocea entero a ancho fijo.
pub fn structural_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let markers = SectionMarkers::new();
    let hard_limit = max_chars + max_chars / 2;

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    let mut any_marker = false;

    for line in text.lines() {
        let is_section = markers.is_section_start(line);
        any_marker |= is_section;

        if is_section && current_len > max_chars {
            push_trimmed(&mut chunks, &current);
            current.clear();
            current_len = 0;
        }

        current.push_str(line);
        current.push('\n');
        current_len += line.chars().count() + 1;

        // Una sola línea puede superar el límite (típico de pdf-extract).
        if current_len > hard_limit {
            for slice in fixed_width_chunks(&current, max_chars) {
                push_trimmed(&mut chunks, &slice);
            }
            current.clear();
            current_len = 0;
        }
    }
    push_trimmed(&mut chunks, &current);

    let single_oversized = chunks.len() == 1 && chunks[0].chars().count() > max_chars;
    if (!any_marker || single_oversized) && text.chars().count() > max_chars {
        info!("No se encontraron patrones de estructura, usando chunking de ancho fijo");
        return fixed_width_chunks(text, max_chars);
    }

    chunks
}

fn push_trimmed(chunks: &mut Vec<String>, chunk: &str) {
    let trimmed = chunk.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn fixed_width_chunks(text: &str, width: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(width.max(1))
        .map(|c| c.iter().collect::<String>())
        .filter(|c| !c.trim().is_empty())
        .collect()
}

/// Recorre recursivamente un directorio de legislación y lo añade al índice
/// como base de conocimiento del sistema.
pub async fn ingest_directory(
    index: &dyn VectorIndex,
    root: &Path,
    status_arc: Arc<Mutex<Status>>,
) -> Result<IngestionSummary> {
    if !root.is_dir() {
        return Err(anyhow!(
            "La ruta no es un directorio: {}",
            root.display()
        ));
    }

    let mut summary = IngestionSummary::default();
    let file_entries: Vec<_> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .collect();

    let total_files = file_entries.len().max(1) as f32;

    for (index_pos, entry) in file_entries.iter().enumerate() {
        summary.files_scanned += 1;
        let path = entry.path();
        let filename = path.file_name().unwrap_or_default().to_string_lossy().to_string();
        let progress = (index_pos + 1) as f32 / total_files;

        update_status(&status_arc, format!(
            "[{}/{}] Procesando: {}...",
            index_pos + 1,
            file_entries.len(),
            filename
        ), progress);

        // El área es el primer subdirectorio bajo la raíz (civil/, laboral/, ...).
        let area = path
            .strip_prefix(root)
            .ok()
            .and_then(|rel| {
                let mut components = rel.components();
                let first = components.next()?;
                components.next().map(|_| first.as_os_str().to_string_lossy().to_string())
            });

        match ingest_file(index, path, &filename, area).await {
            Ok(Some(chunks)) => {
                summary.files_ingested += 1;
                summary.chunks_created += chunks;
            }
            Ok(None) => {
                summary.files_skipped += 1;
                update_status(&status_arc, format!(
                    "[{}/{}] Omitido: {}",
                    index_pos + 1,
                    file_entries.len(),
                    filename
                ), progress);
            }
            Err(err) => {
                summary.files_skipped += 1;
                error!("Error ingiriendo {}: {err}", path.display());
                update_status(&status_arc, format!("ERROR en {}: {}", path.display(), err), progress);
            }
        }
    }

    Ok(summary)
}

async fn ingest_file(
    index: &dyn VectorIndex,
    path: &Path,
    filename: &str,
    area: Option<String>,
) -> Result<Option<usize>> {
    let text = match documents::extract_text(path) {
        Ok(Some((text, _))) => text,
        Ok(None) => {
            info!("Saltando fichero con extensión no soportada: {}", path.display());
            return Ok(None);
        }
        Err(e) => {
            warn!("{e}. Saltando fichero.");
            return Ok(None);
        }
    };

    let document_id = Uuid::new_v4().to_string();
    let chunks = structural_chunks(&text, MAX_CHUNK_CHARS);
    if chunks.is_empty() {
        warn!("Fichero vacío o sin texto útil: {}", path.display());
        return Ok(None);
    }

    let docs = chunks
        .into_iter()
        .enumerate()
        .map(|(i, content)| IndexDocument {
            content,
            metadata: ChunkMetadata {
                document_id: Some(document_id.clone()),
                filename: Some(filename.to_string()),
                source: Provenance::System,
                user_id: None,
                chunk_index: Some(i as i64),
                area: area.clone(),
            },
        })
        .collect();

    let added = index.add_documents(docs).await?;
    info!("Ingerido {} con {} chunks.", path.display(), added);
    Ok(Some(added))
}

/// Indexa un documento subido por un usuario a partir de su texto extraído.
pub async fn ingest_user_document(
    index: &dyn VectorIndex,
    store: &dyn DocumentStore,
    user_id: &str,
    document_id: &str,
) -> Result<usize> {
    let (text, extraction) = store.get_document_text(document_id).await?;
    let chunks = structural_chunks(&text, MAX_CHUNK_CHARS);
    if chunks.is_empty() {
        return Err(anyhow!("El documento {document_id} no contiene texto indexable"));
    }

    let docs = chunks
        .into_iter()
        .enumerate()
        .map(|(i, content)| IndexDocument {
            content,
            metadata: ChunkMetadata {
                document_id: Some(document_id.to_string()),
                filename: Some(extraction.filename.clone()),
                source: Provenance::UserUpload,
                user_id: Some(user_id.to_string()),
                chunk_index: Some(i as i64),
                area: None,
            },
        })
        .collect();

    let added = index.add_documents(docs).await?;
    info!("✅ Documento {document_id} añadido al índice con {added} chunks");
    Ok(added)
}

fn update_status(status_arc: &Arc<Mutex<Status>>, message: String, progress: f32) {
    if let Ok(mut status) = status_arc.lock() {
        status.message = message;
        status.progress = progress;
    }
}
