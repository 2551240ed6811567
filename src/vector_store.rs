//! Integración con Neo4j como índice vectorial para los `:Chunk`.
//!
//! API pública:
//!   - trait `VectorIndex` (lo que consume el motor de recuperación)
//!   - `ensure_chunk_vector_index(&Graph)`
//!   - `Neo4jVectorIndex`, implementación real sobre `db.index.vector.queryNodes`.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use neo4rs::{query, Graph};
use tracing::info;
use uuid::Uuid;

use crate::llm::LlmManager;
use crate::models::Provenance;

const INDEX_NAME: &str = "chunkEmbeddingIndex";

/// Metadatos guardados junto a cada chunk indexado.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMetadata {
    pub document_id: Option<String>,
    pub filename: Option<String>,
    pub source: Provenance,
    pub user_id: Option<String>,
    pub chunk_index: Option<i64>,
    pub area: Option<String>,
}

impl ChunkMetadata {
    pub fn new(source: Provenance) -> Self {
        Self {
            document_id: None,
            filename: None,
            source,
            user_id: None,
            chunk_index: None,
            area: None,
        }
    }
}

/// Documento (chunk) a añadir al índice.
#[derive(Debug, Clone)]
pub struct IndexDocument {
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Resultado de una búsqueda por similitud.
/// `score` es la similitud normalizada en [0, 1]: mayor = más parecido.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub content: String,
    pub metadata: ChunkMetadata,
    pub score: f64,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn similarity_search_with_score(&self, text: &str, k: usize) -> Result<Vec<ScoredChunk>>;

    /// Devuelve el número de chunks añadidos.
    async fn add_documents(&self, documents: Vec<IndexDocument>) -> Result<usize>;
}

/// Garantiza que el índice vectorial sobre `:Chunk(embedding)` exista.
pub async fn ensure_chunk_vector_index(graph: &Graph) -> Result<()> {
    // ¿Ya existe el índice? Usamos la sintaxis moderna SHOW VECTOR INDEXES.
    let mut cursor = graph
        .execute(
            query("SHOW VECTOR INDEXES YIELD name WHERE name = $name RETURN name")
            .param("name", INDEX_NAME),
        )
        .await?;

    if cursor.next().await?.is_some() {
        info!("Índice vectorial '{INDEX_NAME}' ya existe.");
        return Ok(());
    }

    let cypher = format!(
        "\
CREATE VECTOR INDEX {INDEX_NAME}
FOR (c:Chunk)
ON (c.embedding)
OPTIONS {{
  indexConfig: {{
    `vector.dimensions`: 1536,
    `vector.similarity_function`: 'cosine'
  }}
}}"
    );

    graph.run(query(&cypher)).await?;
    info!("Índice vectorial '{INDEX_NAME}' creado.");

    Ok(())
}

pub struct Neo4jVectorIndex {
    graph: Arc<Graph>,
    llm: LlmManager,
}

impl Neo4jVectorIndex {
    pub fn new(graph: Arc<Graph>, llm: LlmManager) -> Self {
        Self { graph, llm }
    }
}

#[async_trait]
impl VectorIndex for Neo4jVectorIndex {
    async fn similarity_search_with_score(&self, text: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        // 1) Embedding de la query
        let query_vec = self.llm.embed_query(text).await?;

        // 2) Vector search en Neo4j
        let mut cursor = self.graph.execute(
            query(
                "CALL db.index.vector.queryNodes($index_name, $k, $embedding)
                 YIELD node, score
                 RETURN node.text AS text, score,
                        node.document_id AS document_id, node.filename AS filename,
                        node.source AS source, node.user_id AS user_id,
                        node.chunk_index AS chunk_index, node.area AS area
                 ORDER BY score DESC"
            )
            .param("index_name", INDEX_NAME)
            .param("k", k as i64)
            .param("embedding", query_vec),
        ).await?;

        // 3) Convertir filas a ScoredChunk
        let mut output = Vec::new();
        while let Some(row) = cursor.next().await? {
            let text: String = row.get("text").ok_or_else(|| anyhow!("Falta campo 'text' en resultado de Neo4j"))?;
            let score: f64 = row.get("score").ok_or_else(|| anyhow!("Falta campo 'score' en resultado de Neo4j"))?;
            let source: String = row.get("source").unwrap_or_default();

            output.push(ScoredChunk {
                content: text,
                score: score.clamp(0.0, 1.0),
                metadata: ChunkMetadata {
                    document_id: non_empty(row.get("document_id")),
                    filename: non_empty(row.get("filename")),
                    source: Provenance::parse_lenient(&source),
                    user_id: non_empty(row.get("user_id")),
                    chunk_index: row.get("chunk_index"),
                    area: non_empty(row.get("area")),
                },
            });
        }

        Ok(output)
    }

    async fn add_documents(&self, documents: Vec<IndexDocument>) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }

        let pairs: Vec<(String, String)> = documents
            .iter()
            .map(|d| (Uuid::new_v4().to_string(), d.content.clone()))
            .collect();
        let embedded = self.llm.embed_chunks(&pairs).await?;

        let tx = self.graph.start_txn().await?;
        for (chunk, doc) in embedded.iter().zip(documents.iter()) {
            let meta = &doc.metadata;
            tx.run(
                query(
                    "MERGE (c:Chunk {id: $id})
                     SET c.text = $text, c.embedding = $embedding,
                         c.document_id = $document_id, c.filename = $filename,
                         c.source = $source, c.user_id = $user_id,
                         c.chunk_index = $chunk_index, c.area = $area
                     MERGE (d:Document {id: $document_id})
                     SET d.filename = $filename, d.source = $source
                     MERGE (d)-[:HAS_CHUNK]->(c)"
                )
                .param("id", chunk.id.clone())
                .param("text", chunk.text.clone())
                .param("embedding", chunk.vector.clone())
                .param("document_id", meta.document_id.clone().unwrap_or_default())
                .param("filename", meta.filename.clone().unwrap_or_default())
                .param("source", meta.source.as_str())
                .param("user_id", meta.user_id.clone().unwrap_or_default())
                .param("chunk_index", meta.chunk_index.unwrap_or(0))
                .param("area", meta.area.clone().unwrap_or_default()),
            ).await?;
        }
        tx.commit().await?;

        info!("🔄 {} chunks añadidos al índice vectorial", embedded.len());
        Ok(embedded.len())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
