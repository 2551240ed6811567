//! Conexión a Neo4j y esquema mínimo del índice de legislación.

use crate::config::AppConfig;
use anyhow::{Context, Result};
use neo4rs::{query, Graph};
use tracing::{debug, info};
use url::Url;

pub async fn connect_from_config(cfg: &AppConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.neo4j_uri)
        .with_context(|| format!("NEO4J_URI inválida: {}", cfg.neo4j_uri))?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.neo4j_user, &cfg.neo4j_password)
        .await
        .with_context(|| format!("No se pudo conectar a Neo4j en {addr}"))?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Constraints de unicidad para `:Document` y `:Chunk`, más los índices de
/// propiedad que usan las búsquedas acotadas (documento, usuario y área).
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        "CREATE CONSTRAINT legal_document_id IF NOT EXISTS
         FOR (d:Document) REQUIRE d.id IS UNIQUE",
        "CREATE CONSTRAINT legal_chunk_id IF NOT EXISTS
         FOR (c:Chunk) REQUIRE c.id IS UNIQUE",
        "CREATE INDEX chunk_document_id IF NOT EXISTS
         FOR (c:Chunk) ON (c.document_id)",
        "CREATE INDEX chunk_user_id IF NOT EXISTS
         FOR (c:Chunk) ON (c.user_id)",
        "CREATE INDEX chunk_area IF NOT EXISTS
         FOR (c:Chunk) ON (c.area)",
    ];

    for stmt in statements {
        debug!("Esquema: {}", stmt.split_whitespace().take(4).collect::<Vec<_>>().join(" "));
        graph.run(query(stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado ({} sentencias).", statements.len());
    Ok(())
}

/// Health check mínimo usado por `/api/status`.
pub async fn ping(graph: &Graph) -> bool {
    graph.run(query("RETURN 1")).await.is_ok()
}
