//! Modelos de dominio compartidos por el clasificador, la recuperación,
//! el pipeline de agentes y el servicio de orquestación.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Categoría de recuperación asignada por el clasificador de consultas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "constitución")]
    Constitucion,
    #[serde(rename = "laboral")]
    Laboral,
    #[serde(rename = "tributario")]
    Tributario,
    #[serde(rename = "contractual")]
    Contractual,
    #[serde(rename = "general")]
    General,
}

impl Category {
    /// Orden de evaluación del clasificador. En caso de empate gana la primera.
    pub const SCORED: [Category; 4] = [
        Category::Constitucion,
        Category::Laboral,
        Category::Tributario,
        Category::Contractual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Constitucion => "constitución",
            Category::Laboral => "laboral",
            Category::Tributario => "tributario",
            Category::Contractual => "contractual",
            Category::General => "general",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        }
    }

    /// Interpreta la complejidad devuelta por el coordinador. Desconocido => medium.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "simple" => Complexity::Simple,
            "complex" | "compleja" | "complejo" => Complexity::Complex,
            _ => Complexity::Medium,
        }
    }
}

/// Área legal que decide qué especialista atiende la consulta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegalArea {
    Civil,
    Comercial,
    Laboral,
    Tributario,
    Constitucional,
    Administrativo,
    General,
}

impl LegalArea {
    pub const SPECIALISTS: [LegalArea; 6] = [
        LegalArea::Civil,
        LegalArea::Comercial,
        LegalArea::Laboral,
        LegalArea::Tributario,
        LegalArea::Constitucional,
        LegalArea::Administrativo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LegalArea::Civil => "civil",
            LegalArea::Comercial => "comercial",
            LegalArea::Laboral => "laboral",
            LegalArea::Tributario => "tributario",
            LegalArea::Constitucional => "constitucional",
            LegalArea::Administrativo => "administrativo",
            LegalArea::General => "general",
        }
    }

    /// Cualquier valor no reconocido se trata como `general`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "civil" => LegalArea::Civil,
            "comercial" => LegalArea::Comercial,
            "laboral" => LegalArea::Laboral,
            "tributario" => LegalArea::Tributario,
            "constitucional" => LegalArea::Constitucional,
            "administrativo" => LegalArea::Administrativo,
            _ => LegalArea::General,
        }
    }
}

/// Procedencia de una fuente recuperada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Base de conocimiento del sistema (legislación indexada).
    System,
    /// Fragmento indexado de un documento subido por el usuario.
    UserUpload,
    /// Análisis directo del texto de un documento del usuario.
    DirectAnalysis,
    /// Contexto fijo cuando no hay índice disponible.
    Fallback,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::System => "system",
            Provenance::UserUpload => "user_upload",
            Provenance::DirectAnalysis => "direct_analysis",
            Provenance::Fallback => "fallback",
        }
    }

    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "user_upload" => Provenance::UserUpload,
            "direct_analysis" => Provenance::DirectAnalysis,
            "fallback" => Provenance::Fallback,
            _ => Provenance::System,
        }
    }

    /// Indica si la fuente proviene de documentos propios del usuario.
    pub fn is_user_scoped(&self) -> bool {
        matches!(self, Provenance::UserUpload | Provenance::DirectAnalysis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub source: Provenance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
}

impl SourceMetadata {
    pub fn new(source: Provenance) -> Self {
        Self {
            source,
            document_id: None,
            chunk_index: None,
            area: None,
        }
    }
}

/// Fuente citada en la respuesta. Inmutable una vez recuperada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub content: String,
    pub relevance: f64,
    pub filename: String,
    pub metadata: SourceMetadata,
}

/// Respuesta de una etapa del pipeline. Sólo se construye completa:
/// o bien éxito, o bien respuesta degradada.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResponse {
    pub content: String,
    pub confidence: f64,
    pub suggestions: Vec<String>,
    pub citations: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl StageResponse {
    pub fn success(
        content: String,
        confidence: f64,
        suggestions: Vec<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            content,
            confidence: confidence.clamp(0.0, 1.0),
            suggestions,
            citations: Vec::new(),
            metadata,
        }
    }

    pub fn degraded(
        content: String,
        suggestions: Vec<String>,
        error: &str,
        mut metadata: Map<String, Value>,
    ) -> Self {
        metadata.insert("error".into(), Value::String(error.to_string()));
        Self {
            content,
            confidence: 0.1,
            suggestions,
            citations: Vec::new(),
            metadata,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.metadata.contains_key("error")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationExchange {
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub answer: String,
    pub legal_area: String,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub exchanges: usize,
    pub topics: Vec<String>,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Metadatos del resultado final devuelto a la capa HTTP.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultMetadata {
    pub processing_time_ms: u64,
    pub from_cache: bool,
    pub session_id: Option<String>,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier_complexity: Option<Complexity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_type: Option<String>,
    pub related_questions: Vec<String>,
    pub has_conversation_history: bool,
    pub tokens_used: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub pipeline: Map<String, Value>,
}

/// Resultado completo de `process_query`.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub answer: String,
    pub confidence: f64,
    pub legal_area: String,
    pub complexity: String,
    pub sources: Vec<Source>,
    pub suggestions: Vec<String>,
    pub metadata: ResultMetadata,
}

/// Documento subido por un usuario, tal como lo describe el almacén de documentos.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub id: String,
    pub filename: String,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
    pub uploaded_at: String,
}

/// Metadatos de la extracción de texto de un documento.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionMetadata {
    pub filename: String,
    pub method: String,
    pub characters: usize,
}
