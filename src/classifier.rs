//! Clasificador de consultas legales: categoría, complejidad y reescritura
//! de la pregunta para la búsqueda vectorial.

use regex::Regex;
use tracing::debug;

use crate::models::{Category, Complexity};

/// Parámetros de recuperación por categoría. Estáticos, sólo lectura.
#[derive(Debug)]
pub struct CategoryConfig {
    pub k: usize,
    pub threshold: f64,
    pub boost_keywords: &'static [&'static str],
}

const CONSTITUCION: CategoryConfig = CategoryConfig {
    k: 15,
    threshold: 0.25,
    boost_keywords: &[
        "sas", "empresa", "constituir", "cámara", "comercio", "sociedad", "registro",
        "mercantil", "documentos", "requisitos", "pasos",
    ],
};
const LABORAL: CategoryConfig = CategoryConfig {
    k: 12,
    threshold: 0.3,
    boost_keywords: &[
        "contrato", "trabajo", "empleado", "prestaciones", "liquidación", "salario",
        "derechos", "obligaciones",
    ],
};
const TRIBUTARIO: CategoryConfig = CategoryConfig {
    k: 15,
    threshold: 0.3,
    boost_keywords: &[
        "impuesto", "dian", "tributario", "renta", "iva", "declaración", "régimen",
        "obligaciones",
    ],
};
const CONTRACTUAL: CategoryConfig = CategoryConfig {
    k: 10,
    threshold: 0.25,
    boost_keywords: &[
        "contrato", "cláusula", "obligación", "comercial", "acuerdo", "términos",
        "condiciones",
    ],
};
const GENERAL: CategoryConfig = CategoryConfig {
    k: 10,
    threshold: 0.3,
    boost_keywords: &[],
};

pub fn category_config(category: Category) -> &'static CategoryConfig {
    match category {
        Category::Constitucion => &CONSTITUCION,
        Category::Laboral => &LABORAL,
        Category::Tributario => &TRIBUTARIO,
        Category::Contractual => &CONTRACTUAL,
        Category::General => &GENERAL,
    }
}

fn category_keywords(category: Category) -> &'static [&'static str] {
    match category {
        Category::Constitucion => &[
            "constituir", "empresa", "sociedad", "sas", "limitada", "ltda", "cámara",
            "comercio", "registro", "mercantil", "socios", "accionistas",
        ],
        Category::Laboral => &[
            "empleado", "trabajador", "contrato", "trabajo", "salario", "sueldo",
            "prestaciones", "liquidación", "despido", "vacaciones", "incapacidad",
            "seguridad", "social", "eps", "afp", "arl",
        ],
        Category::Tributario => &[
            "impuesto", "tributario", "dian", "renta", "iva", "retefuente", "declaración",
            "régimen", "simple", "tributación", "deducción",
        ],
        Category::Contractual => &[
            "contrato", "acuerdo", "cláusula", "obligación", "derecho", "comercial", "civil",
            "arrendamiento", "compraventa", "servicios",
        ],
        Category::General => &[],
    }
}

const ABBREVIATIONS: [(&str, &str); 5] = [
    ("sas", "sociedad por acciones simplificada"),
    ("ltda", "sociedad limitada"),
    ("iva", "impuesto al valor agregado"),
    ("pyme", "pequeña y mediana empresa"),
    ("microempresa", "micro empresa pequeña"),
];

/// Intención procedimental: fuerza `complex` aunque la pregunta sea corta.
const COMPLEX_INTENT: &[&str] = &[
    "cómo", "como hacer", "como puedo", "como hago", "procedimiento", "pasos",
    "requisitos", "documentos", "proceso completo", "implicaciones", "consecuencias",
    "alternativas",
];

/// Intención definicional o de costo: fuerza `simple`.
const SIMPLE_INTENT: &[&str] = &[
    "qué es", "que es", "definición", "significa", "cuánto", "cuanto", "costo", "precio",
];

const COUNTRY_MARKERS: [&str; 3] = ["colombia", "colombiano", "colombiana"];

const QUERY_TYPES: &[(&str, &[&str])] = &[
    ("procedimiento", &["cómo", "como", "pasos", "proceso", "procedimiento", "qué hacer"]),
    ("definición", &["qué es", "que es", "definición", "significa", "concepto"]),
    ("requisitos", &["requisitos", "necesito", "documentos", "papeles", "exigencias"]),
    ("costos", &["costo", "precio", "cuánto", "cuanto", "valor", "tarifa"]),
    ("plazos", &["plazo", "tiempo", "cuándo", "cuando", "fecha", "término"]),
    ("consecuencias", &["pasa si", "consecuencias", "sanciones", "multas", "penalidades"]),
    ("derechos", &["derechos", "tengo derecho", "puede", "permitido", "legal"]),
    ("obligaciones", &["obligaciones", "debo", "tengo que", "obligatorio", "deber"]),
];

struct KeywordPattern {
    keyword: &'static str,
    whole_word: Regex,
}

/// Clasificador heurístico basado en palabras clave.
///
/// Las categorías se puntúan en el orden de [`Category::SCORED`]; ante un
/// empate gana la primera con la puntuación máxima. Es determinista pero
/// arbitrario: "contrato" suma tanto en `laboral` como en `contractual`, y
/// `laboral` gana por ir antes.
pub struct QueryClassifier {
    patterns: Vec<(Category, Vec<KeywordPattern>)>,
    abbreviations: Vec<(Regex, &'static str)>,
    punctuation: Regex,
    whitespace: Regex,
}

impl QueryClassifier {
    pub fn new() -> Self {
        let patterns = Category::SCORED
            .iter()
            .map(|&category| {
                let compiled = category_keywords(category)
                    .iter()
                    .map(|&keyword| KeywordPattern {
                        keyword,
                        whole_word: word_regex(keyword),
                    })
                    .collect();
                (category, compiled)
            })
            .collect();

        let abbreviations = ABBREVIATIONS
            .iter()
            .map(|&(abbr, full)| (word_regex(abbr), full))
            .collect();

        Self {
            patterns,
            abbreviations,
            punctuation: Regex::new(r"[¿?¡!]").expect("regex de puntuación válida"),
            whitespace: Regex::new(r"\s+").expect("regex de espacios válida"),
        }
    }

    /// Devuelve `(categoría, complejidad)` de una pregunta.
    pub fn classify(&self, question: &str) -> (Category, Complexity) {
        (self.category(question), self.complexity(question))
    }

    pub fn category(&self, question: &str) -> Category {
        let lower = question.to_lowercase();
        let mut best: Option<(Category, f64)> = None;

        for (category, keywords) in &self.patterns {
            let score: f64 = keywords
                .iter()
                .map(|p| {
                    if p.whole_word.is_match(&lower) {
                        1.0
                    } else if lower.contains(p.keyword) {
                        0.5
                    } else {
                        0.0
                    }
                })
                .sum();

            // Estrictamente mayor: ante empate se conserva la primera categoría.
            if score > 0.0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((*category, score));
            }
        }

        match best {
            Some((category, score)) => {
                debug!("🏷️ Categoría detectada: {} (score: {score})", category.as_str());
                category
            }
            None => Category::General,
        }
    }

    pub fn complexity(&self, question: &str) -> Complexity {
        let lower = question.to_lowercase();
        if COMPLEX_INTENT.iter().any(|p| lower.contains(p)) {
            return Complexity::Complex;
        }
        if SIMPLE_INTENT.iter().any(|p| lower.contains(p)) {
            return Complexity::Simple;
        }

        match question.split_whitespace().count() {
            0..=5 => Complexity::Simple,
            6..=15 => Complexity::Medium,
            _ => Complexity::Complex,
        }
    }

    /// Reescribe la pregunta para mejorar el matching vectorial.
    pub fn preprocess(&self, question: &str, category: Category) -> String {
        let lower = question.trim().to_lowercase();
        let stripped = self.punctuation.replace_all(&lower, "");
        let mut processed = self.whitespace.replace_all(&stripped, " ").trim().to_string();

        for (pattern, full) in &self.abbreviations {
            processed = pattern.replace_all(&processed, *full).into_owned();
        }

        let missing: Vec<&str> = category_config(category)
            .boost_keywords
            .iter()
            .take(4)
            .filter(|kw| !processed.contains(*kw))
            .copied()
            .collect();
        if !missing.is_empty() {
            processed.push(' ');
            processed.push_str(&missing.join(" "));
        }

        if !COUNTRY_MARKERS.iter().any(|m| processed.contains(m)) {
            processed.push_str(" colombia legislación colombiana");
        }

        processed
    }

    /// Tipo de consulta (procedimiento, definición, ...). `consulta_general` si nada encaja.
    pub fn query_type(&self, question: &str) -> &'static str {
        let lower = question.to_lowercase();
        let mut best: Option<(&'static str, usize)> = None;
        for (query_type, patterns) in QUERY_TYPES {
            let score = patterns.iter().filter(|p| lower.contains(*p)).count();
            if score > 0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((query_type, score));
            }
        }
        best.map(|(t, _)| t).unwrap_or("consulta_general")
    }

    /// Preguntas relacionadas sugeridas para una categoría.
    pub fn related_queries(&self, category: Category) -> Vec<String> {
        let list: &[&str] = match category {
            Category::Constitucion => &[
                "¿Cuáles son los requisitos para constituir una SAS?",
                "¿Qué documentos necesito para registrar mi empresa?",
                "¿Cuánto cuesta constituir una sociedad en Colombia?",
                "¿Cuál es la diferencia entre SAS y Ltda?",
            ],
            Category::Laboral => &[
                "¿Cuáles son las prestaciones sociales obligatorias?",
                "¿Cómo calcular la liquidación de un empleado?",
                "¿Qué pasos seguir para despedir un trabajador?",
                "¿Cuáles son las obligaciones del empleador?",
            ],
            Category::Tributario => &[
                "¿Cómo presentar la declaración de renta?",
                "¿Qué deducciones puedo aplicar?",
                "¿Cuál es la diferencia entre régimen simple y ordinario?",
                "¿Cómo calcular el IVA?",
            ],
            Category::Contractual => &[
                "¿Cómo redactar un contrato de trabajo?",
                "¿Qué cláusulas debe tener un contrato comercial?",
                "¿Cómo terminar un contrato legalmente?",
                "¿Qué hacer si incumplen un contrato?",
            ],
            Category::General => &[
                "¿Cuáles son mis obligaciones legales?",
                "¿Qué derechos tengo?",
                "¿Cómo resolver conflictos legales?",
                "¿Dónde buscar asesoría legal?",
            ],
        };
        list.iter().map(|s| s.to_string()).collect()
    }
}

impl Default for QueryClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn word_regex(word: &str) -> Regex {
    Regex::new(&format!(r"\b{}\b", regex::escape(word))).expect("palabra clave escapada")
}
