//! Carga y gestión de configuración de la aplicación (almacenamiento, LLM,
//! troceado y recuperación).

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use crate::{
    error::{RagError, Result},
    retriever::FusionStrategy,
};

pub const DEFAULT_PERSONA: &str = "You are LangAssist, a knowledgeable assistant for the LangChain Python Library. \
Given the following context from the documentation, provide a helpful answer to the user's question.";

/// Proveedor del modelo de chat. Los embeddings van siempre por OpenAI:
/// Groq no ofrece modelos de embeddings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Groq,
}

impl LlmProvider {
    /// Modelo de chat por defecto de cada proveedor.
    pub fn default_chat_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Groq => "llama-3.3-70b-versatile",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "groq" => Ok(Self::Groq),
            other => Err(RagError::Configuration(format!(
                "Proveedor LLM no soportado: {other}"
            ))),
        }
    }
}

/// Estrategia de fusión pedida por configuración. `Auto` se resuelve al
/// arrancar según los índices cargados.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FusionSetting {
    Auto,
    Fixed(FusionStrategy),
}

impl FromStr for FusionSetting {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "score" | "score_descending" => Ok(Self::Fixed(FusionStrategy::ScoreDescending)),
            "round_robin" | "round-robin" => Ok(Self::Fixed(FusionStrategy::RoundRobin)),
            other => Err(RagError::Configuration(format!(
                "Estrategia de fusión desconocida: {other}"
            ))),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub storage_root: PathBuf,
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    pub embedding_query_prefix: String,
    pub embedding_document_prefix: String,
    pub embed_batch_size: usize,

    pub chunk_size: usize,
    pub chunk_overlap: usize,

    pub k_per_collection: usize,
    pub k_total: usize,
    pub fusion: FusionSetting,
    pub request_timeout: Duration,
    pub history_max_turns: Option<usize>,
    pub persona: String,

    /// Documentos a indexar uno a uno (sólo la CLI de ingesta).
    pub doc_paths: Vec<PathBuf>,
    /// Carpeta cuyos ficheros forman un único índice (opcional).
    pub issues_folder: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("vector_stores"),
            server_addr: "127.0.0.1:8000".to_string(),
            llm_provider: LlmProvider::OpenAI,
            llm_embedding_model: "text-embedding-3-small".to_string(),
            llm_chat_model: LlmProvider::OpenAI.default_chat_model().to_string(),
            embedding_query_prefix: String::new(),
            embedding_document_prefix: String::new(),
            embed_batch_size: 64,
            chunk_size: 1000,
            chunk_overlap: 150,
            k_per_collection: 5,
            k_total: 5,
            fusion: FusionSetting::Auto,
            request_timeout: Duration::from_secs(60),
            history_max_turns: None,
            persona: DEFAULT_PERSONA.to_string(),
            doc_paths: ["docs/docs_v1.txt", "docs/docs_v2.txt", "docs/docs_v3.txt"]
                .iter()
                .map(PathBuf::from)
                .collect(),
            issues_folder: None,
        }
    }
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env`, pero leyendo de una función arbitraria.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let llm_provider = match get("LLM_PROVIDER") {
            Some(value) => value.parse()?,
            None => defaults.llm_provider,
        };

        let cfg = Self {
            storage_root: get("STORAGE_ROOT").map(PathBuf::from).unwrap_or(defaults.storage_root),
            server_addr: get("SERVER_ADDR").unwrap_or(defaults.server_addr),
            llm_chat_model: get("LLM_CHAT_MODEL")
                .unwrap_or_else(|| llm_provider.default_chat_model().to_string()),
            llm_provider,
            llm_embedding_model: get("LLM_EMBEDDING_MODEL").unwrap_or(defaults.llm_embedding_model),
            // Los prefijos pueden terminar en espacio: no se recortan.
            embedding_query_prefix: lookup("EMBEDDING_QUERY_PREFIX").unwrap_or_default(),
            embedding_document_prefix: lookup("EMBEDDING_DOCUMENT_PREFIX").unwrap_or_default(),
            embed_batch_size: parse_or("EMBED_BATCH_SIZE", get("EMBED_BATCH_SIZE"), defaults.embed_batch_size)?,
            chunk_size: parse_or("CHUNK_SIZE", get("CHUNK_SIZE"), defaults.chunk_size)?,
            chunk_overlap: parse_or("CHUNK_OVERLAP", get("CHUNK_OVERLAP"), defaults.chunk_overlap)?,
            k_per_collection: parse_or("K_PER_COLLECTION", get("K_PER_COLLECTION"), defaults.k_per_collection)?,
            k_total: parse_or("K_TOTAL", get("K_TOTAL"), defaults.k_total)?,
            fusion: match get("FUSION_STRATEGY") {
                Some(value) => value.parse()?,
                None => defaults.fusion,
            },
            request_timeout: Duration::from_secs(parse_or(
                "REQUEST_TIMEOUT_SECS",
                get("REQUEST_TIMEOUT_SECS"),
                defaults.request_timeout.as_secs(),
            )?),
            history_max_turns: get("HISTORY_MAX_TURNS")
                .map(|v| parse_or("HISTORY_MAX_TURNS", Some(v), 0))
                .transpose()?,
            persona: get("ASSISTANT_PERSONA").unwrap_or(defaults.persona),
            doc_paths: get("DOC_PATHS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(PathBuf::from)
                        .collect()
                })
                .unwrap_or(defaults.doc_paths),
            issues_folder: get("ISSUES_FOLDER").map(PathBuf::from),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Comprueba la coherencia de los parámetros numéricos.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Configuration(format!(
                "CHUNK_OVERLAP ({}) debe ser menor que CHUNK_SIZE ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        for (name, value) in [
            ("K_PER_COLLECTION", self.k_per_collection),
            ("K_TOTAL", self.k_total),
            ("EMBED_BATCH_SIZE", self.embed_batch_size),
        ] {
            if value == 0 {
                return Err(RagError::Configuration(format!("{name} debe ser mayor que cero")));
            }
        }
        if self.request_timeout.is_zero() {
            return Err(RagError::Configuration(
                "REQUEST_TIMEOUT_SECS debe ser mayor que cero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| RagError::Configuration(format!("Valor inválido para {key}: {raw}"))),
        None => Ok(default),
    }
}
