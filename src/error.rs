//! Taxonomía de errores del asistente RAG.
//!
//! Cada variante expone un `kind()` estable que la API devuelve al cliente;
//! el mensaje es sólo para humanos.

use std::fmt;

use thiserror::Error;

/// Clasificación de un fallo del modelo de lenguaje.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFailure {
    Unavailable,
    RateLimited,
    ContentFiltered,
}

impl ModelFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::RateLimited => "rate_limited",
            Self::ContentFiltered => "content_filtered",
        }
    }

    /// Clasifica el texto de error devuelto por el proveedor.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("429") || lower.contains("rate limit") || lower.contains("rate_limit") {
            Self::RateLimited
        } else if lower.contains("content_filter") || lower.contains("content filter") {
            Self::ContentFiltered
        } else {
            Self::Unavailable
        }
    }
}

impl fmt::Display for ModelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fallo de una colección concreta durante la recuperación fusionada.
#[derive(Debug)]
pub struct CollectionFailure {
    pub collection: String,
    pub error: RagError,
}

impl fmt::Display for CollectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.collection, self.error)
    }
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("Configuración inválida: {0}")]
    Configuration(String),

    #[error("No se pudo decodificar {source_label}: {message}")]
    Decode {
        source_label: String,
        message: String,
    },

    #[error("Error de almacenamiento en {path}: {message}")]
    Storage { path: String, message: String },

    #[error("Error de embeddings ({model}): {message}")]
    Embedding { model: String, message: String },

    #[error("Fallo del modelo de lenguaje ({kind}): {message}")]
    ModelInvocation { kind: ModelFailure, message: String },

    #[error("Entrada inválida: {0}")]
    InvalidInput(String),

    #[error("Tiempo agotado tras {0} s procesando la consulta")]
    OperationTimeout(u64),

    #[error("Fallaron todas las colecciones: {}", join_failures(.0))]
    Retrieval(Vec<CollectionFailure>),
}

fn join_failures(failures: &[CollectionFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl RagError {
    /// Identificador estable del tipo de error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::Decode { .. } => "decode_error",
            Self::Storage { .. } => "storage_error",
            Self::Embedding { .. } => "embedding_error",
            Self::ModelInvocation { .. } => "model_invocation_error",
            Self::InvalidInput(_) => "invalid_input",
            Self::OperationTimeout(_) => "operation_timeout",
            Self::Retrieval(_) => "retrieval_error",
        }
    }

    pub(crate) fn storage(path: impl AsRef<std::path::Path>, message: impl fmt::Display) -> Self {
        Self::Storage {
            path: path.as_ref().display().to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn embedding(model: &str, message: impl fmt::Display) -> Self {
        Self::Embedding {
            model: model.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn model(message: impl fmt::Display) -> Self {
        let message = message.to_string();
        Self::ModelInvocation {
            kind: ModelFailure::classify(&message),
            message,
        }
    }
}

/// Aviso no fatal: algunas colecciones fallaron pero otras respondieron.
#[derive(Debug)]
pub struct PartialRetrievalWarning {
    pub succeeded: Vec<String>,
    pub failures: Vec<CollectionFailure>,
}

impl fmt::Display for PartialRetrievalWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "recuperación parcial: {} colecciones OK, {} con error ({})",
            self.succeeded.len(),
            self.failures.len(),
            join_failures(&self.failures)
        )
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_provider_messages() {
        assert_eq!(
            ModelFailure::classify("HTTP 429 Too Many Requests"),
            ModelFailure::RateLimited
        );
        assert_eq!(
            ModelFailure::classify("finish_reason: content_filter"),
            ModelFailure::ContentFiltered
        );
        assert_eq!(
            ModelFailure::classify("connection refused"),
            ModelFailure::Unavailable
        );
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(RagError::InvalidInput("x".into()).kind(), "invalid_input");
        assert_eq!(RagError::OperationTimeout(3).kind(), "operation_timeout");
        assert_eq!(RagError::model("boom").kind(), "model_invocation_error");
        assert_eq!(RagError::storage("/tmp", "missing").kind(), "storage_error");
    }

    #[test]
    fn retrieval_error_lists_every_collection() {
        let err = RagError::Retrieval(vec![
            CollectionFailure {
                collection: "docs_v1".into(),
                error: RagError::embedding("m", "down"),
            },
            CollectionFailure {
                collection: "docs_v2".into(),
                error: RagError::embedding("m", "down"),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("docs_v1"));
        assert!(text.contains("docs_v2"));
    }
}
