//! Modelos de dominio: documentos, chunks, resultados de recuperación y turnos
//! de conversación.

use serde::{Deserialize, Serialize};

/// Longitud (en caracteres) de la vista previa de una fuente.
pub const PREVIEW_CHARS: usize = 150;

/// Texto fuente completo con su etiqueta (ruta del fichero o nombre de colección).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub source: String,
    pub text: String,
}

impl Document {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
        }
    }
}

/// Trozo contiguo de un `Document`, todavía sin embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source: String,
    pub sequence_position: usize,
}

/// Chunk persistido junto a su vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub embedding: Vec<f64>,
}

/// Un chunk devuelto por una consulta, con su puntuación de similitud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub text: String,
    pub source: String,
    pub score: f64,
    /// Colección de la que procede.
    pub collection: String,
    /// Posición dentro de la lista de resultados de su colección.
    pub rank: usize,
}

/// Par (pregunta, respuesta). `assistant` es `None` mientras el turno está en curso.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: Option<String>,
}

impl ConversationTurn {
    pub fn completed(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: Some(assistant.into()),
        }
    }
}

/// Respuesta generada más el contexto que la fundamenta.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerResult {
    pub answer: String,
    pub sources: Vec<RetrievalResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Mensaje del historial tal y como lo envía la interfaz de chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// Vista previa de una fuente que el usuario puede expandir.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourcePreview {
    pub preview: String,
    pub full_content: String,
    pub source: String,
}

impl From<&RetrievalResult> for SourcePreview {
    fn from(result: &RetrievalResult) -> Self {
        let mut preview: String = result.text.chars().take(PREVIEW_CHARS).collect();
        preview.push_str("...");
        Self {
            preview,
            full_content: result.text.clone(),
            source: result.source.clone(),
        }
    }
}
