//! Contrato con el modelo de embeddings.

use async_trait::async_trait;

use crate::error::{RagError, Result};

/// Modo de codificación. Los modelos asimétricos (p. ej. nomic-embed) usan un
/// prefijo distinto para consultas y para documentos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbeddingRole {
    Query,
    Document,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Calcula un vector por texto, en el mismo orden.
    async fn embed(&self, texts: &[String], role: EmbeddingRole) -> Result<Vec<Vec<f64>>>;

    /// Identificador del modelo, guardado en el manifiesto de cada índice.
    fn model_id(&self) -> &str;

    async fn embed_one(&self, text: &str, role: EmbeddingRole) -> Result<Vec<f64>> {
        self.embed(&[text.to_string()], role)
            .await?
            .pop()
            .ok_or_else(|| RagError::embedding(self.model_id(), "el modelo no devolvió ningún vector"))
    }
}

/// Similitud coseno; 0.0 si alguno de los vectores es nulo.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
