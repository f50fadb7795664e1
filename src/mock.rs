//! Colaboradores deterministas para tests: embeddings por hashing de palabras,
//! un modelo de lenguaje con respuestas guionizadas y un recuperador estático.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    embedding::{Embedder, EmbeddingRole},
    error::{ModelFailure, RagError, Result},
    llm::LanguageModel,
    models::RetrievalResult,
    retriever::Retriever,
};

/// Embedder "bolsa de palabras": cada palabra suma 1 en el cubo de su hash.
/// Textos que comparten palabras quedan cerca en coseno.
#[derive(Debug)]
pub struct HashEmbedder {
    dimensions: usize,
    model_id: String,
    query_calls: AtomicUsize,
    document_calls: AtomicUsize,
    fail: bool,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            model_id: format!("hash-bow-{dimensions}"),
            query_calls: AtomicUsize::new(0),
            document_calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing(dimensions: usize) -> Self {
        Self {
            fail: true,
            ..Self::new(dimensions)
        }
    }

    pub fn with_model_id(mut self, model_id: &str) -> Self {
        self.model_id = model_id.to_string();
        self
    }

    /// Número de textos embebidos con cada rol.
    pub fn calls_for(&self, role: EmbeddingRole) -> usize {
        match role {
            EmbeddingRole::Query => self.query_calls.load(Ordering::SeqCst),
            EmbeddingRole::Document => self.document_calls.load(Ordering::SeqCst),
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f64> {
        let mut vector = vec![0.0; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = fnv1a(&word.to_lowercase()) as usize % self.dimensions;
            vector[bucket] += 1.0;
        }
        vector
    }
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String], role: EmbeddingRole) -> Result<Vec<Vec<f64>>> {
        let counter = match role {
            EmbeddingRole::Query => &self.query_calls,
            EmbeddingRole::Document => &self.document_calls,
        };
        counter.fetch_add(texts.len(), Ordering::SeqCst);
        if self.fail {
            return Err(RagError::embedding(&self.model_id, "mock embedder caído"));
        }
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Modelo de lenguaje de prueba: devuelve respuestas en orden y recuerda los
/// prompts recibidos.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
    pub default_response: String,
    pub failure: Option<ModelFailure>,
    pub delay: Duration,
}

impl ScriptedModel {
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses),
            default_response: "mock answer".to_string(),
            ..Self::default()
        }
    }

    pub fn failing(kind: ModelFailure) -> Self {
        Self {
            failure: Some(kind),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(kind) = self.failure {
            return Err(RagError::ModelInvocation {
                kind,
                message: "mock LLM error".to_string(),
            });
        }
        let next = match self.responses.lock() {
            Ok(mut responses) if !responses.is_empty() => Some(responses.remove(0)),
            _ => None,
        };
        Ok(next.unwrap_or_else(|| self.default_response.clone()))
    }
}

/// Recuperador con resultados fijos, útil para probar la fusión.
#[derive(Debug, Default)]
pub struct StaticRetriever {
    results: Vec<RetrievalResult>,
    fail: bool,
    queries: Mutex<Vec<String>>,
}

impl StaticRetriever {
    pub fn new(results: Vec<RetrievalResult>) -> Self {
        Self {
            results,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.queries.lock().map(|q| q.len()).unwrap_or_default()
    }

    /// Textos de consulta recibidos, en orden.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(text.to_string());
        }
        if self.fail {
            return Err(RagError::embedding("static", "colección no disponible"));
        }
        Ok(self.results.iter().take(k).cloned().collect())
    }
}
