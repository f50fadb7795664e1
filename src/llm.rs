//! Abstracción sobre Rig para trabajar con el proveedor de LLM y de embeddings.
//! El chat puede ir por OpenAI o Groq; los embeddings siempre por OpenAI.

use async_trait::async_trait;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts
use tracing::debug;

use crate::{
    config::{AppConfig, LlmProvider},
    embedding::{Embedder, EmbeddingRole},
    error::{RagError, Result},
};

/// Contrato con el modelo de lenguaje: prompt completo → texto generado.
///
/// Los reintentos, si los hay, son cosa del cliente del proveedor.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
    query_prefix: String,
    document_prefix: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    ///
    /// Comprueba aquí la clave del proveedor: el cliente de Rig aborta el
    /// proceso si falta.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Self::from_config_with(cfg, |key| std::env::var(key).ok())
    }

    /// Igual que `from_config`, leyendo las claves con `lookup`.
    pub fn from_config_with<F>(cfg: &AppConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &str| {
            if lookup(key).map_or(true, |k| k.trim().is_empty()) {
                return Err(RagError::Configuration(format!("Falta {key} en el entorno")));
            }
            Ok(())
        };

        // Embeddings
        require("OPENAI_API_KEY")?;
        // Chat
        match cfg.llm_provider {
            LlmProvider::OpenAI => {}
            LlmProvider::Groq => require("GROQ_API_KEY")?,
        }

        Ok(Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            query_prefix: cfg.embedding_query_prefix.clone(),
            document_prefix: cfg.embedding_document_prefix.clone(),
        })
    }

    fn prefix_for(&self, role: EmbeddingRole) -> &str {
        match role {
            EmbeddingRole::Query => &self.query_prefix,
            EmbeddingRole::Document => &self.document_prefix,
        }
    }

    // ---------------------------------------------------------------------
    // EMBEDDINGS
    // ---------------------------------------------------------------------

    async fn embed_with_openai(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        use rig::providers::openai;
        // Trait para client.embedding_model(...)
        use rig::client::EmbeddingsClient as _;

        let client = openai::Client::from_env();
        let embedding_model = client.embedding_model(&self.embedding_model);

        let expected = texts.len();
        let embeddings = embedding_model
            .embed_texts(texts)
            .await
            .map_err(|e| RagError::embedding(&self.embedding_model, e))?;

        if embeddings.len() != expected {
            return Err(RagError::embedding(
                &self.embedding_model,
                format!(
                    "Número de embeddings ({}) distinto al número de textos ({expected})",
                    embeddings.len()
                ),
            ));
        }

        Ok(embeddings.into_iter().map(|e| e.vec).collect())
    }

    // ---------------------------------------------------------------------
    // CHAT / COMPLETION
    // ---------------------------------------------------------------------

    async fn generate_with_openai(&self, prompt: &str) -> Result<String> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = openai::Client::from_env();
        let agent = client.agent(&self.chat_model).build();

        agent.prompt(prompt).await.map_err(RagError::model)
    }

    async fn generate_with_groq(&self, prompt: &str) -> Result<String> {
        use rig::providers::groq;
        use rig::client::CompletionClient as _;

        let client = groq::Client::from_env();
        let agent = client.agent(&self.chat_model).build();

        agent.prompt(prompt).await.map_err(RagError::model)
    }
}

#[async_trait]
impl Embedder for LlmManager {
    async fn embed(&self, texts: &[String], role: EmbeddingRole) -> Result<Vec<Vec<f64>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let prefix = self.prefix_for(role);
        let inputs: Vec<String> = texts.iter().map(|t| format!("{prefix}{t}")).collect();
        debug!(count = inputs.len(), ?role, "Calculando embeddings");

        // Groq no tiene embeddings: el proveedor sólo cambia el chat.
        self.embed_with_openai(inputs).await
    }

    fn model_id(&self) -> &str {
        &self.embedding_model
    }
}

#[async_trait]
impl LanguageModel for LlmManager {
    async fn generate(&self, prompt: &str) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => self.generate_with_openai(prompt).await,
            LlmProvider::Groq => self.generate_with_groq(prompt).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> LlmManager {
        LlmManager {
            provider: LlmProvider::OpenAI,
            embedding_model: "nomic-embed-text".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            query_prefix: "search_query: ".to_string(),
            document_prefix: "search_document: ".to_string(),
        }
    }

    #[test]
    fn prefixes_follow_the_role() {
        let llm = manager();
        assert_eq!(llm.prefix_for(EmbeddingRole::Query), "search_query: ");
        assert_eq!(llm.prefix_for(EmbeddingRole::Document), "search_document: ");
        assert_eq!(llm.model_id(), "nomic-embed-text");
    }

    #[test]
    fn groq_needs_both_keys() {
        let cfg = AppConfig {
            llm_provider: LlmProvider::Groq,
            ..AppConfig::default()
        };
        let only_openai = |key: &str| (key == "OPENAI_API_KEY").then(|| "sk-test".to_string());
        let err = LlmManager::from_config_with(&cfg, only_openai).unwrap_err();
        assert!(err.to_string().contains("GROQ_API_KEY"));

        let both = |key: &str| {
            matches!(key, "OPENAI_API_KEY" | "GROQ_API_KEY").then(|| "key".to_string())
        };
        let llm = LlmManager::from_config_with(&cfg, both).unwrap();
        assert_eq!(llm.provider, LlmProvider::Groq);
    }

    #[test]
    fn openai_key_is_always_required_for_embeddings() {
        let err = LlmManager::from_config_with(&AppConfig::default(), |_| None).unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn empty_batch_does_not_call_the_provider() {
        let vectors = manager().embed(&[], EmbeddingRole::Document).await.unwrap();
        assert!(vectors.is_empty());
    }
}
