use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    config::{AppConfig, FusionSetting},
    embedding::Embedder,
    error::{RagError, Result},
    llm::{LanguageModel, LlmManager},
    models::{AnswerResult, ConversationTurn},
    rag::AnswerSynthesizer,
    retriever::{CollectionRetriever, FusionRetriever, FusionStrategy, Retriever},
    vector_store::{IndexStore, VectorIndex},
};

/// Contexto compartido por los handlers. Se construye una vez al arrancar.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub synthesizer: Arc<AnswerSynthesizer>,
    pub collections: Vec<String>,
    pub strategy: FusionStrategy,
    pub started_at: Instant,
}

/// Estado que expone `GET /api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub collections: Vec<String>,
    pub strategy: String,
    pub k_total: usize,
    pub uptime_secs: u64,
}

impl AppState {
    /// Carga los índices publicados y conecta el proveedor configurado.
    pub fn bootstrap(config: AppConfig) -> Result<Self> {
        let indexes = IndexStore::new(&config.storage_root).load_all()?;
        info!(
            "Índices cargados desde {}: {}",
            config.storage_root.display(),
            indexes.keys().cloned().collect::<Vec<_>>().join(", ")
        );

        let llm = Arc::new(LlmManager::from_config(&config)?);
        Self::from_indexes(config, indexes, llm.clone(), llm)
    }

    /// Monta el recuperador fusionado sobre índices ya cargados.
    pub fn from_indexes(
        config: AppConfig,
        indexes: BTreeMap<String, Arc<VectorIndex>>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        if indexes.is_empty() {
            return Err(RagError::storage(
                &config.storage_root,
                "no hay índices que consultar",
            ));
        }

        for index in indexes.values() {
            let built_with = &index.manifest().embedding_model;
            if built_with != embedder.model_id() {
                warn!(
                    "El índice '{}' se construyó con '{built_with}' y las consultas usan '{}'",
                    index.name(),
                    embedder.model_id()
                );
            }
        }

        let strategy = match config.fusion {
            FusionSetting::Fixed(strategy) => strategy,
            FusionSetting::Auto => FusionStrategy::for_indexes(indexes.values().map(Arc::as_ref)),
        };
        info!("Estrategia de fusión: {strategy}");

        let collections: Vec<String> = indexes.keys().cloned().collect();
        let retrievers: Vec<(String, Arc<dyn Retriever>)> = indexes
            .into_iter()
            .map(|(name, index)| {
                let retriever: Arc<dyn Retriever> =
                    Arc::new(CollectionRetriever::new(index, embedder.clone()));
                (name, retriever)
            })
            .collect();
        let fusion = FusionRetriever::new(retrievers, config.k_per_collection, strategy);

        Ok(Self::new(config, Arc::new(fusion), model, collections, strategy))
    }

    pub fn new(
        config: AppConfig,
        retriever: Arc<dyn Retriever>,
        model: Arc<dyn LanguageModel>,
        collections: Vec<String>,
        strategy: FusionStrategy,
    ) -> Self {
        let synthesizer =
            AnswerSynthesizer::new(retriever, model, config.k_total, config.persona.clone());
        Self {
            config: Arc::new(config),
            synthesizer: Arc::new(synthesizer),
            collections,
            strategy,
            started_at: Instant::now(),
        }
    }

    /// Responde a una pregunta dentro del tiempo máximo configurado.
    /// Si se agota, el trabajo en curso se descarta.
    pub async fn ask(&self, question: &str, history: &[ConversationTurn]) -> Result<AnswerResult> {
        let limit = self.config.request_timeout;
        match tokio::time::timeout(limit, self.synthesizer.answer(question, history)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Consulta abortada tras {:?}", limit);
                Err(RagError::OperationTimeout(limit.as_secs()))
            }
        }
    }

    /// Recorta el historial a los últimos `history_max_turns` turnos.
    pub fn bound_history(&self, mut turns: Vec<ConversationTurn>) -> Vec<ConversationTurn> {
        if let Some(max) = self.config.history_max_turns {
            let excess = turns.len().saturating_sub(max);
            turns.drain(..excess);
        }
        turns
    }

    pub fn status(&self) -> Status {
        Status {
            collections: self.collections.clone(),
            strategy: self.strategy.to_string(),
            k_total: self.config.k_total,
            uptime_secs: self.uptime().as_secs(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingRole;
    use crate::mock::{HashEmbedder, ScriptedModel, StaticRetriever};
    use crate::models::{Chunk, IndexedChunk, RetrievalResult};

    async fn index(name: &str, embedder: &HashEmbedder, texts: &[&str]) -> Arc<VectorIndex> {
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let vectors = embedder.embed(&owned, EmbeddingRole::Document).await.unwrap();
        let entries = owned
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (text, embedding))| IndexedChunk {
                chunk: Chunk {
                    text,
                    source: format!("docs/{name}.txt"),
                    sequence_position: i,
                },
                embedding,
            })
            .collect();
        Arc::new(VectorIndex::build(name, embedder.model_id(), 100, 10, entries).unwrap())
    }

    #[tokio::test]
    async fn auto_fusion_resolves_from_indexes() {
        let embedder = Arc::new(HashEmbedder::new(256));
        let mut indexes = BTreeMap::new();
        indexes.insert("docs_v2".to_string(), index("docs_v2", &embedder, &["agents use tools"]).await);
        indexes.insert("docs_v1".to_string(), index("docs_v1", &embedder, &["chains link calls"]).await);

        let state = AppState::from_indexes(
            AppConfig::default(),
            indexes,
            embedder,
            Arc::new(ScriptedModel::with_responses(vec![])),
        )
        .unwrap();

        assert_eq!(state.strategy, FusionStrategy::ScoreDescending);
        assert_eq!(state.collections, vec!["docs_v1", "docs_v2"]);
        let result = state.ask("what do agents use?", &[]).await.unwrap();
        assert_eq!(result.answer, "mock answer");
        assert_eq!(result.sources[0].collection, "docs_v2");
    }

    #[tokio::test]
    async fn fixed_fusion_setting_wins() {
        let embedder = Arc::new(HashEmbedder::new(16));
        let mut indexes = BTreeMap::new();
        indexes.insert("a".to_string(), index("a", &embedder, &["uno"]).await);
        let config = AppConfig {
            fusion: FusionSetting::Fixed(FusionStrategy::RoundRobin),
            ..AppConfig::default()
        };

        let state = AppState::from_indexes(
            config,
            indexes,
            embedder,
            Arc::new(ScriptedModel::default()),
        )
        .unwrap();
        assert_eq!(state.status().strategy, "round_robin");
    }

    #[tokio::test]
    async fn slow_model_times_out() {
        let retriever = Arc::new(StaticRetriever::new(vec![RetrievalResult {
            text: "ctx".into(),
            source: "s".into(),
            score: 1.0,
            collection: "c".into(),
            rank: 0,
        }]));
        let model = Arc::new(ScriptedModel::default().with_delay(Duration::from_millis(300)));
        let config = AppConfig {
            request_timeout: Duration::from_millis(20),
            ..AppConfig::default()
        };
        let state = AppState::new(config, retriever, model, vec!["c".into()], FusionStrategy::RoundRobin);

        let err = state.ask("hola", &[]).await.unwrap_err();
        assert_eq!(err.kind(), "operation_timeout");
    }

    #[test]
    fn history_is_bounded_to_latest_turns() {
        let config = AppConfig {
            history_max_turns: Some(1),
            ..AppConfig::default()
        };
        let state = AppState::new(
            config,
            Arc::new(StaticRetriever::new(Vec::new())),
            Arc::new(ScriptedModel::default()),
            Vec::new(),
            FusionStrategy::ScoreDescending,
        );
        let turns = state.bound_history(vec![
            ConversationTurn::completed("q1", "a1"),
            ConversationTurn::completed("q2", "a2"),
        ]);
        assert_eq!(turns, vec![ConversationTurn::completed("q2", "a2")]);
    }

    #[test]
    fn empty_index_set_is_rejected() {
        let err = AppState::from_indexes(
            AppConfig::default(),
            BTreeMap::new(),
            Arc::new(HashEmbedder::new(8)),
            Arc::new(ScriptedModel::default()),
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), "storage_error");
    }
}
