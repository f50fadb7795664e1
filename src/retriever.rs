//! Recuperación sobre una o varias colecciones.
//!
//! Flujo de la recuperación fusionada:
//!   1. Se consulta cada colección en paralelo con la misma pregunta y
//!      `k_per_collection`.
//!   2. Las colecciones que fallan se registran como recuperación parcial; las
//!      que no devuelven nada también quedan en el log.
//!   3. Los resultados se combinan con una `FusionStrategy` determinista y se
//!      truncan a `k_total`.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::{
    embedding::{Embedder, EmbeddingRole},
    error::{CollectionFailure, PartialRetrievalWarning, RagError, Result},
    models::RetrievalResult,
    vector_store::VectorIndex,
};

/// Cualquier fuente capaz de devolver los `k` pasajes más relevantes.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievalResult>>;

    /// Embedder con el que este recuperador vectoriza la consulta, si lo usa.
    fn query_embedder(&self) -> Option<Arc<dyn Embedder>> {
        None
    }

    /// Igual que `query`, con el vector de la consulta ya calculado por
    /// `query_embedder()`.
    async fn query_with_vector(
        &self,
        text: &str,
        _vector: &[f64],
        k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        self.query(text, k).await
    }
}

/// Recuperador sobre un único índice cargado.
pub struct CollectionRetriever {
    name: String,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
}

impl CollectionRetriever {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            name: index.name().to_string(),
            index,
            embedder,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Retriever for CollectionRetriever {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        if self.index.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed_one(text, EmbeddingRole::Query).await?;
        self.query_with_vector(text, &query_vec, k).await
    }

    fn query_embedder(&self) -> Option<Arc<dyn Embedder>> {
        Some(self.embedder.clone())
    }

    async fn query_with_vector(
        &self,
        _text: &str,
        query_vec: &[f64],
        k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        if self.index.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let expected = self.index.manifest().dimensions;
        if query_vec.len() != expected {
            return Err(RagError::embedding(
                self.embedder.model_id(),
                format!(
                    "el vector de consulta tiene {} dimensiones y '{}' espera {expected}",
                    query_vec.len(),
                    self.name
                ),
            ));
        }

        let results = self
            .index
            .search(query_vec, k)
            .into_iter()
            .enumerate()
            .map(|(rank, (score, entry))| RetrievalResult {
                text: entry.chunk.text.clone(),
                source: entry.chunk.source.clone(),
                score,
                collection: self.name.clone(),
                rank,
            })
            .collect();
        Ok(results)
    }
}

/// Política de combinación de resultados de varias colecciones.
///
/// Ambas son funciones puras y deterministas de las listas por colección.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionStrategy {
    /// Orden global por score descendente; empates por nombre de colección y
    /// después por rango original. Requiere scores comparables entre índices.
    ScoreDescending,
    /// Intercalado por rango: el primero de cada colección (en orden de
    /// nombre), luego el segundo, etc. No mira los scores.
    RoundRobin,
}

impl FusionStrategy {
    /// Elige estrategia a partir de los índices: si todos comparten modelo de
    /// embeddings y dimensión, los scores son comparables.
    pub fn for_indexes<'a>(indexes: impl IntoIterator<Item = &'a VectorIndex>) -> Self {
        let mut spaces = indexes
            .into_iter()
            .map(|idx| (idx.manifest().embedding_model.as_str(), idx.manifest().dimensions));
        match spaces.next() {
            Some(first) if spaces.all(|space| space == first) => Self::ScoreDescending,
            Some(_) => Self::RoundRobin,
            None => Self::ScoreDescending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScoreDescending => "score_descending",
            Self::RoundRobin => "round_robin",
        }
    }
}

impl fmt::Display for FusionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combina los resultados por colección y devuelve como mucho `k_total`.
///
/// `per_collection` puede venir en cualquier orden: se ordena por nombre de
/// colección antes de fusionar. Dentro de cada colección se respeta el orden
/// recibido (descendente por score).
pub fn merge_results(
    strategy: FusionStrategy,
    per_collection: &[(String, Vec<RetrievalResult>)],
    k_total: usize,
) -> Vec<RetrievalResult> {
    let mut ordered: Vec<&(String, Vec<RetrievalResult>)> = per_collection.iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0));

    match strategy {
        FusionStrategy::ScoreDescending => {
            let mut all: Vec<(&str, usize, &RetrievalResult)> = ordered
                .iter()
                .flat_map(|(name, results)| {
                    results
                        .iter()
                        .enumerate()
                        .map(move |(rank, r)| (name.as_str(), rank, r))
                })
                .collect();
            all.sort_by(|a, b| {
                b.2.score
                    .total_cmp(&a.2.score)
                    .then_with(|| a.0.cmp(b.0))
                    .then_with(|| a.1.cmp(&b.1))
            });
            all.into_iter().take(k_total).map(|(_, _, r)| r.clone()).collect()
        }
        FusionStrategy::RoundRobin => {
            let depth = ordered.iter().map(|(_, r)| r.len()).max().unwrap_or(0);
            (0..depth)
                .flat_map(|rank| ordered.iter().filter_map(move |(_, results)| results.get(rank)))
                .take(k_total)
                .cloned()
                .collect()
        }
    }
}

/// Resultado detallado de una consulta fusionada.
#[derive(Debug)]
pub struct FusionOutcome {
    pub results: Vec<RetrievalResult>,
    pub warning: Option<PartialRetrievalWarning>,
    pub empty_collections: Vec<String>,
}

/// Consulta varias colecciones y fusiona sus resultados.
pub struct FusionRetriever {
    retrievers: Vec<(String, Arc<dyn Retriever>)>,
    k_per_collection: usize,
    strategy: FusionStrategy,
}

impl FusionRetriever {
    pub fn new(
        mut retrievers: Vec<(String, Arc<dyn Retriever>)>,
        k_per_collection: usize,
        strategy: FusionStrategy,
    ) -> Self {
        retrievers.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            retrievers,
            k_per_collection,
            strategy,
        }
    }

    pub fn strategy(&self) -> FusionStrategy {
        self.strategy
    }

    pub fn collections(&self) -> Vec<&str> {
        self.retrievers.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Consulta todas las colecciones en paralelo y aplica la fusión.
    ///
    /// Degrada con elegancia: si al menos una colección responde se devuelven
    /// sus resultados y el resto se reporta en `warning`. Si fallan todas, se
    /// devuelve `RagError::Retrieval`.
    pub async fn query_detailed(&self, text: &str, k_total: usize) -> Result<FusionOutcome> {
        if self.retrievers.is_empty() {
            return Err(RagError::Storage {
                path: "<fusion>".to_string(),
                message: "no hay colecciones cargadas".to_string(),
            });
        }

        // Un único embedding de la consulta por embedder distinto.
        let mut embedders: Vec<Arc<dyn Embedder>> = Vec::new();
        let slots: Vec<Option<usize>> = self
            .retrievers
            .iter()
            .map(|(_, retriever)| {
                let embedder = retriever.query_embedder()?;
                let slot = embedders
                    .iter()
                    .position(|known| std::ptr::addr_eq(Arc::as_ptr(known), Arc::as_ptr(&embedder)));
                Some(slot.unwrap_or_else(|| {
                    embedders.push(embedder);
                    embedders.len() - 1
                }))
            })
            .collect();
        let vectors: Vec<std::result::Result<Vec<f64>, String>> = join_all(
            embedders
                .iter()
                .map(|embedder| embedder.embed_one(text, EmbeddingRole::Query)),
        )
        .await
        .into_iter()
        .map(|res| res.map_err(|e| e.to_string()))
        .collect();
        debug!(embeddings = vectors.len(), "Consulta vectorizada");

        let k = self.k_per_collection;
        let responses = join_all(self.retrievers.iter().zip(&slots).map(
            |((name, retriever), slot)| {
                let vectors = &vectors;
                let embedders = &embedders;
                async move {
                    let response = match slot {
                        Some(i) => match &vectors[*i] {
                            Ok(vector) => retriever.query_with_vector(text, vector, k).await,
                            Err(message) => {
                                Err(RagError::embedding(embedders[*i].model_id(), message))
                            }
                        },
                        None => retriever.query(text, k).await,
                    };
                    (name.clone(), response)
                }
            },
        ))
        .await;

        let mut per_collection = Vec::with_capacity(responses.len());
        let mut failures = Vec::new();
        let mut empty_collections = Vec::new();

        for (name, response) in responses {
            match response {
                Ok(results) => {
                    if results.is_empty() {
                        info!(collection = %name, "La colección no devolvió resultados");
                        empty_collections.push(name.clone());
                    } else {
                        debug!(collection = %name, hits = results.len(), "Resultados de colección");
                    }
                    per_collection.push((name, results));
                }
                Err(error) => failures.push(CollectionFailure {
                    collection: name,
                    error,
                }),
            }
        }

        if per_collection.is_empty() {
            return Err(RagError::Retrieval(failures));
        }

        let warning = if failures.is_empty() {
            None
        } else {
            let warning = PartialRetrievalWarning {
                succeeded: per_collection.iter().map(|(name, _)| name.clone()).collect(),
                failures,
            };
            warn!("{warning}");
            Some(warning)
        };

        let results = merge_results(self.strategy, &per_collection, k_total);
        info!(
            strategy = %self.strategy,
            collections = per_collection.len(),
            results = results.len(),
            "Recuperación fusionada completada"
        );

        Ok(FusionOutcome {
            results,
            warning,
            empty_collections,
        })
    }
}

#[async_trait]
impl Retriever for FusionRetriever {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        Ok(self.query_detailed(text, k).await?.results)
    }
}
