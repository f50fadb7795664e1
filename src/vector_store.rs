//! Índices vectoriales persistidos en disco.
//!
//! Disposición: un directorio por colección bajo la raíz de almacenamiento,
//! con `manifest.json` y `chunks.json`. Un índice sólo es visible para el
//! cargador cuando su directorio tiene nombre definitivo; la publicación
//! escribe en `.staging-*` y renombra al final.
//!
//! API pública:
//!   - `IndexStore::publish(&VectorIndex)`
//!   - `IndexStore::load_all()`
//!   - `VectorIndex::search(&[f64], usize)`

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    embedding::cosine_similarity,
    error::{RagError, Result},
    models::IndexedChunk,
};

const MANIFEST_FILE: &str = "manifest.json";
const CHUNKS_FILE: &str = "chunks.json";

/// Metadatos de un índice publicado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub name: String,
    pub embedding_model: String,
    pub dimensions: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub chunk_count: usize,
    pub documents: Vec<String>,
    pub created_at: String,
}

/// Índice en memoria: inmutable una vez construido o cargado.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    manifest: IndexManifest,
    entries: Vec<IndexedChunk>,
}

impl VectorIndex {
    /// Construye un índice nuevo validando que todos los vectores tengan la
    /// misma dimensión.
    pub fn build(
        name: &str,
        embedding_model: &str,
        chunk_size: usize,
        chunk_overlap: usize,
        entries: Vec<IndexedChunk>,
    ) -> Result<Self> {
        validate_index_name(name)?;
        let dimensions = entries.first().map(|e| e.embedding.len()).unwrap_or(0);
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dimensions) {
            return Err(RagError::embedding(
                embedding_model,
                format!(
                    "dimensión inconsistente en '{name}': {} frente a {dimensions}",
                    bad.embedding.len()
                ),
            ));
        }

        let mut documents: Vec<String> = Vec::new();
        for entry in &entries {
            if !documents.contains(&entry.chunk.source) {
                documents.push(entry.chunk.source.clone());
            }
        }

        Ok(Self {
            manifest: IndexManifest {
                name: name.to_string(),
                embedding_model: embedding_model.to_string(),
                dimensions,
                chunk_size,
                chunk_overlap,
                chunk_count: entries.len(),
                documents,
                created_at: Utc::now().to_rfc3339(),
            },
            entries,
        })
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn entries(&self) -> &[IndexedChunk] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Búsqueda exhaustiva por similitud coseno. Devuelve `(score, entrada)`
    /// ordenado por score descendente; a igual score, primero la entrada
    /// anterior en el índice.
    pub fn search(&self, query: &[f64], top_k: usize) -> Vec<(f64, &IndexedChunk)> {
        let mut scored: Vec<(usize, f64)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (pos, cosine_similarity(&entry.embedding, query)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(top_k);
        scored
            .into_iter()
            .map(|(pos, score)| (score, &self.entries[pos]))
            .collect()
    }
}

fn validate_index_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name == "..";
    if invalid {
        return Err(RagError::Configuration(format!(
            "Nombre de índice no válido: '{name}'"
        )));
    }
    Ok(())
}

/// Raíz de almacenamiento de índices.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Publica el índice de forma atómica: se escribe en un directorio de
    /// staging y se renombra al nombre definitivo. Si ya existía un índice con
    /// ese nombre, se retira antes del cambio y se borra después.
    pub fn publish(&self, index: &VectorIndex) -> Result<PathBuf> {
        fs::create_dir_all(&self.root).map_err(|e| RagError::storage(&self.root, e))?;

        let name = index.name();
        let target = self.root.join(name);
        let staging = self.root.join(format!(".staging-{name}-{}", Uuid::new_v4()));

        if let Err(e) = write_index_files(&staging, index) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        let retired = if target.exists() {
            let retired = self.root.join(format!(".retired-{name}-{}", Uuid::new_v4()));
            if let Err(e) = fs::rename(&target, &retired) {
                let _ = fs::remove_dir_all(&staging);
                return Err(RagError::storage(&target, e));
            }
            Some(retired)
        } else {
            None
        };

        if let Err(e) = fs::rename(&staging, &target) {
            // Se restaura la versión anterior para no dejar el nombre vacío.
            if let Some(retired) = &retired {
                let _ = fs::rename(retired, &target);
            }
            let _ = fs::remove_dir_all(&staging);
            return Err(RagError::storage(&target, e));
        }

        if let Some(retired) = retired {
            if let Err(e) = fs::remove_dir_all(&retired) {
                warn!("No se pudo borrar el índice retirado {}: {e}", retired.display());
            }
        }

        info!(
            index = name,
            chunks = index.len(),
            "Índice publicado en {}",
            target.display()
        );
        Ok(target)
    }

    /// Carga todos los índices publicados, ordenados por nombre.
    ///
    /// Falla si la raíz no existe, no se puede leer, no contiene ningún índice
    /// o alguno de ellos está corrupto: hay que ejecutar la ingesta antes.
    pub fn load_all(&self) -> Result<BTreeMap<String, Arc<VectorIndex>>> {
        if !self.root.is_dir() {
            return Err(RagError::storage(
                &self.root,
                "no existe el directorio de índices; ejecuta primero `build_index`",
            ));
        }

        let entries = fs::read_dir(&self.root).map_err(|e| RagError::storage(&self.root, e))?;
        let mut indexes = BTreeMap::new();

        for entry in entries {
            let entry = entry.map_err(|e| RagError::storage(&self.root, e))?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            let path = entry.path();
            if file_name.starts_with('.') || !path.is_dir() {
                debug!("Ignorando entrada no publicada: {}", path.display());
                continue;
            }

            let index = read_index(&path)?;
            if index.name() != file_name {
                return Err(RagError::storage(
                    &path,
                    format!("el manifiesto declara el nombre '{}'", index.name()),
                ));
            }
            info!(index = %file_name, chunks = index.len(), "Índice cargado");
            indexes.insert(file_name, Arc::new(index));
        }

        if indexes.is_empty() {
            return Err(RagError::storage(
                &self.root,
                "no hay índices publicados; ejecuta primero `build_index`",
            ));
        }
        Ok(indexes)
    }
}

fn write_index_files(dir: &Path, index: &VectorIndex) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| RagError::storage(dir, e))?;
    write_json(&dir.join(CHUNKS_FILE), &index.entries)?;
    // El manifiesto va el último: sin él el directorio no es un índice válido.
    write_json(&dir.join(MANIFEST_FILE), &index.manifest)?;
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value).map_err(|e| RagError::storage(path, e))?;
    fs::write(path, bytes).map_err(|e| RagError::storage(path, e))
}

fn read_index(dir: &Path) -> Result<VectorIndex> {
    let manifest: IndexManifest = read_json(&dir.join(MANIFEST_FILE))?;
    let entries: Vec<IndexedChunk> = read_json(&dir.join(CHUNKS_FILE))?;

    if entries.len() != manifest.chunk_count {
        return Err(RagError::storage(
            dir,
            format!(
                "el manifiesto declara {} chunks y hay {}",
                manifest.chunk_count,
                entries.len()
            ),
        ));
    }
    if entries.iter().any(|e| e.embedding.len() != manifest.dimensions) {
        return Err(RagError::storage(
            dir,
            format!("hay vectores con dimensión distinta de {}", manifest.dimensions),
        ));
    }

    Ok(VectorIndex { manifest, entries })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| RagError::storage(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| RagError::storage(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn entry(source: &str, text: &str, embedding: Vec<f64>) -> IndexedChunk {
        IndexedChunk {
            chunk: Chunk {
                text: text.to_string(),
                source: source.to_string(),
                sequence_position: 0,
            },
            embedding,
        }
    }

    fn sample(name: &str) -> VectorIndex {
        VectorIndex::build(
            name,
            "test-model",
            1000,
            150,
            vec![
                entry("a.txt", "norte", vec![1.0, 0.0]),
                entry("a.txt", "este", vec![0.0, 1.0]),
                entry("b.txt", "noreste", vec![1.0, 1.0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn search_orders_by_descending_score() {
        let index = sample("docs");
        let hits = index.search(&[1.0, 0.1], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].1.chunk.text, "norte");
        assert_eq!(hits[1].1.chunk.text, "noreste");
        assert!(hits[0].0 >= hits[1].0);
    }

    #[test]
    fn search_breaks_ties_by_position() {
        let index = VectorIndex::build(
            "ties",
            "m",
            10,
            1,
            vec![entry("x", "primero", vec![1.0]), entry("x", "segundo", vec![1.0])],
        )
        .unwrap();
        let hits = index.search(&[1.0], 2);
        assert_eq!(hits[0].1.chunk.text, "primero");
        assert_eq!(hits[1].1.chunk.text, "segundo");
    }

    #[test]
    fn build_rejects_mixed_dimensions_and_bad_names() {
        let mixed = VectorIndex::build(
            "mixed",
            "m",
            10,
            1,
            vec![entry("x", "a", vec![1.0]), entry("x", "b", vec![1.0, 2.0])],
        );
        assert_eq!(mixed.unwrap_err().kind(), "embedding_error");
        assert!(VectorIndex::build(".hidden", "m", 10, 1, Vec::new()).is_err());
        assert!(VectorIndex::build("a/b", "m", 10, 1, Vec::new()).is_err());
    }

    #[test]
    fn manifest_lists_documents_in_first_seen_order() {
        let index = sample("docs");
        assert_eq!(index.manifest().documents, vec!["a.txt", "b.txt"]);
        assert_eq!(index.manifest().dimensions, 2);
        assert_eq!(index.manifest().chunk_count, 3);
    }

    #[test]
    fn publish_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.publish(&sample("docs_v1")).unwrap();
        store.publish(&sample("docs_v2")).unwrap();

        let loaded = store.load_all().unwrap();
        let names: Vec<&String> = loaded.keys().collect();
        assert_eq!(names, vec!["docs_v1", "docs_v2"]);
        assert_eq!(loaded["docs_v1"].entries(), sample("docs_v1").entries());
    }

    #[test]
    fn republish_replaces_previous_index_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.publish(&sample("docs")).unwrap();

        let smaller = VectorIndex::build("docs", "m", 10, 1, vec![entry("c.txt", "solo", vec![1.0])]).unwrap();
        store.publish(&smaller).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded["docs"].len(), 1);
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn staging_directories_are_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.publish(&sample("docs")).unwrap();
        fs::create_dir(dir.path().join(".staging-docs_v9-123")).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn missing_or_empty_root_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = IndexStore::new(dir.path().join("nope"));
        assert_eq!(missing.load_all().unwrap_err().kind(), "storage_error");

        let empty = IndexStore::new(dir.path());
        assert_eq!(empty.load_all().unwrap_err().kind(), "storage_error");
    }

    #[test]
    fn corrupt_index_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.publish(&sample("docs")).unwrap();
        fs::write(dir.path().join("docs").join(CHUNKS_FILE), b"{not json").unwrap();

        assert_eq!(store.load_all().unwrap_err().kind(), "storage_error");
    }
}
