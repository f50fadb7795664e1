//! Ingesta de documentos: lectura, troceado, embeddings por lotes y
//! publicación de índices.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use mime_guess::MimeGuess;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::{
    chunker::TextSplitter,
    embedding::{Embedder, EmbeddingRole},
    error::{RagError, Result},
    models::{Chunk, Document, IndexedChunk},
    vector_store::{IndexManifest, IndexStore, VectorIndex},
};

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestionSummary {
    pub documents_read: usize,
    pub documents_skipped: usize,
    pub chunks_created: usize,
    pub indexes_published: Vec<String>,
}

impl IngestionSummary {
    fn record(&mut self, manifest: &IndexManifest) {
        self.documents_read += manifest.documents.len();
        self.chunks_created += manifest.chunk_count;
        self.indexes_published.push(manifest.name.clone());
    }

    /// Acumula el resumen de otra pasada de ingesta.
    pub fn absorb(&mut self, other: IngestionSummary) {
        self.documents_read += other.documents_read;
        self.documents_skipped += other.documents_skipped;
        self.chunks_created += other.chunks_created;
        self.indexes_published.extend(other.indexes_published);
    }
}

/// Implementa cómo se mostrará el resumen como texto.
impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} documentos leídos, {} omitidos, {} chunks, {} índices publicados ({}).",
            self.documents_read,
            self.documents_skipped,
            self.chunks_created,
            self.indexes_published.len(),
            self.indexes_published.join(", ")
        )
    }
}

/// Decodifica bytes como UTF-8 y, si no lo son, una única vez como Latin-1.
///
/// Un texto que sigue pareciendo binario (contiene NUL) es un error.
pub fn decode_text(bytes: &[u8], source_label: &str) -> Result<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(utf8_err) => {
            warn!("{source_label} no es UTF-8 válido ({utf8_err}); se reintenta como Latin-1");
            bytes.iter().map(|&b| char::from(b)).collect()
        }
    };

    if text.contains('\0') {
        return Err(RagError::Decode {
            source_label: source_label.to_string(),
            message: "el contenido parece binario (bytes NUL)".to_string(),
        });
    }
    Ok(text)
}

/// Lee un fichero como `Document`. Los PDF se extraen con `pdf-extract`.
pub fn load_document(path: &Path) -> Result<Document> {
    let label = path.to_string_lossy().to_string();
    let is_pdf = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    let text = if is_pdf {
        pdf_extract::extract_text(path).map_err(|e| RagError::Decode {
            source_label: label.clone(),
            message: format!("No se pudo extraer texto del PDF: {e}"),
        })?
    } else {
        let bytes = fs::read(path).map_err(|e| RagError::storage(path, e))?;
        decode_text(&bytes, &label)?
    };

    Ok(Document::new(label, text))
}

/// ¿Es un fichero que sabemos indexar? Texto plano/markdown o PDF.
pub fn is_supported_file(path: &Path) -> bool {
    MimeGuess::from_path(path).iter().any(|mime| {
        mime.type_() == mime_guess::mime::TEXT || mime.subtype() == mime_guess::mime::PDF
    })
}

/// Nombre de índice para un documento: el nombre del fichero hasta el primer
/// punto (`docs_v1.txt` → `docs_v1`).
pub fn index_name_for_file(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .and_then(|n| n.split('.').next().map(str::to_string))
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            RagError::Configuration(format!(
                "No se puede derivar un nombre de índice de {}",
                path.display()
            ))
        })
}

/// Nombre de índice para una carpeta: su nombre base.
pub fn index_name_for_folder(folder: &Path) -> Result<String> {
    folder
        .components()
        .next_back()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .filter(|n| !n.is_empty() && n != "." && n != "..")
        .ok_or_else(|| {
            RagError::Configuration(format!(
                "No se puede derivar un nombre de índice de {}",
                folder.display()
            ))
        })
}

/// Construye y publica índices a partir de ficheros.
pub struct Indexer {
    splitter: TextSplitter,
    embedder: Arc<dyn Embedder>,
    store: IndexStore,
    batch_size: usize,
}

impl Indexer {
    pub fn new(
        splitter: TextSplitter,
        embedder: Arc<dyn Embedder>,
        store: IndexStore,
        batch_size: usize,
    ) -> Self {
        Self {
            splitter,
            embedder,
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Un índice por documento. Los documentos vacíos se omiten con un aviso.
    ///
    /// Dos rutas que dan el mismo nombre de índice son un error de
    /// configuración: se comprueba antes de leer nada.
    pub async fn build_per_document(&self, paths: &[PathBuf]) -> Result<IngestionSummary> {
        let mut names: Vec<(String, &PathBuf)> = Vec::with_capacity(paths.len());
        for path in paths {
            let name = index_name_for_file(path)?;
            if let Some((_, previous)) = names.iter().find(|(known, _)| *known == name) {
                return Err(RagError::Configuration(format!(
                    "{} y {} producirían el mismo índice '{name}'",
                    previous.display(),
                    path.display()
                )));
            }
            names.push((name, path));
        }

        let mut summary = IngestionSummary::default();
        for (name, path) in names {
            let document = load_document(path)?;
            let chunks: Vec<Chunk> = self.splitter.split(&document).collect();
            info!("Procesando {name}: {} chunks creados", chunks.len());

            if chunks.is_empty() {
                warn!("Fichero vacío o sin texto útil: {}", path.display());
                summary.documents_skipped += 1;
                continue;
            }

            let manifest = self.publish(&name, chunks).await?;
            summary.record(&manifest);
        }

        Ok(summary)
    }

    /// Un único índice con todos los ficheros soportados de la carpeta
    /// (sin recursión, en orden de nombre).
    pub async fn build_merged(&self, folder: &Path) -> Result<IngestionSummary> {
        if !folder.is_dir() {
            return Err(RagError::Configuration(format!(
                "La ruta no es un directorio: {}",
                folder.display()
            )));
        }
        let name = index_name_for_folder(folder)?;

        let mut summary = IngestionSummary::default();
        let mut all_chunks = Vec::new();
        let mut files = 0usize;

        for entry in WalkDir::new(folder)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| RagError::storage(folder, e))?;
            let path = entry.path();
            if !entry.file_type().is_file() || !is_supported_file(path) {
                info!("Saltando fichero no soportado: {}", path.display());
                continue;
            }

            let document = load_document(path)?;
            let before = all_chunks.len();
            all_chunks.extend(self.splitter.split(&document));
            if all_chunks.len() == before {
                warn!("Fichero vacío o sin texto útil: {}", path.display());
                summary.documents_skipped += 1;
            }
            files += 1;
        }

        info!(
            "Procesando {}: {} chunks creados a partir de {files} ficheros",
            folder.display(),
            all_chunks.len()
        );
        if all_chunks.is_empty() {
            return Err(RagError::Configuration(format!(
                "La carpeta {} no contiene documentos con texto",
                folder.display()
            )));
        }

        let manifest = self.publish(&name, all_chunks).await?;
        summary.record(&manifest);
        Ok(summary)
    }

    async fn publish(&self, name: &str, chunks: Vec<Chunk>) -> Result<IndexManifest> {
        let entries = self.embed_chunks(chunks).await?;
        let index = VectorIndex::build(
            name,
            self.embedder.model_id(),
            self.splitter.chunk_size(),
            self.splitter.chunk_overlap(),
            entries,
        )?;
        self.store.publish(&index)?;
        Ok(index.manifest().clone())
    }

    /// Embeddings por lotes, conservando el orden de los chunks.
    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<IndexedChunk>> {
        let mut entries = Vec::with_capacity(chunks.len());
        let total = chunks.len();

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts, EmbeddingRole::Document).await?;
            if vectors.len() != batch.len() {
                return Err(RagError::embedding(
                    self.embedder.model_id(),
                    format!(
                        "Número de embeddings ({}) distinto al número de chunks ({})",
                        vectors.len(),
                        batch.len()
                    ),
                ));
            }
            entries.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(chunk, embedding)| IndexedChunk { chunk, embedding }),
            );
            info!("Embeddings calculados: {}/{total}", entries.len());
        }

        Ok(entries)
    }
}
