//! CLI de ingesta: construye un índice por cada documento de `DOC_PATHS` y,
//! si se configura `ISSUES_FOLDER`, un índice conjunto con esa carpeta.

use std::sync::Arc;

use anyhow::{bail, Context};
use langassist_rag::{
    chunker::TextSplitter,
    config::AppConfig,
    ingest::Indexer,
    llm::LlmManager,
    vector_store::IndexStore,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;

    if cfg.doc_paths.is_empty() && cfg.issues_folder.is_none() {
        bail!("No hay nada que indexar: configura DOC_PATHS o ISSUES_FOLDER");
    }

    // Se comprueban todas las entradas antes de gastar una sola llamada de embeddings.
    let missing: Vec<String> = cfg
        .doc_paths
        .iter()
        .filter(|p| !p.is_file())
        .map(|p| p.display().to_string())
        .collect();
    if !missing.is_empty() {
        bail!("No se encuentran los documentos: {}", missing.join(", "));
    }
    if let Some(folder) = &cfg.issues_folder {
        if !folder.is_dir() {
            bail!("ISSUES_FOLDER no es un directorio: {}", folder.display());
        }
    }

    let llm = LlmManager::from_config(&cfg).context("Error inicializando LLM Manager")?;
    let splitter = TextSplitter::new(cfg.chunk_size, cfg.chunk_overlap)?;
    let indexer = Indexer::new(
        splitter,
        Arc::new(llm),
        IndexStore::new(&cfg.storage_root),
        cfg.embed_batch_size,
    );

    info!(
        "Indexando {} documentos en {}",
        cfg.doc_paths.len(),
        cfg.storage_root.display()
    );
    let mut summary = indexer
        .build_per_document(&cfg.doc_paths)
        .await
        .context("Error en la ingesta de documentos")?;

    if let Some(folder) = &cfg.issues_folder {
        let merged = indexer
            .build_merged(folder)
            .await
            .with_context(|| format!("Error indexando la carpeta {}", folder.display()))?;
        summary.absorb(merged);
    }

    info!("¡Indexación completada! {}", summary);
    println!("{summary}");
    Ok(())
}
