//! LangAssist: asistente de preguntas y respuestas sobre documentación con
//! recuperación aumentada (RAG) sobre varios índices vectoriales.

pub mod api;
pub mod app_state;
pub mod chunker;
pub mod config;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod llm;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod models;
pub mod rag;
pub mod retriever;
pub mod vector_store;

pub use error::{RagError, Result};
