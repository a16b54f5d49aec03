use thiserror::Error;

mod embedding;
mod repo_memory;
mod warnings;

pub use embedding::{
    EmbeddingProvider, HASHED_EMBEDDING_DIM, HashedEmbeddingProvider, OllamaEmbeddingProvider,
    load_embedding_provider,
};
pub use repo_memory::{
    ChangedFunction, DOC_CHUNK_CHARS, DocRunRequest, DriftRecordRequest, MemoryStats,
    RepoMemory, RunRecordRequest,
};
pub use warnings::{dedupe_warnings, function_name_for_change, memory_warnings};

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("store error: {0}")]
    Store(#[from] bloc_store::StoreError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid embedding response: {0}")]
    Embedding(String),
}
