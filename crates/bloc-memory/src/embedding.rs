use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bloc_config::{
    DEFAULT_OLLAMA_EMBEDDING_ENDPOINT, DEFAULT_OLLAMA_EMBEDDING_MODEL, EmbeddingProviderKind,
    MemoryConfig,
};
use serde_json::{Value, json};

use crate::MemoryError;

pub const HASHED_EMBEDDING_DIM: usize = 64;

const OLLAMA_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, MemoryError>;
}

/// Deterministic token-hash embedding. Identical text always yields an
/// identical vector, so similarity scores are reproducible across runs and
/// machines without any model.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashedEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for HashedEmbeddingProvider {
    fn name(&self) -> &str {
        EmbeddingProviderKind::Hashed.as_str()
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        Ok(hashed_embedding_for_text(text))
    }
}

/// Calls a local Ollama-compatible `/api/embeddings` endpoint.
pub struct OllamaEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaEmbeddingProvider {
    pub fn new(endpoint: Option<String>, model: Option<String>) -> Result<Self, MemoryError> {
        let client = reqwest::Client::builder()
            .timeout(OLLAMA_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_OLLAMA_EMBEDDING_ENDPOINT.to_owned()),
            model: model.unwrap_or_else(|| DEFAULT_OLLAMA_EMBEDDING_MODEL.to_owned()),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    fn name(&self) -> &str {
        EmbeddingProviderKind::Ollama.as_str()
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let body = json!({
            "model": self.model,
            "prompt": text,
        });

        let response: Value = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        extract_embedding_vector(&response)
    }
}

pub fn load_embedding_provider(
    config: &MemoryConfig,
) -> Result<Arc<dyn EmbeddingProvider>, MemoryError> {
    match config.embedding_provider {
        EmbeddingProviderKind::Hashed => Ok(Arc::new(HashedEmbeddingProvider)),
        EmbeddingProviderKind::Ollama => Ok(Arc::new(OllamaEmbeddingProvider::new(
            config.embedding_endpoint.clone(),
            config.embedding_model.clone(),
        )?)),
    }
}

fn hashed_embedding_for_text(text: &str) -> Vec<f32> {
    let mut embedding = vec![0.0f32; HASHED_EMBEDDING_DIM];
    let mut saw_token = false;

    for token in tokenize(text) {
        saw_token = true;
        let hash = fnv1a_64(token.to_ascii_lowercase().as_bytes());
        let index = (hash as usize) % HASHED_EMBEDDING_DIM;
        let sign = if ((hash >> 8) & 1) == 0 { 1.0 } else { -1.0 };
        embedding[index] += sign;
    }

    if !saw_token {
        return embedding;
    }
    normalize_embedding(embedding).unwrap_or_else(|| vec![0.0f32; HASHED_EMBEDDING_DIM])
}

fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn normalize_embedding(mut embedding: Vec<f32>) -> Option<Vec<f32>> {
    let norm_sq = embedding.iter().map(|value| value * value).sum::<f32>();
    if norm_sq <= f32::EPSILON {
        return None;
    }

    let norm = norm_sq.sqrt();
    for value in &mut embedding {
        *value /= norm;
    }
    Some(embedding)
}

fn extract_embedding_vector(response: &Value) -> Result<Vec<f32>, MemoryError> {
    for path in ["/embedding", "/embeddings/0", "/data/0/embedding"] {
        if let Some(values) = response.pointer(path).and_then(Value::as_array) {
            let mut embedding = Vec::with_capacity(values.len());
            for item in values {
                match item.as_f64() {
                    Some(number) if number.is_finite() => embedding.push(number as f32),
                    _ => {
                        return Err(MemoryError::Embedding(format!(
                            "non-numeric value at {path}"
                        )));
                    }
                }
            }
            if let Some(normalized) = normalize_embedding(embedding) {
                return Ok(normalized);
            }
        }
    }

    Err(MemoryError::Embedding(
        "missing embedding vector in response body".to_owned(),
    ))
}
