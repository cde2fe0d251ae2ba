//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`OpenAIEmbedder`]**: calls an OpenAI-compatible `/embeddings` endpoint with retry and backoff.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`HashEmbedder`]**: deterministic feature hashing, fully offline.
//!
//! Also provides vector utilities used by the index:
//! - [`cosine_similarity`]: compute similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Retry Strategy
//!
//! The HTTP providers retry transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 401/403 → fail immediately as unauthorized
//! - other 4xx → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, ... (capped at 2^5)

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{AgentError, AgentResult, BackendError};
use crate::models::CredentialSet;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Trait for embedding backends.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier stored next to every vector (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError>;

    /// Cheap round-trip proving the backend accepts our credentials.
    async fn verify(&self) -> Result<(), BackendError> {
        self.embed(&["ping".to_string()]).await.map(|_| ())
    }
}

/// Embed `texts` in batches of `batch_size`, checking the vector count.
pub async fn embed_batched(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, BackendError> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let vectors = provider.embed(batch).await?;
        if vectors.len() != batch.len() {
            return Err(BackendError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                vectors.len()
            )));
        }
        out.extend(vectors);
    }
    Ok(out)
}

/// Embed a single query text.
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    text: &str,
) -> Result<Vec<f32>, BackendError> {
    provider
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::InvalidResponse("empty embedding response".to_string()))
}

/// Create the embedding backend bound to `credentials`.
///
/// The credential record's embedding model wins over the configured default.
/// The OpenAI provider fails with [`AgentError::Authentication`] when no key
/// is stored.
pub fn create_embedder(
    config: &EmbeddingConfig,
    credentials: &CredentialSet,
) -> AgentResult<Arc<dyn EmbeddingProvider>> {
    let model = credentials
        .embedding_model
        .clone()
        .unwrap_or_else(|| config.model.clone());

    match config.provider.as_str() {
        "openai" => {
            let api_key = credentials.openai_key.clone().ok_or_else(|| {
                AgentError::Authentication("no OpenAI API key configured".to_string())
            })?;
            Ok(Arc::new(OpenAIEmbedder::new(config, api_key, model)?))
        }
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config, model)?)),
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dims))),
        other => Err(AgentError::Validation(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

fn http_client(timeout_secs: u64) -> AgentResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AgentError::DependencyUnavailable(format!("http client: {}", e)))
}

/// Send `request` with backoff, retrying only transient failures.
async fn send_with_retry(
    build: impl Fn() -> reqwest::RequestBuilder,
    max_retries: u32,
) -> Result<serde_json::Value, BackendError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let err = match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response.json().await.map_err(BackendError::from);
                }
                let body = response.text().await.unwrap_or_default();
                BackendError::from_status(status, &body)
            }
            Err(e) => BackendError::from(e),
        };

        if !err.is_transient() {
            return Err(err);
        }
        tracing::warn!(attempt, error = %err, "embedding request failed, retrying");
        last_err = Some(err);
    }

    Err(last_err
        .unwrap_or_else(|| BackendError::Unavailable("embedding failed after retries".into())))
}

// ============ OpenAI ============

/// Embedding provider for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    max_retries: u32,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: String, model: String) -> AgentResult<Self> {
        let base = config.url.as_deref().unwrap_or(OPENAI_BASE_URL);
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key,
            model,
            url: format!("{}/embeddings", base.trim_end_matches('/')),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = send_with_retry(
            || {
                self.client
                    .post(&self.url)
                    .bearer_auth(&self.api_key)
                    .json(&body)
            },
            self.max_retries,
        )
        .await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, BackendError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| BackendError::InvalidResponse("missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(pos as u64);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| BackendError::InvalidResponse("missing embedding".to_string()))?;
        indexed.push((index, json_floats(embedding)));
    }
    indexed.sort_by_key(|(i, _)| *i);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn json_floats(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ Ollama ============

/// Embedding provider using a local Ollama instance (`POST /api/embed`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    url: String,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig, model: String) -> AgentResult<Self> {
        let base = config.url.as_deref().unwrap_or(OLLAMA_BASE_URL);
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model,
            url: format!("{}/api/embed", base.trim_end_matches('/')),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = send_with_retry(|| self.client.post(&self.url).json(&body), self.max_retries)
            .await?;

        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| BackendError::InvalidResponse("missing embeddings array".to_string()))?;

        embeddings
            .iter()
            .map(|e| {
                e.as_array()
                    .map(|values| json_floats(values))
                    .ok_or_else(|| {
                        BackendError::InvalidResponse("embedding is not an array".to_string())
                    })
            })
            .collect()
    }
}

// ============ Hash ============

const STOP_WORDS: &[&str] = &[
    "the", "is", "at", "which", "on", "a", "an", "as", "are", "was", "were", "for", "to", "of",
    "in", "and", "or", "but", "with", "by", "from", "this", "that", "be", "it", "its", "what",
];

/// Offline embedder built on feature hashing of word tokens.
///
/// Not semantic, but stable across processes and content-dependent, which
/// is enough for lexical retrieval on a small corpus and for tests.
pub struct HashEmbedder {
    dims: usize,
    model: String,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            dims,
            model: format!("hash-{}", dims),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let lower = text.to_lowercase();
        for token in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty() && !STOP_WORDS.contains(t))
        {
            let h = fnv1a(token.as_bytes());
            let idx = (h % self.dims as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf29ce484222325u64, |acc, b| {
        (acc ^ *b as u64).wrapping_mul(0x100000001b3)
    })
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    async fn verify(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors, zero vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn openai_response_is_reordered_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn openai_response_without_data_is_invalid() {
        let err = parse_openai_response(&serde_json::json!({"error": "x"})).unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse(_)));
    }

    #[test]
    fn hash_embedder_is_deterministic_and_lexical() {
        let e = HashEmbedder::new(128);
        let a = e.embed_one("The capital of France is Paris.");
        assert_eq!(a, e.embed_one("The capital of France is Paris."));

        let q = e.embed_one("What is the capital of France?");
        let unrelated = e.embed_one("Kubernetes pods restart on failure.");
        assert!(cosine_similarity(&q, &a) > cosine_similarity(&q, &unrelated));
    }

    #[test]
    fn openai_requires_key() {
        let config = EmbeddingConfig::default();
        let err = create_embedder(&config, &CredentialSet::default()).err().unwrap();
        assert_eq!(err.code(), "authentication_error");
    }

    #[test]
    fn credential_model_overrides_config() {
        let config = EmbeddingConfig::default();
        let creds = CredentialSet {
            openai_key: Some("sk-test".into()),
            embedding_model: Some("text-embedding-3-large".into()),
            ..Default::default()
        };
        let embedder = create_embedder(&config, &creds).unwrap();
        assert_eq!(embedder.model_name(), "text-embedding-3-large");
    }

    #[tokio::test]
    async fn batched_embedding_preserves_order() {
        let e = HashEmbedder::new(16);
        let texts: Vec<String> = (0..5).map(|i| format!("text {}", i)).collect();
        let vecs = embed_batched(&e, &texts, 2).await.unwrap();
        assert_eq!(vecs.len(), 5);
        assert_eq!(vecs[3], e.embed_one("text 3"));
    }
}
