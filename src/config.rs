use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Where raw uploaded blobs are kept, keyed by filename.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub corpus_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    1024
}
fn default_overlap_chars() -> usize {
    128
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// Fallback when the credential record carries no embedding model.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            url: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    256
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_model_provider(),
            model: default_chat_model(),
            temperature: 0.0,
            base_url: default_base_url(),
            timeout_secs: default_model_timeout_secs(),
        }
    }
}

fn default_model_provider() -> String {
    "openai".to_string()
}
fn default_chat_model() -> String {
    "gpt-4.1".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LifecycleConfig {
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,
    /// Let new chat turns use the old instance while a reinit is running
    /// instead of rejecting them with `Busy`.
    #[serde(default)]
    pub serve_during_reinit: bool,
    #[serde(default = "default_true")]
    pub init_on_start: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            init_timeout_secs: default_init_timeout_secs(),
            serve_during_reinit: false,
            init_on_start: true,
        }
    }
}

fn default_init_timeout_secs() -> u64 {
    20
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Upper bound on a whole multipart upload request.
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_max_upload_mb() -> usize {
    50
}

const MAX_RETRIES: u32 = 10;

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a TOML configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_chars == 0 {
        bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        bail!("chunking.overlap_chars must be smaller than chunking.max_chars");
    }

    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }

    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "openai" | "ollama" | "hash" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be openai, ollama, or hash.",
            other
        ),
    }
    if config.embedding.provider == "hash" && config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0 when provider is 'hash'");
    }

    if config.embedding.timeout_secs == 0 {
        bail!("embedding.timeout_secs must be > 0");
    }
    if config.embedding.max_retries > MAX_RETRIES {
        bail!("embedding.max_retries must be <= {}", MAX_RETRIES);
    }

    match config.model.provider.as_str() {
        "openai" => {}
        other => bail!("Unknown model provider: '{}'. Must be openai.", other),
    }

    if config.model.timeout_secs == 0 {
        bail!("model.timeout_secs must be > 0");
    }

    if config.lifecycle.init_timeout_secs == 0 {
        bail!("lifecycle.init_timeout_secs must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "/tmp/agent.sqlite"

[storage]
corpus_dir = "/tmp/corpus"
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.chunking.max_chars, 1024);
        assert_eq!(config.chunking.overlap_chars, 128);
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.embedding.provider, "openai");
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert!(!config.lifecycle.serve_during_reinit);
        assert!(config.lifecycle.init_on_start);
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let content = format!("{}\n[chunking]\nmax_chars = 100\noverlap_chars = 100\n", MINIMAL);
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("overlap_chars"));
    }

    #[test]
    fn unknown_embedding_provider_rejected() {
        let content = format!("{}\n[embedding]\nprovider = \"magic\"\n", MINIMAL);
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn example_config_parses() {
        let config = parse_config(include_str!("../config/agent.example.toml")).unwrap();
        assert_eq!(config.embedding.batch_size, 64);
        assert_eq!(config.server.max_upload_mb, 50);
    }

    #[test]
    fn zero_timeouts_rejected() {
        let content = format!("{}\n[embedding]\ntimeout_secs = 0\n", MINIMAL);
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("embedding.timeout_secs"));

        let content = format!("{}\n[model]\ntimeout_secs = 0\n", MINIMAL);
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("model.timeout_secs"));
    }

    #[test]
    fn huge_retry_count_rejected() {
        let content = format!("{}\n[embedding]\nmax_retries = 4000000000\n", MINIMAL);
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn zero_top_k_rejected() {
        let content = format!("{}\n[retrieval]\ntop_k = 0\n", MINIMAL);
        assert!(parse_config(&content).is_err());
    }
}
