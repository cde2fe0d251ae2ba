//! Core data models.
//!
//! These types flow between the credential store, the ingestion pipeline, the
//! vector index and the chat orchestrator.

use serde::{Deserialize, Serialize};

/// The credentials an agent instance is built from.
///
/// Replaced as a whole value; `Debug` never prints key material.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    pub openai_key: Option<String>,
    pub composio_key: Option<String>,
    pub embedding_model: Option<String>,
}

impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSet")
            .field("openai_key", &self.openai_key.as_ref().map(|_| "<redacted>"))
            .field(
                "composio_key",
                &self.composio_key.as_ref().map(|_| "<redacted>"),
            )
            .field("embedding_model", &self.embedding_model)
            .finish()
    }
}

/// A partial credential update. Omitted fields keep their stored value.
#[derive(Clone, Default, Deserialize)]
pub struct CredentialUpdate {
    #[serde(default)]
    pub openai_key: Option<String>,
    #[serde(default)]
    pub composio_key: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
}

impl CredentialUpdate {
    /// True when no field carries a non-blank value.
    pub fn is_empty(&self) -> bool {
        [&self.openai_key, &self.composio_key, &self.embedding_model]
            .iter()
            .all(|f| f.as_deref().map(str::trim).unwrap_or("").is_empty())
    }
}

/// Presence flags for each credential; never carries the values.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CredentialStatus {
    pub openai_key: bool,
    pub composio_key: bool,
    pub embedding_model: bool,
}

/// A file as received from an upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Corpus listing entry.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DocumentInfo {
    pub name: String,
    pub size: i64,
    /// RFC 3339 modification time.
    pub modified: String,
}

/// Normalized document metadata stored alongside its chunks.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub filename: String,
    pub size: i64,
    pub modified: i64,
    pub content_type: String,
    pub content_hash: String,
}

/// A chunk of a document's normalized text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub filename: String,
    pub seq: i64,
    pub text: String,
    pub hash: String,
}

/// A chunk paired with the vector computed for it.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A query hit.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub filename: String,
    pub seq: i64,
    pub text: String,
    pub score: f32,
}

/// Snapshot of the page the user is looking at.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PageContext {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub excerpt: String,
}

/// One processed chat turn. Never persisted.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub message: String,
    pub context: PageContext,
    pub retrieved: Vec<RetrievedChunk>,
    pub response: String,
}
