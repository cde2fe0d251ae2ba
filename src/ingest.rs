//! Document ingestion pipeline.
//!
//! Each uploaded file runs through extraction → chunking → embedding →
//! storage on its own task. Files succeed or fail independently; a failure
//! never leaves partial chunks behind because the final write replaces the
//! document's whole chunk set in one transaction.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, Config, EmbeddingConfig};
use crate::corpus::{validate_name, Corpus};
use crate::embedding::embed_batched;
use crate::error::{AgentError, AgentResult};
use crate::extract::extract;
use crate::index::{IngestTicket, UpsertOutcome, VectorIndex};
use crate::lifecycle::LifecycleManager;
use crate::models::{DocumentInfo, DocumentRecord, EmbeddedChunk, UploadedFile};

/// Result of ingesting one file.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub name: String,
    /// Number of chunks written.
    pub result: Result<usize, AgentError>,
}

impl IngestOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ReembedReport {
    pub model: String,
    pub reembedded: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct IngestPipeline {
    lifecycle: Arc<LifecycleManager>,
    index: Arc<VectorIndex>,
    corpus: Corpus,
    chunking: ChunkingConfig,
    batch_size: usize,
    batch_timeout: Duration,
}

impl IngestPipeline {
    pub fn new(
        config: &Config,
        lifecycle: Arc<LifecycleManager>,
        index: Arc<VectorIndex>,
        corpus: Corpus,
    ) -> Self {
        Self {
            lifecycle,
            index,
            corpus,
            chunking: config.chunking.clone(),
            batch_size: config.embedding.batch_size,
            batch_timeout: batch_timeout(&config.embedding),
        }
    }

    /// Ingest every file concurrently. Outcomes are returned in input order.
    pub async fn ingest(&self, files: Vec<UploadedFile>) -> Vec<IngestOutcome> {
        let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
        let mut results: Vec<Option<Result<usize, AgentError>>> = vec![None; files.len()];

        let mut set = JoinSet::new();
        for (i, file) in files.into_iter().enumerate() {
            let pipeline = self.clone();
            set.spawn(async move { (i, pipeline.ingest_one(file).await) });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((i, result)) => results[i] = Some(result),
                Err(e) => tracing::error!(error = %e, "ingestion task panicked"),
            }
        }

        names
            .into_iter()
            .zip(results)
            .map(|(name, result)| {
                let result = result.unwrap_or_else(|| {
                    Err(AgentError::Storage("ingestion task failed".to_string()))
                });
                if let Err(e) = &result {
                    tracing::warn!(file = %name, code = e.code(), error = %e, "ingestion failed");
                }
                IngestOutcome { name, result }
            })
            .collect()
    }

    async fn ingest_one(&self, file: UploadedFile) -> AgentResult<usize> {
        validate_name(&file.name)?;
        let ticket = self.index.ticket(&file.name);
        let result = self.ingest_with_ticket(file, &ticket).await;
        self.index.release(ticket);
        result
    }

    async fn ingest_with_ticket(
        &self,
        file: UploadedFile,
        ticket: &IngestTicket,
    ) -> AgentResult<usize> {
        let UploadedFile { name, bytes } = file;

        let extract_name = name.clone();
        let (bytes, extracted) = tokio::task::spawn_blocking(move || {
            let extracted = extract(&extract_name, &bytes);
            (bytes, extracted)
        })
        .await
        .map_err(|e| AgentError::Storage(format!("extraction task failed: {}", e)))?;

        let extracted =
            extracted.map_err(|e| AgentError::UnsupportedFormat(format!("{}: {}", name, e)))?;

        let chunks = chunk_text(
            &name,
            &extracted.text,
            self.chunking.max_chars,
            self.chunking.overlap_chars,
        );
        if chunks.is_empty() {
            return Err(AgentError::EmptyContent(format!(
                "{} contains no extractable text",
                name
            )));
        }

        let agent = self
            .lifecycle
            .current()
            .map_err(|e| AgentError::EmbeddingFailure(format!("{}: {}", name, e)))?;
        let embedder = agent.embedder();

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let batches = u32::try_from(texts.len().div_ceil(self.batch_size.max(1))).unwrap_or(u32::MAX);
        let deadline = self.batch_timeout.saturating_mul(batches);
        let vectors =
            match tokio::time::timeout(deadline, embed_batched(embedder, &texts, self.batch_size))
                .await
            {
                Ok(Ok(vectors)) => vectors,
                Ok(Err(e)) => {
                    return Err(AgentError::EmbeddingFailure(format!("{}: {}", name, e)));
                }
                Err(_) => {
                    return Err(AgentError::EmbeddingFailure(format!(
                        "{}: embedding timed out",
                        name
                    )));
                }
            };

        let embedded: Vec<EmbeddedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
            .collect();

        let record = DocumentRecord {
            filename: name.clone(),
            size: bytes.len() as i64,
            modified: chrono::Utc::now().timestamp(),
            content_type: extracted.content_type.to_string(),
            content_hash: bytes_hash(&bytes),
        };

        let blob = self.corpus.stage_blob(&name, &bytes).await?;
        let outcome = self
            .index
            .upsert(
                ticket,
                &record,
                &embedded,
                embedder.model_name(),
                blob,
            )
            .await?;

        match outcome {
            UpsertOutcome::Written => {
                tracing::info!(file = %name, chunks = embedded.len(), "ingested");
                Ok(embedded.len())
            }
            UpsertOutcome::Superseded => Err(AgentError::Cancelled(format!(
                "{} was deleted while it was being ingested",
                name
            ))),
        }
    }

    /// Remove a document and its chunks. `false` when nothing was stored under `name`.
    pub async fn delete(&self, name: &str) -> AgentResult<bool> {
        validate_name(name)?;
        let existed = self.index.remove(name).await?;
        if existed {
            tracing::info!(file = %name, "deleted");
        }
        Ok(existed)
    }

    pub async fn list(&self) -> AgentResult<Vec<DocumentInfo>> {
        self.corpus.list().await
    }

    /// Re-embed chunks produced by a model other than the active one.
    pub async fn reembed_stale(&self) -> AgentResult<ReembedReport> {
        let agent = self.lifecycle.current()?;
        let embedder = agent.embedder();
        let model = embedder.model_name().to_string();

        let stale = self.index.stale_chunks(&model).await?;
        let mut report = ReembedReport {
            model: model.clone(),
            ..Default::default()
        };

        for batch in stale.chunks(self.batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = match tokio::time::timeout(
                self.batch_timeout,
                embed_batched(embedder, &texts, self.batch_size),
            )
            .await
            {
                Ok(Ok(vectors)) => vectors,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, count = batch.len(), "re-embedding batch failed");
                    report.failed += batch.len();
                    continue;
                }
                Err(_) => {
                    tracing::warn!(count = batch.len(), "re-embedding batch timed out");
                    report.failed += batch.len();
                    continue;
                }
            };

            let updates: Vec<EmbeddedChunk> = batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
                .collect();
            report.reembedded += self.index.update_embeddings(&updates, &model).await?;
        }

        tracing::info!(
            model = %report.model,
            reembedded = report.reembedded,
            failed = report.failed,
            "re-embedding finished"
        );
        Ok(report)
    }
}

/// Upper bound for one embedding batch: every attempt may hit the client
/// timeout, plus the backoff between attempts.
fn batch_timeout(embedding: &EmbeddingConfig) -> Duration {
    let secs = embedding
        .timeout_secs
        .saturating_mul(embedding.max_retries as u64 + 1)
        .saturating_add(1u64 << embedding.max_retries.min(5));
    Duration::from_secs(secs)
}

fn bytes_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
