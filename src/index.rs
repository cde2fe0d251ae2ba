//! Vector index over document chunks.
//!
//! Chunks live in SQLite next to their embedding and the name of the model
//! that produced it. A document's chunk set is always replaced inside one
//! transaction, so readers see either every old chunk or every new one.
//!
//! Writers for the same filename are serialized by a per-filename slot.
//! Each slot also carries a deletion epoch: an ingestion records the epoch
//! when it starts ([`IngestTicket`]) and its commit is dropped if a delete
//! of that filename happened in the meantime.

use sqlx::{Row, SqlitePool};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::corpus::{Corpus, StagedBlob};
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::AgentResult;
use crate::models::{Chunk, DocumentRecord, EmbeddedChunk, RetrievedChunk};

#[derive(Default)]
struct FileSlot {
    lock: tokio::sync::Mutex<()>,
    epoch: AtomicU64,
}

/// Proof of when an ingestion started, relative to deletions of its file.
///
/// Holds the file's slot, so its epoch stays comparable until the ticket is
/// handed back through [`VectorIndex::release`].
pub struct IngestTicket {
    filename: String,
    slot: Arc<FileSlot>,
    epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Written,
    /// The file was deleted after the ingestion started; nothing was written.
    Superseded,
}

pub struct VectorIndex {
    pool: SqlitePool,
    corpus: Corpus,
    slots: Mutex<HashMap<String, Arc<FileSlot>>>,
}

impl VectorIndex {
    pub fn new(pool: SqlitePool, corpus: Corpus) -> Self {
        Self {
            pool,
            corpus,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, filename: &str) -> Arc<FileSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(filename.to_string()).or_default())
    }

    /// Forget a slot once nobody but the map refers to it.
    fn prune(&self, filename: &str, slot: Arc<FileSlot>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        drop(slot);
        if slots
            .get(filename)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            slots.remove(filename);
        }
    }

    pub fn ticket(&self, filename: &str) -> IngestTicket {
        let slot = self.slot(filename);
        let epoch = slot.epoch.load(Ordering::SeqCst);
        IngestTicket {
            filename: filename.to_string(),
            slot,
            epoch,
        }
    }

    /// Hand back a ticket once its ingestion has finished, successfully or not.
    pub fn release(&self, ticket: IngestTicket) {
        self.prune(&ticket.filename, ticket.slot);
    }

    /// Filenames with a live lock slot.
    pub fn slot_count(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Replace the document row and its whole chunk set along with its blob.
    pub async fn upsert(
        &self,
        ticket: &IngestTicket,
        record: &DocumentRecord,
        chunks: &[EmbeddedChunk],
        model: &str,
        blob: StagedBlob,
    ) -> AgentResult<UpsertOutcome> {
        let slot = &ticket.slot;
        let _guard = slot.lock.lock().await;

        if slot.epoch.load(Ordering::SeqCst) != ticket.epoch {
            tracing::info!(file = %ticket.filename, "ingestion superseded by delete");
            return Ok(UpsertOutcome::Superseded);
        }

        let mut tx = self.pool.begin().await?;

        Corpus::write_record(&mut *tx, record).await?;

        sqlx::query("DELETE FROM chunks WHERE filename = ?")
            .bind(&record.filename)
            .execute(&mut *tx)
            .await?;

        for embedded in chunks {
            sqlx::query(
                "INSERT INTO chunks (filename, seq, text, hash, model, dims, embedding) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&embedded.chunk.filename)
            .bind(embedded.chunk.seq)
            .bind(&embedded.chunk.text)
            .bind(&embedded.chunk.hash)
            .bind(model)
            .bind(embedded.embedding.len() as i64)
            .bind(vec_to_blob(&embedded.embedding))
            .execute(&mut *tx)
            .await?;
        }

        // Dropping `tx` on a failed rename rolls the rows back.
        blob.publish().await?;
        tx.commit().await?;

        tracing::debug!(file = %record.filename, chunks = chunks.len(), "chunks replaced");
        Ok(UpsertOutcome::Written)
    }

    /// Delete a document, its chunks and its blob. Returns whether it existed.
    ///
    /// Any ingestion of the same filename that started earlier is cancelled.
    pub async fn remove(&self, filename: &str) -> AgentResult<bool> {
        let slot = self.slot(filename);
        let result = {
            let _guard = slot.lock.lock().await;
            slot.epoch.fetch_add(1, Ordering::SeqCst);
            self.remove_locked(filename).await
        };
        self.prune(filename, slot);
        result
    }

    async fn remove_locked(&self, filename: &str) -> AgentResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE filename = ?")
            .bind(filename)
            .execute(&mut *tx)
            .await?;
        let existed = Corpus::delete_record(&mut *tx, filename).await?;
        tx.commit().await?;

        self.corpus.remove_blob(filename).await?;
        Ok(existed)
    }

    /// Top `k` chunks embedded with `model`, most similar first.
    pub async fn query(
        &self,
        embedding: &[f32],
        model: &str,
        k: usize,
    ) -> AgentResult<Vec<RetrievedChunk>> {
        let rows = sqlx::query("SELECT filename, seq, text, embedding FROM chunks WHERE model = ?")
            .bind(model)
            .fetch_all(&self.pool)
            .await?;

        let candidates = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                RetrievedChunk {
                    filename: row.get("filename"),
                    seq: row.get("seq"),
                    text: row.get("text"),
                    score: cosine_similarity(embedding, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(rank(candidates, k))
    }

    /// Chunks whose stored embedding was produced by a model other than `model`.
    pub async fn stale_chunks(&self, model: &str) -> AgentResult<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT filename, seq, text, hash FROM chunks WHERE model != ? ORDER BY filename, seq",
        )
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Chunk {
                filename: row.get("filename"),
                seq: row.get("seq"),
                text: row.get("text"),
                hash: row.get("hash"),
            })
            .collect())
    }

    /// Overwrite embeddings of existing chunks whose text is unchanged.
    ///
    /// Returns the number of chunks updated.
    pub async fn update_embeddings(
        &self,
        updates: &[EmbeddedChunk],
        model: &str,
    ) -> AgentResult<usize> {
        let mut tx = self.pool.begin().await?;
        let mut updated = 0usize;

        for embedded in updates {
            let result = sqlx::query(
                "UPDATE chunks SET embedding = ?, model = ?, dims = ? WHERE filename = ? AND seq = ? AND hash = ?",
            )
            .bind(vec_to_blob(&embedded.embedding))
            .bind(model)
            .bind(embedded.embedding.len() as i64)
            .bind(&embedded.chunk.filename)
            .bind(embedded.chunk.seq)
            .bind(&embedded.chunk.hash)
            .execute(&mut *tx)
            .await?;
            updated += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(updated)
    }

    pub async fn chunk_count(&self, filename: &str) -> AgentResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE filename = ?")
            .bind(filename)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Chunks with no document row. Always zero unless storage was tampered with.
    pub async fn orphan_count(&self) -> AgentResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks WHERE filename NOT IN (SELECT filename FROM documents)",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

/// Sort by descending score, ties by filename then sequence, and keep `k`.
fn rank(mut candidates: Vec<RetrievedChunk>, k: usize) -> Vec<RetrievedChunk> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(CmpOrdering::Equal)
            .then_with(|| a.filename.cmp(&b.filename))
            .then_with(|| a.seq.cmp(&b.seq))
    });
    candidates.truncate(k);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(filename: &str, seq: i64, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            filename: filename.to_string(),
            seq,
            text: String::new(),
            score,
        }
    }

    #[test]
    fn rank_orders_by_score_then_name_then_seq() {
        let ranked = rank(
            vec![
                hit("b.txt", 0, 0.5),
                hit("a.txt", 1, 0.5),
                hit("a.txt", 0, 0.5),
                hit("c.txt", 0, 0.9),
            ],
            10,
        );
        let order: Vec<(&str, i64)> = ranked.iter().map(|h| (h.filename.as_str(), h.seq)).collect();
        assert_eq!(
            order,
            vec![("c.txt", 0), ("a.txt", 0), ("a.txt", 1), ("b.txt", 0)]
        );
    }

    #[test]
    fn rank_truncates_to_k() {
        let ranked = rank(
            (0..10).map(|i| hit("a.txt", i, i as f32 / 10.0)).collect(),
            4,
        );
        assert_eq!(ranked.len(), 4);
        assert_eq!(ranked[0].seq, 9);
    }

    #[test]
    fn rank_with_no_candidates_is_empty() {
        assert!(rank(Vec::new(), 4).is_empty());
    }
}
