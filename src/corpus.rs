//! Stored documents: raw blobs on disk plus one `documents` row per filename.
//!
//! Blobs are written to a hidden temp file first and renamed into place
//! inside the database transaction that references them, just before it
//! commits. A failed rename rolls the transaction back.

use sqlx::{Row, SqliteConnection, SqlitePool};
use std::path::PathBuf;

use crate::error::{AgentError, AgentResult};
use crate::models::{DocumentInfo, DocumentRecord};

const MAX_NAME_LEN: usize = 255;

#[derive(Clone)]
pub struct Corpus {
    pool: SqlitePool,
    dir: PathBuf,
}

impl Corpus {
    pub fn new(pool: SqlitePool, dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            dir: dir.into(),
        }
    }

    /// Every stored document, ordered by filename.
    pub async fn list(&self) -> AgentResult<Vec<DocumentInfo>> {
        let rows = sqlx::query("SELECT filename, size, modified FROM documents ORDER BY filename")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| DocumentInfo {
                name: row.get("filename"),
                size: row.get("size"),
                modified: format_ts(row.get("modified")),
            })
            .collect())
    }

    pub async fn record(&self, name: &str) -> AgentResult<Option<DocumentRecord>> {
        let row = sqlx::query(
            "SELECT filename, size, modified, content_type, content_hash FROM documents WHERE filename = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| DocumentRecord {
            filename: r.get("filename"),
            size: r.get("size"),
            modified: r.get("modified"),
            content_type: r.get("content_type"),
            content_hash: r.get("content_hash"),
        }))
    }

    /// Raw bytes of a stored document.
    pub async fn read(&self, name: &str) -> AgentResult<Option<Vec<u8>>> {
        validate_name(name)?;
        match tokio::fs::read(self.dir.join(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `bytes` next to their final location without publishing them.
    pub async fn stage_blob(&self, name: &str, bytes: &[u8]) -> AgentResult<StagedBlob> {
        validate_name(name)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let temp = self
            .dir
            .join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&temp, bytes).await?;

        Ok(StagedBlob {
            temp,
            dest: self.dir.join(name),
            published: false,
        })
    }

    pub async fn remove_blob(&self, name: &str) -> AgentResult<()> {
        validate_name(name)?;
        match tokio::fs::remove_file(self.dir.join(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Insert or replace the metadata row inside the caller's transaction.
    pub async fn write_record(
        conn: &mut SqliteConnection,
        record: &DocumentRecord,
    ) -> AgentResult<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (filename, size, modified, content_type, content_hash)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(filename) DO UPDATE SET
                size = excluded.size,
                modified = excluded.modified,
                content_type = excluded.content_type,
                content_hash = excluded.content_hash
            "#,
        )
        .bind(&record.filename)
        .bind(record.size)
        .bind(record.modified)
        .bind(&record.content_type)
        .bind(&record.content_hash)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Delete the metadata row (and, by cascade, its chunks). Returns whether it existed.
    pub async fn delete_record(conn: &mut SqliteConnection, name: &str) -> AgentResult<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE filename = ?")
            .bind(name)
            .execute(conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// A blob written to a temp file. Dropped without [`publish`](Self::publish), it is removed.
pub struct StagedBlob {
    temp: PathBuf,
    dest: PathBuf,
    published: bool,
}

impl StagedBlob {
    /// Move the blob into place, replacing any previous version.
    pub async fn publish(mut self) -> AgentResult<()> {
        tokio::fs::rename(&self.temp, &self.dest).await?;
        self.published = true;
        Ok(())
    }
}

impl Drop for StagedBlob {
    fn drop(&mut self) {
        if !self.published {
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}

/// Reject names that could escape the corpus directory or collide with temp files.
pub fn validate_name(name: &str) -> AgentResult<()> {
    let invalid = |reason: &str| -> AgentResult<()> {
        Err(AgentError::Validation(format!(
            "invalid filename '{}': {}",
            name, reason
        )))
    };

    if name.trim().is_empty() {
        return invalid("empty");
    }
    if name.len() > MAX_NAME_LEN {
        return invalid("too long");
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return invalid("path separators are not allowed");
    }
    if name.starts_with('.') {
        return invalid("hidden names are not allowed");
    }
    if name.chars().any(char::is_control) {
        return invalid("control characters are not allowed");
    }
    Ok(())
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        assert!(validate_name("notes.txt").is_ok());
        assert!(validate_name("Quarterly Report 2024.pdf").is_ok());
    }

    #[test]
    fn rejects_traversal_and_hidden_names() {
        for bad in ["", "  ", "../etc/passwd", "a/b.txt", "a\\b.txt", ".env", "x..y"] {
            let err = validate_name(bad).unwrap_err();
            assert_eq!(err.code(), "validation_error", "{:?} should be rejected", bad);
        }
        assert!(validate_name(&"a".repeat(256)).is_err());
    }

    #[test]
    fn timestamps_render_as_rfc3339() {
        assert_eq!(format_ts(0), "1970-01-01T00:00:00+00:00");
    }
}
