//! Durable credential record.
//!
//! A single SQLite row holds the provider key, the tool-integration key and
//! the embedding model selection. Updating it never rebuilds the agent;
//! that is an explicit, separate step in [`crate::lifecycle`].

use sqlx::{Row, SqlitePool};

use crate::error::{AgentError, AgentResult};
use crate::models::{CredentialSet, CredentialStatus, CredentialUpdate};

#[derive(Clone)]
pub struct CredentialStore {
    pool: SqlitePool,
}

impl CredentialStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Current credential set, or `None` if nothing was ever stored.
    pub async fn get(&self) -> AgentResult<Option<CredentialSet>> {
        let row = sqlx::query(
            "SELECT openai_key, composio_key, embedding_model FROM credentials WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| CredentialSet {
            openai_key: r.get("openai_key"),
            composio_key: r.get("composio_key"),
            embedding_model: r.get("embedding_model"),
        }))
    }

    /// Merge `partial` into the stored record and persist it.
    ///
    /// Blank values count as omitted. At least one field must be supplied.
    pub async fn update(&self, partial: CredentialUpdate) -> AgentResult<CredentialSet> {
        if partial.is_empty() {
            return Err(AgentError::Validation(
                "at least one credential field must be provided".to_string(),
            ));
        }

        // One statement, so concurrent updates queue on the write lock
        // instead of failing to upgrade a read transaction.
        let row = sqlx::query(
            r#"
            INSERT INTO credentials (id, openai_key, composio_key, embedding_model, updated_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                openai_key = COALESCE(excluded.openai_key, credentials.openai_key),
                composio_key = COALESCE(excluded.composio_key, credentials.composio_key),
                embedding_model = COALESCE(excluded.embedding_model, credentials.embedding_model),
                updated_at = excluded.updated_at
            RETURNING openai_key, composio_key, embedding_model
            "#,
        )
        .bind(non_blank(partial.openai_key))
        .bind(non_blank(partial.composio_key))
        .bind(non_blank(partial.embedding_model))
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;

        let merged = CredentialSet {
            openai_key: row.get("openai_key"),
            composio_key: row.get("composio_key"),
            embedding_model: row.get("embedding_model"),
        };

        tracing::info!(credentials = ?merged, "credentials updated");
        Ok(merged)
    }

    /// Which credentials are present. Values are never returned.
    pub async fn status(&self) -> AgentResult<CredentialStatus> {
        let creds = self.get().await?.unwrap_or_default();
        Ok(CredentialStatus {
            openai_key: creds.openai_key.is_some(),
            composio_key: creds.composio_key.is_some(),
            embedding_model: creds.embedding_model.is_some(),
        })
    }

    /// Seed the record from `OPENAI_API_KEY`, `COMPOSIO_API_KEY` and
    /// `OPENAI_EMBEDDING_MODEL` when nothing is stored yet.
    ///
    /// Returns whether a record was written.
    pub async fn seed_from_env(&self) -> AgentResult<bool> {
        if self.get().await?.is_some() {
            return Ok(false);
        }
        let partial = CredentialUpdate {
            openai_key: std::env::var("OPENAI_API_KEY").ok(),
            composio_key: std::env::var("COMPOSIO_API_KEY").ok(),
            embedding_model: std::env::var("OPENAI_EMBEDDING_MODEL").ok(),
        };
        if partial.is_empty() {
            return Ok(false);
        }
        self.update(partial).await?;
        tracing::info!("credentials seeded from environment");
        Ok(true)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
