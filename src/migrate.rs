use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Corpus documents, keyed by filename
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            filename TEXT PRIMARY KEY,
            size INTEGER NOT NULL,
            modified INTEGER NOT NULL,
            content_type TEXT NOT NULL DEFAULT 'text/plain',
            content_hash TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunks with their embedding; removed together with their document
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            filename TEXT NOT NULL,
            seq INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (filename, seq),
            FOREIGN KEY (filename) REFERENCES documents(filename) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Single-row credential record
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS credentials (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            openai_key TEXT,
            composio_key TEXT,
            embedding_model TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_model ON chunks(model)")
        .execute(pool)
        .await?;

    Ok(())
}
