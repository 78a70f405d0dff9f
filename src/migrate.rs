use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema if it does not exist. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Source document library
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_documents (
            id TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL UNIQUE,
            original_file_name TEXT NOT NULL,
            file_type TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            extracted_text TEXT,
            processing_status TEXT NOT NULL DEFAULT 'pending',
            error_message TEXT,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Embedded chunks (vector stored as little-endian f32 BLOB)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            source_doc_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            UNIQUE(source_doc_id, chunk_index),
            FOREIGN KEY (source_doc_id) REFERENCES source_documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Case <-> source document association (many-to-many, unique pair)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS case_document_links (
            id TEXT PRIMARY KEY,
            case_id TEXT NOT NULL,
            source_doc_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(case_id, source_doc_id),
            FOREIGN KEY (source_doc_id) REFERENCES source_documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source_doc_id ON chunks(source_doc_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_case_id ON case_document_links(case_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_source_documents_status ON source_documents(processing_status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
