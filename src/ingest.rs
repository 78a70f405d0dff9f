//! Document upload and the ingestion pipeline.
//!
//! Upload registers bytes in the library with content-hash
//! deduplication. Processing then advances the document through the
//! status machine:
//!
//! ```text
//! pending -> extracting -> (ocr)? -> chunking -> embedding -> ready
//!                \______________________________________/
//!                            any failure -> error
//! ```
//!
//! Each stage change is persisted immediately so a crash leaves an
//! honest status behind. A document in `error` is re-ingested from
//! scratch by calling [`process_document`] again.

use anyhow::{anyhow, bail, Context, Result};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::{embed_texts, vec_to_blob, Embedder};
use crate::extract::extract_text;
use crate::links::document_from_row;
use crate::models::{ChunkMetadata, FileType, ProcessingStatus, SourceDocument, TextChunk};
use crate::ocr::OcrEngine;

/// Outcome of registering an upload.
#[derive(Debug, Clone)]
pub struct RegisteredDocument {
    pub document: SourceDocument,
    /// True when the bytes were already in the library; no new row or
    /// file was created.
    pub duplicate: bool,
}

/// External services the pipeline calls out to.
pub struct PipelineServices {
    pub embedder: Arc<dyn Embedder>,
    /// Absent when no vision model is configured; low-density PDFs
    /// then fail into `error` instead of silently producing garbage.
    pub ocr: Option<Arc<OcrEngine>>,
}

/// Register uploaded bytes in the document library.
///
/// The file type is validated from the extension before anything is
/// hashed or written. If the SHA-256 of the bytes matches an existing
/// document, that document is returned with `duplicate: true` and
/// nothing is stored.
pub async fn register_document(
    pool: &SqlitePool,
    config: &Config,
    original_file_name: &str,
    bytes: &[u8],
) -> Result<RegisteredDocument> {
    let file_type = FileType::from_file_name(original_file_name).ok_or_else(|| {
        anyhow!(
            "Unsupported file type: {} (only .pdf and .docx are accepted)",
            original_file_name
        )
    })?;

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let content_hash = format!("{:x}", hasher.finalize());

    if let Some(existing) = find_by_hash(pool, &content_hash).await? {
        info!(
            doc_id = %existing.id,
            file = %original_file_name,
            "duplicate upload, reusing existing document"
        );
        return Ok(RegisteredDocument {
            document: existing,
            duplicate: true,
        });
    }

    std::fs::create_dir_all(&config.storage.upload_dir).with_context(|| {
        format!(
            "Failed to create upload directory: {}",
            config.storage.upload_dir.display()
        )
    })?;

    let stored_name = format!(
        "lib_{}_{}",
        chrono::Utc::now().timestamp_millis(),
        sanitize_file_name(original_file_name)
    );
    let file_path = config.storage.upload_dir.join(&stored_name);
    std::fs::write(&file_path, bytes)
        .with_context(|| format!("Failed to write upload: {}", file_path.display()))?;

    let document = SourceDocument {
        id: Uuid::new_v4().to_string(),
        content_hash,
        original_file_name: original_file_name.to_string(),
        file_type,
        file_path: file_path.to_string_lossy().into_owned(),
        file_size: bytes.len() as i64,
        extracted_text: None,
        processing_status: ProcessingStatus::Pending,
        error_message: None,
        chunk_count: 0,
        created_at: chrono::Utc::now().timestamp(),
    };

    sqlx::query(
        r#"
        INSERT INTO source_documents
            (id, content_hash, original_file_name, file_type, file_path,
             file_size, processing_status, chunk_count, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)
        "#,
    )
    .bind(&document.id)
    .bind(&document.content_hash)
    .bind(&document.original_file_name)
    .bind(document.file_type.as_str())
    .bind(&document.file_path)
    .bind(document.file_size)
    .bind(document.processing_status.as_str())
    .bind(document.created_at)
    .execute(pool)
    .await?;

    info!(doc_id = %document.id, file = %original_file_name, "registered new document");
    Ok(RegisteredDocument {
        document,
        duplicate: false,
    })
}

/// Run the ingestion pipeline for a registered document.
///
/// Never returns an error for pipeline failures: any failure is
/// recorded on the document as status `error` with a message. Only the
/// bookkeeping write itself can fail the call.
pub async fn process_document(
    pool: &SqlitePool,
    config: &Config,
    services: &PipelineServices,
    doc_id: &str,
) -> Result<()> {
    if let Err(e) = run_pipeline(pool, config, services, doc_id).await {
        warn!(doc_id, error = %e, "ingestion failed");
        // A ready document never regresses to error.
        sqlx::query(
            "UPDATE source_documents SET processing_status = 'error', error_message = ? \
             WHERE id = ? AND processing_status != 'ready'",
        )
        .bind(e.to_string())
        .bind(doc_id)
        .execute(pool)
        .await?;
    }
    Ok(())
}

async fn run_pipeline(
    pool: &SqlitePool,
    config: &Config,
    services: &PipelineServices,
    doc_id: &str,
) -> Result<()> {
    let document = get_document(pool, doc_id)
        .await?
        .ok_or_else(|| anyhow!("Document not found: {}", doc_id))?;

    advance_status(pool, &document.id, document.processing_status, ProcessingStatus::Extracting)
        .await?;
    let mut status = ProcessingStatus::Extracting;

    let bytes = std::fs::read(&document.file_path)
        .with_context(|| format!("Failed to read stored file: {}", document.file_path))?;

    let extracted = extract_text(&bytes, document.file_type)?;
    info!(
        doc_id,
        pages = extracted.page_count,
        chars = extracted.text.chars().count(),
        "extracted text layer"
    );

    let text = if document.file_type == FileType::Pdf
        && extracted.text_density < config.ocr.text_density_threshold
    {
        let ocr = services
            .ocr
            .as_ref()
            .ok_or_else(|| anyhow!("Document appears image-based but no OCR model is configured"))?;
        advance_status(pool, doc_id, status, ProcessingStatus::Ocr).await?;
        status = ProcessingStatus::Ocr;
        info!(
            doc_id,
            density = extracted.text_density,
            threshold = config.ocr.text_density_threshold,
            "text density below threshold, running OCR"
        );
        ocr.ocr_document(&bytes).await?
    } else {
        extracted.text
    };

    sqlx::query("UPDATE source_documents SET extracted_text = ? WHERE id = ?")
        .bind(&text)
        .bind(doc_id)
        .execute(pool)
        .await?;

    advance_status(pool, doc_id, status, ProcessingStatus::Chunking).await?;
    status = ProcessingStatus::Chunking;

    let chunks = chunk_text(
        &text,
        config.chunking.max_chunk_tokens,
        config.chunking.overlap_tokens,
    );
    info!(doc_id, chunks = chunks.len(), "chunked document");

    if chunks.is_empty() {
        // Nothing to embed; the document is still ready. A restart
        // may have left chunks from a previous run, so the bookkeeping
        // is the same as the full path, just with an empty set.
        replace_chunks(pool, &document, &[], &[]).await?;
        advance_status(pool, doc_id, status, ProcessingStatus::Ready).await?;
        sqlx::query(
            "UPDATE source_documents SET chunk_count = 0, error_message = NULL WHERE id = ?",
        )
        .bind(doc_id)
        .execute(pool)
        .await?;
        return Ok(());
    }

    advance_status(pool, doc_id, status, ProcessingStatus::Embedding).await?;
    status = ProcessingStatus::Embedding;

    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let vectors = embed_texts(
        services.embedder.as_ref(),
        &texts,
        config.embedding.batch_size,
    )
    .await?;

    replace_chunks(pool, &document, &chunks, &vectors).await?;

    advance_status(pool, doc_id, status, ProcessingStatus::Ready).await?;
    sqlx::query("UPDATE source_documents SET chunk_count = ?, error_message = NULL WHERE id = ?")
        .bind(chunks.len() as i64)
        .bind(doc_id)
        .execute(pool)
        .await?;

    info!(doc_id, chunks = chunks.len(), "document ready");
    Ok(())
}

/// Persist a status transition after checking it against the table.
/// An invalid transition is a bug in the caller and fails loudly.
async fn advance_status(
    pool: &SqlitePool,
    doc_id: &str,
    from: ProcessingStatus,
    to: ProcessingStatus,
) -> Result<()> {
    if !from.can_transition(to) {
        bail!("Invalid status transition: {} -> {}", from, to);
    }
    sqlx::query("UPDATE source_documents SET processing_status = ? WHERE id = ?")
        .bind(to.as_str())
        .bind(doc_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete any existing chunks for the document and insert the new set
/// atomically. Re-ingestion never leaves a mix of old and new chunks.
async fn replace_chunks(
    pool: &SqlitePool,
    document: &SourceDocument,
    chunks: &[TextChunk],
    vectors: &[Vec<f32>],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunks WHERE source_doc_id = ?")
        .bind(&document.id)
        .execute(&mut *tx)
        .await?;

    let now = chrono::Utc::now().timestamp();
    for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
        let metadata = ChunkMetadata {
            source_file: document.original_file_name.clone(),
            chunk_index: chunk.index,
        };
        sqlx::query(
            r#"
            INSERT INTO chunks
                (id, source_doc_id, chunk_index, content, token_count,
                 embedding, metadata_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&document.id)
        .bind(chunk.index)
        .bind(&chunk.content)
        .bind(chunk.token_count)
        .bind(vec_to_blob(vector))
        .bind(serde_json::to_string(&metadata)?)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Fetch a document by id.
pub async fn get_document(pool: &SqlitePool, doc_id: &str) -> Result<Option<SourceDocument>> {
    let row = sqlx::query("SELECT * FROM source_documents WHERE id = ?")
        .bind(doc_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(document_from_row).transpose()
}

async fn find_by_hash(pool: &SqlitePool, content_hash: &str) -> Result<Option<SourceDocument>> {
    let row = sqlx::query("SELECT * FROM source_documents WHERE content_hash = ?")
        .bind(content_hash)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(document_from_row).transpose()
}

/// Keep the original name recognizable but safe as a path component.
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_sanitized_for_storage() {
        assert_eq!(sanitize_file_name("contract v2.pdf"), "contract_v2.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_file_name("委托合同.docx"), "委托合同.docx");
    }
}
