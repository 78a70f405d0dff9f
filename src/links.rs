//! Case to source-document associations.
//!
//! Documents live in a shared library; cases reference them through
//! link rows. Retrieval and condensation are always scoped to the set
//! of documents linked to one case.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{FileType, ProcessingStatus, SourceDocument};

/// Full text of a ready, extracted document linked to a case.
#[derive(Debug, Clone)]
pub struct LinkedDocumentText {
    pub original_file_name: String,
    pub extracted_text: String,
}

/// Link a document to a case. Idempotent: linking an already-linked
/// document changes nothing.
pub async fn link_document(pool: &SqlitePool, case_id: &str, source_doc_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO case_document_links (id, case_id, source_doc_id, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(case_id, source_doc_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(case_id)
    .bind(source_doc_id)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

/// Remove the link between a case and a document. The document itself
/// stays in the library.
pub async fn unlink_document(pool: &SqlitePool, case_id: &str, source_doc_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM case_document_links WHERE case_id = ? AND source_doc_id = ?")
        .bind(case_id)
        .bind(source_doc_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// List the documents linked to a case, oldest link first.
pub async fn linked_documents(pool: &SqlitePool, case_id: &str) -> Result<Vec<SourceDocument>> {
    let rows = sqlx::query(
        r#"
        SELECT d.id, d.content_hash, d.original_file_name, d.file_type, d.file_path,
               d.file_size, d.extracted_text, d.processing_status, d.error_message,
               d.chunk_count, d.created_at
        FROM source_documents d
        JOIN case_document_links l ON l.source_doc_id = d.id
        WHERE l.case_id = ?
        ORDER BY l.created_at ASC
        "#,
    )
    .bind(case_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(document_from_row).collect()
}

/// Full texts of the case's documents that are ready and have
/// non-empty extracted text, in document creation order. Feeds the
/// full-document condensation path.
pub async fn linked_document_texts(
    pool: &SqlitePool,
    case_id: &str,
) -> Result<Vec<LinkedDocumentText>> {
    let rows = sqlx::query(
        r#"
        SELECT d.original_file_name, d.extracted_text
        FROM source_documents d
        JOIN case_document_links l ON l.source_doc_id = d.id
        WHERE l.case_id = ?
          AND d.processing_status = 'ready'
          AND d.extracted_text IS NOT NULL
          AND d.extracted_text != ''
        ORDER BY d.created_at ASC
        "#,
    )
    .bind(case_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| LinkedDocumentText {
            original_file_name: row.get("original_file_name"),
            extracted_text: row.get("extracted_text"),
        })
        .collect())
}

/// Map a `source_documents` row into the model type.
pub fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SourceDocument> {
    let file_type: String = row.get("file_type");
    let processing_status: String = row.get("processing_status");
    Ok(SourceDocument {
        id: row.get("id"),
        content_hash: row.get("content_hash"),
        original_file_name: row.get("original_file_name"),
        file_type: FileType::parse(&file_type)?,
        file_path: row.get("file_path"),
        file_size: row.get("file_size"),
        extracted_text: row.get("extracted_text"),
        processing_status: ProcessingStatus::parse(&processing_status)?,
        error_message: row.get("error_message"),
        chunk_count: row.get("chunk_count"),
        created_at: row.get("created_at"),
    })
}
