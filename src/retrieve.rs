//! Similarity search over embedded chunks, scoped to one case.
//!
//! Candidate chunks are those belonging to ready documents linked to
//! the case. The query embedding is compared against every candidate
//! by cosine similarity; the top K are taken first and the similarity
//! threshold is applied after, so the result is "the best K, minus the
//! weak ones", never padded with weak matches.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::embedding::{blob_to_vec, cosine_similarity, embed_query, Embedder};
use crate::models::RetrievedContext;

/// Retrieve the chunks most relevant to `query` among the documents
/// linked to `case_id`, at most `top_k`, all with similarity at or
/// above `threshold`, in descending similarity order.
pub async fn retrieve_relevant_chunks(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    case_id: &str,
    query: &str,
    top_k: usize,
    threshold: f64,
) -> Result<Vec<RetrievedContext>> {
    let query_vec = embed_query(embedder, query).await?;

    let rows = sqlx::query(
        r#"
        SELECT c.content, c.embedding, d.original_file_name
        FROM chunks c
        JOIN source_documents d ON d.id = c.source_doc_id
        JOIN case_document_links l ON l.source_doc_id = d.id
        WHERE l.case_id = ?
          AND d.processing_status = 'ready'
        "#,
    )
    .bind(case_id)
    .fetch_all(pool)
    .await?;

    let mut scored: Vec<RetrievedContext> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let similarity = cosine_similarity(&query_vec, &blob_to_vec(&blob)) as f64;
            RetrievedContext {
                content: row.get("content"),
                source_file: row.get("original_file_name"),
                similarity,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(top_k);
    scored.retain(|c| c.similarity >= threshold);

    debug!(
        case_id,
        candidates = rows.len(),
        returned = scored.len(),
        "ranked chunks for query"
    );
    Ok(scored)
}
