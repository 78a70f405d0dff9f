//! Full-document condensation.
//!
//! Instead of ranking chunks, this path hands the complete text of
//! every linked document to a long-context model and asks for a
//! focused digest of the provisions relevant to the case facts. All
//! failure modes degrade to `None` so the caller can fall back to
//! chunk retrieval; condensation is an enhancement, never a gate.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::Config;
use crate::links::linked_document_texts;
use crate::provider::{GenerateParams, ProviderRegistry};

const CONDENSE_SYSTEM_PROMPT: &str = "You are a legal research assistant. You will receive the \
full text of one or more reference documents followed by a description of a case. Extract every \
contract clause, statutory reference, obligation, deadline, and penalty provision relevant to \
the case. Group the extracted material by theme. Preserve exact clause numbers and original \
wording; do not paraphrase operative language. Cite the source filename for each item. Do not \
add analysis or conclusions of your own.";

/// Condense the full text of the case's linked documents into a
/// digest focused on `fact_input`.
///
/// Returns `None` when condensation is unavailable or produced
/// nothing: no condenser model configured, the model is not
/// registered, no linked documents carry extracted text, the
/// generation call fails, or the model returns an empty result.
pub async fn condense_context(
    pool: &SqlitePool,
    registry: &ProviderRegistry,
    config: &Config,
    case_id: &str,
    fact_input: &str,
    additional_notes: Option<&str>,
) -> Result<Option<String>> {
    let Some(model_id) = config.condenser.model.as_deref() else {
        return Ok(None);
    };

    let provider = match registry.get(model_id) {
        Ok(p) => p,
        Err(e) => {
            warn!(model_id, error = %e, "condenser model not available");
            return Ok(None);
        }
    };

    let documents = linked_document_texts(pool, case_id).await?;
    if documents.is_empty() {
        return Ok(None);
    }

    let mut corpus = String::new();
    for doc in &documents {
        corpus.push_str(&format!(
            "========== {} ==========\n{}\n\n",
            doc.original_file_name, doc.extracted_text
        ));
    }

    let mut user_prompt = format!(
        "Reference documents:\n\n{}Case facts:\n{}\n",
        corpus, fact_input
    );
    if let Some(notes) = additional_notes {
        if !notes.trim().is_empty() {
            user_prompt.push_str(&format!("\nAdditional notes:\n{}\n", notes));
        }
    }
    user_prompt.push_str(&format!(
        "\nProduce the digest described in your instructions, at most {} tokens.",
        config.condenser.max_output_tokens
    ));

    let params = GenerateParams {
        system_prompt: CONDENSE_SYSTEM_PROMPT.to_string(),
        user_prompt,
        max_tokens: config.condenser.max_output_tokens,
        temperature: 0.1,
    };

    let result = match provider.generate(&params).await {
        Ok(r) => r,
        Err(e) => {
            warn!(case_id, error = %e, "condensation call failed, falling back");
            return Ok(None);
        }
    };

    let content = result.content.trim().to_string();
    if content.is_empty() {
        warn!(case_id, "condenser returned empty content, falling back");
        return Ok(None);
    }

    info!(
        case_id,
        documents = documents.len(),
        output_tokens = result.usage.output_tokens,
        "condensed case documents"
    );
    Ok(Some(content))
}
