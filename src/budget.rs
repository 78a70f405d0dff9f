//! Token-budget allocation for prompt assembly.
//!
//! The caller has a fixed model input window. Fixed overhead (system
//! prompt, prompt template) is subtracted first, then the remainder is
//! handed out in priority order: case facts, supplementary notes, and
//! finally retrieved chunks until the first one that no longer fits.

use tracing::debug;

use crate::chunk::estimate_tokens;
use crate::config::BudgetConfig;
use crate::models::RetrievedContext;

/// Appended to any text cut down by [`truncate_to_token_budget`].
const TRUNCATION_MARKER: &str = "\n...(truncated)";

/// Fixed per-chunk cost for the source label and separator lines added
/// when chunks are rendered into the prompt.
const CHUNK_LABEL_OVERHEAD: usize = 20;

/// Output of [`allocate_token_budget`]: every piece already fits the
/// window.
#[derive(Debug, Clone)]
pub struct BudgetAllocation {
    pub facts: String,
    pub notes: Option<String>,
    pub selected: Vec<RetrievedContext>,
}

/// Cut `text` down to approximately `max_tokens`, appending a marker
/// when anything was removed. Returns the input unchanged when it
/// already fits. The cut point is proportional with a 5% safety
/// margin, since token estimation is approximate.
pub fn truncate_to_token_budget(text: &str, max_tokens: usize) -> String {
    let estimated = estimate_tokens(text);
    if estimated <= max_tokens {
        return text.to_string();
    }

    let ratio = max_tokens as f64 / estimated as f64;
    let char_count = text.chars().count();
    let mut cutoff_chars = (char_count as f64 * ratio * 0.95).floor() as usize;

    // The result must never be longer than the input; on short inputs
    // the marker can outweigh the cut, so shrink the kept text to make
    // room, and drop the marker entirely when it cannot fit.
    let marker_chars = TRUNCATION_MARKER.chars().count();
    if cutoff_chars + marker_chars > char_count {
        cutoff_chars = char_count.saturating_sub(marker_chars);
    }
    if cutoff_chars == 0 {
        let keep = (char_count as f64 * ratio * 0.95).floor() as usize;
        return text.chars().take(keep).collect();
    }

    let cutoff_byte = text
        .char_indices()
        .nth(cutoff_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());

    format!("{}{}", &text[..cutoff_byte], TRUNCATION_MARKER)
}

/// Allocate the input window across facts, notes, and retrieved
/// chunks, in that priority order. Chunks are taken greedily in the
/// given order; allocation stops at the first chunk that would
/// overflow the remaining budget.
pub fn allocate_token_budget(
    facts: &str,
    notes: Option<&str>,
    chunks: &[RetrievedContext],
    config: &BudgetConfig,
) -> BudgetAllocation {
    let mut remaining = config
        .max_input_tokens
        .saturating_sub(config.system_prompt_tokens)
        .saturating_sub(config.prompt_template_tokens);

    let facts = truncate_to_token_budget(facts, remaining.min(config.max_fact_tokens));
    remaining = remaining.saturating_sub(estimate_tokens(&facts));

    let notes = notes.map(|n| {
        let truncated = truncate_to_token_budget(n, remaining.min(config.max_notes_tokens));
        remaining = remaining.saturating_sub(estimate_tokens(&truncated));
        truncated
    });

    let mut selected = Vec::new();
    for chunk in chunks {
        let chunk_tokens = estimate_tokens(&chunk.content) + CHUNK_LABEL_OVERHEAD;
        if chunk_tokens > remaining {
            break;
        }
        remaining -= chunk_tokens;
        selected.push(chunk.clone());
    }

    debug!(
        selected = selected.len(),
        offered = chunks.len(),
        remaining_tokens = remaining,
        "allocated context budget"
    );

    BudgetAllocation {
        facts,
        notes,
        selected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> BudgetConfig {
        BudgetConfig {
            max_input_tokens: 1000,
            system_prompt_tokens: 100,
            prompt_template_tokens: 100,
            max_fact_tokens: 400,
            max_notes_tokens: 200,
        }
    }

    fn chunk_of(tokens_approx: usize, source: &str) -> RetrievedContext {
        // Latin chars weigh 0.25 tokens each.
        RetrievedContext {
            content: "z".repeat(tokens_approx * 4),
            source_file: source.to_string(),
            similarity: 0.5,
        }
    }

    #[test]
    fn truncate_noop_when_under_budget() {
        let text = "short text";
        assert_eq!(truncate_to_token_budget(text, 100), text);
    }

    #[test]
    fn truncate_cuts_and_marks() {
        let text = "a".repeat(4000); // ~1000 tokens
        let out = truncate_to_token_budget(&text, 100);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert!(out.len() < text.len());
        // 5% margin keeps the result under the requested budget even
        // though the estimate is approximate.
        assert!(estimate_tokens(&out) <= 100 + estimate_tokens(TRUNCATION_MARKER));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "漢".repeat(500); // CJK, 1.5 tokens each
        let out = truncate_to_token_budget(&text, 50);
        assert!(out.ends_with(TRUNCATION_MARKER));
        // Must not have sliced mid-codepoint.
        assert!(out.chars().all(|c| c == '漢' || TRUNCATION_MARKER.contains(c)));
    }

    #[test]
    fn truncate_never_longer_than_original() {
        // Short input where the marker would outweigh the 5% cut.
        let text = "a".repeat(100); // 25 tokens
        let out = truncate_to_token_budget(&text, 24);
        assert!(
            out.chars().count() <= text.chars().count(),
            "truncated output ({} chars) is longer than the input ({} chars)",
            out.chars().count(),
            text.chars().count()
        );

        // Inputs too short to carry the marker are cut plain.
        let tiny = "漢漢漢漢漢漢"; // 9 tokens
        let out = truncate_to_token_budget(tiny, 2);
        assert!(out.chars().count() <= tiny.chars().count());
        assert!(!out.contains(TRUNCATION_MARKER.trim()));

        for len in 1..200 {
            let text = "b".repeat(len);
            for max in [1, 5, 24, 50] {
                let out = truncate_to_token_budget(&text, max);
                assert!(
                    out.chars().count() <= len,
                    "len {} max {}: output grew to {}",
                    len,
                    max,
                    out.chars().count()
                );
            }
        }
    }

    #[test]
    fn facts_capped_at_fact_budget() {
        let facts = "f".repeat(4000); // ~1000 tokens, cap is 400
        let alloc = allocate_token_budget(&facts, None, &[], &budget());
        assert!(alloc.facts.ends_with(TRUNCATION_MARKER));
        assert!(estimate_tokens(&alloc.facts) <= 400 + 10);
    }

    #[test]
    fn notes_absent_when_not_given() {
        let alloc = allocate_token_budget("facts", None, &[], &budget());
        assert!(alloc.notes.is_none());
    }

    #[test]
    fn chunks_stop_at_first_overflow() {
        // Budget after overhead: 800. Facts ~25, no notes.
        // Chunks cost estimate + 20: 320, 320, 320 -> third breaks.
        let chunks = vec![
            chunk_of(300, "a.pdf"),
            chunk_of(300, "b.pdf"),
            chunk_of(300, "c.pdf"),
        ];
        let alloc = allocate_token_budget("brief facts here", None, &chunks, &budget());
        assert_eq!(alloc.selected.len(), 2);
        assert_eq!(alloc.selected[0].source_file, "a.pdf");
        assert_eq!(alloc.selected[1].source_file, "b.pdf");
    }

    #[test]
    fn break_not_skip() {
        // A small chunk after the overflowing one must NOT be taken.
        let chunks = vec![
            chunk_of(700, "big.pdf"),
            chunk_of(900, "huge.pdf"),
            chunk_of(10, "tiny.pdf"),
        ];
        let alloc = allocate_token_budget("", None, &chunks, &budget());
        assert_eq!(alloc.selected.len(), 1);
        assert_eq!(alloc.selected[0].source_file, "big.pdf");
    }

    #[test]
    fn total_never_exceeds_window() {
        let facts = "f".repeat(2000);
        let notes = "n".repeat(2000);
        let chunks: Vec<RetrievedContext> =
            (0..10).map(|i| chunk_of(100, &format!("{}.pdf", i))).collect();
        let config = budget();
        let alloc = allocate_token_budget(&facts, Some(&notes), &chunks, &config);

        let mut total = estimate_tokens(&alloc.facts);
        if let Some(n) = &alloc.notes {
            total += estimate_tokens(n);
        }
        for c in &alloc.selected {
            total += estimate_tokens(&c.content) + CHUNK_LABEL_OVERHEAD;
        }
        let window = config.max_input_tokens
            - config.system_prompt_tokens
            - config.prompt_template_tokens;
        assert!(total <= window, "allocated {} of {}", total, window);
    }

    #[test]
    fn empty_inputs() {
        let alloc = allocate_token_budget("", None, &[], &budget());
        assert!(alloc.facts.is_empty());
        assert!(alloc.notes.is_none());
        assert!(alloc.selected.is_empty());
    }
}
