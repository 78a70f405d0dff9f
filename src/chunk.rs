//! Paragraph-boundary text chunker with token-budget overlap.
//!
//! Splits extracted document text into [`TextChunk`]s that respect a
//! `max_chunk_tokens` ceiling. Splitting occurs on blank-line paragraph
//! boundaries to preserve semantic coherence; each new chunk is seeded
//! with trailing lines of the previous one up to `overlap_tokens` so
//! context survives the cut. A single paragraph that alone exceeds the
//! ceiling is further split on sentence-ending punctuation.
//!
//! Token counts are a cheap estimate, not a real tokenizer: CJK
//! characters weigh ~1.5 tokens, everything else ~0.25.

use crate::models::TextChunk;

/// Estimate the model-token cost of a string without calling a model.
pub fn estimate_tokens(text: &str) -> usize {
    let mut cjk = 0usize;
    let mut other = 0usize;
    for c in text.chars() {
        if ('\u{4e00}'..='\u{9fff}').contains(&c) {
            cjk += 1;
        } else {
            other += 1;
        }
    }
    (cjk as f64 * 1.5 + other as f64 * 0.25).ceil() as usize
}

/// Split text into chunks on paragraph boundaries, respecting
/// `max_tokens` and carrying `overlap_tokens` of trailing lines into
/// each successor chunk. Indices are contiguous from 0 in emission
/// order. Empty input yields an empty list.
pub fn chunk_text(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<TextChunk> {
    let paragraphs = split_paragraphs(text);
    if paragraphs.is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<TextChunk> = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0usize;
    let mut chunk_index: i64 = 0;

    for paragraph in paragraphs {
        let para_tokens = estimate_tokens(paragraph);

        // A paragraph that alone exceeds the ceiling is split by
        // sentences, with no overlap within the sub-split.
        if para_tokens > max_tokens && current.is_empty() {
            for sub in split_large_paragraph(paragraph, max_tokens) {
                let trimmed = sub.trim();
                chunks.push(TextChunk {
                    content: trimmed.to_string(),
                    index: chunk_index,
                    token_count: estimate_tokens(&sub) as i64,
                });
                chunk_index += 1;
            }
            continue;
        }

        if current_tokens + para_tokens > max_tokens && !current.is_empty() {
            chunks.push(TextChunk {
                content: current.trim().to_string(),
                index: chunk_index,
                token_count: current_tokens as i64,
            });
            chunk_index += 1;

            // Overlap: copy trailing whole lines backward until the
            // overlap budget is spent.
            let lines: Vec<&str> = current.split('\n').collect();
            let mut overlap_text = String::new();
            let mut overlap_count = 0usize;
            for line in lines.iter().rev() {
                let line_tokens = estimate_tokens(line);
                if overlap_count + line_tokens > overlap_tokens {
                    break;
                }
                overlap_text = format!("{}\n{}", line, overlap_text);
                overlap_count += line_tokens;
            }

            current = format!("{}{}", overlap_text, paragraph);
            current_tokens = overlap_count + para_tokens;
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
            current_tokens += para_tokens;
        }
    }

    if !current.trim().is_empty() {
        chunks.push(TextChunk {
            content: current.trim().to_string(),
            index: chunk_index,
            token_count: current_tokens as i64,
        });
    }

    chunks
}

/// Split on runs of two or more newlines, dropping whitespace-only
/// paragraphs.
fn split_paragraphs(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'\n' && i + 1 < bytes.len() && bytes[i + 1] == b'\n' {
            parts.push(&text[start..i]);
            while i < bytes.len() && bytes[i] == b'\n' {
                i += 1;
            }
            start = i;
        } else {
            i += 1;
        }
    }
    if start < text.len() {
        parts.push(&text[start..]);
    }
    parts.retain(|p| !p.trim().is_empty());
    parts
}

/// Greedy sentence accumulation for paragraphs over the ceiling.
/// Splits after CJK and Latin sentence-ending punctuation.
fn split_large_paragraph(text: &str, max_tokens: usize) -> Vec<String> {
    let sentences = split_sentences(text);
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0usize;

    for sentence in sentences {
        let sent_tokens = estimate_tokens(sentence);
        if current_tokens + sent_tokens > max_tokens && !current.is_empty() {
            parts.push(current);
            current = sentence.to_string();
            current_tokens = sent_tokens;
        } else {
            current.push_str(sentence);
            current_tokens += sent_tokens;
        }
    }

    if !current.trim().is_empty() {
        parts.push(current);
    }

    parts
}

/// Split text into sentences, keeping the terminator attached.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    for (i, c) in text.char_indices() {
        if matches!(c, '。' | '！' | '？' | '；' | '.' | '!' | '?') {
            let end = i + c.len_utf8();
            parts.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        parts.push(&text[start..]);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_latin() {
        // 5 chars * 0.25 = 1.25, rounded up
        assert_eq!(estimate_tokens("hello"), 2);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn estimate_cjk_weighted() {
        // 2 CJK chars * 1.5 = 3.0
        assert_eq!(estimate_tokens("中文"), 3);
        // Mixed: 2 * 1.5 + 4 * 0.25 = 4.0
        assert_eq!(estimate_tokens("中文abcd"), 4);
    }

    #[test]
    fn estimate_monotonic_in_length() {
        let mut prev = 0;
        for n in 0..200 {
            let s = "a".repeat(n);
            let est = estimate_tokens(&s);
            assert!(est >= prev, "estimate decreased at length {}", n);
            prev = est;
        }
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_text("", 500, 50).is_empty());
        assert!(chunk_text("\n\n\n\n", 500, 50).is_empty());
        assert!(chunk_text("   \n\n  ", 500, 50).is_empty());
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_text("First paragraph.\n\nSecond paragraph.", 500, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert!(chunks[0].content.contains("First paragraph."));
        assert!(chunks[0].content.contains("Second paragraph."));
    }

    #[test]
    fn deterministic() {
        let text = "Alpha one two three.\n\nBeta four five six.\n\nGamma seven eight nine.";
        let a = chunk_text(text, 10, 2);
        let b = chunk_text(text, 10, 2);
        assert_eq!(a, b);
    }

    #[test]
    fn indices_contiguous() {
        let text = (0..40)
            .map(|i| format!("Paragraph number {} with a bit of padding text.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&text, 30, 5);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i as i64, "index mismatch at position {}", i);
        }
    }

    /// Paragraph stream of ~1200 estimated tokens with the default
    /// 500/50 settings: at least 3 chunks, all within the ceiling, and
    /// each successor seeded from the tail of its predecessor.
    #[test]
    fn overlap_carries_trailing_lines() {
        // Each paragraph: 4 lines of 100 chars -> ~101 tokens.
        let para = vec!["x".repeat(100); 4].join("\n");
        let text = vec![para; 12].join("\n\n");
        assert!(estimate_tokens(&text) >= 1200);

        let chunks = chunk_text(&text, 500, 50);
        assert!(chunks.len() >= 3, "expected >= 3 chunks, got {}", chunks.len());
        for c in &chunks {
            assert!(
                c.token_count <= 500,
                "chunk {} exceeds ceiling: {}",
                c.index,
                c.token_count
            );
        }
        for pair in chunks.windows(2) {
            let tail_line = pair[0].content.lines().last().unwrap();
            assert!(
                pair[1].content.starts_with(tail_line),
                "chunk {} does not begin with the tail of chunk {}",
                pair[1].index,
                pair[0].index
            );
        }
    }

    #[test]
    fn oversized_paragraph_split_on_sentences() {
        // Three sentences of ~300 tokens each in one paragraph.
        let sentence = format!("{}.", "y".repeat(1195));
        let para = sentence.repeat(3);
        let chunks = chunk_text(&para, 500, 50);
        assert_eq!(chunks.len(), 3);
        for c in &chunks {
            assert!(c.token_count <= 500);
            assert!(c.content.ends_with('.'));
        }
    }

    #[test]
    fn cjk_sentence_split() {
        let sentence = format!("{}。", "法".repeat(400)); // ~601 tokens
        let para = sentence.repeat(2);
        let chunks = chunk_text(&para, 650, 0);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content.ends_with('。'));
    }

    /// Reassembled chunks cover all non-whitespace content at least
    /// once (overlap may duplicate, never drop).
    #[test]
    fn coverage() {
        let paragraphs: Vec<String> = (0..20)
            .map(|i| format!("Unique paragraph marker {} with filler text to pad it out.", i))
            .collect();
        let text = paragraphs.join("\n\n");
        let chunks = chunk_text(&text, 40, 10);
        let combined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        for p in &paragraphs {
            assert!(combined.contains(p.trim()), "lost paragraph: {}", p);
        }
    }
}
