//! Core data models used throughout Dossier.
//!
//! These types represent the source documents, chunks, and retrieved
//! context that flow through the ingestion and retrieval pipeline.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Declared type of an uploaded reference document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Pdf,
    Docx,
}

impl FileType {
    /// Resolve from a filename extension. Returns `None` for anything
    /// outside the allowed upload types.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = name.rsplit('.').next()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(FileType::Pdf),
            "docx" => Some(FileType::Docx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pdf" => Ok(FileType::Pdf),
            "docx" => Ok(FileType::Docx),
            other => bail!("Unsupported file type: {}", other),
        }
    }
}

/// Processing state of a source document.
///
/// The pipeline advances through `pending → extracting → (ocr)? →
/// chunking → embedding → ready`. Every transition is checked against
/// an explicit table; arbitrary status writes are rejected. `ready`
/// and `error` are terminal, except that a document in `error` may be
/// re-ingested from scratch (`error → extracting`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    Pending,
    Extracting,
    Ocr,
    Chunking,
    Embedding,
    Ready,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Extracting => "extracting",
            ProcessingStatus::Ocr => "ocr",
            ProcessingStatus::Chunking => "chunking",
            ProcessingStatus::Embedding => "embedding",
            ProcessingStatus::Ready => "ready",
            ProcessingStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "extracting" => Ok(ProcessingStatus::Extracting),
            "ocr" => Ok(ProcessingStatus::Ocr),
            "chunking" => Ok(ProcessingStatus::Chunking),
            "embedding" => Ok(ProcessingStatus::Embedding),
            "ready" => Ok(ProcessingStatus::Ready),
            "error" => Ok(ProcessingStatus::Error),
            other => bail!("Unknown processing status: {}", other),
        }
    }

    /// Whether this status ends the pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Ready | ProcessingStatus::Error)
    }

    /// Transition table for the ingestion state machine.
    ///
    /// Any non-terminal status may fail into `error`. A document in
    /// `error` may restart at `extracting` (re-ingestion from scratch
    /// is the documented recovery path for embedding failures).
    pub fn can_transition(&self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;
        if next == Error {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Pending, Extracting)
                | (Error, Extracting)
                | (Extracting, Ocr)
                | (Extracting, Chunking)
                | (Ocr, Chunking)
                | (Chunking, Embedding)
                | (Chunking, Ready)
                | (Embedding, Ready)
        )
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference document stored in the library.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub id: String,
    /// SHA-256 of the uploaded bytes; unique, used for deduplication.
    pub content_hash: String,
    pub original_file_name: String,
    pub file_type: FileType,
    pub file_path: String,
    pub file_size: i64,
    /// Full extracted text; `None` until extraction completes.
    pub extracted_text: Option<String>,
    pub processing_status: ProcessingStatus,
    pub error_message: Option<String>,
    pub chunk_count: i64,
    pub created_at: i64,
}

/// A bounded segment of a document's extracted text, produced by the
/// chunker before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub content: String,
    pub index: i64,
    pub token_count: i64,
}

/// Display metadata stored alongside each chunk row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_file: String,
    pub chunk_index: i64,
}

/// A piece of context handed to the token budget allocator. Derived at
/// query time, never persisted. `similarity` is in `[0, 1]`; condensed
/// context is fixed at `1.0` since it is not a ranked chunk.
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    pub content: String,
    pub source_file: String,
    pub similarity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_from_name() {
        assert_eq!(FileType::from_file_name("a.PDF"), Some(FileType::Pdf));
        assert_eq!(FileType::from_file_name("brief.docx"), Some(FileType::Docx));
        assert_eq!(FileType::from_file_name("notes.txt"), None);
        assert_eq!(FileType::from_file_name("noext"), None);
    }

    #[test]
    fn status_roundtrip() {
        for s in [
            ProcessingStatus::Pending,
            ProcessingStatus::Extracting,
            ProcessingStatus::Ocr,
            ProcessingStatus::Chunking,
            ProcessingStatus::Embedding,
            ProcessingStatus::Ready,
            ProcessingStatus::Error,
        ] {
            assert_eq!(ProcessingStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(ProcessingStatus::parse("bogus").is_err());
    }

    #[test]
    fn happy_path_transitions() {
        use ProcessingStatus::*;
        assert!(Pending.can_transition(Extracting));
        assert!(Extracting.can_transition(Chunking));
        assert!(Extracting.can_transition(Ocr));
        assert!(Ocr.can_transition(Chunking));
        assert!(Chunking.can_transition(Embedding));
        assert!(Embedding.can_transition(Ready));
        // Zero-chunk short circuit.
        assert!(Chunking.can_transition(Ready));
    }

    #[test]
    fn invalid_transitions_rejected() {
        use ProcessingStatus::*;
        assert!(!Pending.can_transition(Chunking));
        assert!(!Pending.can_transition(Ready));
        assert!(!Ocr.can_transition(Embedding));
        assert!(!Ready.can_transition(Extracting));
        assert!(!Embedding.can_transition(Chunking));
    }

    #[test]
    fn error_reachable_from_non_terminal_only() {
        use ProcessingStatus::*;
        for s in [Pending, Extracting, Ocr, Chunking, Embedding] {
            assert!(s.can_transition(Error), "{} should fail into error", s);
        }
        assert!(!Ready.can_transition(Error));
        assert!(!Error.can_transition(Error));
    }

    #[test]
    fn error_restarts_at_extracting() {
        use ProcessingStatus::*;
        assert!(Error.can_transition(Extracting));
        assert!(!Error.can_transition(Chunking));
    }
}
