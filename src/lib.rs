//! Dossier is a local-first ingestion and retrieval core for legal
//! reference documents.
//!
//! Documents (PDF, DOCX) are uploaded into a shared library, linked to
//! cases, and processed through a staged pipeline:
//!
//! ```text
//!   upload -> extract -> (ocr)? -> chunk -> embed -> ready
//!                                                      |
//!   case query  ->  condense (full text)  ----+        |
//!                 or retrieve (chunk cosine) -+-> budget -> prompt
//! ```
//!
//! Modules:
//! - [`config`]: TOML configuration with validated defaults
//! - [`models`]: documents, chunks, statuses, retrieved context
//! - [`db`] / [`migrate`]: SQLite pool and schema
//! - [`ingest`]: upload registration and the processing pipeline
//! - [`extract`] / [`ocr`]: text layer extraction and vision OCR
//! - [`chunk`] / [`embedding`]: chunking and vector embedding
//! - [`links`] / [`retrieve`]: case scoping and similarity search
//! - [`provider`] / [`condense`]: generation providers, condensation
//! - [`budget`] / [`context`]: token allocation and strategy chain

pub mod budget;
pub mod chunk;
pub mod condense;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod links;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod provider;
pub mod retrieve;
