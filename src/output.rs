//! Result types returned by the three conversion operations.
//!
//! Every operation returns an [`OperationOutput`] envelope wrapping the
//! kind-specific payload ([`OcrResult`], [`CaptionResult`] or
//! [`DocumentResult`]). The envelope carries the bookkeeping callers rely on
//! for display and billing: wall-clock duration, which provider answered,
//! the resolved options that were actually in effect, and whether the answer
//! came out of the result cache.

use crate::options::{CaptionOptions, DocumentOptions, OcrOptions};
use crate::pipeline::validate::ImageInfo;
use crate::providers::ProviderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Envelope around a completed operation result.
///
/// On a cache hit the envelope is cloned from the stored entry with
/// `from_cache` set and `timestamp` refreshed; everything else — including
/// `processing_time_ms`, which then reflects the *original* provider call —
/// is structurally identical to the first response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationOutput<R, O> {
    /// Unique id for this operation invocation (not stable across cache hits).
    pub id: String,
    pub result: R,
    pub processing_time_ms: u64,
    pub provider: ProviderId,
    pub timestamp: DateTime<Utc>,
    pub image_info: ImageInfo,
    /// The options that were in effect, after merging caller options with
    /// engine defaults.
    pub options: O,
    pub from_cache: bool,
}

pub type OcrOutput = OperationOutput<OcrResult, OcrOptions>;
pub type CaptionOutput = OperationOutput<CaptionResult, CaptionOptions>;
pub type DocumentOutput = OperationOutput<DocumentResult, DocumentOptions>;

// ── OCR ──────────────────────────────────────────────────────────────────

/// Text extracted from an image, with per-word and per-line detail where the
/// backend provides it (VLM-style backends return only `text` and `lines`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrResult {
    pub text: String,
    /// Overall confidence in `0.0..=1.0`.
    pub confidence: f32,
    pub words: Vec<Word>,
    pub lines: Vec<Line>,
    pub blocks: Vec<TextBlock>,
    pub orientation: Option<Orientation>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Line {
    pub text: String,
    pub confidence: f32,
}

impl Line {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// A contiguous run of text as segmented by the OCR backend itself
/// (distinct from the typed [`Block`]s produced by document analysis).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Orientation {
    /// Rotation angle in degrees.
    pub angle: f32,
    pub confidence: f32,
}

// ── Captioning ───────────────────────────────────────────────────────────

/// A natural-language description of an image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptionResult {
    pub caption: String,
    pub confidence: f32,
    /// Model identifier reported by the backend, when known.
    pub model: Option<String>,
    /// Lower-ranked candidate captions (detailed mode only).
    pub alternatives: Vec<AltCaption>,
    /// Content tags (detailed mode only).
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AltCaption {
    pub text: String,
    pub confidence: f32,
}

// ── Document analysis ────────────────────────────────────────────────────

/// Structured document content: typed blocks per page, tables, form fields
/// and a document-type classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentResult {
    pub text: String,
    pub pages: Vec<Page>,
    pub tables: Vec<Table>,
    pub forms: Vec<Form>,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    /// 1-indexed.
    pub page_number: u32,
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub block_type: BlockType,
    pub text: String,
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Heading,
    List,
    Paragraph,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub row_count: usize,
    pub column_count: usize,
    pub cells: Vec<Cell>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
    pub text: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Form {
    pub fields: Vec<FormField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    pub key: String,
    pub value: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub document_type: DocumentType,
    pub confidence: f32,
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        Self {
            document_type: DocumentType::Document,
            confidence: 0.0,
        }
    }
}

/// Coarse document classification produced by native backends or by the
/// keyword heuristics in [`crate::pipeline::structure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentType {
    Invoice,
    Receipt,
    Contract,
    Resume,
    Form,
    /// Default when no category keyword matches.
    Document,
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentType::Invoice => "Invoice",
            DocumentType::Receipt => "Receipt",
            DocumentType::Contract => "Contract",
            DocumentType::Resume => "Resume",
            DocumentType::Form => "Form",
            DocumentType::Document => "Document",
        };
        f.write_str(s)
    }
}
