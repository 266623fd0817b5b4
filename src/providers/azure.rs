//! Azure AI Vision backend.
//!
//! Three vendor surfaces hide behind the one provider:
//!
//! * OCR — the Read API: submit the image, receive a `202` with an
//!   `Operation-Location`, then poll until the operation reports
//!   `succeeded`.
//! * Captioning — the synchronous Analyze API with the `Description` and
//!   `Tags` visual features.
//! * Document analysis — Document Intelligence `prebuilt-layout`, the one
//!   native structured-analysis surface in the provider set. Same
//!   submit-then-poll shape as Read.
//!
//! Polling sleeps between attempts; the engine's per-operation deadline
//! bounds the total wait.

use crate::config::EngineConfig;
use crate::error::ProviderFailure;
use crate::options::{CaptionOptions, DocumentOptions, OcrOptions};
use crate::output::{
    AltCaption, Block, BlockType, BoundingBox, CaptionResult, Cell, DocumentMetadata,
    DocumentResult, Form, FormField, Line, OcrResult, Page, Table, TextBlock, Word,
};
use crate::pipeline::structure::{guess_block_type, guess_document_type, FALLBACK_CONFIDENCE};
use crate::pipeline::validate::ImageAsset;
use crate::providers::{DocumentAnalysis, Provider, ProviderId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_POLLS: u32 = 60;

pub struct AzureVisionProvider {
    key: String,
    endpoint: String,
    default_language: String,
    http: reqwest::Client,
}

impl AzureVisionProvider {
    pub fn new(key: String, endpoint: String, config: &EngineConfig, http: reqwest::Client) -> Self {
        Self {
            key,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            default_language: config.ocr_default_language.clone(),
            http,
        }
    }

    fn failure(message: impl Into<String>) -> ProviderFailure {
        ProviderFailure::new(ProviderId::Azure, message)
    }

    /// Submit an async operation and return its polling URL.
    async fn submit(
        &self,
        url: String,
        body: reqwest::Body,
        content_type: &str,
    ) -> Result<String, ProviderFailure> {
        let response = self
            .http
            .post(url)
            .header(KEY_HEADER, &self.key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| Self::failure(format!("submit failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Self::failure(format!(
                "HTTP {} on submit",
                response.status()
            )));
        }
        response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or_else(|| Self::failure("missing Operation-Location header"))
    }

    /// Poll `url` until the operation leaves its running states.
    async fn poll<T: serde::de::DeserializeOwned + OperationStatus>(
        &self,
        url: &str,
    ) -> Result<T, ProviderFailure> {
        for _ in 0..MAX_POLLS {
            let response = self
                .http
                .get(url)
                .header(KEY_HEADER, &self.key)
                .send()
                .await
                .map_err(|e| Self::failure(format!("poll failed: {e}")))?;
            if !response.status().is_success() {
                return Err(Self::failure(format!("HTTP {} on poll", response.status())));
            }
            let body: T = response
                .json()
                .await
                .map_err(|e| Self::failure(format!("malformed poll response: {e}")))?;
            match body.status() {
                "succeeded" => return Ok(body),
                "failed" => return Err(Self::failure("operation reported failure")),
                other => debug!(status = other, "operation still running"),
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Err(Self::failure("operation did not complete in time"))
    }
}

trait OperationStatus {
    fn status(&self) -> &str;
}

// ── Read API (OCR) ───────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadOperation {
    status: String,
    analyze_result: Option<ReadResultSet>,
}

impl OperationStatus for ReadOperation {
    fn status(&self) -> &str {
        &self.status
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadResultSet {
    #[serde(default)]
    read_results: Vec<ReadPage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadPage {
    #[serde(default)]
    angle: f32,
    language: Option<String>,
    #[serde(default)]
    lines: Vec<ReadLine>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadLine {
    text: String,
    #[serde(default)]
    bounding_box: Vec<f32>,
    #[serde(default)]
    words: Vec<ReadWord>,
}

#[derive(Deserialize)]
struct ReadWord {
    text: String,
    #[serde(default)]
    confidence: f32,
}

fn bbox_from_octet(coords: &[f32]) -> Option<BoundingBox> {
    // Read returns 8 numbers: the quadrilateral's corner coordinates.
    if coords.len() != 8 {
        return None;
    }
    let xs = [coords[0], coords[2], coords[4], coords[6]];
    let ys = [coords[1], coords[3], coords[5], coords[7]];
    Some(BoundingBox {
        x0: xs.iter().copied().fold(f32::INFINITY, f32::min),
        y0: ys.iter().copied().fold(f32::INFINITY, f32::min),
        x1: xs.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        y1: ys.iter().copied().fold(f32::NEG_INFINITY, f32::max),
    })
}

fn map_read(op: ReadOperation) -> OcrResult {
    let pages = op
        .analyze_result
        .map(|r| r.read_results)
        .unwrap_or_default();

    let mut words = Vec::new();
    let mut lines = Vec::new();
    let mut text_parts = Vec::new();
    let mut orientation = None;
    let mut language = None;

    for page in pages {
        if orientation.is_none() && page.angle != 0.0 {
            orientation = Some(crate::output::Orientation {
                angle: page.angle,
                confidence: 1.0,
            });
        }
        if language.is_none() {
            language = page.language;
        }
        for line in page.lines {
            let bbox = bbox_from_octet(&line.bounding_box);
            let line_confidence = if line.words.is_empty() {
                0.0
            } else {
                line.words.iter().map(|w| w.confidence).sum::<f32>() / line.words.len() as f32
            };
            for word in line.words {
                words.push(Word {
                    text: word.text,
                    confidence: word.confidence,
                    bbox,
                });
            }
            lines.push(Line::new(line.text.clone(), line_confidence));
            text_parts.push(line.text);
        }
    }

    let text = text_parts.join("\n");
    let confidence = if words.is_empty() {
        0.0
    } else {
        words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32
    };
    let blocks = if text.is_empty() {
        Vec::new()
    } else {
        vec![TextBlock {
            text: text.clone(),
            confidence,
        }]
    };

    OcrResult {
        text,
        confidence,
        words,
        lines,
        blocks,
        orientation,
        language,
    }
}

// ── Analyze API (captioning) ─────────────────────────────────────────────

#[derive(Deserialize)]
struct AnalyzeResponse {
    description: Option<Description>,
    #[serde(default)]
    tags: Vec<WireTag>,
}

#[derive(Deserialize)]
struct Description {
    #[serde(default)]
    captions: Vec<WireCaption>,
}

#[derive(Deserialize)]
struct WireCaption {
    text: String,
    #[serde(default)]
    confidence: f32,
}

#[derive(Deserialize)]
struct WireTag {
    name: String,
}

fn map_analyze(resp: AnalyzeResponse, detailed: bool) -> Result<CaptionResult, ProviderFailure> {
    let mut captions = resp
        .description
        .map(|d| d.captions)
        .unwrap_or_default()
        .into_iter();
    let top = captions
        .next()
        .ok_or_else(|| AzureVisionProvider::failure("no caption returned"))?;

    let (alternatives, tags) = if detailed {
        (
            captions
                .map(|c| AltCaption {
                    text: c.text,
                    confidence: c.confidence,
                })
                .collect(),
            resp.tags.into_iter().map(|t| t.name).collect(),
        )
    } else {
        (Vec::new(), Vec::new())
    };

    Ok(CaptionResult {
        caption: top.text,
        confidence: top.confidence,
        model: Some("azure-analyze-v3.2".to_string()),
        alternatives,
        tags,
    })
}

// ── Document Intelligence (prebuilt-layout) ──────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LayoutRequest {
    base64_source: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutOperation {
    status: String,
    analyze_result: Option<LayoutResult>,
}

impl OperationStatus for LayoutOperation {
    fn status(&self) -> &str {
        &self.status
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutResult {
    #[serde(default)]
    content: String,
    #[serde(default)]
    pages: Vec<LayoutPage>,
    #[serde(default)]
    paragraphs: Vec<LayoutParagraph>,
    #[serde(default)]
    tables: Vec<LayoutTable>,
    #[serde(default)]
    key_value_pairs: Vec<LayoutKeyValue>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutPage {
    page_number: u32,
    width: Option<f32>,
    height: Option<f32>,
}

#[derive(Deserialize)]
struct LayoutParagraph {
    content: String,
    role: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutTable {
    row_count: u32,
    column_count: u32,
    #[serde(default)]
    cells: Vec<LayoutCell>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutCell {
    row_index: u32,
    column_index: u32,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct LayoutKeyValue {
    key: LayoutContent,
    value: Option<LayoutContent>,
    #[serde(default)]
    confidence: f32,
}

#[derive(Deserialize)]
struct LayoutContent {
    content: String,
}

fn block_type_for_role(role: Option<&str>, content: &str) -> BlockType {
    match role {
        Some("title") | Some("sectionHeading") => BlockType::Heading,
        _ => guess_block_type(content),
    }
}

fn map_layout(op: LayoutOperation, options: &DocumentOptions) -> DocumentResult {
    let Some(result) = op.analyze_result else {
        return DocumentResult::default();
    };

    let blocks: Vec<Block> = result
        .paragraphs
        .iter()
        .map(|p| Block {
            block_type: block_type_for_role(p.role.as_deref(), &p.content),
            text: p.content.clone(),
            confidence: FALLBACK_CONFIDENCE,
            bbox: None,
        })
        .collect();

    let pages: Vec<Page> = if result.pages.is_empty() {
        vec![Page {
            page_number: 1,
            width: None,
            height: None,
            blocks: blocks.clone(),
        }]
    } else {
        // Layout paragraphs are not page-scoped here; attach them all to the
        // first page and keep the rest as dimension records.
        result
            .pages
            .iter()
            .enumerate()
            .map(|(i, p)| Page {
                page_number: p.page_number,
                width: p.width,
                height: p.height,
                blocks: if i == 0 { blocks.clone() } else { Vec::new() },
            })
            .collect()
    };

    let tables = if options.tables_enabled() {
        result
            .tables
            .iter()
            .map(|t| Table {
                row_count: t.row_count as usize,
                column_count: t.column_count as usize,
                cells: t
                    .cells
                    .iter()
                    .map(|c| Cell {
                        row: c.row_index as usize,
                        col: c.column_index as usize,
                        text: c.content.clone(),
                        confidence: FALLBACK_CONFIDENCE,
                    })
                    .collect(),
                confidence: FALLBACK_CONFIDENCE,
            })
            .collect()
    } else {
        Vec::new()
    };

    let forms = if options.forms_enabled() && !result.key_value_pairs.is_empty() {
        vec![Form {
            fields: result
                .key_value_pairs
                .iter()
                .map(|kv| FormField {
                    key: kv.key.content.clone(),
                    value: kv.value.as_ref().map(|v| v.content.clone()).unwrap_or_default(),
                    confidence: kv.confidence,
                })
                .collect(),
        }]
    } else {
        Vec::new()
    };

    let metadata = DocumentMetadata {
        document_type: guess_document_type(&result.content),
        confidence: FALLBACK_CONFIDENCE,
    };

    DocumentResult {
        text: result.content,
        pages,
        tables,
        forms,
        metadata,
    }
}

// ── Trait impls ──────────────────────────────────────────────────────────

#[async_trait]
impl Provider for AzureVisionProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Azure
    }

    async fn extract_text(
        &self,
        image: &ImageAsset,
        options: &OcrOptions,
    ) -> Result<OcrResult, ProviderFailure> {
        let language = options.language.as_deref().unwrap_or(&self.default_language);
        let url = format!(
            "{}/vision/v3.2/read/analyze?language={}",
            self.endpoint, language
        );
        let poll_url = self
            .submit(url, image.bytes.clone().into(), "application/octet-stream")
            .await?;
        let op: ReadOperation = self.poll(&poll_url).await?;
        Ok(map_read(op))
    }

    async fn generate_caption(
        &self,
        image: &ImageAsset,
        options: &CaptionOptions,
    ) -> Result<CaptionResult, ProviderFailure> {
        let url = format!(
            "{}/vision/v3.2/analyze?visualFeatures=Description,Tags",
            self.endpoint
        );
        let response = self
            .http
            .post(url)
            .header(KEY_HEADER, &self.key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.bytes.clone())
            .send()
            .await
            .map_err(|e| Self::failure(format!("request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Self::failure(format!(
                "HTTP {} from analyze",
                response.status()
            )));
        }
        let body: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| Self::failure(format!("malformed response: {e}")))?;
        map_analyze(body, options.detailed)
    }

    fn document_analysis(&self) -> Option<&dyn DocumentAnalysis> {
        Some(self)
    }
}

#[async_trait]
impl DocumentAnalysis for AzureVisionProvider {
    async fn analyze_document(
        &self,
        image: &ImageAsset,
        options: &DocumentOptions,
    ) -> Result<DocumentResult, ProviderFailure> {
        let url = format!(
            "{}/formrecognizer/documentModels/prebuilt-layout:analyze?api-version=2023-07-31",
            self.endpoint
        );
        let request = LayoutRequest {
            base64_source: image.to_base64(),
        };
        let body = serde_json::to_vec(&request)
            .map_err(|e| Self::failure(format!("request encoding failed: {e}")))?;
        let poll_url = self.submit(url, body.into(), "application/json").await?;
        let op: LayoutOperation = self.poll(&poll_url).await?;
        Ok(map_layout(op, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::DocumentType;

    #[test]
    fn maps_read_operation() {
        let body = r#"{
            "status": "succeeded",
            "analyzeResult": {
                "readResults": [{
                    "angle": 1.5,
                    "language": "en",
                    "lines": [{
                        "text": "Hello world",
                        "boundingBox": [0, 0, 100, 0, 100, 20, 0, 20],
                        "words": [
                            {"text": "Hello", "confidence": 0.99},
                            {"text": "world", "confidence": 0.97}
                        ]
                    }]
                }]
            }
        }"#;
        let op: ReadOperation = serde_json::from_str(body).unwrap();
        let result = map_read(op);
        assert_eq!(result.text, "Hello world");
        assert_eq!(result.words.len(), 2);
        assert!((result.confidence - 0.98).abs() < 1e-3);
        assert_eq!(result.orientation.unwrap().angle, 1.5);
        assert_eq!(result.language.as_deref(), Some("en"));
    }

    #[test]
    fn read_without_result_is_empty() {
        let op: ReadOperation = serde_json::from_str(r#"{"status": "succeeded"}"#).unwrap();
        let result = map_read(op);
        assert!(result.text.is_empty());
        assert!(result.lines.is_empty());
    }

    #[test]
    fn maps_analyze_caption_detailed() {
        let body = r#"{
            "description": {
                "captions": [
                    {"text": "a dog in a park", "confidence": 0.91},
                    {"text": "a dog outdoors", "confidence": 0.72}
                ]
            },
            "tags": [{"name": "dog"}, {"name": "grass"}]
        }"#;
        let resp: AnalyzeResponse = serde_json::from_str(body).unwrap();
        let result = map_analyze(resp, true).unwrap();
        assert_eq!(result.caption, "a dog in a park");
        assert_eq!(result.alternatives.len(), 1);
        assert_eq!(result.tags, vec!["dog", "grass"]);
    }

    #[test]
    fn analyze_without_caption_fails() {
        let resp: AnalyzeResponse = serde_json::from_str(r#"{"tags": []}"#).unwrap();
        assert!(map_analyze(resp, false).is_err());
    }

    #[test]
    fn maps_layout_with_tables_and_fields() {
        let body = r#"{
            "status": "succeeded",
            "analyzeResult": {
                "content": "INVOICE\nAmount due: 42",
                "pages": [{"pageNumber": 1, "width": 8.5, "height": 11.0}],
                "paragraphs": [
                    {"content": "INVOICE", "role": "title"},
                    {"content": "Amount due: 42"}
                ],
                "tables": [{
                    "rowCount": 2, "columnCount": 2,
                    "cells": [
                        {"rowIndex": 0, "columnIndex": 0, "content": "Item"},
                        {"rowIndex": 0, "columnIndex": 1, "content": "Price"},
                        {"rowIndex": 1, "columnIndex": 0, "content": "Widget"},
                        {"rowIndex": 1, "columnIndex": 1, "content": "42"}
                    ]
                }],
                "keyValuePairs": [{
                    "key": {"content": "Amount due"},
                    "value": {"content": "42"},
                    "confidence": 0.95
                }]
            }
        }"#;
        let op: LayoutOperation = serde_json::from_str(body).unwrap();
        let result = map_layout(op, &DocumentOptions::default());
        assert_eq!(result.metadata.document_type, DocumentType::Invoice);
        assert_eq!(result.pages[0].blocks[0].block_type, BlockType::Heading);
        assert_eq!(result.tables[0].cells.len(), 4);
        assert_eq!(result.forms[0].fields[0].key, "Amount due");
    }

    #[test]
    fn layout_respects_extraction_flags() {
        let body = r#"{
            "status": "succeeded",
            "analyzeResult": {
                "content": "x",
                "tables": [{"rowCount": 1, "columnCount": 1, "cells": []}],
                "keyValuePairs": [{"key": {"content": "k"}, "value": {"content": "v"}, "confidence": 0.9}]
            }
        }"#;
        let op: LayoutOperation = serde_json::from_str(body).unwrap();
        let options = DocumentOptions {
            extract_tables: Some(false),
            extract_forms: Some(false),
            ..Default::default()
        };
        let result = map_layout(op, &options);
        assert!(result.tables.is_empty());
        assert!(result.forms.is_empty());
    }

    #[test]
    fn octet_bbox_requires_eight_coords() {
        assert!(bbox_from_octet(&[1.0, 2.0]).is_none());
        let bbox = bbox_from_octet(&[0.0, 0.0, 10.0, 0.0, 10.0, 5.0, 0.0, 5.0]).unwrap();
        assert_eq!((bbox.x1, bbox.y1), (10.0, 5.0));
    }
}
