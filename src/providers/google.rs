//! Google Cloud Vision backend.
//!
//! One REST call per operation against `images:annotate`, authenticated by
//! API key in the query string. OCR uses `TEXT_DETECTION` (or
//! `DOCUMENT_TEXT_DETECTION` when the caller asks for document mode);
//! captioning is synthesised from `LABEL_DETECTION` since Vision has no
//! native caption endpoint — the top label becomes the caption and the rest
//! become tags and alternatives.

use crate::config::EngineConfig;
use crate::error::ProviderFailure;
use crate::options::{CaptionOptions, OcrOptions};
use crate::output::{
    AltCaption, BoundingBox, CaptionResult, Line, OcrResult, TextBlock, Word,
};
use crate::pipeline::validate::ImageAsset;
use crate::providers::{Provider, ProviderId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

const ANNOTATE_URL: &str = "https://vision.googleapis.com/v1/images:annotate";

pub struct GoogleVisionProvider {
    api_key: String,
    default_language: String,
    http: reqwest::Client,
}

impl GoogleVisionProvider {
    pub fn new(api_key: String, config: &EngineConfig, http: reqwest::Client) -> Self {
        Self {
            api_key,
            default_language: config.ocr_default_language.clone(),
            http,
        }
    }

    fn failure(message: impl Into<String>) -> ProviderFailure {
        ProviderFailure::new(ProviderId::Google, message)
    }

    async fn annotate(
        &self,
        image: &ImageAsset,
        feature: &str,
        language_hint: Option<&str>,
        max_results: u32,
    ) -> Result<AnnotateResponse, ProviderFailure> {
        let request = AnnotateRequest {
            requests: vec![AnnotateEntry {
                image: WireImage {
                    content: image.to_base64(),
                },
                features: vec![Feature {
                    r#type: feature.to_string(),
                    max_results,
                }],
                image_context: language_hint.map(|hint| ImageContext {
                    language_hints: vec![hint.to_string()],
                }),
            }],
        };

        debug!(feature, "google vision annotate");
        let response = self
            .http
            .post(ANNOTATE_URL)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::failure(format!("request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Self::failure(format!(
                "HTTP {} from images:annotate",
                response.status()
            )));
        }
        let body: AnnotateEnvelope = response
            .json()
            .await
            .map_err(|e| Self::failure(format!("malformed response: {e}")))?;

        let first = body
            .responses
            .into_iter()
            .next()
            .ok_or_else(|| Self::failure("empty annotate response"))?;
        if let Some(err) = first.error {
            return Err(Self::failure(err.message));
        }
        Ok(first)
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct AnnotateRequest {
    requests: Vec<AnnotateEntry>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateEntry {
    image: WireImage,
    features: Vec<Feature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_context: Option<ImageContext>,
}

#[derive(Serialize)]
struct WireImage {
    content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Feature {
    r#type: String,
    max_results: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageContext {
    language_hints: Vec<String>,
}

#[derive(Deserialize)]
struct AnnotateEnvelope {
    #[serde(default)]
    responses: Vec<AnnotateResponse>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct AnnotateResponse {
    full_text_annotation: Option<FullTextAnnotation>,
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    #[serde(default)]
    label_annotations: Vec<LabelAnnotation>,
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct FullTextAnnotation {
    text: String,
    #[serde(default)]
    pages: Vec<WirePage>,
}

#[derive(Deserialize)]
struct WirePage {
    #[serde(default)]
    confidence: f32,
    property: Option<PageProperty>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageProperty {
    #[serde(default)]
    detected_languages: Vec<DetectedLanguage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectedLanguage {
    language_code: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextAnnotation {
    description: String,
    bounding_poly: Option<BoundingPoly>,
}

#[derive(Deserialize)]
struct BoundingPoly {
    #[serde(default)]
    vertices: Vec<Vertex>,
}

#[derive(Deserialize, Default)]
struct Vertex {
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
}

#[derive(Deserialize)]
struct LabelAnnotation {
    description: String,
    #[serde(default)]
    score: f32,
}

#[derive(Deserialize)]
struct WireError {
    message: String,
}

fn bbox_from_poly(poly: &BoundingPoly) -> Option<BoundingBox> {
    if poly.vertices.is_empty() {
        return None;
    }
    let xs = poly.vertices.iter().map(|v| v.x);
    let ys = poly.vertices.iter().map(|v| v.y);
    Some(BoundingBox {
        x0: xs.clone().fold(f32::INFINITY, f32::min),
        y0: ys.clone().fold(f32::INFINITY, f32::min),
        x1: xs.fold(f32::NEG_INFINITY, f32::max),
        y1: ys.fold(f32::NEG_INFINITY, f32::max),
    })
}

fn map_ocr(resp: AnnotateResponse) -> OcrResult {
    // textAnnotations[0] is the whole-image text; the rest are words.
    let full_text = resp
        .full_text_annotation
        .as_ref()
        .map(|fta| fta.text.clone())
        .or_else(|| resp.text_annotations.first().map(|a| a.description.clone()))
        .unwrap_or_default();
    let full_text = full_text.trim().to_string();

    let (confidence, language) = match resp.full_text_annotation.as_ref().and_then(|fta| {
        fta.pages.first().map(|p| {
            (
                p.confidence,
                p.property
                    .as_ref()
                    .and_then(|pr| pr.detected_languages.first())
                    .map(|l| l.language_code.clone()),
            )
        })
    }) {
        Some((c, l)) => (c, l),
        None => (0.0, None),
    };

    let words: Vec<Word> = resp
        .text_annotations
        .iter()
        .skip(1)
        .map(|a| Word {
            text: a.description.clone(),
            confidence,
            bbox: a.bounding_poly.as_ref().and_then(bbox_from_poly),
        })
        .collect();

    let lines = full_text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| Line::new(l, confidence))
        .collect();

    let blocks = if full_text.is_empty() {
        Vec::new()
    } else {
        vec![TextBlock {
            text: full_text.clone(),
            confidence,
        }]
    };

    OcrResult {
        text: full_text,
        confidence,
        words,
        lines,
        blocks,
        orientation: None,
        language,
    }
}

fn map_caption(resp: AnnotateResponse, detailed: bool) -> Result<CaptionResult, ProviderFailure> {
    let mut labels = resp.label_annotations.into_iter();
    let top = labels
        .next()
        .ok_or_else(|| GoogleVisionProvider::failure("no labels returned"))?;

    let rest: Vec<LabelAnnotation> = labels.collect();
    let caption = if detailed && !rest.is_empty() {
        let extras: Vec<&str> = rest.iter().take(2).map(|l| l.description.as_str()).collect();
        format!(
            "an image of {} with {}",
            top.description.to_lowercase(),
            extras.join(" and ").to_lowercase()
        )
    } else {
        format!("an image of {}", top.description.to_lowercase())
    };

    let (alternatives, tags) = if detailed {
        (
            rest.iter()
                .take(3)
                .map(|l| AltCaption {
                    text: format!("an image of {}", l.description.to_lowercase()),
                    confidence: l.score,
                })
                .collect(),
            rest.iter().map(|l| l.description.to_lowercase()).collect(),
        )
    } else {
        (Vec::new(), Vec::new())
    };

    Ok(CaptionResult {
        caption,
        confidence: top.score,
        model: Some("google-vision-labels".to_string()),
        alternatives,
        tags,
    })
}

#[async_trait]
impl Provider for GoogleVisionProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Google
    }

    async fn extract_text(
        &self,
        image: &ImageAsset,
        options: &OcrOptions,
    ) -> Result<OcrResult, ProviderFailure> {
        let feature = if options.document_mode {
            "DOCUMENT_TEXT_DETECTION"
        } else {
            "TEXT_DETECTION"
        };
        let language = options.language.as_deref().unwrap_or(&self.default_language);
        let resp = self.annotate(image, feature, Some(language), 1).await?;
        Ok(map_ocr(resp))
    }

    async fn generate_caption(
        &self,
        image: &ImageAsset,
        options: &CaptionOptions,
    ) -> Result<CaptionResult, ProviderFailure> {
        let max_results = if options.detailed { 10 } else { 1 };
        let resp = self.annotate(image, "LABEL_DETECTION", None, max_results).await?;
        map_caption(resp, options.detailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_ocr_with_full_text_annotation() {
        let body = r#"{
            "textAnnotations": [
                {"description": "Total 42", "boundingPoly": {"vertices": [{"x":0,"y":0},{"x":100,"y":20}]}},
                {"description": "Total", "boundingPoly": {"vertices": [{"x":0,"y":0},{"x":50,"y":20}]}},
                {"description": "42", "boundingPoly": {"vertices": [{"x":60,"y":0},{"x":100,"y":20}]}}
            ],
            "fullTextAnnotation": {
                "text": "Total 42\n",
                "pages": [{"confidence": 0.97, "property": {"detectedLanguages": [{"languageCode": "en"}]}}]
            }
        }"#;
        let resp: AnnotateResponse = serde_json::from_str(body).unwrap();
        let result = map_ocr(resp);
        assert_eq!(result.text, "Total 42");
        assert_eq!(result.words.len(), 2);
        assert_eq!(result.words[0].text, "Total");
        assert!((result.confidence - 0.97).abs() < 1e-6);
        assert_eq!(result.language.as_deref(), Some("en"));
        let bbox = result.words[1].bbox.unwrap();
        assert_eq!(bbox.x0, 60.0);
        assert_eq!(bbox.x1, 100.0);
    }

    #[test]
    fn empty_response_maps_to_empty_text() {
        let resp: AnnotateResponse = serde_json::from_str("{}").unwrap();
        let result = map_ocr(resp);
        assert!(result.text.is_empty());
        assert!(result.words.is_empty());
        assert!(result.blocks.is_empty());
    }

    #[test]
    fn caption_from_labels_detailed() {
        let body = r#"{
            "labelAnnotations": [
                {"description": "Cat", "score": 0.98},
                {"description": "Mat", "score": 0.85},
                {"description": "Whiskers", "score": 0.7}
            ]
        }"#;
        let resp: AnnotateResponse = serde_json::from_str(body).unwrap();
        let result = map_caption(resp, true).unwrap();
        assert_eq!(result.caption, "an image of cat with mat and whiskers");
        assert_eq!(result.tags, vec!["mat", "whiskers"]);
        assert_eq!(result.alternatives.len(), 2);
    }

    #[test]
    fn caption_without_labels_is_a_failure() {
        let resp: AnnotateResponse = serde_json::from_str("{}").unwrap();
        let err = map_caption(resp, false).unwrap_err();
        assert_eq!(err.provider, ProviderId::Google);
    }

    #[test]
    fn vertex_bbox_takes_extremes() {
        let poly: BoundingPoly = serde_json::from_str(
            r#"{"vertices": [{"x": 5, "y": 30}, {"x": 90, "y": 2}, {"x": 40, "y": 60}]}"#,
        )
        .unwrap();
        let bbox = bbox_from_poly(&poly).unwrap();
        assert_eq!((bbox.x0, bbox.y0, bbox.x1, bbox.y1), (5.0, 2.0, 90.0, 60.0));
    }
}
