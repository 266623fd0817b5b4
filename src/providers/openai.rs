//! OpenAI-compatible vision-language backend.
//!
//! Both operations go through the chat-completions endpoint with the image
//! attached as a data-URI `image_url` part. VLMs return prose rather than
//! positioned glyphs, so OCR output carries `text` and per-line entries but
//! no word boxes, and confidence is a fixed approximation — the API exposes
//! none.

use crate::config::EngineConfig;
use crate::error::ProviderFailure;
use crate::options::{CaptionOptions, OcrOptions};
use crate::output::{CaptionResult, Line, OcrResult, TextBlock};
use crate::pipeline::validate::ImageAsset;
use crate::providers::{Provider, ProviderId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// VLMs report no recognition confidence; this stands in for one.
const VLM_CONFIDENCE: f32 = 0.9;

const OCR_PROMPT: &str = "Extract every piece of text visible in this image. \
Return only the extracted text, preserving line breaks. If the image \
contains no text, return an empty response.";

const CAPTION_PROMPT_BRIEF: &str =
    "Describe this image in one short sentence. Return only the caption.";

const CAPTION_PROMPT_DETAILED: &str = "Describe this image in one or two \
detailed sentences, mentioning the main subjects, their arrangement, and \
any visible text. Return only the description.";

pub struct OpenAiVisionProvider {
    api_key: String,
    default_model: String,
    http: reqwest::Client,
}

impl OpenAiVisionProvider {
    pub fn new(api_key: String, config: &EngineConfig, http: reqwest::Client) -> Self {
        Self {
            api_key,
            default_model: config
                .captioning_model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            http,
        }
    }

    fn failure(message: impl Into<String>) -> ProviderFailure {
        ProviderFailure::new(ProviderId::OpenAi, message)
    }

    async fn complete(
        &self,
        image: &ImageAsset,
        prompt: &str,
        model: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, ProviderFailure> {
        let request = ChatRequest {
            model,
            max_tokens,
            temperature,
            messages: vec![Message {
                role: "user",
                content: vec![
                    Part::Text {
                        text: prompt.to_string(),
                    },
                    Part::ImageUrl {
                        image_url: ImageUrl {
                            url: image.to_data_uri(),
                        },
                    },
                ],
            }],
        };

        debug!(model, "chat completion request");
        let response = self
            .http
            .post(COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::failure(format!("request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Self::failure(format!(
                "HTTP {} from chat completions",
                response.status()
            )));
        }
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| Self::failure(format!("malformed response: {e}")))?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Self::failure("response contained no choices"))
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: Vec<Part>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Part {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

fn ocr_result_from_text(text: String) -> OcrResult {
    let text = text.trim().to_string();
    let lines = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| Line::new(l, VLM_CONFIDENCE))
        .collect();
    let blocks = if text.is_empty() {
        Vec::new()
    } else {
        vec![TextBlock {
            text: text.clone(),
            confidence: VLM_CONFIDENCE,
        }]
    };
    OcrResult {
        confidence: if text.is_empty() { 0.0 } else { VLM_CONFIDENCE },
        text,
        words: Vec::new(),
        lines,
        blocks,
        orientation: None,
        language: None,
    }
}

#[async_trait]
impl Provider for OpenAiVisionProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    async fn extract_text(
        &self,
        image: &ImageAsset,
        _options: &OcrOptions,
    ) -> Result<OcrResult, ProviderFailure> {
        // Transcription wants determinism; fixed low temperature and a wide
        // token budget regardless of caption settings.
        let text = self
            .complete(image, OCR_PROMPT, &self.default_model, 4096, 0.0)
            .await?;
        Ok(ocr_result_from_text(text))
    }

    async fn generate_caption(
        &self,
        image: &ImageAsset,
        options: &CaptionOptions,
    ) -> Result<CaptionResult, ProviderFailure> {
        let prompt = if options.detailed {
            CAPTION_PROMPT_DETAILED
        } else {
            CAPTION_PROMPT_BRIEF
        };
        let model = options.model.as_deref().unwrap_or(&self.default_model);
        let caption = self
            .complete(image, prompt, model, options.max_tokens, options.temperature)
            .await?;
        let caption = caption.trim().to_string();
        if caption.is_empty() {
            return Err(Self::failure("model returned an empty caption"));
        }
        Ok(CaptionResult {
            caption,
            confidence: VLM_CONFIDENCE,
            model: Some(model.to_string()),
            alternatives: Vec::new(),
            tags: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ocr_text_splits_into_lines() {
        let result = ocr_result_from_text("Line one\nLine two\n\n".to_string());
        assert_eq!(result.text, "Line one\nLine two");
        assert_eq!(result.lines.len(), 2);
        assert_eq!(result.lines[1].text, "Line two");
        assert_eq!(result.blocks.len(), 1);
    }

    #[test]
    fn empty_ocr_text_has_zero_confidence() {
        let result = ocr_result_from_text("   \n".to_string());
        assert!(result.text.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert!(result.blocks.is_empty());
    }

    #[test]
    fn chat_response_parses() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": "a red bicycle"}}]
        }"#;
        let resp: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.choices[0].message.content, "a red bicycle");
    }

    #[test]
    fn image_part_serializes_with_type_tag() {
        let part = Part::ImageUrl {
            image_url: ImageUrl {
                url: "data:image/png;base64,AA==".into(),
            },
        };
        let json = serde_json::to_string(&part).unwrap();
        assert!(json.contains("\"type\":\"image_url\""));
    }
}
