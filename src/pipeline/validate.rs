//! Image validation: normalise raw caller input into an [`ImageAsset`].
//!
//! Input arrives either as a base64 data-URI (the form a browser or chat
//! front-end hands over) or as already-decoded bytes with a reported MIME
//! type. Validation is a pure transformation — no network, no disk — and it
//! runs before fingerprinting and cache lookup so a rejected image never
//! touches the cache or a provider.

use crate::config::EngineConfig;
use crate::error::Img2TextError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static RE_DATA_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^data:([a-zA-Z0-9]+/[a-zA-Z0-9.+-]+);base64,(.+)$").unwrap()
});

static RE_IMAGE_MIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^image/([a-zA-Z0-9.+-]+)$").unwrap());

/// Raw image input accepted by the engine.
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// `data:<mime>;base64,<payload>`
    DataUri(String),
    /// Already-decoded bytes with the MIME type the caller reported.
    Binary { bytes: Vec<u8>, mime_type: String },
}

/// A validated, normalised image: decoded bytes plus the metadata every
/// downstream stage needs. Treated as immutable after construction.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub size_bytes: u64,
    /// MIME subtype, lower-cased (`png`, `jpeg`, …).
    pub format: String,
}

impl ImageAsset {
    /// Byte-free summary echoed in results and event payloads.
    pub fn info(&self) -> ImageInfo {
        ImageInfo {
            mime_type: self.mime_type.clone(),
            size_bytes: self.size_bytes,
            format: self.format.clone(),
        }
    }

    /// Base64 of the raw bytes, the shape every REST backend wants.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// Re-assemble a data-URI (used by VLM-style backends that take image
    /// URLs in the request body).
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

/// Summary of a validated image, without the bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInfo {
    pub mime_type: String,
    pub size_bytes: u64,
    pub format: String,
}

/// Validate raw input against the configured format allow-list and size cap.
///
/// # Errors
/// * [`Img2TextError::InvalidFormat`] — malformed data-URI, non-`image/*`
///   MIME type, undecodable base64 payload, or a subtype outside the
///   allow-list.
/// * [`Img2TextError::SizeLimit`] — decoded size strictly greater than
///   `max_image_size` (an image of exactly the limit is accepted).
pub fn validate(input: &ImageInput, config: &EngineConfig) -> Result<ImageAsset, Img2TextError> {
    let (bytes, mime_type) = match input {
        ImageInput::DataUri(uri) => {
            let caps = RE_DATA_URI.captures(uri).ok_or_else(|| {
                Img2TextError::InvalidFormat(
                    "expected a base64 data-URI (data:<mime>;base64,<payload>)".into(),
                )
            })?;
            let mime = caps[1].to_string();
            let bytes = STANDARD.decode(&caps[2]).map_err(|e| {
                Img2TextError::InvalidFormat(format!("base64 payload is not decodable: {e}"))
            })?;
            (bytes, mime)
        }
        ImageInput::Binary { bytes, mime_type } => (bytes.clone(), mime_type.clone()),
    };

    let format = match RE_IMAGE_MIME.captures(&mime_type) {
        Some(caps) => caps[1].to_ascii_lowercase(),
        None => {
            return Err(Img2TextError::InvalidFormat(format!(
                "'{mime_type}' is not an image MIME type"
            )))
        }
    };

    if !config
        .supported_image_formats
        .iter()
        .any(|f| f.eq_ignore_ascii_case(&format))
    {
        return Err(Img2TextError::InvalidFormat(format!(
            "unsupported image format '{}'; supported: {}",
            format,
            config.supported_image_formats.join(", ")
        )));
    }

    let size_bytes = bytes.len() as u64;
    if size_bytes > config.max_image_size {
        return Err(Img2TextError::SizeLimit {
            size: size_bytes,
            max: config.max_image_size,
        });
    }

    Ok(ImageAsset {
        bytes,
        mime_type,
        size_bytes,
        format,
    })
}
