//! Image codec - transport decoding, canvas normalization and PNG encoding

pub mod base64;

use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};
use std::io::Cursor;

use crate::error::{AppError, Result};

/// Model canvas width
pub const CANVAS_WIDTH: u32 = 512;

/// Model canvas height
pub const CANVAS_HEIGHT: u32 = 768;

/// Resampling filter used for every resize
const RESAMPLE_FILTER: FilterType = FilterType::CatmullRom;

/// An image as it arrives over a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePayload {
    /// Base64 text, optionally a data URL
    Base64(String),
    /// Raw file bytes, e.g. from a multipart upload
    Binary(Vec<u8>),
}

impl ImagePayload {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Base64(text) => text.trim().is_empty(),
            Self::Binary(bytes) => bytes.is_empty(),
        }
    }

    pub fn encoding(&self) -> &'static str {
        match self {
            Self::Base64(_) => "base64",
            Self::Binary(_) => "binary",
        }
    }
}

/// Decode a payload into an RGB bitmap.
///
/// Any color mode is flattened to 8-bit RGB: alpha is dropped and luma is
/// replicated across channels.
pub fn decode(payload: &ImagePayload) -> Result<RgbImage> {
    match payload {
        ImagePayload::Base64(text) => decode_bytes(&base64::decode(text)?),
        ImagePayload::Binary(bytes) => decode_bytes(bytes),
    }
}

/// Decode raw image file bytes into an RGB bitmap
pub fn decode_bytes(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| AppError::Decode(format!("unreadable image: {}", e)))?;
    Ok(image.to_rgb8())
}

/// Resize to the fixed model canvas (512x768)
pub fn normalize(bitmap: &RgbImage) -> RgbImage {
    if bitmap.dimensions() == (CANVAS_WIDTH, CANVAS_HEIGHT) {
        return bitmap.clone();
    }
    imageops::resize(bitmap, CANVAS_WIDTH, CANVAS_HEIGHT, RESAMPLE_FILTER)
}

/// Serialize to PNG bytes
pub fn encode_png(bitmap: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    bitmap
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| AppError::Internal(format!("PNG encoding failed: {}", e)))?;
    Ok(bytes)
}

/// Serialize to base64-encoded PNG text
pub fn encode_base64_png(bitmap: &RgbImage) -> Result<String> {
    Ok(base64::encode(&encode_png(bitmap)?))
}
