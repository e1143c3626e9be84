//! Base64 transport encoding for image payloads

use base64::{engine::general_purpose::STANDARD, Engine};
use crate::error::{AppError, Result};

/// Encode binary data to base64 string
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Strip an optional `data:<mime>;base64,` prefix
fn payload(encoded: &str) -> &str {
    match encoded.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    }
}

/// Decode base64 string to binary data.
///
/// Accepts plain base64 as well as data URLs
/// (e.g. `data:image/png;base64,...`).
pub fn decode(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(payload(encoded).trim())
        .map_err(|e| AppError::Decode(format!("invalid base64 data: {}", e)))
}
