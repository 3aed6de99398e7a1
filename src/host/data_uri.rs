//! `data:` URI decoding for captured frames

use base64::Engine as Base64Engine;

use crate::{Error, Result};

/// An encoded image (JPEG, PNG, ...) together with its MIME type
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl EncodedImage {
    /// Parse a `data:<mime>;base64,<payload>` URI.
    ///
    /// Only base64 payloads are accepted; an empty payload is rejected.
    pub fn from_data_uri(uri: &str) -> Result<Self> {
        let invalid = || Error::DecodeFailed("Invalid data URL".into());

        let rest = uri.strip_prefix("data:").ok_or_else(invalid)?;
        let (mime, payload) = rest.split_once(";base64,").ok_or_else(invalid)?;
        if mime.is_empty() || mime.contains(';') || payload.is_empty() {
            return Err(invalid());
        }

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| Error::DecodeFailed(format!("base64 decode failed: {}", e)))?;

        Ok(Self {
            mime: mime.to_string(),
            bytes,
        })
    }
}
