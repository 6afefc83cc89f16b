//! Best-effort image compression.
//!
//! Images are decoded, scaled down so the longest edge fits
//! `max_dimension`, and re-encoded as JPEG. Anything that goes wrong
//! leaves the original bytes in place.

use crate::config::CompressionConfig;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use tracing::{debug, warn};

/// The bytes to upload and their MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compressed {
    /// Bytes to upload.
    pub bytes: Bytes,
    /// MIME type of `bytes`.
    pub mime_type: String,
    /// Whether `bytes` differ from the input.
    pub reencoded: bool,
}

impl Compressed {
    fn original(bytes: Bytes, mime_type: &str) -> Self {
        Self {
            bytes,
            mime_type: mime_type.to_string(),
            reencoded: false,
        }
    }
}

/// Re-encodes images according to a [`CompressionConfig`].
#[derive(Debug, Clone)]
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    /// Creates a compressor.
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Compresses `bytes` if they are an image. Never fails.
    pub fn compress(&self, name: &str, bytes: Bytes, mime_type: &str) -> Compressed {
        if !self.config.enabled || !mime_type.starts_with("image/") {
            return Compressed::original(bytes, mime_type);
        }

        let encoded = match self.reencode(&bytes) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(file = name, error = %e, "image compression failed, uploading original");
                return Compressed::original(bytes, mime_type);
            }
        };

        if encoded.len() >= bytes.len() {
            debug!(
                file = name,
                original = bytes.len(),
                encoded = encoded.len(),
                "re-encoded image is not smaller, keeping original"
            );
            return Compressed::original(bytes, mime_type);
        }

        debug!(
            file = name,
            original = bytes.len(),
            encoded = encoded.len(),
            "image compressed"
        );
        Compressed {
            bytes: Bytes::from(encoded),
            mime_type: "image/jpeg".to_string(),
            reencoded: true,
        }
    }

    fn reencode(&self, bytes: &[u8]) -> image::ImageResult<Vec<u8>> {
        let mut image = image::load_from_memory(bytes)?;
        let max = self.config.max_dimension.max(1);
        if image.width() > max || image.height() > max {
            image = image.resize(max, max, FilterType::Triangle);
        }

        let mut encoded = Vec::new();
        let quality = self.config.jpeg_quality.clamp(1, 100);
        let mut encoder = JpegEncoder::new_with_quality(&mut encoded, quality);
        encoder.encode_image(&image.to_rgb8())?;
        Ok(encoded)
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(CompressionConfig::default())
    }
}
