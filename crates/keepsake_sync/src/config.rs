//! Configuration for the attachment pipeline.

use std::time::Duration;

/// Limits and behavior of attachment uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentConfig {
    /// Maximum attachments a single record may hold.
    pub max_attachments_per_record: usize,
    /// Maximum size of one file before compression, in bytes.
    pub max_file_bytes: u64,
    /// Lifetime of access URLs.
    pub url_ttl: Duration,
    /// Image compression settings.
    pub compression: CompressionConfig,
}

impl AttachmentConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-record attachment cap.
    #[must_use]
    pub fn with_max_attachments(mut self, max: usize) -> Self {
        self.max_attachments_per_record = max;
        self
    }

    /// Sets the per-file size cap.
    #[must_use]
    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    /// Sets the access URL lifetime.
    #[must_use]
    pub fn with_url_ttl(mut self, ttl: Duration) -> Self {
        self.url_ttl = ttl;
        self
    }

    /// Sets the compression settings.
    #[must_use]
    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            max_attachments_per_record: 5,
            max_file_bytes: 10 * 1024 * 1024,
            url_ttl: Duration::from_secs(15 * 60),
            compression: CompressionConfig::default(),
        }
    }
}

/// Image re-encoding applied before upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionConfig {
    /// Whether images are re-encoded at all.
    pub enabled: bool,
    /// Longest edge of the re-encoded image, in pixels.
    pub max_dimension: u32,
    /// JPEG quality, 1 to 100. Values outside are clamped when encoding.
    pub jpeg_quality: u8,
}

impl CompressionConfig {
    /// Compression switched off.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the longest edge.
    #[must_use]
    pub fn with_max_dimension(mut self, pixels: u32) -> Self {
        self.max_dimension = pixels.max(1);
        self
    }

    /// Sets the JPEG quality, clamped to 1..=100.
    #[must_use]
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_dimension: 1600,
            jpeg_quality: 80,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AttachmentConfig::default();
        assert_eq!(config.max_attachments_per_record, 5);
        assert_eq!(config.max_file_bytes, 10 * 1024 * 1024);
        assert_eq!(config.url_ttl, Duration::from_secs(900));
        assert!(config.compression.enabled);
        assert_eq!(config.compression.max_dimension, 1600);
        assert_eq!(config.compression.jpeg_quality, 80);
    }

    #[test]
    fn builder() {
        let config = AttachmentConfig::new()
            .with_max_attachments(3)
            .with_max_file_bytes(1024)
            .with_url_ttl(Duration::from_secs(60))
            .with_compression(CompressionConfig::default().with_jpeg_quality(0));

        assert_eq!(config.max_attachments_per_record, 3);
        assert_eq!(config.max_file_bytes, 1024);
        assert_eq!(config.url_ttl, Duration::from_secs(60));
        assert_eq!(config.compression.jpeg_quality, 1);
        assert!(!CompressionConfig::disabled().enabled);
    }
}
