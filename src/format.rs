//! Source format detection by signature inspection.
//!
//! Magic-byte prefixes:
//! - JPEG: `FF D8 FF`
//! - PNG: `89 50 4E 47 0D 0A 1A 0A`
//! - GIF: `GIF`
//! - WebP: `RIFF` at 0..4 and `WEBP` at 8..12
//!
//! SVG has no signature; it is recognized by an `<svg` tag in the first 512
//! bytes and wins over any magic-byte match.

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const SVG_SCAN_LIMIT: usize = 512;

/// Detected source format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Jpeg,
    Png,
    Gif,
    WebP,
    Svg,
    Unknown,
}

impl SourceFormat {
    /// Classifies raw bytes.
    pub fn detect(data: &[u8]) -> Self {
        if is_svg(data) {
            return SourceFormat::Svg;
        }
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            SourceFormat::Jpeg
        } else if data.starts_with(&PNG_SIGNATURE) {
            SourceFormat::Png
        } else if data.starts_with(b"GIF") {
            SourceFormat::Gif
        } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            SourceFormat::WebP
        } else {
            SourceFormat::Unknown
        }
    }

    /// Content-Type header value for delivery responses.
    pub fn content_type(&self) -> &'static str {
        match self {
            SourceFormat::Jpeg => "image/jpeg",
            SourceFormat::Png => "image/png",
            SourceFormat::Gif => "image/gif",
            SourceFormat::WebP => "image/webp",
            SourceFormat::Svg => "image/svg+xml",
            SourceFormat::Unknown => "application/octet-stream",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Jpeg => "jpeg",
            SourceFormat::Png => "png",
            SourceFormat::Gif => "gif",
            SourceFormat::WebP => "webp",
            SourceFormat::Svg => "svg",
            SourceFormat::Unknown => "unknown",
        }
    }

    /// GIF and SVG are delivered byte-identical to the stored original.
    pub fn is_passthrough(&self) -> bool {
        matches!(self, SourceFormat::Gif | SourceFormat::Svg)
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Looks for an SVG root tag near the start of the buffer. An XML
/// declaration may precede it.
pub fn is_svg(data: &[u8]) -> bool {
    let head = &data[..data.len().min(SVG_SCAN_LIMIT)];
    head.windows(4).any(|w| w == b"<svg")
}
