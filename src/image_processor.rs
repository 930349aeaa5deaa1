/*!
 * Images Emulator - Image Processing Module
 *
 * This module turns a stored original into the bytes delivered for a variant:
 * - Format sniffing of the original
 * - Passthrough of GIF and SVG originals
 * - Decoding and applying the variant's fit mode
 * - Re-encoding to the original's format
 *
 * The processor holds no state and can be shared between workers.
 */

use std::fmt;
use std::io::Cursor;

use image::{DynamicImage, ImageOutputFormat};
use log::debug;

use crate::fit::{apply_fit, Fit};
use crate::format::SourceFormat;
use crate::model::VariantOptions;

/// Fixed JPEG quality used when re-encoding
pub const JPEG_QUALITY: u8 = 85;

/// Image processing error types
#[derive(Debug)]
pub enum ImageError {
    /// The original matched no known signature
    UnknownFormat,
    /// A recognized raster format failed to decode
    Decode(image::ImageError),
    /// Encoding the transformed image failed
    Encode(image::ImageError),
    /// Re-encoding is only defined for jpeg, png and gif
    UnsupportedOutput(SourceFormat),
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::UnknownFormat => write!(f, "unsupported or unrecognized image format"),
            ImageError::Decode(e) => write!(f, "decoding image: {}", e),
            ImageError::Encode(e) => write!(f, "encoding image: {}", e),
            ImageError::UnsupportedOutput(format) => {
                write!(f, "unsupported output format: {}", format)
            }
        }
    }
}

impl std::error::Error for ImageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImageError::Decode(e) | ImageError::Encode(e) => Some(e),
            _ => None,
        }
    }
}

/// Bytes ready for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedImage {
    /// Encoded image bytes
    pub content: Vec<u8>,
    /// Format of `content`, always the original's format
    pub format: SourceFormat,
}

impl ProcessedImage {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

/// Main image processor struct
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageProcessor;

impl ImageProcessor {
    /// Creates a new ImageProcessor instance
    pub fn new() -> Self {
        ImageProcessor
    }

    /// Produces the delivered bytes for `data` under a variant's options.
    ///
    /// Parameters:
    /// - data: The stored original
    /// - options: Fit mode and target box of the variant
    pub fn transform(
        &self,
        data: &[u8],
        options: &VariantOptions,
    ) -> Result<ProcessedImage, ImageError> {
        let format = SourceFormat::detect(data);

        if format.is_passthrough() {
            debug!("Passing {} original through untouched", format);
            return Ok(ProcessedImage {
                content: data.to_vec(),
                format,
            });
        }
        if format == SourceFormat::Unknown {
            return Err(ImageError::UnknownFormat);
        }

        let img = image::load_from_memory(data).map_err(ImageError::Decode)?;
        let fit = Fit::parse(&options.fit);
        debug!(
            "Applying {} to {}x{} {} (target {}x{})",
            fit.as_str(),
            img.width(),
            img.height(),
            format,
            options.width,
            options.height
        );
        let transformed = apply_fit(&img, fit, options.width, options.height);

        Ok(ProcessedImage {
            content: encode(&transformed, format)?,
            format,
        })
    }
}

/// Encodes `img` in `format`. Only jpeg, png and gif are encodable.
pub fn encode(img: &DynamicImage, format: SourceFormat) -> Result<Vec<u8>, ImageError> {
    let mut buffer = Vec::new();
    match format {
        SourceFormat::Jpeg => {
            // JPEG carries no alpha channel
            DynamicImage::ImageRgb8(img.to_rgb8())
                .write_to(&mut Cursor::new(&mut buffer), ImageOutputFormat::Jpeg(JPEG_QUALITY))
                .map_err(ImageError::Encode)?;
        }
        SourceFormat::Png => {
            img.write_to(&mut Cursor::new(&mut buffer), ImageOutputFormat::Png)
                .map_err(ImageError::Encode)?;
        }
        SourceFormat::Gif => {
            img.write_to(&mut Cursor::new(&mut buffer), ImageOutputFormat::Gif)
                .map_err(ImageError::Encode)?;
        }
        other => return Err(ImageError::UnsupportedOutput(other)),
    }
    Ok(buffer)
}
