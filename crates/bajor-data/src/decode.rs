//! Image decoding keyed by the response's declared content type.
//!
//! Dispatch is a closed two-way choice: PNG payloads go through the `image`
//! crate's whole-buffer decoder, JPEG payloads through `zune-jpeg`. Anything
//! else is rejected rather than guessed at.

use std::io::Read;

use bajor_fetch::HttpResponse;
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use serde::Deserialize;
use thiserror::Error;
use zune_jpeg::JpegDecoder;
use zune_jpeg::zune_core::bytestream::ZCursor;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported image content type '{content_type}'")]
    UnsupportedFormat { content_type: String },
    #[error("image payload exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("reading image body: {0}")]
    Io(#[from] std::io::Error),
    #[error("PNG decode failed: {0}")]
    Png(#[from] image::ImageError),
    #[error("JPEG decode failed: {0}")]
    Jpeg(String),
    #[error("decoded {len} bytes do not fit a {width}x{height} image")]
    Layout { width: u32, height: u32, len: usize },
}

/// Supported payload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    /// Resolve a `Content-Type` header. Parameters and case are ignored.
    pub fn from_content_type(content_type: Option<&str>) -> Result<Self, DecodeError> {
        let raw = content_type.unwrap_or_default();
        let essence = raw
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Ok(Self::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Ok(Self::Jpeg),
            _ => Err(DecodeError::UnsupportedFormat {
                content_type: raw.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Largest body accepted, in bytes.
    pub max_image_bytes: u64,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Turns a fetched response into an 8-bit RGB, channel-last image.
#[derive(Debug, Clone)]
pub struct Decoder {
    max_bytes: u64,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(&DecodeConfig::default())
    }
}

impl Decoder {
    pub fn new(config: &DecodeConfig) -> Self {
        Self {
            max_bytes: config.max_image_bytes,
        }
    }

    /// Decode the response body. The format is chosen before any byte is read.
    pub fn decode(&self, response: HttpResponse) -> Result<RgbImage, DecodeError> {
        let format = ImageFormat::from_content_type(response.content_type.as_deref())?;
        let bytes = self.read_body(response.body)?;
        match format {
            ImageFormat::Png => decode_png(&bytes),
            ImageFormat::Jpeg => decode_jpeg(&bytes),
        }
    }

    fn read_body(&self, body: Box<dyn Read + Send>) -> Result<Vec<u8>, DecodeError> {
        let mut buf = Vec::new();
        body.take(self.max_bytes.saturating_add(1))
            .read_to_end(&mut buf)?;
        if buf.len() as u64 > self.max_bytes {
            return Err(DecodeError::TooLarge {
                limit: self.max_bytes,
            });
        }
        Ok(buf)
    }
}

fn decode_png(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)?;
    Ok(image.to_rgb8())
}

fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    let mut decoder = JpegDecoder::new(ZCursor::new(bytes));
    let pixels = decoder
        .decode()
        .map_err(|e| DecodeError::Jpeg(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| DecodeError::Jpeg("missing image info".into()))?;
    let width = u32::from(info.width);
    let height = u32::from(info.height);
    let len = pixels.len();
    let layout = || DecodeError::Layout { width, height, len };

    let area = (width as usize) * (height as usize);
    if area == 0 || len % area != 0 {
        return Err(layout());
    }

    // zune emits grayscale JPEGs as one channel and CMYK/alpha as four.
    let image = match len / area {
        3 => DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, pixels).ok_or_else(layout)?),
        1 => DynamicImage::ImageLuma8(
            GrayImage::from_raw(width, height, pixels).ok_or_else(layout)?,
        ),
        4 => DynamicImage::ImageRgba8(
            RgbaImage::from_raw(width, height, pixels).ok_or_else(layout)?,
        ),
        _ => return Err(layout()),
    };
    Ok(image.to_rgb8())
}
