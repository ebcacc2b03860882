use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Where the user got the picture from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    #[default]
    Upload,
    Camera,
}

impl ImageSource {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upload" => Some(Self::Upload),
            "camera" => Some(Self::Camera),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("unsupported image format, expected jpg or png")]
    Unsupported,
    #[error("image decode failed: {0}")]
    Decode(#[source] image::ImageError),
    #[error("image encode failed: {0}")]
    Encode(#[source] image::ImageError),
}

/// A meal photo ready to be sent out: opaque RGB, re-encoded as JPEG.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub source: ImageSource,
    pub width: u32,
    pub height: u32,
    pub jpeg: Bytes,
    pub base64: String,
}

impl ImageAsset {
    pub fn data_uri(&self) -> String {
        format!("data:image/jpeg;base64,{}", self.base64)
    }
}

/// Decode an uploaded or captured picture and normalize it for transport.
///
/// Alpha is dropped, not composited against a background. JPEG has no alpha
/// channel so every image leaves here as RGB8.
pub fn normalize(raw: &[u8], source: ImageSource) -> Result<ImageAsset, ImageError> {
    let format = image::guess_format(raw).map_err(|_| ImageError::Unsupported)?;
    if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
        return Err(ImageError::Unsupported);
    }

    let decoded = image::load_from_memory_with_format(raw, format).map_err(ImageError::Decode)?;
    let had_alpha = decoded.color().has_alpha();
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    let rgb = DynamicImage::ImageRgb8(rgb);

    let mut buf = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .map_err(ImageError::Encode)?;

    debug!(
        ?source,
        ?format,
        had_alpha,
        width,
        height,
        jpeg_bytes = buf.len(),
        "image normalized"
    );

    Ok(ImageAsset {
        source,
        width,
        height,
        base64: STANDARD.encode(&buf),
        jpeg: Bytes::from(buf),
    })
}

pub fn format_from_mime(ct: &str) -> Option<ImageFormat> {
    match ct {
        "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
        "image/png" => Some(ImageFormat::Png),
        _ => None,
    }
}
