//! Image encoding: rendered bitmaps → PNG bytes, PNG bytes → request payloads.
//!
//! PNG is lossless, so text edges survive exactly as pdfium drew them.
//! JPEG artefacts on rendered text confuse vision models at low resolution.

use crate::pipeline::source::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} page → {} bytes PNG", img.width(), img.height(), buf.len());
    Ok(buf)
}

/// Base64 data URL (`data:<mime>;base64,…`) for OpenAI-style `image_url` parts.
pub fn to_data_url(page: &PageImage) -> String {
    format!("data:{};base64,{}", page.mime_type, STANDARD.encode(&page.data))
}

/// Wrap a page as an `edgequake_llm` image attachment.
///
/// `detail: "high"` lets GPT-4-class models tile the full page; the low-detail
/// single tile loses fine print and small tables.
pub fn to_image_data(page: &PageImage) -> ImageData {
    ImageData::new(STANDARD.encode(&page.data), page.mime_type.as_str()).with_detail("high")
}
