//! Image encoding for the vision request and the PPTX package.
//!
//! Vision APIs (OpenAI, Anthropic, Gemini) accept images as base64 data
//! embedded in the JSON request body. PNG is used in both directions because
//! it is lossless: rendered slide text stays crisp for the model, and
//! pictures placed on slides are not re-compressed.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::{imageops::FilterType, DynamicImage};
use std::borrow::Cow;
use std::io::Cursor;
use tracing::debug;

/// Downscale so the longest edge is at most `max_edge`, keeping aspect.
///
/// Returns the input untouched when it already fits.
pub fn fit_within(img: &DynamicImage, max_edge: u32) -> Cow<'_, DynamicImage> {
    if max_edge == 0 || img.width().max(img.height()) <= max_edge {
        return Cow::Borrowed(img);
    }
    Cow::Owned(img.resize(max_edge, max_edge, FilterType::Lanczos3))
}

/// PNG bytes for an image.
pub fn png_bytes(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode a page raster as a base64 PNG ready for the vision API.
///
/// `detail: "high"` lets GPT-4-class models tile the image at full
/// resolution; with `low`, small captions and labels are lost and their
/// positions drift.
pub fn encode_page(img: &DynamicImage, max_edge: u32) -> Result<ImageData, image::ImageError> {
    let fitted = fit_within(img, max_edge);
    let buf = png_bytes(&fitted)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} image → {} bytes base64",
        fitted.width(),
        fitted.height(),
        b64.len()
    );

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_page(&img, 1920).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(!decoded.is_empty());
    }

    #[test]
    fn fit_within_keeps_aspect() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(4000, 2000));
        let fitted = fit_within(&img, 1920);
        assert_eq!((fitted.width(), fitted.height()), (1920, 960));

        let small = DynamicImage::ImageRgba8(RgbaImage::new(100, 50));
        assert!(matches!(fit_within(&small, 1920), Cow::Borrowed(_)));
    }
}
