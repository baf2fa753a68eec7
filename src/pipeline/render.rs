//! PDF rasterisation: render selected pages to `DynamicImage` via pdfium.
//!
//! Errors carry a placeholder source name; the loader fills in the real one.
//!
//! ## Why a trait?
//!
//! Every page needs a raster (vision input, image fallback, background
//! colour sampling), but pdfium is a native library that may be missing on a
//! build host. [`PageRasterizer`] is the seam: [`PdfiumRasterizer`] is the
//! production implementation, and tests substitute a pure-Rust stand-in.
//!
//! ## Why spawn_blocking?
//!
//! pdfium uses thread-local state internally and is CPU-bound. The loader
//! calls [`PageRasterizer::rasterize`] inside `tokio::task::spawn_blocking`
//! so Tokio worker threads never stall on rendering.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Page sizes vary wildly: an A0 poster at 200 DPI would produce a
//! 6,600 × 9,400 px image. `max_pixels` caps the longest edge regardless of
//! physical size, keeping memory bounded.

use crate::error::Pdf2PptxError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};

/// Raster resolution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterTarget {
    pub dpi: u32,
    pub max_pixels: u32,
}

impl RasterTarget {
    /// Pixel size for a page of `width_pt × height_pt`, honouring both caps.
    pub fn pixel_size(&self, width_pt: f64, height_pt: f64) -> (u32, u32) {
        let scale = self.dpi as f64 / 72.0;
        let mut w = (width_pt * scale).max(1.0);
        let mut h = (height_pt * scale).max(1.0);
        let longest = w.max(h);
        if longest > self.max_pixels as f64 {
            let shrink = self.max_pixels as f64 / longest;
            w *= shrink;
            h *= shrink;
        }
        (w.round().max(1.0) as u32, h.round().max(1.0) as u32)
    }
}

/// Turns PDF pages into rasters. Blocking; call from `spawn_blocking`.
pub trait PageRasterizer: Send + Sync {
    /// Number of pages, for documents the structural parser cannot open.
    fn page_count(&self, bytes: &[u8], password: Option<&str>) -> Result<usize, Pdf2PptxError>;

    /// Render the 0-based `indices` of the PDF in `bytes`, in the given order.
    fn rasterize(
        &self,
        bytes: &[u8],
        password: Option<&str>,
        indices: &[usize],
        target: RasterTarget,
    ) -> Result<Vec<DynamicImage>, Pdf2PptxError>;
}

/// pdfium-backed rasteriser.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    /// Explicit library path; `None` binds the system library.
    pub lib_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(lib_path: Option<PathBuf>) -> Self {
        Self { lib_path }
    }

    fn bind(&self) -> Result<Pdfium, Pdf2PptxError> {
        let bindings = match &self.lib_path {
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_system_library(),
        };
        bindings
            .map(Pdfium::new)
            .map_err(|e| Pdf2PptxError::PdfiumBindingFailed(e.to_string()))
    }
}

fn open_error(e: PdfiumError, password: Option<&str>) -> Pdf2PptxError {
    let err_str = format!("{:?}", e);
    if err_str.contains("Password") || err_str.contains("password") {
        if password.is_some() {
            Pdf2PptxError::WrongPassword {
                source_name: "pdf".into(),
            }
        } else {
            Pdf2PptxError::PasswordRequired {
                source_name: "pdf".into(),
            }
        }
    } else {
        Pdf2PptxError::UnreadableDocument {
            source_name: "pdf".into(),
            detail: err_str,
        }
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn page_count(&self, bytes: &[u8], password: Option<&str>) -> Result<usize, Pdf2PptxError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, password)
            .map_err(|e| open_error(e, password))?;
        Ok(document.pages().len() as usize)
    }

    fn rasterize(
        &self,
        bytes: &[u8],
        password: Option<&str>,
        indices: &[usize],
        target: RasterTarget,
    ) -> Result<Vec<DynamicImage>, Pdf2PptxError> {
        let pdfium = self.bind()?;

        let document = pdfium
            .load_pdf_from_byte_slice(bytes, password)
            .map_err(|e| open_error(e, password))?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!("pdfium opened PDF: {} pages", total_pages);

        let mut results = Vec::with_capacity(indices.len());
        for &idx in indices {
            if idx >= total_pages {
                return Err(Pdf2PptxError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("page out of range (total={})", total_pages),
                });
            }

            let page = pages
                .get(idx as u16)
                .map_err(|e| Pdf2PptxError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                })?;

            let (w, h) = target.pixel_size(page.width().value as f64, page.height().value as f64);
            let render_config = PdfRenderConfig::new()
                .set_target_width(w as i32)
                .set_maximum_height(h as i32);

            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                Pdf2PptxError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                }
            })?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            results.push(image);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_size_follows_dpi() {
        let t = RasterTarget {
            dpi: 144,
            max_pixels: 10_000,
        };
        assert_eq!(t.pixel_size(720.0, 540.0), (1440, 1080));
    }

    #[test]
    fn pixel_size_caps_longest_edge() {
        let t = RasterTarget {
            dpi: 200,
            max_pixels: 1000,
        };
        let (w, h) = t.pixel_size(720.0, 360.0);
        assert_eq!(w, 1000);
        assert_eq!(h, 500);
    }

    #[test]
    fn pixel_size_never_zero() {
        let t = RasterTarget {
            dpi: 72,
            max_pixels: 100,
        };
        assert_eq!(t.pixel_size(0.0, 0.0), (1, 1));
    }
}
