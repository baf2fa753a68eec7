//! Loaded documents: ordered pages with a raster and optional PDF structure.
//!
//! A [`Document`] is read-only for the lifetime of a job. Rasters and the
//! parsed PDF are shared through `Arc`, so handing a [`Page`] to a worker
//! task is a pointer copy rather than a pixel copy.

use image::DynamicImage;
use lopdf::ObjectId;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// What kind of upload a document was built from.
///
/// The two kinds never mix: input validation rejects a PDF combined with
/// images before the loader runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Pdf,
    ImageSet,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Pdf => f.write_str("pdf"),
            SourceKind::ImageSet => f.write_str("image-set"),
        }
    }
}

/// Handle onto one page of a parsed PDF.
///
/// Only PDF pages carry this; image pages have no structured content.
#[derive(Clone)]
pub struct PageContent {
    pub pdf: Arc<lopdf::Document>,
    pub page_id: ObjectId,
    /// MediaBox as `[x0, y0, x1, y1]` in PDF points.
    pub media_box: [f64; 4],
}

impl PageContent {
    pub fn width(&self) -> f64 {
        (self.media_box[2] - self.media_box[0]).abs()
    }

    pub fn height(&self) -> f64 {
        (self.media_box[3] - self.media_box[1]).abs()
    }
}

impl fmt::Debug for PageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageContent")
            .field("page_id", &self.page_id)
            .field("media_box", &self.media_box)
            .finish()
    }
}

/// One page: its position, its raster, and (for PDFs) its structure.
#[derive(Debug, Clone)]
pub struct Page {
    /// 0-based, order-preserving.
    pub index: usize,
    pub raster: Arc<DynamicImage>,
    pub content: Option<PageContent>,
}

impl Page {
    /// 1-based page number for messages.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn raster_size(&self) -> (u32, u32) {
        (self.raster.width(), self.raster.height())
    }
}

/// Basic PDF information-dictionary entries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub producer: Option<String>,
    pub pdf_version: Option<String>,
}

/// An ordered, validated document ready for the pipeline.
#[derive(Debug, Clone)]
pub struct Document {
    pub kind: SourceKind,
    /// Human-readable source name, used in messages and the output filename.
    pub source_name: String,
    pub pages: Vec<Page>,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// File stem of the source name, for output naming.
    pub fn stem(&self) -> &str {
        let name = self
            .source_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.source_name);
        match name.rfind('.') {
            Some(pos) if pos > 0 => &name[..pos],
            _ => name,
        }
    }
}

/// Size of one page as reported by [`crate::inspect`].
#[derive(Debug, Clone, Serialize)]
pub struct PageInfo {
    pub page_num: usize,
    /// Points for PDFs, pixels for images.
    pub width: f64,
    pub height: f64,
}

/// Cheap description of an input, produced without rasterising.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub kind: SourceKind,
    pub source_name: String,
    pub page_count: usize,
    pub pages: Vec<PageInfo>,
    pub metadata: DocumentMetadata,
}
