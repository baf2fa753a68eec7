//! Conversion results: the PPTX bytes plus per-page and per-job statistics.

use crate::document::DocumentMetadata;
use crate::error::BuildError;
use crate::layout::ExtractionMethod;
use serde::Serialize;

/// Why a page left one strategy for the next.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackRecord {
    /// The strategy that did not produce the page's layout.
    pub from: ExtractionMethod,
    pub reason: String,
}

/// Outcome of one page.
#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    /// 1-indexed page number in the source document.
    pub page_num: usize,
    /// The strategy whose layout became the slide.
    pub method: ExtractionMethod,
    /// Elements placed on the slide.
    pub element_count: usize,
    /// Elements dropped by the slide builder.
    pub dropped: Vec<BuildError>,
    /// Strategies tried before `method`, in chain order.
    pub fallbacks: Vec<FallbackRecord>,
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// Vision retries spent on this page.
    pub retries: u32,
    pub duration_ms: u64,
}

/// Aggregate statistics for one job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionStats {
    pub total_pages: usize,
    pub direct_pages: usize,
    pub vision_pages: usize,
    pub fallback_pages: usize,
    pub dropped_elements: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub load_duration_ms: u64,
    pub extract_duration_ms: u64,
    pub total_duration_ms: u64,
}

impl ConversionStats {
    /// Count pages per method and sum page-level figures.
    pub fn from_pages(pages: &[PageResult]) -> Self {
        let count = |m: ExtractionMethod| pages.iter().filter(|p| p.method == m).count();
        Self {
            total_pages: pages.len(),
            direct_pages: count(ExtractionMethod::DirectExtraction),
            vision_pages: count(ExtractionMethod::AiVision),
            fallback_pages: count(ExtractionMethod::ImageFallback),
            dropped_elements: pages.iter().map(|p| p.dropped.len()).sum(),
            total_input_tokens: pages.iter().map(|p| p.input_tokens as u64).sum(),
            total_output_tokens: pages.iter().map(|p| p.output_tokens as u64).sum(),
            ..Self::default()
        }
    }
}

/// Everything a finished job produced.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    /// 8-character job id, also used in `file_name`.
    pub job_id: String,
    /// Suggested download name, e.g. `NoteSlide_1a2b3c4d.pptx`.
    pub file_name: String,
    /// The `.pptx` package.
    #[serde(skip)]
    pub pptx: Vec<u8>,
    /// Method used by the most pages (ties go to the earlier tier).
    pub method: ExtractionMethod,
    /// Slide size in EMU as `(width, height)`.
    pub slide_size: (i64, i64),
    /// Per-page outcomes, in page order.
    pub pages: Vec<PageResult>,
    pub metadata: DocumentMetadata,
    pub stats: ConversionStats,
}
