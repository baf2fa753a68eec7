//! Configuration types for PDF/image-to-PPTX conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across worker tasks and to diff two runs.
//!
//! # Design choice: explicit vision configuration
//! The vision capability is carried in [`VisionConfig`] and handed to the
//! orchestrator with the rest of the job's configuration. The library never
//! consults environment variables; the CLI (or any other host) decides how a
//! provider is discovered and passes the result in. Two jobs with different
//! providers can therefore run side by side in one process.

use crate::error::Pdf2PptxError;
use crate::pipeline::vision::VisionService;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// 1 inch in EMU (English Metric Units, the OOXML length unit).
pub const EMU_PER_INCH: i64 = 914_400;

/// Configuration for one conversion job.
///
/// # Example
/// ```rust
/// use edgequake_pdf2pptx::{ConversionConfig, SlideSize};
///
/// let config = ConversionConfig::builder()
///     .dpi(150)
///     .concurrency(2)
///     .slide_size(SlideSize::FitFirstPage)
///     .build()
///     .unwrap();
/// assert!(!config.vision.is_configured());
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Rasterisation DPI for PDF pages. Range: 72–400. Default: 200.
    ///
    /// Rasters feed the vision model and the image fallback. 200 DPI keeps
    /// small print legible on a full-bleed fallback slide.
    pub dpi: u32,

    /// Maximum rendered raster dimension in pixels. Default: 2000.
    ///
    /// Caps memory regardless of physical page size; the other dimension
    /// scales proportionally.
    pub max_rendered_pixels: u32,

    /// Maximum number of pages resolved concurrently. Default: 4.
    ///
    /// Only the vision tier waits on the network, so this mainly bounds the
    /// number of in-flight vision requests. Lower it if the provider
    /// rate-limits; 1 gives strictly sequential processing.
    pub concurrency: usize,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Upper bound on each input file's size in bytes. Default: 50 MiB.
    pub max_input_bytes: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Explicit pdfium shared library. `None` binds the system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Direct-extraction tuning.
    pub direct: DirectConfig,

    /// Vision capability and request tuning.
    pub vision: VisionConfig,

    /// Target slide dimensions. Default: 16:9 widescreen.
    pub slide_size: SlideSize,

    /// Prefix of the suggested output filename. Default: "NoteSlide".
    pub output_prefix: String,

    /// Receives progress events while the job runs.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_rendered_pixels: 2000,
            concurrency: 4,
            pages: PageSelection::default(),
            password: None,
            max_input_bytes: 50 * 1024 * 1024,
            download_timeout_secs: 120,
            pdfium_lib_path: None,
            direct: DirectConfig::default(),
            vision: VisionConfig::default(),
            slide_size: SlideSize::default(),
            output_prefix: "NoteSlide".to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("pages", &self.pages)
            .field("max_input_bytes", &self.max_input_bytes)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field("direct", &self.direct)
            .field("vision", &self.vision)
            .field("slide_size", &self.slide_size)
            .field("output_prefix", &self.output_prefix)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn max_input_bytes(mut self, bytes: u64) -> Self {
        self.config.max_input_bytes = bytes;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn direct(mut self, direct: DirectConfig) -> Self {
        self.config.direct = direct;
        self
    }

    /// Disable the direct tier; every page starts at vision.
    pub fn skip_direct_extraction(mut self, skip: bool) -> Self {
        self.config.direct.enabled = !skip;
        self
    }

    pub fn vision(mut self, vision: VisionConfig) -> Self {
        self.config.vision = vision;
        self
    }

    /// Use a caller-built vision service (highest precedence).
    pub fn vision_service(mut self, service: Arc<dyn VisionService>) -> Self {
        self.config.vision.service = Some(service);
        self
    }

    /// Use a pre-built LLM provider for vision analysis.
    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.vision.provider = Some(provider);
        self
    }

    /// Name a provider (e.g. "openai", "gemini") to create at job start.
    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.vision.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.vision.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.vision.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.vision.max_tokens = n.max(256);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.vision.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.vision.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.vision.timeout_secs = secs.max(1);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.vision.system_prompt = Some(prompt.into());
        self
    }

    pub fn slide_size(mut self, size: SlideSize) -> Self {
        self.config.slide_size = size;
        self
    }

    pub fn output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.output_prefix = prefix.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Pdf2PptxError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(Pdf2PptxError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(Pdf2PptxError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_input_bytes == 0 {
            return Err(Pdf2PptxError::InvalidConfig(
                "max_input_bytes must be > 0".into(),
            ));
        }
        if let SlideSize::Custom {
            width_emu,
            height_emu,
        } = c.slide_size
        {
            // PowerPoint accepts 1 in to 56 in on either axis.
            let range = EMU_PER_INCH..=56 * EMU_PER_INCH;
            if !range.contains(&width_emu) || !range.contains(&height_emu) {
                return Err(Pdf2PptxError::InvalidConfig(format!(
                    "Custom slide size {}x{} EMU is outside 1–56 inches",
                    width_emu, height_emu
                )));
            }
        }
        if c.output_prefix.trim().is_empty() {
            return Err(Pdf2PptxError::InvalidConfig(
                "output_prefix must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Strategy tuning ──────────────────────────────────────────────────────

/// Tuning for the direct (structured-content) extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectConfig {
    /// Try direct extraction at all. Default: true.
    pub enabled: bool,
    /// Minimum visible text characters for a page to count as extractable.
    /// Default: 1; a page with no text layer is treated as scanned.
    pub min_text_chars: usize,
    /// Embedded images kept per page. Default: 5.
    pub max_images_per_page: usize,
    /// Longest edge of an extracted embedded image. Default: 1200.
    pub max_image_dimension: u32,
    /// Maximum Form XObject nesting. Default: 8.
    pub max_form_depth: usize,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_text_chars: 1,
            max_images_per_page: 5,
            max_image_dimension: 1200,
            max_form_depth: 8,
        }
    }
}

/// Vision capability and request tuning.
///
/// The tier counts as configured when any capability source is present:
/// an explicit [`VisionService`], a pre-built [`LLMProvider`], or a provider
/// name to instantiate. Absence means every page skips vision.
#[derive(Clone)]
pub struct VisionConfig {
    /// Caller-built service. Takes precedence over everything else.
    pub service: Option<Arc<dyn VisionService>>,
    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,
    /// Provider name for `ProviderFactory::create_llm_provider`.
    pub provider_name: Option<String>,
    /// Model identifier. If None, uses [`DEFAULT_VISION_MODEL`].
    pub model: Option<String>,
    /// Sampling temperature. Default: 0.1; layout transcription wants
    /// faithfulness, not creativity.
    pub temperature: f32,
    /// Maximum tokens per response. Default: 8192; dense slides produce long
    /// element lists.
    pub max_tokens: usize,
    /// Retries on transport errors and timeouts. Default: 2.
    pub max_retries: u32,
    /// Initial retry delay (doubles per attempt). Default: 500 ms.
    pub retry_backoff_ms: u64,
    /// Per-request timeout in seconds. Default: 60.
    pub timeout_secs: u64,
    /// Longest edge of the image sent to the model. Default: 1920.
    pub max_image_dimension: u32,
    /// Custom system prompt. If None, uses the built-in layout prompt.
    pub system_prompt: Option<String>,
}

/// Model used when a provider name is given without a model.
pub const DEFAULT_VISION_MODEL: &str = "gemini-2.0-flash";

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            service: None,
            provider: None,
            provider_name: None,
            model: None,
            temperature: 0.1,
            max_tokens: 8192,
            max_retries: 2,
            retry_backoff_ms: 500,
            timeout_secs: 60,
            max_image_dimension: 1920,
            system_prompt: None,
        }
    }
}

impl VisionConfig {
    /// Whether any capability source is present.
    pub fn is_configured(&self) -> bool {
        self.service.is_some() || self.provider.is_some() || self.provider_name.is_some()
    }
}

impl fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionConfig")
            .field("service", &self.service.as_ref().map(|_| "<dyn VisionService>"))
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Target slide dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SlideSize {
    /// 13.333 × 7.5 in (16:9). (default)
    #[default]
    Widescreen,
    /// 10 × 7.5 in (4:3).
    Standard,
    /// 13.333 in wide, height following the first page's aspect ratio.
    FitFirstPage,
    /// Explicit dimensions in EMU.
    Custom { width_emu: i64, height_emu: i64 },
}

impl SlideSize {
    /// Resolve to `(width_emu, height_emu)` given the first page's size in
    /// any unit.
    pub fn resolve(&self, first_page: Option<(f64, f64)>) -> (i64, i64) {
        const WIDE_W: i64 = 12_192_000;
        const WIDE_H: i64 = 6_858_000;
        match *self {
            SlideSize::Widescreen => (WIDE_W, WIDE_H),
            SlideSize::Standard => (9_144_000, WIDE_H),
            SlideSize::Custom {
                width_emu,
                height_emu,
            } => (width_emu, height_emu),
            SlideSize::FitFirstPage => match first_page {
                Some((w, h)) if w > 0.0 && h > 0.0 && w.is_finite() && h.is_finite() => {
                    let height = (WIDE_W as f64 * h / w).round() as i64;
                    (WIDE_W, height.clamp(EMU_PER_INCH, 56 * EMU_PER_INCH))
                }
                _ => (WIDE_W, WIDE_H),
            },
        }
    }
}

/// Specifies which pages of the document to convert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// Convert all pages (default).
    #[default]
    All,
    /// Convert a single page (1-indexed).
    Single(usize),
    /// Convert a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Convert specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}
