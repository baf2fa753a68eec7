//! # edgequake-pdf2pptx
//!
//! Convert slide-style PDFs, or sets of page images, into editable
//! PowerPoint (`.pptx`) presentations.
//!
//! ## Why this crate?
//!
//! Exporting a deck to PDF flattens it. Rasterising every page back into a
//! slide keeps the look but loses the text; OCR alone keeps the text but
//! loses the layout. This crate walks each page through three strategies
//! and keeps the first that works:
//!
//! 1. **Direct extraction**: read text runs, vector shapes and embedded
//!    images straight out of the PDF content stream. Free, exact, offline.
//! 2. **Vision analysis**: ask a vision-capable LLM to describe the page
//!    raster as positioned text, shapes and figures.
//! 3. **Image fallback**: place the page raster full-bleed. Always works.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / images
//!  │
//!  ├─ 1. Input     resolve paths or URLs, validate kinds and sizes
//!  ├─ 2. Load      lopdf structure + pdfium rasters (spawn_blocking)
//!  ├─ 3. Resolve   per page: Direct → Vision → Image (bounded concurrency)
//!  ├─ 4. Build     layouts → slides, aspect-preserving, z-ordered
//!  └─ 5. Package   OOXML parts zipped into .pptx + per-page stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2pptx::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // No vision provider configured: pages use direct extraction or
//!     // the image fallback.
//!     let config = ConversionConfig::default();
//!     let output = convert(&["deck.pdf"], &config).await?;
//!     std::fs::write(&output.file_name, &output.pptx)?;
//!     eprintln!("{} slides, mostly {}", output.pages.len(), output.method);
//!     Ok(())
//! }
//! ```
//!
//! Vision is enabled by handing the config a provider, never by ambient
//! environment variables:
//!
//! ```rust,no_run
//! use edgequake_pdf2pptx::ConversionConfig;
//!
//! let config = ConversionConfig::builder()
//!     .provider_name("gemini")
//!     .model("gemini-2.0-flash")
//!     .concurrency(4)
//!     .build()
//!     .unwrap();
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2pptx` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-pdf2pptx = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod document;
pub mod error;
pub mod job;
pub mod layout;
pub mod output;
pub mod pipeline;
pub mod pptx;
pub mod progress;
pub mod prompts;

/// Crate version, recorded in generated packages.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConversionConfig, ConversionConfigBuilder, DirectConfig, PageSelection, SlideSize, VisionConfig,
};
pub use convert::{
    convert, convert_document, convert_from_source, convert_sync, convert_to_file, convert_with,
    dominant_method, inspect,
};
pub use document::{Document, DocumentInfo, DocumentMetadata, Page, SourceKind};
pub use error::{BuildError, ExtractError, Pdf2PptxError, VisionError};
pub use job::{CancelHandle, ConversionJob, JobStatus, JobStore, PageStatus};
pub use layout::{ExtractionMethod, LayoutElement, PageLayout};
pub use output::{ConversionOutput, ConversionStats, FallbackRecord, PageResult};
pub use pipeline::input::{DocumentSource, NamedBytes};
pub use pipeline::render::{PageRasterizer, PdfiumRasterizer};
pub use pipeline::vision::{VisionReply, VisionRequest, VisionService};
pub use progress::{
    ChannelProgress, ConversionProgressCallback, NoopProgressCallback, ProgressCallback,
    ProgressEvent, ProgressPhase,
};
