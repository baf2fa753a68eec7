//! Error types for the edgequake-pdf2pptx library.
//!
//! Failures fall into two groups with very different blast radii:
//!
//! * [`Pdf2PptxError`] — **Fatal**: the job cannot produce a presentation at
//!   all (unreadable input, unsupported file kind, cancelled job). Returned
//!   as `Err(Pdf2PptxError)` from the top-level `convert*` functions.
//!
//! * Non-fatal, per-page or per-element errors, absorbed by the fallback
//!   chain and recorded in [`crate::output::PageResult`]:
//!   - [`ExtractError`] — the Direct Extractor declined a page.
//!   - [`VisionError`] — the Vision tier is unavailable for the whole job,
//!     or one page's request failed, timed out, or came back unusable.
//!   - [`BuildError`] — one layout element could not become a shape and was
//!     dropped from its slide.
//!
//! Only document-level load failures surface as job failure. Everything else
//! degrades to the next strategy (ultimately the image fallback, which cannot
//! fail) or drops a single element.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2pptx library.
#[derive(Debug, Error)]
pub enum Pdf2PptxError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file is neither a PDF nor a PNG/JPEG image.
    #[error("Unsupported file '{name}': {detail}\nAccepted formats: pdf, png, jpg, jpeg.")]
    UnsupportedFormat { name: String, detail: String },

    /// Inputs mixed a PDF with other files, or named more than one PDF.
    #[error("Inputs must be exactly one PDF or one or more images, got {pdfs} PDF(s) and {images} image(s)")]
    MixedInputKinds { pdfs: usize, images: usize },

    /// An input exceeded the configured size limit.
    #[error("Input '{name}' is {size} bytes, above the {limit} byte limit")]
    InputTooLarge { name: String, size: u64, limit: u64 },

    /// No input files were supplied.
    #[error("No input files were given")]
    EmptyInput,

    // ── Document errors ───────────────────────────────────────────────────
    /// The document cannot be parsed at all; the job cannot proceed.
    #[error("Document '{source_name}' is unreadable: {detail}")]
    UnreadableDocument { source_name: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{source_name}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { source_name: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{source_name}'")]
    WrongPassword { source_name: String },

    /// Page selection matched no page of the document.
    #[error("Page selection matches no page (document has {total} pages)")]
    PageOutOfRange { total: usize },

    /// The rasteriser returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install pdfium for your platform, or point the converter at an existing copy:\n\
  • pass --pdfium-lib /path/to/libpdfium\n\
  • or set ConversionConfig::pdfium_lib_path in library code.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Job errors ────────────────────────────────────────────────────────
    /// The caller cancelled the job before it finished.
    #[error("Conversion cancelled after {completed}/{total} pages")]
    Cancelled { completed: usize, total: usize },

    /// The presentation package could not be assembled.
    #[error("Failed to write PPTX package: {0}")]
    PackageFailed(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output presentation file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The Direct Extractor declined a page; the chain moves on to Vision.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
pub enum ExtractError {
    /// The page has no usable structured content.
    #[error("Page {page}: not extractable: {reason}")]
    NotExtractable { page: usize, reason: String },
}

/// Failures of the Vision tier.
///
/// [`VisionError::Unavailable`] is a job-level precondition failure (checked
/// once per job). Every other variant is a per-page `VisionRequestError`
/// that sends only that page to the image fallback.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
pub enum VisionError {
    /// No vision capability is configured, or it could not be created.
    #[error("Vision analysis unavailable: {reason}")]
    Unavailable { reason: String },

    /// Transport or API error after all retries.
    #[error("Page {page}: vision request failed after {retries} retries: {detail}")]
    Request {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// A request exceeded the configured timeout on every attempt.
    #[error("Page {page}: vision request timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// The response could not be parsed into a layout.
    #[error("Page {page}: malformed vision response: {detail}")]
    Malformed { page: usize, detail: String },

    /// The response parsed but described no elements.
    #[error("Page {page}: vision response contained no elements")]
    EmptyLayout { page: usize },
}

impl VisionError {
    /// `true` for the job-level precondition failure.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, VisionError::Unavailable { .. })
    }

    /// `true` for failures worth another attempt (transport and timeout).
    pub fn is_retryable(&self) -> bool {
        matches!(self, VisionError::Request { .. } | VisionError::Timeout { .. })
    }
}

/// A layout element that could not be turned into a slide shape.
///
/// The element is dropped; the rest of the slide is unaffected.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
pub enum BuildError {
    /// Zero, negative, or non-finite width/height.
    #[error("Page {page}: dropped element z={z}: malformed geometry {width}x{height}")]
    MalformedGeometry {
        page: usize,
        z: u32,
        width: f64,
        height: f64,
    },

    /// An image element could not be encoded as PNG, or its crop was empty.
    #[error("Page {page}: dropped image z={z}: {detail}")]
    ImageEncoding { page: usize, z: u32, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_document_display() {
        let e = Pdf2PptxError::UnreadableDocument {
            source_name: "deck.pdf".into(),
            detail: "invalid xref".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("deck.pdf"), "got: {msg}");
        assert!(msg.contains("invalid xref"), "got: {msg}");
    }

    #[test]
    fn mixed_inputs_display() {
        let e = Pdf2PptxError::MixedInputKinds { pdfs: 1, images: 2 };
        let msg = e.to_string();
        assert!(msg.contains("1 PDF"), "got: {msg}");
        assert!(msg.contains("2 image"), "got: {msg}");
    }

    #[test]
    fn cancelled_display() {
        let e = Pdf2PptxError::Cancelled {
            completed: 2,
            total: 5,
        };
        assert!(e.to_string().contains("2/5"));
    }

    #[test]
    fn vision_error_classification() {
        let unavailable = VisionError::Unavailable {
            reason: "no provider".into(),
        };
        assert!(unavailable.is_unavailable());
        assert!(!unavailable.is_retryable());

        let timeout = VisionError::Timeout { page: 2, secs: 30 };
        assert!(timeout.is_retryable());
        assert!(timeout.to_string().contains("30s"));

        let malformed = VisionError::Malformed {
            page: 1,
            detail: "no JSON object".into(),
        };
        assert!(!malformed.is_retryable());
    }

    #[test]
    fn build_error_display() {
        let e = BuildError::MalformedGeometry {
            page: 3,
            z: 7,
            width: 0.0,
            height: 12.5,
        };
        let msg = e.to_string();
        assert!(msg.contains("Page 3"), "got: {msg}");
        assert!(msg.contains("z=7"), "got: {msg}");
    }
}
