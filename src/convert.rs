//! Job-level orchestration and the public conversion entry points.
//!
//! One job runs as:
//!
//! ```text
//! load ─▶ resolve vision once ─▶ pages through the fallback chain
//!      ─▶ restore page order ─▶ build slides ─▶ package .pptx
//! ```
//!
//! Pages are independent, so up to `config.concurrency` of them walk the
//! chain at once; results are put back into document order before the
//! Slide Builder runs. Per-page failures never fail the job because the
//! image fallback absorbs them. Only loading errors, cancellation, and
//! packaging failures end a job with `Err`.

use crate::config::ConversionConfig;
use crate::document::{Document, DocumentInfo};
use crate::error::Pdf2PptxError;
use crate::job::{new_job_id, CancelHandle};
use crate::layout::ExtractionMethod;
use crate::output::{ConversionOutput, ConversionStats, PageResult};
use crate::pipeline::input::{self, DocumentSource};
use crate::pipeline::loader;
use crate::pipeline::render::{PageRasterizer, PdfiumRasterizer};
use crate::pipeline::strategy::{self, ChainContext, PageResolution, VisionTier};
use crate::pipeline::vision::resolve_vision;
use crate::pptx;
use crate::progress::{sweep_percent, ProgressPhase, ProgressTracker, BUILD_FLOOR, EXTRACT_FLOOR, FINALIZE_FLOOR};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convert a PDF, or a set of images, into a `.pptx` package.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `inputs` — One PDF, or one or more PNG/JPEG images, as local paths or
///   HTTP/HTTPS URLs
/// * `config` — Conversion configuration
///
/// # Errors
/// Returns `Err(Pdf2PptxError)` only for fatal errors:
/// - Missing, oversized, mixed, or unsupported inputs
/// - A document that cannot be opened (`UnreadableDocument`,
///   `PasswordRequired`, ...)
/// - Cancellation or a packaging failure
///
/// Pages that no strategy could read still become slides, via the image
/// fallback.
pub async fn convert<S: AsRef<str>>(
    inputs: &[S],
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2PptxError> {
    let source = input::resolve_inputs(inputs, config).await?;
    convert_from_source(source, config).await
}

/// Convert an already-validated in-memory source.
pub async fn convert_from_source(
    source: DocumentSource,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2PptxError> {
    convert_with(source, config, &CancelHandle::new(), default_rasterizer(config)).await
}

/// Convert with an explicit cancellation handle and page rasteriser.
pub async fn convert_with(
    source: DocumentSource,
    config: &ConversionConfig,
    cancel: &CancelHandle,
    rasterizer: Arc<dyn PageRasterizer>,
) -> Result<ConversionOutput, Pdf2PptxError> {
    let tracker = ProgressTracker::new(config.progress_callback.clone());
    let output = run_conversion(new_job_id(), source, config, cancel, rasterizer, &tracker).await?;
    finish(&tracker, &output);
    Ok(output)
}

/// Convert a document that has already been loaded.
///
/// Progress starts at the extraction floor; no loading events are emitted.
pub async fn convert_document(
    document: Document,
    config: &ConversionConfig,
    cancel: &CancelHandle,
) -> Result<ConversionOutput, Pdf2PptxError> {
    let tracker = ProgressTracker::new(config.progress_callback.clone());
    let output = orchestrate(new_job_id(), document, config, cancel, &tracker, 0, Instant::now()).await?;
    finish(&tracker, &output);
    Ok(output)
}

/// Convert and write the package to `output_path`.
///
/// The file is written to a temporary sibling and renamed into place, so a
/// failed job never leaves a partial presentation behind. Completion is
/// reported only once the file is in place.
pub async fn convert_to_file<S: AsRef<str>>(
    inputs: &[S],
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2PptxError> {
    let source = input::resolve_inputs(inputs, config).await?;
    let tracker = ProgressTracker::new(config.progress_callback.clone());
    let output = run_conversion(
        new_job_id(),
        source,
        config,
        &CancelHandle::new(),
        default_rasterizer(config),
        &tracker,
    )
    .await?;

    let path = output_path.as_ref().to_path_buf();
    let bytes = output.pptx.clone();
    tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
        .await
        .map_err(|e| Pdf2PptxError::Internal(format!("write task failed: {e}")))??;

    finish(&tracker, &output);
    Ok(output)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Pdf2PptxError> {
    let fail = |source: std::io::Error| Pdf2PptxError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::env::current_dir().map_err(fail)?,
    };
    std::fs::create_dir_all(&parent).map_err(fail)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(fail)?;
    tmp.write_all(bytes).map_err(fail)?;
    tmp.persist(path).map_err(|e| fail(e.error))?;
    Ok(())
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync<S: AsRef<str>>(
    inputs: &[S],
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2PptxError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Pdf2PptxError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(inputs, config))
}

/// Describe the inputs without rasterising or calling any service.
pub async fn inspect<S: AsRef<str>>(
    inputs: &[S],
    config: &ConversionConfig,
) -> Result<DocumentInfo, Pdf2PptxError> {
    let source = input::resolve_inputs(inputs, config).await?;
    tokio::task::spawn_blocking(move || loader::inspect_source(&source))
        .await
        .map_err(|e| Pdf2PptxError::Internal(format!("inspect task failed: {e}")))?
}

/// The method used by the most pages; ties go to the earlier tier.
pub fn dominant_method(methods: impl IntoIterator<Item = ExtractionMethod>) -> Option<ExtractionMethod> {
    let mut counts: HashMap<ExtractionMethod, usize> = HashMap::new();
    for m in methods {
        *counts.entry(m).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|(a, na), (b, nb)| na.cmp(nb).then_with(|| b.rank().cmp(&a.rank())))
        .map(|(m, _)| m)
}

// ── Internal ─────────────────────────────────────────────────────────────

fn default_rasterizer(config: &ConversionConfig) -> Arc<dyn PageRasterizer> {
    Arc::new(PdfiumRasterizer::new(config.pdfium_lib_path.clone()))
}

/// Report `(100, done)` for a job whose output has been delivered.
///
/// Callers invoke this last, after anything that can still fail, so a
/// failed job never announces completion.
pub(crate) fn finish(tracker: &ProgressTracker, output: &ConversionOutput) {
    if let Some(cb) = tracker.callback() {
        cb.on_conversion_complete(output.pages.len(), output.method);
    }
    tracker.report(ProgressPhase::Done, 100, format!("Done: {}", output.method));
}

/// Load, then orchestrate, under the caller's progress tracker.
///
/// Stops at the end of packaging; the caller reports completion with
/// [`finish`].
pub(crate) async fn run_conversion(
    job_id: String,
    source: DocumentSource,
    config: &ConversionConfig,
    cancel: &CancelHandle,
    rasterizer: Arc<dyn PageRasterizer>,
    tracker: &ProgressTracker,
) -> Result<ConversionOutput, Pdf2PptxError> {
    let total_start = Instant::now();
    info!("Job {}: converting '{}'", job_id, source.name());

    // ── Load ─────────────────────────────────────────────────────────────
    tracker.report(ProgressPhase::Loading, 0, format!("Opening {}", source.name()));
    let load_start = Instant::now();
    let document = loader::load_document(source, config, rasterizer).await?;
    let load_ms = load_start.elapsed().as_millis() as u64;
    info!(
        "Job {}: loaded {} page(s) in {}ms",
        job_id,
        document.page_count(),
        load_ms
    );

    orchestrate(job_id, document, config, cancel, tracker, load_ms, total_start).await
}

async fn orchestrate(
    job_id: String,
    document: Document,
    config: &ConversionConfig,
    cancel: &CancelHandle,
    tracker: &ProgressTracker,
    load_duration_ms: u64,
    total_start: Instant,
) -> Result<ConversionOutput, Pdf2PptxError> {
    let total = document.page_count();
    if total == 0 {
        return Err(Pdf2PptxError::UnreadableDocument {
            source_name: document.source_name.clone(),
            detail: "document has no pages".to_string(),
        });
    }
    let title = document
        .metadata
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| document.stem().to_string());
    let Document { pages, metadata, .. } = document;

    let callback = tracker.callback().cloned();
    if let Some(cb) = &callback {
        cb.on_conversion_start(total);
    }
    tracker.report(
        ProgressPhase::Extracting,
        EXTRACT_FLOOR,
        format!("Extracting {} page(s)", total),
    );

    // ── Vision precondition, once per job ────────────────────────────────
    let tier = match resolve_vision(&config.vision) {
        Ok(service) => VisionTier::Available(service),
        Err(e) => {
            warn!("Job {}: {}; pages skip the vision tier", job_id, e);
            VisionTier::Unavailable(e.to_string())
        }
    };
    let ctx = ChainContext {
        direct: config.direct.clone(),
        vision: config.vision.clone(),
        tier,
        callback: callback.clone(),
    };

    // ── Extraction sweep ─────────────────────────────────────────────────
    let extract_start = Instant::now();
    let done = AtomicUsize::new(0);
    let (ctx_ref, done_ref, callback_ref) = (&ctx, &done, &callback);
    let mut resolutions: Vec<PageResolution> = stream::iter(pages.into_iter().map(move |page| async move {
        if cancel.is_cancelled() {
            debug!("Page {}: skipped, job cancelled", page.number());
            return None;
        }
        let page_num = page.number();
        if let Some(cb) = callback_ref {
            cb.on_page_start(page_num, total);
        }
        let resolution = strategy::resolve_page(page, ctx_ref).await;
        let n = done_ref.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(cb) = callback_ref {
            cb.on_page_complete(page_num, total, resolution.method());
        }
        tracker.report(
            ProgressPhase::Extracting,
            sweep_percent(n, total),
            format!("Page {} via {} ({}/{})", page_num, resolution.method(), n, total),
        );
        Some(resolution)
    }))
    .buffer_unordered(config.concurrency.max(1))
    .filter_map(|r| async move { r })
    .collect()
    .await;
    let extract_duration_ms = extract_start.elapsed().as_millis() as u64;

    if cancel.is_cancelled() {
        info!("Job {}: cancelled after {}/{} pages", job_id, resolutions.len(), total);
        return Err(Pdf2PptxError::Cancelled {
            completed: resolutions.len(),
            total,
        });
    }
    resolutions.sort_by_key(|r| r.layout.index);

    // ── Build ────────────────────────────────────────────────────────────
    tracker.report(ProgressPhase::Building, BUILD_FLOOR, "Building slides");
    let first_page = resolutions
        .first()
        .map(|r| (r.layout.page_width, r.layout.page_height));
    let slide_size = config.slide_size.resolve(first_page);

    let (presentation, dropped, resolutions) = tokio::task::spawn_blocking(move || {
        let (pres, dropped) =
            pptx::build_presentation(resolutions.iter().map(|r| &r.layout), slide_size, Some(title));
        (pres, dropped, resolutions)
    })
    .await
    .map_err(|e| Pdf2PptxError::Internal(format!("slide build task failed: {e}")))?;

    let shape_counts: Vec<usize> = presentation.slides.iter().map(|s| s.shapes.len()).collect();

    // ── Package ──────────────────────────────────────────────────────────
    tracker.report(ProgressPhase::Finalizing, FINALIZE_FLOOR, "Packaging presentation");
    let pptx_bytes = tokio::task::spawn_blocking(move || pptx::write_pptx(&presentation))
        .await
        .map_err(|e| Pdf2PptxError::Internal(format!("package task failed: {e}")))??;

    let pages: Vec<PageResult> = resolutions
        .into_iter()
        .zip(dropped)
        .zip(shape_counts)
        .map(|((r, dropped), element_count)| PageResult {
            page_num: r.layout.index + 1,
            method: r.layout.method,
            element_count,
            dropped,
            fallbacks: r.fallbacks,
            input_tokens: r.input_tokens,
            output_tokens: r.output_tokens,
            retries: r.retries,
            duration_ms: r.duration_ms,
        })
        .collect();

    let method = dominant_method(pages.iter().map(|p| p.method)).unwrap_or(ExtractionMethod::ImageFallback);
    let mut stats = ConversionStats::from_pages(&pages);
    stats.load_duration_ms = load_duration_ms;
    stats.extract_duration_ms = extract_duration_ms;
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Job {}: {} slide(s), method {} (direct {}, vision {}, image {}), {}ms",
        job_id,
        pages.len(),
        method,
        stats.direct_pages,
        stats.vision_pages,
        stats.fallback_pages,
        stats.total_duration_ms
    );


    Ok(ConversionOutput {
        file_name: format!("{}_{}.pptx", config.output_prefix, job_id),
        job_id,
        pptx: pptx_bytes,
        method,
        slide_size,
        pages,
        metadata,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExtractionMethod::*;

    #[test]
    fn dominant_method_majority() {
        assert_eq!(
            dominant_method([DirectExtraction, AiVision, DirectExtraction]),
            Some(DirectExtraction)
        );
        assert_eq!(
            dominant_method([ImageFallback, AiVision, ImageFallback]),
            Some(ImageFallback)
        );
    }

    #[test]
    fn dominant_method_ties_prefer_earlier_tier() {
        assert_eq!(dominant_method([ImageFallback, DirectExtraction]), Some(DirectExtraction));
        assert_eq!(dominant_method([ImageFallback, AiVision]), Some(AiVision));
        assert_eq!(
            dominant_method([AiVision, ImageFallback, DirectExtraction]),
            Some(DirectExtraction)
        );
        assert_eq!(dominant_method(Vec::new()), None);
    }

    #[test]
    fn write_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("deck.pptx");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }
}
