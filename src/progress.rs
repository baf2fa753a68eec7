//! Progress reporting for conversion jobs.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events while a job runs.
//!
//! # Contract
//!
//! [`ConversionProgressCallback::on_progress`] receives a sequence of
//! `(percent, phase, detail)` events. Percent never decreases, and a
//! successful job ends with exactly one event at 100 in the
//! [`ProgressPhase::Done`] phase, delivered before the result is returned.
//! The per-page hooks are informational and may arrive out of order when
//! pages run concurrently.
//!
//! Phase floors:
//!
//! ```text
//!   0  loading      open the document, rasterise pages
//!  10  extracting   one event per resolved page, spanning 10 → 85
//!  85  building     slide shapes from page layouts
//!  95  finalizing   package the .pptx
//! 100  done
//! ```
//!
//! # Why callbacks?
//!
//! The host decides the transport: forward to a channel (see
//! [`ChannelProgress`]), a polling endpoint backed by
//! [`crate::job::JobStore`], or a terminal progress bar. The library knows
//! nothing about how the host talks to its users.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2pptx::{ConversionProgressCallback, ConversionConfig, ProgressEvent};
//! use std::sync::{Arc, atomic::{AtomicU8, Ordering}};
//!
//! struct LastPercent(AtomicU8);
//!
//! impl ConversionProgressCallback for LastPercent {
//!     fn on_progress(&self, event: &ProgressEvent) {
//!         self.0.store(event.percent, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(LastPercent(AtomicU8::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::layout::ExtractionMethod;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Coarse job phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Loading,
    Extracting,
    Building,
    Finalizing,
    Done,
}

impl ProgressPhase {
    pub fn label(&self) -> &'static str {
        match self {
            ProgressPhase::Loading => "loading",
            ProgressPhase::Extracting => "extracting",
            ProgressPhase::Building => "building",
            ProgressPhase::Finalizing => "finalizing",
            ProgressPhase::Done => "done",
        }
    }
}

impl fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Percent at which the extraction sweep starts.
pub const EXTRACT_FLOOR: u8 = 10;
/// Percent at which the extraction sweep ends and building starts.
pub const BUILD_FLOOR: u8 = 85;
/// Percent at which packaging starts.
pub const FINALIZE_FLOOR: u8 = 95;

/// Percent after `done` of `total` pages have been resolved.
pub fn sweep_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return BUILD_FLOOR;
    }
    let span = (BUILD_FLOOR - EXTRACT_FLOOR) as usize;
    EXTRACT_FLOOR + (done.min(total) * span / total) as u8
}

/// One `(percent, phase, detail)` tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub percent: u8,
    pub phase: ProgressPhase,
    pub detail: String,
}

/// Called by the conversion pipeline as a job advances.
///
/// Implementations must be `Send + Sync`; page hooks can fire from
/// concurrent worker tasks. All methods default to no-ops.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once, after loading, with the number of pages to resolve.
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called for every progress tuple (monotonic percent).
    fn on_progress(&self, event: &ProgressEvent) {
        let _ = event;
    }

    /// Called before the first strategy runs for a page.
    ///
    /// * `page_num` — 1-indexed page number
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a strategy declines or fails and the page moves on.
    ///
    /// * `from`   — the strategy that did not produce the layout
    /// * `reason` — human-readable cause
    fn on_page_fallback(&self, page_num: usize, from: ExtractionMethod, reason: &str) {
        let _ = (page_num, from, reason);
    }

    /// Called when a page is resolved by `method`.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, method: ExtractionMethod) {
        let _ = (page_num, total_pages, method);
    }

    /// Called once after packaging with the job's dominant method.
    fn on_conversion_complete(&self, total_pages: usize, method: ExtractionMethod) {
        let _ = (total_pages, method);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

/// Forwards progress tuples into a Tokio channel.
///
/// ```rust
/// use edgequake_pdf2pptx::ChannelProgress;
///
/// let (progress, mut rx) = ChannelProgress::new();
/// // hand `Arc::new(progress)` to the config, then drain `rx` elsewhere
/// # drop(progress);
/// # assert!(rx.try_recv().is_err());
/// ```
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ConversionProgressCallback for ChannelProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        // A dropped receiver means nobody is listening any more.
        let _ = self.tx.send(event.clone());
    }
}

// ── Tracker ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct TrackerState {
    percent: u8,
    done: bool,
}

/// Enforces the progress contract in front of a user callback.
///
/// Percent is raised to the last emitted value, only the `Done` phase may
/// reach 100, and `Done` is emitted at most once. Events after `Done` are
/// dropped.
pub(crate) struct ProgressTracker {
    callback: Option<ProgressCallback>,
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    pub(crate) fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Emit a progress tuple, normalised to the contract.
    pub(crate) fn report(&self, phase: ProgressPhase, percent: u8, detail: impl Into<String>) {
        let event = {
            let mut state = match self.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if state.done {
                return;
            }
            let ceiling = if phase == ProgressPhase::Done { 100 } else { 99 };
            let percent = if phase == ProgressPhase::Done {
                100
            } else {
                percent.min(ceiling).max(state.percent)
            };
            state.percent = percent;
            state.done = phase == ProgressPhase::Done;
            ProgressEvent {
                percent,
                phase,
                detail: detail.into(),
            }
        };
        if let Some(cb) = &self.callback {
            cb.on_progress(&event);
        }
    }

    pub(crate) fn callback(&self) -> Option<&ProgressCallback> {
        self.callback.as_ref()
    }

    pub(crate) fn percent(&self) -> u8 {
        match self.state.lock() {
            Ok(guard) => guard.percent,
            Err(poisoned) => poisoned.into_inner().percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        events: Mutex<Vec<ProgressEvent>>,
        completes: AtomicUsize,
        fallbacks: AtomicUsize,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                completes: AtomicUsize::new(0),
                fallbacks: AtomicUsize::new(0),
            }
        }
    }

    impl ConversionProgressCallback for Recorder {
        fn on_progress(&self, event: &ProgressEvent) {
            self.events.lock().unwrap().push(event.clone());
        }

        fn on_page_fallback(&self, _page_num: usize, _from: ExtractionMethod, _reason: &str) {
            self.fallbacks.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _page_num: usize, _total: usize, _method: ExtractionMethod) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_conversion_start(5);
        cb.on_page_start(1, 5);
        cb.on_page_fallback(1, ExtractionMethod::DirectExtraction, "no text");
        cb.on_page_complete(1, 5, ExtractionMethod::ImageFallback);
        cb.on_conversion_complete(5, ExtractionMethod::ImageFallback);
    }

    #[test]
    fn sweep_percent_spans_extraction_phase() {
        assert_eq!(sweep_percent(0, 4), EXTRACT_FLOOR);
        assert_eq!(sweep_percent(4, 4), BUILD_FLOOR);
        assert_eq!(sweep_percent(2, 4), 47);
        assert_eq!(sweep_percent(9, 4), BUILD_FLOOR);
        assert_eq!(sweep_percent(0, 0), BUILD_FLOOR);
    }

    #[test]
    fn tracker_is_monotonic_and_single_done() {
        let recorder = Arc::new(Recorder::new());
        let tracker = ProgressTracker::new(Some(recorder.clone() as ProgressCallback));

        tracker.report(ProgressPhase::Loading, 0, "open");
        tracker.report(ProgressPhase::Extracting, 40, "page 2");
        tracker.report(ProgressPhase::Extracting, 30, "page 1 (late)");
        tracker.report(ProgressPhase::Building, 100, "not done yet");
        tracker.report(ProgressPhase::Done, 100, "finished");
        tracker.report(ProgressPhase::Done, 100, "again");
        tracker.report(ProgressPhase::Finalizing, 95, "after done");

        let events = recorder.events.lock().unwrap();
        let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![0, 40, 40, 99, 100]);
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        let dones = events.iter().filter(|e| e.phase == ProgressPhase::Done).count();
        assert_eq!(dones, 1);
        assert_eq!(tracker.percent(), 100);
    }

    #[tokio::test]
    async fn channel_progress_forwards_events() {
        let (progress, mut rx) = ChannelProgress::new();
        let tracker = ProgressTracker::new(Some(Arc::new(progress) as ProgressCallback));
        tracker.report(ProgressPhase::Loading, 0, "start");
        tracker.report(ProgressPhase::Done, 100, "end");
        drop(tracker);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.phase, ProgressPhase::Loading);
        let last = rx.recv().await.unwrap();
        assert_eq!((last.percent, last.phase), (100, ProgressPhase::Done));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn arc_dyn_callback_works() {
        let recorder = Arc::new(Recorder::new());
        let cb: Arc<dyn ConversionProgressCallback> = recorder.clone();
        cb.on_page_fallback(2, ExtractionMethod::AiVision, "timeout");
        cb.on_page_complete(2, 3, ExtractionMethod::ImageFallback);
        assert_eq!(recorder.fallbacks.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.completes.load(Ordering::SeqCst), 1);
    }
}
