//! In-memory conversion jobs: state snapshots, cancellation, result pickup.
//!
//! A host that accepts conversion requests (an HTTP handler, a queue
//! worker) spawns each one into a [`JobStore`], polls
//! [`JobStore::snapshot`] for progress, and collects the package with
//! [`JobStore::take_output`]. Jobs that are never collected are dropped by
//! [`JobStore::purge_expired`].
//!
//! The store observes a job only through the progress callback the
//! orchestrator writes to, so job state is never mutated from anywhere else.

use crate::config::ConversionConfig;
use crate::convert::{finish, run_conversion};
use crate::error::Pdf2PptxError;
use crate::layout::ExtractionMethod;
use crate::output::ConversionOutput;
use crate::pipeline::input::DocumentSource;
use crate::pipeline::render::{PageRasterizer, PdfiumRasterizer};
use crate::progress::{
    ConversionProgressCallback, ProgressCallback, ProgressEvent, ProgressPhase, ProgressTracker,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Length of a job id.
pub const JOB_ID_LEN: usize = 8;

/// Fresh 8-character job id (hex, from a v4 UUID).
pub fn new_job_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(JOB_ID_LEN);
    id
}

/// Cooperative cancellation flag shared between a job and its owner.
///
/// The orchestrator checks it before every page attempt and before
/// building; pages already in flight finish, nothing new starts.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Where one page is in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Pending,
    InProgress,
    Done(ExtractionMethod),
    /// The job ended before this page resolved.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobStatus {
    Running,
    Succeeded {
        method: ExtractionMethod,
        file_name: String,
    },
    Failed {
        message: String,
    },
    Cancelled,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Observable state of one job.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionJob {
    pub id: String,
    pub source_name: String,
    pub status: JobStatus,
    /// Monotonic, 0–100.
    pub percent: u8,
    pub phase: ProgressPhase,
    pub detail: String,
    /// Pages selected for conversion; 0 until the document is loaded.
    pub total_pages: usize,
    /// Status by 1-indexed page number, for every page started so far.
    pub pages: BTreeMap<usize, PageStatus>,
    #[serde(skip)]
    pub created: Instant,
}

impl ConversionJob {
    fn new(id: String, source_name: String) -> Self {
        Self {
            id,
            source_name,
            status: JobStatus::Running,
            percent: 0,
            phase: ProgressPhase::Loading,
            detail: String::new(),
            total_pages: 0,
            pages: BTreeMap::new(),
            created: Instant::now(),
        }
    }

    /// Status of a page, `Pending` when it has not started.
    pub fn page_status(&self, page_num: usize) -> PageStatus {
        self.pages.get(&page_num).copied().unwrap_or(PageStatus::Pending)
    }

    /// Pages that have not started yet.
    pub fn pending_pages(&self) -> usize {
        self.total_pages.saturating_sub(self.pages.len())
    }

    pub fn completed_pages(&self) -> usize {
        self.pages
            .values()
            .filter(|s| matches!(s, PageStatus::Done(_)))
            .count()
    }

    fn finish(&mut self, status: JobStatus) {
        if !matches!(status, JobStatus::Succeeded { .. }) {
            for s in self.pages.values_mut() {
                if *s == PageStatus::InProgress {
                    *s = PageStatus::Failed;
                }
            }
        }
        self.status = status;
    }
}

struct JobEntry {
    job: ConversionJob,
    cancel: CancelHandle,
    output: Option<ConversionOutput>,
}

type Jobs = Arc<Mutex<HashMap<String, JobEntry>>>;

fn lock(jobs: &Jobs) -> MutexGuard<'_, HashMap<String, JobEntry>> {
    match jobs.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Registry of running and finished jobs.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Jobs,
    rasterizer: Option<Arc<dyn PageRasterizer>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `rasterizer` for every job instead of binding pdfium per job.
    pub fn with_rasterizer(rasterizer: Arc<dyn PageRasterizer>) -> Self {
        Self {
            jobs: Jobs::default(),
            rasterizer: Some(rasterizer),
        }
    }

    /// Start converting `source` on the Tokio runtime. Returns the job id.
    pub fn spawn(&self, source: DocumentSource, mut config: ConversionConfig) -> String {
        let cancel = CancelHandle::new();
        let id = {
            let mut jobs = lock(&self.jobs);
            let mut id = new_job_id();
            while jobs.contains_key(&id) {
                id = new_job_id();
            }
            jobs.insert(
                id.clone(),
                JobEntry {
                    job: ConversionJob::new(id.clone(), source.name().to_string()),
                    cancel: cancel.clone(),
                    output: None,
                },
            );
            id
        };

        config.progress_callback = Some(Arc::new(JobObserver {
            jobs: Arc::clone(&self.jobs),
            id: id.clone(),
            inner: config.progress_callback.take(),
        }) as ProgressCallback);

        let rasterizer = self
            .rasterizer
            .clone()
            .unwrap_or_else(|| Arc::new(PdfiumRasterizer::new(config.pdfium_lib_path.clone())));
        let jobs = Arc::clone(&self.jobs);
        let job_id = id.clone();
        info!("Job {}: accepted '{}'", id, source.name());

        tokio::spawn(async move {
            let tracker = ProgressTracker::new(config.progress_callback.clone());
            let result =
                run_conversion(job_id.clone(), source, &config, &cancel, rasterizer, &tracker).await;
            // Storing the output cannot fail; announce completion before
            // taking the lock the observer needs.
            if let Ok(output) = &result {
                finish(&tracker, output);
            }
            let mut jobs = lock(&jobs);
            let Some(entry) = jobs.get_mut(&job_id) else {
                debug!("Job {}: finished after removal", job_id);
                return;
            };
            match result {
                Ok(output) => {
                    entry.job.finish(JobStatus::Succeeded {
                        method: output.method,
                        file_name: output.file_name.clone(),
                    });
                    entry.output = Some(output);
                }
                Err(Pdf2PptxError::Cancelled { .. }) => entry.job.finish(JobStatus::Cancelled),
                Err(e) => {
                    warn!("Job {}: failed: {}", job_id, e);
                    entry.job.finish(JobStatus::Failed {
                        message: e.to_string(),
                    });
                }
            }
        });
        id
    }

    /// Current state of a job.
    pub fn snapshot(&self, id: &str) -> Option<ConversionJob> {
        lock(&self.jobs).get(id).map(|e| e.job.clone())
    }

    /// Ask a running job to stop. Returns `false` for unknown ids.
    pub fn cancel(&self, id: &str) -> bool {
        match lock(&self.jobs).get(id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove a successful job and hand over its output.
    ///
    /// Returns `None` while the job is running, after it failed, or for an
    /// unknown id.
    pub fn take_output(&self, id: &str) -> Option<ConversionOutput> {
        let mut jobs = lock(&self.jobs);
        jobs.get(id)?.output.as_ref()?;
        jobs.remove(id).and_then(|e| e.output)
    }

    /// Drop jobs created more than `ttl` ago, cancelling any still running.
    pub fn purge_expired(&self, ttl: Duration) -> usize {
        let mut jobs = lock(&self.jobs);
        let before = jobs.len();
        jobs.retain(|id, entry| {
            let keep = entry.job.created.elapsed() < ttl;
            if !keep {
                debug!("Job {}: expired", id);
                entry.cancel.cancel();
            }
            keep
        });
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mirrors progress into the store, then forwards to the caller's callback.
struct JobObserver {
    jobs: Jobs,
    id: String,
    inner: Option<ProgressCallback>,
}

impl JobObserver {
    fn update(&self, f: impl FnOnce(&mut ConversionJob)) {
        if let Some(entry) = lock(&self.jobs).get_mut(&self.id) {
            f(&mut entry.job);
        }
    }
}

impl ConversionProgressCallback for JobObserver {
    fn on_conversion_start(&self, total_pages: usize) {
        self.update(|job| job.total_pages = total_pages);
        if let Some(cb) = &self.inner {
            cb.on_conversion_start(total_pages);
        }
    }

    fn on_progress(&self, event: &ProgressEvent) {
        self.update(|job| {
            job.percent = job.percent.max(event.percent);
            job.phase = event.phase;
            job.detail = event.detail.clone();
        });
        if let Some(cb) = &self.inner {
            cb.on_progress(event);
        }
    }

    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        self.update(|job| {
            job.pages.insert(page_num, PageStatus::InProgress);
        });
        if let Some(cb) = &self.inner {
            cb.on_page_start(page_num, total_pages);
        }
    }

    fn on_page_fallback(&self, page_num: usize, from: ExtractionMethod, reason: &str) {
        if let Some(cb) = &self.inner {
            cb.on_page_fallback(page_num, from, reason);
        }
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize, method: ExtractionMethod) {
        self.update(|job| {
            job.pages.insert(page_num, PageStatus::Done(method));
        });
        if let Some(cb) = &self.inner {
            cb.on_page_complete(page_num, total_pages, method);
        }
    }

    fn on_conversion_complete(&self, total_pages: usize, method: ExtractionMethod) {
        if let Some(cb) = &self.inner {
            cb.on_conversion_complete(total_pages, method);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_short_hex() {
        let id = new_job_id();
        assert_eq!(id.len(), JOB_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(new_job_id(), new_job_id());
    }

    #[test]
    fn cancel_handle_is_shared() {
        let a = CancelHandle::new();
        let b = a.clone();
        assert!(!b.is_cancelled());
        a.cancel();
        assert!(b.is_cancelled());
    }

    #[test]
    fn page_status_bookkeeping() {
        let mut job = ConversionJob::new("abcd1234".into(), "deck.pdf".into());
        job.total_pages = 3;
        job.pages.insert(1, PageStatus::Done(ExtractionMethod::DirectExtraction));
        job.pages.insert(2, PageStatus::InProgress);
        assert_eq!(job.pending_pages(), 1);
        assert_eq!(job.completed_pages(), 1);
        assert_eq!(job.page_status(3), PageStatus::Pending);

        job.finish(JobStatus::Cancelled);
        assert_eq!(job.page_status(2), PageStatus::Failed);
        assert_eq!(job.page_status(1), PageStatus::Done(ExtractionMethod::DirectExtraction));
        assert!(job.status.is_finished());
    }

    #[test]
    fn observer_updates_store() {
        let store = JobStore::new();
        let id = "00000000".to_string();
        lock(&store.jobs).insert(
            id.clone(),
            JobEntry {
                job: ConversionJob::new(id.clone(), "a.png".into()),
                cancel: CancelHandle::new(),
                output: None,
            },
        );
        let observer = JobObserver {
            jobs: Arc::clone(&store.jobs),
            id: id.clone(),
            inner: None,
        };
        observer.on_conversion_start(2);
        observer.on_page_start(1, 2);
        observer.on_progress(&ProgressEvent {
            percent: 47,
            phase: ProgressPhase::Extracting,
            detail: "page 1".into(),
        });
        observer.on_page_complete(1, 2, ExtractionMethod::ImageFallback);

        let snap = store.snapshot(&id).unwrap();
        assert_eq!(snap.total_pages, 2);
        assert_eq!(snap.percent, 47);
        assert_eq!(snap.page_status(1), PageStatus::Done(ExtractionMethod::ImageFallback));
        assert_eq!(snap.pending_pages(), 1);

        assert!(store.take_output(&id).is_none(), "no output while running");
        assert!(store.cancel(&id));
        assert!(!store.cancel("missing"));
        assert_eq!(store.purge_expired(Duration::ZERO), 1);
        assert!(store.is_empty());
    }
}
