//! The per-page fallback chain: Direct → Vision → Image.
//!
//! Each page walks the chain until a strategy produces a [`PageOutcome`]. A strategy
//! that declines or fails is recorded as a [`FallbackRecord`] and reported
//! through [`ConversionProgressCallback::on_page_fallback`]; the page then
//! moves on. The image fallback cannot fail, so every page resolves.
//!
//! Vision availability is decided once per job by the orchestrator and
//! passed in as a [`VisionTier`]; an unavailable tier is skipped without any
//! per-page request.
//!
//! [`ConversionProgressCallback::on_page_fallback`]: crate::progress::ConversionProgressCallback::on_page_fallback

use super::{direct, fallback, vision};
use crate::config::{DirectConfig, VisionConfig};
use crate::document::Page;
use crate::error::VisionError;
use crate::layout::{ExtractionMethod, PageLayout};
use crate::output::FallbackRecord;
use crate::progress::ProgressCallback;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Vision capability for a job, resolved once before any page runs.
#[derive(Clone)]
pub enum VisionTier {
    Available(Arc<dyn vision::VisionService>),
    Unavailable(String),
}

impl VisionTier {
    pub fn is_available(&self) -> bool {
        matches!(self, VisionTier::Available(_))
    }
}

/// What the chain settled on for one page, tagged by tier.
#[derive(Debug, Clone)]
pub enum PageOutcome {
    Direct(PageLayout),
    Vision(vision::VisionAnalysis),
    Image(PageLayout),
}

impl PageOutcome {
    pub fn method(&self) -> ExtractionMethod {
        match self {
            PageOutcome::Direct(_) => ExtractionMethod::DirectExtraction,
            PageOutcome::Vision(_) => ExtractionMethod::AiVision,
            PageOutcome::Image(_) => ExtractionMethod::ImageFallback,
        }
    }
}

/// A resolved page, before slide building.
#[derive(Debug, Clone)]
pub struct PageResolution {
    pub layout: PageLayout,
    pub fallbacks: Vec<FallbackRecord>,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub retries: u32,
    pub duration_ms: u64,
}

impl PageResolution {
    pub fn method(&self) -> ExtractionMethod {
        self.layout.method
    }
}

/// Settings shared by every page of a job.
#[derive(Clone)]
pub struct ChainContext {
    pub direct: DirectConfig,
    pub vision: VisionConfig,
    pub tier: VisionTier,
    pub callback: Option<ProgressCallback>,
}

impl ChainContext {
    fn record(&self, page: &Page, fallbacks: &mut Vec<FallbackRecord>, from: ExtractionMethod, reason: String) {
        warn!("Page {}: {} fell through: {}", page.number(), from, reason);
        if let Some(cb) = &self.callback {
            cb.on_page_fallback(page.number(), from, &reason);
        }
        fallbacks.push(FallbackRecord { from, reason });
    }
}

/// Run the chain for one page.
pub async fn resolve_page(page: Page, ctx: &ChainContext) -> PageResolution {
    let start = Instant::now();
    let mut fallbacks = Vec::new();
    let mut retries = 0;
    let outcome = run_chain(&page, ctx, &mut fallbacks, &mut retries).await;
    debug!("Page {}: resolved by {}", page.number(), outcome.method());

    let (layout, tokens) = match outcome {
        PageOutcome::Direct(layout) | PageOutcome::Image(layout) => (layout, (0, 0)),
        PageOutcome::Vision(analysis) => {
            retries = analysis.retries;
            (analysis.layout, (analysis.prompt_tokens, analysis.completion_tokens))
        }
    };
    PageResolution {
        layout,
        fallbacks,
        input_tokens: tokens.0,
        output_tokens: tokens.1,
        retries,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

async fn run_chain(
    page: &Page,
    ctx: &ChainContext,
    fallbacks: &mut Vec<FallbackRecord>,
    retries: &mut u32,
) -> PageOutcome {
    // ── Direct ──
    if !ctx.direct.enabled {
        ctx.record(page, fallbacks, ExtractionMethod::DirectExtraction, "direct extraction disabled".into());
    } else if page.content.is_none() {
        ctx.record(page, fallbacks, ExtractionMethod::DirectExtraction, "no structured content".into());
    } else {
        let owned = page.clone();
        let config = ctx.direct.clone();
        match tokio::task::spawn_blocking(move || direct::extract_page(&owned, &config)).await {
            Ok(Ok(layout)) => return PageOutcome::Direct(layout),
            Ok(Err(e)) => ctx.record(page, fallbacks, ExtractionMethod::DirectExtraction, e.to_string()),
            Err(join) => ctx.record(
                page,
                fallbacks,
                ExtractionMethod::DirectExtraction,
                format!("extraction task failed: {join}"),
            ),
        }
    }

    // ── Vision ──
    match &ctx.tier {
        VisionTier::Available(service) => match vision::analyze_page(service.as_ref(), page, &ctx.vision).await {
            Ok(analysis) => return PageOutcome::Vision(analysis),
            Err(e) => {
                if let VisionError::Request { retries: r, .. } = &e {
                    *retries = *r;
                }
                ctx.record(page, fallbacks, ExtractionMethod::AiVision, e.to_string());
            }
        },
        VisionTier::Unavailable(reason) => {
            ctx.record(page, fallbacks, ExtractionMethod::AiVision, reason.clone());
        }
    }

    // ── Image ──
    PageOutcome::Image(fallback::image_layout(page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::vision::{VisionReply, VisionRequest, VisionService};
    use async_trait::async_trait;
    use image::{DynamicImage, RgbImage};
    use std::sync::Mutex;

    fn image_page(index: usize) -> Page {
        Page {
            index,
            raster: Arc::new(DynamicImage::ImageRgb8(RgbImage::new(100, 50))),
            content: None,
        }
    }

    struct Canned(Result<String, VisionError>);

    #[async_trait]
    impl VisionService for Canned {
        async fn analyze(&self, _request: &VisionRequest) -> Result<VisionReply, VisionError> {
            self.0.clone().map(|content| VisionReply {
                content,
                prompt_tokens: 10,
                completion_tokens: 5,
            })
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(usize, ExtractionMethod)>>);

    impl crate::progress::ConversionProgressCallback for Recorder {
        fn on_page_fallback(&self, page_num: usize, from: ExtractionMethod, _reason: &str) {
            self.0.lock().unwrap().push((page_num, from));
        }
    }

    fn ctx(tier: VisionTier, callback: Option<ProgressCallback>) -> ChainContext {
        ChainContext {
            direct: DirectConfig::default(),
            vision: VisionConfig {
                max_retries: 0,
                retry_backoff_ms: 1,
                ..VisionConfig::default()
            },
            tier,
            callback,
        }
    }

    #[tokio::test]
    async fn image_page_goes_to_vision() {
        let reply = r#"{"elements":[{"type":"text","content":"Hi","x":10,"y":10,"width":50,"height":20}]}"#;
        let tier = VisionTier::Available(Arc::new(Canned(Ok(reply.to_string()))));
        let res = resolve_page(image_page(0), &ctx(tier, None)).await;
        assert_eq!(res.method(), ExtractionMethod::AiVision);
        assert_eq!(res.fallbacks.len(), 1);
        assert_eq!(res.fallbacks[0].from, ExtractionMethod::DirectExtraction);
        assert_eq!(res.input_tokens, 10);
    }

    #[tokio::test]
    async fn unavailable_vision_goes_to_image() {
        let recorder = Arc::new(Recorder::default());
        let tier = VisionTier::Unavailable("no vision provider configured".into());
        let res = resolve_page(image_page(2), &ctx(tier, Some(recorder.clone() as ProgressCallback))).await;
        assert_eq!(res.method(), ExtractionMethod::ImageFallback);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![(3, ExtractionMethod::DirectExtraction), (3, ExtractionMethod::AiVision)]
        );
    }

    #[tokio::test]
    async fn failed_request_goes_to_image() {
        let err = VisionError::Request {
            page: 1,
            retries: 0,
            detail: "500".into(),
        };
        let tier = VisionTier::Available(Arc::new(Canned(Err(err))));
        let res = resolve_page(image_page(0), &ctx(tier, None)).await;
        assert_eq!(res.method(), ExtractionMethod::ImageFallback);
        assert!(res.fallbacks[1].reason.contains("500"));
    }
}
