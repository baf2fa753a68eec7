//! Vision analysis: ask a multimodal model for a page's editable elements.
//!
//! The page raster is sent to a [`VisionService`] together with the layout
//! prompt from [`crate::prompts`]; the JSON reply is parsed into a
//! [`PageLayout`] in raster-pixel units.
//!
//! ## Service seam
//!
//! [`VisionService`] is the only thing the orchestrator talks to. The
//! production implementation, [`LlmVisionService`], wraps any
//! `edgequake_llm` provider; tests and embedders can supply their own.
//! [`resolve_vision`] picks the service from an explicit [`VisionConfig`]
//! and never inspects the process environment.
//!
//! ## Retry strategy
//!
//! HTTP 429 / 503 errors from model APIs are transient and frequent under
//! concurrent load. Exponential backoff (`retry_backoff_ms * 2^attempt`)
//! avoids a thundering herd: with a 500 ms base and 2 retries the waits are
//! 500 ms then 1 s. Each attempt is bounded by `timeout_secs`. A reply that
//! arrives but cannot be parsed is not retried; the page moves on to the
//! image fallback.

use super::encode;
use crate::config::{VisionConfig, DEFAULT_VISION_MODEL};
use crate::document::Page;
use crate::error::VisionError;
use crate::layout::{
    Alignment, BoundingBox, Color, CropRect, ElementKind, ExtractionMethod, GeometryKind,
    ImageBlock, ImageSource, LayoutElement, PageLayout, ShapeBlock, TextBlock, TextRun,
};
use crate::prompts::{DEFAULT_LAYOUT_PROMPT, PROMPT_SLIDE_HEIGHT_PT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// One page handed to a vision service.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    /// 0-based page index.
    pub page_index: usize,
    /// Full-resolution page raster.
    pub image: Arc<DynamicImage>,
}

/// Raw model output plus token accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisionReply {
    pub content: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

/// A multimodal model able to describe a slide image.
///
/// Implementations return [`VisionError::Request`] for transport or API
/// failures (retried by the caller) and [`VisionError::Unavailable`] when
/// the capability is gone for the whole job.
#[async_trait]
pub trait VisionService: Send + Sync {
    async fn analyze(&self, request: &VisionRequest) -> Result<VisionReply, VisionError>;
}

/// [`VisionService`] backed by an `edgequake_llm` provider.
pub struct LlmVisionService {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
    max_image_dimension: u32,
}

impl LlmVisionService {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &VisionConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_LAYOUT_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_image_dimension: config.max_image_dimension,
        }
    }
}

#[async_trait]
impl VisionService for LlmVisionService {
    async fn analyze(&self, request: &VisionRequest) -> Result<VisionReply, VisionError> {
        let page = request.page_index + 1;
        let image = encode::encode_page(&request.image, self.max_image_dimension).map_err(|e| {
            VisionError::Request {
                page,
                retries: 0,
                detail: format!("image encoding failed: {e}"),
            }
        })?;

        // The image carries the content; the user turn needs no text.
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images("", vec![image]),
        ];
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| VisionError::Request {
                page,
                retries: 0,
                detail: e.to_string(),
            })?;

        Ok(VisionReply {
            content: response.content,
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
        })
    }
}

/// Pick the vision service for a job, most specific first:
///
/// 1. an explicit [`VisionService`];
/// 2. an explicit `LLMProvider`;
/// 3. a provider name (and optional model) instantiated through
///    `ProviderFactory`.
///
/// Anything else means vision is unavailable for the job.
pub fn resolve_vision(config: &VisionConfig) -> Result<Arc<dyn VisionService>, VisionError> {
    if let Some(service) = &config.service {
        return Ok(Arc::clone(service));
    }
    if let Some(provider) = &config.provider {
        return Ok(Arc::new(LlmVisionService::new(Arc::clone(provider), config)));
    }
    if let Some(name) = &config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_VISION_MODEL);
        let provider = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
            VisionError::Unavailable {
                reason: format!("provider '{name}' with model '{model}': {e}"),
            }
        })?;
        return Ok(Arc::new(LlmVisionService::new(provider, config)));
    }
    Err(VisionError::Unavailable {
        reason: "no vision provider configured".to_string(),
    })
}

/// Successful vision analysis of one page.
#[derive(Debug, Clone)]
pub struct VisionAnalysis {
    pub layout: PageLayout,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub retries: u32,
}

/// Exponential delay before retry `attempt` (1-based), saturating at `u64::MAX`.
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

/// Analyse one page with retry, backoff and a per-attempt timeout.
pub async fn analyze_page(
    service: &dyn VisionService,
    page: &Page,
    config: &VisionConfig,
) -> Result<VisionAnalysis, VisionError> {
    let page_num = page.number();
    let request = VisionRequest {
        page_index: page.index,
        image: Arc::clone(&page.raster),
    };
    let limit = Duration::from_secs(config.timeout_secs.max(1));
    let start = Instant::now();
    let mut last_err: Option<VisionError> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(config.retry_backoff_ms, attempt);
            warn!(
                "Page {}: vision retry {}/{} after {}ms",
                page_num, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let reply = match timeout(limit, service.analyze(&request)).await {
            Err(_) => {
                warn!("Page {}: vision attempt {} timed out", page_num, attempt + 1);
                last_err = Some(VisionError::Timeout {
                    page: page_num,
                    secs: limit.as_secs(),
                });
                continue;
            }
            Ok(Err(e)) if e.is_retryable() => {
                warn!("Page {}: vision attempt {} failed: {}", page_num, attempt + 1, e);
                last_err = Some(e);
                continue;
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(reply)) => reply,
        };

        debug!(
            "Page {}: {} input tokens, {} output tokens, {:?}",
            page_num,
            reply.prompt_tokens,
            reply.completion_tokens,
            start.elapsed()
        );
        let layout = parse_layout_response(&reply.content, page)?;
        return Ok(VisionAnalysis {
            layout,
            prompt_tokens: reply.prompt_tokens,
            completion_tokens: reply.completion_tokens,
            retries: attempt,
        });
    }

    Err(match last_err {
        Some(VisionError::Request { detail, .. }) => VisionError::Request {
            page: page_num,
            retries: config.max_retries,
            detail,
        },
        Some(other) => other,
        None => VisionError::Request {
            page: page_num,
            retries: config.max_retries,
            detail: "no attempt was made".to_string(),
        },
    })
}

// ── Response parsing ─────────────────────────────────────────────────────

static FENCE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```(?:json|JSON)?\s*\n?").unwrap());
static FENCE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n?\s*```\s*$").unwrap());
static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[\s\S]*\}").unwrap());

/// Pull the JSON object out of a model reply.
fn extract_json(text: &str) -> Result<Value, String> {
    let mut body = text.trim().to_string();
    if body.starts_with("```") {
        body = FENCE_OPEN.replace(&body, "").to_string();
        body = FENCE_CLOSE.replace(&body, "").to_string();
    }

    let parsed = match serde_json::from_str::<Value>(&body) {
        Ok(v) => v,
        Err(first) => {
            let candidate = JSON_OBJECT
                .find(&body)
                .ok_or_else(|| format!("no JSON object in response ({first})"))?;
            serde_json::from_str::<Value>(candidate.as_str()).map_err(|e| e.to_string())?
        }
    };
    if parsed.is_object() {
        Ok(parsed)
    } else {
        Err("response JSON is not an object".to_string())
    }
}

/// Number that may arrive as a JSON number or a string such as `"12.5%"`.
fn number(v: &Value, key: &str) -> Option<f64> {
    match v.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
    .filter(|n: &f64| n.is_finite())
}

fn text_field<'v>(v: &'v Value, key: &str) -> Option<&'v str> {
    v.get(key).and_then(Value::as_str)
}

fn flag(v: &Value, key: &str) -> bool {
    match v.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "true" | "yes" | "bold" | "italic"),
        _ => false,
    }
}

/// Scale that turns one element's box values into fractions of the page.
/// A box whose values all lie in 0..=1 is already fractional; anything
/// larger means percentages.
fn box_unit(raw: &Value) -> f64 {
    let fractional = ["x", "y", "width", "height"]
        .iter()
        .filter_map(|k| number(raw, k))
        .all(|v| v.abs() <= 1.0);
    if fractional {
        1.0
    } else {
        0.01
    }
}

/// Parse a model reply into a layout in the page raster's pixel space.
///
/// Positions are percentages of the slide. Each element box is checked on
/// its own, so boxes given as 0–1 fractions are accepted too. Font sizes are points on a
/// 7.5 inch slide and are converted to raster pixels.
pub fn parse_layout_response(text: &str, page: &Page) -> Result<PageLayout, VisionError> {
    let page_num = page.number();
    let malformed = |detail: String| VisionError::Malformed {
        page: page_num,
        detail,
    };

    if text.trim().is_empty() {
        return Err(malformed("empty response".to_string()));
    }
    let data = extract_json(text).map_err(malformed)?;

    let raw_elements: Vec<&Value> = data
        .get("elements")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter(|e| e.is_object()).collect())
        .unwrap_or_default();

    let (raster_w, raster_h) = page.raster_size();
    let (rw, rh) = (raster_w as f64, raster_h as f64);

    let px_per_pt = rh / PROMPT_SLIDE_HEIGHT_PT;

    let mut elements = Vec::new();
    for raw in raw_elements {
        let unit = box_unit(raw);
        let x = number(raw, "x").unwrap_or(0.0) * unit;
        let y = number(raw, "y").unwrap_or(0.0) * unit;
        let w = number(raw, "width").unwrap_or(0.10 / unit) * unit;
        let h = number(raw, "height").unwrap_or(0.05 / unit) * unit;
        let bbox = BoundingBox::new(x * rw, y * rh, w * rw, h * rh);

        let kind = match text_field(raw, "type").unwrap_or("text").to_ascii_lowercase().as_str() {
            "text" => {
                let content = text_field(raw, "content").unwrap_or_default();
                if content.trim().is_empty() {
                    continue;
                }
                let size_pt = number(raw, "font_size").filter(|s| *s > 0.0).unwrap_or(14.0);
                ElementKind::Text(TextBlock {
                    runs: vec![TextRun {
                        text: content.to_string(),
                        font_family: text_field(raw, "font_family").map(str::to_string),
                        size: size_pt * px_per_pt,
                        bold: flag(raw, "bold"),
                        italic: flag(raw, "italic"),
                        color: text_field(raw, "font_color")
                            .and_then(Color::from_hex)
                            .unwrap_or(Color::BLACK),
                    }],
                    alignment: text_field(raw, "alignment")
                        .map(Alignment::parse)
                        .unwrap_or_default(),
                    wrap: true,
                })
            }
            "shape" => {
                let fill = ["background_color", "fill", "color"]
                    .iter()
                    .find_map(|k| text_field(raw, k).and_then(Color::from_hex));
                let Some(fill) = fill else {
                    debug!("Page {}: skipping shape without a fill colour", page_num);
                    continue;
                };
                ElementKind::Shape(ShapeBlock {
                    geometry: GeometryKind::Rectangle,
                    fill: Some(fill),
                    stroke: None,
                })
            }
            "image" => ElementKind::Image(ImageBlock {
                image: Arc::clone(&page.raster),
                crop: Some(crop_rect(&bbox, raster_w, raster_h)),
                source: ImageSource::PageRegion,
            }),
            other => {
                debug!("Page {}: ignoring element of type '{}'", page_num, other);
                continue;
            }
        };

        elements.push(LayoutElement {
            kind,
            bbox,
            z: elements.len() as u32,
        });
    }

    if elements.is_empty() {
        return Err(VisionError::EmptyLayout { page: page_num });
    }

    let background = text_field(&data, "background_color")
        .and_then(Color::from_hex)
        .or_else(|| super::direct::sample_background(page));

    Ok(PageLayout {
        index: page.index,
        page_width: rw,
        page_height: rh,
        elements,
        method: ExtractionMethod::AiVision,
        background,
    })
}

/// Pixel rectangle under `bbox`, clamped to the raster. May be empty.
fn crop_rect(bbox: &BoundingBox, raster_w: u32, raster_h: u32) -> CropRect {
    let max_x = raster_w.saturating_sub(1) as f64;
    let max_y = raster_h.saturating_sub(1) as f64;
    let x0 = bbox.x.clamp(0.0, max_x) as u32;
    let y0 = bbox.y.clamp(0.0, max_y) as u32;
    let x1 = (bbox.right().max(0.0) as u32).min(raster_w);
    let y1 = (bbox.bottom().max(0.0) as u32).min(raster_h);
    CropRect {
        x: x0,
        y: y0,
        width: x1.saturating_sub(x0),
        height: y1.saturating_sub(y0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn page(w: u32, h: u32) -> Page {
        Page {
            index: 2,
            raster: Arc::new(DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, image::Rgb([250, 250, 250])))),
            content: None,
        }
    }

    const REPLY: &str = r##"```json
{
  "background_color": "#FFFFFF",
  "elements": [
    {"type": "shape", "x": 0, "y": 0, "width": 100, "height": 15, "background_color": "#2c3e50"},
    {"type": "text", "content": "Quarterly Review", "x": 5, "y": 2, "width": 60, "height": 10,
     "font_size": 36, "font_color": "#FFFFFF", "bold": true, "alignment": "center"},
    {"type": "image", "x": 60, "y": 20, "width": 35, "height": 60}
  ]
}
```"##;

    #[test]
    fn parses_fenced_percent_layout() {
        let p = page(1000, 500);
        let layout = parse_layout_response(REPLY, &p).unwrap();
        assert_eq!(layout.method, ExtractionMethod::AiVision);
        assert_eq!(layout.index, 2);
        assert_eq!(layout.elements.len(), 3);
        assert_eq!(layout.background, Some(Color::WHITE));

        let shape = &layout.elements[0];
        assert_eq!(shape.bbox, BoundingBox::new(0.0, 0.0, 1000.0, 75.0));
        assert_eq!(shape.z, 0);

        match &layout.elements[1].kind {
            ElementKind::Text(t) => {
                assert_eq!(t.text(), "Quarterly Review");
                assert_eq!(t.alignment, Alignment::Center);
                assert!(t.runs[0].bold);
                assert!(t.wrap);
                // 36pt on a 540pt slide rendered 500px tall.
                assert!((t.runs[0].size - 36.0 * 500.0 / 540.0).abs() < 1e-9);
            }
            _ => panic!("expected text"),
        }

        match &layout.elements[2].kind {
            ElementKind::Image(img) => {
                assert_eq!(img.source, ImageSource::PageRegion);
                assert_eq!(
                    img.crop,
                    Some(CropRect {
                        x: 600,
                        y: 100,
                        width: 350,
                        height: 300
                    })
                );
            }
            _ => panic!("expected image"),
        }
    }

    #[test]
    fn accepts_fractions_and_prose_wrapping() {
        let reply = r#"Here is the layout: {"elements": [{"type": "text", "content": "Hi", "x": 0.1, "y": 0.2, "width": 0.5, "height": 0.1}]} Hope it helps."#;
        let layout = parse_layout_response(reply, &page(200, 100)).unwrap();
        assert_eq!(layout.elements[0].bbox, BoundingBox::new(20.0, 20.0, 100.0, 10.0));
        // No background colour in the reply: sampled from the raster.
        assert_eq!(layout.background, Some(Color::rgb(250, 250, 250)));
    }

    #[test]
    fn fraction_and_percent_boxes_mix_in_one_reply() {
        let reply = r#"{"elements": [
            {"type": "text", "content": "Title", "x": 10, "y": 5, "width": 80, "height": 20},
            {"type": "text", "content": "Note", "x": 0.5, "y": 0.5, "width": 0.25, "height": 0.1}
        ]}"#;
        let layout = parse_layout_response(reply, &page(200, 100)).unwrap();
        let close = |b: &BoundingBox, want: [f64; 4]| {
            [b.x, b.y, b.width, b.height]
                .iter()
                .zip(want)
                .all(|(got, want)| (got - want).abs() < 1e-9)
        };
        assert!(close(&layout.elements[0].bbox, [20.0, 5.0, 160.0, 20.0]));
        assert!(close(&layout.elements[1].bbox, [100.0, 50.0, 50.0, 10.0]));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = parse_layout_response("I cannot help with that.", &page(10, 10)).unwrap_err();
        assert!(matches!(err, VisionError::Malformed { page: 3, .. }));
    }

    #[test]
    fn no_usable_elements_is_empty_layout() {
        let reply = r#"{"elements": [{"type": "text", "content": "   "}]}"#;
        let err = parse_layout_response(reply, &page(10, 10)).unwrap_err();
        assert_eq!(err, VisionError::EmptyLayout { page: 3 });
    }

    #[test]
    fn crop_is_clamped_to_raster() {
        let crop = crop_rect(&BoundingBox::new(-10.0, 90.0, 50.0, 50.0), 100, 100);
        assert_eq!(
            crop,
            CropRect {
                x: 0,
                y: 90,
                width: 40,
                height: 10
            }
        );
    }

    #[test]
    fn unconfigured_vision_is_unavailable() {
        let err = resolve_vision(&VisionConfig::default()).err().unwrap();
        assert!(err.is_unavailable());
    }

    struct Flaky {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl VisionService for Flaky {
        async fn analyze(&self, request: &VisionRequest) -> Result<VisionReply, VisionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(VisionError::Request {
                    page: request.page_index + 1,
                    retries: 0,
                    detail: "503 Service Unavailable".into(),
                });
            }
            Ok(VisionReply {
                content: REPLY.to_string(),
                prompt_tokens: 100,
                completion_tokens: 50,
            })
        }
    }

    fn fast_config(max_retries: u32) -> VisionConfig {
        VisionConfig {
            max_retries,
            retry_backoff_ms: 1,
            timeout_secs: 5,
            ..VisionConfig::default()
        }
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let service = Flaky {
            calls: AtomicUsize::new(0),
            fail_first: 1,
        };
        let analysis = analyze_page(&service, &page(100, 50), &fast_config(2)).await.unwrap();
        assert_eq!(analysis.retries, 1);
        assert_eq!(analysis.prompt_tokens, 100);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn first_attempt_success_reports_no_retries() {
        let service = Flaky {
            calls: AtomicUsize::new(0),
            fail_first: 0,
        };
        let result = tokio_test::block_on(analyze_page(&service, &page(100, 50), &fast_config(2)));
        let analysis = tokio_test::assert_ok!(result);
        assert_eq!(analysis.retries, 0);
        assert_eq!(analysis.layout.method, ExtractionMethod::AiVision);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let service = Flaky {
            calls: AtomicUsize::new(0),
            fail_first: usize::MAX,
        };
        let err = analyze_page(&service, &page(100, 50), &fast_config(2)).await.unwrap_err();
        assert!(matches!(err, VisionError::Request { page: 3, retries: 2, .. }));
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_doubles_then_saturates() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 3), 2000);
        assert_eq!(backoff_ms(500, 80), u64::MAX);
        assert_eq!(backoff_ms(0, 200), 0);
    }

    #[tokio::test]
    async fn many_retries_do_not_overflow_the_backoff() {
        let service = Flaky {
            calls: AtomicUsize::new(0),
            fail_first: 66,
        };
        let config = VisionConfig {
            retry_backoff_ms: 0,
            ..fast_config(70)
        };
        let analysis = analyze_page(&service, &page(100, 50), &config).await.unwrap();
        assert_eq!(analysis.retries, 66);
    }

    struct Slow;

    #[async_trait]
    impl VisionService for Slow {
        async fn analyze(&self, _request: &VisionRequest) -> Result<VisionReply, VisionError> {
            sleep(Duration::from_secs(30)).await;
            Ok(VisionReply::default())
        }
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let config = VisionConfig {
            max_retries: 0,
            timeout_secs: 1,
            ..VisionConfig::default()
        };
        let err = analyze_page(&Slow, &page(10, 10), &config).await.unwrap_err();
        assert_eq!(err, VisionError::Timeout { page: 3, secs: 1 });
    }
}
