//! Direct extraction: rebuild a page layout from the PDF's own structure.
//!
//! The content interpreter ([`super::content`]) yields a flat paint list.
//! This module turns that list into layout elements:
//!
//! * Text spans from one `BT … ET` object are joined into lines (same
//!   baseline) and lines into blocks (regular downward line spacing). Runs
//!   with identical style are merged so each text box carries as few runs
//!   as possible.
//! * Paths are classified into rectangles, ellipses, straight lines, or
//!   freeform polylines.
//! * Image XObjects become picture elements at their placed bounds.
//!
//! Element `z` follows the paint order of the first operator contributing to
//! the element, so overlapping content stacks exactly as in the PDF.
//!
//! A page is declined ([`ExtractError::NotExtractable`]) when it has no
//! structured content, produces no elements, or carries less visible text
//! than [`DirectConfig::min_text_chars`]; the orchestrator then moves it to
//! the next strategy.

use super::content::{interpret_page, InterpretOptions, PaintOp, PathPaint, PathSeg, Point, TextSpan};
use crate::config::DirectConfig;
use crate::document::Page;
use crate::error::ExtractError;
use crate::layout::{
    Alignment, BoundingBox, Color, ElementKind, ExtractionMethod, GeometryKind, ImageBlock,
    ImageSource, LayoutElement, PageLayout, ShapeBlock, Stroke, Subpath, TextBlock, TextRun,
};
use image::{GenericImageView, Pixel};
use std::sync::Arc;
use tracing::debug;

/// Baseline tolerance, as a fraction of font size, for spans on one line.
const SAME_LINE_TOLERANCE: f64 = 0.5;
/// Horizontal gap, as a fraction of font size, that implies a word space.
const WORD_GAP: f64 = 0.25;
/// Line advance, as a fraction of font size, above which a block ends.
const BLOCK_BREAK_GAP: f64 = 1.8;
/// Bezier curves are flattened into this many segments.
const CURVE_SEGMENTS: usize = 8;

/// Extract one page. CPU-bound; the orchestrator runs it on a blocking thread.
pub fn extract_page(page: &Page, config: &DirectConfig) -> Result<PageLayout, ExtractError> {
    let decline = |reason: &str| ExtractError::NotExtractable {
        page: page.number(),
        reason: reason.to_string(),
    };

    let content = page
        .content
        .as_ref()
        .ok_or_else(|| decline("no structured content"))?;

    let ops = interpret_page(
        content,
        InterpretOptions {
            max_images: config.max_images_per_page,
            max_image_dimension: config.max_image_dimension,
            max_form_depth: config.max_form_depth,
        },
    )
    .map_err(|e| decline(&format!("content stream: {e}")))?;

    let mut spans: Vec<TextSpan> = Vec::new();
    // (paint order, element)
    let mut placed: Vec<(usize, LayoutElement)> = Vec::new();
    for op in ops {
        let order = op.order();
        match op {
            PaintOp::Text(span) => spans.push(span),
            PaintOp::Path(path) => {
                if let Some(el) = shape_element(&path) {
                    placed.push((order, el));
                }
            }
            PaintOp::Image(img) => {
                let (x0, y0, x1, y1) = img.bounds;
                placed.push((
                    order,
                    LayoutElement {
                        kind: ElementKind::Image(ImageBlock {
                            image: Arc::new(img.image),
                            crop: None,
                            source: ImageSource::Embedded { name: img.name },
                        }),
                        bbox: BoundingBox::from_corners(x0, y0, x1, y1),
                        z: 0,
                    },
                ));
            }
        }
    }

    let visible_chars: usize = spans
        .iter()
        .map(|s| s.text.chars().filter(|c| !c.is_whitespace()).count())
        .sum();
    placed.extend(text_elements(&spans));

    if placed.is_empty() {
        return Err(decline("page produced no elements"));
    }
    if visible_chars < config.min_text_chars {
        return Err(decline(&format!(
            "{visible_chars} visible characters, below the minimum of {}",
            config.min_text_chars
        )));
    }

    placed.sort_by_key(|(order, _)| *order);
    let elements: Vec<LayoutElement> = placed
        .into_iter()
        .enumerate()
        .map(|(z, (_, mut el))| {
            el.z = z as u32;
            el
        })
        .collect();

    debug!(
        "Page {}: direct extraction found {} elements ({} chars)",
        page.number(),
        elements.len(),
        visible_chars
    );

    Ok(PageLayout {
        index: page.index,
        page_width: content.width(),
        page_height: content.height(),
        elements,
        method: ExtractionMethod::DirectExtraction,
        background: sample_background(page),
    })
}

/// Colour of the raster's top-left pixel.
pub(crate) fn sample_background(page: &Page) -> Option<Color> {
    let raster = page.raster.as_ref();
    if raster.width() == 0 || raster.height() == 0 {
        return None;
    }
    let px = raster.get_pixel(0, 0).to_rgb().0;
    Some(Color::rgb(px[0], px[1], px[2]))
}

// ── Text ─────────────────────────────────────────────────────────────────

struct Line<'s> {
    spans: Vec<&'s TextSpan>,
    baseline: f64,
    size: f64,
}

fn same_style(run: &TextRun, span: &TextSpan) -> bool {
    run.font_family == span.family
        && (run.size - span.size).abs() < 0.1
        && run.bold == span.bold
        && run.italic == span.italic
        && run.color == span.color
}

fn push_text(runs: &mut Vec<TextRun>, span: &TextSpan, text: &str) {
    if let Some(last) = runs.last_mut() {
        if same_style(last, span) {
            last.text.push_str(text);
            return;
        }
    }
    runs.push(TextRun {
        text: text.to_string(),
        font_family: span.family.clone(),
        size: span.size,
        bold: span.bold,
        italic: span.italic,
        color: span.color,
    });
}

/// Group spans into lines, then lines into blocks, one element per block.
fn text_elements(spans: &[TextSpan]) -> Vec<(usize, LayoutElement)> {
    let mut blocks: Vec<Vec<Line<'_>>> = Vec::new();
    let mut current_group = usize::MAX;

    for span in spans {
        let same_group = span.group == current_group;
        current_group = span.group;

        if !same_group {
            blocks.push(Vec::new());
        } else if let Some(line) = blocks.last_mut().and_then(|b| b.last_mut()) {
            let size = line.size.max(span.size);
            let advance = span.baseline - line.baseline;
            if advance.abs() <= SAME_LINE_TOLERANCE * size {
                line.size = size;
                line.spans.push(span);
                continue;
            }
            if advance < 0.0 || advance > BLOCK_BREAK_GAP * size {
                blocks.push(Vec::new());
            }
        }

        if let Some(block) = blocks.last_mut() {
            block.push(Line {
                spans: vec![span],
                baseline: span.baseline,
                size: span.size,
            });
        }
    }

    blocks
        .into_iter()
        .filter(|lines| !lines.is_empty())
        .filter_map(|lines| block_element(&lines))
        .collect()
}

fn block_element(lines: &[Line<'_>]) -> Option<(usize, LayoutElement)> {
    let mut runs: Vec<TextRun> = Vec::new();
    let mut bbox: Option<BoundingBox> = None;
    let mut first_order = usize::MAX;

    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            if let Some(last) = runs.last_mut() {
                last.text.push('\n');
            }
        }
        let mut spans = line.spans.clone();
        spans.sort_by(|a, b| a.x.total_cmp(&b.x));

        let mut cursor: Option<f64> = None;
        for span in spans {
            first_order = first_order.min(span.order);
            let mut text = span.text.clone();
            if let Some(end) = cursor {
                let previous_ends_blank = runs
                    .last()
                    .map(|r| r.text.ends_with(char::is_whitespace))
                    .unwrap_or(true);
                if span.x - end > WORD_GAP * span.size
                    && !previous_ends_blank
                    && !text.starts_with(char::is_whitespace)
                {
                    text.insert(0, ' ');
                }
            }
            cursor = Some(span.x + span.width);
            push_text(&mut runs, span, &text);

            let span_box = BoundingBox::new(
                span.x,
                span.baseline - 0.8 * span.size,
                span.width.max(span.size * 0.2),
                span.size,
            );
            bbox = Some(match bbox {
                Some(b) => b.union(&span_box),
                None => span_box,
            });
        }
    }

    let bbox = bbox?;
    Some((
        first_order,
        LayoutElement {
            kind: ElementKind::Text(TextBlock {
                runs,
                alignment: Alignment::Left,
                wrap: false,
            }),
            bbox,
            z: 0,
        },
    ))
}

// ── Shapes ───────────────────────────────────────────────────────────────

fn split_subpaths(segments: &[PathSeg]) -> Vec<Vec<PathSeg>> {
    let mut out: Vec<Vec<PathSeg>> = Vec::new();
    for seg in segments {
        match seg {
            PathSeg::MoveTo(_) => out.push(vec![*seg]),
            _ => match out.last_mut() {
                Some(sub) => sub.push(*seg),
                None => out.push(vec![*seg]),
            },
        }
    }
    out.retain(|s| s.iter().any(|seg| !matches!(seg, PathSeg::MoveTo(_) | PathSeg::Close)));
    out
}

fn bezier(p0: Point, p1: Point, p2: Point, p3: Point, t: f64) -> Point {
    let u = 1.0 - t;
    let a = u * u * u;
    let b = 3.0 * u * u * t;
    let c = 3.0 * u * t * t;
    let d = t * t * t;
    (
        a * p0.0 + b * p1.0 + c * p2.0 + d * p3.0,
        a * p0.1 + b * p1.1 + c * p2.1 + d * p3.1,
    )
}

/// Flatten one subpath into a polyline.
fn flatten(sub: &[PathSeg]) -> Subpath {
    let mut points: Vec<Point> = Vec::new();
    let mut closed = false;
    for seg in sub {
        match *seg {
            PathSeg::MoveTo(p) | PathSeg::LineTo(p) => points.push(p),
            PathSeg::CurveTo(c1, c2, end) => {
                let start = points.last().copied().unwrap_or(c1);
                for i in 1..=CURVE_SEGMENTS {
                    points.push(bezier(start, c1, c2, end, i as f64 / CURVE_SEGMENTS as f64));
                }
            }
            PathSeg::Close => closed = true,
        }
    }
    Subpath { points, closed }
}

fn points_bbox(points: impl IntoIterator<Item = Point>) -> Option<BoundingBox> {
    let mut iter = points.into_iter();
    let first = iter.next()?;
    let (mut x0, mut y0, mut x1, mut y1) = (first.0, first.1, first.0, first.1);
    for (x, y) in iter {
        x0 = x0.min(x);
        y0 = y0.min(y);
        x1 = x1.max(x);
        y1 = y1.max(y);
    }
    Some(BoundingBox::from_corners(x0, y0, x1, y1))
}

fn is_axis_aligned_rect(sub: &[PathSeg]) -> bool {
    let mut corners: Vec<Point> = Vec::new();
    for seg in sub {
        match seg {
            PathSeg::MoveTo(p) | PathSeg::LineTo(p) => corners.push(*p),
            PathSeg::Close => {}
            PathSeg::CurveTo(..) => return false,
        }
    }
    if corners.len() == 5 {
        let (a, b) = (corners[0], corners[4]);
        if (a.0 - b.0).abs() < 0.01 && (a.1 - b.1).abs() < 0.01 {
            corners.pop();
        }
    }
    if corners.len() != 4 {
        return false;
    }
    (0..4).all(|i| {
        let (a, b) = (corners[i], corners[(i + 1) % 4]);
        (a.0 - b.0).abs() < 0.01 || (a.1 - b.1).abs() < 0.01
    })
}

/// Four curves that return to their start, with one on-curve point at the
/// middle of each side of `bbox`. Anything else is drawn as a freeform.
fn is_ellipse_loop(sub: &[PathSeg], bbox: &BoundingBox) -> bool {
    let Some(PathSeg::MoveTo(start)) = sub.first() else {
        return false;
    };
    let ends: Vec<Point> = sub
        .iter()
        .filter_map(|seg| match seg {
            PathSeg::CurveTo(_, _, end) => Some(*end),
            _ => None,
        })
        .collect();
    if ends.len() != 4 || bbox.width <= 0.0 || bbox.height <= 0.0 {
        return false;
    }

    let tol = 0.5 + 0.02 * bbox.width.max(bbox.height);
    let near = |a: Point, b: Point| (a.0 - b.0).abs() <= tol && (a.1 - b.1).abs() <= tol;
    if !near(ends[3], *start) {
        return false;
    }

    let (cx, cy) = (bbox.x + bbox.width / 2.0, bbox.y + bbox.height / 2.0);
    let midpoints = [
        (cx, bbox.y),
        (bbox.x + bbox.width, cy),
        (cx, bbox.y + bbox.height),
        (bbox.x, cy),
    ];
    midpoints
        .iter()
        .all(|m| ends.iter().any(|e| near(*e, *m)))
}

/// Classify a painted path and compute its bounds.
pub(crate) fn classify_path(segments: &[PathSeg]) -> Option<(GeometryKind, BoundingBox)> {
    let subpaths = split_subpaths(segments);
    if subpaths.is_empty() {
        return None;
    }

    if let [sub] = subpaths.as_slice() {
        let curves = sub.iter().filter(|s| matches!(s, PathSeg::CurveTo(..))).count();
        let lines = sub.iter().filter(|s| matches!(s, PathSeg::LineTo(_))).count();

        if is_axis_aligned_rect(sub) {
            let flat = flatten(sub);
            return points_bbox(flat.points).map(|b| (GeometryKind::Rectangle, b));
        }
        if let [PathSeg::MoveTo(from), PathSeg::LineTo(to)] = sub.as_slice() {
            let bbox = BoundingBox::from_corners(from.0, from.1, to.0, to.1);
            return Some((GeometryKind::Line { from: *from, to: *to }, bbox));
        }
        if curves == 4 && lines == 0 {
            let flat = flatten(sub);
            if let Some(bbox) = points_bbox(flat.points.iter().copied()) {
                if is_ellipse_loop(sub, &bbox) {
                    return Some((GeometryKind::Ellipse, bbox));
                }
            }
        }
    }

    let flattened: Vec<Subpath> = subpaths.iter().map(|s| flatten(s)).collect();
    let bbox = points_bbox(flattened.iter().flat_map(|s| s.points.iter().copied()))?;
    Some((GeometryKind::Freeform { subpaths: flattened }, bbox))
}

fn shape_element(path: &PathPaint) -> Option<LayoutElement> {
    if path.fill.is_none() && path.stroke.is_none() {
        return None;
    }
    let (geometry, mut bbox) = classify_path(&path.segments)?;
    let stroke = path.stroke.map(|(color, width)| Stroke { color, width });

    // Hairlines and rules have a zero-extent side; give them the stroke's thickness.
    let min_extent = stroke.map(|s| s.width).unwrap_or(1.0).max(0.5);
    bbox = bbox.inflate_to(min_extent);

    // Open lines have no interior to fill.
    let fill = match geometry {
        GeometryKind::Line { .. } => None,
        _ => path.fill,
    };
    if fill.is_none() && stroke.is_none() {
        return None;
    }

    Some(LayoutElement {
        kind: ElementKind::Shape(ShapeBlock {
            geometry,
            fill,
            stroke,
        }),
        bbox,
        z: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(text: &str, x: f64, baseline: f64, width: f64, group: usize, order: usize) -> TextSpan {
        TextSpan {
            text: text.to_string(),
            x,
            baseline,
            width,
            size: 12.0,
            family: Some("Helvetica".into()),
            bold: false,
            italic: false,
            color: Color::BLACK,
            group,
            order,
        }
    }

    fn block_text(el: &LayoutElement) -> String {
        match &el.kind {
            ElementKind::Text(t) => t.text(),
            other => panic!("expected text, got {}", other.label()),
        }
    }

    #[test]
    fn spans_on_one_baseline_join_with_space() {
        let spans = vec![span("Hello", 72.0, 100.0, 30.0, 1, 0), span("world", 110.0, 100.0, 30.0, 1, 1)];
        let els = text_elements(&spans);
        assert_eq!(els.len(), 1);
        assert_eq!(block_text(&els[0].1), "Hello world");
    }

    #[test]
    fn regular_line_spacing_stays_in_one_block() {
        let spans = vec![span("One", 72.0, 100.0, 20.0, 1, 0), span("Two", 72.0, 114.0, 20.0, 1, 1)];
        let els = text_elements(&spans);
        assert_eq!(els.len(), 1);
        assert_eq!(block_text(&els[0].1), "One\nTwo");
    }

    #[test]
    fn large_gap_and_new_text_object_split_blocks() {
        let spans = vec![
            span("Title", 72.0, 100.0, 40.0, 1, 0),
            span("Far below", 72.0, 300.0, 60.0, 1, 1),
            span("Other object", 72.0, 312.0, 60.0, 2, 2),
        ];
        let els = text_elements(&spans);
        assert_eq!(els.len(), 3);
    }

    #[test]
    fn style_change_starts_new_run() {
        let mut bold = span("Bold", 110.0, 100.0, 30.0, 1, 1);
        bold.bold = true;
        let spans = vec![span("Plain", 72.0, 100.0, 30.0, 1, 0), bold];
        let els = text_elements(&spans);
        match &els[0].1.kind {
            ElementKind::Text(t) => {
                assert_eq!(t.runs.len(), 2);
                assert!(t.runs[1].bold);
                assert!(!t.wrap);
            }
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn classifies_rectangle_line_and_freeform() {
        let rect = [
            PathSeg::MoveTo((10.0, 10.0)),
            PathSeg::LineTo((110.0, 10.0)),
            PathSeg::LineTo((110.0, 60.0)),
            PathSeg::LineTo((10.0, 60.0)),
            PathSeg::Close,
        ];
        let (kind, bbox) = classify_path(&rect).unwrap();
        assert_eq!(kind, GeometryKind::Rectangle);
        assert_eq!(bbox, BoundingBox::new(10.0, 10.0, 100.0, 50.0));

        let line = [PathSeg::MoveTo((0.0, 5.0)), PathSeg::LineTo((50.0, 5.0))];
        let (kind, _) = classify_path(&line).unwrap();
        assert!(matches!(kind, GeometryKind::Line { .. }));

        let triangle = [
            PathSeg::MoveTo((0.0, 0.0)),
            PathSeg::LineTo((10.0, 10.0)),
            PathSeg::LineTo((0.0, 10.0)),
            PathSeg::Close,
        ];
        let (kind, _) = classify_path(&triangle).unwrap();
        assert!(matches!(kind, GeometryKind::Freeform { .. }));
    }

    #[test]
    fn four_curves_make_an_ellipse() {
        let k = 0.5523 * 10.0;
        let segs = [
            PathSeg::MoveTo((20.0, 10.0)),
            PathSeg::CurveTo((20.0, 10.0 + k), (10.0 + k, 20.0), (10.0, 20.0)),
            PathSeg::CurveTo((10.0 - k, 20.0), (0.0, 10.0 + k), (0.0, 10.0)),
            PathSeg::CurveTo((0.0, 10.0 - k), (10.0 - k, 0.0), (10.0, 0.0)),
            PathSeg::CurveTo((10.0 + k, 0.0), (20.0, 10.0 - k), (20.0, 10.0)),
            PathSeg::Close,
        ];
        let (kind, bbox) = classify_path(&segs).unwrap();
        assert_eq!(kind, GeometryKind::Ellipse);
        assert!((bbox.width - 20.0).abs() < 0.5);
    }

    #[test]
    fn open_wave_is_freeform() {
        let segs = [
            PathSeg::MoveTo((0.0, 0.0)),
            PathSeg::CurveTo((5.0, 10.0), (10.0, 10.0), (15.0, 0.0)),
            PathSeg::CurveTo((20.0, -10.0), (25.0, -10.0), (30.0, 0.0)),
            PathSeg::CurveTo((35.0, 10.0), (40.0, 10.0), (45.0, 0.0)),
            PathSeg::CurveTo((50.0, -10.0), (55.0, -10.0), (60.0, 0.0)),
        ];
        let (kind, _) = classify_path(&segs).unwrap();
        assert!(matches!(kind, GeometryKind::Freeform { .. }), "got {kind:?}");
    }

    #[test]
    fn closed_lopsided_loop_is_freeform() {
        // Closed, but the on-curve points sit at the corners, not the sides.
        let segs = [
            PathSeg::MoveTo((0.0, 0.0)),
            PathSeg::CurveTo((10.0, -5.0), (20.0, -5.0), (30.0, 0.0)),
            PathSeg::CurveTo((35.0, 10.0), (35.0, 20.0), (30.0, 30.0)),
            PathSeg::CurveTo((20.0, 35.0), (10.0, 35.0), (0.0, 30.0)),
            PathSeg::CurveTo((-5.0, 20.0), (-5.0, 10.0), (0.0, 0.0)),
            PathSeg::Close,
        ];
        let (kind, _) = classify_path(&segs).unwrap();
        assert!(matches!(kind, GeometryKind::Freeform { .. }), "got {kind:?}");
    }

    #[test]
    fn background_is_the_top_left_pixel() {
        let mut img = image::RgbaImage::from_pixel(4, 3, image::Rgba([255, 255, 255, 255]));
        img.put_pixel(0, 0, image::Rgba([12, 34, 56, 255]));
        let page = Page {
            index: 0,
            raster: Arc::new(image::DynamicImage::ImageRgba8(img)),
            content: None,
        };
        assert_eq!(sample_background(&page), Some(Color::rgb(12, 34, 56)));

        let empty = Page {
            index: 1,
            raster: Arc::new(image::DynamicImage::new_rgb8(0, 0)),
            content: None,
        };
        assert_eq!(sample_background(&empty), None);
    }

    #[test]
    fn stroked_rule_gets_thickness() {
        let path = PathPaint {
            segments: vec![PathSeg::MoveTo((0.0, 50.0)), PathSeg::LineTo((200.0, 50.0))],
            fill: None,
            stroke: Some((Color::BLACK, 2.0)),
            order: 0,
        };
        let el = shape_element(&path).unwrap();
        assert_eq!(el.bbox.height, 2.0);
        assert!(el.bbox.is_well_formed());
    }

    #[test]
    fn unpainted_path_is_ignored() {
        let path = PathPaint {
            segments: vec![PathSeg::MoveTo((0.0, 0.0)), PathSeg::LineTo((10.0, 10.0))],
            fill: Some(Color::WHITE),
            stroke: None,
            order: 0,
        };
        assert!(shape_element(&path).is_none());
    }
}
