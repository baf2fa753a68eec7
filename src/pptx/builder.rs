//! Slide Builder: [`PageLayout`] → [`Slide`].
//!
//! One layout becomes one slide. The page is scaled uniformly to fit the
//! slide and centred, so aspect ratio is preserved and the spare axis is
//! letterboxed. Font sizes and stroke widths go through the same scale as
//! geometry.
//!
//! Elements are emitted in paint order (`z` ascending, stable). An element
//! whose geometry is degenerate, or an image that cannot be encoded, becomes
//! a [`BuildError`] and is left off the slide; the rest of the slide is
//! unaffected.

use super::model::{
    CustomPath, Frame, Geometry, Outline, Paragraph, Presentation, Run, Slide, SlideShape,
};
use crate::error::BuildError;
use crate::layout::{
    ElementKind, GeometryKind, ImageBlock, LayoutElement, PageLayout, ShapeBlock, TextBlock,
};
use crate::pipeline::encode::png_bytes;
use tracing::warn;

/// EMU per typographic point.
const EMU_PER_PT: f64 = 12_700.0;
/// DrawingML accepts run sizes from 1pt to 4000pt.
const MIN_FONT_HUNDREDTHS: u32 = 100;
const MAX_FONT_HUNDREDTHS: u32 = 400_000;

/// Page-units → EMU mapping for one slide.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlideTransform {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl SlideTransform {
    /// Uniform fit of a `page_w × page_h` page into the slide, centred.
    pub fn fit(page_w: f64, page_h: f64, slide: (i64, i64)) -> Self {
        let (sw, sh) = (slide.0 as f64, slide.1 as f64);
        if !(page_w > 0.0 && page_h > 0.0) {
            return Self {
                scale: 1.0,
                offset_x: 0.0,
                offset_y: 0.0,
            };
        }
        let scale = (sw / page_w).min(sh / page_h);
        Self {
            scale,
            offset_x: (sw - page_w * scale) / 2.0,
            offset_y: (sh - page_h * scale) / 2.0,
        }
    }

    fn x(&self, v: f64) -> i64 {
        (self.offset_x + v * self.scale).round() as i64
    }

    fn y(&self, v: f64) -> i64 {
        (self.offset_y + v * self.scale).round() as i64
    }

    fn len(&self, v: f64) -> i64 {
        ((v * self.scale).round() as i64).max(1)
    }
}

/// Build the slide for one page. Dropped elements are returned alongside.
pub fn build_slide(
    layout: &PageLayout,
    slide_size: (i64, i64),
    media: &mut Vec<Vec<u8>>,
) -> (Slide, Vec<BuildError>) {
    let t = SlideTransform::fit(layout.page_width, layout.page_height, slide_size);
    let page = layout.index + 1;
    let mut shapes = Vec::with_capacity(layout.elements.len());
    let mut dropped = Vec::new();

    for el in layout.elements_in_paint_order() {
        match build_element(el, &t, media, page) {
            Ok(Some(shape)) => shapes.push(shape),
            Ok(None) => {}
            Err(e) => {
                warn!("{}", e);
                dropped.push(e);
            }
        }
    }

    (
        Slide {
            background: layout.background,
            shapes,
        },
        dropped,
    )
}

fn build_element(
    el: &LayoutElement,
    t: &SlideTransform,
    media: &mut Vec<Vec<u8>>,
    page: usize,
) -> Result<Option<SlideShape>, BuildError> {
    let b = &el.bbox;
    if !b.is_well_formed() {
        return Err(BuildError::MalformedGeometry {
            page,
            z: el.z,
            width: b.width,
            height: b.height,
        });
    }
    let frame = Frame {
        x: t.x(b.x),
        y: t.y(b.y),
        cx: t.len(b.width),
        cy: t.len(b.height),
    };

    Ok(match &el.kind {
        ElementKind::Text(block) => text_box(block, frame, t),
        ElementKind::Shape(shape) => Some(shape_of(shape, el, frame, t)),
        ElementKind::Image(img) => {
            let png = encode_image(img, el.z, page)?;
            media.push(png);
            Some(SlideShape::Picture {
                frame,
                media: media.len() - 1,
            })
        }
    })
}

fn font_size(size: f64, t: &SlideTransform) -> u32 {
    let pt = size * t.scale / EMU_PER_PT;
    ((pt * 100.0).round() as u32).clamp(MIN_FONT_HUNDREDTHS, MAX_FONT_HUNDREDTHS)
}

/// Split runs at `'\n'` into paragraphs. `None` when there is no text.
fn text_box(block: &TextBlock, frame: Frame, t: &SlideTransform) -> Option<SlideShape> {
    let mut paragraphs = vec![Paragraph {
        alignment: block.alignment,
        runs: Vec::new(),
    }];

    for run in &block.runs {
        for (i, part) in run.text.split('\n').enumerate() {
            if i > 0 {
                paragraphs.push(Paragraph {
                    alignment: block.alignment,
                    runs: Vec::new(),
                });
            }
            if part.is_empty() {
                continue;
            }
            if let Some(p) = paragraphs.last_mut() {
                p.runs.push(Run {
                    text: part.to_string(),
                    font: run.font_family.clone(),
                    size: font_size(run.size, t),
                    bold: run.bold,
                    italic: run.italic,
                    color: run.color,
                });
            }
        }
    }

    if paragraphs.iter().all(|p| p.runs.iter().all(|r| r.text.trim().is_empty())) {
        return None;
    }
    Some(SlideShape::TextBox {
        frame,
        paragraphs,
        wrap: block.wrap,
    })
}

fn shape_of(shape: &ShapeBlock, el: &LayoutElement, frame: Frame, t: &SlideTransform) -> SlideShape {
    let geometry = match &shape.geometry {
        GeometryKind::Rectangle => Geometry::Preset("rect"),
        GeometryKind::Ellipse => Geometry::Preset("ellipse"),
        GeometryKind::Line { from, to } => Geometry::Line {
            flip_h: to.0 < from.0,
            flip_v: to.1 < from.1,
        },
        GeometryKind::Freeform { subpaths } => Geometry::Custom {
            paths: subpaths
                .iter()
                .map(|sp| CustomPath {
                    points: sp
                        .points
                        .iter()
                        .map(|(x, y)| {
                            (
                                (((x - el.bbox.x) * t.scale).round() as i64).clamp(0, frame.cx),
                                (((y - el.bbox.y) * t.scale).round() as i64).clamp(0, frame.cy),
                            )
                        })
                        .collect(),
                    closed: sp.closed,
                })
                .collect(),
        },
    };
    SlideShape::Shape {
        frame,
        geometry,
        fill: shape.fill,
        outline: shape.stroke.map(|s| Outline {
            color: s.color,
            width: t.len(s.width),
        }),
    }
}

/// PNG bytes for an image element, cropping first when requested.
fn encode_image(img: &ImageBlock, z: u32, page: usize) -> Result<Vec<u8>, BuildError> {
    let fail = |detail: String| BuildError::ImageEncoding { page, z, detail };
    let (vw, vh) = img.visible_size();
    if vw == 0 || vh == 0 {
        return Err(fail(format!("empty {vw}x{vh} image")));
    }
    let encoded = match img.crop {
        Some(c) => {
            let (w, h) = (img.image.width(), img.image.height());
            if c.x.saturating_add(c.width) > w || c.y.saturating_add(c.height) > h {
                return Err(fail(format!(
                    "crop {}x{}+{}+{} outside {}x{} image",
                    c.width, c.height, c.x, c.y, w, h
                )));
            }
            png_bytes(&img.image.crop_imm(c.x, c.y, c.width, c.height))
        }
        None => png_bytes(&img.image),
    };
    encoded.map_err(|e| fail(e.to_string()))
}

/// Assemble a presentation from resolved layouts, one slide each, in order.
pub fn build_presentation<'a>(
    layouts: impl IntoIterator<Item = &'a PageLayout>,
    slide_size: (i64, i64),
    title: Option<String>,
) -> (Presentation, Vec<Vec<BuildError>>) {
    let mut pres = Presentation {
        width: slide_size.0,
        height: slide_size.1,
        title,
        ..Presentation::default()
    };
    let mut dropped = Vec::new();
    for layout in layouts {
        let (slide, errs) = build_slide(layout, slide_size, &mut pres.media);
        pres.slides.push(slide);
        dropped.push(errs);
    }
    (pres, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{
        Alignment, BoundingBox, Color, CropRect, ExtractionMethod, ImageSource, Stroke, TextRun,
    };
    use image::{DynamicImage, RgbImage};
    use std::sync::Arc;

    const WIDE: (i64, i64) = (12_192_000, 6_858_000);

    fn layout(w: f64, h: f64, elements: Vec<LayoutElement>) -> PageLayout {
        PageLayout {
            index: 0,
            page_width: w,
            page_height: h,
            elements,
            method: ExtractionMethod::DirectExtraction,
            background: Some(Color::WHITE),
        }
    }

    fn rect(bbox: BoundingBox, z: u32) -> LayoutElement {
        LayoutElement {
            kind: ElementKind::Shape(ShapeBlock {
                geometry: GeometryKind::Rectangle,
                fill: Some(Color::rgb(0x2c, 0x3e, 0x50)),
                stroke: Some(Stroke {
                    color: Color::BLACK,
                    width: 1.0,
                }),
            }),
            bbox,
            z,
        }
    }

    fn text(s: &str, size: f64, z: u32) -> LayoutElement {
        LayoutElement {
            kind: ElementKind::Text(TextBlock {
                runs: vec![TextRun {
                    text: s.to_string(),
                    font_family: Some("Arial".into()),
                    size,
                    bold: false,
                    italic: false,
                    color: Color::BLACK,
                }],
                alignment: Alignment::Left,
                wrap: true,
            }),
            bbox: BoundingBox::new(10.0, 10.0, 100.0, 20.0),
            z,
        }
    }

    #[test]
    fn same_aspect_fills_slide() {
        let t = SlideTransform::fit(960.0, 540.0, WIDE);
        assert_eq!(t.offset_x, 0.0);
        assert!(t.offset_y.abs() < 1e-6);
        assert!((t.scale - 12_700.0).abs() < 1e-9);
    }

    #[test]
    fn portrait_page_is_pillarboxed() {
        // US Letter portrait on a 16:9 slide.
        let t = SlideTransform::fit(612.0, 792.0, WIDE);
        assert!((792.0 * t.scale - 6_858_000.0).abs() < 1.0);
        assert!(t.offset_x > 0.0);
        assert_eq!(t.offset_y, 0.0);
        let used = 612.0 * t.scale;
        assert!((t.offset_x * 2.0 + used - 12_192_000.0).abs() < 1.0);
    }

    #[test]
    fn preserves_paint_order() {
        let l = layout(
            960.0,
            540.0,
            vec![
                text("front", 12.0, 2),
                rect(BoundingBox::new(0.0, 0.0, 960.0, 100.0), 0),
                text("mid", 12.0, 1),
            ],
        );
        let (slide, dropped) = build_slide(&l, WIDE, &mut Vec::new());
        assert!(dropped.is_empty());
        let kinds: Vec<&str> = slide
            .shapes
            .iter()
            .map(|s| match s {
                SlideShape::TextBox { paragraphs, .. } => paragraphs[0].runs[0].text.as_str(),
                SlideShape::Shape { .. } => "shape",
                SlideShape::Picture { .. } => "picture",
            })
            .collect();
        assert_eq!(kinds, vec!["shape", "mid", "front"]);
    }

    #[test]
    fn malformed_element_is_dropped_alone() {
        let l = layout(
            960.0,
            540.0,
            vec![rect(BoundingBox::new(0.0, 0.0, 0.0, 10.0), 0), text("kept", 12.0, 1)],
        );
        let (slide, dropped) = build_slide(&l, WIDE, &mut Vec::new());
        assert_eq!(slide.shapes.len(), 1);
        assert_eq!(
            dropped,
            vec![BuildError::MalformedGeometry {
                page: 1,
                z: 0,
                width: 0.0,
                height: 10.0
            }]
        );
    }

    #[test]
    fn font_size_scales_with_page() {
        // 960pt-wide page on a 960pt-wide slide: 24 units stay 24pt.
        let l = layout(960.0, 540.0, vec![text("Title", 24.0, 0)]);
        let (slide, _) = build_slide(&l, WIDE, &mut Vec::new());
        match &slide.shapes[0] {
            SlideShape::TextBox { paragraphs, .. } => assert_eq!(paragraphs[0].runs[0].size, 2400),
            _ => panic!("expected text box"),
        }

        // Same page rendered at 2x in pixels: 48px becomes 24pt.
        let l = layout(1920.0, 1080.0, vec![text("Title", 48.0, 0)]);
        let (slide, _) = build_slide(&l, WIDE, &mut Vec::new());
        match &slide.shapes[0] {
            SlideShape::TextBox { paragraphs, .. } => assert_eq!(paragraphs[0].runs[0].size, 2400),
            _ => panic!("expected text box"),
        }
    }

    #[test]
    fn newlines_split_paragraphs() {
        let l = layout(960.0, 540.0, vec![text("one\ntwo\n\nfour", 12.0, 0)]);
        let (slide, _) = build_slide(&l, WIDE, &mut Vec::new());
        match &slide.shapes[0] {
            SlideShape::TextBox { paragraphs, .. } => {
                assert_eq!(paragraphs.len(), 4);
                assert!(paragraphs[2].runs.is_empty());
                assert_eq!(paragraphs[3].runs[0].text, "four");
            }
            _ => panic!("expected text box"),
        }
    }

    #[test]
    fn images_become_media_and_bad_crops_are_dropped() {
        let raster = Arc::new(DynamicImage::ImageRgb8(RgbImage::new(100, 50)));
        let image = |crop, z| LayoutElement {
            kind: ElementKind::Image(ImageBlock {
                image: Arc::clone(&raster),
                crop,
                source: ImageSource::PageRegion,
            }),
            bbox: BoundingBox::new(0.0, 0.0, 50.0, 25.0),
            z,
        };
        let l = layout(
            100.0,
            50.0,
            vec![
                image(
                    Some(CropRect {
                        x: 10,
                        y: 10,
                        width: 20,
                        height: 20,
                    }),
                    0,
                ),
                image(
                    Some(CropRect {
                        x: 90,
                        y: 0,
                        width: 0,
                        height: 10,
                    }),
                    1,
                ),
            ],
        );
        let mut media = Vec::new();
        let (slide, dropped) = build_slide(&l, WIDE, &mut media);
        assert_eq!(media.len(), 1);
        assert_eq!(slide.shapes.len(), 1);
        assert!(matches!(slide.shapes[0], SlideShape::Picture { media: 0, .. }));
        assert!(matches!(dropped[0], BuildError::ImageEncoding { z: 1, .. }));
        let decoded = image::load_from_memory(&media[0]).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 20));
    }
}
