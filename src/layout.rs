//! Strategy-neutral page layout model.
//!
//! Every extraction strategy (direct, vision, image fallback) produces the
//! same [`PageLayout`]: a list of positioned, z-ordered [`LayoutElement`]s
//! in the page's own coordinate space. The Slide Builder only ever sees this
//! model, so adding a strategy never touches the PPTX code.
//!
//! ## Units
//!
//! Bounding boxes use a top-left origin and the units of the page that
//! produced them: PDF points for direct extraction, raster pixels for vision
//! analysis and the image fallback. [`PageLayout::page_width`] and
//! [`PageLayout::page_height`] are expressed in the same units, which is all
//! the builder needs to rescale to slide EMUs. Font sizes in [`TextRun`]
//! share those units too, so a single scale factor applies to geometry and
//! type alike.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ── Geometry ─────────────────────────────────────────────────────────────

/// Axis-aligned rectangle in page units, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Smallest box containing both corners, in any order.
    pub fn from_corners(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x: x0.min(x1),
            y: y0.min(y1),
            width: (x1 - x0).abs(),
            height: (y1 - y0).abs(),
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Finite coordinates and strictly positive extent.
    pub fn is_well_formed(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }

    /// Union of two boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = self.right().max(other.right());
        let y1 = self.bottom().max(other.bottom());
        BoundingBox::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Grow a degenerate dimension to at least `min` while keeping the centre.
    pub fn inflate_to(&self, min: f64) -> BoundingBox {
        let mut b = *self;
        if b.width < min {
            b.x -= (min - b.width) / 2.0;
            b.width = min;
        }
        if b.height < min {
            b.y -= (min - b.height) / 2.0;
            b.height = min;
        }
        b
    }
}

// ── Colour ───────────────────────────────────────────────────────────────

/// 24-bit sRGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RRGGBB` or `RRGGBB`; anything else is `None`.
    pub fn from_hex(s: &str) -> Option<Color> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        Some(Color { r, g, b })
    }

    /// Uppercase `RRGGBB` without the hash, as DrawingML expects.
    pub fn to_hex(&self) -> String {
        format!("{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// Build from unit-range components (PDF colour operands).
    pub fn from_unit(r: f64, g: f64, b: f64) -> Color {
        let c = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        Color::rgb(c(r), c(g), c(b))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.to_hex())
    }
}

// ── Text ─────────────────────────────────────────────────────────────────

/// Horizontal paragraph alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
    Justify,
}

impl Alignment {
    /// Lenient parse; unknown values fall back to left.
    pub fn parse(s: &str) -> Alignment {
        match s.trim().to_ascii_lowercase().as_str() {
            "center" | "centre" | "middle" => Alignment::Center,
            "right" => Alignment::Right,
            "justify" | "justified" => Alignment::Justify,
            _ => Alignment::Left,
        }
    }
}

/// A styled run of text. A `'\n'` inside `text` starts a new paragraph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub font_family: Option<String>,
    /// Font size in page units.
    pub size: f64,
    pub bold: bool,
    pub italic: bool,
    pub color: Color,
}

/// Ordered runs sharing one text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub runs: Vec<TextRun>,
    pub alignment: Alignment,
    /// Let the text frame wrap at its right edge. Direct extraction keeps
    /// lines as laid out in the PDF and sets this to `false`.
    pub wrap: bool,
}

impl TextBlock {
    /// Concatenated content of all runs.
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }
}

// ── Shapes ───────────────────────────────────────────────────────────────

/// One subpath of a freeform shape, in absolute page units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subpath {
    pub points: Vec<(f64, f64)>,
    pub closed: bool,
}

/// Geometry of a vector shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GeometryKind {
    Rectangle,
    Ellipse,
    /// Straight segment; endpoints in absolute page units.
    Line { from: (f64, f64), to: (f64, f64) },
    /// Polyline approximation of an arbitrary path.
    Freeform { subpaths: Vec<Subpath> },
}

/// Outline of a shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub color: Color,
    /// Line width in page units.
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeBlock {
    pub geometry: GeometryKind,
    pub fill: Option<Color>,
    pub stroke: Option<Stroke>,
}

// ── Images ───────────────────────────────────────────────────────────────

/// Where an image element's pixels came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSource {
    /// An image XObject embedded in the PDF, by resource name.
    Embedded { name: String },
    /// A region of the page raster (vision-detected figure).
    PageRegion,
    /// The whole page raster.
    PageRaster,
}

/// Pixel rectangle inside the referenced image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageBlock {
    /// Shared pixels; the page raster is referenced, not copied.
    #[serde(skip)]
    pub image: Arc<DynamicImage>,
    pub crop: Option<CropRect>,
    pub source: ImageSource,
}

impl ImageBlock {
    /// Dimensions after applying the crop.
    pub fn visible_size(&self) -> (u32, u32) {
        match self.crop {
            Some(c) => (c.width, c.height),
            None => (self.image.width(), self.image.height()),
        }
    }
}

// ── Elements ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub enum ElementKind {
    Text(TextBlock),
    Shape(ShapeBlock),
    Image(ImageBlock),
}

impl ElementKind {
    pub fn label(&self) -> &'static str {
        match self {
            ElementKind::Text(_) => "text",
            ElementKind::Shape(_) => "shape",
            ElementKind::Image(_) => "image",
        }
    }
}

/// A positioned element; higher `z` paints over lower `z`.
#[derive(Debug, Clone, Serialize)]
pub struct LayoutElement {
    pub kind: ElementKind,
    pub bbox: BoundingBox,
    pub z: u32,
}

// ── Page layout ──────────────────────────────────────────────────────────

/// The strategy that produced a page's layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    DirectExtraction,
    AiVision,
    ImageFallback,
}

impl ExtractionMethod {
    /// Wire label, e.g. `direct_extraction`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::DirectExtraction => "direct_extraction",
            ExtractionMethod::AiVision => "ai_vision",
            ExtractionMethod::ImageFallback => "image_fallback",
        }
    }

    /// Position in the fallback chain; lower is preferred.
    pub fn rank(&self) -> usize {
        match self {
            ExtractionMethod::DirectExtraction => 0,
            ExtractionMethod::AiVision => 1,
            ExtractionMethod::ImageFallback => 2,
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved description of one page, ready for the Slide Builder.
#[derive(Debug, Clone, Serialize)]
pub struct PageLayout {
    /// 0-based page index within the document.
    pub index: usize,
    pub page_width: f64,
    pub page_height: f64,
    pub elements: Vec<LayoutElement>,
    pub method: ExtractionMethod,
    pub background: Option<Color>,
}

impl PageLayout {
    /// Elements sorted back-to-front (stable for equal `z`).
    pub fn elements_in_paint_order(&self) -> Vec<&LayoutElement> {
        let mut sorted: Vec<&LayoutElement> = self.elements.iter().collect();
        sorted.sort_by_key(|e| e.z);
        sorted
    }
}
