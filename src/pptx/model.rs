//! Slide-level model in EMU, between [`crate::layout`] and the XML writer.
//!
//! Everything here is already scaled and validated: the writer only
//! serialises, it never rejects.

use crate::layout::{Alignment, Color};

/// Position and size of a shape on the slide, in EMU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub x: i64,
    pub y: i64,
    pub cx: i64,
    pub cy: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub text: String,
    pub font: Option<String>,
    /// Hundredths of a point, as DrawingML `sz` expects.
    pub size: u32,
    pub bold: bool,
    pub italic: bool,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Paragraph {
    pub alignment: Alignment,
    pub runs: Vec<Run>,
}

/// Shape outline in EMU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outline {
    pub color: Color,
    pub width: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// A DrawingML preset such as `rect` or `ellipse`.
    Preset(&'static str),
    /// A straight connector; flips orient it inside its frame.
    Line { flip_h: bool, flip_v: bool },
    /// Polylines in frame-local EMU.
    Custom { paths: Vec<CustomPath> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomPath {
    pub points: Vec<(i64, i64)>,
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlideShape {
    TextBox {
        frame: Frame,
        paragraphs: Vec<Paragraph>,
        wrap: bool,
    },
    Shape {
        frame: Frame,
        geometry: Geometry,
        fill: Option<Color>,
        outline: Option<Outline>,
    },
    Picture {
        frame: Frame,
        /// Index into [`Presentation::media`].
        media: usize,
    },
}

/// One slide, shapes back-to-front.
#[derive(Debug, Clone, PartialEq)]
pub struct Slide {
    pub background: Option<Color>,
    pub shapes: Vec<SlideShape>,
}

/// A complete deck ready for packaging.
#[derive(Debug, Clone, Default)]
pub struct Presentation {
    pub width: i64,
    pub height: i64,
    pub title: Option<String>,
    pub slides: Vec<Slide>,
    /// PNG payloads, referenced by [`SlideShape::Picture::media`].
    pub media: Vec<Vec<u8>>,
}
