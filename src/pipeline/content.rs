//! PDF content-stream interpretation.
//!
//! Walks a page's content stream with lopdf and produces a flat paint list
//! ([`PaintOp`]) in device space: top-left origin, PDF points, relative to
//! the MediaBox. Every op carries its paint order so the direct extractor can
//! preserve z-order exactly.
//!
//! The interpreter covers what slide decks actually use: the graphics state
//! stack, `cm`, colour operators in Gray/RGB/CMYK, path construction and
//! painting, the text state and text-showing operators, image XObjects, and
//! Form XObjects (recursively, up to a depth limit). Clipping, shading and
//! patterns are ignored; they do not change what is editable.
//!
//! Text decoding uses a font's `/ToUnicode` CMap when present, otherwise a
//! Latin-1 reading of the byte codes. Glyph advances come from `/Widths`
//! (simple fonts) or `/W` (CID fonts) so span widths are close to the real
//! rendered extent.

use crate::document::PageContent;
use crate::layout::Color;
use image::{imageops::FilterType, DynamicImage, GrayImage, RgbImage};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

// ── Object helpers ───────────────────────────────────────────────────────

pub(crate) fn object_to_f64(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(f) => Some(*f as f64),
        _ => None,
    }
}

/// Follow one level of indirection.
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        other => other,
    }
}

/// Look up a page attribute, walking `/Parent` for inherited keys.
pub(crate) fn resolve_inherited<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Option<&'a Object> {
    let mut current = page_id;
    // Bounded walk: malformed trees can contain /Parent cycles.
    for _ in 0..64 {
        let dict = doc.get_object(current).and_then(|o| o.as_dict()).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(resolve(doc, value));
        }
        current = dict.get(b"Parent").and_then(|p| p.as_reference()).ok()?;
    }
    None
}

/// MediaBox as `[x0, y0, x1, y1]`, normalised; US Letter when absent.
pub(crate) fn media_box(doc: &Document, page_id: ObjectId) -> [f64; 4] {
    resolve_inherited(doc, page_id, b"MediaBox")
        .and_then(|o| o.as_array().ok())
        .and_then(|arr| {
            let v: Vec<f64> = arr
                .iter()
                .filter_map(|o| object_to_f64(resolve(doc, o)))
                .collect();
            (v.len() == 4).then(|| [v[0].min(v[2]), v[1].min(v[3]), v[0].max(v[2]), v[1].max(v[3])])
        })
        .filter(|b| b[2] - b[0] > 0.0 && b[3] - b[1] > 0.0)
        .unwrap_or([0.0, 0.0, 612.0, 792.0])
}

/// Decode a PDF text string (UTF-16BE with BOM, UTF-8, or PDFDocEncoding).
pub(crate) fn decode_text_string(raw: &[u8]) -> String {
    if raw.len() >= 2 && raw[0] == 0xFE && raw[1] == 0xFF {
        let units: Vec<u16> = raw[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if raw.len() >= 3 && raw[0] == 0xEF && raw[1] == 0xBB && raw[2] == 0xBF {
        return String::from_utf8_lossy(&raw[3..]).to_string();
    }
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => raw.iter().map(|&b| b as char).collect(),
    }
}

fn name_of(obj: &Object) -> &[u8] {
    obj.as_name().unwrap_or_default()
}

// ── Matrix ───────────────────────────────────────────────────────────────

/// PDF affine matrix `[a b c d e f]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0);

    pub const fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn translate(tx: f64, ty: f64) -> Self {
        Matrix::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    fn from_operands(ops: &[Object]) -> Option<Matrix> {
        if ops.len() < 6 {
            return None;
        }
        let v: Vec<f64> = ops[..6].iter().filter_map(object_to_f64).collect();
        (v.len() == 6).then(|| Matrix::new(v[0], v[1], v[2], v[3], v[4], v[5]))
    }

    /// `self × other`: apply `self` first, then `other`.
    pub fn concat(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    /// Length of the transformed unit y-vector (vertical scale).
    pub fn y_scale(&self) -> f64 {
        (self.c * self.c + self.d * self.d).sqrt()
    }

    /// Geometric-mean scale, used for line widths.
    pub fn mean_scale(&self) -> f64 {
        (self.a * self.d - self.b * self.c).abs().sqrt()
    }
}

// ── Paint list ───────────────────────────────────────────────────────────

pub(crate) type Point = (f64, f64);

/// Path segment in device space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum PathSeg {
    MoveTo(Point),
    LineTo(Point),
    CurveTo(Point, Point, Point),
    Close,
}

/// A shown string with its resolved style and device position.
#[derive(Debug, Clone)]
pub(crate) struct TextSpan {
    pub text: String,
    pub x: f64,
    pub baseline: f64,
    pub width: f64,
    /// Effective font size in points.
    pub size: f64,
    pub family: Option<String>,
    pub bold: bool,
    pub italic: bool,
    pub color: Color,
    /// Index of the enclosing `BT … ET` object.
    pub group: usize,
    pub order: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct PathPaint {
    pub segments: Vec<PathSeg>,
    pub fill: Option<Color>,
    pub stroke: Option<(Color, f64)>,
    pub order: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct ImagePaint {
    pub name: String,
    pub image: DynamicImage,
    /// Device-space corners of the unit square, as `(x0, y0, x1, y1)`.
    pub bounds: (f64, f64, f64, f64),
    pub order: usize,
}

#[derive(Debug, Clone)]
pub(crate) enum PaintOp {
    Text(TextSpan),
    Path(PathPaint),
    Image(ImagePaint),
}

impl PaintOp {
    pub fn order(&self) -> usize {
        match self {
            PaintOp::Text(t) => t.order,
            PaintOp::Path(p) => p.order,
            PaintOp::Image(i) => i.order,
        }
    }
}

/// Limits applied while interpreting.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InterpretOptions {
    pub max_images: usize,
    pub max_image_dimension: u32,
    pub max_form_depth: usize,
}

// ── Fonts ────────────────────────────────────────────────────────────────

static SUBSET_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{6}\+").unwrap());
static CMAP_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([0-9A-Fa-f\s]*)>|\[|\]").unwrap());

/// Split a PostScript font name into `(family, bold, italic)`.
///
/// `ABCDEF+Montserrat-SemiBoldItalic` → `("Montserrat", true, true)`,
/// `Arial,Bold` → `("Arial", true, false)`, `ArialMT` → `("Arial", …)`.
pub(crate) fn clean_font_name(base: &str) -> (String, bool, bool) {
    let name = SUBSET_PREFIX.replace(base, "");
    let lower = name.to_ascii_lowercase();
    let bold = ["bold", "black", "heavy", "semibold", "demi"]
        .iter()
        .any(|k| lower.contains(k));
    let italic = lower.contains("italic") || lower.contains("oblique");

    let family = name.split(['-', ',']).next().unwrap_or(name.as_ref());
    let family = family
        .strip_suffix("PSMT")
        .or_else(|| family.strip_suffix("MT"))
        .unwrap_or(family);
    (family.to_string(), bold, italic)
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FontInfo {
    pub family: Option<String>,
    pub bold: bool,
    pub italic: bool,
    two_byte: bool,
    to_unicode: Option<HashMap<u32, String>>,
    widths: HashMap<u32, f64>,
    default_width: f64,
}

impl FontInfo {
    fn load(doc: &Document, dict: &Dictionary) -> FontInfo {
        let base = dict
            .get(b"BaseFont")
            .map(|o| String::from_utf8_lossy(name_of(resolve(doc, o))).to_string())
            .unwrap_or_default();
        let two_byte = dict
            .get(b"Subtype")
            .map(|o| name_of(o) == b"Type0")
            .unwrap_or(false);

        let (family, mut bold, mut italic) = if base.is_empty() {
            (None, false, false)
        } else {
            let (family, bold, italic) = clean_font_name(&base);
            (Some(family).filter(|f| !f.is_empty()), bold, italic)
        };

        let to_unicode = dict
            .get(b"ToUnicode")
            .ok()
            .and_then(|o| resolve(doc, o).as_stream().ok())
            .map(|s| s.decompressed_content().unwrap_or_else(|_| s.content.clone()))
            .map(|data| parse_to_unicode(&data))
            .filter(|m| !m.is_empty());

        let mut widths = HashMap::new();
        let mut default_width = 500.0;
        let descriptor_owner;
        if two_byte {
            default_width = 1000.0;
            let descendant = dict
                .get(b"DescendantFonts")
                .ok()
                .and_then(|o| resolve(doc, o).as_array().ok())
                .and_then(|arr| arr.first())
                .and_then(|o| resolve(doc, o).as_dict().ok());
            if let Some(cid) = descendant {
                if let Some(dw) = cid.get(b"DW").ok().and_then(|o| object_to_f64(resolve(doc, o))) {
                    default_width = dw;
                }
                if let Some(w) = cid.get(b"W").ok().and_then(|o| resolve(doc, o).as_array().ok()) {
                    parse_cid_widths(doc, w, &mut widths);
                }
            }
            descriptor_owner = descendant;
        } else {
            let first = dict
                .get(b"FirstChar")
                .ok()
                .and_then(|o| object_to_f64(resolve(doc, o)))
                .unwrap_or(0.0) as u32;
            if let Some(arr) = dict.get(b"Widths").ok().and_then(|o| resolve(doc, o).as_array().ok()) {
                for (i, w) in arr.iter().enumerate() {
                    if let Some(w) = object_to_f64(resolve(doc, w)) {
                        widths.insert(first + i as u32, w);
                    }
                }
            }
            descriptor_owner = Some(dict);
        }

        // FontDescriptor flags: bit 7 italic, bit 19 force-bold.
        if let Some(desc) = descriptor_owner
            .and_then(|d| d.get(b"FontDescriptor").ok())
            .and_then(|o| resolve(doc, o).as_dict().ok())
        {
            let flags = desc
                .get(b"Flags")
                .ok()
                .and_then(|o| object_to_f64(resolve(doc, o)))
                .unwrap_or(0.0) as u32;
            italic |= flags & (1 << 6) != 0;
            bold |= flags & (1 << 18) != 0;
            if let Some(weight) = desc.get(b"FontWeight").ok().and_then(|o| object_to_f64(resolve(doc, o))) {
                bold |= weight >= 600.0;
            }
        }

        FontInfo {
            family,
            bold,
            italic,
            two_byte,
            to_unicode,
            widths,
            default_width,
        }
    }

    /// Split a string operand into `(code, unicode)` pairs.
    fn decode(&self, bytes: &[u8]) -> Vec<(u32, String)> {
        let codes: Vec<u32> = if self.two_byte {
            bytes
                .chunks(2)
                .map(|ch| match ch {
                    [hi, lo] => ((*hi as u32) << 8) | *lo as u32,
                    [single] => *single as u32,
                    _ => 0,
                })
                .collect()
        } else {
            bytes.iter().map(|&b| b as u32).collect()
        };

        codes
            .into_iter()
            .map(|code| {
                let text = self
                    .to_unicode
                    .as_ref()
                    .and_then(|m| m.get(&code).cloned())
                    .unwrap_or_else(|| fallback_char(code, self.two_byte));
                (code, text)
            })
            .collect()
    }

    fn width(&self, code: u32) -> f64 {
        self.widths.get(&code).copied().unwrap_or(self.default_width)
    }
}

fn fallback_char(code: u32, two_byte: bool) -> String {
    if two_byte {
        return char::from_u32(code)
            .filter(|c| !c.is_control())
            .map(String::from)
            .unwrap_or_default();
    }
    match code {
        0x09 | 0x0A | 0x0D => " ".to_string(),
        c if c < 0x20 => String::new(),
        c => char::from_u32(c).map(String::from).unwrap_or_default(),
    }
}

/// `/W` array: `c [w1 w2 …]` and `c_first c_last w` forms.
fn parse_cid_widths(doc: &Document, w: &[Object], out: &mut HashMap<u32, f64>) {
    let mut i = 0;
    while i < w.len() {
        let Some(start) = object_to_f64(resolve(doc, &w[i])) else {
            break;
        };
        let start = start as u32;
        match w.get(i + 1).map(|o| resolve(doc, o)) {
            Some(Object::Array(list)) => {
                for (k, v) in list.iter().enumerate() {
                    let Some(code) = u32::try_from(k).ok().and_then(|k| start.checked_add(k)) else {
                        break;
                    };
                    if let Some(v) = object_to_f64(resolve(doc, v)) {
                        out.insert(code, v);
                    }
                }
                i += 2;
            }
            Some(end_obj) => {
                let end = object_to_f64(end_obj);
                let width = w.get(i + 2).and_then(|o| object_to_f64(resolve(doc, o)));
                if let (Some(end), Some(width)) = (end, width) {
                    // A single range never spans more than 64K codes.
                    for code in start..=(end as u32).min(start.saturating_add(0xFFFF)) {
                        out.insert(code, width);
                    }
                }
                i += 3;
            }
            None => break,
        }
    }
}

enum CmapToken<'t> {
    Hex(&'t str),
    Open,
    Close,
}

fn hex_code(hex: &str) -> Option<u32> {
    let digits: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.is_empty() || digits.len() > 8 {
        return None;
    }
    u32::from_str_radix(&digits, 16).ok()
}

fn utf16_units(hex: &str) -> Vec<u16> {
    let digits: Vec<char> = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() <= 2 {
        return hex_code(hex).map(|v| vec![v as u16]).unwrap_or_default();
    }
    digits
        .chunks(4)
        .filter_map(|chunk| {
            let s: String = chunk.iter().collect();
            u16::from_str_radix(&s, 16).ok()
        })
        .collect()
}

fn sections<'t>(text: &'t str, begin: &str, end: &str) -> Vec<&'t str> {
    let mut out = Vec::new();
    let mut from = 0;
    while let Some(start) = text[from..].find(begin) {
        let body_start = from + start + begin.len();
        match text[body_start..].find(end) {
            Some(len) => {
                out.push(&text[body_start..body_start + len]);
                from = body_start + len + end.len();
            }
            None => break,
        }
    }
    out
}

/// Parse the `bfchar`/`bfrange` sections of a ToUnicode CMap.
pub(crate) fn parse_to_unicode(data: &[u8]) -> HashMap<u32, String> {
    let text = String::from_utf8_lossy(data);
    let mut map = HashMap::new();

    for section in sections(&text, "beginbfchar", "endbfchar") {
        let hexes: Vec<&str> = CMAP_TOKEN
            .captures_iter(section)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        for pair in hexes.chunks_exact(2) {
            if let Some(code) = hex_code(pair[0]) {
                map.insert(code, String::from_utf16_lossy(&utf16_units(pair[1])));
            }
        }
    }

    for section in sections(&text, "beginbfrange", "endbfrange") {
        let mut tokens = CMAP_TOKEN.captures_iter(section).map(|c| match c.get(1) {
            Some(m) => CmapToken::Hex(m.as_str()),
            None if c.get(0).map(|m| m.as_str()) == Some("[") => CmapToken::Open,
            None => CmapToken::Close,
        });
        loop {
            let (Some(CmapToken::Hex(lo)), Some(CmapToken::Hex(hi))) = (tokens.next(), tokens.next())
            else {
                break;
            };
            let (Some(lo), Some(hi)) = (hex_code(lo), hex_code(hi)) else {
                break;
            };
            let hi = hi.min(lo.saturating_add(0xFFFF));
            match tokens.next() {
                Some(CmapToken::Hex(dst)) => {
                    let base = utf16_units(dst);
                    for (offset, code) in (lo..=hi).enumerate() {
                        let mut units = base.clone();
                        if let Some(last) = units.last_mut() {
                            *last = last.wrapping_add(offset as u16);
                        }
                        map.insert(code, String::from_utf16_lossy(&units));
                    }
                }
                Some(CmapToken::Open) => {
                    let mut code = lo;
                    for token in tokens.by_ref() {
                        match token {
                            CmapToken::Hex(dst) => {
                                if code <= hi {
                                    map.insert(code, String::from_utf16_lossy(&utf16_units(dst)));
                                }
                                code = code.saturating_add(1);
                            }
                            _ => break,
                        }
                    }
                }
                _ => break,
            }
        }
    }

    map
}

// ── Images ───────────────────────────────────────────────────────────────

/// Number of colour components for an image colour space, if supported.
fn color_components(doc: &Document, cs: &Object) -> Option<usize> {
    match resolve(doc, cs) {
        Object::Name(n) => match n.as_slice() {
            b"DeviceRGB" | b"CalRGB" => Some(3),
            b"DeviceGray" | b"CalGray" => Some(1),
            b"DeviceCMYK" => Some(4),
            _ => None,
        },
        Object::Array(arr) => match arr.first().map(name_of) {
            Some(b"ICCBased") => arr
                .get(1)
                .and_then(|o| resolve(doc, o).as_stream().ok())
                .and_then(|s| s.dict.get(b"N").ok())
                .and_then(object_to_f64)
                .map(|n| n as usize)
                .filter(|n| matches!(n, 1 | 3 | 4)),
            Some(b"CalRGB") => Some(3),
            Some(b"CalGray") => Some(1),
            _ => None,
        },
        _ => None,
    }
}

fn cmyk_to_rgb(c: f64, m: f64, y: f64, k: f64) -> (f64, f64, f64) {
    ((1.0 - c) * (1.0 - k), (1.0 - m) * (1.0 - k), (1.0 - y) * (1.0 - k))
}

/// Decode an image XObject into pixels. `None` for unsupported encodings.
fn decode_image(doc: &Document, stream: &lopdf::Stream) -> Option<DynamicImage> {
    let dict = &stream.dict;
    let filters: Vec<Vec<u8>> = match dict.get(b"Filter").ok().map(|o| resolve(doc, o)) {
        Some(Object::Name(n)) => vec![n.clone()],
        Some(Object::Array(arr)) => arr.iter().map(|o| name_of(resolve(doc, o)).to_vec()).collect(),
        _ => vec![],
    };

    if filters.last().map(|f| f.as_slice()) == Some(b"DCTDecode".as_slice()) {
        if filters.len() != 1 {
            return None;
        }
        return image::load_from_memory_with_format(&stream.content, image::ImageFormat::Jpeg).ok();
    }
    if filters.iter().any(|f| f.as_slice() != b"FlateDecode") {
        return None;
    }

    let get_u32 = |key: &[u8]| {
        dict.get(key)
            .ok()
            .and_then(|o| object_to_f64(resolve(doc, o)))
            .map(|v| v as u32)
    };
    let width = get_u32(b"Width")?;
    let height = get_u32(b"Height")?;
    if get_u32(b"BitsPerComponent").unwrap_or(8) != 8 || width == 0 || height == 0 {
        return None;
    }
    let components = color_components(doc, dict.get(b"ColorSpace").ok()?)?;

    let data = if filters.is_empty() {
        stream.content.clone()
    } else {
        stream.decompressed_content().ok()?
    };
    let needed = width as usize * height as usize * components;
    if data.len() < needed {
        debug!("image stream too short: {} < {}", data.len(), needed);
        return None;
    }

    match components {
        1 => GrayImage::from_raw(width, height, data[..needed].to_vec()).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(width, height, data[..needed].to_vec()).map(DynamicImage::ImageRgb8),
        4 => {
            let rgb: Vec<u8> = data[..needed]
                .chunks_exact(4)
                .flat_map(|px| {
                    let f = |v: u8| v as f64 / 255.0;
                    let (r, g, b) = cmyk_to_rgb(f(px[0]), f(px[1]), f(px[2]), f(px[3]));
                    [(r * 255.0).round() as u8, (g * 255.0).round() as u8, (b * 255.0).round() as u8]
                })
                .collect();
            RgbImage::from_raw(width, height, rgb).map(DynamicImage::ImageRgb8)
        }
        _ => None,
    }
}

// ── Interpreter ──────────────────────────────────────────────────────────

#[derive(Clone)]
struct GState {
    ctm: Matrix,
    fill: Color,
    stroke: Color,
    line_width: f64,
    font: Option<Arc<FontInfo>>,
    font_size: f64,
    char_spacing: f64,
    word_spacing: f64,
    h_scale: f64,
    leading: f64,
    rise: f64,
    render_mode: i64,
}

impl GState {
    fn new(ctm: Matrix) -> Self {
        Self {
            ctm,
            fill: Color::BLACK,
            stroke: Color::BLACK,
            line_width: 1.0,
            font: None,
            font_size: 12.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            h_scale: 1.0,
            leading: 0.0,
            rise: 0.0,
            render_mode: 0,
        }
    }
}

fn color_from_operands(ops: &[Object]) -> Option<Color> {
    let v: Vec<f64> = ops.iter().filter_map(object_to_f64).collect();
    match v.len() {
        1 => Some(Color::from_unit(v[0], v[0], v[0])),
        3 => Some(Color::from_unit(v[0], v[1], v[2])),
        4 => {
            let (r, g, b) = cmyk_to_rgb(v[0], v[1], v[2], v[3]);
            Some(Color::from_unit(r, g, b))
        }
        _ => None,
    }
}

fn num(ops: &[Object], i: usize) -> f64 {
    ops.get(i).and_then(object_to_f64).unwrap_or(0.0)
}

struct Interpreter<'a> {
    doc: &'a Document,
    opts: InterpretOptions,
    font_cache: HashMap<ObjectId, Arc<FontInfo>>,
    ops: Vec<PaintOp>,
    order: usize,
    group: usize,
    images_kept: usize,
}

impl<'a> Interpreter<'a> {
    fn next_order(&mut self) -> usize {
        let o = self.order;
        self.order += 1;
        o
    }

    fn lookup_font(&mut self, resources: &'a Dictionary, name: &[u8]) -> Option<Arc<FontInfo>> {
        let fonts = resources
            .get(b"Font")
            .ok()
            .and_then(|o| resolve(self.doc, o).as_dict().ok())?;
        let entry = fonts.get(name).ok()?;
        if let Object::Reference(id) = entry {
            if let Some(cached) = self.font_cache.get(id) {
                return Some(Arc::clone(cached));
            }
            let dict = self.doc.get_object(*id).and_then(|o| o.as_dict()).ok()?;
            let info = Arc::new(FontInfo::load(self.doc, dict));
            self.font_cache.insert(*id, Arc::clone(&info));
            return Some(info);
        }
        entry
            .as_dict()
            .ok()
            .map(|dict| Arc::new(FontInfo::load(self.doc, dict)))
    }

    fn run(
        &mut self,
        bytes: &[u8],
        resources: &'a Dictionary,
        initial: GState,
        depth: usize,
    ) -> Result<(), String> {
        let content = Content::decode(bytes).map_err(|e| e.to_string())?;

        let mut gs = initial;
        let mut stack: Vec<GState> = Vec::new();
        let mut path: Vec<PathSeg> = Vec::new();
        let mut tm = Matrix::IDENTITY;
        let mut tlm = Matrix::IDENTITY;

        for op in &content.operations {
            let args = op.operands.as_slice();
            match op.operator.as_str() {
                // ── Graphics state ──
                "q" => stack.push(gs.clone()),
                "Q" => {
                    if let Some(saved) = stack.pop() {
                        gs = saved;
                    }
                }
                "cm" => {
                    if let Some(m) = Matrix::from_operands(args) {
                        gs.ctm = m.concat(&gs.ctm);
                    }
                }
                "w" => gs.line_width = num(args, 0),

                // ── Colour ──
                "g" | "rg" | "k" | "sc" | "scn" => {
                    if let Some(c) = color_from_operands(args) {
                        gs.fill = c;
                    }
                }
                "G" | "RG" | "K" | "SC" | "SCN" => {
                    if let Some(c) = color_from_operands(args) {
                        gs.stroke = c;
                    }
                }
                "cs" => gs.fill = Color::BLACK,
                "CS" => gs.stroke = Color::BLACK,

                // ── Path construction ──
                "m" => path.push(PathSeg::MoveTo(gs.ctm.apply(num(args, 0), num(args, 1)))),
                "l" => path.push(PathSeg::LineTo(gs.ctm.apply(num(args, 0), num(args, 1)))),
                "c" => path.push(PathSeg::CurveTo(
                    gs.ctm.apply(num(args, 0), num(args, 1)),
                    gs.ctm.apply(num(args, 2), num(args, 3)),
                    gs.ctm.apply(num(args, 4), num(args, 5)),
                )),
                "v" => {
                    let current = current_point(&path);
                    path.push(PathSeg::CurveTo(
                        current,
                        gs.ctm.apply(num(args, 0), num(args, 1)),
                        gs.ctm.apply(num(args, 2), num(args, 3)),
                    ));
                }
                "y" => {
                    let end = gs.ctm.apply(num(args, 2), num(args, 3));
                    path.push(PathSeg::CurveTo(gs.ctm.apply(num(args, 0), num(args, 1)), end, end));
                }
                "h" => path.push(PathSeg::Close),
                "re" => {
                    let (x, y, w, h) = (num(args, 0), num(args, 1), num(args, 2), num(args, 3));
                    path.push(PathSeg::MoveTo(gs.ctm.apply(x, y)));
                    path.push(PathSeg::LineTo(gs.ctm.apply(x + w, y)));
                    path.push(PathSeg::LineTo(gs.ctm.apply(x + w, y + h)));
                    path.push(PathSeg::LineTo(gs.ctm.apply(x, y + h)));
                    path.push(PathSeg::Close);
                }

                // ── Path painting ──
                "S" | "s" | "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" => {
                    let operator = op.operator.as_str();
                    if matches!(operator, "s" | "b" | "b*") {
                        path.push(PathSeg::Close);
                    }
                    let fills = matches!(operator, "f" | "F" | "f*" | "B" | "B*" | "b" | "b*");
                    let strokes = matches!(operator, "S" | "s" | "B" | "B*" | "b" | "b*");
                    let segments = std::mem::take(&mut path);
                    if segments.iter().any(|s| !matches!(s, PathSeg::MoveTo(_) | PathSeg::Close)) {
                        let order = self.next_order();
                        let width = (gs.line_width.max(0.0) * gs.ctm.mean_scale()).max(0.25);
                        self.ops.push(PaintOp::Path(PathPaint {
                            segments,
                            fill: fills.then_some(gs.fill),
                            stroke: strokes.then_some((gs.stroke, width)),
                            order,
                        }));
                    }
                }
                "n" => path.clear(),

                // ── Text objects and state ──
                "BT" => {
                    tm = Matrix::IDENTITY;
                    tlm = Matrix::IDENTITY;
                    self.group += 1;
                }
                "ET" => {}
                "Tf" => {
                    if let Some(Object::Name(name)) = args.first() {
                        gs.font = self.lookup_font(resources, name);
                    }
                    gs.font_size = num(args, 1);
                }
                "Tc" => gs.char_spacing = num(args, 0),
                "Tw" => gs.word_spacing = num(args, 0),
                "Tz" => gs.h_scale = num(args, 0) / 100.0,
                "TL" => gs.leading = num(args, 0),
                "Ts" => gs.rise = num(args, 0),
                "Tr" => gs.render_mode = num(args, 0) as i64,
                "Td" => {
                    tlm = Matrix::translate(num(args, 0), num(args, 1)).concat(&tlm);
                    tm = tlm;
                }
                "TD" => {
                    gs.leading = -num(args, 1);
                    tlm = Matrix::translate(num(args, 0), num(args, 1)).concat(&tlm);
                    tm = tlm;
                }
                "Tm" => {
                    if let Some(m) = Matrix::from_operands(args) {
                        tlm = m;
                        tm = m;
                    }
                }
                "T*" => {
                    tlm = Matrix::translate(0.0, -gs.leading).concat(&tlm);
                    tm = tlm;
                }

                // ── Text showing ──
                "Tj" => {
                    if let Some(Object::String(bytes, _)) = args.first() {
                        self.show(&gs, &mut tm, &[Object::String(bytes.clone(), lopdf::StringFormat::Literal)]);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = args.first() {
                        self.show(&gs, &mut tm, items);
                    }
                }
                "'" | "\"" => {
                    let text_idx = if op.operator == "\"" {
                        gs.word_spacing = num(args, 0);
                        gs.char_spacing = num(args, 1);
                        2
                    } else {
                        0
                    };
                    tlm = Matrix::translate(0.0, -gs.leading).concat(&tlm);
                    tm = tlm;
                    if let Some(Object::String(bytes, _)) = args.get(text_idx) {
                        self.show(&gs, &mut tm, &[Object::String(bytes.clone(), lopdf::StringFormat::Literal)]);
                    }
                }

                // ── XObjects ──
                "Do" => {
                    if let Some(Object::Name(name)) = args.first() {
                        self.do_xobject(name, resources, &gs, depth)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Show a TJ-style array of strings and kerning adjustments.
    fn show(&mut self, gs: &GState, tm: &mut Matrix, items: &[Object]) {
        let Some(font) = gs.font.clone() else {
            return;
        };
        let fs = gs.font_size;
        let th = gs.h_scale;
        let start = tm.concat(&gs.ctm).apply(0.0, gs.rise);
        let size = (fs * tm.concat(&gs.ctm).y_scale()).abs();
        let mut text = String::new();

        for item in items {
            match item {
                Object::String(bytes, _) => {
                    for (code, chunk) in font.decode(bytes) {
                        text.push_str(&chunk);
                        let spacing = if !font.two_byte && code == 32 {
                            gs.word_spacing
                        } else {
                            0.0
                        };
                        let tx = (font.width(code) / 1000.0 * fs + gs.char_spacing + spacing) * th;
                        *tm = Matrix::translate(tx, 0.0).concat(tm);
                    }
                }
                other => {
                    if let Some(adjust) = object_to_f64(other) {
                        let tx = -adjust / 1000.0 * fs * th;
                        *tm = Matrix::translate(tx, 0.0).concat(tm);
                        // Large negative kerning stands in for a word space.
                        if adjust < -200.0 && !text.is_empty() && !text.ends_with(char::is_whitespace) {
                            text.push(' ');
                        }
                    }
                }
            }
        }

        let end = tm.concat(&gs.ctm).apply(0.0, gs.rise);
        if matches!(gs.render_mode, 3 | 7) || text.trim().is_empty() {
            return;
        }

        let order = self.next_order();
        self.ops.push(PaintOp::Text(TextSpan {
            text,
            x: start.0.min(end.0),
            baseline: start.1,
            width: (end.0 - start.0).abs(),
            size,
            family: font.family.clone(),
            bold: font.bold,
            italic: font.italic,
            color: gs.fill,
            group: self.group,
            order,
        }));
    }

    fn do_xobject(
        &mut self,
        name: &[u8],
        resources: &'a Dictionary,
        gs: &GState,
        depth: usize,
    ) -> Result<(), String> {
        let doc = self.doc;
        let Some(xobjects) = resources
            .get(b"XObject")
            .ok()
            .and_then(|o| resolve(doc, o).as_dict().ok())
        else {
            return Ok(());
        };
        let Some(stream) = xobjects
            .get(name)
            .ok()
            .and_then(|o| resolve(doc, o).as_stream().ok())
        else {
            return Ok(());
        };

        let subtype = stream.dict.get(b"Subtype").map(name_of).unwrap_or_default();
        match subtype {
            b"Image" => {
                if self.images_kept >= self.opts.max_images {
                    debug!("image limit reached; skipping /{}", String::from_utf8_lossy(name));
                    return Ok(());
                }
                let Some(mut image) = decode_image(doc, stream) else {
                    debug!("unsupported image encoding for /{}", String::from_utf8_lossy(name));
                    return Ok(());
                };
                let max = self.opts.max_image_dimension;
                if image.width().max(image.height()) > max {
                    image = image.resize(max, max, FilterType::Triangle);
                }
                let corners = [
                    gs.ctm.apply(0.0, 0.0),
                    gs.ctm.apply(1.0, 0.0),
                    gs.ctm.apply(0.0, 1.0),
                    gs.ctm.apply(1.0, 1.0),
                ];
                let xs = corners.iter().map(|p| p.0);
                let ys = corners.iter().map(|p| p.1);
                let bounds = (
                    xs.clone().fold(f64::INFINITY, f64::min),
                    ys.clone().fold(f64::INFINITY, f64::min),
                    xs.fold(f64::NEG_INFINITY, f64::max),
                    ys.fold(f64::NEG_INFINITY, f64::max),
                );
                self.images_kept += 1;
                let order = self.next_order();
                self.ops.push(PaintOp::Image(ImagePaint {
                    name: String::from_utf8_lossy(name).to_string(),
                    image,
                    bounds,
                    order,
                }));
            }
            b"Form" => {
                if depth >= self.opts.max_form_depth {
                    debug!("form nesting limit reached at /{}", String::from_utf8_lossy(name));
                    return Ok(());
                }
                let matrix = stream
                    .dict
                    .get(b"Matrix")
                    .ok()
                    .and_then(|o| resolve(doc, o).as_array().ok())
                    .and_then(|arr| {
                        let resolved: Vec<Object> = arr.iter().map(|o| resolve(doc, o).clone()).collect();
                        Matrix::from_operands(&resolved)
                    })
                    .unwrap_or(Matrix::IDENTITY);
                let form_resources = stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|o| resolve(doc, o).as_dict().ok())
                    .unwrap_or(resources);
                let bytes = stream
                    .decompressed_content()
                    .unwrap_or_else(|_| stream.content.clone());
                let mut inner = gs.clone();
                inner.ctm = matrix.concat(&gs.ctm);
                self.run(&bytes, form_resources, inner, depth + 1)?;
            }
            _ => {}
        }
        Ok(())
    }
}

fn current_point(path: &[PathSeg]) -> Point {
    path.iter()
        .rev()
        .find_map(|s| match s {
            PathSeg::MoveTo(p) | PathSeg::LineTo(p) => Some(*p),
            PathSeg::CurveTo(_, _, p) => Some(*p),
            PathSeg::Close => None,
        })
        .unwrap_or((0.0, 0.0))
}

/// Concatenated, decompressed `/Contents` of a page. Empty when absent.
fn page_content_bytes(doc: &Document, page: &Dictionary) -> Vec<u8> {
    let stream_bytes = |obj: &Object| -> Option<Vec<u8>> {
        let stream = resolve(doc, obj).as_stream().ok()?;
        Some(
            stream
                .decompressed_content()
                .unwrap_or_else(|_| stream.content.clone()),
        )
    };
    match page.get(b"Contents").ok().map(|o| resolve(doc, o)) {
        Some(Object::Array(parts)) => {
            let mut all = Vec::new();
            for part in parts {
                if let Some(bytes) = stream_bytes(part) {
                    all.extend_from_slice(&bytes);
                    all.push(b'\n');
                }
            }
            all
        }
        Some(obj @ Object::Stream(_)) => stream_bytes(obj).unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Interpret one page into a paint list, in paint order.
pub(crate) fn interpret_page(
    content: &PageContent,
    opts: InterpretOptions,
) -> Result<Vec<PaintOp>, String> {
    let doc = content.pdf.as_ref();
    let page = doc
        .get_object(content.page_id)
        .and_then(|o| o.as_dict())
        .map_err(|e| format!("page dictionary: {e}"))?;

    let bytes = page_content_bytes(doc, page);
    if bytes.is_empty() {
        return Ok(Vec::new());
    }

    let empty = Dictionary::new();
    let resources = resolve_inherited(doc, content.page_id, b"Resources")
        .and_then(|o| o.as_dict().ok())
        .unwrap_or(&empty);

    // Flip to a top-left origin relative to the MediaBox.
    let [x0, _, _, y1] = content.media_box;
    let base = Matrix::new(1.0, 0.0, 0.0, -1.0, -x0, y1);

    let mut interp = Interpreter {
        doc,
        opts,
        font_cache: HashMap::new(),
        ops: Vec::new(),
        order: 0,
        group: 0,
        images_kept: 0,
    };
    interp.run(&bytes, resources, GState::new(base), 0)?;
    Ok(interp.ops)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_concat_applies_left_first() {
        let scale = Matrix::new(2.0, 0.0, 0.0, 2.0, 0.0, 0.0);
        let shift = Matrix::translate(10.0, 5.0);
        // scale, then shift
        assert_eq!(scale.concat(&shift).apply(1.0, 1.0), (12.0, 7.0));
        // shift, then scale
        assert_eq!(shift.concat(&scale).apply(1.0, 1.0), (22.0, 12.0));
    }

    #[test]
    fn clean_font_name_variants() {
        assert_eq!(
            clean_font_name("ABCDEF+Montserrat-SemiBoldItalic"),
            ("Montserrat".to_string(), true, true)
        );
        assert_eq!(clean_font_name("Arial,Bold"), ("Arial".to_string(), true, false));
        assert_eq!(clean_font_name("ArialMT"), ("Arial".to_string(), false, false));
        assert_eq!(
            clean_font_name("TimesNewRomanPSMT"),
            ("TimesNewRoman".to_string(), false, false)
        );
        assert_eq!(
            clean_font_name("Helvetica-Oblique"),
            ("Helvetica".to_string(), false, true)
        );
    }

    #[test]
    fn to_unicode_bfchar_and_bfrange() {
        let cmap = b"/CIDInit /ProcSet findresource begin\n\
            2 beginbfchar\n<0003> <0020>\n<0011> <00660069>\nendbfchar\n\
            1 beginbfrange\n<0024> <0026> <0041>\nendbfrange\n\
            1 beginbfrange\n<0030> <0031> [<0078> <0079>]\nendbfrange\nend";
        let map = parse_to_unicode(cmap);
        assert_eq!(map.get(&0x03).map(String::as_str), Some(" "));
        assert_eq!(map.get(&0x11).map(String::as_str), Some("fi"));
        assert_eq!(map.get(&0x24).map(String::as_str), Some("A"));
        assert_eq!(map.get(&0x26).map(String::as_str), Some("C"));
        assert_eq!(map.get(&0x30).map(String::as_str), Some("x"));
        assert_eq!(map.get(&0x31).map(String::as_str), Some("y"));
    }

    #[test]
    fn decode_text_string_handles_utf16() {
        assert_eq!(decode_text_string(&[0xFE, 0xFF, 0x00, 0x48, 0x00, 0x69]), "Hi");
        assert_eq!(decode_text_string(b"Plain"), "Plain");
        assert_eq!(decode_text_string(&[0x43, 0x61, 0x66, 0xE9]), "Café");
    }

    #[test]
    fn cmyk_conversion() {
        assert_eq!(
            color_from_operands(&[
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(1)
            ]),
            Some(Color::BLACK)
        );
        assert_eq!(
            color_from_operands(&[Object::Real(1.0), Object::Real(0.0), Object::Real(0.0)]),
            Some(Color::rgb(255, 0, 0))
        );
    }

    #[test]
    fn cid_widths_near_the_code_ceiling_do_not_wrap() {
        let doc = Document::new();
        let max = i64::from(u32::MAX);
        let w = vec![
            Object::Integer(3),
            Object::Array(vec![Object::Integer(500), Object::Integer(600)]),
            Object::Integer(max - 1),
            Object::Array(vec![Object::Integer(700), Object::Integer(710), Object::Integer(720)]),
            Object::Integer(max - 1),
            Object::Integer(max),
            Object::Integer(800),
        ];
        let mut out = HashMap::new();
        parse_cid_widths(&doc, &w, &mut out);
        assert_eq!(out.get(&3), Some(&500.0));
        assert_eq!(out.get(&4), Some(&600.0));
        assert_eq!(out.get(&(u32::MAX - 1)), Some(&800.0));
        assert_eq!(out.get(&u32::MAX), Some(&800.0));
        assert!(!out.contains_key(&0), "codes must not wrap to zero");
        assert_eq!(out.len(), 4);
    }

    /// A 200×200 pt single-page document whose page draws `content` with
    /// `xobjects` as its `/XObject` resources.
    fn single_page(
        build: impl FnOnce(&mut Document) -> Dictionary,
        content: &[u8],
    ) -> PageContent {
        use lopdf::{dictionary, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let xobjects = build(&mut doc);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! { "XObject" => xobjects },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => 1,
            }),
        );
        PageContent {
            pdf: Arc::new(doc),
            page_id,
            media_box: [0.0, 0.0, 200.0, 200.0],
        }
    }

    fn rgb_image(doc: &mut Document) -> ObjectId {
        use lopdf::{dictionary, Stream};
        // 2×2 pixels: red, green / blue, white
        let pixels = vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255];
        doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 2,
                "Height" => 2,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            pixels,
        ))
    }

    fn opts() -> InterpretOptions {
        InterpretOptions {
            max_images: 8,
            max_image_dimension: 1024,
            max_form_depth: 4,
        }
    }

    #[test]
    fn image_xobject_is_decoded_and_placed() {
        let content = single_page(
            |doc| {
                let img = rgb_image(doc);
                lopdf::dictionary! { "Im1" => img }
            },
            b"q 100 0 0 50 40 60 cm /Im1 Do Q",
        );
        let ops = interpret_page(&content, opts()).unwrap();
        assert_eq!(ops.len(), 1);
        let PaintOp::Image(img) = &ops[0] else {
            panic!("expected an image op");
        };
        assert_eq!(img.name, "Im1");
        assert_eq!((img.image.width(), img.image.height()), (2, 2));
        assert_eq!(img.image.to_rgb8().get_pixel(0, 0).0, [255, 0, 0]);
        // y is flipped against the 200 pt MediaBox.
        assert_eq!(img.bounds, (40.0, 90.0, 140.0, 140.0));
    }

    #[test]
    fn form_xobject_contents_are_interpreted_with_its_matrix() {
        use lopdf::{dictionary, Stream};

        let content = single_page(
            |doc| {
                let img = rgb_image(doc);
                let form = doc.add_object(Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Form",
                        "BBox" => vec![0.into(), 0.into(), 100.into(), 100.into()],
                        "Matrix" => vec![1.into(), 0.into(), 0.into(), 1.into(), 20.into(), 30.into()],
                        "Resources" => dictionary! {
                            "XObject" => dictionary! { "Im1" => img },
                        },
                    },
                    b"40 0 0 20 0 0 cm /Im1 Do".to_vec(),
                ));
                dictionary! { "Fm1" => form }
            },
            b"/Fm1 Do",
        );
        let ops = interpret_page(&content, opts()).unwrap();
        assert_eq!(ops.len(), 1);
        let PaintOp::Image(img) = &ops[0] else {
            panic!("expected the form's image");
        };
        assert_eq!(img.bounds, (20.0, 150.0, 60.0, 170.0));
    }

    #[test]
    fn form_nesting_stops_at_the_depth_limit() {
        use lopdf::{dictionary, Stream};

        let content = single_page(
            |doc| {
                let img = rgb_image(doc);
                let form = doc.add_object(Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Form",
                        "Resources" => dictionary! {
                            "XObject" => dictionary! { "Im1" => img },
                        },
                    },
                    b"10 0 0 10 0 0 cm /Im1 Do".to_vec(),
                ));
                dictionary! { "Fm1" => form }
            },
            b"/Fm1 Do",
        );
        let shallow = InterpretOptions {
            max_form_depth: 0,
            ..opts()
        };
        assert!(interpret_page(&content, shallow).unwrap().is_empty());
    }

    #[test]
    fn simple_font_decoding_uses_widths() {
        let font = FontInfo {
            family: Some("Helvetica".into()),
            widths: HashMap::from([(72, 722.0), (105, 222.0)]),
            default_width: 500.0,
            ..FontInfo::default()
        };
        let decoded = font.decode(b"Hi");
        assert_eq!(decoded, vec![(72, "H".to_string()), (105, "i".to_string())]);
        assert_eq!(font.width(72), 722.0);
        assert_eq!(font.width(0x41), 500.0);
    }
}
