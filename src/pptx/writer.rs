//! OOXML package writer: [`Presentation`] → `.pptx` bytes.
//!
//! The package carries one blank slide master, one blank layout and a plain
//! Office theme. Every slide uses that layout and places its shapes
//! explicitly, so nothing on a slide depends on placeholder inheritance.
//! Media parts are shared: a picture used on several slides is stored once.

use super::model::{CustomPath, Frame, Geometry, Outline, Paragraph, Presentation, Run, Slide, SlideShape};
use crate::error::Pdf2PptxError;
use crate::layout::{Alignment, Color};
use quick_xml::escape::escape;
use std::collections::BTreeMap;
use std::fmt::{self, Write as FmtWrite};
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;
const NS_A: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_P: &str = "http://schemas.openxmlformats.org/presentationml/2006/main";
const REL_BASE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

const CT_PRESENTATION: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml";
const CT_SLIDE: &str = "application/vnd.openxmlformats-officedocument.presentationml.slide+xml";

/// Serialise a presentation into a zipped PPTX package.
pub fn write_pptx(pres: &Presentation) -> Result<Vec<u8>, Pdf2PptxError> {
    let parts = render_parts(pres).map_err(|e| Pdf2PptxError::PackageFailed(e.to_string()))?;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    // PNG data is already compressed.
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let fail = |e: &dyn fmt::Display| Pdf2PptxError::PackageFailed(e.to_string());

    for (name, xml) in &parts {
        zip.start_file(name.as_str(), deflated).map_err(|e| fail(&e))?;
        zip.write_all(xml.as_bytes()).map_err(|e| fail(&e))?;
    }
    for (i, png) in pres.media.iter().enumerate() {
        zip.start_file(format!("ppt/media/image{}.png", i + 1), stored)
            .map_err(|e| fail(&e))?;
        zip.write_all(png).map_err(|e| fail(&e))?;
    }

    let cursor = zip.finish().map_err(|e| fail(&e))?;
    Ok(cursor.into_inner())
}

/// All XML parts, `[Content_Types].xml` first.
fn render_parts(pres: &Presentation) -> Result<Vec<(String, String)>, fmt::Error> {
    let mut parts = vec![
        ("[Content_Types].xml".to_string(), content_types(pres.slides.len())?),
        ("_rels/.rels".to_string(), root_rels()),
        ("docProps/core.xml".to_string(), core_props(pres.title.as_deref())?),
        ("docProps/app.xml".to_string(), app_props(pres.slides.len())?),
        ("ppt/presentation.xml".to_string(), presentation_xml(pres)?),
        ("ppt/_rels/presentation.xml.rels".to_string(), presentation_rels(pres.slides.len())?),
        ("ppt/presProps.xml".to_string(), PRES_PROPS.to_string()),
        ("ppt/viewProps.xml".to_string(), VIEW_PROPS.to_string()),
        ("ppt/tableStyles.xml".to_string(), TABLE_STYLES.to_string()),
        ("ppt/theme/theme1.xml".to_string(), THEME.to_string()),
        ("ppt/slideMasters/slideMaster1.xml".to_string(), SLIDE_MASTER.to_string()),
        (
            "ppt/slideMasters/_rels/slideMaster1.xml.rels".to_string(),
            SLIDE_MASTER_RELS.to_string(),
        ),
        ("ppt/slideLayouts/slideLayout1.xml".to_string(), SLIDE_LAYOUT.to_string()),
        (
            "ppt/slideLayouts/_rels/slideLayout1.xml.rels".to_string(),
            SLIDE_LAYOUT_RELS.to_string(),
        ),
    ];

    for (i, slide) in pres.slides.iter().enumerate() {
        let media_rels = slide_media(slide);
        parts.push((format!("ppt/slides/slide{}.xml", i + 1), slide_xml(slide, &media_rels)?));
        parts.push((
            format!("ppt/slides/_rels/slide{}.xml.rels", i + 1),
            slide_rels(&media_rels)?,
        ));
    }
    Ok(parts)
}

// ── Package-level parts ──────────────────────────────────────────────────

fn content_types(slide_count: usize) -> Result<String, fmt::Error> {
    let mut xml = String::with_capacity(2048);
    xml.push_str(XML_DECL);
    xml.push_str(r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#);
    xml.push_str(r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#);
    xml.push_str(r#"<Default Extension="xml" ContentType="application/xml"/>"#);
    xml.push_str(r#"<Default Extension="png" ContentType="image/png"/>"#);
    write!(xml, r#"<Override PartName="/ppt/presentation.xml" ContentType="{CT_PRESENTATION}"/>"#)?;
    xml.push_str(r#"<Override PartName="/ppt/presProps.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.presProps+xml"/>"#);
    xml.push_str(r#"<Override PartName="/ppt/viewProps.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.viewProps+xml"/>"#);
    xml.push_str(r#"<Override PartName="/ppt/tableStyles.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.tableStyles+xml"/>"#);
    xml.push_str(r#"<Override PartName="/ppt/theme/theme1.xml" ContentType="application/vnd.openxmlformats-officedocument.theme+xml"/>"#);
    xml.push_str(r#"<Override PartName="/ppt/slideMasters/slideMaster1.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slideMaster+xml"/>"#);
    xml.push_str(r#"<Override PartName="/ppt/slideLayouts/slideLayout1.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slideLayout+xml"/>"#);
    for i in 1..=slide_count {
        write!(xml, r#"<Override PartName="/ppt/slides/slide{i}.xml" ContentType="{CT_SLIDE}"/>"#)?;
    }
    xml.push_str(r#"<Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/>"#);
    xml.push_str(r#"<Override PartName="/docProps/app.xml" ContentType="application/vnd.openxmlformats-officedocument.extended-properties+xml"/>"#);
    xml.push_str("</Types>");
    Ok(xml)
}

fn root_rels() -> String {
    format!(
        "{XML_DECL}<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
<Relationship Id=\"rId1\" Type=\"{REL_BASE}/officeDocument\" Target=\"ppt/presentation.xml\"/>\
<Relationship Id=\"rId2\" Type=\"http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties\" Target=\"docProps/core.xml\"/>\
<Relationship Id=\"rId3\" Type=\"{REL_BASE}/extended-properties\" Target=\"docProps/app.xml\"/>\
</Relationships>"
    )
}

fn core_props(title: Option<&str>) -> Result<String, fmt::Error> {
    let mut xml = String::with_capacity(512);
    xml.push_str(XML_DECL);
    xml.push_str(r#"<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#);
    if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
        write!(xml, "<dc:title>{}</dc:title>", escape(&xml_chars(title)))?;
    }
    write!(xml, "<dc:creator>edgequake-pdf2pptx {}</dc:creator>", crate::VERSION)?;
    xml.push_str("</cp:coreProperties>");
    Ok(xml)
}

fn app_props(slide_count: usize) -> Result<String, fmt::Error> {
    let mut xml = String::with_capacity(256);
    xml.push_str(XML_DECL);
    xml.push_str(r#"<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties">"#);
    xml.push_str("<Application>edgequake-pdf2pptx</Application>");
    write!(xml, "<Slides>{slide_count}</Slides>")?;
    xml.push_str("</Properties>");
    Ok(xml)
}

fn presentation_xml(pres: &Presentation) -> Result<String, fmt::Error> {
    let mut xml = String::with_capacity(1024 + pres.slides.len() * 48);
    xml.push_str(XML_DECL);
    write!(xml, r#"<p:presentation xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}" saveSubsetFonts="1">"#)?;
    xml.push_str(r#"<p:sldMasterIdLst><p:sldMasterId id="2147483648" r:id="rId1"/></p:sldMasterIdLst>"#);
    if !pres.slides.is_empty() {
        xml.push_str("<p:sldIdLst>");
        for i in 0..pres.slides.len() {
            write!(xml, r#"<p:sldId id="{}" r:id="rId{}"/>"#, 256 + i, slide_rel_id(i))?;
        }
        xml.push_str("</p:sldIdLst>");
    }
    write!(xml, r#"<p:sldSz cx="{}" cy="{}"/>"#, pres.width, pres.height)?;
    xml.push_str(r#"<p:notesSz cx="6858000" cy="9144000"/>"#);
    xml.push_str("</p:presentation>");
    Ok(xml)
}

/// rId1 master, rId2 theme, rId3-5 props parts, slides from rId6.
fn slide_rel_id(index: usize) -> usize {
    index + 6
}

fn presentation_rels(slide_count: usize) -> Result<String, fmt::Error> {
    let mut xml = String::with_capacity(1024 + slide_count * 128);
    xml.push_str(XML_DECL);
    xml.push_str(r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#);
    write!(xml, r#"<Relationship Id="rId1" Type="{REL_BASE}/slideMaster" Target="slideMasters/slideMaster1.xml"/>"#)?;
    write!(xml, r#"<Relationship Id="rId2" Type="{REL_BASE}/theme" Target="theme/theme1.xml"/>"#)?;
    write!(xml, r#"<Relationship Id="rId3" Type="{REL_BASE}/presProps" Target="presProps.xml"/>"#)?;
    write!(xml, r#"<Relationship Id="rId4" Type="{REL_BASE}/viewProps" Target="viewProps.xml"/>"#)?;
    write!(xml, r#"<Relationship Id="rId5" Type="{REL_BASE}/tableStyles" Target="tableStyles.xml"/>"#)?;
    for i in 0..slide_count {
        write!(
            xml,
            r#"<Relationship Id="rId{}" Type="{REL_BASE}/slide" Target="slides/slide{}.xml"/>"#,
            slide_rel_id(i),
            i + 1
        )?;
    }
    xml.push_str("</Relationships>");
    Ok(xml)
}

// ── Slides ───────────────────────────────────────────────────────────────

/// Media index → relationship number on one slide. rId1 is the layout.
fn slide_media(slide: &Slide) -> BTreeMap<usize, usize> {
    let mut rels = BTreeMap::new();
    for shape in &slide.shapes {
        if let SlideShape::Picture { media, .. } = shape {
            let next = rels.len() + 2;
            rels.entry(*media).or_insert(next);
        }
    }
    rels
}

fn slide_rels(media_rels: &BTreeMap<usize, usize>) -> Result<String, fmt::Error> {
    let mut xml = String::with_capacity(256 + media_rels.len() * 128);
    xml.push_str(XML_DECL);
    xml.push_str(r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#);
    write!(xml, r#"<Relationship Id="rId1" Type="{REL_BASE}/slideLayout" Target="../slideLayouts/slideLayout1.xml"/>"#)?;
    for (media, rel) in media_rels {
        write!(
            xml,
            r#"<Relationship Id="rId{rel}" Type="{REL_BASE}/image" Target="../media/image{}.png"/>"#,
            media + 1
        )?;
    }
    xml.push_str("</Relationships>");
    Ok(xml)
}

fn slide_xml(slide: &Slide, media_rels: &BTreeMap<usize, usize>) -> Result<String, fmt::Error> {
    let mut xml = String::with_capacity(2048 + slide.shapes.len() * 512);
    xml.push_str(XML_DECL);
    write!(xml, r#"<p:sld xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}">"#)?;
    xml.push_str("<p:cSld>");
    if let Some(bg) = slide.background {
        xml.push_str("<p:bg><p:bgPr>");
        solid_fill(&mut xml, bg)?;
        xml.push_str("<a:effectLst/></p:bgPr></p:bg>");
    }
    xml.push_str("<p:spTree>");
    xml.push_str(GROUP_HEADER);

    // id 1 is the group itself.
    for (i, shape) in slide.shapes.iter().enumerate() {
        let id = i + 2;
        match shape {
            SlideShape::TextBox {
                frame,
                paragraphs,
                wrap,
            } => text_box(&mut xml, id, frame, paragraphs, *wrap)?,
            SlideShape::Shape {
                frame,
                geometry,
                fill,
                outline,
            } => vector_shape(&mut xml, id, frame, geometry, *fill, *outline)?,
            SlideShape::Picture { frame, media } => {
                let rel = media_rels.get(media).copied().ok_or(fmt::Error)?;
                picture(&mut xml, id, frame, rel)?;
            }
        }
    }

    xml.push_str("</p:spTree></p:cSld>");
    xml.push_str("<p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr>");
    xml.push_str("</p:sld>");
    Ok(xml)
}

fn xfrm(xml: &mut String, frame: &Frame, flip_h: bool, flip_v: bool) -> fmt::Result {
    xml.push_str("<a:xfrm");
    if flip_h {
        xml.push_str(r#" flipH="1""#);
    }
    if flip_v {
        xml.push_str(r#" flipV="1""#);
    }
    write!(
        xml,
        r#"><a:off x="{}" y="{}"/><a:ext cx="{}" cy="{}"/></a:xfrm>"#,
        frame.x, frame.y, frame.cx, frame.cy
    )
}

fn solid_fill(xml: &mut String, color: Color) -> fmt::Result {
    write!(xml, r#"<a:solidFill><a:srgbClr val="{}"/></a:solidFill>"#, color.to_hex())
}

fn text_box(xml: &mut String, id: usize, frame: &Frame, paragraphs: &[Paragraph], wrap: bool) -> fmt::Result {
    write!(
        xml,
        r#"<p:sp><p:nvSpPr><p:cNvPr id="{id}" name="TextBox {id}"/><p:cNvSpPr txBox="1"/><p:nvPr/></p:nvSpPr>"#
    )?;
    xml.push_str("<p:spPr>");
    xfrm(xml, frame, false, false)?;
    xml.push_str(r#"<a:prstGeom prst="rect"><a:avLst/></a:prstGeom><a:noFill/></p:spPr>"#);
    write!(
        xml,
        r#"<p:txBody><a:bodyPr wrap="{}" lIns="0" tIns="0" rIns="0" bIns="0" rtlCol="0"><a:noAutofit/></a:bodyPr><a:lstStyle/>"#,
        if wrap { "square" } else { "none" }
    )?;
    for p in paragraphs {
        paragraph(xml, p)?;
    }
    xml.push_str("</p:txBody></p:sp>");
    Ok(())
}

fn paragraph(xml: &mut String, p: &Paragraph) -> fmt::Result {
    let algn = match p.alignment {
        Alignment::Left => "l",
        Alignment::Center => "ctr",
        Alignment::Right => "r",
        Alignment::Justify => "just",
    };
    write!(xml, r#"<a:p><a:pPr algn="{algn}"/>"#)?;
    for run in &p.runs {
        text_run(xml, run)?;
    }
    match p.runs.last() {
        Some(last) => write!(xml, r#"<a:endParaRPr lang="en-US" sz="{}" dirty="0"/>"#, last.size)?,
        None => xml.push_str(r#"<a:endParaRPr lang="en-US" dirty="0"/>"#),
    }
    xml.push_str("</a:p>");
    Ok(())
}

fn text_run(xml: &mut String, run: &Run) -> fmt::Result {
    write!(xml, r#"<a:r><a:rPr lang="en-US" sz="{}""#, run.size)?;
    if run.bold {
        xml.push_str(r#" b="1""#);
    }
    if run.italic {
        xml.push_str(r#" i="1""#);
    }
    xml.push_str(r#" dirty="0">"#);
    // Fill must precede the typeface elements.
    solid_fill(xml, run.color)?;
    if let Some(font) = &run.font {
        let face = escape(font.as_str());
        write!(xml, r#"<a:latin typeface="{face}"/><a:cs typeface="{face}"/>"#)?;
    }
    write!(xml, "</a:rPr><a:t>{}</a:t></a:r>", escape(&xml_chars(&run.text)))
}

fn vector_shape(
    xml: &mut String,
    id: usize,
    frame: &Frame,
    geometry: &Geometry,
    fill: Option<Color>,
    outline: Option<Outline>,
) -> fmt::Result {
    write!(
        xml,
        r#"<p:sp><p:nvSpPr><p:cNvPr id="{id}" name="Shape {id}"/><p:cNvSpPr/><p:nvPr/></p:nvSpPr><p:spPr>"#
    )?;
    let (flip_h, flip_v) = match geometry {
        Geometry::Line { flip_h, flip_v } => (*flip_h, *flip_v),
        _ => (false, false),
    };
    xfrm(xml, frame, flip_h, flip_v)?;
    match geometry {
        Geometry::Preset(prst) => write!(xml, r#"<a:prstGeom prst="{prst}"><a:avLst/></a:prstGeom>"#)?,
        Geometry::Line { .. } => xml.push_str(r#"<a:prstGeom prst="line"><a:avLst/></a:prstGeom>"#),
        Geometry::Custom { paths } => custom_geometry(xml, frame, paths)?,
    }
    match fill {
        Some(c) => solid_fill(xml, c)?,
        None => xml.push_str("<a:noFill/>"),
    }
    match outline {
        Some(o) => {
            write!(xml, r#"<a:ln w="{}">"#, o.width)?;
            solid_fill(xml, o.color)?;
            xml.push_str("</a:ln>");
        }
        None => xml.push_str("<a:ln><a:noFill/></a:ln>"),
    }
    xml.push_str("</p:spPr></p:sp>");
    Ok(())
}

/// All subpaths go into one `a:path` so holes render against their outline.
fn custom_geometry(xml: &mut String, frame: &Frame, paths: &[CustomPath]) -> fmt::Result {
    xml.push_str(r#"<a:custGeom><a:avLst/><a:gdLst/><a:ahLst/><a:cxnLst/><a:rect l="0" t="0" r="r" b="b"/><a:pathLst>"#);
    write!(xml, r#"<a:path w="{}" h="{}">"#, frame.cx, frame.cy)?;
    for path in paths {
        let mut points = path.points.iter();
        if let Some((x, y)) = points.next() {
            write!(xml, r#"<a:moveTo><a:pt x="{x}" y="{y}"/></a:moveTo>"#)?;
        }
        for (x, y) in points {
            write!(xml, r#"<a:lnTo><a:pt x="{x}" y="{y}"/></a:lnTo>"#)?;
        }
        if path.closed {
            xml.push_str("<a:close/>");
        }
    }
    xml.push_str("</a:path></a:pathLst></a:custGeom>");
    Ok(())
}

fn picture(xml: &mut String, id: usize, frame: &Frame, rel: usize) -> fmt::Result {
    write!(
        xml,
        r#"<p:pic><p:nvPicPr><p:cNvPr id="{id}" name="Picture {id}"/><p:cNvPicPr><a:picLocks noChangeAspect="1"/></p:cNvPicPr><p:nvPr/></p:nvPicPr>"#
    )?;
    write!(
        xml,
        r#"<p:blipFill><a:blip r:embed="rId{rel}"/><a:stretch><a:fillRect/></a:stretch></p:blipFill><p:spPr>"#
    )?;
    xfrm(xml, frame, false, false)?;
    xml.push_str(r#"<a:prstGeom prst="rect"><a:avLst/></a:prstGeom></p:spPr></p:pic>"#);
    Ok(())
}

/// Drop characters XML 1.0 cannot carry (PDF text often has stray controls).
fn xml_chars(s: &str) -> String {
    s.chars()
        .filter(|&c| matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}'))
        .collect()
}

// ── Fixed parts ──────────────────────────────────────────────────────────

const GROUP_HEADER: &str = r#"<p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="0" cy="0"/><a:chOff x="0" y="0"/><a:chExt cx="0" cy="0"/></a:xfrm></p:grpSpPr>"#;

const PRES_PROPS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><p:presentationPr xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"/>"#;

const VIEW_PROPS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><p:viewPr xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:gridSpacing cx="76200" cy="76200"/></p:viewPr>"#;

const TABLE_STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><a:tblStyleLst xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" def="{5C22544A-7EE6-4342-B048-85BDC9FD1C3A}"/>"#;

const SLIDE_MASTER: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><p:sldMaster xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:cSld><p:bg><p:bgRef idx="1001"><a:schemeClr val="bg1"/></p:bgRef></p:bg><p:spTree><p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="0" cy="0"/><a:chOff x="0" y="0"/><a:chExt cx="0" cy="0"/></a:xfrm></p:grpSpPr></p:spTree></p:cSld><p:clrMap bg1="lt1" tx1="dk1" bg2="lt2" tx2="dk2" accent1="accent1" accent2="accent2" accent3="accent3" accent4="accent4" accent5="accent5" accent6="accent6" hlink="hlink" folHlink="folHlink"/><p:sldLayoutIdLst><p:sldLayoutId id="2147483649" r:id="rId1"/></p:sldLayoutIdLst><p:txStyles><p:titleStyle><a:lvl1pPr><a:defRPr sz="4400"><a:solidFill><a:schemeClr val="tx1"/></a:solidFill><a:latin typeface="+mj-lt"/></a:defRPr></a:lvl1pPr></p:titleStyle><p:bodyStyle><a:lvl1pPr><a:defRPr sz="1800"><a:solidFill><a:schemeClr val="tx1"/></a:solidFill><a:latin typeface="+mn-lt"/></a:defRPr></a:lvl1pPr></p:bodyStyle><p:otherStyle><a:lvl1pPr><a:defRPr sz="1800"><a:solidFill><a:schemeClr val="tx1"/></a:solidFill><a:latin typeface="+mn-lt"/></a:defRPr></a:lvl1pPr></p:otherStyle></p:txStyles></p:sldMaster>"#;

const SLIDE_MASTER_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideLayout" Target="../slideLayouts/slideLayout1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/theme" Target="../theme/theme1.xml"/></Relationships>"#;

const SLIDE_LAYOUT: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><p:sldLayout xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main" type="blank" preserve="1"><p:cSld name="Blank"><p:spTree><p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="0" cy="0"/><a:chOff x="0" y="0"/><a:chExt cx="0" cy="0"/></a:xfrm></p:grpSpPr></p:spTree></p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sldLayout>"#;

const SLIDE_LAYOUT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideMaster" Target="../slideMasters/slideMaster1.xml"/></Relationships>"#;

const THEME: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><a:theme xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" name="Office Theme"><a:themeElements><a:clrScheme name="Office"><a:dk1><a:sysClr val="windowText" lastClr="000000"/></a:dk1><a:lt1><a:sysClr val="window" lastClr="FFFFFF"/></a:lt1><a:dk2><a:srgbClr val="44546A"/></a:dk2><a:lt2><a:srgbClr val="E7E6E6"/></a:lt2><a:accent1><a:srgbClr val="4472C4"/></a:accent1><a:accent2><a:srgbClr val="ED7D31"/></a:accent2><a:accent3><a:srgbClr val="A5A5A5"/></a:accent3><a:accent4><a:srgbClr val="FFC000"/></a:accent4><a:accent5><a:srgbClr val="5B9BD5"/></a:accent5><a:accent6><a:srgbClr val="70AD47"/></a:accent6><a:hlink><a:srgbClr val="0563C1"/></a:hlink><a:folHlink><a:srgbClr val="954F72"/></a:folHlink></a:clrScheme><a:fontScheme name="Office"><a:majorFont><a:latin typeface="Calibri Light"/><a:ea typeface=""/><a:cs typeface=""/></a:majorFont><a:minorFont><a:latin typeface="Calibri"/><a:ea typeface=""/><a:cs typeface=""/></a:minorFont></a:fontScheme><a:fmtScheme name="Office"><a:fillStyleLst><a:solidFill><a:schemeClr val="phClr"/></a:solidFill><a:solidFill><a:schemeClr val="phClr"/></a:solidFill><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:fillStyleLst><a:lnStyleLst><a:ln w="6350"><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:ln><a:ln w="12700"><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:ln><a:ln w="19050"><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:ln></a:lnStyleLst><a:effectStyleLst><a:effectStyle><a:effectLst/></a:effectStyle><a:effectStyle><a:effectLst/></a:effectStyle><a:effectStyle><a:effectLst/></a:effectStyle></a:effectStyleLst><a:bgFillStyleLst><a:solidFill><a:schemeClr val="phClr"/></a:solidFill><a:solidFill><a:schemeClr val="phClr"/></a:solidFill><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:bgFillStyleLst></a:fmtScheme></a:themeElements><a:objectDefaults/><a:extraClrSchemeLst/></a:theme>"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    fn deck() -> Presentation {
        let run = Run {
            text: "Q3 <Results> & \u{0}notes".into(),
            font: Some("Helvetica".into()),
            size: 2400,
            bold: true,
            italic: false,
            color: Color::rgb(0x2c, 0x3e, 0x50),
        };
        let frame = Frame {
            x: 0,
            y: 0,
            cx: 914_400,
            cy: 457_200,
        };
        Presentation {
            width: 12_192_000,
            height: 6_858_000,
            title: Some("Quarterly".into()),
            slides: vec![
                Slide {
                    background: Some(Color::WHITE),
                    shapes: vec![
                        SlideShape::Shape {
                            frame,
                            geometry: Geometry::Preset("rect"),
                            fill: Some(Color::BLACK),
                            outline: None,
                        },
                        SlideShape::TextBox {
                            frame,
                            paragraphs: vec![Paragraph {
                                alignment: Alignment::Center,
                                runs: vec![run],
                            }],
                            wrap: false,
                        },
                        SlideShape::Picture { frame, media: 0 },
                    ],
                },
                Slide {
                    background: None,
                    shapes: vec![SlideShape::Picture { frame, media: 0 }],
                },
            ],
            media: vec![vec![0x89, b'P', b'N', b'G']],
        }
    }

    fn read(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> String {
        let mut s = String::new();
        archive.by_name(name).unwrap().read_to_string(&mut s).unwrap();
        s
    }

    #[test]
    fn package_has_required_parts() {
        let bytes = write_pptx(&deck()).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        for name in [
            "[Content_Types].xml",
            "_rels/.rels",
            "ppt/presentation.xml",
            "ppt/slideMasters/slideMaster1.xml",
            "ppt/slideLayouts/slideLayout1.xml",
            "ppt/theme/theme1.xml",
            "ppt/slides/slide1.xml",
            "ppt/slides/slide2.xml",
            "ppt/media/image1.png",
        ] {
            assert!(archive.by_name(name).is_ok(), "missing {name}");
        }
        assert!(archive.by_name("ppt/media/image2.png").is_err());

        let ct = read(&mut archive, "[Content_Types].xml");
        assert!(ct.contains("/ppt/slides/slide2.xml"));
        let pres = read(&mut archive, "ppt/presentation.xml");
        assert!(pres.contains(r#"<p:sldSz cx="12192000" cy="6858000"/>"#));
        assert!(pres.contains(r#"<p:sldId id="257" r:id="rId7"/>"#));
    }

    #[test]
    fn slide_keeps_order_and_escapes_text() {
        let bytes = write_pptx(&deck()).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let slide = read(&mut archive, "ppt/slides/slide1.xml");

        let shape = slide.find("Shape 2").unwrap();
        let text = slide.find("TextBox 3").unwrap();
        let pic = slide.find("Picture 4").unwrap();
        assert!(shape < text && text < pic);

        assert!(slide.contains("Q3 &lt;Results&gt; &amp; notes"));
        assert!(slide.contains(r#"wrap="none""#));
        assert!(slide.contains(r#"algn="ctr""#));
        assert!(slide.contains(r#"<a:srgbClr val="2C3E50"/></a:solidFill><a:latin typeface="Helvetica"/>"#));
        assert!(slide.contains("<p:bg>"));

        let rels = read(&mut archive, "ppt/slides/_rels/slide1.xml.rels");
        assert!(rels.contains(r#"Id="rId2""#));
        assert!(rels.contains("../media/image1.png"));
    }

    #[test]
    fn empty_presentation_still_packages() {
        let pres = Presentation {
            width: 9_144_000,
            height: 6_858_000,
            ..Presentation::default()
        };
        let bytes = write_pptx(&pres).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let xml = read(&mut archive, "ppt/presentation.xml");
        assert!(!xml.contains("sldIdLst"));
    }

    #[test]
    fn custom_geometry_paths() {
        let mut xml = String::new();
        let frame = Frame {
            x: 0,
            y: 0,
            cx: 100,
            cy: 100,
        };
        custom_geometry(
            &mut xml,
            &frame,
            &[CustomPath {
                points: vec![(0, 0), (100, 0), (50, 100)],
                closed: true,
            }],
        )
        .unwrap();
        assert!(xml.contains(r#"<a:path w="100" h="100"><a:moveTo><a:pt x="0" y="0"/></a:moveTo>"#));
        assert_eq!(xml.matches("<a:lnTo>").count(), 2);
        assert!(xml.contains("<a:close/>"));
    }
}
