//! Document loading: validated input bytes → [`Document`].
//!
//! A PDF is parsed twice over the same bytes: lopdf gives the structure the
//! direct extractor walks, pdfium gives the page rasters every tier needs.
//! Image sets are decoded straight into rasters and carry no structure.
//!
//! Parsing and rendering are CPU-bound and pdfium is not async-safe, so all
//! work happens inside `tokio::task::spawn_blocking`.
//!
//! Any failure here is fatal for the job: a document that cannot be opened
//! has no pages to fall back on.

use super::content::{decode_text_string, media_box};
use super::encode::fit_within;
use super::input::{DocumentSource, NamedBytes};
use super::render::{PageRasterizer, RasterTarget};
use crate::config::{ConversionConfig, PageSelection};
use crate::document::{
    Document, DocumentInfo, DocumentMetadata, Page, PageContent, PageInfo, SourceKind,
};
use crate::error::Pdf2PptxError;
use image::{DynamicImage, ImageReader};
use lopdf::ObjectId;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Options the blocking loader needs, detached from the async config.
#[derive(Debug, Clone)]
struct LoadOptions {
    password: Option<String>,
    pages: PageSelection,
    target: RasterTarget,
}

impl LoadOptions {
    fn from_config(config: &ConversionConfig) -> Self {
        Self {
            password: config.password.clone(),
            pages: config.pages.clone(),
            target: RasterTarget {
                dpi: config.dpi,
                max_pixels: config.max_rendered_pixels,
            },
        }
    }
}

/// Load a validated source into an ordered [`Document`].
pub async fn load_document(
    source: DocumentSource,
    config: &ConversionConfig,
    rasterizer: Arc<dyn PageRasterizer>,
) -> Result<Document, Pdf2PptxError> {
    let opts = LoadOptions::from_config(config);
    tokio::task::spawn_blocking(move || match source {
        DocumentSource::Pdf(file) => load_pdf(file, &opts, rasterizer.as_ref()),
        DocumentSource::Images(files) => load_images(files, &opts),
    })
    .await
    .map_err(|e| Pdf2PptxError::Internal(format!("loader task failed: {e}")))?
}

/// Replace the rasteriser's placeholder source name with the real one.
fn named(err: Pdf2PptxError, name: &str) -> Pdf2PptxError {
    match err {
        Pdf2PptxError::UnreadableDocument { detail, .. } => Pdf2PptxError::UnreadableDocument {
            source_name: name.to_string(),
            detail,
        },
        Pdf2PptxError::PasswordRequired { .. } => Pdf2PptxError::PasswordRequired {
            source_name: name.to_string(),
        },
        Pdf2PptxError::WrongPassword { .. } => Pdf2PptxError::WrongPassword {
            source_name: name.to_string(),
        },
        other => other,
    }
}

/// Outcome of the structural parse.
enum Structure {
    /// Parsed; pages in order as `(page object, media box)`.
    Parsed {
        pdf: Arc<lopdf::Document>,
        pages: Vec<(ObjectId, [f64; 4])>,
        metadata: DocumentMetadata,
    },
    /// Encrypted beyond what lopdf can read; pdfium may still render it.
    Encrypted,
}

fn parse_structure(name: &str, bytes: &[u8]) -> Result<Structure, Pdf2PptxError> {
    let pdf = match lopdf::Document::load_mem(bytes) {
        Ok(doc) => doc,
        Err(lopdf::Error::Decryption(_)) => return Ok(Structure::Encrypted),
        Err(e) => {
            return Err(Pdf2PptxError::UnreadableDocument {
                source_name: name.to_string(),
                detail: e.to_string(),
            })
        }
    };

    let pages: Vec<(ObjectId, [f64; 4])> = pdf
        .get_pages()
        .into_values()
        .map(|id| (id, media_box(&pdf, id)))
        .collect();
    let metadata = read_metadata(&pdf);
    Ok(Structure::Parsed {
        pdf: Arc::new(pdf),
        pages,
        metadata,
    })
}

fn read_metadata(pdf: &lopdf::Document) -> DocumentMetadata {
    let mut metadata = DocumentMetadata {
        pdf_version: Some(pdf.version.to_string()),
        ..DocumentMetadata::default()
    };
    let info = pdf
        .trailer
        .get(b"Info")
        .and_then(|o| o.as_reference())
        .and_then(|id| pdf.get_dictionary(id));
    if let Ok(info) = info {
        let field = |key: &[u8]| {
            info.get(key)
                .ok()
                .and_then(|o| o.as_str().ok())
                .map(decode_text_string)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        metadata.title = field(b"Title");
        metadata.author = field(b"Author");
        metadata.producer = field(b"Producer");
    }
    metadata
}

fn load_pdf(
    file: NamedBytes,
    opts: &LoadOptions,
    rasterizer: &dyn PageRasterizer,
) -> Result<Document, Pdf2PptxError> {
    let name = file.name.as_str();
    let password = opts.password.as_deref();

    let (structure, total) = match parse_structure(name, &file.bytes)? {
        Structure::Parsed {
            pdf,
            pages,
            metadata,
        } => {
            let total = pages.len();
            (Some((pdf, pages, metadata)), total)
        }
        Structure::Encrypted => {
            if password.is_none() {
                return Err(Pdf2PptxError::PasswordRequired {
                    source_name: name.to_string(),
                });
            }
            warn!("'{}' is encrypted; pages will be rendered without structure", name);
            let total = rasterizer
                .page_count(&file.bytes, password)
                .map_err(|e| named(e, name))?;
            (None, total)
        }
    };

    if total == 0 {
        return Err(Pdf2PptxError::UnreadableDocument {
            source_name: name.to_string(),
            detail: "document has no pages".to_string(),
        });
    }

    let indices = opts.pages.to_indices(total);
    if indices.is_empty() {
        return Err(Pdf2PptxError::PageOutOfRange { total });
    }
    info!("Loading '{}': {} of {} pages", name, indices.len(), total);

    let rasters = rasterizer
        .rasterize(&file.bytes, password, &indices, opts.target)
        .map_err(|e| named(e, name))?;
    if rasters.len() != indices.len() {
        return Err(Pdf2PptxError::Internal(format!(
            "rasteriser returned {} images for {} pages",
            rasters.len(),
            indices.len()
        )));
    }

    let (pdf, page_refs, metadata) = match structure {
        Some((pdf, pages, metadata)) => (Some(pdf), pages, metadata),
        None => (None, Vec::new(), DocumentMetadata::default()),
    };
    // lopdf may open a file whose streams it cannot decrypt.
    let pdf = pdf.filter(|doc| {
        if doc.is_encrypted() {
            warn!("'{}' is encrypted; skipping structured extraction", name);
            false
        } else {
            true
        }
    });

    let pages = indices
        .into_iter()
        .zip(rasters)
        .map(|(index, raster)| {
            let content = pdf.as_ref().and_then(|doc| {
                page_refs.get(index).map(|(page_id, media_box)| PageContent {
                    pdf: Arc::clone(doc),
                    page_id: *page_id,
                    media_box: *media_box,
                })
            });
            Page {
                index,
                raster: Arc::new(raster),
                content,
            }
        })
        .collect();

    Ok(Document {
        kind: SourceKind::Pdf,
        source_name: name.to_string(),
        pages,
        metadata,
    })
}

fn decode_image(file: &NamedBytes) -> Result<DynamicImage, Pdf2PptxError> {
    image::load_from_memory(&file.bytes).map_err(|e| Pdf2PptxError::UnreadableDocument {
        source_name: file.name.clone(),
        detail: e.to_string(),
    })
}

fn load_images(files: Vec<NamedBytes>, opts: &LoadOptions) -> Result<Document, Pdf2PptxError> {
    let total = files.len();
    let indices = opts.pages.to_indices(total);
    if indices.is_empty() {
        return Err(Pdf2PptxError::PageOutOfRange { total });
    }
    let source_name = files.first().map(|f| f.name.clone()).unwrap_or_default();

    let mut pages = Vec::with_capacity(indices.len());
    for index in indices {
        let file = &files[index];
        let decoded = decode_image(file)?;
        let raster = fit_within(&decoded, opts.target.max_pixels).into_owned();
        debug!(
            "Image page {} ('{}'): {}x{} px",
            index + 1,
            file.name,
            raster.width(),
            raster.height()
        );
        pages.push(Page {
            index,
            raster: Arc::new(raster),
            content: None,
        });
    }

    Ok(Document {
        kind: SourceKind::ImageSet,
        source_name,
        pages,
        metadata: DocumentMetadata::default(),
    })
}

/// Describe a source without rendering it.
pub fn inspect_source(source: &DocumentSource) -> Result<DocumentInfo, Pdf2PptxError> {
    match source {
        DocumentSource::Pdf(file) => match parse_structure(&file.name, &file.bytes)? {
            Structure::Parsed {
                pages, metadata, ..
            } => Ok(DocumentInfo {
                kind: SourceKind::Pdf,
                source_name: file.name.clone(),
                page_count: pages.len(),
                pages: pages
                    .iter()
                    .enumerate()
                    .map(|(i, (_, mb))| PageInfo {
                        page_num: i + 1,
                        width: mb[2] - mb[0],
                        height: mb[3] - mb[1],
                    })
                    .collect(),
                metadata,
            }),
            Structure::Encrypted => Err(Pdf2PptxError::PasswordRequired {
                source_name: file.name.clone(),
            }),
        },
        DocumentSource::Images(files) => {
            let mut pages = Vec::with_capacity(files.len());
            for (i, file) in files.iter().enumerate() {
                let (w, h) = ImageReader::new(Cursor::new(&file.bytes))
                    .with_guessed_format()
                    .map_err(|e| e.to_string())
                    .and_then(|r| r.into_dimensions().map_err(|e| e.to_string()))
                    .map_err(|detail| Pdf2PptxError::UnreadableDocument {
                        source_name: file.name.clone(),
                        detail,
                    })?;
                pages.push(PageInfo {
                    page_num: i + 1,
                    width: w as f64,
                    height: h as f64,
                });
            }
            Ok(DocumentInfo {
                kind: SourceKind::ImageSet,
                source_name: source.name().to_string(),
                page_count: files.len(),
                pages,
                metadata: DocumentMetadata::default(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::sync::Mutex;

    fn png(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([10, 20, 30])));
        crate::pipeline::encode::png_bytes(&img).unwrap()
    }

    fn opts(pages: PageSelection) -> LoadOptions {
        LoadOptions {
            password: None,
            pages,
            target: RasterTarget {
                dpi: 72,
                max_pixels: 2000,
            },
        }
    }

    /// Renders blank pages of a fixed size and records requested indices.
    struct BlankRasterizer {
        requested: Mutex<Vec<usize>>,
    }

    impl PageRasterizer for BlankRasterizer {
        fn page_count(&self, _bytes: &[u8], _password: Option<&str>) -> Result<usize, Pdf2PptxError> {
            Ok(0)
        }

        fn rasterize(
            &self,
            _bytes: &[u8],
            _password: Option<&str>,
            indices: &[usize],
            _target: RasterTarget,
        ) -> Result<Vec<DynamicImage>, Pdf2PptxError> {
            self.requested.lock().unwrap().extend_from_slice(indices);
            Ok(indices
                .iter()
                .map(|_| DynamicImage::ImageRgb8(RgbImage::new(40, 30)))
                .collect())
        }
    }

    fn two_page_pdf() -> Vec<u8> {
        use lopdf::{dictionary, Object, Stream};
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();
        for _ in 0..2 {
            let content = doc.add_object(Stream::new(dictionary! {}, b"0 0 m 10 10 l S".to_vec()));
            let page = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content,
            });
            kids.push(Object::Reference(page));
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => 2,
                "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(400), Object::Integer(300)],
            }),
        );
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog);
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn loads_pdf_with_structure_and_selection() {
        let file = NamedBytes {
            name: "deck.pdf".into(),
            bytes: two_page_pdf(),
        };
        let raster = BlankRasterizer {
            requested: Mutex::new(Vec::new()),
        };
        let doc = load_pdf(file, &opts(PageSelection::Single(2)), &raster).unwrap();
        assert_eq!(doc.kind, SourceKind::Pdf);
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.pages[0].index, 1);
        assert_eq!(*raster.requested.lock().unwrap(), vec![1]);
        let content = doc.pages[0].content.as_ref().unwrap();
        // MediaBox inherited from the page tree.
        assert_eq!(content.media_box, [0.0, 0.0, 400.0, 300.0]);
        assert_eq!(doc.metadata.pdf_version.as_deref(), Some("1.5"));
    }

    #[test]
    fn garbage_pdf_is_unreadable() {
        let file = NamedBytes {
            name: "broken.pdf".into(),
            bytes: b"%PDF-1.4\nthis is not a pdf".to_vec(),
        };
        let raster = BlankRasterizer {
            requested: Mutex::new(Vec::new()),
        };
        let err = load_pdf(file, &opts(PageSelection::All), &raster).unwrap_err();
        assert!(matches!(err, Pdf2PptxError::UnreadableDocument { ref source_name, .. } if source_name == "broken.pdf"));
    }

    #[test]
    fn selection_outside_document_is_rejected() {
        let file = NamedBytes {
            name: "deck.pdf".into(),
            bytes: two_page_pdf(),
        };
        let raster = BlankRasterizer {
            requested: Mutex::new(Vec::new()),
        };
        let err = load_pdf(file, &opts(PageSelection::Single(9)), &raster).unwrap_err();
        assert!(matches!(err, Pdf2PptxError::PageOutOfRange { total: 2 }));
    }

    #[test]
    fn loads_images_in_order() {
        let files = vec![
            NamedBytes {
                name: "a.png".into(),
                bytes: png(30, 20),
            },
            NamedBytes {
                name: "b.png".into(),
                bytes: png(50, 40),
            },
        ];
        let doc = load_images(files, &opts(PageSelection::All)).unwrap();
        assert_eq!(doc.kind, SourceKind::ImageSet);
        assert_eq!(doc.pages.len(), 2);
        assert_eq!(doc.pages[1].raster_size(), (50, 40));
        assert!(doc.pages.iter().all(|p| p.content.is_none()));
    }

    #[test]
    fn corrupt_image_is_unreadable() {
        let files = vec![NamedBytes {
            name: "bad.png".into(),
            bytes: b"\x89PNG\r\n\x1a\nnope".to_vec(),
        }];
        let err = load_images(files, &opts(PageSelection::All)).unwrap_err();
        assert!(matches!(err, Pdf2PptxError::UnreadableDocument { .. }));
    }

    #[test]
    fn inspect_reports_sizes_without_rendering() {
        let source = DocumentSource::Pdf(NamedBytes {
            name: "deck.pdf".into(),
            bytes: two_page_pdf(),
        });
        let info = inspect_source(&source).unwrap();
        assert_eq!(info.page_count, 2);
        assert_eq!(info.pages[1].width, 400.0);

        let images = DocumentSource::Images(vec![NamedBytes {
            name: "s.png".into(),
            bytes: png(64, 48),
        }]);
        let info = inspect_source(&images).unwrap();
        assert_eq!(info.pages[0].height, 48.0);
    }
}
