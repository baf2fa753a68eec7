//! Input resolution: turn user-supplied paths or URLs into a validated
//! [`DocumentSource`].
//!
//! This is the upload gate in front of the pipeline. It enforces the rules
//! the loader relies on:
//!
//! * only PDF, PNG and JPEG files are accepted (magic bytes first, file
//!   extension as a tie-breaker);
//! * inputs are exactly one PDF **or** one or more images, never a mix;
//! * every file is at most `max_input_bytes`.
//!
//! URL inputs are downloaded straight into memory with the same size limit.
//! Everything downstream works on bytes, so in-memory callers can skip this
//! module and build a [`DocumentSource`] themselves.

use crate::config::ConversionConfig;
use crate::error::Pdf2PptxError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File contents plus the name used in messages and output naming.
#[derive(Debug, Clone)]
pub struct NamedBytes {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// A validated document ready for the loader.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    /// Exactly one PDF.
    Pdf(NamedBytes),
    /// One or more images, in page order.
    Images(Vec<NamedBytes>),
}

impl DocumentSource {
    /// Name of the first (or only) input.
    pub fn name(&self) -> &str {
        match self {
            DocumentSource::Pdf(f) => &f.name,
            DocumentSource::Images(files) => files.first().map(|f| f.name.as_str()).unwrap_or(""),
        }
    }

    /// Classify and validate already-loaded files.
    pub fn from_files(files: Vec<NamedBytes>, max_bytes: u64) -> Result<Self, Pdf2PptxError> {
        if files.is_empty() {
            return Err(Pdf2PptxError::EmptyInput);
        }

        let mut pdfs = 0usize;
        let mut images = 0usize;
        for f in &files {
            let size = f.bytes.len() as u64;
            if size > max_bytes {
                return Err(Pdf2PptxError::InputTooLarge {
                    name: f.name.clone(),
                    size,
                    limit: max_bytes,
                });
            }
            match classify(&f.name, &f.bytes)? {
                InputKind::Pdf => pdfs += 1,
                InputKind::Png | InputKind::Jpeg => images += 1,
            }
        }

        match (pdfs, images) {
            (1, 0) => {
                let file = files.into_iter().next().ok_or(Pdf2PptxError::EmptyInput)?;
                Ok(DocumentSource::Pdf(file))
            }
            (0, n) if n > 0 => Ok(DocumentSource::Images(files)),
            _ => Err(Pdf2PptxError::MixedInputKinds { pdfs, images }),
        }
    }
}

/// Accepted input kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Pdf,
    Png,
    Jpeg,
}

/// Identify a file by magic bytes, falling back to its extension.
pub fn classify(name: &str, bytes: &[u8]) -> Result<InputKind, Pdf2PptxError> {
    if bytes.starts_with(b"%PDF") {
        return Ok(InputKind::Pdf);
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Ok(InputKind::Png);
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Ok(InputKind::Jpeg);
    }

    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        // A PDF that lost its header is still a PDF the loader should get to
        // reject as unreadable, rather than an unsupported upload.
        Some("pdf") => Ok(InputKind::Pdf),
        Some("png") | Some("jpg") | Some("jpeg") => Err(Pdf2PptxError::UnsupportedFormat {
            name: name.to_string(),
            detail: "extension says image but the content is not PNG or JPEG".into(),
        }),
        Some(other) => Err(Pdf2PptxError::UnsupportedFormat {
            name: name.to_string(),
            detail: format!("'.{}' files are not supported", other),
        }),
        None => Err(Pdf2PptxError::UnsupportedFormat {
            name: name.to_string(),
            detail: "no recognisable header or extension".into(),
        }),
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve every input to bytes and validate the set.
pub async fn resolve_inputs<S: AsRef<str>>(
    inputs: &[S],
    config: &ConversionConfig,
) -> Result<DocumentSource, Pdf2PptxError> {
    let mut files = Vec::with_capacity(inputs.len());
    for input in inputs {
        let input = input.as_ref();
        let file = if is_url(input) {
            download_url(input, config.download_timeout_secs, config.max_input_bytes).await?
        } else {
            read_local(input, config.max_input_bytes).await?
        };
        files.push(file);
    }
    DocumentSource::from_files(files, config.max_input_bytes)
}

/// Read a local file, mapping I/O failures to input errors.
async fn read_local(path_str: &str, max_bytes: u64) -> Result<NamedBytes, Pdf2PptxError> {
    if path_str.trim().is_empty() {
        return Err(Pdf2PptxError::InvalidInput {
            input: path_str.to_string(),
        });
    }
    let path = PathBuf::from(path_str);

    let meta = match tokio::fs::metadata(&path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Pdf2PptxError::PermissionDenied { path });
        }
        Err(_) => return Err(Pdf2PptxError::FileNotFound { path }),
    };
    if !meta.is_file() {
        return Err(Pdf2PptxError::InvalidInput {
            input: path_str.to_string(),
        });
    }
    if meta.len() > max_bytes {
        return Err(Pdf2PptxError::InputTooLarge {
            name: path_str.to_string(),
            size: meta.len(),
            limit: max_bytes,
        });
    }

    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            Pdf2PptxError::PermissionDenied { path: path.clone() }
        } else {
            Pdf2PptxError::FileNotFound { path: path.clone() }
        }
    })?;

    debug!("Read local input: {} ({} bytes)", path.display(), bytes.len());
    Ok(NamedBytes {
        name: path_str.to_string(),
        bytes,
    })
}

/// Download a URL into memory.
async fn download_url(
    url: &str,
    timeout_secs: u64,
    max_bytes: u64,
) -> Result<NamedBytes, Pdf2PptxError> {
    info!("Downloading input from: {}", url);

    let parsed = reqwest::Url::parse(url).map_err(|_| Pdf2PptxError::InvalidInput {
        input: url.to_string(),
    })?;

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Pdf2PptxError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_send_err = |e: reqwest::Error| {
        if e.is_timeout() {
            Pdf2PptxError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Pdf2PptxError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(parsed.clone()).send().await.map_err(map_send_err)?;

    if !response.status().is_success() {
        return Err(Pdf2PptxError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let name = filename_from_url(&parsed);
    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(Pdf2PptxError::InputTooLarge {
                name,
                size: len,
                limit: max_bytes,
            });
        }
    }

    let bytes = response.bytes().await.map_err(map_send_err)?;
    info!("Downloaded {} bytes as '{}'", bytes.len(), name);

    Ok(NamedBytes {
        name,
        bytes: bytes.to_vec(),
    })
}

/// Last path segment when it looks like a filename.
fn filename_from_url(url: &reqwest::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|last| !last.is_empty() && last.contains('.'))
        .map(|last| last.to_string())
        .unwrap_or_else(|| "downloaded".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0];

    fn file(name: &str, bytes: &[u8]) -> NamedBytes {
        NamedBytes {
            name: name.into(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/deck.pdf"));
        assert!(is_url("http://example.com/deck.pdf"));
        assert!(!is_url("/tmp/deck.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn classify_by_magic_then_extension() {
        assert_eq!(classify("x.bin", b"%PDF-1.7").unwrap(), InputKind::Pdf);
        assert_eq!(classify("scan", PNG_MAGIC).unwrap(), InputKind::Png);
        assert_eq!(classify("photo.JPG", JPEG_MAGIC).unwrap(), InputKind::Jpeg);
        assert_eq!(classify("broken.pdf", b"garbage").unwrap(), InputKind::Pdf);
        assert!(matches!(
            classify("notes.docx", b"PK\x03\x04"),
            Err(Pdf2PptxError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            classify("fake.png", b"GIF89a"),
            Err(Pdf2PptxError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn single_pdf_accepted() {
        let src = DocumentSource::from_files(vec![file("a.pdf", b"%PDF-1.4")], 1024).unwrap();
        assert!(matches!(src, DocumentSource::Pdf(ref f) if f.name == "a.pdf"));
        assert_eq!(src.name(), "a.pdf");
    }

    #[test]
    fn images_accepted_in_order() {
        let src = DocumentSource::from_files(
            vec![file("2.png", PNG_MAGIC), file("1.jpg", JPEG_MAGIC)],
            1024,
        )
        .unwrap();
        match src {
            DocumentSource::Images(files) => {
                let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
                assert_eq!(names, vec!["2.png", "1.jpg"]);
            }
            other => panic!("expected images, got {other:?}"),
        }
    }

    #[test]
    fn mixed_and_multiple_pdfs_rejected() {
        let mixed = DocumentSource::from_files(
            vec![file("a.pdf", b"%PDF-1.4"), file("b.png", PNG_MAGIC)],
            1024,
        );
        assert!(matches!(
            mixed,
            Err(Pdf2PptxError::MixedInputKinds { pdfs: 1, images: 1 })
        ));

        let two = DocumentSource::from_files(
            vec![file("a.pdf", b"%PDF-1.4"), file("b.pdf", b"%PDF-1.4")],
            1024,
        );
        assert!(matches!(two, Err(Pdf2PptxError::MixedInputKinds { pdfs: 2, .. })));
    }

    #[test]
    fn empty_and_oversized_rejected() {
        assert!(matches!(
            DocumentSource::from_files(vec![], 1024),
            Err(Pdf2PptxError::EmptyInput)
        ));
        assert!(matches!(
            DocumentSource::from_files(vec![file("a.pdf", b"%PDF-1.4 0123456789")], 8),
            Err(Pdf2PptxError::InputTooLarge { limit: 8, .. })
        ));
    }

    #[test]
    fn filename_from_url_uses_last_segment() {
        let url = reqwest::Url::parse("https://example.com/files/deck.pdf?x=1").unwrap();
        assert_eq!(filename_from_url(&url), "deck.pdf");
        let bare = reqwest::Url::parse("https://example.com/download/").unwrap();
        assert_eq!(filename_from_url(&bare), "downloaded");
    }

    #[tokio::test]
    async fn missing_local_file_is_reported() {
        let config = ConversionConfig::default();
        let err = resolve_inputs(&["/definitely/not/here.pdf"], &config)
            .await
            .unwrap_err();
        assert!(matches!(err, Pdf2PptxError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn local_files_are_read_and_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slide.png");
        std::fs::write(&path, PNG_MAGIC).unwrap();
        let config = ConversionConfig::default();
        let src = resolve_inputs(&[path.to_string_lossy().to_string()], &config)
            .await
            .unwrap();
        assert!(matches!(src, DocumentSource::Images(ref f) if f.len() == 1));
    }
}
