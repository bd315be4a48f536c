//! Source intake: verify and materialize the files a deck is built from.
//!
//! Verification is synchronous and runs before any job state exists, so a
//! bad upload is rejected immediately instead of surfacing as a failed
//! job. Materialization then places each accepted source into the batch
//! layout: PDFs next to their working directory, standalone images
//! directly into the document's `images/` directory where the page walker
//! will find them.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::DeckError;
use crate::storage::StoragePaths;

/// Media types accepted as deck sources.
pub const ACCEPTED_MIME: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/png",
    "image/jpg",
];

/// One source file for a deck, before verification.
#[derive(Debug, Clone)]
pub enum Source {
    /// In-memory upload.
    Bytes { name: String, data: Vec<u8> },
    /// File on the local filesystem.
    Path(PathBuf),
    /// Remote file, downloaded at ingest time.
    Url(String),
}

impl Source {
    /// Build a source from a CLI argument, treating `http(s)://` as a URL.
    pub fn from_arg(arg: &str) -> Self {
        if is_url(arg) {
            Source::Url(arg.to_string())
        } else {
            Source::Path(PathBuf::from(arg))
        }
    }

    /// Base file name this source will be stored under, if it has one.
    ///
    /// Directory components in upload names are stripped so a crafted
    /// name cannot escape the batch layout.
    pub fn file_name(&self) -> Option<String> {
        match self {
            Source::Bytes { name, .. } => base_name(name),
            Source::Path(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()),
            Source::Url(url) => Some(filename_from_url(url)),
        }
    }

    /// How the source was described by the caller, for error messages.
    fn raw_name(&self) -> String {
        match self {
            Source::Bytes { name, .. } => name.clone(),
            Source::Path(path) => path.display().to_string(),
            Source::Url(url) => url.clone(),
        }
    }
}

/// One materialized source, ready for the page pipeline.
#[derive(Debug, Clone)]
pub struct IngestedDocument {
    /// Base file name of the source.
    pub name: String,
    /// Stem the document's working tree is keyed by.
    pub stem: String,
    pub kind: DocumentKind,
}

#[derive(Debug, Clone)]
pub enum DocumentKind {
    /// A PDF awaiting rasterization.
    Pdf(PathBuf),
    /// A standalone page image, already placed in the document's
    /// `images/` directory.
    Image(PathBuf),
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Map a file name to its media type by extension.
pub fn media_type(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "pdf" => Some("application/pdf"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}

/// Reject a source batch that cannot produce a deck.
///
/// Errors out on an empty batch, a source without a usable file name, or
/// a file outside the accepted media types.
pub fn verify_sources(sources: &[Source]) -> Result<(), DeckError> {
    if sources.is_empty() {
        return Err(DeckError::NoSources);
    }
    for source in sources {
        let name = match source.file_name() {
            Some(name) if !name.trim().is_empty() => name,
            _ => {
                return Err(DeckError::InvalidFileName {
                    name: source.raw_name(),
                })
            }
        };
        if media_type(&name).is_none() {
            let ext = Path::new(&name)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("unknown")
                .to_lowercase();
            return Err(DeckError::UnsupportedMediaType { name, mime: ext });
        }
    }
    Ok(())
}

/// Verify and place every source into the batch layout.
pub async fn ingest_sources(
    sources: Vec<Source>,
    storage: &StoragePaths,
    timeout_secs: u64,
) -> Result<Vec<IngestedDocument>, DeckError> {
    verify_sources(&sources)?;
    let mut documents = Vec::with_capacity(sources.len());
    for source in sources {
        documents.push(materialize(source, storage, timeout_secs).await?);
    }
    Ok(documents)
}

async fn materialize(
    source: Source,
    storage: &StoragePaths,
    timeout_secs: u64,
) -> Result<IngestedDocument, DeckError> {
    match source {
        Source::Bytes { name, data } => {
            let name = base_name(&name).ok_or(DeckError::InvalidFileName { name })?;
            place_bytes(&name, &data, storage).await
        }
        Source::Path(path) => materialize_local(path, storage).await,
        Source::Url(url) => {
            let (name, data) = download(&url, timeout_secs).await?;
            place_bytes(&name, &data, storage).await
        }
    }
}

/// A local PDF is used in place; a local image is copied into the batch.
async fn materialize_local(
    path: PathBuf,
    storage: &StoragePaths,
) -> Result<IngestedDocument, DeckError> {
    if !path.exists() {
        return Err(DeckError::FileNotFound { path });
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| DeckError::InvalidFileName {
            name: path.display().to_string(),
        })?;
    let stem = file_stem(&name);

    if media_type(&name) == Some("application/pdf") {
        check_local_magic(&path)?;
        debug!("Using local PDF in place: {}", path.display());
        return Ok(IngestedDocument {
            name,
            stem,
            kind: DocumentKind::Pdf(path),
        });
    }

    let dest_dir = storage.doc_images_dir(&stem);
    let dest = dest_dir.join(&name);
    tokio::fs::create_dir_all(&dest_dir)
        .await
        .map_err(|e| DeckError::OutputWriteFailed {
            path: dest_dir.clone(),
            source: e,
        })?;
    tokio::fs::copy(&path, &dest)
        .await
        .map_err(|e| DeckError::OutputWriteFailed {
            path: dest.clone(),
            source: e,
        })?;
    debug!("Copied page image into batch: {}", dest.display());
    Ok(IngestedDocument {
        name,
        stem,
        kind: DocumentKind::Image(dest),
    })
}

/// Write in-memory source data into the batch layout.
async fn place_bytes(
    name: &str,
    data: &[u8],
    storage: &StoragePaths,
) -> Result<IngestedDocument, DeckError> {
    let stem = file_stem(name);
    let is_pdf = media_type(name) == Some("application/pdf");

    let dest_dir = if is_pdf {
        storage.doc_dir(&stem)
    } else {
        storage.doc_images_dir(&stem)
    };
    let dest = dest_dir.join(name);

    if is_pdf {
        check_pdf_magic(data, &dest)?;
    }

    tokio::fs::create_dir_all(&dest_dir)
        .await
        .map_err(|e| DeckError::OutputWriteFailed {
            path: dest_dir.clone(),
            source: e,
        })?;
    tokio::fs::write(&dest, data)
        .await
        .map_err(|e| DeckError::OutputWriteFailed {
            path: dest.clone(),
            source: e,
        })?;
    debug!("Materialized source: {}", dest.display());

    let kind = if is_pdf {
        DocumentKind::Pdf(dest)
    } else {
        DocumentKind::Image(dest)
    };
    Ok(IngestedDocument {
        name: name.to_string(),
        stem,
        kind,
    })
}

/// Download a URL and return its file name and contents.
async fn download(url: &str, timeout_secs: u64) -> Result<(String, Vec<u8>), DeckError> {
    info!("Downloading source from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DeckError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            DeckError::DownloadTimeout {
                url: url.to_string(),
                timeout_secs,
            }
        } else {
            DeckError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(DeckError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let name = filename_from_url(url);
    let bytes = response
        .bytes()
        .await
        .map_err(|e| DeckError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes for '{}'", bytes.len(), name);
    Ok((name, bytes.to_vec()))
}

/// Verify the PDF magic bytes (`%PDF`) in an in-memory buffer.
fn check_pdf_magic(data: &[u8], path: &Path) -> Result<(), DeckError> {
    if data.len() >= 4 && &data[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[..4]);
        return Err(DeckError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// Verify the PDF magic bytes of a local file.
fn check_local_magic(path: &Path) -> Result<(), DeckError> {
    use std::io::Read;
    match std::fs::File::open(path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(DeckError::NotAPdf {
                    path: path.to_path_buf(),
                    magic,
                });
            }
            Ok(())
        }
        Err(_) => Err(DeckError::FileNotFound {
            path: path.to_path_buf(),
        }),
    }
}

/// Extract a reasonable file name from a URL, defaulting to
/// `downloaded.pdf` when the path carries none.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}

/// Base name of an upload, with any directory components stripped.
fn base_name(name: &str) -> Option<String> {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(root: &Path) -> StoragePaths {
        StoragePaths::new(root.join("batch"), root.join("decks"), root.join("images"))
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn media_type_is_extension_driven() {
        assert_eq!(media_type("scan.pdf"), Some("application/pdf"));
        assert_eq!(media_type("scan.PDF"), Some("application/pdf"));
        assert_eq!(media_type("page.jpg"), Some("image/jpeg"));
        assert_eq!(media_type("page.JPEG"), Some("image/jpeg"));
        assert_eq!(media_type("page.png"), Some("image/png"));
        assert_eq!(media_type("notes.docx"), None);
        assert_eq!(media_type("no_extension"), None);
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(matches!(verify_sources(&[]), Err(DeckError::NoSources)));
    }

    #[test]
    fn unsupported_media_type_is_rejected() {
        let sources = vec![Source::Bytes {
            name: "notes.gif".into(),
            data: vec![],
        }];
        match verify_sources(&sources) {
            Err(DeckError::UnsupportedMediaType { name, mime }) => {
                assert_eq!(name, "notes.gif");
                assert_eq!(mime, "gif");
            }
            other => panic!("expected UnsupportedMediaType, got {other:?}"),
        }
    }

    #[test]
    fn blank_name_is_rejected() {
        let sources = vec![Source::Bytes {
            name: "".into(),
            data: vec![],
        }];
        assert!(matches!(
            verify_sources(&sources),
            Err(DeckError::InvalidFileName { .. })
        ));
    }

    #[test]
    fn url_sources_take_their_name_from_the_path() {
        assert_eq!(
            filename_from_url("https://example.com/scans/lecture1.pdf"),
            "lecture1.pdf"
        );
        assert_eq!(filename_from_url("https://example.com/"), "downloaded.pdf");
        assert_eq!(filename_from_url("https://example.com"), "downloaded.pdf");
    }

    #[test]
    fn pdf_magic_is_checked_before_writing() {
        let err = check_pdf_magic(b"<html>not a pdf", Path::new("/x/fake.pdf"));
        match err {
            Err(DeckError::NotAPdf { magic, .. }) => assert_eq!(&magic, b"<htm"),
            other => panic!("expected NotAPdf, got {other:?}"),
        }
        assert!(check_pdf_magic(b"%PDF-1.7", Path::new("/x/real.pdf")).is_ok());
        // Tiny buffers are left for pdfium to reject.
        assert!(check_pdf_magic(b"%P", Path::new("/x/tiny.pdf")).is_ok());
    }

    #[tokio::test]
    async fn image_bytes_land_in_the_document_images_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = storage(tmp.path());
        let sources = vec![Source::Bytes {
            name: "page_scan.png".into(),
            data: vec![1, 2, 3],
        }];

        let docs = ingest_sources(sources, &storage, 5).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].stem, "page_scan");
        match &docs[0].kind {
            DocumentKind::Image(path) => {
                assert_eq!(path, &storage.doc_images_dir("page_scan").join("page_scan.png"));
                assert!(path.exists());
            }
            other => panic!("expected image, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pdf_bytes_land_in_the_document_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = storage(tmp.path());
        let sources = vec![Source::Bytes {
            name: "lecture.pdf".into(),
            data: b"%PDF-1.4 stub".to_vec(),
        }];

        let docs = ingest_sources(sources, &storage, 5).await.unwrap();
        match &docs[0].kind {
            DocumentKind::Pdf(path) => {
                assert_eq!(path, &storage.doc_dir("lecture").join("lecture.pdf"));
                assert!(path.exists());
            }
            other => panic!("expected pdf, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn local_pdf_is_used_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = storage(tmp.path());
        let pdf = tmp.path().join("slides.pdf");
        std::fs::write(&pdf, b"%PDF-1.7 stub").unwrap();

        let docs = ingest_sources(vec![Source::Path(pdf.clone())], &storage, 5)
            .await
            .unwrap();
        match &docs[0].kind {
            DocumentKind::Pdf(path) => assert_eq!(path, &pdf),
            other => panic!("expected pdf, got {other:?}"),
        }
        assert!(!storage.doc_dir("slides").join("slides.pdf").exists());
    }

    #[tokio::test]
    async fn missing_local_source_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = storage(tmp.path());
        let err = ingest_sources(
            vec![Source::Path(tmp.path().join("absent.pdf"))],
            &storage,
            5,
        )
        .await;
        assert!(matches!(err, Err(DeckError::FileNotFound { .. })));
    }

    #[tokio::test]
    async fn upload_names_cannot_escape_the_batch_root() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = storage(tmp.path());
        let sources = vec![Source::Bytes {
            name: "../../evil.png".into(),
            data: vec![0],
        }];

        let docs = ingest_sources(sources, &storage, 5).await.unwrap();
        match &docs[0].kind {
            DocumentKind::Image(path) => {
                assert!(path.starts_with(storage.batch_root()));
                assert!(path.ends_with("evil/images/evil.png"));
            }
            other => panic!("expected image, got {other:?}"),
        }
    }
}
