//! # pdfium-fetch
//!
//! Runtime download and caching of the
//! [PDFium](https://pdfium.googlesource.com/pdfium/) library, so callers of
//! `pdfium-render` do not have to install libpdfium by hand or fiddle with
//! `LD_LIBRARY_PATH`.
//!
//! The first call to [`bind_pdfium`] (or [`ensure_pdfium_library`]) looks
//! for the platform library in the cache directory, downloads the matching
//! archive from
//! [bblanchon/pdfium-binaries](https://github.com/bblanchon/pdfium-binaries)
//! when it is missing, unpacks the shared library, and binds
//! `pdfium-render` to it. Every later call finds the cached file and never
//! touches the network.
//!
//! ## Usage
//!
//! ```rust,no_run
//! // Bind directly; downloads on first use.
//! let pdfium = pdfium_fetch::bind_pdfium().expect("PDFium unavailable");
//!
//! // Or fetch with progress first, then bind.
//! let path = pdfium_fetch::ensure_pdfium_library(Some(&|done, total| {
//!     if let Some(total) = total {
//!         eprint!("\rpdfium: {done}/{total} bytes");
//!     }
//! }))
//! .expect("download failed");
//! let pdfium = pdfium_fetch::bind_pdfium_from_path(&path).expect("bind failed");
//! ```
//!
//! ## Environment variables
//!
//! - `PDFIUM_LIB_PATH` points at an existing pdfium library and skips the
//!   download entirely.
//! - `PDFIUM_FETCH_CACHE_DIR` overrides the default cache directory.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use pdfium_render::prelude::Pdfium;
use thiserror::Error;

/// Release tag of the pdfium-binaries build this crate downloads.
pub const PDFIUM_VERSION: &str = "7690";

const RELEASE_URL: &str = "https://github.com/bblanchon/pdfium-binaries/releases/download";

/// Errors raised while locating, downloading or binding PDFium.
#[derive(Debug, Error)]
pub enum PdfiumFetchError {
    /// No prebuilt pdfium exists for this OS/architecture pair.
    #[error("No pdfium build for {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// The cache directory could not be created.
    #[error("Cache directory error: {0}")]
    CacheDir(#[source] std::io::Error),

    /// The archive download failed.
    #[error("Download failed: {0}")]
    Download(String),

    /// The downloaded archive could not be unpacked.
    #[error("Archive extraction failed: {0}")]
    Extract(String),

    /// `pdfium-render` could not load the library file.
    #[error("Cannot bind PDFium at '{path}': {reason}")]
    Bind { path: PathBuf, reason: String },
}

/// Download coordinates of the pdfium build for one platform.
struct Platform {
    /// Release asset name, e.g. `pdfium-linux-x64.tgz`.
    archive: &'static str,
    /// Path of the shared library inside the archive.
    member: &'static str,
    /// File name the library is cached under.
    lib_name: &'static str,
}

impl Platform {
    fn current() -> Result<Self, PdfiumFetchError> {
        let (os, arch) = (std::env::consts::OS, std::env::consts::ARCH);
        let (archive, member, lib_name) = match (os, arch) {
            ("linux", "x86_64") => ("pdfium-linux-x64.tgz", "lib/libpdfium.so", "libpdfium.so"),
            ("linux", "aarch64") => ("pdfium-linux-arm64.tgz", "lib/libpdfium.so", "libpdfium.so"),
            ("macos", "aarch64") => (
                "pdfium-mac-arm64.tgz",
                "lib/libpdfium.dylib",
                "libpdfium.dylib",
            ),
            ("macos", "x86_64") => (
                "pdfium-mac-x64.tgz",
                "lib/libpdfium.dylib",
                "libpdfium.dylib",
            ),
            ("windows", "x86_64") => ("pdfium-win-x64.tgz", "bin/pdfium.dll", "pdfium.dll"),
            ("windows", "aarch64") => ("pdfium-win-arm64.tgz", "bin/pdfium.dll", "pdfium.dll"),
            ("windows", "x86") => ("pdfium-win-x86.tgz", "bin/pdfium.dll", "pdfium.dll"),
            (os, arch) => {
                return Err(PdfiumFetchError::UnsupportedPlatform {
                    os: os.to_string(),
                    arch: arch.to_string(),
                })
            }
        };
        Ok(Platform {
            archive,
            member,
            lib_name,
        })
    }

    fn url(&self) -> String {
        format!("{RELEASE_URL}/chromium%2F{PDFIUM_VERSION}/{}", self.archive)
    }
}

/// Per-version cache directory for the downloaded library.
///
/// Defaults to `{user cache dir}/pdf2deck/pdfium-{VERSION}`; override the
/// base with `PDFIUM_FETCH_CACHE_DIR`.
pub fn pdfium_cache_dir() -> PathBuf {
    let base = match std::env::var("PDFIUM_FETCH_CACHE_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => dirs::cache_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
            .unwrap_or_else(std::env::temp_dir)
            .join("pdf2deck"),
    };
    base.join(format!("pdfium-{PDFIUM_VERSION}"))
}

static RESOLVED: OnceLock<PathBuf> = OnceLock::new();

/// Whether the library is already on disk, so the next bind needs no
/// network access.
pub fn is_pdfium_cached() -> bool {
    cached_pdfium_path().is_some()
}

/// On-disk path of the library, if present.
///
/// `PDFIUM_LIB_PATH` is honored before the cache directory is consulted.
pub fn cached_pdfium_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("PDFIUM_LIB_PATH") {
        let p = PathBuf::from(p);
        if p.exists() {
            return Some(p);
        }
    }
    let platform = Platform::current().ok()?;
    let p = pdfium_cache_dir().join(platform.lib_name);
    p.exists().then_some(p)
}

/// Make sure the PDFium library is on disk, downloading it if needed.
///
/// `on_progress` receives `(bytes_downloaded, total)` while the archive
/// streams in; pass `None` for a quiet fetch. The resolved path is memoized
/// for the rest of the process, so concurrent callers download at most once.
pub fn ensure_pdfium_library(
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<PathBuf, PdfiumFetchError> {
    if let Some(path) = RESOLVED.get() {
        return Ok(path.clone());
    }
    let path = locate_or_fetch(on_progress)?;
    // Losing the set race means another thread stored the same path.
    let _ = RESOLVED.set(path.clone());
    Ok(path)
}

/// Bind `pdfium-render` to the cached library, fetching it on first use.
pub fn bind_pdfium() -> Result<Pdfium, PdfiumFetchError> {
    let path = ensure_pdfium_library(None)?;
    bind_pdfium_from_path(&path)
}

/// Like [`bind_pdfium`], reporting download progress if a fetch happens.
pub fn bind_pdfium_with_progress(
    on_progress: &dyn Fn(u64, Option<u64>),
) -> Result<Pdfium, PdfiumFetchError> {
    let path = ensure_pdfium_library(Some(on_progress))?;
    bind_pdfium_from_path(&path)
}

/// Bind to a library at an explicit path, bypassing cache and download.
pub fn bind_pdfium_from_path(path: &Path) -> Result<Pdfium, PdfiumFetchError> {
    Pdfium::bind_to_library(path)
        .map(Pdfium::new)
        .map_err(|e| PdfiumFetchError::Bind {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn locate_or_fetch(
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<PathBuf, PdfiumFetchError> {
    if let Ok(env_path) = std::env::var("PDFIUM_LIB_PATH") {
        let p = PathBuf::from(&env_path);
        if p.exists() {
            return Ok(p);
        }
        eprintln!(
            "pdfium-fetch: PDFIUM_LIB_PATH '{}' does not exist, downloading instead",
            p.display()
        );
    }

    let platform = Platform::current()?;
    let cache_dir = pdfium_cache_dir();
    let lib_path = cache_dir.join(platform.lib_name);
    if lib_path.exists() {
        return Ok(lib_path);
    }

    std::fs::create_dir_all(&cache_dir).map_err(PdfiumFetchError::CacheDir)?;
    let archive = fetch_archive(&platform.url(), on_progress)?;
    unpack_member(&archive, platform.member, &lib_path)?;
    Ok(lib_path)
}

/// Stream a URL into memory, reporting progress every chunk.
fn fetch_archive(
    url: &str,
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<Vec<u8>, PdfiumFetchError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("pdfium-fetch/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| PdfiumFetchError::Download(e.to_string()))?;

    let mut response = client
        .get(url)
        .send()
        .map_err(|e| PdfiumFetchError::Download(format!("GET {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(PdfiumFetchError::Download(format!(
            "HTTP {} for {url}",
            response.status()
        )));
    }

    let total = response.content_length();
    let mut buf = Vec::with_capacity(total.unwrap_or(35 * 1024 * 1024) as usize);
    let mut chunk = vec![0u8; 64 * 1024];
    let mut downloaded: u64 = 0;

    loop {
        match response.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                downloaded += n as u64;
                if let Some(cb) = on_progress {
                    cb(downloaded, total);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(PdfiumFetchError::Download(format!("Read error: {e}"))),
        }
    }

    Ok(buf)
}

/// Unpack one member of a gzipped tar archive to `dest`.
fn unpack_member(
    archive_bytes: &[u8],
    member: &str,
    dest: &Path,
) -> Result<(), PdfiumFetchError> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let mut archive = Archive::new(GzDecoder::new(archive_bytes));
    for entry in archive
        .entries()
        .map_err(|e| PdfiumFetchError::Extract(e.to_string()))?
    {
        let mut entry = entry.map_err(|e| PdfiumFetchError::Extract(e.to_string()))?;
        let path = entry
            .path()
            .map_err(|e| PdfiumFetchError::Extract(e.to_string()))?;
        if path.to_string_lossy() == member {
            entry
                .unpack(dest)
                .map_err(|e| PdfiumFetchError::Extract(format!("Unpack failed: {e}")))?;
            return Ok(());
        }
    }

    Err(PdfiumFetchError::Extract(format!(
        "Library '{member}' not found in archive"
    )))
}
