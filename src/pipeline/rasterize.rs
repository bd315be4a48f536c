//! PDF rasterization: render every page to a JPEG in the document's
//! `images/` directory.
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and must not run on async workers. The
//! function here blocks; the orchestrator runs it through a
//! [`TaskHandle`](crate::job::worker::TaskHandle) on the blocking pool.

use std::path::{Path, PathBuf};

use pdfium_render::prelude::*;
use tracing::{debug, info};

use crate::error::DeckError;
use crate::storage::StoragePaths;

/// Rasterize every page of a PDF into `images_dir` as `page_<n>.jpg`,
/// 1-based, at the given DPI. Blocking.
///
/// Returns the written image paths in page order.
pub fn rasterize_pdf(
    pdf_path: &Path,
    images_dir: &Path,
    dpi: u32,
) -> Result<Vec<PathBuf>, DeckError> {
    std::fs::create_dir_all(images_dir).map_err(|e| DeckError::OutputWriteFailed {
        path: images_dir.to_path_buf(),
        source: e,
    })?;

    let pdfium = pdfium_fetch::bind_pdfium()
        .map_err(|e| DeckError::PdfiumBindingFailed(e.to_string()))?;

    let document =
        pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| DeckError::PdfOpenFailed {
                path: pdf_path.to_path_buf(),
                detail: format!("{:?}", e),
            })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages ({})", total_pages, pdf_path.display());

    // PDF user space is 72 points per inch.
    let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);

    let mut written = Vec::with_capacity(total_pages);

    for idx in 0..total_pages {
        let page = pages
            .get(idx as u16)
            .map_err(|e| DeckError::RasterizationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let bitmap =
            page.render_with_config(&render_config)
                .map_err(|e| DeckError::RasterizationFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                })?;

        // JPEG has no alpha channel.
        let image = bitmap.as_image().to_rgb8();
        let out = images_dir.join(StoragePaths::page_image_name(idx + 1));
        image.save(&out).map_err(|e| DeckError::RasterizationFailed {
            page: idx + 1,
            detail: format!("failed to write {}: {}", out.display(), e),
        })?;

        debug!(
            "Rendered page {} -> {}x{} px at {}",
            idx + 1,
            image.width(),
            image.height(),
            out.display()
        );
        written.push(out);
    }

    Ok(written)
}
