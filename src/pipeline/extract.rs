//! Region extraction: turn one page image plus its layout into an
//! [`ExtractionRecord`].
//!
//! Text regions go through the text recognizer, formula regions through
//! the formula recognizer, and figures, tables and images are cropped to
//! PNG files next to the record. Headers, page numbers and figure titles
//! are discarded outright, as is a formula box sitting inside a text
//! paragraph since the paragraph's OCR pass already covers its glyphs.
//!
//! A recognizer failing on one region costs that region, not the page.

use std::collections::HashSet;
use std::path::Path;

use image::RgbImage;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::engines::Engines;
use crate::model::{ExtractionRecord, PageLayout, Region, RegionLabel};

/// Extract all regions of one page.
///
/// Crops are written into `ocr_dir` as `<stem>_<label>_<n>.png` with a
/// counter shared across figure, table and image regions. Errors are
/// page-level (unreadable page image, unwritable output directory) and
/// described for the caller's failure report.
pub fn extract_page(
    image_path: &Path,
    layout: &PageLayout,
    ocr_dir: &Path,
    engines: &Engines,
    config: &PipelineConfig,
) -> Result<ExtractionRecord, String> {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| format!("page image has no stem: {}", image_path.display()))?;

    let page = image::open(image_path)
        .map_err(|e| format!("cannot open page image {}: {}", image_path.display(), e))?
        .to_rgb8();
    std::fs::create_dir_all(ocr_dir)
        .map_err(|e| format!("cannot create {}: {}", ocr_dir.display(), e))?;

    let (width, height) = page.dimensions();
    let covered = covered_formula_indexes(&layout.boxes, config.containment_threshold);

    let mut record = ExtractionRecord::default();
    let mut crop_counter = 0usize;

    for (idx, region) in layout.boxes.iter().enumerate() {
        match region.label {
            RegionLabel::Header | RegionLabel::Number | RegionLabel::FigureTitle => {
                debug!("discarding {} region", region.label.as_str());
                continue;
            }
            RegionLabel::Other => {
                debug!("ignoring region with unknown label at {:?}", region.coordinate);
                continue;
            }
            RegionLabel::Formula if covered.contains(&idx) => {
                debug!(
                    "formula at {:?} sits inside a text region, covered by OCR",
                    region.coordinate
                );
                continue;
            }
            _ => {}
        }

        let Some((x, y, w, h)) = region.bbox().crop_rect(width, height) else {
            debug!("skipping region outside the page: {:?}", region.coordinate);
            continue;
        };
        if w < config.min_crop_px || h < config.min_crop_px {
            debug!("skipping {}x{} region, below minimum crop size", w, h);
            continue;
        }

        let crop = image::imageops::crop_imm(&page, x, y, w, h).to_image();

        match region.label {
            RegionLabel::Text => match engines.text.recognize(&crop) {
                Ok(lines) => record.text.extend(lines),
                Err(e) => warn!("text recognition failed on {}: {}", stem, e),
            },
            RegionLabel::Formula => match engines.formula.recognize(&crop) {
                Ok(formulae) => record.formulae.extend(formulae),
                Err(e) => warn!("formula recognition failed on {}: {}", stem, e),
            },
            RegionLabel::Image | RegionLabel::Figure | RegionLabel::Table => {
                crop_counter += 1;
                save_crop(&crop, ocr_dir, &stem, region, crop_counter, &mut record);
            }
            RegionLabel::Header
            | RegionLabel::Number
            | RegionLabel::FigureTitle
            | RegionLabel::Other => unreachable!("filtered above"),
        }
    }

    debug!(
        "extracted {}: {} text, {} formulae, {} imgs",
        stem,
        record.text.len(),
        record.formulae.len(),
        record.imgs.len()
    );
    Ok(record)
}

fn save_crop(
    crop: &RgbImage,
    ocr_dir: &Path,
    stem: &str,
    region: &Region,
    counter: usize,
    record: &mut ExtractionRecord,
) {
    let name = format!("{stem}_{}_{}.png", region.label.as_str(), counter);
    let path = ocr_dir.join(&name);
    match crop.save(&path) {
        Ok(()) => record.imgs.push(path.display().to_string()),
        Err(e) => warn!("failed to save crop {}: {}", path.display(), e),
    }
}

/// Indexes of formula regions contained in a text region at the
/// configured ratio of their own area.
fn covered_formula_indexes(boxes: &[Region], threshold: f32) -> HashSet<usize> {
    let text_boxes: Vec<_> = boxes
        .iter()
        .filter(|r| r.label == RegionLabel::Text)
        .map(Region::bbox)
        .collect();

    boxes
        .iter()
        .enumerate()
        .filter(|(_, r)| r.label == RegionLabel::Formula)
        .filter(|(_, r)| {
            let b = r.bbox();
            text_boxes
                .iter()
                .any(|t| b.is_contained_within(t, threshold))
        })
        .map(|(idx, _)| idx)
        .collect()
}
