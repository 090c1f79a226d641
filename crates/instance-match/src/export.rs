//! Result export: JSON summary plus optional mask, cutout, and overlay
//! artifacts, one set per surviving match.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use image::{GrayImage, Rgb, RgbImage, Rgba, RgbaImage};
use serde::Serialize;

use instance_match_types::{BoundingBox, ImageMatchResult, InstanceMatch, Mask};

use crate::matcher::{MatcherConfig, TargetImage};
use crate::reference::ReferenceInstance;

const CUTOUT_PADDING: u32 = 10;
const OVERLAY_COLOR: Rgb<u8> = Rgb([51, 204, 51]);
const OVERLAY_ALPHA: f32 = 0.45;
const BOX_THICKNESS: u32 = 2;

#[derive(Debug, Serialize)]
struct Summary<'a> {
    generated_at_unix: u64,
    reference: ReferenceSummary<'a>,
    config: ConfigSummary,
    results: Vec<ImageEntry<'a>>,
    total_images: usize,
    total_matches: usize,
    match_rate: f64,
}

#[derive(Debug, Serialize)]
struct ReferenceSummary<'a> {
    image: &'a Path,
    mask_area: usize,
    bbox: BoundingBox,
}

#[derive(Debug, Serialize)]
struct ConfigSummary {
    similarity_threshold: f32,
    top_k: usize,
    nms_iou_threshold: f32,
    min_area_ratio: f64,
    max_area_ratio: f64,
}

#[derive(Debug, Serialize)]
struct ImageEntry<'a> {
    image: &'a Path,
    matched: bool,
    matches: &'a [InstanceMatch],
}

pub struct ResultExporter {
    output_dir: PathBuf,
    masks_dir: PathBuf,
    cutouts_dir: PathBuf,
    overlays_dir: PathBuf,
}

impl ResultExporter {
    pub fn new(output_dir: &Path) -> io::Result<Self> {
        let masks_dir = output_dir.join("masks");
        let cutouts_dir = output_dir.join("cutouts");
        let overlays_dir = output_dir.join("overlays");
        std::fs::create_dir_all(&masks_dir)?;
        std::fs::create_dir_all(&cutouts_dir)?;
        std::fs::create_dir_all(&overlays_dir)?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            masks_dir,
            cutouts_dir,
            overlays_dir,
        })
    }

    pub fn summary_path(&self) -> PathBuf {
        self.output_dir.join("summary.json")
    }

    pub fn write_summary(
        &self,
        reference: &ReferenceInstance,
        results: &[ImageMatchResult],
        config: &MatcherConfig,
    ) -> Result<(), io::Error> {
        let total_images = results.len();
        let total_matches = results.iter().filter(|r| r.has_match()).count();
        let summary = Summary {
            generated_at_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            reference: ReferenceSummary {
                image: &reference.image,
                mask_area: reference.mask.area(),
                bbox: reference.bbox,
            },
            config: ConfigSummary {
                similarity_threshold: config.similarity_threshold,
                top_k: config.top_k,
                nms_iou_threshold: config.nms_iou_threshold,
                min_area_ratio: config.min_area_ratio,
                max_area_ratio: config.max_area_ratio,
            },
            results: results
                .iter()
                .map(|result| ImageEntry {
                    image: &result.image,
                    matched: result.has_match(),
                    matches: &result.matches,
                })
                .collect(),
            total_images,
            total_matches,
            match_rate: total_matches as f64 / total_images.max(1) as f64,
        };

        let json = serde_json::to_vec_pretty(&summary)?;
        std::fs::write(self.summary_path(), json)
    }

    /// Write mask, cutout, and overlay images for the reference and every
    /// surviving match.
    pub fn write_artifacts(
        &self,
        reference: &ReferenceInstance,
        reference_image: &RgbImage,
        targets: &[TargetImage],
        results: &[ImageMatchResult],
    ) -> Result<(), image::ImageError> {
        let ref_stem = file_stem(&reference.image);
        mask_to_gray(&reference.mask).save(self.masks_dir.join(format!("ref_{ref_stem}_mask.png")))?;
        cutout(reference_image, &reference.mask)
            .save(self.cutouts_dir.join(format!("ref_{ref_stem}_cutout.png")))?;
        overlay(reference_image, &reference.mask, &reference.bbox)
            .save(self.overlays_dir.join(format!("ref_{ref_stem}_overlay.jpg")))?;

        for (target, result) in targets.iter().zip(results) {
            let stem = file_stem(&result.image);
            if !result.has_match() {
                target
                    .image
                    .save(self.overlays_dir.join(format!("{stem}_no_match.jpg")))?;
                continue;
            }
            for (index, found) in result.matches.iter().enumerate() {
                let suffix = if result.matches.len() > 1 {
                    format!("_match{index}")
                } else {
                    String::new()
                };
                mask_to_gray(&found.mask)
                    .save(self.masks_dir.join(format!("{stem}{suffix}_mask.png")))?;
                cutout(&target.image, &found.mask)
                    .save(self.cutouts_dir.join(format!("{stem}{suffix}_cutout.png")))?;
                overlay(&target.image, &found.mask, &found.bbox)
                    .save(self.overlays_dir.join(format!("{stem}{suffix}_overlay.jpg")))?;
            }
        }
        Ok(())
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("image")
        .to_string()
}

fn mask_to_gray(mask: &Mask) -> GrayImage {
    let data = mask.data();
    let width = mask.width() as usize;
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        image::Luma([if data[y as usize * width + x as usize] {
            255u8
        } else {
            0
        }])
    })
}

/// Crop the masked region with padding; pixels outside the mask become
/// transparent.
fn cutout(image: &RgbImage, mask: &Mask) -> RgbaImage {
    let bbox = mask.bounding_box();
    if bbox.area() == 0 {
        return RgbaImage::new(1, 1);
    }

    let x1 = bbox.x1.saturating_sub(CUTOUT_PADDING);
    let y1 = bbox.y1.saturating_sub(CUTOUT_PADDING);
    let x2 = (bbox.x2 + CUTOUT_PADDING).min(image.width());
    let y2 = (bbox.y2 + CUTOUT_PADDING).min(image.height());

    RgbaImage::from_fn(x2 - x1, y2 - y1, |dx, dy| {
        let x = x1 + dx;
        let y = y1 + dy;
        let pixel = image.get_pixel(x, y);
        let alpha = if mask.contains(x, y) { 255u8 } else { 0 };
        Rgba([pixel[0], pixel[1], pixel[2], alpha])
    })
}

/// Tint the masked region and outline its bounding box.
fn overlay(image: &RgbImage, mask: &Mask, bbox: &BoundingBox) -> RgbImage {
    let mut out = image.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if mask.contains(x, y) {
            for channel in 0..3 {
                let blended = pixel[channel] as f32 * (1.0 - OVERLAY_ALPHA)
                    + OVERLAY_COLOR[channel] as f32 * OVERLAY_ALPHA;
                pixel[channel] = blended.clamp(0.0, 255.0) as u8;
            }
        }
    }
    draw_box_outline(&mut out, bbox);
    out
}

fn draw_box_outline(image: &mut RgbImage, bbox: &BoundingBox) {
    let width = image.width();
    let height = image.height();
    if bbox.area() == 0 || width == 0 || height == 0 {
        return;
    }
    let x1 = bbox.x1.min(width - 1);
    let y1 = bbox.y1.min(height - 1);
    let x2 = bbox.x2.min(width);
    let y2 = bbox.y2.min(height);

    for t in 0..BOX_THICKNESS {
        for x in x1..x2 {
            let top = (y1 + t).min(height - 1);
            let bottom = y2.saturating_sub(1 + t).max(y1);
            image.put_pixel(x, top, OVERLAY_COLOR);
            image.put_pixel(x, bottom, OVERLAY_COLOR);
        }
        for y in y1..y2 {
            let left = (x1 + t).min(width - 1);
            let right = x2.saturating_sub(1 + t).max(x1);
            image.put_pixel(left, y, OVERLAY_COLOR);
            image.put_pixel(right, y, OVERLAY_COLOR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use instance_match_types::InstanceDescriptor;
    use std::sync::Arc;

    fn square_mask(size: u32, x1: u32, y1: u32, x2: u32, y2: u32) -> Mask {
        let data = (0..size)
            .flat_map(|y| (0..size).map(move |x| x >= x1 && x < x2 && y >= y1 && y < y2))
            .collect();
        Mask::from_owned(size, size, data).unwrap()
    }

    fn sample_results() -> (ReferenceInstance, RgbImage, Vec<TargetImage>, Vec<ImageMatchResult>) {
        let mask = square_mask(32, 8, 8, 24, 24);
        let descriptor = InstanceDescriptor::from_unnormalized(vec![1.0, 0.0]).unwrap();
        let reference = ReferenceInstance {
            image: PathBuf::from("ref.png"),
            bbox: mask.bounding_box(),
            mask: mask.clone(),
            descriptor: descriptor.clone(),
        };
        let reference_image = RgbImage::from_pixel(32, 32, Rgb([90, 90, 90]));

        let target_image = Arc::new(RgbImage::from_pixel(32, 32, Rgb([90, 90, 90])));
        let targets = vec![
            TargetImage {
                path: PathBuf::from("t0.png"),
                image: target_image.clone(),
            },
            TargetImage {
                path: PathBuf::from("t1.png"),
                image: target_image,
            },
        ];
        let results = vec![
            ImageMatchResult {
                image: PathBuf::from("t0.png"),
                matches: vec![InstanceMatch {
                    bbox: mask.bounding_box(),
                    similarity: 0.91,
                    quality: 0.8,
                    area: mask.area(),
                    mask,
                    descriptor,
                }],
            },
            ImageMatchResult::empty(PathBuf::from("t1.png")),
        ];
        (reference, reference_image, targets, results)
    }

    #[test]
    fn summary_json_counts_matches() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = ResultExporter::new(dir.path()).unwrap();
        let (reference, _, _, results) = sample_results();
        exporter
            .write_summary(&reference, &results, &MatcherConfig::default())
            .unwrap();

        let raw = std::fs::read_to_string(exporter.summary_path()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["total_images"], 2);
        assert_eq!(parsed["total_matches"], 1);
        assert_eq!(parsed["results"][0]["matched"], true);
        assert_eq!(parsed["results"][1]["matched"], false);
        assert!((parsed["match_rate"].as_f64().unwrap() - 0.5).abs() < 1e-9);
        let first_match = &parsed["results"][0]["matches"][0];
        assert!((first_match["similarity"].as_f64().unwrap() - 0.91).abs() < 1e-6);
        assert!(first_match.get("mask").is_none());
    }

    #[test]
    fn artifacts_land_in_their_directories() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = ResultExporter::new(dir.path()).unwrap();
        let (reference, reference_image, targets, results) = sample_results();
        exporter
            .write_artifacts(&reference, &reference_image, &targets, &results)
            .unwrap();

        assert!(dir.path().join("masks/ref_ref_mask.png").exists());
        assert!(dir.path().join("cutouts/ref_ref_cutout.png").exists());
        assert!(dir.path().join("overlays/ref_ref_overlay.jpg").exists());
        assert!(dir.path().join("masks/t0_mask.png").exists());
        assert!(dir.path().join("overlays/t1_no_match.jpg").exists());
    }

    #[test]
    fn cutout_is_transparent_outside_the_mask() {
        let mask = square_mask(32, 8, 8, 24, 24);
        let image = RgbImage::from_pixel(32, 32, Rgb([10, 20, 30]));
        let cut = cutout(&image, &mask);
        // 10 px padding clipped to the image on the low side
        assert_eq!(cut.width(), 32);
        let center = cut.get_pixel(16, 16);
        assert_eq!(center[3], 255);
        let corner = cut.get_pixel(0, 0);
        assert_eq!(corner[3], 0);
    }
}
