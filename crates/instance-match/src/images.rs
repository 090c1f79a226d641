use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbImage;
use image::imageops::FilterType;

use crate::matcher::TargetImage;

/// Extensions this build can decode.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub fn load_image(path: &Path, max_size: Option<u32>) -> Result<RgbImage, image::ImageError> {
    let rgb = image::open(path)?.to_rgb8();
    Ok(match max_size {
        Some(limit) if rgb.width().max(rgb.height()) > limit && limit > 0 => {
            let longest = rgb.width().max(rgb.height());
            let width = (rgb.width() as u64 * limit as u64 / longest as u64).max(1) as u32;
            let height = (rgb.height() as u64 * limit as u64 / longest as u64).max(1) as u32;
            image::imageops::resize(&rgb, width, height, FilterType::Lanczos3)
        }
        _ => rgb,
    })
}

/// All supported image paths in a directory, sorted by name.
pub fn collect_image_paths(directory: &Path) -> io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let supported = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()));
        if supported {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Load target images, skipping unreadable files with a diagnostic.
pub fn load_targets(paths: &[PathBuf], max_size: Option<u32>) -> Vec<TargetImage> {
    let mut targets = Vec::with_capacity(paths.len());
    for path in paths {
        match load_image(path, max_size) {
            Ok(image) => targets.push(TargetImage {
                path: path.clone(),
                image: Arc::new(image),
            }),
            Err(err) => eprintln!("failed to load {}: {err}", path.display()),
        }
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn max_size_caps_the_longest_edge() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.png");
        RgbImage::from_pixel(200, 50, Rgb([9, 9, 9]))
            .save(&path)
            .unwrap();

        let loaded = load_image(&path, Some(100)).unwrap();
        assert_eq!(loaded.width(), 100);
        assert_eq!(loaded.height(), 25);

        let untouched = load_image(&path, None).unwrap();
        assert_eq!(untouched.width(), 200);
    }

    #[test]
    fn directory_listing_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.png", "notes.txt"] {
            let path = dir.path().join(name);
            if name.ends_with(".png") {
                RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])).save(&path).unwrap();
            } else {
                std::fs::write(&path, b"not an image").unwrap();
            }
        }
        let paths = collect_image_paths(dir.path()).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }

    #[test]
    fn unreadable_targets_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        RgbImage::from_pixel(4, 4, Rgb([1, 2, 3])).save(&good).unwrap();
        let bad = dir.path().join("bad.png");
        std::fs::write(&bad, b"garbage").unwrap();

        let targets = load_targets(&[good.clone(), bad], None);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].path, good);
    }
}
