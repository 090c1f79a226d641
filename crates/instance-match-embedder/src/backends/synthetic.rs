use image::RgbImage;
use ndarray::Array3;

use crate::engine::EmbeddingEngine;
use crate::error::EmbeddingError;
use crate::grid::PatchGrid;

const FEATURE_DIM: usize = 8;
const BIAS: f32 = 0.25;

/// Deterministic color-statistics embedder.
///
/// Stands in for a vision transformer in tests and demos: each patch cell
/// is described by its mean color and a few derived channels, so regions of
/// similar appearance land close in cosine space while differently colored
/// regions stay apart. A constant bias channel keeps all-black patches away
/// from the zero vector.
#[derive(Debug)]
pub struct SyntheticEmbeddingEngine {
    patch_size: u32,
}

impl SyntheticEmbeddingEngine {
    pub fn new(patch_size: u32) -> Self {
        Self {
            patch_size: patch_size.max(1),
        }
    }
}

impl EmbeddingEngine for SyntheticEmbeddingEngine {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn patch_grid(&self, image: &RgbImage) -> Result<PatchGrid, EmbeddingError> {
        let width = image.width();
        let height = image.height();
        if width == 0 || height == 0 {
            return Err(EmbeddingError::backend(
                "synthetic",
                format!("image has degenerate dimensions {width}x{height}"),
            ));
        }

        let patch = self.patch_size;
        let grid_width = width.div_ceil(patch) as usize;
        let grid_height = height.div_ceil(patch) as usize;

        let mut features = Array3::<f32>::zeros((grid_height, grid_width, FEATURE_DIM));
        for gy in 0..grid_height {
            for gx in 0..grid_width {
                let x0 = gx as u32 * patch;
                let y0 = gy as u32 * patch;
                let x1 = (x0 + patch).min(width);
                let y1 = (y0 + patch).min(height);

                let mut sum = [0.0f64; 3];
                for y in y0..y1 {
                    for x in x0..x1 {
                        let pixel = image.get_pixel(x, y);
                        for channel in 0..3 {
                            sum[channel] += pixel[channel] as f64;
                        }
                    }
                }
                let count = ((x1 - x0) * (y1 - y0)) as f64 * 255.0;
                let r = (sum[0] / count) as f32;
                let g = (sum[1] / count) as f32;
                let b = (sum[2] / count) as f32;

                let cell = [
                    r,
                    g,
                    b,
                    r.max(g).max(b),
                    r.min(g).min(b),
                    0.299 * r + 0.587 * g + 0.114 * b,
                    r.max(g).max(b) - r.min(g).min(b),
                    BIAS,
                ];
                for (channel, &value) in cell.iter().enumerate() {
                    features[[gy, gx, channel]] = value;
                }
            }
        }

        PatchGrid::new(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn grid_dimensions_follow_patch_size() {
        let engine = SyntheticEmbeddingEngine::new(14);
        let image = RgbImage::from_pixel(100, 56, Rgb([10, 20, 30]));
        let grid = engine.patch_grid(&image).unwrap();
        assert_eq!(grid.grid_width(), 8);
        assert_eq!(grid.grid_height(), 4);
        assert_eq!(grid.dim(), FEATURE_DIM);
    }

    #[test]
    fn uniform_image_has_uniform_patches() {
        let engine = SyntheticEmbeddingEngine::new(8);
        let image = RgbImage::from_pixel(32, 32, Rgb([255, 0, 0]));
        let grid = engine.patch_grid(&image).unwrap();
        let first = grid.patch(0, 0).to_vec();
        let last = grid.patch(3, 3).to_vec();
        assert_eq!(first, last);
        assert!((first[0] - 1.0).abs() < 1e-6);
        assert!(first[1].abs() < 1e-6);
    }

    #[test]
    fn same_color_regions_embed_alike_across_images() {
        let engine = SyntheticEmbeddingEngine::new(8);
        let a = RgbImage::from_pixel(16, 16, Rgb([40, 180, 90]));
        let b = RgbImage::from_pixel(16, 16, Rgb([40, 180, 90]));
        let grid_a = engine.patch_grid(&a).unwrap();
        let grid_b = engine.patch_grid(&b).unwrap();
        assert_eq!(grid_a.patch(0, 0).to_vec(), grid_b.patch(1, 1).to_vec());
    }
}
