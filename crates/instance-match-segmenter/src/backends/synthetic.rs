use std::collections::HashMap;

use image::RgbImage;
use instance_match_types::{Mask, MaskProposal};

use crate::config::SegmenterConfig;
use crate::error::ProposalError;
use crate::provider::ProposalProvider;

/// Color-segmentation proposal backend.
///
/// Stands in for a promptable segmentation model in tests and demos: the
/// dominant image color is treated as background, and each 4-connected
/// component of pixels that differ from it beyond the configured tolerance
/// becomes one proposal. Quality is the component's fill ratio inside its
/// bounding box, so compact blob-like objects score high and ragged noise
/// scores low.
#[derive(Debug)]
pub struct SyntheticProposalProvider {
    config: SegmenterConfig,
}

impl SyntheticProposalProvider {
    pub fn new(config: SegmenterConfig) -> Self {
        Self { config }
    }
}

impl ProposalProvider for SyntheticProposalProvider {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn propose(&self, image: &RgbImage) -> Result<Vec<MaskProposal>, ProposalError> {
        let width = image.width() as usize;
        let height = image.height() as usize;
        if width == 0 || height == 0 {
            return Err(ProposalError::backend(
                "synthetic",
                format!("image has degenerate dimensions {width}x{height}"),
            ));
        }

        let background = dominant_color(image);
        let tolerance = self.config.color_tolerance;
        let foreground: Vec<bool> = image
            .pixels()
            .map(|pixel| color_distance(pixel.0, background) > tolerance)
            .collect();

        let mut visited = vec![false; width * height];
        let mut proposals = Vec::new();
        let mut stack = Vec::new();

        for start in 0..width * height {
            if visited[start] || !foreground[start] {
                continue;
            }

            let mut component = vec![false; width * height];
            let mut area = 0usize;
            let mut min_x = width;
            let mut max_x = 0usize;
            let mut min_y = height;
            let mut max_y = 0usize;

            stack.clear();
            stack.push(start);
            visited[start] = true;
            while let Some(index) = stack.pop() {
                component[index] = true;
                area += 1;
                let x = index % width;
                let y = index / width;
                min_x = min_x.min(x);
                max_x = max_x.max(x);
                min_y = min_y.min(y);
                max_y = max_y.max(y);

                let mut push = |nx: usize, ny: usize, stack: &mut Vec<usize>| {
                    let nidx = ny * width + nx;
                    if !visited[nidx] && foreground[nidx] {
                        visited[nidx] = true;
                        stack.push(nidx);
                    }
                };
                if x > 0 {
                    push(x - 1, y, &mut stack);
                }
                if x + 1 < width {
                    push(x + 1, y, &mut stack);
                }
                if y > 0 {
                    push(x, y - 1, &mut stack);
                }
                if y + 1 < height {
                    push(x, y + 1, &mut stack);
                }
            }

            if area < self.config.min_region_area {
                continue;
            }

            let box_area = (max_x - min_x + 1) * (max_y - min_y + 1);
            let quality = area as f32 / box_area as f32;
            let mask = Mask::from_owned(image.width(), image.height(), component)?;
            proposals.push(MaskProposal::new(mask, quality));
        }

        proposals.sort_by(|a, b| {
            b.quality
                .partial_cmp(&a.quality)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(proposals)
    }
}

fn dominant_color(image: &RgbImage) -> [u8; 3] {
    // Quantized histogram vote; exact enough to pick a flat backdrop.
    let mut counts: HashMap<[u8; 3], u32> = HashMap::new();
    for pixel in image.pixels() {
        let key = [
            pixel.0[0] & 0xF0,
            pixel.0[1] & 0xF0,
            pixel.0[2] & 0xF0,
        ];
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|&(_, count)| count)
        .map(|(key, _)| [key[0] | 0x08, key[1] | 0x08, key[2] | 0x08])
        .unwrap_or([0, 0, 0])
}

fn color_distance(a: [u8; 3], b: [u8; 3]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| x.abs_diff(y) as u32)
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn scene() -> RgbImage {
        // gray backdrop with a red square and a blue square
        let mut image = RgbImage::from_pixel(64, 64, Rgb([128, 128, 128]));
        for y in 4..20 {
            for x in 4..20 {
                image.put_pixel(x, y, Rgb([220, 30, 30]));
            }
        }
        for y in 30..50 {
            for x in 36..56 {
                image.put_pixel(x, y, Rgb([30, 30, 220]));
            }
        }
        image
    }

    fn provider() -> SyntheticProposalProvider {
        SyntheticProposalProvider::new(SegmenterConfig {
            min_region_area: 20,
            ..SegmenterConfig::default()
        })
    }

    #[test]
    fn distinct_objects_become_distinct_proposals() {
        let proposals = provider().propose(&scene()).unwrap();
        assert_eq!(proposals.len(), 2);
        let areas: Vec<usize> = proposals.iter().map(|p| p.area).collect();
        assert!(areas.contains(&256));
        assert!(areas.contains(&400));
    }

    #[test]
    fn solid_rectangles_score_full_quality() {
        let proposals = provider().propose(&scene()).unwrap();
        for proposal in &proposals {
            assert!((proposal.quality - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn masks_cover_their_objects() {
        let proposals = provider().propose(&scene()).unwrap();
        let red = proposals
            .iter()
            .find(|p| p.mask.contains(10, 10))
            .expect("red square proposal");
        assert_eq!(red.mask.bounding_box().x1, 4);
        assert!(!red.mask.contains(40, 40));
    }

    #[test]
    fn blank_image_yields_no_proposals() {
        let image = RgbImage::from_pixel(32, 32, Rgb([200, 200, 200]));
        let proposals = provider().propose(&image).unwrap();
        assert!(proposals.is_empty());
    }

    #[test]
    fn tiny_specks_are_discarded() {
        let mut image = RgbImage::from_pixel(32, 32, Rgb([200, 200, 200]));
        image.put_pixel(5, 5, Rgb([0, 0, 0]));
        let proposals = provider().propose(&image).unwrap();
        assert!(proposals.is_empty());
    }
}
