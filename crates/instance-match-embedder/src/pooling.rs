//! Foreground feature averaging.
//!
//! Turns a pixel-resolution mask plus a patch grid into one unit-norm
//! instance descriptor: the mask is resampled to the grid's resolution,
//! binarized at 0.5 coverage, and the selected patch vectors are averaged
//! and normalized. Pooling only the patches belonging to the object keeps
//! background features out of the descriptor, which is what makes the same
//! object viewed from different angles land close in cosine space.

use instance_match_types::{InstanceDescriptor, Mask};

use crate::error::EmbeddingError;
use crate::grid::PatchGrid;

/// Result of pooling one mask against one grid.
#[derive(Debug, Clone)]
pub struct PooledDescriptor {
    pub descriptor: InstanceDescriptor,
    /// Number of grid cells that contributed to the average.
    pub foreground_patches: usize,
    /// True when the mask selected no cell and the whole grid was used.
    pub used_fallback: bool,
}

/// Pool one mask against a patch grid.
///
/// A mask whose resampled coverage selects no cell falls back to averaging
/// the entire grid; the fallback is reported on the output and diagnosed on
/// stderr, never silent. A zero-norm average is an error.
pub fn pool_descriptor(grid: &PatchGrid, mask: &Mask) -> Result<PooledDescriptor, EmbeddingError> {
    let grid_height = grid.grid_height();
    let grid_width = grid.grid_width();

    let coverage = resample_coverage(mask, grid_height, grid_width);
    let mut selection: Vec<bool> = coverage.iter().map(|&c| c > 0.5).collect();

    let mut used_fallback = false;
    if !selection.iter().any(|&s| s) {
        eprintln!(
            "no foreground patches for mask (area {} px); averaging the whole {}x{} grid",
            mask.area(),
            grid_height,
            grid_width
        );
        selection.iter_mut().for_each(|s| *s = true);
        used_fallback = true;
    }

    let mut sum = vec![0.0f32; grid.dim()];
    let mut count = 0usize;
    for y in 0..grid_height {
        for x in 0..grid_width {
            if !selection[y * grid_width + x] {
                continue;
            }
            for (acc, &value) in sum.iter_mut().zip(grid.patch(y, x).iter()) {
                *acc += value;
            }
            count += 1;
        }
    }

    let inv = 1.0 / count as f32;
    for value in &mut sum {
        *value *= inv;
    }

    let descriptor =
        InstanceDescriptor::from_unnormalized(sum).ok_or(EmbeddingError::ZeroNorm)?;
    Ok(PooledDescriptor {
        descriptor,
        foreground_patches: count,
        used_fallback,
    })
}

/// Pool N independent masks against one already-computed grid.
///
/// Each entry succeeds or fails on its own; callers decide whether to drop
/// failed candidates or abort.
pub fn pool_batch(
    grid: &PatchGrid,
    masks: &[Mask],
) -> Vec<Result<PooledDescriptor, EmbeddingError>> {
    masks.iter().map(|mask| pool_descriptor(grid, mask)).collect()
}

/// Bilinear resample of the {0,1} mask surface down to the grid resolution.
///
/// Returns fractional coverage per grid cell. Values straddling cell
/// boundaries land wherever the interpolation puts them; the hard 0.5 cut
/// downstream is intentionally kept as-is.
fn resample_coverage(mask: &Mask, grid_height: usize, grid_width: usize) -> Vec<f32> {
    let src_width = mask.width() as usize;
    let src_height = mask.height() as usize;
    if src_width == 0 || src_height == 0 {
        return vec![0.0; grid_width * grid_height];
    }

    let data = mask.data();
    let sample = |x: usize, y: usize| -> f32 {
        if data[y * src_width + x] { 1.0 } else { 0.0 }
    };

    let scale_x = if grid_width > 1 {
        (src_width - 1) as f32 / (grid_width - 1) as f32
    } else {
        0.0
    };
    let scale_y = if grid_height > 1 {
        (src_height - 1) as f32 / (grid_height - 1) as f32
    } else {
        0.0
    };

    let mut out = vec![0.0f32; grid_width * grid_height];
    for gy in 0..grid_height {
        let fy = scale_y * gy as f32;
        let y0 = fy.floor() as usize;
        let y1 = (y0 + 1).min(src_height - 1);
        let wy = fy - y0 as f32;
        for gx in 0..grid_width {
            let fx = scale_x * gx as f32;
            let x0 = fx.floor() as usize;
            let x1 = (x0 + 1).min(src_width - 1);
            let wx = fx - x0 as f32;

            let top = sample(x0, y0) + (sample(x1, y0) - sample(x0, y0)) * wx;
            let bottom = sample(x0, y1) + (sample(x1, y1) - sample(x0, y1)) * wx;
            out[gy * grid_width + gx] = top + (bottom - top) * wy;
        }
    }
    out
}
