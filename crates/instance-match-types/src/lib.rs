//! Shared domain models for the instance-match workspace.
//!
//! This crate centralizes lightweight data structures used across the
//! segmenter, embedder, and CLI crates. Keep it backend-agnostic and avoid
//! heavy dependencies so all crates can depend on it without pulling model
//! runtimes or native SDKs.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

pub type MaskResult<T> = Result<T, MaskError>;

/// Boolean pixel mask over one image, row-major.
///
/// The canonical in-pipeline mask representation. Providers that emit float
/// probability maps or scaled 8-bit masks convert at the boundary via
/// [`Mask::from_probabilities`] / [`Mask::from_luma8`]; everything past that
/// point sees booleans only. Immutable once built; clones share storage.
#[derive(Clone)]
pub struct Mask {
    width: u32,
    height: u32,
    area: usize,
    data: Arc<[bool]>,
}

impl fmt::Debug for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mask")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("area", &self.area)
            .finish()
    }
}

impl Mask {
    pub fn from_owned(width: u32, height: u32, data: Vec<bool>) -> MaskResult<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .ok_or(MaskError::DimensionOverflow { width, height })?;
        if data.len() != expected {
            return Err(MaskError::ShapeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let area = data.iter().filter(|&&v| v).count();
        Ok(Self {
            width,
            height,
            area,
            data: Arc::from(data.into_boxed_slice()),
        })
    }

    /// Binarize a float probability map at 0.5.
    pub fn from_probabilities(width: u32, height: u32, probs: &[f32]) -> MaskResult<Self> {
        Self::from_owned(width, height, probs.iter().map(|&p| p > 0.5).collect())
    }

    /// Binarize a scaled 8-bit mask at 128.
    pub fn from_luma8(width: u32, height: u32, values: &[u8]) -> MaskResult<Self> {
        Self::from_owned(width, height, values.iter().map(|&v| v >= 128).collect())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Count of foreground pixels.
    pub fn area(&self) -> usize {
        self.area
    }

    pub fn data(&self) -> &[bool] {
        &self.data
    }

    /// True when (x, y) is inside the mask bounds and set.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.data[y as usize * self.width as usize + x as usize]
    }

    /// Foreground area as a fraction of the full mask grid.
    pub fn area_fraction(&self) -> f64 {
        let total = self.width as u64 * self.height as u64;
        if total == 0 {
            return 0.0;
        }
        self.area as f64 / total as f64
    }

    /// Tight axis-aligned box over all foreground pixels.
    ///
    /// An all-false mask yields the degenerate zero-area box at the origin.
    pub fn bounding_box(&self) -> BoundingBox {
        if self.area == 0 {
            return BoundingBox::EMPTY;
        }
        let width = self.width as usize;
        let mut min_x = self.width;
        let mut max_x = 0u32;
        let mut min_y = self.height;
        let mut max_y = 0u32;
        for y in 0..self.height {
            let row = &self.data[y as usize * width..(y as usize + 1) * width];
            for (x, &set) in row.iter().enumerate() {
                if set {
                    let x = x as u32;
                    min_x = min_x.min(x);
                    max_x = max_x.max(x);
                    min_y = min_y.min(y);
                    max_y = max_y.max(y);
                }
            }
        }
        BoundingBox {
            x1: min_x,
            y1: min_y,
            x2: max_x + 1,
            y2: max_y + 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum MaskError {
    #[error("mask data length {actual} does not match width * height ({expected})")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("mask dimensions {width}x{height} overflowed while computing length")]
    DimensionOverflow { width: u32, height: u32 },
}

/// Axis-aligned pixel rectangle, max edges exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    /// Degenerate zero-area box returned for empty masks.
    pub const EMPTY: BoundingBox = BoundingBox {
        x1: 0,
        y1: 0,
        x2: 0,
        y2: 0,
    };

    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Intersection over union. A zero-area union returns 0.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let intersection = ix2.saturating_sub(ix1) as u64 * iy2.saturating_sub(iy1) as u64;
        let union = self.area() + other.area() - intersection;
        if union == 0 {
            return 0.0;
        }
        intersection as f32 / union as f32
    }
}

/// Unit-norm instance embedding.
///
/// Only ever constructed normalized, so the dot product in [`similarity`]
/// is the cosine similarity. Clones share storage.
///
/// [`similarity`]: InstanceDescriptor::similarity
#[derive(Clone)]
pub struct InstanceDescriptor {
    values: Arc<[f32]>,
}

impl fmt::Debug for InstanceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceDescriptor")
            .field("dim", &self.values.len())
            .finish()
    }
}

impl InstanceDescriptor {
    /// Normalize a raw vector into a descriptor.
    ///
    /// Returns `None` when the vector has zero (or non-finite) norm; callers
    /// must surface that condition rather than treat the input as unit.
    pub fn from_unnormalized(mut values: Vec<f32>) -> Option<Self> {
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if !norm.is_finite() || norm == 0.0 {
            return None;
        }
        for value in &mut values {
            *value /= norm;
        }
        Some(Self {
            values: Arc::from(values.into_boxed_slice()),
        })
    }

    /// Wrap a vector the provider guarantees is already unit-norm.
    pub fn from_unit(values: Vec<f32>) -> Self {
        Self {
            values: Arc::from(values.into_boxed_slice()),
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Cosine similarity; both sides are unit-norm by construction.
    pub fn similarity(&self, other: &InstanceDescriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }
}

/// One candidate object mask from the segmentation provider.
#[derive(Debug, Clone)]
pub struct MaskProposal {
    pub mask: Mask,
    pub area: usize,
    pub quality: f32,
}

impl MaskProposal {
    pub fn new(mask: Mask, quality: f32) -> Self {
        let area = mask.area();
        Self {
            mask,
            area,
            quality,
        }
    }
}

/// A surviving match for the reference instance in one target image.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceMatch {
    #[serde(skip)]
    pub mask: Mask,
    pub bbox: BoundingBox,
    pub similarity: f32,
    pub quality: f32,
    pub area: usize,
    #[serde(skip)]
    pub descriptor: InstanceDescriptor,
}

/// All matches found in a single target image, similarity-descending.
#[derive(Debug, Clone, Serialize)]
pub struct ImageMatchResult {
    pub image: PathBuf,
    pub matches: Vec<InstanceMatch>,
}

impl ImageMatchResult {
    pub fn empty(image: PathBuf) -> Self {
        Self {
            image,
            matches: Vec::new(),
        }
    }

    pub fn has_match(&self) -> bool {
        !self.matches.is_empty()
    }

    /// Highest-similarity match, if any.
    pub fn best_match(&self) -> Option<&InstanceMatch> {
        self.matches.first()
    }
}
