use ndarray::{Array3, ArrayView1};

use crate::error::EmbeddingError;

/// Spatial grid of unnormalized per-patch feature vectors for one image.
///
/// Shape is (grid_height, grid_width, dim). Produced once per image and
/// shared across every mask pooled against that image; never mutated.
#[derive(Debug, Clone)]
pub struct PatchGrid {
    features: Array3<f32>,
}

impl PatchGrid {
    pub fn new(features: Array3<f32>) -> Result<Self, EmbeddingError> {
        let (grid_height, grid_width, dim) = features.dim();
        if grid_height == 0 || grid_width == 0 || dim == 0 {
            return Err(EmbeddingError::EmptyGrid {
                grid_height,
                grid_width,
                dim,
            });
        }
        Ok(Self { features })
    }

    pub fn from_flat(
        grid_height: usize,
        grid_width: usize,
        dim: usize,
        data: Vec<f32>,
    ) -> Result<Self, EmbeddingError> {
        let actual = data.len();
        let features = Array3::from_shape_vec((grid_height, grid_width, dim), data).map_err(
            |_| EmbeddingError::GridShape {
                grid_height,
                grid_width,
                dim,
                actual,
            },
        )?;
        Self::new(features)
    }

    pub fn grid_height(&self) -> usize {
        self.features.dim().0
    }

    pub fn grid_width(&self) -> usize {
        self.features.dim().1
    }

    pub fn dim(&self) -> usize {
        self.features.dim().2
    }

    pub fn patch(&self, y: usize, x: usize) -> ArrayView1<'_, f32> {
        self.features.slice(ndarray::s![y, x, ..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_flat_validates_length() {
        let err = PatchGrid::from_flat(2, 2, 3, vec![0.0; 11]).unwrap_err();
        assert!(matches!(err, EmbeddingError::GridShape { actual: 11, .. }));
    }

    #[test]
    fn empty_grid_is_rejected() {
        let err = PatchGrid::from_flat(0, 4, 3, Vec::new()).unwrap_err();
        assert!(matches!(err, EmbeddingError::EmptyGrid { .. }));
    }

    #[test]
    fn patch_view_indexes_row_major() {
        let grid = PatchGrid::from_flat(1, 2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(grid.patch(0, 1).to_vec(), vec![3.0, 4.0]);
    }
}
