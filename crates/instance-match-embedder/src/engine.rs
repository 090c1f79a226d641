use std::path::PathBuf;
use std::sync::Arc;

use image::RgbImage;
use instance_match_types::Mask;

use crate::backends::synthetic::SyntheticEmbeddingEngine;
use crate::error::EmbeddingError;
use crate::grid::PatchGrid;
use crate::pooling::{PooledDescriptor, pool_descriptor};

/// Outcome of pooling one mask inside a batch call.
pub type PoolOutcome = Result<PooledDescriptor, EmbeddingError>;

/// Common interface for all patch-embedding backends.
///
/// Backends expose the raw patch grid; `embed_masked` is the pre-pooled
/// mode and routes through the same grid + pooling formula by default, so
/// descriptors from either mode are directly comparable.
pub trait EmbeddingEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn warm_up(&self) -> Result<(), EmbeddingError> {
        Ok(())
    }

    /// Per-patch feature grid for one image, excluding any whole-image
    /// summary token.
    fn patch_grid(&self, image: &RgbImage) -> Result<PatchGrid, EmbeddingError>;

    /// Pool a batch of masks against one grid computation for the image.
    ///
    /// The outer error covers the per-image grid; each mask then succeeds
    /// or fails independently so one malformed candidate cannot sink its
    /// siblings.
    fn embed_masked(
        &self,
        image: &RgbImage,
        masks: &[Mask],
    ) -> Result<Vec<PoolOutcome>, EmbeddingError> {
        let grid = self.patch_grid(image)?;
        Ok(masks
            .iter()
            .map(|mask| {
                if mask.width() != image.width() || mask.height() != image.height() {
                    return Err(EmbeddingError::MaskShape {
                        mask_width: mask.width(),
                        mask_height: mask.height(),
                        image_width: image.width(),
                        image_height: image.height(),
                    });
                }
                pool_descriptor(&grid, mask)
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    Auto,
    Onnx,
    Synthetic,
}

impl EmbedderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EmbedderKind::Auto => "auto",
            EmbedderKind::Onnx => "onnx-vit",
            EmbedderKind::Synthetic => "synthetic",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "auto" => Some(EmbedderKind::Auto),
            "onnx-vit" | "onnx" => Some(EmbedderKind::Onnx),
            "synthetic" => Some(EmbedderKind::Synthetic),
            _ => None,
        }
    }
}

/// Kinds compiled into this build, in auto-selection priority order.
pub fn available_embedders() -> &'static [EmbedderKind] {
    #[cfg(feature = "engine-onnx")]
    {
        &[EmbedderKind::Onnx, EmbedderKind::Synthetic]
    }
    #[cfg(not(feature = "engine-onnx"))]
    {
        &[EmbedderKind::Synthetic]
    }
}

#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    pub model_path: Option<PathBuf>,
    /// Model input edge length in pixels.
    pub input_size: u32,
    /// Patch edge length in pixels; grid dims are input_size / patch_size.
    pub patch_size: u32,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            input_size: 518,
            patch_size: 14,
        }
    }
}

pub fn build_embedding_engine(
    kind: EmbedderKind,
    config: EmbedderConfig,
) -> Result<Arc<dyn EmbeddingEngine>, EmbeddingError> {
    match kind {
        EmbedderKind::Auto => build_auto(config),
        EmbedderKind::Onnx => build_onnx(config),
        EmbedderKind::Synthetic => Ok(Arc::new(SyntheticEmbeddingEngine::new(config.patch_size))),
    }
}

/// Validate a backend choice before the run starts.
pub fn preflight_embedder(kind: EmbedderKind, config: &EmbedderConfig) -> Result<(), EmbeddingError> {
    match kind {
        EmbedderKind::Auto | EmbedderKind::Synthetic => Ok(()),
        EmbedderKind::Onnx => ensure_onnx_ready(config),
    }
}

fn build_auto(config: EmbedderConfig) -> Result<Arc<dyn EmbeddingEngine>, EmbeddingError> {
    let mut last_err: Option<EmbeddingError> = None;
    for &candidate in available_embedders() {
        match build_embedding_engine(candidate, config.clone()) {
            Ok(engine) => return Ok(engine),
            Err(err) => {
                eprintln!(
                    "auto embedding backend candidate '{}' unavailable: {err}",
                    candidate.as_str()
                );
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or(EmbeddingError::Unsupported {
        backend: EmbedderKind::Auto.as_str(),
    }))
}

#[cfg(feature = "engine-onnx")]
fn build_onnx(config: EmbedderConfig) -> Result<Arc<dyn EmbeddingEngine>, EmbeddingError> {
    Ok(Arc::new(crate::backends::onnx::OnnxPatchEmbedder::new(
        config,
    )?))
}

#[cfg(not(feature = "engine-onnx"))]
fn build_onnx(_config: EmbedderConfig) -> Result<Arc<dyn EmbeddingEngine>, EmbeddingError> {
    Err(EmbeddingError::Unsupported {
        backend: EmbedderKind::Onnx.as_str(),
    })
}

#[cfg(feature = "engine-onnx")]
fn ensure_onnx_ready(config: &EmbedderConfig) -> Result<(), EmbeddingError> {
    crate::backends::onnx::ensure_model_ready(config.model_path.as_deref())
}

#[cfg(not(feature = "engine-onnx"))]
fn ensure_onnx_ready(_config: &EmbedderConfig) -> Result<(), EmbeddingError> {
    Err(EmbeddingError::Unsupported {
        backend: EmbedderKind::Onnx.as_str(),
    })
}
