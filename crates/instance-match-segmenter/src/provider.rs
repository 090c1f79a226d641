use std::sync::Arc;

use image::RgbImage;
use instance_match_types::MaskProposal;

use crate::backends::synthetic::SyntheticProposalProvider;
use crate::config::SegmenterConfig;
use crate::error::ProposalError;

/// Common interface for all mask-proposal backends.
pub trait ProposalProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn warm_up(&self) -> Result<(), ProposalError> {
        Ok(())
    }

    /// Candidate object masks for one image, best quality first.
    ///
    /// Proposals carry no semantic label; quality is the provider's own
    /// confidence in the mask, in [0, 1].
    fn propose(&self, image: &RgbImage) -> Result<Vec<MaskProposal>, ProposalError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterKind {
    Auto,
    Onnx,
    Synthetic,
}

impl SegmenterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SegmenterKind::Auto => "auto",
            SegmenterKind::Onnx => "onnx-mask",
            SegmenterKind::Synthetic => "synthetic",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "auto" => Some(SegmenterKind::Auto),
            "onnx-mask" | "onnx" => Some(SegmenterKind::Onnx),
            "synthetic" => Some(SegmenterKind::Synthetic),
            _ => None,
        }
    }
}

/// Kinds compiled into this build, in auto-selection priority order.
pub fn available_segmenters() -> &'static [SegmenterKind] {
    #[cfg(feature = "backend-onnx")]
    {
        &[SegmenterKind::Onnx, SegmenterKind::Synthetic]
    }
    #[cfg(not(feature = "backend-onnx"))]
    {
        &[SegmenterKind::Synthetic]
    }
}

pub fn build_proposal_provider(
    kind: SegmenterKind,
    config: SegmenterConfig,
) -> Result<Arc<dyn ProposalProvider>, ProposalError> {
    match kind {
        SegmenterKind::Auto => build_auto(config),
        SegmenterKind::Onnx => build_onnx(config),
        SegmenterKind::Synthetic => Ok(Arc::new(SyntheticProposalProvider::new(config))),
    }
}

/// Validate a backend choice before the run starts.
pub fn preflight_segmenter(
    kind: SegmenterKind,
    config: &SegmenterConfig,
) -> Result<(), ProposalError> {
    match kind {
        SegmenterKind::Auto | SegmenterKind::Synthetic => Ok(()),
        SegmenterKind::Onnx => ensure_onnx_ready(config),
    }
}

fn build_auto(config: SegmenterConfig) -> Result<Arc<dyn ProposalProvider>, ProposalError> {
    let mut last_err: Option<ProposalError> = None;
    for &candidate in available_segmenters() {
        match build_proposal_provider(candidate, config.clone()) {
            Ok(provider) => return Ok(provider),
            Err(err) => {
                eprintln!(
                    "auto segmentation backend candidate '{}' unavailable: {err}",
                    candidate.as_str()
                );
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or(ProposalError::Unsupported {
        backend: SegmenterKind::Auto.as_str(),
    }))
}

#[cfg(feature = "backend-onnx")]
fn build_onnx(config: SegmenterConfig) -> Result<Arc<dyn ProposalProvider>, ProposalError> {
    Ok(Arc::new(crate::backends::onnx::OnnxMaskProposer::new(
        config,
    )?))
}

#[cfg(not(feature = "backend-onnx"))]
fn build_onnx(_config: SegmenterConfig) -> Result<Arc<dyn ProposalProvider>, ProposalError> {
    Err(ProposalError::Unsupported {
        backend: SegmenterKind::Onnx.as_str(),
    })
}

#[cfg(feature = "backend-onnx")]
fn ensure_onnx_ready(config: &SegmenterConfig) -> Result<(), ProposalError> {
    crate::backends::onnx::ensure_model_ready(config.model_path.as_deref())
}

#[cfg(not(feature = "backend-onnx"))]
fn ensure_onnx_ready(_config: &SegmenterConfig) -> Result<(), ProposalError> {
    Err(ProposalError::Unsupported {
        backend: SegmenterKind::Onnx.as_str(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in [
            SegmenterKind::Auto,
            SegmenterKind::Onnx,
            SegmenterKind::Synthetic,
        ] {
            assert_eq!(SegmenterKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(SegmenterKind::from_name("nope"), None);
    }

    #[test]
    fn auto_always_resolves_to_some_provider() {
        let provider = build_proposal_provider(SegmenterKind::Auto, SegmenterConfig::default());
        assert!(provider.is_ok());
    }
}
