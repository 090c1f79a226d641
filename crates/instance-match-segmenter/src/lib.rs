mod backends;
mod config;
mod error;
mod provider;

#[cfg(feature = "backend-onnx")]
pub use backends::onnx::{OnnxMaskProposer, ensure_model_ready};
pub use backends::synthetic::SyntheticProposalProvider;
pub use config::SegmenterConfig;
pub use error::ProposalError;
pub use provider::{
    ProposalProvider, SegmenterKind, available_segmenters, build_proposal_provider,
    preflight_segmenter,
};
