use instance_match_types::MaskError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProposalError {
    #[error("segmentation backend {backend} is not supported in this build")]
    Unsupported { backend: &'static str },

    #[error("{backend} backend failed: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },

    #[error("invalid mask from provider: {0}")]
    Mask(#[from] MaskError),

    #[error("failed to initialize onnx runtime environment: {0}")]
    Environment(String),

    #[error("failed to create inference session: {0}")]
    Session(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error(
        "no segmentation model path configured; provide --segmenter-model or set segmenter.model_path in the configuration file"
    )]
    MissingModelPath,

    #[error("failed to prepare model input: {0}")]
    Input(String),

    #[error("model inference failed: {0}")]
    Inference(String),

    #[error("unexpected model output shape")]
    InvalidOutputShape,
}

impl ProposalError {
    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            message: message.into(),
        }
    }
}
