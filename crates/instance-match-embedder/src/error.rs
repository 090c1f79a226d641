use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("patch grid must be non-empty, got {grid_height}x{grid_width}x{dim}")]
    EmptyGrid {
        grid_height: usize,
        grid_width: usize,
        dim: usize,
    },

    #[error("patch grid data length {actual} does not match {grid_height}x{grid_width}x{dim}")]
    GridShape {
        grid_height: usize,
        grid_width: usize,
        dim: usize,
        actual: usize,
    },

    #[error(
        "mask dimensions {mask_width}x{mask_height} do not match image dimensions {image_width}x{image_height}"
    )]
    MaskShape {
        mask_width: u32,
        mask_height: u32,
        image_width: u32,
        image_height: u32,
    },

    #[error("pooled feature vector has zero norm")]
    ZeroNorm,

    #[error("embedding backend {backend} is not supported in this build")]
    Unsupported { backend: &'static str },

    #[error("{backend} backend failed: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },

    #[error("failed to initialize onnx runtime environment: {0}")]
    Environment(String),

    #[error("failed to create inference session: {0}")]
    Session(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error(
        "no embedding model path configured; provide --embedder-model or set embedder.model_path in the configuration file"
    )]
    MissingModelPath,

    #[error("failed to prepare model input: {0}")]
    Input(String),

    #[error("model inference failed: {0}")]
    Inference(String),

    #[error("unexpected model output shape")]
    InvalidOutputShape,
}

impl EmbeddingError {
    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            message: message.into(),
        }
    }
}
