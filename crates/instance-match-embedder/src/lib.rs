mod backends;
mod engine;
mod error;
mod grid;
mod pooling;

#[cfg(feature = "engine-onnx")]
pub use backends::onnx::{OnnxPatchEmbedder, ensure_model_ready};
pub use backends::synthetic::SyntheticEmbeddingEngine;
pub use engine::{
    EmbedderConfig, EmbedderKind, EmbeddingEngine, PoolOutcome, available_embedders,
    build_embedding_engine, preflight_embedder,
};
pub use error::EmbeddingError;
pub use grid::PatchGrid;
pub use pooling::{PooledDescriptor, pool_batch, pool_descriptor};
