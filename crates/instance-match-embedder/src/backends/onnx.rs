use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::RgbImage;
use image::imageops::FilterType;
use ndarray::{Array3, Array4, CowArray, IxDyn};
use once_cell::sync::OnceCell;
use ort::environment::Environment;
use ort::error::OrtError;
use ort::session::{Session, SessionBuilder};
use ort::value::Value;

use crate::engine::{EmbedderConfig, EmbeddingEngine};
use crate::error::EmbeddingError;
use crate::grid::PatchGrid;

// ImageNet statistics used by the ViT family this backend targets.
const IMAGE_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGE_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug)]
struct ModelHandle {
    _environment: Arc<Environment>,
    session: Session,
}

struct ModelRegistry {
    environment: Arc<Environment>,
    handles: Mutex<HashMap<PathBuf, Arc<ModelHandle>>>,
}

impl ModelRegistry {
    fn new() -> Result<Self, EmbeddingError> {
        let environment = Environment::builder()
            .with_name("instance-match-embedder")
            .build()
            .map_err(|err| EmbeddingError::Environment(err.to_string()))?;
        Ok(Self {
            environment: Arc::new(environment),
            handles: Mutex::new(HashMap::new()),
        })
    }

    fn get(&self, path: &Path) -> Result<Arc<ModelHandle>, EmbeddingError> {
        if !path.exists() {
            return Err(EmbeddingError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }

        let mut handles = self.handles.lock().expect("model registry poisoned");
        if let Some(handle) = handles.get(path) {
            return Ok(handle.clone());
        }

        let session = SessionBuilder::new(&self.environment)
            .map_err(map_session_error)?
            .with_model_from_file(path)
            .map_err(map_session_error)?;

        let handle = Arc::new(ModelHandle {
            _environment: Arc::clone(&self.environment),
            session,
        });
        handles.insert(path.to_path_buf(), handle.clone());
        Ok(handle)
    }
}

static MODEL_REGISTRY: OnceCell<ModelRegistry> = OnceCell::new();

fn registry() -> Result<&'static ModelRegistry, EmbeddingError> {
    MODEL_REGISTRY.get_or_try_init(ModelRegistry::new)
}

fn map_session_error(err: OrtError) -> EmbeddingError {
    EmbeddingError::Session(err.to_string())
}

/// Load the model once so configuration problems surface before the run.
pub fn ensure_model_ready(model_path: Option<&Path>) -> Result<(), EmbeddingError> {
    let path = model_path.ok_or(EmbeddingError::MissingModelPath)?;
    registry()?.get(path)?;
    Ok(())
}

/// Patch-embedding backend over an ONNX vision transformer.
///
/// The model is expected to take a normalized (1, 3, S, S) image and emit a
/// token sequence (1, T, D) whose trailing (S/patch)² entries are the patch
/// tokens; leading CLS/register tokens are dropped.
pub struct OnnxPatchEmbedder {
    config: EmbedderConfig,
    model: Arc<ModelHandle>,
}

impl OnnxPatchEmbedder {
    pub fn new(config: EmbedderConfig) -> Result<Self, EmbeddingError> {
        if config.patch_size == 0 || config.input_size < config.patch_size {
            return Err(EmbeddingError::Input(format!(
                "input size {} is not divisible into {}-pixel patches",
                config.input_size, config.patch_size
            )));
        }
        let model_path = config
            .model_path
            .as_ref()
            .ok_or(EmbeddingError::MissingModelPath)?
            .clone();
        let model = registry()?.get(&model_path)?;
        Ok(Self { config, model })
    }

    fn prepare_input(&self, image: &RgbImage) -> Array4<f32> {
        let size = self.config.input_size;
        let resized = image::imageops::resize(image, size, size, FilterType::Triangle);

        let side = size as usize;
        let mut data = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                let value = pixel[channel] as f32 / 255.0;
                data[[0, channel, y as usize, x as usize]] =
                    (value - IMAGE_MEAN[channel]) / IMAGE_STD[channel];
            }
        }
        data
    }
}

impl EmbeddingEngine for OnnxPatchEmbedder {
    fn name(&self) -> &'static str {
        "onnx-vit"
    }

    fn warm_up(&self) -> Result<(), EmbeddingError> {
        ensure_model_ready(self.config.model_path.as_deref())
    }

    fn patch_grid(&self, image: &RgbImage) -> Result<PatchGrid, EmbeddingError> {
        let input = self.prepare_input(image);
        let session = &self.model.session;
        let allocator = session.allocator();
        let input_dyn: CowArray<'_, f32, IxDyn> = CowArray::from(input.view().into_dyn());
        let value = Value::from_array(allocator, &input_dyn)
            .map_err(|err| EmbeddingError::Input(err.to_string()))?;
        let outputs = session
            .run(vec![value])
            .map_err(|err| EmbeddingError::Inference(err.to_string()))?;
        let tensor = outputs
            .into_iter()
            .next()
            .ok_or(EmbeddingError::InvalidOutputShape)?
            .try_extract::<f32>()
            .map_err(|err| EmbeddingError::Inference(err.to_string()))?;
        let view = tensor.view();
        let shape = view.shape().to_vec();

        let (tokens, dim) = match shape.as_slice() {
            [1, tokens, dim] => (*tokens, *dim),
            [tokens, dim] => (*tokens, *dim),
            _ => return Err(EmbeddingError::InvalidOutputShape),
        };

        let grid_side = (self.config.input_size / self.config.patch_size) as usize;
        let expected = grid_side * grid_side;
        if tokens < expected || dim == 0 {
            return Err(EmbeddingError::InvalidOutputShape);
        }

        // Patch tokens sit at the end of the sequence; anything before them
        // (CLS, registers) is summary state and excluded from pooling.
        let data: Vec<f32> = view
            .iter()
            .copied()
            .skip((tokens - expected) * dim)
            .collect();
        let features = Array3::from_shape_vec((grid_side, grid_side, dim), data)
            .map_err(|_| EmbeddingError::InvalidOutputShape)?;
        PatchGrid::new(features)
    }
}
