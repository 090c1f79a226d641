use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::RgbImage;
use image::imageops::FilterType;
use ndarray::{Array4, CowArray, IxDyn};
use once_cell::sync::OnceCell;
use ort::environment::Environment;
use ort::error::OrtError;
use ort::session::{Session, SessionBuilder};
use ort::value::Value;

use instance_match_types::{Mask, MaskProposal};

use crate::config::SegmenterConfig;
use crate::error::ProposalError;
use crate::provider::ProposalProvider;

// Stability is probed by re-thresholding the probability map slightly above
// and below the 0.5 cut; a mask that barely changes is trustworthy.
const STABILITY_OFFSET: f32 = 0.05;

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
    fn new() -> Result<Self, ProposalError> {
        let environment = Environment::builder()
            .with_name("instance-match-segmenter")
            .build()
            .map_err(|err| ProposalError::Environment(err.to_string()))?;
        Ok(Self {
            environment: Arc::new(environment),
            handles: Mutex::new(HashMap::new()),
        })
    }

    fn get(&self, path: &Path) -> Result<Arc<ModelHandle>, ProposalError> {
        if !path.exists() {
            return Err(ProposalError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }

        let mut handles = self.handles.lock().expect("model registry poisoned");
        if let Some(handle) = handles.get(path) {
            return Ok(handle.clone());
        }

        let session = SessionBuilder::new(&self.environment)
            .map_err(|err| ProposalError::Session(err.to_string()))?
            .with_model_from_file(path)
            .map_err(|err| ProposalError::Session(err.to_string()))?;

        let handle = Arc::new(ModelHandle {
            _environment: Arc::clone(&self.environment),
            session,
        });
        handles.insert(path.to_path_buf(), handle.clone());
        Ok(handle)
    }
}

static MODEL_REGISTRY: OnceCell<ModelRegistry> = OnceCell::new();

fn registry() -> Result<&'static ModelRegistry, ProposalError> {
    MODEL_REGISTRY.get_or_try_init(ModelRegistry::new)
}

fn map_ort_error(err: OrtError) -> ProposalError {
    ProposalError::Inference(err.to_string())
}

/// Load the model once so configuration problems surface before the run.
pub fn ensure_model_ready(model_path: Option<&Path>) -> Result<(), ProposalError> {
    let path = model_path.ok_or(ProposalError::MissingModelPath)?;
    registry()?.get(path)?;
    Ok(())
}

/// Class-agnostic mask-proposal backend over an ONNX model.
///
/// The model takes a (1, 3, S, S) image in [0, 1] and emits two outputs: a
/// stack of mask probability maps (1, N, Hm, Wm) and per-mask quality
/// scores (1, N). Maps are upsampled to image resolution, binarized at 0.5,
/// and filtered by score, stability, and minimum region area.
pub struct OnnxMaskProposer {
    config: SegmenterConfig,
    model: Arc<ModelHandle>,
}

impl OnnxMaskProposer {
    pub fn new(config: SegmenterConfig) -> Result<Self, ProposalError> {
        let model_path = config
            .model_path
            .as_ref()
            .ok_or(ProposalError::MissingModelPath)?
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
                data[[0, channel, y as usize, x as usize]] = pixel[channel] as f32 / 255.0;
            }
        }
        data
    }
}

impl ProposalProvider for OnnxMaskProposer {
    fn name(&self) -> &'static str {
        "onnx-mask"
    }

    fn warm_up(&self) -> Result<(), ProposalError> {
        ensure_model_ready(self.config.model_path.as_deref())
    }

    fn propose(&self, image: &RgbImage) -> Result<Vec<MaskProposal>, ProposalError> {
        let input = self.prepare_input(image);
        let session = &self.model.session;
        let allocator = session.allocator();
        let input_dyn: CowArray<'_, f32, IxDyn> = CowArray::from(input.view().into_dyn());
        let value = Value::from_array(allocator, &input_dyn)
            .map_err(|err| ProposalError::Input(err.to_string()))?;
        let outputs = session.run(vec![value]).map_err(map_ort_error)?;

        let mut iter = outputs.into_iter();
        let masks = iter
            .next()
            .ok_or(ProposalError::InvalidOutputShape)?
            .try_extract::<f32>()
            .map_err(map_ort_error)?;
        let scores = iter
            .next()
            .ok_or(ProposalError::InvalidOutputShape)?
            .try_extract::<f32>()
            .map_err(map_ort_error)?;

        let masks_view = masks.view();
        let scores_view = scores.view();

        let (count, map_height, map_width) = match masks_view.shape() {
            [1, n, h, w] => (*n, *h, *w),
            [n, h, w] => (*n, *h, *w),
            _ => return Err(ProposalError::InvalidOutputShape),
        };
        let score_values: Vec<f32> = scores_view.iter().copied().collect();
        if score_values.len() < count || map_height == 0 || map_width == 0 {
            return Err(ProposalError::InvalidOutputShape);
        }

        let flat: Vec<f32> = masks_view.iter().copied().collect();
        let map_area = map_height * map_width;
        let width = image.width();
        let height = image.height();

        let mut proposals = Vec::new();
        for index in 0..count {
            let score = score_values[index];
            if score < self.config.quality_threshold {
                continue;
            }

            let map = &flat[index * map_area..(index + 1) * map_area];
            let resized = resize_probability_map(
                map,
                map_width,
                map_height,
                width as usize,
                height as usize,
            );

            let stability = stability_score(&resized);
            if stability < self.config.stability_threshold {
                continue;
            }

            let mask = Mask::from_probabilities(width, height, &resized)?;
            if mask.area() < self.config.min_region_area {
                continue;
            }
            proposals.push(MaskProposal::new(mask, score.clamp(0.0, 1.0)));
        }

        proposals.sort_by(|a, b| {
            b.quality
                .partial_cmp(&a.quality)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(proposals)
    }
}

fn resize_probability_map(
    src: &[f32],
    src_width: usize,
    src_height: usize,
    dst_width: usize,
    dst_height: usize,
) -> Vec<f32> {
    if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
        return vec![0.0; dst_width * dst_height];
    }

    let scale_x = if dst_width > 1 {
        (src_width - 1) as f32 / (dst_width - 1) as f32
    } else {
        0.0
    };
    let scale_y = if dst_height > 1 {
        (src_height - 1) as f32 / (dst_height - 1) as f32
    } else {
        0.0
    };

    let mut out = vec![0.0f32; dst_width * dst_height];
    for dy in 0..dst_height {
        let fy = scale_y * dy as f32;
        let y0 = fy.floor() as usize;
        let y1 = (y0 + 1).min(src_height - 1);
        let wy = fy - y0 as f32;
        for dx in 0..dst_width {
            let fx = scale_x * dx as f32;
            let x0 = fx.floor() as usize;
            let x1 = (x0 + 1).min(src_width - 1);
            let wx = fx - x0 as f32;

            let top = src[y0 * src_width + x0]
                + (src[y0 * src_width + x1] - src[y0 * src_width + x0]) * wx;
            let bottom = src[y1 * src_width + x0]
                + (src[y1 * src_width + x1] - src[y1 * src_width + x0]) * wx;
            out[dy * dst_width + dx] = top + (bottom - top) * wy;
        }
    }
    out
}

/// IoU between the map thresholded slightly above and below the 0.5 cut.
///
/// The high-threshold mask is a subset of the low-threshold one, so the IoU
/// reduces to an area ratio.
fn stability_score(probabilities: &[f32]) -> f32 {
    let mut high = 0usize;
    let mut low = 0usize;
    for &p in probabilities {
        if p > 0.5 + STABILITY_OFFSET {
            high += 1;
        }
        if p > 0.5 - STABILITY_OFFSET {
            low += 1;
        }
    }
    if low == 0 {
        return 0.0;
    }
    high as f32 / low as f32
}
