use std::path::PathBuf;

/// Provider-side proposal generation settings.
///
/// These shape what the segmentation backend emits, before the matching
/// engine applies its own area-ratio and similarity filtering.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    pub model_path: Option<PathBuf>,
    /// Model input edge length in pixels.
    pub input_size: u32,
    /// Discard proposals whose predicted quality falls below this.
    pub quality_threshold: f32,
    /// Discard proposals whose mask is unstable under threshold jitter.
    pub stability_threshold: f32,
    /// Discard proposals smaller than this many pixels.
    pub min_region_area: usize,
    /// Color distance at which a pixel separates from the background
    /// (synthetic backend only).
    pub color_tolerance: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            input_size: 1024,
            quality_threshold: 0.86,
            stability_threshold: 0.92,
            min_region_area: 100,
            color_tolerance: 48,
        }
    }
}
