use std::path::PathBuf;

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};

/// Tracks which values actually came from the command line, so config-file
/// values only apply where the user did not pass a flag.
#[derive(Debug, Default)]
pub struct CliSources {
    pub threshold_from_cli: bool,
    pub top_k_from_cli: bool,
    pub nms_iou_from_cli: bool,
    pub min_area_ratio_from_cli: bool,
    pub max_area_ratio_from_cli: bool,
    pub concurrency_from_cli: bool,
    pub segmenter_backend_from_cli: bool,
    pub embedder_backend_from_cli: bool,
    pub segmenter_model_from_cli: bool,
    pub embedder_model_from_cli: bool,
    pub export_artifacts_from_cli: bool,
}

impl CliSources {
    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            threshold_from_cli: value_from_cli(matches, "threshold"),
            top_k_from_cli: value_from_cli(matches, "top_k"),
            nms_iou_from_cli: value_from_cli(matches, "nms_iou"),
            min_area_ratio_from_cli: value_from_cli(matches, "min_area_ratio"),
            max_area_ratio_from_cli: value_from_cli(matches, "max_area_ratio"),
            concurrency_from_cli: value_from_cli(matches, "concurrency"),
            segmenter_backend_from_cli: value_from_cli(matches, "segmenter_backend"),
            embedder_backend_from_cli: value_from_cli(matches, "embedder_backend"),
            segmenter_model_from_cli: value_from_cli(matches, "segmenter_model"),
            embedder_model_from_cli: value_from_cli(matches, "embedder_model"),
            export_artifacts_from_cli: value_from_cli(matches, "export_artifacts"),
        }
    }
}

fn value_from_cli(matches: &ArgMatches, id: &str) -> bool {
    matches
        .value_source(id)
        .is_some_and(|source| matches!(source, ValueSource::CommandLine))
}

pub fn parse_cli() -> (CliArgs, CliSources) {
    let command = CliArgs::command();
    let matches = command.get_matches();
    let args = match CliArgs::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(err) => err.exit(),
    };
    let sources = CliSources::from_matches(&matches);
    (args, sources)
}

#[derive(Debug, Parser)]
#[command(
    name = "instance-match",
    about = "Find a selected product instance across a set of images",
    disable_help_subcommand = true
)]
pub struct CliArgs {
    /// Override the configuration file path
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Directory containing the image set
    #[arg(long = "image-dir", conflicts_with = "images")]
    pub image_dir: Option<PathBuf>,

    /// Explicit image file paths
    #[arg(long = "images", num_args = 1.., value_name = "FILE")]
    pub images: Vec<PathBuf>,

    /// Image the reference product is selected on
    #[arg(long = "reference", value_name = "FILE")]
    pub reference: Option<PathBuf>,

    /// Point prompt on the reference image: x y
    #[arg(
        long = "point",
        num_args = 2,
        value_names = ["X", "Y"],
        conflicts_with = "bbox"
    )]
    pub point: Vec<u32>,

    /// Box prompt on the reference image: x1 y1 x2 y2
    #[arg(long = "bbox", num_args = 4, value_names = ["X1", "Y1", "X2", "Y2"])]
    pub bbox: Vec<u32>,

    /// Output directory for summary and artifacts
    #[arg(long = "output", default_value = "./outputs")]
    pub output: PathBuf,

    /// Minimum cosine similarity for a candidate to count as a match
    #[arg(long = "threshold", id = "threshold", default_value_t = 0.65)]
    pub threshold: f32,

    /// Maximum matches kept per image
    #[arg(
        long = "top-k",
        id = "top_k",
        default_value_t = 3,
        value_parser = clap::value_parser!(usize)
    )]
    pub top_k: usize,

    /// Bounding-box IoU above which a lower-ranked detection is a duplicate
    #[arg(long = "nms-iou", id = "nms_iou", default_value_t = 0.5)]
    pub nms_iou: f32,

    /// Reject proposals smaller than this fraction of the image area
    #[arg(long = "min-area-ratio", id = "min_area_ratio", default_value_t = 0.001)]
    pub min_area_ratio: f64,

    /// Reject proposals larger than this fraction of the image area
    #[arg(long = "max-area-ratio", id = "max_area_ratio", default_value_t = 0.5)]
    pub max_area_ratio: f64,

    /// Number of images processed concurrently
    #[arg(
        long = "concurrency",
        id = "concurrency",
        default_value_t = 1,
        value_parser = clap::value_parser!(usize)
    )]
    pub concurrency: usize,

    /// Lock proposal generation to a specific backend
    #[arg(long = "segmenter-backend", id = "segmenter_backend")]
    pub segmenter_backend: Option<String>,

    /// Lock patch embedding to a specific backend
    #[arg(long = "embedder-backend", id = "embedder_backend")]
    pub embedder_backend: Option<String>,

    /// ONNX model path for the proposal backend
    #[arg(long = "segmenter-model", id = "segmenter_model")]
    pub segmenter_model: Option<PathBuf>,

    /// ONNX model path for the embedding backend
    #[arg(long = "embedder-model", id = "embedder_model")]
    pub embedder_model: Option<PathBuf>,

    /// Resize images so their longest edge does not exceed this
    #[arg(long = "max-size")]
    pub max_size: Option<u32>,

    /// Write mask/cutout/overlay images next to the JSON summary
    #[arg(
        long = "export-artifacts",
        id = "export_artifacts",
        value_parser = clap::value_parser!(bool)
    )]
    pub export_artifacts: Option<bool>,

    /// Print the list of available backends
    #[arg(long = "list-backends")]
    pub list_backends: bool,
}
