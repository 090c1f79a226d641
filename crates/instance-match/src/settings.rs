use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use instance_match_embedder::EmbedderKind;
use instance_match_segmenter::SegmenterKind;
use instance_match_types::BoundingBox;

use crate::cli::{CliArgs, CliSources};
use crate::matcher::MatcherConfig;
use crate::reference::ReferencePrompt;

const SEGMENTER_BACKEND_ENV: &str = "INSTMATCH_SEG_BACKEND";
const EMBEDDER_BACKEND_ENV: &str = "INSTMATCH_EMB_BACKEND";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    segmenter_backend: Option<String>,
    embedder_backend: Option<String>,
    segmenter_model: Option<String>,
    embedder_model: Option<String>,
    similarity_threshold: Option<f32>,
    top_k: Option<usize>,
    nms_iou_threshold: Option<f32>,
    min_area_ratio: Option<f64>,
    max_area_ratio: Option<f64>,
    concurrency: Option<usize>,
    export_artifacts: Option<bool>,
}

/// Fully resolved run settings: CLI over config file over built-in defaults.
#[derive(Debug, Clone)]
pub struct EffectiveSettings {
    pub image_dir: Option<PathBuf>,
    pub images: Vec<PathBuf>,
    pub reference: PathBuf,
    pub prompt: ReferencePrompt,
    pub output: PathBuf,
    pub max_size: Option<u32>,
    pub segmenter_backend: SegmenterKind,
    pub embedder_backend: EmbedderKind,
    pub segmenter_model: Option<PathBuf>,
    pub embedder_model: Option<PathBuf>,
    pub matcher: MatcherConfig,
    pub export_artifacts: bool,
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    InvalidValue {
        path: Option<PathBuf>,
        field: &'static str,
        value: String,
    },
    NotFound {
        path: PathBuf,
    },
    MissingArgument {
        message: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(
                    f,
                    "failed to read config file {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::Parse { path, source } => {
                write!(
                    f,
                    "failed to parse config file {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::InvalidValue { path, field, value } => {
                if let Some(path) = path {
                    write!(
                        f,
                        "invalid value '{}' for '{}' in {}",
                        value,
                        field,
                        path.display()
                    )
                } else {
                    write!(f, "invalid value '{}' for '{}'", value, field)
                }
            }
            ConfigError::NotFound { path } => {
                write!(f, "config file {} does not exist", path.display())
            }
            ConfigError::MissingArgument { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub fn resolve_settings(
    cli: &CliArgs,
    sources: &CliSources,
) -> Result<EffectiveSettings, ConfigError> {
    let (file, config_path) = load_config(cli.config.as_deref())?;
    merge(cli, sources, file, config_path)
}

fn load_config(path_override: Option<&Path>) -> Result<(FileConfig, Option<PathBuf>), ConfigError> {
    if let Some(path) = path_override {
        let path = path.to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound { path });
        }
        let config = read_config(&path)?;
        return Ok((config, Some(path)));
    }

    if let Some(project_path) = project_config_path() {
        if project_path.exists() {
            let config = read_config(&project_path)?;
            return Ok((config, Some(project_path)));
        }
    }

    let Some(default_path) = default_config_path() else {
        return Ok((FileConfig::default(), None));
    };
    if !default_path.exists() {
        return Ok((FileConfig::default(), None));
    }
    let config = read_config(&default_path)?;
    Ok((config, Some(default_path)))
}

fn read_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn merge(
    cli: &CliArgs,
    sources: &CliSources,
    file: FileConfig,
    config_path: Option<PathBuf>,
) -> Result<EffectiveSettings, ConfigError> {
    let reference = cli
        .reference
        .clone()
        .ok_or(ConfigError::MissingArgument {
            message: "--reference is required",
        })?;
    if cli.image_dir.is_none() && cli.images.is_empty() {
        return Err(ConfigError::MissingArgument {
            message: "provide the image set via --image-dir or --images",
        });
    }

    let prompt = match (cli.point.as_slice(), cli.bbox.as_slice()) {
        ([x, y], []) => ReferencePrompt::Point { x: *x, y: *y },
        ([], [x1, y1, x2, y2]) => {
            if x2 <= x1 || y2 <= y1 {
                return Err(ConfigError::InvalidValue {
                    path: None,
                    field: "bbox",
                    value: format!("{x1} {y1} {x2} {y2}"),
                });
            }
            ReferencePrompt::Box(BoundingBox::new(*x1, *y1, *x2, *y2))
        }
        ([], []) => {
            return Err(ConfigError::MissingArgument {
                message: "select the reference product via --point or --bbox",
            });
        }
        _ => unreachable!("clap enforces prompt arity and exclusivity"),
    };

    let mut similarity_threshold = cli.threshold;
    if !sources.threshold_from_cli {
        if let Some(value) = file.similarity_threshold {
            similarity_threshold = value;
        }
    }
    if !(-1.0..=1.0).contains(&similarity_threshold) {
        return Err(ConfigError::InvalidValue {
            path: config_path,
            field: "similarity_threshold",
            value: similarity_threshold.to_string(),
        });
    }

    let mut top_k = cli.top_k;
    if !sources.top_k_from_cli {
        if let Some(value) = file.top_k {
            top_k = value;
        }
    }
    if top_k == 0 {
        return Err(ConfigError::InvalidValue {
            path: config_path,
            field: "top_k",
            value: "0".to_string(),
        });
    }

    let mut nms_iou_threshold = cli.nms_iou;
    if !sources.nms_iou_from_cli {
        if let Some(value) = file.nms_iou_threshold {
            nms_iou_threshold = value;
        }
    }
    if !(0.0..=1.0).contains(&nms_iou_threshold) {
        return Err(ConfigError::InvalidValue {
            path: config_path,
            field: "nms_iou_threshold",
            value: nms_iou_threshold.to_string(),
        });
    }

    let mut min_area_ratio = cli.min_area_ratio;
    if !sources.min_area_ratio_from_cli {
        if let Some(value) = file.min_area_ratio {
            min_area_ratio = value;
        }
    }
    let mut max_area_ratio = cli.max_area_ratio;
    if !sources.max_area_ratio_from_cli {
        if let Some(value) = file.max_area_ratio {
            max_area_ratio = value;
        }
    }
    if !(0.0..=1.0).contains(&min_area_ratio)
        || !(0.0..=1.0).contains(&max_area_ratio)
        || min_area_ratio >= max_area_ratio
    {
        return Err(ConfigError::InvalidValue {
            path: config_path,
            field: "min_area_ratio/max_area_ratio",
            value: format!("{min_area_ratio}/{max_area_ratio}"),
        });
    }

    let mut concurrency = cli.concurrency;
    if !sources.concurrency_from_cli {
        if let Some(value) = file.concurrency {
            concurrency = value;
        }
    }
    if concurrency == 0 {
        return Err(ConfigError::InvalidValue {
            path: config_path,
            field: "concurrency",
            value: "0".to_string(),
        });
    }

    let segmenter_backend = resolve_backend(
        "segmenter_backend",
        cli.segmenter_backend.as_deref(),
        sources.segmenter_backend_from_cli,
        file.segmenter_backend.as_deref(),
        env::var(SEGMENTER_BACKEND_ENV).ok().as_deref(),
        &config_path,
        SegmenterKind::from_name,
    )?
    .unwrap_or(SegmenterKind::Auto);

    let embedder_backend = resolve_backend(
        "embedder_backend",
        cli.embedder_backend.as_deref(),
        sources.embedder_backend_from_cli,
        file.embedder_backend.as_deref(),
        env::var(EMBEDDER_BACKEND_ENV).ok().as_deref(),
        &config_path,
        EmbedderKind::from_name,
    )?
    .unwrap_or(EmbedderKind::Auto);

    let mut segmenter_model = cli.segmenter_model.clone();
    if !sources.segmenter_model_from_cli && segmenter_model.is_none() {
        segmenter_model = normalize_string(file.segmenter_model).map(PathBuf::from);
    }
    let mut embedder_model = cli.embedder_model.clone();
    if !sources.embedder_model_from_cli && embedder_model.is_none() {
        embedder_model = normalize_string(file.embedder_model).map(PathBuf::from);
    }

    let mut export_artifacts = cli.export_artifacts.unwrap_or(true);
    if !sources.export_artifacts_from_cli {
        if let Some(value) = file.export_artifacts {
            export_artifacts = value;
        }
    }

    Ok(EffectiveSettings {
        image_dir: cli.image_dir.clone(),
        images: cli.images.clone(),
        reference,
        prompt,
        output: cli.output.clone(),
        max_size: cli.max_size,
        segmenter_backend,
        embedder_backend,
        segmenter_model,
        embedder_model,
        matcher: MatcherConfig {
            similarity_threshold,
            top_k,
            nms_iou_threshold,
            min_area_ratio,
            max_area_ratio,
            concurrency,
        },
        export_artifacts,
    })
}

/// Precedence: CLI flag, then environment variable, then config file.
fn resolve_backend<T>(
    field: &'static str,
    cli_value: Option<&str>,
    from_cli: bool,
    file_value: Option<&str>,
    env_value: Option<&str>,
    config_path: &Option<PathBuf>,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, ConfigError> {
    let invalid = |value: &str, path: Option<PathBuf>| ConfigError::InvalidValue {
        path,
        field,
        value: value.to_string(),
    };

    if from_cli {
        if let Some(value) = cli_value {
            return parse(value).map(Some).ok_or_else(|| invalid(value, None));
        }
    }
    if let Some(value) = env_value {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return parse(trimmed)
                .map(Some)
                .ok_or_else(|| invalid(trimmed, None));
        }
    }
    if let Some(value) = file_value {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return parse(trimmed)
                .map(Some)
                .ok_or_else(|| invalid(trimmed, config_path.clone()));
        }
    }
    Ok(None)
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("rs", "instance-match", "instance-match")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn project_config_path() -> Option<PathBuf> {
    env::current_dir().ok().map(|dir| dir.join("config.toml"))
}

fn normalize_string(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
