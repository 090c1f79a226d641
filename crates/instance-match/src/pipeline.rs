use std::path::{Path, PathBuf};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;

use instance_match_embedder::{EmbedderConfig, EmbeddingError, build_embedding_engine};
use instance_match_segmenter::{ProposalError, SegmenterConfig, build_proposal_provider};
use instance_match_types::ImageMatchResult;

use crate::export::ResultExporter;
use crate::images::{collect_image_paths, load_image, load_targets};
use crate::matcher::InstanceMatcher;
use crate::reference::{ReferenceError, ReferenceInstance, select_reference_proposal};
use crate::settings::{ConfigError, EffectiveSettings};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("input error: {0}")]
    Input(String),

    #[error("proposal generation failed: {0}")]
    Proposal(#[from] ProposalError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("reference selection failed: {0}")]
    Reference(#[from] ReferenceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to write artifacts: {0}")]
    Artifacts(#[from] image::ImageError),
}

#[derive(Debug)]
pub struct RunSummary {
    pub results: Vec<ImageMatchResult>,
    pub total_images: usize,
    pub total_matches: usize,
    pub output: PathBuf,
}

/// Run the full flow: select the reference, match it across every other
/// image in the set, export the results.
pub async fn run_pipeline(settings: &EffectiveSettings) -> Result<RunSummary, PipelineError> {
    let image_paths = resolve_image_paths(settings)?;

    let segmenter_config = SegmenterConfig {
        model_path: settings.segmenter_model.clone(),
        ..SegmenterConfig::default()
    };
    let embedder_config = EmbedderConfig {
        model_path: settings.embedder_model.clone(),
        ..EmbedderConfig::default()
    };

    let segmenter = build_proposal_provider(settings.segmenter_backend, segmenter_config)?;
    let embedder = build_embedding_engine(settings.embedder_backend, embedder_config)?;
    segmenter.warm_up()?;
    embedder.warm_up()?;
    println!(
        "backends: segmenter '{}', embedder '{}'",
        segmenter.name(),
        embedder.name()
    );

    let reference = build_reference(settings, segmenter.as_ref(), embedder.as_ref())?;
    println!(
        "reference: {} (mask area {} px, bbox [{}, {}, {}, {}])",
        reference.image.display(),
        reference.mask.area(),
        reference.bbox.x1,
        reference.bbox.y1,
        reference.bbox.x2,
        reference.bbox.y2
    );

    let target_paths: Vec<PathBuf> = image_paths
        .iter()
        .filter(|path| !same_file(path, &settings.reference))
        .cloned()
        .collect();
    let targets = load_targets(&target_paths, settings.max_size);
    println!("matching across {} target images", targets.len());

    let matcher = InstanceMatcher::new(
        segmenter,
        embedder,
        reference.descriptor.clone(),
        settings.matcher,
    );

    let progress = ProgressBar::new(targets.len() as u64);
    progress.set_style(
        ProgressStyle::with_template(
            "{bar:40.cyan/blue} {percent:>3}% {pos}/{len} images [{elapsed_precise}<{eta_precise}]",
        )
        .unwrap(),
    );
    progress.enable_steady_tick(Duration::from_millis(100));

    let results = matcher
        .match_across_images(targets.clone(), |result| {
            let line = match result.best_match() {
                Some(best) => format!(
                    "{}: match, similarity {:.3}",
                    result.image.display(),
                    best.similarity
                ),
                None => format!("{}: no match", result.image.display()),
            };
            progress.println(line);
            progress.inc(1);
        })
        .await;
    progress.finish_and_clear();

    let total_images = results.len();
    let total_matches = results.iter().filter(|r| r.has_match()).count();

    let exporter = ResultExporter::new(&settings.output)?;
    exporter.write_summary(&reference, &results, &settings.matcher)?;
    if settings.export_artifacts {
        let reference_image = load_image(&settings.reference, settings.max_size)
            .map_err(|err| artifact_input_error(&settings.reference, err))?;
        exporter.write_artifacts(&reference, &reference_image, &targets, &results)?;
    }

    println!(
        "found the reference product in {total_matches}/{total_images} target images"
    );
    println!("results written to {}", settings.output.display());

    Ok(RunSummary {
        results,
        total_images,
        total_matches,
        output: settings.output.clone(),
    })
}

fn resolve_image_paths(settings: &EffectiveSettings) -> Result<Vec<PathBuf>, PipelineError> {
    let paths = match settings.image_dir.as_deref() {
        Some(dir) => collect_image_paths(dir)?,
        None => settings.images.clone(),
    };
    if paths.is_empty() {
        return Err(PipelineError::Input("no images found".to_string()));
    }
    Ok(paths)
}

fn build_reference(
    settings: &EffectiveSettings,
    segmenter: &dyn instance_match_segmenter::ProposalProvider,
    embedder: &dyn instance_match_embedder::EmbeddingEngine,
) -> Result<ReferenceInstance, PipelineError> {
    let reference_image = load_image(&settings.reference, settings.max_size).map_err(|err| {
        PipelineError::Input(format!(
            "failed to read reference image {}: {err}",
            settings.reference.display()
        ))
    })?;

    let proposals = segmenter.propose(&reference_image)?;
    let selected = select_reference_proposal(&proposals, &settings.prompt)?;

    let outcomes = embedder.embed_masked(&reference_image, std::slice::from_ref(&selected.mask))?;
    let pooled = outcomes
        .into_iter()
        .next()
        .ok_or(EmbeddingError::InvalidOutputShape)??;
    if pooled.used_fallback {
        eprintln!("reference mask selected no foreground patches; descriptor uses the whole grid");
    }

    Ok(ReferenceInstance {
        image: settings.reference.clone(),
        bbox: selected.mask.bounding_box(),
        mask: selected.mask,
        descriptor: pooled.descriptor,
    })
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn artifact_input_error(path: &Path, err: image::ImageError) -> PipelineError {
    PipelineError::Input(format!(
        "failed to re-read reference image {} for artifact export: {err}",
        path.display()
    ))
}
