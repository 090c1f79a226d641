//! Cross-image instance matching engine.
//!
//! Drives the per-image pipeline (propose, pool, filter, suppress,
//! truncate) and fans the target set out over a bounded worker pool. The
//! only state shared across images is the immutable reference descriptor
//! and the static configuration.

pub mod nms;
pub mod ranker;

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbImage;
use tokio::sync::mpsc;

use instance_match_embedder::EmbeddingEngine;
use instance_match_segmenter::ProposalProvider;
use instance_match_types::{
    BoundingBox, ImageMatchResult, InstanceDescriptor, Mask,
};

const WORKER_CHANNEL_CAPACITY: usize = 2;
const RESULT_CHANNEL_CAPACITY: usize = 2;

/// Static thresholds for one matching run.
#[derive(Debug, Clone, Copy)]
pub struct MatcherConfig {
    /// Minimum cosine similarity for a candidate to count as a match.
    pub similarity_threshold: f32,
    /// Maximum matches kept per image.
    pub top_k: usize,
    /// Bounding-box IoU above which a lower-ranked detection is a duplicate.
    pub nms_iou_threshold: f32,
    /// Reject proposals smaller than this fraction of the image area.
    pub min_area_ratio: f64,
    /// Reject proposals larger than this fraction of the image area.
    pub max_area_ratio: f64,
    /// Number of images processed concurrently.
    pub concurrency: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.65,
            top_k: 3,
            nms_iou_threshold: 0.5,
            min_area_ratio: 0.001,
            max_area_ratio: 0.5,
            concurrency: 1,
        }
    }
}

/// One image queued for matching.
#[derive(Debug, Clone)]
pub struct TargetImage {
    pub path: PathBuf,
    pub image: Arc<RgbImage>,
}

/// A pooled proposal awaiting similarity scoring.
#[derive(Debug, Clone)]
pub struct CandidateInstance {
    pub mask: Mask,
    pub bbox: BoundingBox,
    pub area: usize,
    pub quality: f32,
    pub descriptor: InstanceDescriptor,
}

struct MatchJob {
    slot: usize,
    target: TargetImage,
}

/// Matches one reference instance across target images.
#[derive(Clone)]
pub struct InstanceMatcher {
    segmenter: Arc<dyn ProposalProvider>,
    embedder: Arc<dyn EmbeddingEngine>,
    reference: InstanceDescriptor,
    config: MatcherConfig,
}

impl InstanceMatcher {
    pub fn new(
        segmenter: Arc<dyn ProposalProvider>,
        embedder: Arc<dyn EmbeddingEngine>,
        reference: InstanceDescriptor,
        config: MatcherConfig,
    ) -> Self {
        Self {
            segmenter,
            embedder,
            reference,
            config,
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Run the full per-image stage sequence for one target.
    ///
    /// Never fails the image: provider errors degrade to an empty result
    /// with a diagnostic, and a malformed individual candidate is dropped
    /// without disturbing its siblings.
    pub fn match_in_image(&self, path: &Path, image: &RgbImage) -> ImageMatchResult {
        let proposals = match self.segmenter.propose(image) {
            Ok(proposals) => proposals,
            Err(err) => {
                eprintln!("proposal generation failed for {}: {err}", path.display());
                return ImageMatchResult::empty(path.to_path_buf());
            }
        };
        if proposals.is_empty() {
            eprintln!("no proposals generated for {}", path.display());
            return ImageMatchResult::empty(path.to_path_buf());
        }
        let proposal_count = proposals.len();

        // One grid computation for the image, pooled against every mask.
        let masks: Vec<Mask> = proposals.iter().map(|p| p.mask.clone()).collect();
        let outcomes = match self.embedder.embed_masked(image, &masks) {
            Ok(outcomes) => outcomes,
            Err(err) => {
                eprintln!("embedding failed for {}: {err}", path.display());
                return ImageMatchResult::empty(path.to_path_buf());
            }
        };

        let image_area = image.width() as f64 * image.height() as f64;
        let mut candidates = Vec::with_capacity(proposal_count);
        for (index, (proposal, outcome)) in proposals.into_iter().zip(outcomes).enumerate() {
            let pooled = match outcome {
                Ok(pooled) => pooled,
                Err(err) => {
                    eprintln!(
                        "dropping candidate {index} for {}: {err}",
                        path.display()
                    );
                    continue;
                }
            };
            let fraction = proposal.area as f64 / image_area;
            if fraction < self.config.min_area_ratio || fraction > self.config.max_area_ratio {
                continue;
            }
            candidates.push(CandidateInstance {
                bbox: proposal.mask.bounding_box(),
                mask: proposal.mask,
                area: proposal.area,
                quality: proposal.quality,
                descriptor: pooled.descriptor,
            });
        }

        let mut matches =
            ranker::filter_by_similarity(&self.reference, candidates, self.config.similarity_threshold);
        let above_threshold = matches.len();

        // Stable sort keeps the original candidate index as the tie-break,
        // which makes suppression deterministic.
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });
        let mut matches = nms::suppress_duplicates(matches, self.config.nms_iou_threshold);
        matches.truncate(self.config.top_k);

        eprintln!(
            "{}: {proposal_count} proposals -> {above_threshold} above threshold -> {} kept",
            path.display(),
            matches.len()
        );

        ImageMatchResult {
            image: path.to_path_buf(),
            matches,
        }
    }

    /// Match across an ordered target set on a bounded worker pool.
    ///
    /// Jobs are handed round-robin to `config.concurrency` workers; each
    /// result is written into its pre-allocated slot, so the output order
    /// always mirrors the input order regardless of completion order.
    /// `on_complete` fires once per finished image, in completion order. A
    /// worker that dies takes only its own image's result down; the slot
    /// degrades to an empty result.
    pub async fn match_across_images<F>(
        &self,
        targets: Vec<TargetImage>,
        mut on_complete: F,
    ) -> Vec<ImageMatchResult>
    where
        F: FnMut(&ImageMatchResult),
    {
        let total = targets.len();
        if total == 0 {
            return Vec::new();
        }
        let paths: Vec<PathBuf> = targets.iter().map(|t| t.path.clone()).collect();
        let worker_count = self.config.concurrency.clamp(1, total);

        let (result_tx, mut result_rx) =
            mpsc::channel::<(usize, ImageMatchResult)>(worker_count * RESULT_CHANNEL_CAPACITY);
        let mut worker_inputs = Vec::with_capacity(worker_count);

        for _ in 0..worker_count {
            let (worker_tx, mut worker_rx) = mpsc::channel::<MatchJob>(WORKER_CHANNEL_CAPACITY);
            worker_inputs.push(worker_tx);
            let matcher = self.clone();
            let result_tx = result_tx.clone();
            tokio::spawn(async move {
                while let Some(MatchJob { slot, target }) = worker_rx.recv().await {
                    let path = target.path.clone();
                    let task_matcher = matcher.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        task_matcher.match_in_image(&target.path, &target.image)
                    })
                    .await
                    .unwrap_or_else(|err| {
                        eprintln!("matching task for {} failed: {err}", path.display());
                        ImageMatchResult::empty(path)
                    });
                    if result_tx.send((slot, result)).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let dispatch = tokio::spawn(async move {
            for (slot, target) in targets.into_iter().enumerate() {
                let sender = &worker_inputs[slot % worker_inputs.len()];
                if sender.send(MatchJob { slot, target }).await.is_err() {
                    break;
                }
            }
        });

        let mut slots: Vec<Option<ImageMatchResult>> = Vec::with_capacity(total);
        slots.resize_with(total, || None);
        while let Some((slot, result)) = result_rx.recv().await {
            on_complete(&result);
            slots[slot] = Some(result);
        }
        let _ = dispatch.await;

        slots
            .into_iter()
            .zip(paths)
            .map(|(slot, path)| slot.unwrap_or_else(|| ImageMatchResult::empty(path)))
            .collect()
    }
}
