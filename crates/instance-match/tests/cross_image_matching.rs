use std::path::PathBuf;
use std::sync::Arc;

use image::{Rgb, RgbImage};

use instance_match::matcher::{InstanceMatcher, MatcherConfig, TargetImage};
use instance_match::reference::{ReferencePrompt, select_reference_proposal};
use instance_match_embedder::{
    EmbedderConfig, EmbedderKind, EmbeddingEngine, EmbeddingError, PatchGrid, PoolOutcome,
    PooledDescriptor, build_embedding_engine,
};
use instance_match_segmenter::{
    ProposalError, ProposalProvider, SegmenterConfig, SegmenterKind, build_proposal_provider,
};
use instance_match_types::{InstanceDescriptor, Mask, MaskProposal};

fn rect_mask(width: u32, height: u32, x1: u32, y1: u32, x2: u32, y2: u32) -> Mask {
    let data = (0..height)
        .flat_map(|y| (0..width).map(move |x| x >= x1 && x < x2 && y >= y1 && y < y2))
        .collect();
    Mask::from_owned(width, height, data).unwrap()
}

/// Unit vector whose dot product with [1, 0, 0] is exactly `similarity`.
fn descriptor_at(similarity: f32) -> InstanceDescriptor {
    let rest = (1.0 - similarity * similarity).max(0.0).sqrt();
    InstanceDescriptor::from_unit(vec![similarity, rest, 0.0])
}

/// Emits three fixed proposals for 100-pixel-wide images and nothing for
/// anything else, standing in for a segmentation model.
struct ScriptedSegmenter;

impl ProposalProvider for ScriptedSegmenter {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn propose(&self, image: &RgbImage) -> Result<Vec<MaskProposal>, ProposalError> {
        if image.width() != 100 {
            return Ok(Vec::new());
        }
        Ok(vec![
            MaskProposal::new(rect_mask(100, 100, 10, 10, 30, 30), 0.95),
            MaskProposal::new(rect_mask(100, 100, 12, 10, 32, 30), 0.90),
            MaskProposal::new(rect_mask(100, 100, 60, 60, 80, 80), 0.85),
        ])
    }
}

/// Returns descriptors keyed on mask position so the test controls every
/// similarity exactly.
struct ScriptedEmbedder;

impl EmbeddingEngine for ScriptedEmbedder {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn patch_grid(&self, _image: &RgbImage) -> Result<PatchGrid, EmbeddingError> {
        PatchGrid::from_flat(1, 1, 3, vec![1.0, 0.0, 0.0])
    }

    fn embed_masked(
        &self,
        _image: &RgbImage,
        masks: &[Mask],
    ) -> Result<Vec<PoolOutcome>, EmbeddingError> {
        Ok(masks
            .iter()
            .map(|mask| {
                let similarity = match mask.bounding_box().x1 {
                    10 => 0.9,
                    12 => 0.72,
                    _ => 0.3,
                };
                Ok(PooledDescriptor {
                    descriptor: descriptor_at(similarity),
                    foreground_patches: 1,
                    used_fallback: false,
                })
            })
            .collect())
    }
}

fn scripted_matcher(config: MatcherConfig) -> InstanceMatcher {
    InstanceMatcher::new(
        Arc::new(ScriptedSegmenter),
        Arc::new(ScriptedEmbedder),
        descriptor_at(1.0),
        config,
    )
}

fn target(name: &str, width: u32, height: u32) -> TargetImage {
    TargetImage {
        path: PathBuf::from(name),
        image: Arc::new(RgbImage::from_pixel(width, height, Rgb([128, 128, 128]))),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn overlapping_duplicate_is_suppressed_and_low_similarity_dropped() {
    // Proposals score [0.9, 0.72, 0.3]; the first two boxes overlap with
    // IoU ~0.8, the third falls below the similarity threshold.
    let matcher = scripted_matcher(MatcherConfig::default());
    let results = matcher
        .match_across_images(vec![target("a.png", 100, 100)], |_| {})
        .await;

    assert_eq!(results.len(), 1);
    let matches = &results[0].matches;
    assert_eq!(matches.len(), 1);
    assert!((matches[0].similarity - 0.9).abs() < 1e-6);
    assert_eq!(matches[0].bbox.x1, 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_proposal_image_yields_empty_result_and_run_continues() {
    let matcher = scripted_matcher(MatcherConfig::default());
    let results = matcher
        .match_across_images(
            vec![
                target("first.png", 100, 100),
                target("blank.png", 50, 50),
                target("last.png", 100, 100),
            ],
            |_| {},
        )
        .await;

    assert_eq!(results.len(), 3);
    assert!(results[0].has_match());
    assert!(!results[1].has_match());
    assert!(results[1].matches.is_empty());
    assert!(results[2].has_match());
}

#[tokio::test(flavor = "multi_thread")]
async fn results_keep_input_order_under_concurrency() {
    let config = MatcherConfig {
        concurrency: 4,
        ..MatcherConfig::default()
    };
    let matcher = scripted_matcher(config);

    let targets: Vec<TargetImage> = (0..8)
        .map(|i| {
            if i % 3 == 0 {
                target(&format!("img_{i}.png"), 50, 50)
            } else {
                target(&format!("img_{i}.png"), 100, 100)
            }
        })
        .collect();

    let mut completions = 0usize;
    let results = matcher
        .match_across_images(targets, |_| completions += 1)
        .await;

    assert_eq!(completions, 8);
    assert_eq!(results.len(), 8);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.image, PathBuf::from(format!("img_{i}.png")));
        assert_eq!(result.has_match(), i % 3 != 0);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn truncation_caps_matches_at_top_k() {
    let config = MatcherConfig {
        top_k: 1,
        nms_iou_threshold: 0.9,
        similarity_threshold: 0.2,
        ..MatcherConfig::default()
    };
    let matcher = scripted_matcher(config);
    let results = matcher
        .match_across_images(vec![target("a.png", 100, 100)], |_| {})
        .await;

    assert_eq!(results[0].matches.len(), 1);
    assert!((results[0].matches[0].similarity - 0.9).abs() < 1e-6);
}

// Full run over the color-based synthetic backends: a red product on a gray
// backdrop, seen at different positions, next to a blue distractor.

fn paint_square(image: &mut RgbImage, x: u32, y: u32, size: u32, color: Rgb<u8>) {
    for dy in 0..size {
        for dx in 0..size {
            image.put_pixel(x + dx, y + dy, color);
        }
    }
}

fn synthetic_scene(red_at: Option<(u32, u32)>, blue_at: Option<(u32, u32)>) -> RgbImage {
    let mut image = RgbImage::from_pixel(96, 96, Rgb([128, 128, 128]));
    if let Some((x, y)) = red_at {
        paint_square(&mut image, x, y, 24, Rgb([220, 40, 40]));
    }
    if let Some((x, y)) = blue_at {
        paint_square(&mut image, x, y, 24, Rgb([40, 40, 220]));
    }
    image
}

#[tokio::test(flavor = "multi_thread")]
async fn synthetic_backends_find_the_moved_product() {
    let segmenter = build_proposal_provider(SegmenterKind::Synthetic, SegmenterConfig::default())
        .unwrap();
    let embedder = build_embedding_engine(
        EmbedderKind::Synthetic,
        EmbedderConfig {
            patch_size: 8,
            ..EmbedderConfig::default()
        },
    )
    .unwrap();

    // Select the red square as the reference via a point prompt.
    let reference_image = synthetic_scene(Some((8, 8)), Some((64, 64)));
    let proposals = segmenter.propose(&reference_image).unwrap();
    assert_eq!(proposals.len(), 2);
    let selected =
        select_reference_proposal(&proposals, &ReferencePrompt::Point { x: 12, y: 12 }).unwrap();
    let reference = embedder
        .embed_masked(&reference_image, std::slice::from_ref(&selected.mask))
        .unwrap()
        .remove(0)
        .unwrap();

    // The synthetic embedder is coarser than a real vision transformer, so
    // the demo threshold sits higher than the production default.
    let config = MatcherConfig {
        similarity_threshold: 0.9,
        concurrency: 2,
        ..MatcherConfig::default()
    };
    let matcher = InstanceMatcher::new(segmenter, embedder, reference.descriptor, config);

    let targets = vec![
        TargetImage {
            path: PathBuf::from("moved.png"),
            image: Arc::new(synthetic_scene(Some((40, 16)), Some((8, 64)))),
        },
        TargetImage {
            path: PathBuf::from("distractor_only.png"),
            image: Arc::new(synthetic_scene(None, Some((24, 24)))),
        },
    ];

    let results = matcher.match_across_images(targets, |_| {}).await;

    assert_eq!(results.len(), 2);
    let moved = &results[0];
    assert!(moved.has_match());
    let best = moved.best_match().unwrap();
    assert!(best.similarity > 0.95);
    assert_eq!(best.bbox.x1, 40);
    assert_eq!(best.bbox.y1, 16);

    assert!(!results[1].has_match());
}
