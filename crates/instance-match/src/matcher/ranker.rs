use instance_match_types::{InstanceDescriptor, InstanceMatch};

use super::CandidateInstance;

/// Score candidates against the reference and keep those at or above the
/// similarity threshold.
///
/// Similarity is the plain dot product; descriptors are unit-norm by
/// construction, so it equals the cosine. Output order is whatever the
/// input order was; ordering is the sorter's job downstream. Zero
/// candidates in, zero matches out.
pub fn filter_by_similarity(
    reference: &InstanceDescriptor,
    candidates: Vec<CandidateInstance>,
    threshold: f32,
) -> Vec<InstanceMatch> {
    candidates
        .into_iter()
        .filter_map(|candidate| {
            let similarity = reference.similarity(&candidate.descriptor);
            if similarity >= threshold {
                Some(InstanceMatch {
                    mask: candidate.mask,
                    bbox: candidate.bbox,
                    similarity,
                    quality: candidate.quality,
                    area: candidate.area,
                    descriptor: candidate.descriptor,
                })
            } else {
                None
            }
        })
        .collect()
}
