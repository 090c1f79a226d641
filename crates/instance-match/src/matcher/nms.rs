use instance_match_types::InstanceMatch;

/// Greedy non-maximum suppression over bounding boxes.
///
/// Input must already be sorted by similarity descending (ties broken by
/// original index upstream via a stable sort). Each candidate taken in
/// order is either already suppressed or accepted; accepting it suppresses
/// every later candidate whose box overlaps it beyond `iou_threshold`.
/// Comparisons are against the just-accepted candidate only, never
/// transitively, and the output preserves input order.
///
/// O(N²) worst case, fine at the tens-to-hundreds of proposals a single
/// image yields.
pub fn suppress_duplicates(candidates: Vec<InstanceMatch>, iou_threshold: f32) -> Vec<InstanceMatch> {
    if candidates.is_empty() {
        return candidates;
    }

    let mut suppressed = vec![false; candidates.len()];
    let mut kept = Vec::with_capacity(candidates.len());

    for (index, candidate) in candidates.iter().enumerate() {
        if suppressed[index] {
            continue;
        }
        for (later, flag) in suppressed.iter_mut().enumerate().skip(index + 1) {
            if *flag {
                continue;
            }
            if candidate.bbox.iou(&candidates[later].bbox) > iou_threshold {
                *flag = true;
            }
        }
        kept.push(index);
    }

    let mut kept_iter = kept.into_iter().peekable();
    candidates
        .into_iter()
        .enumerate()
        .filter_map(|(index, candidate)| {
            if kept_iter.peek() == Some(&index) {
                kept_iter.next();
                Some(candidate)
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use instance_match_types::{BoundingBox, InstanceDescriptor, Mask};

    fn entry(bbox: BoundingBox, similarity: f32) -> InstanceMatch {
        let mask = Mask::from_owned(2, 2, vec![true; 4]).unwrap();
        InstanceMatch {
            mask,
            bbox,
            similarity,
            quality: 1.0,
            area: 4,
            descriptor: InstanceDescriptor::from_unnormalized(vec![1.0, 0.0]).unwrap(),
        }
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(suppress_duplicates(Vec::new(), 0.5).is_empty());
    }

    #[test]
    fn single_candidate_passes_through() {
        let kept = suppress_duplicates(vec![entry(BoundingBox::new(0, 0, 4, 4), 0.9)], 0.5);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn disjoint_candidates_all_survive() {
        let input = vec![
            entry(BoundingBox::new(0, 0, 4, 4), 0.9),
            entry(BoundingBox::new(10, 0, 14, 4), 0.8),
            entry(BoundingBox::new(0, 10, 4, 14), 0.7),
        ];
        let kept = suppress_duplicates(input, 0.5);
        assert_eq!(kept.len(), 3);
        assert!((kept[0].similarity - 0.9).abs() < 1e-6);
        assert!((kept[2].similarity - 0.7).abs() < 1e-6);
    }

    #[test]
    fn identical_boxes_keep_only_the_first() {
        let bbox = BoundingBox::new(5, 5, 20, 20);
        let kept = suppress_duplicates(vec![entry(bbox, 0.95), entry(bbox, 0.94)], 0.5);
        assert_eq!(kept.len(), 1);
        assert!((kept[0].similarity - 0.95).abs() < 1e-6);
    }

    #[test]
    fn suppression_is_not_transitive() {
        // b overlaps a and is suppressed; c overlaps b but not a, so c
        // survives even though a chain through b would have removed it.
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(4, 0, 14, 10);
        let c = BoundingBox::new(7, 0, 17, 10);
        assert!(a.iou(&b) > 0.4);
        assert!(b.iou(&c) > 0.4);
        assert!(a.iou(&c) < 0.4);
        let kept = suppress_duplicates(
            vec![entry(a, 0.9), entry(b, 0.8), entry(c, 0.7)],
            0.4,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].bbox, a);
        assert_eq!(kept[1].bbox, c);
    }

    #[test]
    fn output_preserves_input_order() {
        let input = vec![
            entry(BoundingBox::new(0, 0, 4, 4), 0.9),
            entry(BoundingBox::new(100, 100, 104, 104), 0.85),
            entry(BoundingBox::new(1, 0, 5, 4), 0.8),
            entry(BoundingBox::new(50, 50, 54, 54), 0.75),
        ];
        let kept = suppress_duplicates(input, 0.5);
        let sims: Vec<f32> = kept.iter().map(|m| m.similarity).collect();
        assert_eq!(sims, vec![0.9, 0.85, 0.75]);
    }
}
