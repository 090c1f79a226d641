use std::cmp::Ordering;
use std::path::PathBuf;

use thiserror::Error;

use instance_match_types::{BoundingBox, InstanceDescriptor, Mask, MaskProposal};

/// How the user singled out the reference product on the reference image.
#[derive(Debug, Clone, Copy)]
pub enum ReferencePrompt {
    Point { x: u32, y: u32 },
    Box(BoundingBox),
}

/// The user-selected object everything else is matched against.
///
/// Created exactly once per run; read-only afterward.
#[derive(Debug, Clone)]
pub struct ReferenceInstance {
    pub image: PathBuf,
    pub mask: Mask,
    pub bbox: BoundingBox,
    pub descriptor: InstanceDescriptor,
}

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("reference image produced no proposals")]
    NoProposals,

    #[error("no proposal covers the point ({x}, {y}) on the reference image")]
    PointNotCovered { x: u32, y: u32 },

    #[error("no proposal overlaps the prompt box")]
    BoxNotOverlapped,
}

/// Pick the proposal the prompt designates.
///
/// A point selects the highest-quality proposal covering it, ties going to
/// the smaller (tighter) mask. A box selects the proposal whose bounding
/// box overlaps it most; zero overlap everywhere is an input error the
/// caller must fix.
pub fn select_reference_proposal(
    proposals: &[MaskProposal],
    prompt: &ReferencePrompt,
) -> Result<MaskProposal, ReferenceError> {
    if proposals.is_empty() {
        return Err(ReferenceError::NoProposals);
    }

    match *prompt {
        ReferencePrompt::Point { x, y } => proposals
            .iter()
            .filter(|proposal| proposal.mask.contains(x, y))
            .max_by(|a, b| {
                a.quality
                    .partial_cmp(&b.quality)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| b.area.cmp(&a.area))
            })
            .cloned()
            .ok_or(ReferenceError::PointNotCovered { x, y }),
        ReferencePrompt::Box(prompt_box) => {
            let best = proposals
                .iter()
                .map(|proposal| (proposal, proposal.mask.bounding_box().iou(&prompt_box)))
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
            match best {
                Some((proposal, iou)) if iou > 0.0 => Ok(proposal.clone()),
                _ => Err(ReferenceError::BoxNotOverlapped),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_proposal(x1: u32, y1: u32, x2: u32, y2: u32, quality: f32) -> MaskProposal {
        let width = 64u32;
        let height = 64u32;
        let data = (0..height)
            .flat_map(|y| (0..width).map(move |x| x >= x1 && x < x2 && y >= y1 && y < y2))
            .collect();
        MaskProposal::new(Mask::from_owned(width, height, data).unwrap(), quality)
    }

    #[test]
    fn point_picks_highest_quality_covering_proposal() {
        let proposals = vec![
            rect_proposal(0, 0, 32, 32, 0.6),
            rect_proposal(8, 8, 24, 24, 0.9),
            rect_proposal(40, 40, 60, 60, 0.99),
        ];
        let selected =
            select_reference_proposal(&proposals, &ReferencePrompt::Point { x: 10, y: 10 })
                .unwrap();
        assert!((selected.quality - 0.9).abs() < 1e-6);
    }

    #[test]
    fn point_quality_tie_prefers_tighter_mask() {
        let proposals = vec![
            rect_proposal(0, 0, 48, 48, 0.8),
            rect_proposal(8, 8, 24, 24, 0.8),
        ];
        let selected =
            select_reference_proposal(&proposals, &ReferencePrompt::Point { x: 10, y: 10 })
                .unwrap();
        assert_eq!(selected.area, 256);
    }

    #[test]
    fn point_outside_every_mask_is_an_error() {
        let proposals = vec![rect_proposal(0, 0, 8, 8, 0.9)];
        let err = select_reference_proposal(&proposals, &ReferencePrompt::Point { x: 50, y: 50 })
            .unwrap_err();
        assert!(matches!(err, ReferenceError::PointNotCovered { x: 50, y: 50 }));
    }

    #[test]
    fn box_picks_best_overlap() {
        let proposals = vec![
            rect_proposal(0, 0, 16, 16, 0.5),
            rect_proposal(20, 20, 44, 44, 0.5),
        ];
        let prompt = ReferencePrompt::Box(BoundingBox::new(18, 18, 46, 46));
        let selected = select_reference_proposal(&proposals, &prompt).unwrap();
        assert_eq!(selected.mask.bounding_box(), BoundingBox::new(20, 20, 44, 44));
    }

    #[test]
    fn box_with_no_overlap_is_an_error() {
        let proposals = vec![rect_proposal(0, 0, 8, 8, 0.9)];
        let prompt = ReferencePrompt::Box(BoundingBox::new(40, 40, 60, 60));
        let err = select_reference_proposal(&proposals, &prompt).unwrap_err();
        assert!(matches!(err, ReferenceError::BoxNotOverlapped));
    }

    #[test]
    fn empty_proposal_set_is_an_error() {
        let err =
            select_reference_proposal(&[], &ReferencePrompt::Point { x: 0, y: 0 }).unwrap_err();
        assert!(matches!(err, ReferenceError::NoProposals));
    }
}
