use float_ord::FloatOrd;
use tracing::instrument;

use crate::CandidateBox;

/// Greedy non-max suppression.
///
/// Repeatedly keeps the highest scoring remaining box and drops every other box
/// whose overlap with it exceeds `overlap_threshold`. Overlap is measured against
/// the area of the box being considered for removal, with inclusive pixel extents.
/// Kept boxes are returned in descending score order.
#[instrument(skip(candidates), fields(candidates = candidates.len()), level = "debug")]
pub fn non_max_suppression(
    candidates: &[CandidateBox],
    overlap_threshold: f32,
) -> Vec<CandidateBox> {
    let mut remaining = (0..candidates.len()).collect::<Vec<_>>();
    remaining.sort_by_key(|i| FloatOrd(candidates[*i].score));

    let mut picked = Vec::new();
    while let Some(best) = remaining.pop() {
        let best = candidates[best];
        picked.push(best);
        remaining.retain(|other| overlap(&best, &candidates[*other]) <= overlap_threshold);
    }

    log::debug!(
        "Suppression kept {} of {} candidates",
        picked.len(),
        candidates.len()
    );
    picked
}

fn area(b: &CandidateBox) -> f32 {
    (b.end_x - b.start_x + 1) as f32 * (b.end_y - b.start_y + 1) as f32
}

fn overlap(kept: &CandidateBox, other: &CandidateBox) -> f32 {
    let x0 = kept.start_x.max(other.start_x);
    let y0 = kept.start_y.max(other.start_y);
    let x1 = kept.end_x.min(other.end_x);
    let y1 = kept.end_y.min(other.end_y);
    let w = (x1 - x0 + 1).max(0) as f32;
    let h = (y1 - y0 + 1).max(0) as f32;
    w * h / area(other)
}
