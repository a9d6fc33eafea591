//! Links between the current point cloud and an unplaced image.

use std::collections::BTreeMap;

use crate::correspondence::{CorrespondenceStore, ImageId};
use crate::state::ReconstructionState;

/// A 3D point paired with the candidate keypoint that sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PnpCorrespondence {
    /// Index into the observation graph.
    pub point: usize,
    /// Keypoint index in the candidate image.
    pub keypoint: usize,
}

/// Collect at most one correspondence per scene point for `candidate`.
///
/// A point qualifies when a placed image `p` observes it through keypoint
/// `k` and the raw matches of `(p, candidate)` pair `k` with a candidate
/// keypoint. Placed images are consulted in registration order; the first
/// link found for a point wins. Output is sorted by point index.
pub fn pnp_correspondences(
    state: &ReconstructionState,
    store: &CorrespondenceStore,
    candidate: ImageId,
) -> Vec<PnpCorrespondence> {
    let links: Vec<(ImageId, BTreeMap<usize, usize>)> = state
        .placed()
        .iter()
        .filter(|&&p| p != candidate)
        .map(|&p| {
            let mut map = BTreeMap::new();
            for (from, to) in store.oriented_matches(p, candidate) {
                map.entry(from).or_insert(to);
            }
            (p, map)
        })
        .filter(|(_, map)| !map.is_empty())
        .collect();

    if links.is_empty() {
        return Vec::new();
    }

    state
        .graph()
        .iter()
        .enumerate()
        .filter(|(_, point)| point.observation(candidate).is_none())
        .filter_map(|(idx, point)| {
            links.iter().find_map(|(p, map)| {
                let k = point.observation(*p)?;
                map.get(&k).map(|&keypoint| PnpCorrespondence {
                    point: idx,
                    keypoint,
                })
            })
        })
        .collect()
}

/// Priority of `candidate` for the next registration attempt.
///
/// The number of existing points that can be linked to one of its keypoints.
pub fn correspondence_score(
    state: &ReconstructionState,
    store: &CorrespondenceStore,
    candidate: ImageId,
) -> usize {
    pnp_correspondences(state, store, candidate).len()
}
