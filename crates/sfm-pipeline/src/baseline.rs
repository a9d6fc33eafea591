//! Baseline pair selection and two-view initialization.

use sfm_core::{FxFyCxCySkew, Iso3, Real};

use crate::color::ImageColors;
use crate::config::IncrementalConfig;
use crate::correspondence::{CorrespondenceStore, PairKey};
use crate::error::{Result, SfmError};
use crate::state::{PlacementMethod, ReconstructionState};
use crate::triangulator::Triangulator;
use crate::two_view::{estimate_two_view, TwoViewGeometry};

/// Pick the pair with the most pose inliers.
///
/// Pairs with fewer than `min_inliers_baseline` raw matches are not
/// estimated; pairs whose pose inliers fall below the same threshold are
/// rejected. Ties keep the first pair in canonical order.
pub fn select_baseline(
    store: &CorrespondenceStore,
    intrinsics: &FxFyCxCySkew<Real>,
    config: &IncrementalConfig,
) -> Result<TwoViewGeometry> {
    let mut best: Option<TwoViewGeometry> = None;
    for (pair, matches) in store.pairs() {
        if matches.len() < config.min_inliers_baseline {
            continue;
        }
        let geom = match estimate_two_view(store, pair, intrinsics, config) {
            Ok(geom) => geom,
            Err(err) => {
                log::debug!("baseline candidate ({}, {}) rejected: {err}", pair.lo, pair.hi);
                continue;
            }
        };
        let inliers = geom.pose_inliers.len();
        log::debug!(
            "baseline candidate ({}, {}): {} matches, {} ransac inliers, {} pose inliers",
            pair.lo,
            pair.hi,
            matches.len(),
            geom.ransac_inliers.len(),
            inliers
        );
        if inliers < config.min_inliers_baseline {
            continue;
        }
        if best
            .as_ref()
            .map_or(true, |b| inliers > b.pose_inliers.len())
        {
            best = Some(geom);
        }
    }

    let best = best.ok_or(SfmError::NoValidBaseline)?;
    log::info!(
        "baseline pair ({}, {}) with {} pose inliers",
        best.pair.lo,
        best.pair.hi,
        best.pose_inliers.len()
    );
    Ok(best)
}

/// Place the baseline pair and seed the point cloud.
///
/// The pose is re-estimated over all matches of `pair`; both the RANSAC and
/// the pose masks must hold at least `min_initial_inliers` matches. Image
/// `pair.lo` becomes the world origin. Nothing is committed to `state` unless
/// triangulation succeeds.
pub fn initialize(
    state: &mut ReconstructionState,
    store: &CorrespondenceStore,
    colors: &ImageColors,
    intrinsics: &FxFyCxCySkew<Real>,
    config: &IncrementalConfig,
    pair: PairKey,
) -> Result<TwoViewGeometry> {
    for image in [pair.lo, pair.hi] {
        if !state.is_unplaced(image) {
            return Err(SfmError::ImageNotUnplaced { image });
        }
    }

    let geom = estimate_two_view(store, pair, intrinsics, config)?;
    for found in [geom.ransac_inliers.len(), geom.pose_inliers.len()] {
        if found < config.min_initial_inliers {
            return Err(SfmError::InsufficientInliers {
                found,
                required: config.min_initial_inliers,
            });
        }
    }

    let matches = store.matches(pair.lo, pair.hi);
    let pairs: Vec<(usize, usize)> = geom
        .pose_inliers
        .iter()
        .map(|&i| (matches[i].query_idx, matches[i].train_idx))
        .collect();

    let origin = Iso3::identity();
    let relative = geom.relative_pose();
    let points = Triangulator::new(store, colors, intrinsics, config).triangulate(
        (pair.lo, &origin),
        (pair.hi, &relative),
        &pairs,
    )?;

    state.place(pair.lo, origin, PlacementMethod::Baseline)?;
    state.place(pair.hi, relative, PlacementMethod::Baseline)?;
    let added = Triangulator::append(state.graph_mut(), points);
    log::info!(
        "initialized from ({}, {}): {} points",
        pair.lo,
        pair.hi,
        added.len()
    );
    Ok(geom)
}
