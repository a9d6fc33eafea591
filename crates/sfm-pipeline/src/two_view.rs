//! Relative pose of one image pair from its raw matches.

use nalgebra::{Rotation3, Translation3, UnitQuaternion};
use sfm_core::{FxFyCxCySkew, Iso3, Mat3, Pt2, Real, Vec3};
use sfm_linear::{essential_ransac, recover_pose};

use crate::config::IncrementalConfig;
use crate::correspondence::{CorrespondenceStore, PairKey};
use crate::error::{Result, SfmError};

/// Minimal sample of the essential-matrix solver.
const MIN_TWO_VIEW_MATCHES: usize = 8;

/// Geometry of a canonical pair: `x_hi = rotation * x_lo + translation`.
///
/// Inlier lists index into the pair's match list.
#[derive(Debug, Clone)]
pub struct TwoViewGeometry {
    pub pair: PairKey,
    pub rotation: Mat3,
    /// Unit-length direction of the baseline.
    pub translation: Vec3,
    /// Matches consistent with the essential matrix.
    pub ransac_inliers: Vec<usize>,
    /// RANSAC inliers that also triangulate in front of both cameras.
    pub pose_inliers: Vec<usize>,
}

impl TwoViewGeometry {
    /// Pose of the `hi` camera when the `lo` camera sits at the origin.
    pub fn relative_pose(&self) -> Iso3 {
        let rot = Rotation3::from_matrix(&self.rotation);
        Iso3::from_parts(
            Translation3::from(self.translation),
            UnitQuaternion::from_rotation_matrix(&rot),
        )
    }
}

/// Estimate the relative pose of `pair` with RANSAC over all its matches.
///
/// Fails with [`SfmError::InsufficientInliers`] when the pair has too few
/// matches or no consistent essential matrix / pose exists. Inlier thresholds
/// beyond the solver's own minimum are left to the caller.
pub fn estimate_two_view(
    store: &CorrespondenceStore,
    pair: PairKey,
    intrinsics: &FxFyCxCySkew<Real>,
    config: &IncrementalConfig,
) -> Result<TwoViewGeometry> {
    let matches = store.matches(pair.lo, pair.hi);
    if matches.len() < MIN_TWO_VIEW_MATCHES {
        return Err(SfmError::InsufficientInliers {
            found: matches.len(),
            required: MIN_TWO_VIEW_MATCHES,
        });
    }

    let mut pix_lo = Vec::with_capacity(matches.len());
    let mut pix_hi = Vec::with_capacity(matches.len());
    for m in matches {
        pix_lo.push(store.keypoint(pair.lo, m.query_idx)?.to_point());
        pix_hi.push(store.keypoint(pair.hi, m.train_idx)?.to_point());
    }

    let (e, ransac_inliers) =
        essential_ransac(&pix_lo, &pix_hi, intrinsics, &config.essential_ransac()).map_err(
            |err| {
                log::debug!("pair ({}, {}): {err}", pair.lo, pair.hi);
                SfmError::InsufficientInliers {
                    found: 0,
                    required: MIN_TWO_VIEW_MATCHES,
                }
            },
        )?;

    let normalize = |p: &Pt2| Pt2::from(intrinsics.pixel_to_normalized(&p.coords));
    let x_lo: Vec<Pt2> = pix_lo.iter().map(normalize).collect();
    let x_hi: Vec<Pt2> = pix_hi.iter().map(normalize).collect();

    let rel = recover_pose(&e, &x_lo, &x_hi, &ransac_inliers).map_err(|err| {
        log::debug!("pair ({}, {}): {err}", pair.lo, pair.hi);
        SfmError::InsufficientInliers {
            found: 0,
            required: 1,
        }
    })?;

    Ok(TwoViewGeometry {
        pair,
        rotation: rel.rotation,
        translation: rel.translation,
        ransac_inliers,
        pose_inliers: rel.inliers,
    })
}
