//! Perspective-n-Point (PnP) solvers for camera pose estimation.
//!
//! Includes:
//! - P3P minimal solver (3 points, up to four solutions),
//! - EPnP (control-point formulation) for 6+ points,
//! - P3P hypotheses inside RANSAC with an EPnP refit on the consensus set.
//!
//! All methods estimate a pose `T_C_W`: transform from world coordinates into
//! the camera frame.

use sfm_core::{FxFyCxCySkew, Iso3, Pt2, Pt3, Real};

mod epnp;
mod p3p;
mod pose_utils;
mod ransac;

pub use epnp::epnp;
pub use p3p::p3p;
pub use ransac::pnp_ransac;

/// Pixel distance between the projection of `pw` under `pose` and `px`.
///
/// Points on or behind the image plane yield `INFINITY`.
pub fn reprojection_error(k: &FxFyCxCySkew<Real>, pose: &Iso3, pw: &Pt3, px: &Pt2) -> Real {
    match k.project(&pose.transform_point(pw)) {
        Some(proj) => (proj - px).norm(),
        None => Real::INFINITY,
    }
}
