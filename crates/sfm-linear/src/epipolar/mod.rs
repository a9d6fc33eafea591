//! Two-view epipolar geometry for calibrated cameras.
//!
//! All functions here work on **normalized** image coordinates (pixels with
//! `K^{-1}` applied) except [`essential_ransac`], which takes pixels plus the
//! intrinsics and reports residuals in pixels. The essential matrix satisfies
//! `x2^T E x1 = 0` for the relative pose `x2 = R x1 + t`.

mod decomposition;
mod essential;
mod recover;

pub use decomposition::decompose_essential;
pub use essential::{essential_8point, essential_ransac, sampson_distance};
pub use recover::{recover_pose, RelativePose};
