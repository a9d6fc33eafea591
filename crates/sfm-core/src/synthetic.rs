//! Deterministic synthetic multi-view scenes.
//!
//! A [`SyntheticScene`] holds pinhole intrinsics, a set of `T_C_W` camera
//! poses and a cloud of world points. Views are rendered as keypoint lists
//! whose order is shuffled with an explicit seed, so that matching indices
//! between two views never coincide by accident. Ground truth is kept for
//! every keypoint, which lets tests build correspondences by shared point id.

use crate::{FxFyCxCySkew, Iso3, Pt2, Pt3, Real};
use anyhow::Result;
use nalgebra::{Translation3, UnitQuaternion, Vector3};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Camera rig plus world points with known ground truth.
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    pub intrinsics: FxFyCxCySkew<Real>,
    /// Image size in pixels `(width, height)`.
    pub image_size: (u32, u32),
    /// World-to-camera poses, one per image.
    pub poses: Vec<Iso3>,
    pub points: Vec<Pt3>,
}

/// Keypoints of one rendered image together with their source point ids.
#[derive(Debug, Clone, Default)]
pub struct SyntheticView {
    pub keypoints: Vec<Pt2>,
    /// `point_ids[k]` is the index into [`SyntheticScene::points`] seen by keypoint `k`.
    pub point_ids: Vec<usize>,
}

impl SyntheticView {
    /// Keypoint index observing `point_id`, if any.
    pub fn keypoint_of(&self, point_id: usize) -> Option<usize> {
        self.point_ids.iter().position(|&p| p == point_id)
    }
}

/// Default intrinsics for a 1280x720 sensor.
pub fn default_intrinsics() -> FxFyCxCySkew<Real> {
    FxFyCxCySkew {
        fx: 800.0,
        fy: 800.0,
        cx: 640.0,
        cy: 360.0,
        skew: 0.0,
    }
}

/// Generate `n` cameras on the world X axis looking down +Z.
///
/// Camera `i` sits at `(i * spacing, 0, 0)` and is rotated about +Y by
/// `i * yaw_step_rad`.
pub fn camera_row(n: usize, spacing: Real, yaw_step_rad: Real) -> Vec<Iso3> {
    (0..n)
        .map(|i| {
            let rotation =
                UnitQuaternion::from_scaled_axis(Vector3::y() * (yaw_step_rad * i as Real));
            let center = Vector3::new(spacing * i as Real, 0.0, 0.0);
            let translation = -(rotation * center);
            Iso3::from_parts(Translation3::from(translation), rotation)
        })
        .collect()
}

/// Sample `n` points uniformly inside an axis-aligned box.
///
/// The X/Y extent is `[-half_width, half_width]` shifted by `x_offset` on X;
/// depth is drawn from `[z_min, z_max)`.
pub fn random_points(
    n: usize,
    seed: u64,
    x_offset: Real,
    half_width: Real,
    z_min: Real,
    z_max: Real,
) -> Vec<Pt3> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            Pt3::new(
                x_offset + rng.random_range(-half_width..half_width),
                rng.random_range(-half_width..half_width),
                rng.random_range(z_min..z_max),
            )
        })
        .collect()
}

impl SyntheticScene {
    pub fn new(intrinsics: FxFyCxCySkew<Real>, poses: Vec<Iso3>, points: Vec<Pt3>) -> Self {
        let width = (2.0 * intrinsics.cx).round().max(1.0) as u32;
        let height = (2.0 * intrinsics.cy).round().max(1.0) as u32;
        Self {
            intrinsics,
            image_size: (width, height),
            poses,
            points,
        }
    }

    pub fn num_images(&self) -> usize {
        self.poses.len()
    }

    /// Project world point `point_id` into image `image`.
    ///
    /// Returns `None` when the point is behind the camera or outside the image.
    pub fn project(&self, image: usize, point_id: usize) -> Option<Pt2> {
        let pose = self.poses.get(image)?;
        let pw = self.points.get(point_id)?;
        let px = self.intrinsics.project(&pose.transform_point(pw))?;
        let (w, h) = self.image_size;
        let inside = px.x >= 0.0 && px.y >= 0.0 && px.x < w as Real && px.y < h as Real;
        inside.then_some(px)
    }

    /// Render `point_ids` into image `image` with a seeded keypoint order.
    ///
    /// Fails if any requested point is not visible.
    pub fn render_view(
        &self,
        image: usize,
        point_ids: &[usize],
        shuffle_seed: u64,
    ) -> Result<SyntheticView> {
        let mut ids = point_ids.to_vec();
        let seed = shuffle_seed ^ (image as u64).wrapping_mul(0x9E37_79B9);
        let mut rng = StdRng::seed_from_u64(seed);
        ids.shuffle(&mut rng);

        let mut keypoints = Vec::with_capacity(ids.len());
        for &pid in &ids {
            let Some(px) = self.project(image, pid) else {
                anyhow::bail!("point {pid} not visible in image {image}");
            };
            keypoints.push(px);
        }
        Ok(SyntheticView {
            keypoints,
            point_ids: ids,
        })
    }
}

/// Keypoint index pairs `(in a, in b)` for every point seen by both views.
///
/// Pairs are ordered by the keypoint index in `a`.
pub fn shared_matches(a: &SyntheticView, b: &SyntheticView) -> Vec<(usize, usize)> {
    a.point_ids
        .iter()
        .enumerate()
        .filter_map(|(ka, &pid)| b.keypoint_of(pid).map(|kb| (ka, kb)))
        .collect()
}
