//! EPnP (Efficient Perspective-n-Point) solver.
//!
//! Lepetit's control-point formulation: the world points are expressed as
//! barycentric combinations of four control points taken from the principal
//! axes of the point cloud, the control points are recovered in the camera
//! frame from the null vector of a `2n × 12` system, and the pose follows from
//! rigid alignment. Only the single-null-vector case is solved, so
//! non-planar configurations are required.

use super::pose_utils::pose_from_points;
use crate::math::null_vector;
use anyhow::Result;
use nalgebra::{linalg::SymmetricEigen, DMatrix};
use sfm_core::{FxFyCxCySkew, Iso3, Mat3, Pt2, Pt3, Real, Vec3};

/// Minimum number of correspondences accepted by [`epnp`].
pub(crate) const EPNP_MIN_POINTS: usize = 6;

/// EPnP pose estimation for 6+ non-coplanar points.
///
/// Returns a single `T_C_W` pose.
pub fn epnp(world: &[Pt3], image: &[Pt2], k: &FxFyCxCySkew<Real>) -> Result<Iso3> {
    let n = world.len();
    if n < EPNP_MIN_POINTS || image.len() != n {
        anyhow::bail!(
            "need at least {EPNP_MIN_POINTS} point correspondences, got {}",
            n.min(image.len())
        );
    }

    let centroid = world.iter().fold(Vec3::zeros(), |acc, p| acc + p.coords) / n as Real;
    let cov = world.iter().fold(Mat3::zeros(), |acc, p| {
        let d = p.coords - centroid;
        acc + d * d.transpose()
    }) / n as Real;

    let eig = SymmetricEigen::new(cov);
    let max_ev = eig.eigenvalues.max();
    if max_ev <= Real::EPSILON || eig.eigenvalues.min() <= 1e-10 * max_ev {
        anyhow::bail!("coplanar or degenerate points for EPnP");
    }
    let mut control_w = [centroid; 4];
    for i in 0..3 {
        let axis = eig.eigenvectors.column(i).into_owned();
        control_w[i + 1] = centroid + axis * eig.eigenvalues[i].abs().sqrt();
    }

    let basis = Mat3::from_columns(&[
        control_w[1] - control_w[0],
        control_w[2] - control_w[0],
        control_w[3] - control_w[0],
    ]);
    let basis_inv = basis
        .try_inverse()
        .ok_or_else(|| anyhow::anyhow!("coplanar or degenerate points for EPnP"))?;

    let alphas: Vec<[Real; 4]> = world
        .iter()
        .map(|p| {
            let c = basis_inv * (p.coords - control_w[0]);
            [1.0 - c.x - c.y - c.z, c.x, c.y, c.z]
        })
        .collect();

    let mut m = DMatrix::<Real>::zeros(2 * n, 12);
    for (i, (alpha, px)) in alphas.iter().zip(image.iter()).enumerate() {
        let uv = k.pixel_to_normalized(&px.coords);
        for (j, &a) in alpha.iter().enumerate() {
            let c = 3 * j;
            m[(2 * i, c)] = a;
            m[(2 * i, c + 2)] = -uv.x * a;
            m[(2 * i + 1, c + 1)] = a;
            m[(2 * i + 1, c + 2)] = -uv.y * a;
        }
    }

    let sol = null_vector(&m).ok_or_else(|| anyhow::anyhow!("svd failed in EPnP"))?;
    let mut control_c = [Vec3::zeros(); 4];
    for (j, cc) in control_c.iter_mut().enumerate() {
        *cc = Vec3::new(sol[3 * j], sol[3 * j + 1], sol[3 * j + 2]);
    }

    // Fix the scale from inter-control-point distances.
    let mut sum_w = 0.0;
    let mut sum_c = 0.0;
    for i in 0..4 {
        for j in (i + 1)..4 {
            sum_w += (control_w[i] - control_w[j]).norm_squared();
            sum_c += (control_c[i] - control_c[j]).norm_squared();
        }
    }
    if sum_c <= Real::EPSILON {
        anyhow::bail!("degenerate control point configuration for EPnP");
    }
    let scale = (sum_w / sum_c).sqrt();

    let mut camera_pts: Vec<Vec3> = alphas
        .iter()
        .map(|a| {
            a.iter()
                .zip(control_c.iter())
                .fold(Vec3::zeros(), |acc, (&alpha, cc)| acc + cc * alpha)
                * scale
        })
        .collect();

    // The null vector sign is arbitrary; points must end up in front.
    let mean_z = camera_pts.iter().map(|p| p.z).sum::<Real>() / n as Real;
    if mean_z < 0.0 {
        camera_pts.iter_mut().for_each(|p| *p = -*p);
    }

    pose_from_points(world, &camera_pts)
}
