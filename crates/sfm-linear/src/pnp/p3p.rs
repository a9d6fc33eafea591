//! P3P (Perspective-3-Point) minimal solver.
//!
//! Grunert-style formulation: with unit bearings `f_i` and unknown depths
//! `s_i`, the law of cosines on the three triangle sides is reduced to a
//! quartic in the depth ratio `u = s_2 / s_1`. Every real root gives one
//! candidate pose.

use super::pose_utils::pose_from_points;
use crate::math::real_roots;
use anyhow::Result;
use sfm_core::{FxFyCxCySkew, Iso3, Pt2, Pt3, Real};

/// Product of two polynomials stored by ascending degree, truncated to degree 4.
fn poly_mul(a: &[Real; 5], b: &[Real; 5]) -> [Real; 5] {
    let mut out = [0.0; 5];
    for (i, &ai) in a.iter().enumerate() {
        for (j, &bj) in b.iter().enumerate().take(5 - i) {
            out[i + j] += ai * bj;
        }
    }
    out
}

/// P3P minimal solver: returns up to four pose candidates.
///
/// Requires exactly three non-collinear world points and their pixels.
/// Candidates are sorted by the depth of the first point. Fails when the
/// configuration is degenerate or no real solution exists.
pub fn p3p(world: &[Pt3], image: &[Pt2], k: &FxFyCxCySkew<Real>) -> Result<Vec<Iso3>> {
    if world.len() != 3 || image.len() != 3 {
        anyhow::bail!(
            "invalid number of correspondences: expected 3, got {}/{}",
            world.len(),
            image.len()
        );
    }

    let f: Vec<_> = image.iter().map(|px| k.unproject(px).normalize()).collect();

    let a = (world[1] - world[2]).norm();
    let b = (world[0] - world[2]).norm();
    let c = (world[0] - world[1]).norm();
    if a <= Real::EPSILON || b <= Real::EPSILON || c <= Real::EPSILON {
        anyhow::bail!("degenerate 3d point configuration");
    }
    if (world[1] - world[0]).cross(&(world[2] - world[0])).norm() <= 1e-12 * c * b {
        anyhow::bail!("collinear 3d points");
    }

    let cos_alpha = f[1].dot(&f[2]);
    let cos_beta = f[0].dot(&f[2]);
    let cos_gamma = f[0].dot(&f[1]);

    let (a2, b2, c2) = (a * a, b * b, c * c);
    let d = (b2 - a2) / c2;
    let e = b2 / c2;

    // v = N(u) / D(u), where v = s_3 / s_1.
    let n_poly = [1.0 - d, 2.0 * d * cos_gamma, -(1.0 + d), 0.0, 0.0];
    let d_poly = [2.0 * cos_beta, -2.0 * cos_alpha, 0.0, 0.0, 0.0];
    let e_poly = [1.0 - e, 2.0 * e * cos_gamma, -e, 0.0, 0.0];

    let n2 = poly_mul(&n_poly, &n_poly);
    let nd = poly_mul(&n_poly, &d_poly);
    let ed2 = poly_mul(&e_poly, &poly_mul(&d_poly, &d_poly));

    let coeffs: Vec<Real> = (0..5)
        .map(|i| n2[i] - 2.0 * cos_beta * nd[i] + ed2[i])
        .collect();
    let highest_first: Vec<Real> = coeffs.iter().rev().copied().collect();
    let roots = real_roots(&highest_first);

    let mut solutions = Vec::with_capacity(roots.len());
    for u in roots {
        let den = 2.0 * (cos_beta - u * cos_alpha);
        let k_val = 1.0 + u * u - 2.0 * u * cos_gamma;
        if den.abs() < 1e-12 || k_val.abs() < 1e-12 {
            continue;
        }
        let v = (n_poly[0] + n_poly[1] * u + n_poly[2] * u * u) / den;

        let s1_sq = c2 / k_val;
        if s1_sq <= 0.0 {
            continue;
        }
        let s1 = s1_sq.sqrt();
        let (s2, s3) = (u * s1, v * s1);
        if s2 <= 0.0 || s3 <= 0.0 {
            continue;
        }

        let camera = [f[0] * s1, f[1] * s2, f[2] * s3];
        if let Ok(pose) = pose_from_points(world, &camera) {
            solutions.push((s1, pose));
        }
    }

    if solutions.is_empty() {
        anyhow::bail!("P3P polynomial has no admissible root");
    }

    solutions.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(solutions.into_iter().map(|(_, pose)| pose).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Rotation3, Translation3};

    fn k() -> FxFyCxCySkew<Real> {
        FxFyCxCySkew {
            fx: 800.0,
            fy: 780.0,
            cx: 640.0,
            cy: 360.0,
            skew: 0.0,
        }
    }

    #[test]
    fn p3p_recovers_pose_from_minimal_set() {
        let k = k();
        let gt = Iso3::from_parts(
            Translation3::new(0.1, -0.05, 1.0),
            Rotation3::from_euler_angles(0.1, -0.05, 0.2).into(),
        );
        let world = vec![
            Pt3::new(0.2, -0.1, 0.8),
            Pt3::new(-0.1, 0.2, 1.1),
            Pt3::new(0.15, 0.1, 0.9),
        ];
        let image: Vec<Pt2> = world
            .iter()
            .map(|pw| k.project(&gt.transform_point(pw)).unwrap())
            .collect();

        let sols = p3p(&world, &image, &k).unwrap();
        assert!(!sols.is_empty() && sols.len() <= 4);

        let best = sols
            .iter()
            .map(|est| {
                let dt = (est.translation.vector - gt.translation.vector).norm();
                dt + est.rotation.angle_to(&gt.rotation)
            })
            .fold(Real::INFINITY, Real::min);
        assert!(best < 1e-4, "pose error too large: {best}");
    }

    #[test]
    fn p3p_rejects_collinear_points() {
        let k = k();
        let world = vec![
            Pt3::new(0.0, 0.0, 2.0),
            Pt3::new(0.1, 0.0, 2.0),
            Pt3::new(0.2, 0.0, 2.0),
        ];
        let image: Vec<Pt2> = world.iter().map(|p| k.project(p).unwrap()).collect();
        assert!(p3p(&world, &image, &k).is_err());
    }

    #[test]
    fn p3p_requires_three_points() {
        let k = k();
        let world = vec![Pt3::origin(); 4];
        let image = vec![Pt2::origin(); 4];
        assert!(p3p(&world, &image, &k).is_err());
    }
}
