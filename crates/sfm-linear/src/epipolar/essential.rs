//! Essential matrix estimation.
//!
//! Implements the normalized 8-point algorithm on calibrated coordinates and
//! a RANSAC wrapper scoring correspondences by Sampson distance in pixels.

use super::decomposition::enforce_essential_constraints;
use crate::math::{mat3_from_svd_row, normalize_points_2d, null_vector};
use anyhow::Result;
use nalgebra::{DMatrix, Vector3};
use sfm_core::{ransac_fit, Estimator, FxFyCxCySkew, Mat3, Pt2, RansacOptions, Real};

/// Normalized 8-point algorithm for the essential matrix.
///
/// `x1` and `x2` are corresponding **normalized** coordinates. The result is
/// projected onto the essential manifold and scaled to unit Frobenius norm.
pub fn essential_8point(x1: &[Pt2], x2: &[Pt2]) -> Result<Mat3> {
    let n = x1.len();
    if n < 8 || x2.len() != n {
        anyhow::bail!("need at least 8 point correspondences, got {}", n.min(x2.len()));
    }

    let (x1n, t1) = normalize_points_2d(x1)
        .ok_or_else(|| anyhow::anyhow!("degenerate point configuration in first view"))?;
    let (x2n, t2) = normalize_points_2d(x2)
        .ok_or_else(|| anyhow::anyhow!("degenerate point configuration in second view"))?;

    let mut a = DMatrix::<Real>::zeros(n, 9);
    for (i, (p, q)) in x1n.iter().zip(x2n.iter()).enumerate() {
        a[(i, 0)] = q.x * p.x;
        a[(i, 1)] = q.x * p.y;
        a[(i, 2)] = q.x;
        a[(i, 3)] = q.y * p.x;
        a[(i, 4)] = q.y * p.y;
        a[(i, 5)] = q.y;
        a[(i, 6)] = p.x;
        a[(i, 7)] = p.y;
        a[(i, 8)] = 1.0;
    }

    let f = null_vector(&a).ok_or_else(|| anyhow::anyhow!("svd failed in 8-point solve"))?;
    let f = DMatrix::from_row_slice(1, 9, f.as_slice());
    let e_norm = mat3_from_svd_row(&f, 0)
        .ok_or_else(|| anyhow::anyhow!("unexpected null vector size"))?;

    // The conditioned matrix is not essential; project only after undoing it.
    let e = enforce_essential_constraints(&(t2.transpose() * e_norm * t1))?;
    let norm = e.norm();
    if norm <= Real::EPSILON {
        anyhow::bail!("essential matrix is numerically zero");
    }
    Ok(e / norm)
}

/// Sampson distance of a correspondence to the epipolar geometry of `e`.
///
/// First-order approximation of the geometric error, in the units of the
/// input coordinates. Returns `INFINITY` when the epipolar lines vanish.
pub fn sampson_distance(e: &Mat3, x1: &Pt2, x2: &Pt2) -> Real {
    let p = Vector3::new(x1.x, x1.y, 1.0);
    let q = Vector3::new(x2.x, x2.y, 1.0);
    let ep = e * p;
    let etq = e.transpose() * q;
    let denom = ep.x * ep.x + ep.y * ep.y + etq.x * etq.x + etq.y * etq.y;
    if denom <= 1e-24 {
        return Real::INFINITY;
    }
    q.dot(&ep).abs() / denom.sqrt()
}

/// Robust essential matrix estimation from pixel correspondences.
///
/// Pixels are normalized with `k`; the 8-point solver runs inside RANSAC and
/// the residual is the Sampson distance scaled back to pixels with the mean
/// focal length, so `opts.thresh` is expressed in pixels. Returns the model
/// and the ascending inlier indices.
pub fn essential_ransac(
    pix1: &[Pt2],
    pix2: &[Pt2],
    k: &FxFyCxCySkew<Real>,
    opts: &RansacOptions,
) -> Result<(Mat3, Vec<usize>)> {
    let n = pix1.len();
    if n < 8 || pix2.len() != n {
        anyhow::bail!("need at least 8 point correspondences, got {}", n.min(pix2.len()));
    }

    #[derive(Clone)]
    struct EDatum {
        x1: Pt2,
        x2: Pt2,
        focal: Real,
    }

    struct EssentialEst;

    impl Estimator for EssentialEst {
        type Datum = EDatum;
        type Model = Mat3;

        const MIN_SAMPLES: usize = 8;

        fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model> {
            let (p1, p2): (Vec<Pt2>, Vec<Pt2>) =
                sample_indices.iter().map(|&i| (data[i].x1, data[i].x2)).unzip();
            essential_8point(&p1, &p2).ok()
        }

        fn residual(model: &Self::Model, datum: &Self::Datum) -> f64 {
            sampson_distance(model, &datum.x1, &datum.x2) * datum.focal
        }

        fn is_degenerate(data: &[Self::Datum], sample_indices: &[usize]) -> bool {
            // Repeated keypoints in the sample collapse the design matrix.
            sample_indices.iter().enumerate().any(|(a, &i)| {
                sample_indices[a + 1..].iter().any(|&j| {
                    (data[i].x1 - data[j].x1).norm() < 1e-12
                        || (data[i].x2 - data[j].x2).norm() < 1e-12
                })
            })
        }

        fn refit(data: &[Self::Datum], inliers: &[usize]) -> Option<Self::Model> {
            Self::fit(data, inliers)
        }
    }

    let focal = k.mean_focal();
    let data: Vec<EDatum> = pix1
        .iter()
        .zip(pix2.iter())
        .map(|(a, b)| EDatum {
            x1: Pt2::from(k.pixel_to_normalized(&a.coords)),
            x2: Pt2::from(k.pixel_to_normalized(&b.coords)),
            focal,
        })
        .collect();

    let res = ransac_fit::<EssentialEst>(&data, opts);
    if !res.success {
        anyhow::bail!("ransac failed to find a consensus essential matrix");
    }
    let e = res
        .model
        .ok_or_else(|| anyhow::anyhow!("ransac reported success without a model"))?;
    log::debug!(
        "essential ransac: {}/{} inliers after {} iterations, rms {:.3} px",
        res.inliers.len(),
        n,
        res.iters,
        res.inlier_rms
    );
    Ok((e, res.inliers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::skew;
    use sfm_core::synthetic::{camera_row, default_intrinsics, random_points};
    use sfm_core::{Iso3, Pt3};

    fn project_all(k: &FxFyCxCySkew<Real>, pose: &Iso3, pts: &[Pt3]) -> Vec<Pt2> {
        pts.iter()
            .map(|p| k.project(&pose.transform_point(p)).unwrap())
            .collect()
    }

    #[test]
    fn eight_point_satisfies_epipolar_constraint() {
        let k = default_intrinsics();
        let poses = camera_row(2, 0.5, 0.05);
        let pts = random_points(20, 3, 0.25, 1.5, 4.0, 8.0);
        let x1: Vec<Pt2> = pts
            .iter()
            .map(|p| Pt2::new(p.x / p.z, p.y / p.z))
            .collect();
        let x2: Vec<Pt2> = pts
            .iter()
            .map(|p| {
                let pc = poses[1].transform_point(p);
                Pt2::new(pc.x / pc.z, pc.y / pc.z)
            })
            .collect();

        let e = essential_8point(&x1, &x2).unwrap();
        for (p, q) in x1.iter().zip(x2.iter()) {
            assert!(sampson_distance(&e, p, q) * k.mean_focal() < 1e-6);
        }

        let e_gt = skew(&poses[1].translation.vector)
            * poses[1].rotation.to_rotation_matrix().into_inner();
        let e_gt = e_gt / e_gt.norm();
        let diff = (e - e_gt).norm().min((e + e_gt).norm());
        assert!(diff < 1e-6, "essential mismatch: {diff}");
    }

    #[test]
    fn eight_point_rejects_too_few_points() {
        let x = vec![Pt2::new(0.0, 0.0); 7];
        assert!(essential_8point(&x, &x).is_err());
    }

    #[test]
    fn ransac_separates_outliers() {
        let k = default_intrinsics();
        let poses = camera_row(2, 0.5, 0.05);
        let pts = random_points(40, 9, 0.25, 1.5, 4.0, 8.0);
        let pix1 = project_all(&k, &poses[0], &pts);
        let mut pix2 = project_all(&k, &poses[1], &pts);
        for p in pix2.iter_mut().step_by(5) {
            p.y += 40.0;
        }

        let opts = RansacOptions {
            max_iters: 1000,
            thresh: 1.0,
            min_inliers: 15,
            confidence: 0.999,
            seed: 5,
            refit_on_inliers: true,
        };
        let (e, inliers) = essential_ransac(&pix1, &pix2, &k, &opts).unwrap();
        let expected: Vec<usize> = (0..40).filter(|i| i % 5 != 0).collect();
        assert_eq!(inliers, expected);
        assert!((e.norm() - 1.0).abs() < 1e-9);

        // Exact inliers must fit the refined model exactly, not just within the threshold.
        let norm = |p: &Pt2| Pt2::from(k.pixel_to_normalized(&p.coords));
        let worst = inliers
            .iter()
            .map(|&i| sampson_distance(&e, &norm(&pix1[i]), &norm(&pix2[i])) * k.mean_focal())
            .fold(0.0, Real::max);
        assert!(worst < 1e-6, "worst inlier residual {worst} px");
    }
}
