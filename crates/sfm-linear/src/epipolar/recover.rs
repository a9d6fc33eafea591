//! Cheirality-based selection of the relative pose encoded by an essential matrix.

use super::decomposition::decompose_essential;
use crate::triangulation::triangulate_point_linear;
use anyhow::Result;
use sfm_core::{Mat3, Mat34, Pt2, Real, Vec3};

/// Points farther than this (in units of the unit baseline) are treated as
/// lying at infinity and do not vote for a candidate.
const FAR_DEPTH: Real = 50.0;

/// Relative pose of the second camera with respect to the first.
///
/// `x2 = rotation * x1 + translation`, with `translation` of unit length.
#[derive(Debug, Clone)]
pub struct RelativePose {
    pub rotation: Mat3,
    pub translation: Vec3,
    /// Candidate indices whose triangulation lies in front of both cameras.
    pub inliers: Vec<usize>,
}

fn relative_projection(r: &Mat3, t: &Vec3) -> Mat34 {
    let mut p = Mat34::zeros();
    p.fixed_view_mut::<3, 3>(0, 0).copy_from(r);
    p.set_column(3, t);
    p
}

/// Select the decomposition of `e` that places the most points in front of
/// both cameras.
///
/// `x1`/`x2` are normalized coordinates and `candidates` the indices to
/// test (typically the RANSAC inliers). Ties keep the first candidate in
/// decomposition order. Fails if no candidate yields a point with positive
/// depth in both views.
pub fn recover_pose(
    e: &Mat3,
    x1: &[Pt2],
    x2: &[Pt2],
    candidates: &[usize],
) -> Result<RelativePose> {
    if x1.len() != x2.len() {
        anyhow::bail!(
            "mismatched correspondence counts ({} vs {})",
            x1.len(),
            x2.len()
        );
    }
    if let Some(&bad) = candidates.iter().find(|&&i| i >= x1.len()) {
        anyhow::bail!("candidate index {bad} out of range ({} points)", x1.len());
    }

    let p1 = relative_projection(&Mat3::identity(), &Vec3::zeros());
    let mut best: Option<RelativePose> = None;

    for (r, t) in decompose_essential(e)? {
        let p2 = relative_projection(&r, &t);
        let inliers: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&i| {
                let Ok(x) = triangulate_point_linear(&[p1, p2], &[x1[i], x2[i]]) else {
                    return false;
                };
                let z1 = x.z;
                let z2 = (r * x.coords + t).z;
                z1 > 0.0 && z2 > 0.0 && z1 < FAR_DEPTH && z2 < FAR_DEPTH
            })
            .collect();

        let better = best
            .as_ref()
            .map_or(true, |b| inliers.len() > b.inliers.len());
        if better {
            best = Some(RelativePose {
                rotation: r,
                translation: t,
                inliers,
            });
        }
    }

    match best {
        Some(pose) if !pose.inliers.is_empty() => {
            log::debug!(
                "recovered relative pose with {}/{} points in front of both cameras",
                pose.inliers.len(),
                candidates.len()
            );
            Ok(pose)
        }
        _ => anyhow::bail!("no pose candidate places points in front of both cameras"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epipolar::essential_8point;
    use sfm_core::synthetic::{camera_row, random_points};

    #[test]
    fn recover_pose_matches_ground_truth() {
        let poses = camera_row(2, 0.5, 0.05);
        let pts = random_points(30, 21, 0.25, 1.5, 4.0, 8.0);
        let to_norm = |p: &sfm_core::Pt3| Pt2::new(p.x / p.z, p.y / p.z);
        let x1: Vec<Pt2> = pts.iter().map(to_norm).collect();
        let x2: Vec<Pt2> = pts
            .iter()
            .map(|p| to_norm(&poses[1].transform_point(p)))
            .collect();

        let e = essential_8point(&x1, &x2).unwrap();
        let all: Vec<usize> = (0..pts.len()).collect();
        let rel = recover_pose(&e, &x1, &x2, &all).unwrap();

        assert_eq!(rel.inliers, all);
        let r_gt = poses[1].rotation.to_rotation_matrix();
        let r_err = (rel.rotation - r_gt.matrix()).norm();
        assert!(r_err < 1e-6, "rotation error {r_err}");
        let t_gt = poses[1].translation.vector.normalize();
        assert!((rel.translation - t_gt).norm() < 1e-6);
    }

    #[test]
    fn recover_pose_rejects_bad_indices() {
        let e = Mat3::identity();
        let x = vec![Pt2::new(0.0, 0.0)];
        assert!(recover_pose(&e, &x, &x, &[3]).is_err());
    }
}
