//! RANSAC-based robust PnP estimation.
//!
//! Hypotheses come from the P3P minimal solver (every candidate pose is
//! scored) and the consensus set is refined with EPnP. The residual is pixel
//! reprojection error.

use super::epnp::{epnp, EPNP_MIN_POINTS};
use super::{p3p, reprojection_error};
use anyhow::Result;
use sfm_core::{ransac_fit, Estimator, FxFyCxCySkew, Iso3, Pt2, Pt3, RansacOptions, Real};

/// Robust PnP from 3D-2D correspondences.
///
/// Returns the best `T_C_W` pose and the ascending inlier indices. Fails when
/// fewer than four correspondences are given or no consensus is found.
pub fn pnp_ransac(
    world: &[Pt3],
    image: &[Pt2],
    k: &FxFyCxCySkew<Real>,
    opts: &RansacOptions,
) -> Result<(Iso3, Vec<usize>)> {
    let n = world.len();
    if n < 4 || image.len() != n {
        anyhow::bail!("need at least 4 point correspondences, got {}", n.min(image.len()));
    }

    #[derive(Clone)]
    struct PnpDatum {
        pw: Pt3,
        pi: Pt2,
        k: FxFyCxCySkew<Real>,
    }

    fn split(data: &[PnpDatum], indices: &[usize]) -> (Vec<Pt3>, Vec<Pt2>) {
        indices.iter().map(|&i| (data[i].pw, data[i].pi)).unzip()
    }

    struct P3pEst;

    impl Estimator for P3pEst {
        type Datum = PnpDatum;
        type Model = Iso3;

        const MIN_SAMPLES: usize = 3;

        fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model> {
            Self::fit_candidates(data, sample_indices).into_iter().next()
        }

        fn fit_candidates(data: &[Self::Datum], sample_indices: &[usize]) -> Vec<Self::Model> {
            let (world, image) = split(data, sample_indices);
            p3p(&world, &image, &data[sample_indices[0]].k).unwrap_or_default()
        }

        fn residual(model: &Self::Model, datum: &Self::Datum) -> f64 {
            reprojection_error(&datum.k, model, &datum.pw, &datum.pi)
        }

        fn is_degenerate(data: &[Self::Datum], sample_indices: &[usize]) -> bool {
            let [a, b, c] = [0, 1, 2].map(|s| data[sample_indices[s]].pw);
            (b - a).cross(&(c - a)).norm() <= 1e-12
        }

        fn refit(data: &[Self::Datum], inliers: &[usize]) -> Option<Self::Model> {
            if inliers.len() < EPNP_MIN_POINTS {
                return None;
            }
            let (world, image) = split(data, inliers);
            epnp(&world, &image, &data[inliers[0]].k).ok()
        }
    }

    let data: Vec<PnpDatum> = world
        .iter()
        .zip(image.iter())
        .map(|(&pw, &pi)| PnpDatum { pw, pi, k: *k })
        .collect();

    let res = ransac_fit::<P3pEst>(&data, opts);
    if !res.success {
        anyhow::bail!("ransac failed to find a consensus PnP solution");
    }
    let pose = res
        .model
        .ok_or_else(|| anyhow::anyhow!("ransac reported success without a model"))?;
    log::debug!(
        "pnp ransac: {}/{} inliers after {} iterations, rms {:.3} px",
        res.inliers.len(),
        n,
        res.iters,
        res.inlier_rms
    );
    Ok((pose, res.inliers))
}
