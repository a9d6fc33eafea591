//! Seeded RANSAC over an [`Estimator`].
//!
//! An estimator supplies a minimal solver, a per-datum residual and,
//! optionally, a degeneracy test and a least-squares refit. Solvers with
//! several solutions per sample (P3P, for instance) return all of them from
//! [`Estimator::fit_candidates`] and each is scored.
//!
//! [`ransac_fit`] never panics on bad data: without consensus it returns a
//! [`RansacResult`] with `success == false`. The sampler is a [`StdRng`]
//! seeded from [`RansacOptions::seed`], so a run is a pure function of its
//! inputs.

use rand::prelude::IndexedRandom;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::Real;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RansacOptions {
    /// Hard cap on sampled hypotheses.
    pub max_iters: usize,
    /// A datum is an inlier when its residual is at most this value.
    pub thresh: Real,
    /// Smallest consensus set that counts as success.
    pub min_inliers: usize,
    /// Probability of having drawn one all-inlier sample, used to shrink
    /// the iteration budget as the inlier ratio improves.
    pub confidence: Real,
    pub seed: u64,
    /// Try [`Estimator::refit`] on each consensus set.
    pub refit_on_inliers: bool,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 1000,
            thresh: 1.0,
            min_inliers: 8,
            confidence: 0.999,
            seed: 1_234_567,
            refit_on_inliers: true,
        }
    }
}

/// Best hypothesis of a RANSAC run.
///
/// `model` is `Some` exactly when `success` is set.
#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    pub success: bool,
    pub model: Option<M>,
    /// Ascending indices into the input data.
    pub inliers: Vec<usize>,
    /// RMS residual over `inliers`; infinite without a model.
    pub inlier_rms: Real,
    /// Iteration at which the returned model was found.
    pub iters: usize,
}

impl<M> Default for RansacResult<M> {
    fn default() -> Self {
        Self {
            success: false,
            model: None,
            inliers: Vec::new(),
            inlier_rms: Real::INFINITY,
            iters: 0,
        }
    }
}

impl<M> RansacResult<M> {
    /// `inliers` as a boolean mask over `n` data.
    pub fn inlier_mask(&self, n: usize) -> Vec<bool> {
        let mut mask = vec![false; n];
        self.inliers
            .iter()
            .filter(|&&i| i < n)
            .for_each(|&i| mask[i] = true);
        mask
    }
}

/// A model family that RANSAC can hypothesize and score.
pub trait Estimator {
    type Datum;
    type Model;

    /// Size of a minimal sample.
    const MIN_SAMPLES: usize;

    /// Solve for one model from `sample_indices`, or `None` on failure.
    fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model>;

    /// All models consistent with a minimal sample; defaults to [`Estimator::fit`].
    fn fit_candidates(data: &[Self::Datum], sample_indices: &[usize]) -> Vec<Self::Model> {
        Self::fit(data, sample_indices).into_iter().collect()
    }

    /// Non-negative error of `datum` under `model`, in the units of
    /// [`RansacOptions::thresh`]. Non-finite values never count as inliers.
    fn residual(model: &Self::Model, datum: &Self::Datum) -> Real;

    /// Reject a sample before fitting.
    fn is_degenerate(_data: &[Self::Datum], _sample_indices: &[usize]) -> bool {
        false
    }

    /// Re-estimate from a consensus set. `None` keeps the sampled model.
    fn refit(_data: &[Self::Datum], _inliers: &[usize]) -> Option<Self::Model> {
        None
    }
}

/// Inlier set of one model together with the inlier residuals.
#[derive(Debug, Default)]
struct Consensus {
    inliers: Vec<usize>,
    residuals: Vec<Real>,
}

impl Consensus {
    fn measure<E: Estimator>(model: &E::Model, data: &[E::Datum], thresh: Real) -> Self {
        let mut out = Self::default();
        for (i, datum) in data.iter().enumerate() {
            let r = E::residual(model, datum);
            if r.is_finite() && r <= thresh {
                out.inliers.push(i);
                out.residuals.push(r);
            }
        }
        out
    }

    fn len(&self) -> usize {
        self.inliers.len()
    }

    fn rms(&self) -> Real {
        if self.residuals.is_empty() {
            return Real::INFINITY;
        }
        let ss: Real = self.residuals.iter().map(|r| r * r).sum();
        (ss / self.residuals.len() as Real).sqrt()
    }
}

/// Iterations needed to draw one all-inlier sample with probability
/// `confidence`, or `None` when the bound is unusable.
fn required_iterations(confidence: Real, inlier_ratio: Real, sample_size: usize) -> Option<usize> {
    if !(confidence > 0.0 && inlier_ratio > 0.0) {
        return None;
    }
    let p_good_sample = inlier_ratio.powi(sample_size as i32);
    let log_miss = (1.0 - p_good_sample).max(1e-12).ln();
    if log_miss >= 0.0 {
        return None;
    }
    let log_fail = (1.0 - confidence.min(1.0 - 1e-12)).ln();
    Some((log_fail / log_miss).ceil() as usize)
}

/// Run RANSAC for estimator `E` over `data`.
///
/// Models are ranked by inlier count, then by lower inlier RMS. A refit
/// replaces the sampled model only if it keeps at least as many inliers.
pub fn ransac_fit<E: Estimator>(data: &[E::Datum], opts: &RansacOptions) -> RansacResult<E::Model> {
    let mut best = RansacResult::default();
    if E::MIN_SAMPLES == 0 || data.len() < E::MIN_SAMPLES {
        return best;
    }

    let indices: Vec<usize> = (0..data.len()).collect();
    let mut sample = Vec::with_capacity(E::MIN_SAMPLES);
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut budget = opts.max_iters;

    let mut iter = 0;
    while iter < budget {
        iter += 1;
        sample.clear();
        sample.extend(indices.choose_multiple(&mut rng, E::MIN_SAMPLES).copied());
        if E::is_degenerate(data, &sample) {
            continue;
        }

        for hypothesis in E::fit_candidates(data, &sample) {
            let consensus = Consensus::measure::<E>(&hypothesis, data, opts.thresh);
            if consensus.len() < opts.min_inliers {
                continue;
            }

            let refined = opts
                .refit_on_inliers
                .then(|| E::refit(data, &consensus.inliers))
                .flatten()
                .map(|m| {
                    let c = Consensus::measure::<E>(&m, data, opts.thresh);
                    (m, c)
                })
                .filter(|(_, c)| c.len() >= consensus.len());
            let (model, consensus) = refined.unwrap_or((hypothesis, consensus));

            let rms = consensus.rms();
            let improves = !best.success
                || consensus.len() > best.inliers.len()
                || (consensus.len() == best.inliers.len() && rms < best.inlier_rms);
            if !improves {
                continue;
            }

            let ratio = consensus.len() as Real / data.len() as Real;
            best = RansacResult {
                success: true,
                model: Some(model),
                inliers: consensus.inliers,
                inlier_rms: rms,
                iters: iter,
            };
            if let Some(n) = required_iterations(opts.confidence, ratio, E::MIN_SAMPLES) {
                budget = n.clamp(iter, opts.max_iters);
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Pt2, Vec2};

    /// Pure 2D shift between matched points; one match determines it.
    struct ShiftEstimator;

    impl Estimator for ShiftEstimator {
        type Datum = (Pt2, Pt2);
        type Model = Vec2;

        const MIN_SAMPLES: usize = 1;

        fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model> {
            let (a, b) = data[sample_indices[0]];
            Some(b - a)
        }

        fn residual(model: &Self::Model, datum: &Self::Datum) -> Real {
            (datum.0 + model - datum.1).norm()
        }

        fn refit(data: &[Self::Datum], inliers: &[usize]) -> Option<Self::Model> {
            let sum = inliers
                .iter()
                .fold(Vec2::zeros(), |acc, &i| acc + (data[i].1 - data[i].0));
            (!inliers.is_empty()).then(|| sum / inliers.len() as Real)
        }
    }

    /// Offers a far-off shift before the true one for every sample.
    struct AmbiguousShift;

    impl Estimator for AmbiguousShift {
        type Datum = (Pt2, Pt2);
        type Model = Vec2;

        const MIN_SAMPLES: usize = 1;

        fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model> {
            ShiftEstimator::fit(data, sample_indices)
        }

        fn fit_candidates(data: &[Self::Datum], sample_indices: &[usize]) -> Vec<Self::Model> {
            ShiftEstimator::fit(data, sample_indices)
                .map(|good| vec![-good * 7.0, good])
                .unwrap_or_default()
        }

        fn residual(model: &Self::Model, datum: &Self::Datum) -> Real {
            ShiftEstimator::residual(model, datum)
        }
    }

    fn opts() -> RansacOptions {
        RansacOptions {
            max_iters: 200,
            thresh: 0.05,
            min_inliers: 5,
            confidence: 0.99,
            seed: 42,
            refit_on_inliers: true,
        }
    }

    /// Twelve matches shifted by (3, -1) with ±0.01 jitter, then three outliers.
    fn matches() -> Vec<(Pt2, Pt2)> {
        let shift = Vec2::new(3.0, -1.0);
        let mut data: Vec<(Pt2, Pt2)> = (0..12)
            .map(|i| {
                let a = Pt2::new(i as Real * 10.0, (i % 4) as Real * 25.0);
                let jitter = if i % 2 == 0 { 0.01 } else { -0.01 };
                (a, a + shift + Vec2::new(jitter, 0.0))
            })
            .collect();
        data.push((Pt2::new(0.0, 0.0), Pt2::new(40.0, 40.0)));
        data.push((Pt2::new(5.0, 5.0), Pt2::new(-9.0, 2.0)));
        data.push((Pt2::new(9.0, 1.0), Pt2::new(9.0, 1.0)));
        data
    }

    #[test]
    fn too_little_data_fails_cleanly() {
        let res = ransac_fit::<ShiftEstimator>(&[], &opts());
        assert!(!res.success);
        assert!(res.model.is_none());
        assert!(res.inliers.is_empty());
    }

    #[test]
    fn consensus_excludes_outliers() {
        let data = matches();
        let res = ransac_fit::<ShiftEstimator>(&data, &opts());
        assert!(res.success);
        let shift = res.model.unwrap();
        assert!((shift - Vec2::new(3.0, -1.0)).norm() < 1e-9);
        assert_eq!(res.inliers, (0..12).collect::<Vec<_>>());
        let mask = res.inlier_mask(data.len());
        assert!(mask[..12].iter().all(|&m| m) && mask[12..].iter().all(|&m| !m));
    }

    #[test]
    fn every_candidate_is_scored() {
        let res = ransac_fit::<AmbiguousShift>(&matches(), &opts());
        assert!(res.success);
        assert_eq!(res.inliers.len(), 12);
    }

    #[test]
    fn min_inliers_gates_success() {
        let res = ransac_fit::<ShiftEstimator>(
            &matches(),
            &RansacOptions {
                min_inliers: 13,
                ..opts()
            },
        );
        assert!(!res.success);
    }

    #[test]
    fn identical_seeds_give_identical_runs() {
        let data = matches();
        let a = ransac_fit::<ShiftEstimator>(&data, &opts());
        let b = ransac_fit::<ShiftEstimator>(&data, &opts());
        assert_eq!(a.inliers, b.inliers);
        assert_eq!(a.iters, b.iters);
        assert_eq!(a.model, b.model);
    }

    #[test]
    fn iteration_bound_shrinks_with_inlier_ratio() {
        let low = required_iterations(0.99, 0.3, 8).unwrap();
        let high = required_iterations(0.99, 0.9, 8).unwrap();
        assert!(high < low);
        assert_eq!(required_iterations(0.99, 0.0, 8), None);
        assert_eq!(required_iterations(0.99, 1.0, 8), Some(1));
    }
}
