//! Incremental registration of unplaced images.
//!
//! [`Registrar::grow`] repeatedly picks the unplaced image with the most
//! links into the point cloud and registers it with robust PnP. Images that
//! fail are retried until `max_failed_attempts`, after which they are
//! dropped. An external [`Refiner`] is invoked every `bundle_every`
//! successful additions.

use nalgebra::Translation3;
use sfm_core::{FxFyCxCySkew, Iso3, Pt2, Pt3, Real, Vec3};
use sfm_linear::pnp_ransac;

use crate::color::ImageColors;
use crate::config::IncrementalConfig;
use crate::correspondence::{CorrespondenceStore, ImageId};
use crate::error::{Result, SfmError};
use crate::scoring::{correspondence_score, pnp_correspondences, PnpCorrespondence};
use crate::state::{PlacementMethod, ReconstructionState, RegistrationOutcome};
use crate::triangulator::Triangulator;

const IDENTITY_TOL: Real = 1e-12;

/// Hook for periodic refinement (e.g. bundle adjustment) of the state.
///
/// The refiner may move poses with [`ReconstructionState::set_pose`] and
/// points through [`ReconstructionState::graph_mut`].
pub trait Refiner {
    fn refine(&mut self, state: &mut ReconstructionState);
}

impl<F> Refiner for F
where
    F: FnMut(&mut ReconstructionState),
{
    fn refine(&mut self, state: &mut ReconstructionState) {
        self(state)
    }
}

/// Refiner that leaves the state untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRefinement;

impl Refiner for NoRefinement {
    fn refine(&mut self, _state: &mut ReconstructionState) {}
}

/// Registers images against an initialized reconstruction.
#[derive(Debug, Clone, Copy)]
pub struct Registrar<'a> {
    store: &'a CorrespondenceStore,
    colors: &'a ImageColors,
    intrinsics: &'a FxFyCxCySkew<Real>,
    config: &'a IncrementalConfig,
}

impl<'a> Registrar<'a> {
    /// Fails with [`SfmError::InvalidConfig`] when `config` does not validate.
    pub fn new(
        store: &'a CorrespondenceStore,
        colors: &'a ImageColors,
        intrinsics: &'a FxFyCxCySkew<Real>,
        config: &'a IncrementalConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            colors,
            intrinsics,
            config,
        })
    }

    fn triangulator(&self) -> Triangulator<'a> {
        Triangulator::new(self.store, self.colors, self.intrinsics, self.config)
    }

    /// Grow `state` until no unplaced image is eligible.
    ///
    /// Registration errors are counted against the image and never abort
    /// the loop.
    pub fn grow<R: Refiner + ?Sized>(&self, state: &mut ReconstructionState, refiner: &mut R) {
        let max_attempts = self.config.max_failed_attempts;
        loop {
            let candidates: Vec<ImageId> = state
                .unplaced()
                .iter()
                .copied()
                .filter(|&image| state.failures(image) < max_attempts)
                .collect();
            if candidates.is_empty() {
                if !state.unplaced().is_empty() {
                    log::warn!(
                        "no eligible images left; {} remain unplaced",
                        state.unplaced().len()
                    );
                }
                break;
            }

            let mut best: Option<(ImageId, usize)> = None;
            for &image in &candidates {
                let score = correspondence_score(state, self.store, image);
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((image, score));
                }
            }
            let Some((image, score)) = best else { break };
            log::debug!("next candidate: image {image} with score {score}");

            if score < self.config.min_pnp_correspondences {
                state.drop_image(
                    image,
                    format!(
                        "{score} correspondences, need at least {}",
                        self.config.min_pnp_correspondences
                    ),
                );
                continue;
            }

            match self.register_image(state, image) {
                Ok(_) => {
                    let additions = state.record_addition();
                    if additions % self.config.bundle_every == 0 {
                        log::info!("refining after {additions} additions");
                        refiner.refine(state);
                        state.push_event(image, RegistrationOutcome::Refined);
                    }
                }
                Err(err) => {
                    state.record_failure(image, &err, max_attempts);
                }
            }
        }

        let summary = state.summary();
        log::info!(
            "growth finished: {} placed, {} dropped, {} points",
            summary.placed,
            summary.dropped,
            summary.points
        );
    }

    /// Register one unplaced image.
    ///
    /// Uses robust PnP when enough 2D-3D links exist and the neighbor
    /// fallback otherwise. On error the state is unchanged.
    ///
    /// [`Registrar::grow`] drops candidates with too few links before calling
    /// this, so the fallback is only reached through direct calls.
    pub fn register_image(
        &self,
        state: &mut ReconstructionState,
        image: ImageId,
    ) -> Result<PlacementMethod> {
        if image >= self.store.num_images() {
            return Err(SfmError::UnknownImage { image });
        }
        if !state.is_unplaced(image) {
            return Err(SfmError::ImageNotUnplaced { image });
        }

        let corr = pnp_correspondences(state, self.store, image);
        if corr.len() >= self.config.min_pnp_correspondences {
            self.register_pnp(state, image, &corr)?;
            Ok(PlacementMethod::Pnp)
        } else {
            log::debug!(
                "image {image}: {} 2D-3D links, trying neighbor fallback",
                corr.len()
            );
            self.register_fallback(state, image)?;
            Ok(PlacementMethod::Fallback)
        }
    }

    fn register_pnp(
        &self,
        state: &mut ReconstructionState,
        image: ImageId,
        corr: &[PnpCorrespondence],
    ) -> Result<()> {
        let mut world: Vec<Pt3> = Vec::with_capacity(corr.len());
        let mut pixels: Vec<Pt2> = Vec::with_capacity(corr.len());
        for c in corr {
            let point = state
                .graph()
                .get(c.point)
                .ok_or_else(|| SfmError::PnpFailure {
                    image,
                    reason: format!("point {} does not exist", c.point),
                })?;
            world.push(point.position);
            pixels.push(self.store.keypoint(image, c.keypoint)?.to_point());
        }

        let (pose, inliers) =
            pnp_ransac(&world, &pixels, self.intrinsics, &self.config.pnp_ransac()).map_err(
                |e| SfmError::PnpFailure {
                    image,
                    reason: e.to_string(),
                },
            )?;
        if inliers.len() < self.config.min_pnp_inliers {
            return Err(SfmError::PnpFailure {
                image,
                reason: format!(
                    "{} inliers, need at least {}",
                    inliers.len(),
                    self.config.min_pnp_inliers
                ),
            });
        }
        log::debug!(
            "image {image}: PnP with {}/{} inliers",
            inliers.len(),
            corr.len()
        );

        state.place(image, pose, PlacementMethod::Pnp)?;
        for &i in &inliers {
            let c = corr[i];
            state.graph_mut().add_observation(c.point, image, c.keypoint);
        }
        self.triangulate_with_placed(state, image)
    }

    /// Triangulate fresh matches between `image` and every other placed image.
    ///
    /// Only matches whose keypoints are unobserved on both sides are used.
    /// Failures are logged and recorded, never propagated.
    fn triangulate_with_placed(
        &self,
        state: &mut ReconstructionState,
        image: ImageId,
    ) -> Result<()> {
        let pose = *state.pose(image).ok_or(SfmError::MissingPose { image })?;
        let others: Vec<ImageId> = state
            .placed()
            .iter()
            .copied()
            .filter(|&p| p != image)
            .collect();
        let tri = self.triangulator();

        for other in others {
            let other_pose = *state
                .pose(other)
                .ok_or(SfmError::MissingPose { image: other })?;
            let seen_here = state.graph().observed_keypoints(image);
            let seen_there = state.graph().observed_keypoints(other);
            let pairs: Vec<(usize, usize)> = self
                .store
                .oriented_matches(image, other)
                .into_iter()
                .filter(|(a, b)| !seen_here.contains(a) && !seen_there.contains(b))
                .collect();
            if pairs.is_empty() {
                continue;
            }

            match tri.triangulate((image, &pose), (other, &other_pose), &pairs) {
                Ok(points) => {
                    let added = Triangulator::append(state.graph_mut(), points);
                    log::debug!("image {image}: {} new points with image {other}", added.len());
                }
                Err(err) => {
                    log::debug!("image {image}: skipped triangulation with {other}: {err}");
                    state.push_event(
                        image,
                        RegistrationOutcome::TriangulationSkipped {
                            other,
                            reason: err.to_string(),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Place `image` next to the placed neighbor it shares most matches with.
    ///
    /// The pose copies the neighbor's rotation and shifts its translation by
    /// `fallback_offset` along x. It is a placeholder, not an estimate.
    fn register_fallback(&self, state: &mut ReconstructionState, image: ImageId) -> Result<()> {
        let mut best: Option<(ImageId, usize)> = None;
        for &p in state.placed() {
            let n = self.store.num_matches(p, image);
            if best.map_or(true, |(_, m)| n > m) {
                best = Some((p, n));
            }
        }
        let (neighbor, _) = best.ok_or(SfmError::NoMatchingNeighbor { image })?;
        let neighbor_pose = *state
            .pose(neighbor)
            .ok_or(SfmError::MissingPose { image: neighbor })?;

        if is_identity(&neighbor_pose) && state.placed().len() > 2 {
            log::debug!("image {image}: neighbor {neighbor} sits at the origin");
            return Err(SfmError::NoMatchingNeighbor { image });
        }

        let pairs = self.store.oriented_matches(neighbor, image);
        if pairs.len() < self.config.min_fallback_matches {
            return Err(SfmError::InsufficientCorrespondences {
                image,
                found: pairs.len(),
                required: self.config.min_fallback_matches,
            });
        }

        let t = neighbor_pose.translation.vector + Vec3::new(self.config.fallback_offset, 0.0, 0.0);
        let pose = Iso3::from_parts(Translation3::from(t), neighbor_pose.rotation);
        let points = self
            .triangulator()
            .triangulate((neighbor, &neighbor_pose), (image, &pose), &pairs)?;

        state.place(image, pose, PlacementMethod::Fallback)?;
        let added = Triangulator::append(state.graph_mut(), points);
        log::warn!(
            "image {image}: placed next to {neighbor} without PnP ({} points)",
            added.len()
        );
        Ok(())
    }
}

fn is_identity(pose: &Iso3) -> bool {
    pose.translation.vector.norm() <= IDENTITY_TOL && pose.rotation.angle() <= IDENTITY_TOL
}
