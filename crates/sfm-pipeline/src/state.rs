//! Reconstruction state and its lifecycle transitions.
//!
//! This module defines `ReconstructionState`, the single mutable object
//! threaded through baseline initialization, registration and refinement.
//! Images move `unplaced → placed` or `unplaced → dropped`, each at most once.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sfm_core::{FxFyCxCySkew, Iso3, Real};
use sfm_linear::reprojection_error;

use crate::correspondence::{CorrespondenceStore, ImageId};
use crate::error::{Result, SfmError};
use crate::graph::ObservationGraph;

/// How an image obtained its pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementMethod {
    Baseline,
    Pnp,
    /// Synthetic pose next to a placed neighbor.
    Fallback,
}

/// Outcome recorded for one step of an image's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegistrationOutcome {
    Placed { method: PlacementMethod },
    Failed { reason: String, attempts: usize },
    Dropped { reason: String },
    /// Triangulation against another placed image was skipped.
    TriangulationSkipped { other: ImageId, reason: String },
    /// The external refiner ran after this image was added.
    Refined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationEvent {
    pub image: ImageId,
    pub outcome: RegistrationOutcome,
}

/// Aggregate counts of a reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionSummary {
    pub num_images: usize,
    pub placed: usize,
    pub dropped: usize,
    pub unplaced: usize,
    pub points: usize,
    pub observations: usize,
    pub mean_track_length: Real,
}

/// Everything produced by a reconstruction run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconstructionState {
    poses: BTreeMap<ImageId, Iso3>,
    graph: ObservationGraph,
    /// Registration order.
    placed: Vec<ImageId>,
    unplaced: Vec<ImageId>,
    dropped: Vec<ImageId>,
    failures: BTreeMap<ImageId, usize>,
    additions: usize,
    events: Vec<RegistrationEvent>,
}

impl ReconstructionState {
    /// Fresh state with images `0..num_images` unplaced.
    pub fn new(num_images: usize) -> Self {
        Self {
            unplaced: (0..num_images).collect(),
            ..Default::default()
        }
    }

    pub fn poses(&self) -> &BTreeMap<ImageId, Iso3> {
        &self.poses
    }

    pub fn pose(&self, image: ImageId) -> Option<&Iso3> {
        self.poses.get(&image)
    }

    pub fn graph(&self) -> &ObservationGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut ObservationGraph {
        &mut self.graph
    }

    pub fn placed(&self) -> &[ImageId] {
        &self.placed
    }

    pub fn unplaced(&self) -> &[ImageId] {
        &self.unplaced
    }

    pub fn dropped(&self) -> &[ImageId] {
        &self.dropped
    }

    pub fn is_placed(&self, image: ImageId) -> bool {
        self.poses.contains_key(&image)
    }

    pub fn is_unplaced(&self, image: ImageId) -> bool {
        self.unplaced.contains(&image)
    }

    /// Failed registration attempts of `image` so far.
    pub fn failures(&self, image: ImageId) -> usize {
        self.failures.get(&image).copied().unwrap_or(0)
    }

    /// Successful growth additions (baseline images excluded).
    pub fn additions(&self) -> usize {
        self.additions
    }

    pub fn events(&self) -> &[RegistrationEvent] {
        &self.events
    }

    /// Move `image` from unplaced to placed with `pose`.
    pub fn place(&mut self, image: ImageId, pose: Iso3, method: PlacementMethod) -> Result<()> {
        let pos = self
            .unplaced
            .iter()
            .position(|&i| i == image)
            .ok_or(SfmError::ImageNotUnplaced { image })?;
        self.unplaced.remove(pos);
        self.placed.push(image);
        self.poses.insert(image, pose);
        self.push_event(image, RegistrationOutcome::Placed { method });
        log::info!(
            "placed image {image} via {method:?} ({} placed, {} unplaced)",
            self.placed.len(),
            self.unplaced.len()
        );
        Ok(())
    }

    /// Overwrite the pose of an already placed image (external refinement).
    pub fn set_pose(&mut self, image: ImageId, pose: Iso3) -> Result<()> {
        let slot = self
            .poses
            .get_mut(&image)
            .ok_or(SfmError::MissingPose { image })?;
        *slot = pose;
        Ok(())
    }

    /// Count a failed attempt for `image`.
    ///
    /// The counter never decreases. The image is dropped exactly when the
    /// counter reaches `max_attempts`; returns whether that happened.
    pub fn record_failure(
        &mut self,
        image: ImageId,
        error: &SfmError,
        max_attempts: usize,
    ) -> bool {
        let attempts = {
            let counter = self.failures.entry(image).or_insert(0);
            *counter += 1;
            *counter
        };
        log::debug!("image {image}: attempt {attempts} failed: {error}");
        self.push_event(
            image,
            RegistrationOutcome::Failed {
                reason: error.to_string(),
                attempts,
            },
        );
        if attempts >= max_attempts && self.is_unplaced(image) {
            self.drop_image(image, format!("{attempts} failed attempts, last: {error}"));
            return true;
        }
        false
    }

    /// Permanently remove `image` from the unplaced set.
    ///
    /// Returns `false` if the image was not unplaced.
    pub fn drop_image(&mut self, image: ImageId, reason: impl Into<String>) -> bool {
        let Some(pos) = self.unplaced.iter().position(|&i| i == image) else {
            return false;
        };
        let reason = reason.into();
        log::warn!("dropping image {image}: {reason}");
        self.unplaced.remove(pos);
        self.dropped.push(image);
        self.push_event(image, RegistrationOutcome::Dropped { reason });
        true
    }

    pub(crate) fn record_addition(&mut self) -> usize {
        self.additions += 1;
        self.additions
    }

    pub(crate) fn push_event(&mut self, image: ImageId, outcome: RegistrationOutcome) {
        self.events.push(RegistrationEvent { image, outcome });
    }

    pub fn summary(&self) -> ReconstructionSummary {
        let points = self.graph.len();
        let observations = self.graph.num_observations();
        ReconstructionSummary {
            num_images: self.placed.len() + self.unplaced.len() + self.dropped.len(),
            placed: self.placed.len(),
            dropped: self.dropped.len(),
            unplaced: self.unplaced.len(),
            points,
            observations,
            mean_track_length: if points == 0 {
                0.0
            } else {
                observations as Real / points as Real
            },
        }
    }

    /// Mean pixel reprojection error over every observation of every point.
    ///
    /// `None` when there is nothing to measure. Observations whose image has
    /// no pose or whose keypoint cannot be found are skipped.
    pub fn mean_reprojection_error(
        &self,
        store: &CorrespondenceStore,
        intrinsics: &FxFyCxCySkew<Real>,
    ) -> Option<Real> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for point in self.graph.iter() {
            for (&image, &kp) in point.observations() {
                let (Some(pose), Ok(px)) = (self.poses.get(&image), store.keypoint(image, kp))
                else {
                    continue;
                };
                let err = reprojection_error(intrinsics, pose, &point.position, &px.to_point());
                if err.is_finite() {
                    sum += err;
                    count += 1;
                }
            }
        }
        (count > 0).then(|| sum / count as Real)
    }
}
