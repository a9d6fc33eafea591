//! Append-only point cloud with per-point observations.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sfm_core::Pt3;

use crate::correspondence::ImageId;

/// A reconstructed 3D point and the keypoints that observe it.
///
/// A point always has at least two observations, each from a different
/// image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PointRecord")]
pub struct ScenePoint {
    pub position: Pt3,
    /// Averaged RGB color of the source pixels, when both were available.
    pub color: Option<[u8; 3]>,
    observations: BTreeMap<ImageId, usize>,
}

#[derive(Deserialize)]
struct PointRecord {
    position: Pt3,
    color: Option<[u8; 3]>,
    observations: BTreeMap<ImageId, usize>,
}

impl TryFrom<PointRecord> for ScenePoint {
    type Error = String;

    fn try_from(record: PointRecord) -> Result<Self, Self::Error> {
        let n = record.observations.len();
        if n < 2 {
            return Err(format!("scene point needs two observations, got {n}"));
        }
        Ok(Self {
            position: record.position,
            color: record.color,
            observations: record.observations,
        })
    }
}

impl ScenePoint {
    /// Create a point seen by keypoint `a.1` of image `a.0` and `b.1` of `b.0`.
    ///
    /// Returns `None` when both observations come from the same image.
    pub fn from_pair(
        position: Pt3,
        color: Option<[u8; 3]>,
        a: (ImageId, usize),
        b: (ImageId, usize),
    ) -> Option<Self> {
        if a.0 == b.0 {
            return None;
        }
        Some(Self {
            position,
            color,
            observations: BTreeMap::from([a, b]),
        })
    }

    /// Image id → keypoint index.
    pub fn observations(&self) -> &BTreeMap<ImageId, usize> {
        &self.observations
    }

    /// Keypoint index through which `image` observes the point.
    pub fn observation(&self, image: ImageId) -> Option<usize> {
        self.observations.get(&image).copied()
    }

    pub fn track_length(&self) -> usize {
        self.observations.len()
    }
}

/// The evolving point cloud.
///
/// Points are never removed or merged; indices returned by
/// [`ObservationGraph::push`] stay valid for the lifetime of the graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationGraph {
    points: Vec<ScenePoint>,
}

impl ObservationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point and return its index.
    pub fn push(&mut self, point: ScenePoint) -> usize {
        self.points.push(point);
        self.points.len() - 1
    }

    /// Record that `image` sees point `point` through keypoint `keypoint`.
    ///
    /// Returns `false` (and changes nothing) when the point does not exist or
    /// already has an observation from `image`.
    pub fn add_observation(&mut self, point: usize, image: ImageId, keypoint: usize) -> bool {
        let Some(p) = self.points.get_mut(point) else {
            return false;
        };
        if p.observations.contains_key(&image) {
            return false;
        }
        p.observations.insert(image, keypoint);
        true
    }

    /// Move a point, e.g. after external refinement.
    pub fn set_position(&mut self, point: usize, position: Pt3) -> bool {
        match self.points.get_mut(point) {
            Some(p) => {
                p.position = position;
                true
            }
            None => false,
        }
    }

    /// Keypoint indices of `image` that already observe some point.
    pub fn observed_keypoints(&self, image: ImageId) -> BTreeSet<usize> {
        self.points
            .iter()
            .filter_map(|p| p.observation(image))
            .collect()
    }

    pub fn get(&self, point: usize) -> Option<&ScenePoint> {
        self.points.get(point)
    }

    pub fn points(&self) -> &[ScenePoint] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScenePoint> + '_ {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Total number of observations over all points.
    pub fn num_observations(&self) -> usize {
        self.points.iter().map(ScenePoint::track_length).sum()
    }
}
