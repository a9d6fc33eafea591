//! Two-view triangulation of matched keypoints into colored scene points.

use std::ops::Range;

use sfm_core::{FxFyCxCySkew, Iso3, Real};
use sfm_linear::{projection_matrix, triangulate_point_linear};

use crate::color::ImageColors;
use crate::config::IncrementalConfig;
use crate::correspondence::{CorrespondenceStore, ImageId};
use crate::error::{Result, SfmError};
use crate::graph::{ObservationGraph, ScenePoint};

/// Triangulates keypoint pairs between two posed images.
///
/// [`Triangulator::triangulate`] is pure; [`Triangulator::append`] commits
/// the result, so callers can validate before mutating the graph.
#[derive(Debug, Clone, Copy)]
pub struct Triangulator<'a> {
    store: &'a CorrespondenceStore,
    colors: &'a ImageColors,
    intrinsics: &'a FxFyCxCySkew<Real>,
    min_depth: Real,
    min_points: usize,
}

impl<'a> Triangulator<'a> {
    pub fn new(
        store: &'a CorrespondenceStore,
        colors: &'a ImageColors,
        intrinsics: &'a FxFyCxCySkew<Real>,
        config: &IncrementalConfig,
    ) -> Self {
        Self {
            store,
            colors,
            intrinsics,
            min_depth: config.min_triangulation_depth,
            min_points: config.min_triangulated_points,
        }
    }

    /// Triangulate `pairs` of `(keypoint in a, keypoint in b)`.
    ///
    /// Points whose world `z` does not exceed the minimum depth are
    /// discarded. Fails with [`SfmError::InsufficientTriangulation`] when
    /// fewer than the configured number of points survive.
    pub fn triangulate(
        &self,
        (a, pose_a): (ImageId, &Iso3),
        (b, pose_b): (ImageId, &Iso3),
        pairs: &[(usize, usize)],
    ) -> Result<Vec<ScenePoint>> {
        if a == b {
            return Err(SfmError::InsufficientTriangulation {
                valid: 0,
                required: self.min_points,
            });
        }
        let cameras = [
            projection_matrix(self.intrinsics, pose_a),
            projection_matrix(self.intrinsics, pose_b),
        ];

        let mut points = Vec::with_capacity(pairs.len());
        for &(ka, kb) in pairs {
            let kp_a = self.store.keypoint(a, ka)?;
            let kp_b = self.store.keypoint(b, kb)?;
            let Ok(position) =
                triangulate_point_linear(&cameras, &[kp_a.to_point(), kp_b.to_point()])
            else {
                continue;
            };
            if !position.coords.iter().all(|v| v.is_finite()) || position.z <= self.min_depth {
                continue;
            }
            let color = self.colors.point_color((a, &kp_a), (b, &kp_b));
            if let Some(point) = ScenePoint::from_pair(position, color, (a, ka), (b, kb)) {
                points.push(point);
            }
        }

        if points.len() < self.min_points {
            return Err(SfmError::InsufficientTriangulation {
                valid: points.len(),
                required: self.min_points,
            });
        }
        log::debug!(
            "triangulated {}/{} points between images {a} and {b}",
            points.len(),
            pairs.len()
        );
        Ok(points)
    }

    /// Append triangulated points; returns their index range in the graph.
    pub fn append(graph: &mut ObservationGraph, points: Vec<ScenePoint>) -> Range<usize> {
        let start = graph.len();
        for p in points {
            graph.push(p);
        }
        start..graph.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correspondence::{Keypoint, Match, PairKey};
    use image::{Rgb, RgbImage};
    use sfm_core::synthetic::{camera_row, default_intrinsics, SyntheticScene};
    use sfm_core::Pt3;
    use std::collections::BTreeMap;

    /// Two cameras; point 2 lies behind the world plane `z = 0.1`.
    fn setup() -> (SyntheticScene, CorrespondenceStore) {
        let scene = SyntheticScene::new(
            default_intrinsics(),
            vec![Iso3::identity(), camera_row(2, 0.5, 0.0)[1]],
            vec![
                Pt3::new(0.1, 0.2, 4.0),
                Pt3::new(-0.3, 0.1, 6.0),
                Pt3::new(0.2, -0.1, 0.05),
                Pt3::new(0.4, 0.3, 5.0),
            ],
        );
        let kps = |image: usize| -> Vec<Keypoint> {
            (0..4)
                .map(|i| {
                    let pc = scene.poses[image].transform_point(&scene.points[i]);
                    let uv = scene.intrinsics.normalized_to_pixel(&(pc.xy().coords / pc.z));
                    Keypoint::new(uv.x, uv.y)
                })
                .collect()
        };
        let matches: Vec<Match> = (0..4).map(|i| Match::new(i, i)).collect();
        let store = CorrespondenceStore::new(
            vec![kps(0), kps(1)],
            BTreeMap::from([(PairKey::new(0, 1).unwrap(), matches)]),
        )
        .unwrap();
        (scene, store)
    }

    #[test]
    fn keeps_points_above_min_depth_with_colors() {
        let (scene, store) = setup();
        let colors = ImageColors::new(vec![
            Some(RgbImage::from_pixel(1280, 720, Rgb([10, 20, 30]))),
            Some(RgbImage::from_pixel(1280, 720, Rgb([21, 40, 61]))),
        ]);
        let config = IncrementalConfig::default();
        let tri = Triangulator::new(&store, &colors, &scene.intrinsics, &config);
        let pairs: Vec<(usize, usize)> = (0..4).map(|i| (i, i)).collect();

        let points = tri
            .triangulate((0, &scene.poses[0]), (1, &scene.poses[1]), &pairs)
            .unwrap();
        assert_eq!(points.len(), 3);
        for p in &points {
            assert!(p.position.z > config.min_triangulation_depth);
            assert_eq!(p.track_length(), 2);
            let gt = scene.points[p.observation(0).unwrap()];
            assert!((p.position - gt).norm() < 1e-6);
        }
        // Survivors project inside both images.
        assert!(points.iter().all(|p| p.color == Some([15, 30, 45])));

        let mut graph = ObservationGraph::new();
        assert_eq!(Triangulator::append(&mut graph, points), 0..3);
    }

    #[test]
    fn too_few_valid_points_fails() {
        let (scene, store) = setup();
        let colors = ImageColors::default();
        let config = IncrementalConfig::default();
        let tri = Triangulator::new(&store, &colors, &scene.intrinsics, &config);

        let err = tri
            .triangulate((0, &scene.poses[0]), (1, &scene.poses[1]), &[(0, 0), (2, 2)])
            .unwrap_err();
        assert!(matches!(
            err,
            SfmError::InsufficientTriangulation {
                valid: 1,
                required: 2
            }
        ));
    }

    #[test]
    fn missing_images_leave_color_empty() {
        let (scene, store) = setup();
        let colors = ImageColors::default();
        let config = IncrementalConfig::default();
        let tri = Triangulator::new(&store, &colors, &scene.intrinsics, &config);
        let points = tri
            .triangulate((0, &scene.poses[0]), (1, &scene.poses[1]), &[(0, 0), (1, 1)])
            .unwrap();
        assert!(points.iter().all(|p| p.color.is_none()));
    }

    #[test]
    fn out_of_range_keypoint_is_reported() {
        let (scene, store) = setup();
        let colors = ImageColors::default();
        let config = IncrementalConfig::default();
        let tri = Triangulator::new(&store, &colors, &scene.intrinsics, &config);
        let err = tri
            .triangulate((0, &scene.poses[0]), (1, &scene.poses[1]), &[(0, 9)])
            .unwrap_err();
        assert!(matches!(err, SfmError::KeypointOutOfBounds { image: 1, .. }));
    }
}
