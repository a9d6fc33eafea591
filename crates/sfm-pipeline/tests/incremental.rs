use std::collections::{BTreeMap, BTreeSet};

use image::{Rgb, RgbImage};
use sfm_core::synthetic::{
    camera_row, default_intrinsics, random_points, shared_matches, SyntheticScene, SyntheticView,
};
use sfm_core::{Pt3, Real};
use sfm_pipeline::{
    CorrespondenceStore, ImageColors, IncrementalConfig, IncrementalSfm, Keypoint, Match,
    NoRefinement, PairKey, PlacementMethod, ReconstructionState, RegistrationOutcome,
};

fn keypoints(view: &SyntheticView) -> Vec<Keypoint> {
    view.keypoints.iter().map(|&p| Keypoint::from(p)).collect()
}

fn matches(a: &SyntheticView, b: &SyntheticView) -> Vec<Match> {
    shared_matches(a, b)
        .into_iter()
        .map(|(q, t)| Match::new(q, t))
        .collect()
}

/// Five cameras on a row. Points 0..40 are seen by every image, points
/// 40..60 only by images 2, 3 and 4.
fn five_view_store() -> (SyntheticScene, CorrespondenceStore) {
    let scene = SyntheticScene::new(
        default_intrinsics(),
        camera_row(5, 0.4, 0.03),
        random_points(60, 42, 0.8, 1.0, 4.0, 8.0),
    );
    let views: Vec<SyntheticView> = (0..5)
        .map(|i| {
            let ids: Vec<usize> = if i < 2 { (0..40).collect() } else { (0..60).collect() };
            scene.render_view(i, &ids, 9).unwrap()
        })
        .collect();

    let mut pairs = BTreeMap::new();
    for a in 0..5 {
        for b in a + 1..5 {
            pairs.insert(PairKey::new(a, b).unwrap(), matches(&views[a], &views[b]));
        }
    }
    let store = CorrespondenceStore::new(views.iter().map(keypoints).collect(), pairs).unwrap();
    (scene, store)
}

fn five_view_config() -> IncrementalConfig {
    IncrementalConfig {
        min_inliers_baseline: 15,
        ..IncrementalConfig::default()
    }
}

fn assert_invariants(state: &ReconstructionState, store: &CorrespondenceStore, min_depth: Real) {
    let placed: BTreeSet<_> = state.placed().iter().copied().collect();
    let unplaced: BTreeSet<_> = state.unplaced().iter().copied().collect();
    assert!(placed.is_disjoint(&unplaced));
    assert_eq!(placed.len(), state.placed().len(), "image placed twice");

    for p in state.graph().iter() {
        assert!(p.track_length() >= 2);
        assert!(p.position.z > min_depth, "point depth {}", p.position.z);
        for (&image, &kp) in p.observations() {
            assert!(kp < store.keypoints(image).unwrap().len());
            assert!(placed.contains(&image));
        }
    }

    for image in 0..store.num_images() {
        let placements = state
            .events()
            .iter()
            .filter(|e| e.image == image)
            .filter(|e| matches!(e.outcome, RegistrationOutcome::Placed { .. }))
            .count();
        assert!(placements <= 1);
    }
}

#[test]
fn five_views_are_all_registered() {
    let (scene, store) = five_view_store();
    let config = five_view_config();
    let sfm = IncrementalSfm::new(
        config.clone(),
        store.clone(),
        scene.intrinsics,
        ImageColors::default(),
    )
    .unwrap();
    let state = sfm.run(&mut NoRefinement).unwrap();

    let summary = state.summary();
    assert_eq!(summary.placed, 5);
    assert_eq!(summary.dropped, 0);
    assert!(summary.points >= 60);
    assert_invariants(&state, &store, config.min_triangulation_depth);

    // Baseline is the first pair sharing all 60 points.
    assert_eq!(&state.placed()[..2], &[2, 3]);
    let methods: Vec<_> = state
        .events()
        .iter()
        .filter_map(|e| match e.outcome {
            RegistrationOutcome::Placed { method } => Some(method),
            _ => None,
        })
        .collect();
    assert_eq!(
        methods,
        vec![
            PlacementMethod::Baseline,
            PlacementMethod::Baseline,
            PlacementMethod::Pnp,
            PlacementMethod::Pnp,
            PlacementMethod::Pnp,
        ]
    );

    let err = state
        .mean_reprojection_error(&store, &scene.intrinsics)
        .unwrap();
    assert!(err < 1e-3, "mean reprojection error {err}");
}

#[test]
fn refiner_runs_every_bundle_interval() {
    let (scene, store) = five_view_store();
    for (bundle_every, expected) in [(1, 3), (2, 1), (5, 0)] {
        let config = IncrementalConfig {
            bundle_every,
            ..five_view_config()
        };
        let sfm =
            IncrementalSfm::new(config, store.clone(), scene.intrinsics, ImageColors::default())
                .unwrap();
        let mut calls = 0;
        let mut placed_at_call = Vec::new();
        let state = sfm
            .run(&mut |s: &mut ReconstructionState| {
                calls += 1;
                placed_at_call.push(s.placed().len());
            })
            .unwrap();
        assert_eq!(calls, expected, "bundle_every = {bundle_every}");
        assert_eq!(state.additions(), 3);
        let refined = state
            .events()
            .iter()
            .filter(|e| e.outcome == RegistrationOutcome::Refined)
            .count();
        assert_eq!(refined, expected);
        if bundle_every == 1 {
            assert_eq!(placed_at_call, vec![3, 4, 5]);
        }
    }
}

#[test]
fn refiner_edits_persist_in_the_result() {
    let (scene, store) = five_view_store();
    let config = IncrementalConfig {
        bundle_every: 3,
        ..five_view_config()
    };
    let sfm =
        IncrementalSfm::new(config, store, scene.intrinsics, ImageColors::default()).unwrap();
    let moved = Pt3::new(0.0, 0.0, 5.0);
    let state = sfm
        .run(&mut |s: &mut ReconstructionState| {
            assert!(s.graph_mut().set_position(0, moved));
            let past_end = s.graph().len();
            assert!(!s.graph_mut().set_position(past_end, moved));
        })
        .unwrap();
    assert_eq!(state.graph().get(0).unwrap().position, moved);
}

#[test]
fn repeated_runs_are_identical() {
    let (scene, store) = five_view_store();
    let sfm = IncrementalSfm::new(
        five_view_config(),
        store,
        scene.intrinsics,
        ImageColors::default(),
    )
    .unwrap();
    let a = sfm.run(&mut NoRefinement).unwrap();
    let b = sfm.run(&mut NoRefinement).unwrap();
    assert_eq!(a.placed(), b.placed());
    assert_eq!(a.graph().len(), b.graph().len());
    for (image, pa) in a.poses() {
        let pb = b.pose(*image).unwrap();
        assert!((pa.translation.vector - pb.translation.vector).norm() < 1e-12);
        assert!(pa.rotation.angle_to(&pb.rotation) < 1e-12);
    }
}

/// Two images share 20 matches of which two are swapped; a third image has
/// only five correspondences.
#[test]
fn weakly_connected_image_is_dropped() {
    let scene = SyntheticScene::new(
        default_intrinsics(),
        camera_row(3, 0.5, 0.02),
        random_points(20, 3, 0.5, 1.0, 4.0, 7.0),
    );
    let all: Vec<usize> = (0..20).collect();
    let v0 = scene.render_view(0, &all, 4).unwrap();
    let v1 = scene.render_view(1, &all, 4).unwrap();
    let v2 = scene.render_view(2, &all[..5], 4).unwrap();

    // Swap the train indices of the two matches furthest apart vertically.
    let mut m01 = matches(&v0, &v1);
    let y = |m: &Match| v1.keypoints[m.train_idx].y;
    let lo = (0..m01.len())
        .min_by(|&a, &b| y(&m01[a]).total_cmp(&y(&m01[b])))
        .unwrap();
    let hi = (0..m01.len())
        .max_by(|&a, &b| y(&m01[a]).total_cmp(&y(&m01[b])))
        .unwrap();
    let (ta, tb) = (m01[lo].train_idx, m01[hi].train_idx);
    m01[lo].train_idx = tb;
    m01[hi].train_idx = ta;

    let pairs = BTreeMap::from([
        (PairKey::new(0, 1).unwrap(), m01),
        (PairKey::new(0, 2).unwrap(), matches(&v0, &v2)),
        (PairKey::new(1, 2).unwrap(), matches(&v1, &v2)),
    ]);
    let store =
        CorrespondenceStore::new(vec![keypoints(&v0), keypoints(&v1), keypoints(&v2)], pairs)
            .unwrap();

    let colors = ImageColors::new(vec![
        Some(RgbImage::from_pixel(1280, 720, Rgb([10, 20, 30]))),
        Some(RgbImage::from_pixel(1280, 720, Rgb([21, 40, 61]))),
        None,
    ]);
    let config = IncrementalConfig {
        min_inliers_baseline: 15,
        min_pnp_correspondences: 10,
        ..IncrementalConfig::default()
    };
    let sfm = IncrementalSfm::new(config.clone(), store.clone(), scene.intrinsics, colors).unwrap();
    let state = sfm.run(&mut NoRefinement).unwrap();

    assert_eq!(state.placed(), &[0, 1]);
    assert_eq!(state.dropped(), &[2]);
    assert!(!state.is_placed(2));
    assert_eq!(state.graph().len(), 18);
    assert!(state
        .graph()
        .iter()
        .all(|p| p.color == Some([15, 30, 45])));
    assert_eq!(state.failures(2), 0);
    assert_invariants(&state, &store, config.min_triangulation_depth);
}

/// Image 2 links to 20 reconstructed points through raw matches, but its
/// keypoints are scrambled so no pose explains them.
#[test]
fn image_failing_pnp_is_dropped_after_max_attempts() {
    let scene = SyntheticScene::new(
        default_intrinsics(),
        camera_row(2, 0.5, 0.02),
        random_points(40, 8, 0.25, 1.0, 4.0, 7.0),
    );
    let all: Vec<usize> = (0..40).collect();
    let v0 = scene.render_view(0, &all, 6).unwrap();
    let v1 = scene.render_view(1, &all, 6).unwrap();
    let scrambled: Vec<Keypoint> = (0..20)
        .map(|i| Keypoint::new(((i * 379) % 1280) as Real, ((i * 211 + 50) % 720) as Real))
        .collect();

    let pairs = BTreeMap::from([
        (PairKey::new(0, 1).unwrap(), matches(&v0, &v1)),
        (
            PairKey::new(0, 2).unwrap(),
            (0..20).map(|i| Match::new(i, i)).collect(),
        ),
    ]);
    let store = CorrespondenceStore::new(vec![keypoints(&v0), keypoints(&v1), scrambled], pairs)
        .unwrap();

    let config = IncrementalConfig {
        min_inliers_baseline: 30,
        pnp_reprojection_threshold: 1e-6,
        max_failed_attempts: 3,
        ..IncrementalConfig::default()
    };
    let sfm = IncrementalSfm::new(
        config.clone(),
        store.clone(),
        scene.intrinsics,
        ImageColors::default(),
    )
    .unwrap();
    let state = sfm.run(&mut NoRefinement).unwrap();

    assert_eq!(state.placed(), &[0, 1]);
    assert_eq!(state.dropped(), &[2]);
    assert_eq!(state.failures(2), 3);

    let outcomes: Vec<_> = state
        .events()
        .iter()
        .filter(|e| e.image == 2)
        .map(|e| &e.outcome)
        .collect();
    assert_eq!(outcomes.len(), 4);
    for (i, outcome) in outcomes[..3].iter().enumerate() {
        match outcome {
            RegistrationOutcome::Failed { reason, attempts } => {
                assert_eq!(*attempts, i + 1);
                assert!(reason.contains("PnP"), "{reason}");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert!(matches!(outcomes[3], RegistrationOutcome::Dropped { .. }));
    assert_invariants(&state, &store, config.min_triangulation_depth);
}

#[test]
fn state_serializes_to_json() {
    let (scene, store) = five_view_store();
    let sfm = IncrementalSfm::new(
        five_view_config(),
        store,
        scene.intrinsics,
        ImageColors::default(),
    )
    .unwrap();
    let state = sfm.run(&mut NoRefinement).unwrap();
    let json = serde_json::to_string(&state).unwrap();
    let back: ReconstructionState = serde_json::from_str(&json).unwrap();
    assert_eq!(back.placed(), state.placed());
    assert_eq!(back.graph().len(), state.graph().len());
}
