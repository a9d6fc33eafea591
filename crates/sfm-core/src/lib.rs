//! Core math and geometry primitives for `sfm-rs`.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Pt2`, `Pt3`, `Mat34`, ...),
//! - pinhole camera intrinsics ([`FxFyCxCySkew`]),
//! - a generic RANSAC engine (`ransac_fit`, [`Estimator`]),
//! - deterministic synthetic scenes for tests ([`synthetic`]).
//!
//! Pose convention used across the workspace: an [`Iso3`] pose is `T_C_W`,
//! mapping world coordinates into the camera frame, so that
//! `pixel ~ K (R X + t)`.

/// Pinhole intrinsics.
pub mod intrinsics;
/// Linear algebra type aliases and helpers.
pub mod math;
/// Generic RANSAC engine and traits.
pub mod ransac;
/// Synthetic multi-view scenes with known ground truth.
pub mod synthetic;

pub use intrinsics::*;
pub use math::*;
pub use ransac::*;
