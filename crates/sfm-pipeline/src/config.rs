//! Thresholds and policy knobs of the incremental reconstruction.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sfm_core::{RansacOptions, Real};

use crate::error::{Result, SfmError};

/// Configuration of baseline selection, registration and triangulation.
///
/// Missing fields fall back to [`IncrementalConfig::default`] when
/// deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncrementalConfig {
    /// Raw matches and pose inliers a pair needs to be a baseline candidate.
    pub min_inliers_baseline: usize,
    /// Essential-matrix RANSAC threshold (pixels, Sampson distance).
    pub essential_ransac_threshold: Real,
    pub essential_ransac_confidence: Real,
    pub essential_ransac_iterations: usize,
    /// PnP RANSAC reprojection threshold (pixels).
    pub pnp_reprojection_threshold: Real,
    pub pnp_iterations: usize,
    pub pnp_confidence: Real,
    /// 2D-3D correspondences needed to attempt PnP, and score below which an
    /// image is dropped.
    pub min_pnp_correspondences: usize,
    /// Failed registrations after which an image is dropped.
    pub max_failed_attempts: usize,
    /// Invoke the refiner after every `bundle_every` grown images.
    pub bundle_every: usize,
    /// Inliers required by both masks when initializing from the baseline.
    pub min_initial_inliers: usize,
    pub min_pnp_inliers: usize,
    /// Triangulated points must have world `z` above this value.
    pub min_triangulation_depth: Real,
    pub min_triangulated_points: usize,
    /// Raw matches with a placed neighbor needed by the fallback path.
    pub min_fallback_matches: usize,
    /// Offset along the neighbor's camera x axis for the fallback pose.
    pub fallback_offset: Real,
    /// Seed for every RANSAC run.
    pub seed: u64,
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self {
            min_inliers_baseline: 100,
            essential_ransac_threshold: 1.0,
            essential_ransac_confidence: 0.999,
            essential_ransac_iterations: 1000,
            pnp_reprojection_threshold: 8.0,
            pnp_iterations: 100,
            pnp_confidence: 0.99,
            min_pnp_correspondences: 10,
            max_failed_attempts: 3,
            bundle_every: 5,
            min_initial_inliers: 15,
            min_pnp_inliers: 4,
            min_triangulation_depth: 0.1,
            min_triangulated_points: 2,
            min_fallback_matches: 8,
            fallback_offset: 0.1,
            seed: 1_234_567,
        }
    }
}

impl IncrementalConfig {
    /// Parse a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SfmError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SfmError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// Reject limits that would stall the growth loop and non-positive thresholds.
    pub fn validate(&self) -> Result<()> {
        let counts = [
            ("essential_ransac_iterations", self.essential_ransac_iterations),
            ("pnp_iterations", self.pnp_iterations),
            ("max_failed_attempts", self.max_failed_attempts),
            ("bundle_every", self.bundle_every),
            ("min_pnp_inliers", self.min_pnp_inliers),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, v)| *v == 0) {
            return Err(SfmError::InvalidConfig(format!("{name} must be positive")));
        }

        let thresholds = [
            ("essential_ransac_threshold", self.essential_ransac_threshold),
            ("pnp_reprojection_threshold", self.pnp_reprojection_threshold),
            ("min_triangulation_depth", self.min_triangulation_depth),
        ];
        if let Some((name, v)) = thresholds.iter().find(|(_, v)| !(v.is_finite() && *v > 0.0)) {
            return Err(SfmError::InvalidConfig(format!(
                "{name} must be positive and finite, got {v}"
            )));
        }

        for (name, c) in [
            ("essential_ransac_confidence", self.essential_ransac_confidence),
            ("pnp_confidence", self.pnp_confidence),
        ] {
            if !(c > 0.0 && c <= 1.0) {
                return Err(SfmError::InvalidConfig(format!(
                    "{name} must lie in (0, 1], got {c}"
                )));
            }
        }

        if !self.fallback_offset.is_finite() {
            return Err(SfmError::InvalidConfig("fallback_offset must be finite".into()));
        }
        Ok(())
    }

    /// RANSAC options for essential-matrix estimation.
    pub fn essential_ransac(&self) -> RansacOptions {
        RansacOptions {
            max_iters: self.essential_ransac_iterations,
            thresh: self.essential_ransac_threshold,
            min_inliers: 8,
            confidence: self.essential_ransac_confidence,
            seed: self.seed,
            refit_on_inliers: true,
        }
    }

    /// RANSAC options for robust PnP.
    pub fn pnp_ransac(&self) -> RansacOptions {
        RansacOptions {
            max_iters: self.pnp_iterations,
            thresh: self.pnp_reprojection_threshold,
            min_inliers: self.min_pnp_inliers,
            confidence: self.pnp_confidence,
            seed: self.seed,
            refit_on_inliers: true,
        }
    }
}
