use thiserror::Error;

use crate::correspondence::ImageId;

/// Errors raised by the incremental reconstruction.
///
/// Baseline and initialization errors abort a run. Errors raised while
/// registering a single image are recovered by the growth loop and counted
/// against that image.
#[derive(Debug, Error)]
pub enum SfmError {
    /// No image pair has enough geometrically consistent matches.
    #[error("no image pair qualifies as a baseline")]
    NoValidBaseline,
    /// Two-view estimation produced too few inliers.
    #[error("insufficient inliers: found {found}, need at least {required}")]
    InsufficientInliers { found: usize, required: usize },
    /// Too few triangulated points passed the depth check.
    #[error("insufficient triangulation: {valid} valid points, need at least {required}")]
    InsufficientTriangulation { valid: usize, required: usize },
    /// Not enough matches to register an image.
    #[error("image {image}: {found} usable correspondences, need at least {required}")]
    InsufficientCorrespondences {
        image: ImageId,
        found: usize,
        required: usize,
    },
    /// Robust PnP failed or returned too few inliers.
    #[error("image {image}: PnP failed: {reason}")]
    PnpFailure { image: ImageId, reason: String },
    /// No placed image can serve as a triangulation neighbor.
    #[error("image {image}: no usable placed neighbor")]
    NoMatchingNeighbor { image: ImageId },
    #[error("unknown image {image}")]
    UnknownImage { image: ImageId },
    #[error("image {image}: keypoint index {index} out of bounds ({len} keypoints)")]
    KeypointOutOfBounds {
        image: ImageId,
        index: usize,
        len: usize,
    },
    #[error("image {image} has no pose")]
    MissingPose { image: ImageId },
    #[error("image {image} is not waiting for registration")]
    ImageNotUnplaced { image: ImageId },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SfmError {
    /// Image the error refers to, if any.
    pub fn image(&self) -> Option<ImageId> {
        match *self {
            SfmError::InsufficientCorrespondences { image, .. }
            | SfmError::PnpFailure { image, .. }
            | SfmError::NoMatchingNeighbor { image }
            | SfmError::UnknownImage { image }
            | SfmError::KeypointOutOfBounds { image, .. }
            | SfmError::MissingPose { image }
            | SfmError::ImageNotUnplaced { image } => Some(image),
            SfmError::NoValidBaseline
            | SfmError::InsufficientInliers { .. }
            | SfmError::InsufficientTriangulation { .. }
            | SfmError::InvalidConfig(_) => None,
        }
    }
}

pub type Result<T, E = SfmError> = std::result::Result<T, E>;
