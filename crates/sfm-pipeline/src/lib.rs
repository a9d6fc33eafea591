//! Incremental structure-from-motion.
//!
//! Given per-image keypoints, pairwise matches and shared pinhole intrinsics,
//! the pipeline picks a baseline pair, initializes two poses and a point
//! cloud, then grows the reconstruction one image at a time with PnP (or a
//! triangulation fallback), retrying failed images up to a configured limit.
//!
//! # Example
//!
//! ```no_run
//! use sfm_pipeline::{
//!     CorrespondenceStore, ImageColors, IncrementalConfig, IncrementalSfm, NoRefinement,
//! };
//! # fn load() -> CorrespondenceStore { unimplemented!() }
//! let store = load();
//! let k = sfm_core::FxFyCxCySkew { fx: 800.0, fy: 800.0, cx: 640.0, cy: 360.0, skew: 0.0 };
//! let sfm = IncrementalSfm::new(IncrementalConfig::default(), store, k, ImageColors::default())?;
//! let state = sfm.run(&mut NoRefinement)?;
//! println!("{:?}", state.summary());
//! # Ok::<(), sfm_pipeline::SfmError>(())
//! ```
//!
//! # Conventions
//!
//! - Poses are `T_C_W` ([`sfm_core::Iso3`]) expressed in the frame of the
//!   first baseline camera, which is fixed at identity.
//! - Matches of a pair are stored under the canonical `(lo, hi)` key, with
//!   `query_idx` indexing `lo`'s keypoints and `train_idx` indexing `hi`'s.

mod baseline;
mod color;
mod config;
mod correspondence;
mod error;
mod graph;
mod pipeline;
mod registrar;
mod scoring;
mod state;
mod triangulator;
mod two_view;

pub use baseline::{initialize, select_baseline};
pub use color::{average_color, ImageColors};
pub use config::IncrementalConfig;
pub use correspondence::{CorrespondenceStore, ImageId, Keypoint, Match, PairKey};
pub use error::{Result, SfmError};
pub use graph::{ObservationGraph, ScenePoint};
pub use pipeline::{intrinsics_from_matrix, IncrementalSfm};
pub use registrar::{NoRefinement, Refiner, Registrar};
pub use scoring::{correspondence_score, pnp_correspondences, PnpCorrespondence};
pub use state::{
    PlacementMethod, ReconstructionState, ReconstructionSummary, RegistrationEvent,
    RegistrationOutcome,
};
pub use triangulator::Triangulator;
pub use two_view::{estimate_two_view, TwoViewGeometry};
