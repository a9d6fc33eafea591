//! Closed-form geometric solvers used by incremental reconstruction.
//!
//! - [`epipolar`]: normalized 8-point essential matrix, its robust RANSAC
//!   wrapper, decomposition into `(R, t)` candidates and cheirality-based
//!   pose recovery.
//! - [`pnp`]: P3P minimal solver, EPnP and a RANSAC wrapper combining both.
//! - [`triangulation`]: linear DLT triangulation from projection matrices.
//!
//! Solvers return `anyhow::Result` and never panic on degenerate input.
//! Poses follow the `T_C_W` convention of `sfm-core`.

pub mod epipolar;
pub mod math;
pub mod pnp;
pub mod triangulation;

pub use epipolar::*;
pub use pnp::*;
pub use triangulation::*;
