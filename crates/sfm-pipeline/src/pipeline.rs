//! End-to-end driver: baseline, initialization, growth.

use sfm_core::{FxFyCxCySkew, Mat3, Real};

use crate::baseline::{initialize, select_baseline};
use crate::color::ImageColors;
use crate::config::IncrementalConfig;
use crate::correspondence::CorrespondenceStore;
use crate::error::{Result, SfmError};
use crate::registrar::{Refiner, Registrar};
use crate::state::ReconstructionState;

/// Convert a 3×3 calibration matrix into pinhole intrinsics.
pub fn intrinsics_from_matrix(k: &Mat3) -> Result<FxFyCxCySkew<Real>> {
    FxFyCxCySkew::try_from_k_matrix(k).ok_or_else(|| {
        SfmError::InvalidConfig(format!(
            "intrinsic matrix must be upper triangular with positive focal lengths: {k}"
        ))
    })
}

/// One incremental reconstruction problem.
#[derive(Debug, Clone)]
pub struct IncrementalSfm {
    config: IncrementalConfig,
    store: CorrespondenceStore,
    intrinsics: FxFyCxCySkew<Real>,
    colors: ImageColors,
}

impl IncrementalSfm {
    pub fn new(
        config: IncrementalConfig,
        store: CorrespondenceStore,
        intrinsics: FxFyCxCySkew<Real>,
        colors: ImageColors,
    ) -> Result<Self> {
        config.validate()?;
        let FxFyCxCySkew {
            fx,
            fy,
            cx,
            cy,
            skew,
        } = intrinsics;
        if ![fx, fy, cx, cy, skew].iter().all(|v| v.is_finite()) || fx <= 0.0 || fy <= 0.0 {
            return Err(SfmError::InvalidConfig(format!(
                "invalid intrinsics: {intrinsics:?}"
            )));
        }
        if store.num_images() < 2 {
            return Err(SfmError::InvalidConfig(format!(
                "need at least two images, got {}",
                store.num_images()
            )));
        }
        Ok(Self {
            config,
            store,
            intrinsics,
            colors,
        })
    }

    pub fn config(&self) -> &IncrementalConfig {
        &self.config
    }

    pub fn store(&self) -> &CorrespondenceStore {
        &self.store
    }

    pub fn intrinsics(&self) -> &FxFyCxCySkew<Real> {
        &self.intrinsics
    }

    /// Run the whole reconstruction.
    ///
    /// Baseline selection and initialization errors are returned; failures
    /// of individual images during growth are recorded in the returned
    /// state's event log.
    pub fn run<R: Refiner + ?Sized>(&self, refiner: &mut R) -> Result<ReconstructionState> {
        let mut state = ReconstructionState::new(self.store.num_images());
        log::info!(
            "reconstructing {} images from {} matched pairs",
            self.store.num_images(),
            self.store.pairs().count()
        );

        let baseline = select_baseline(&self.store, &self.intrinsics, &self.config)?;
        initialize(
            &mut state,
            &self.store,
            &self.colors,
            &self.intrinsics,
            &self.config,
            baseline.pair,
        )?;

        Registrar::new(&self.store, &self.colors, &self.intrinsics, &self.config)?
            .grow(&mut state, refiner);

        if let Some(err) = state.mean_reprojection_error(&self.store, &self.intrinsics) {
            log::info!("mean reprojection error {err:.3} px");
        }
        Ok(state)
    }
}
