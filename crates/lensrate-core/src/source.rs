//! Source population collaborator.
//!
//! The compact-binary source population (merger-rate density, mass and spin
//! priors, sky position, ...) lives outside this crate. It is consumed through
//! [`SourcePopulation`], which lensed pipelines call twice per batch: once for
//! unconditional redshift candidates and once for the remaining parameters
//! with the redshifts held fixed.

use rand::RngCore;

use crate::batch::RecordBatch;
use crate::error::Result;

/// Unconditional compact-binary source population.
pub trait SourcePopulation: Send + Sync {
    /// Short identifier used in logs (e.g. `"bbh"`).
    fn name(&self) -> &str;

    /// Draw `size` source redshifts from the population's redshift
    /// distribution.
    fn sample_redshifts(&self, rng: &mut dyn RngCore, size: usize) -> Result<Vec<f64>>;

    /// Draw `size` full parameter records.
    ///
    /// When `fixed_redshifts` is given it has exactly `size` entries and the
    /// returned batch must carry them unchanged in its `zs` field, so lensed
    /// systems share their redshift with their source-parameter draw.
    fn sample_parameters(
        &self,
        rng: &mut dyn RngCore,
        size: usize,
        fixed_redshifts: Option<&[f64]>,
    ) -> Result<RecordBatch>;

    /// Source-frame merger-rate density `R(z)` per Mpc³ per year.
    ///
    /// Populations that provide it let [`RatePopulation`] integrate both
    /// normalization constants itself. `None` means the constants must be
    /// supplied by the caller.
    ///
    /// [`RatePopulation`]: crate::RatePopulation
    fn merger_rate_density(&self, _z: f64) -> Option<f64> {
        None
    }
}
