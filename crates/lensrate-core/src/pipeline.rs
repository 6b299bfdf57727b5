//! Lensed-system generation.
//!
//! A lensed system is a strongly lensed source redshift, a lens drawn between
//! observer and source, and the lens parameters needed by an image solver.
//! The composite draw is filtered by a [`LensingCondition`] inside a quota
//! loop, and only the accepted systems receive the remaining lens parameters
//! and their source parameters.

use std::sync::Arc;

use log::{debug, info};
use rand::RngCore;

use crate::batch::RecordBatch;
use crate::config::PopulationConfig;
use crate::cosmology::Cosmology;
use crate::error::{LensRateError, Result};
use crate::fields;
use crate::geometry::{LensingCondition, einstein_radii, phi_q_to_ellipticity};
use crate::optical_depth::{OpticalDepth, StrongLensingRedshiftSampler};
use crate::priors::LensPriors;
use crate::quota::{AcceptanceRule, QuotaRejectionSampler};
use crate::source::SourcePopulation;

/// Produces exactly `size` lensed-system records per call.
pub struct LensedSystemPipeline {
    cosmology: Arc<dyn Cosmology>,
    source: Arc<dyn SourcePopulation>,
    redshifts: StrongLensingRedshiftSampler,
    priors: LensPriors,
    condition: LensingCondition,
    quota: QuotaRejectionSampler,
    pass_lens_redshift: bool,
}

impl LensedSystemPipeline {
    pub fn new(
        config: &PopulationConfig,
        cosmology: Arc<dyn Cosmology>,
        source: Arc<dyn SourcePopulation>,
        optical_depth: Arc<dyn OpticalDepth>,
        priors: LensPriors,
    ) -> Result<Self> {
        config.validate()?;
        let redshifts = StrongLensingRedshiftSampler::new(
            Arc::clone(&source),
            optical_depth,
            config.z_min,
            config.z_max,
            config.max_rounds,
        )?;
        let pass_lens_redshift = priors.velocity_dispersion.requires_lens_redshift();
        debug!(
            "lensed pipeline for '{}': condition {}, velocity dispersion {} lens redshift",
            source.name(),
            config.lensing_condition,
            if pass_lens_redshift { "uses" } else { "ignores" }
        );
        Ok(Self {
            cosmology,
            source,
            redshifts,
            priors,
            condition: config.lensing_condition,
            quota: QuotaRejectionSampler::new("lensed system rejection", config.max_rounds),
            pass_lens_redshift,
        })
    }

    pub fn cosmology(&self) -> &Arc<dyn Cosmology> {
        &self.cosmology
    }

    pub fn condition(&self) -> LensingCondition {
        self.condition
    }

    /// Exactly `size` lensed systems with lens, shear and source fields.
    pub fn sample(&self, rng: &mut dyn RngCore, size: usize) -> Result<RecordBatch> {
        let mut lenses = self.quota.run(
            rng,
            size,
            |rng, n| self.draw_lens_candidates(rng, n),
            |rng, batch| self.condition.accept(rng, batch),
        )?;

        let phi = self.priors.axis_rotation_angle.sample(rng, size)?;
        let (gamma1, gamma2) = self.priors.shear.sample(rng, size)?;
        let gamma = self.priors.mass_density_spectral_index.sample(rng, size)?;
        let q = lenses.scalar(fields::Q)?;
        let (e1, e2): (Vec<f64>, Vec<f64>) = phi
            .iter()
            .zip(q.iter())
            .map(|(&phi, &q)| phi_q_to_ellipticity(phi, q))
            .unzip();
        for (name, values) in [
            (fields::PHI, phi),
            (fields::E1, e1),
            (fields::E2, e2),
            (fields::GAMMA1, gamma1),
            (fields::GAMMA2, gamma2),
            (fields::GAMMA, gamma),
        ] {
            lenses.insert(name, values)?;
        }

        let zs = lenses.scalar(fields::ZS)?.to_vec();
        let source = self.source.sample_parameters(rng, size, Some(&zs))?;
        if let Ok(returned) = source.scalar(fields::ZS) {
            if returned.iter().zip(&zs).any(|(a, b)| a != b) {
                return Err(LensRateError::schema(format!(
                    "source population '{}' did not keep the fixed source redshifts",
                    self.source.name()
                )));
            }
        }
        lenses.merge(source)?;
        lenses.remove(fields::MASS_1);
        lenses.remove(fields::MASS_2);

        info!("sampled {} lensed systems", lenses.len());
        Ok(lenses)
    }

    /// One composite candidate draw: `zs`, `zl`, `sigma`, `q`, `theta_E`.
    fn draw_lens_candidates(&self, rng: &mut dyn RngCore, n: usize) -> Result<RecordBatch> {
        let zs = self.redshifts.sample(rng, n)?;
        let zl = self.priors.lens_redshift.sample(rng, &zs)?;
        let sigma = self.priors.velocity_dispersion.sample(
            rng,
            n,
            self.pass_lens_redshift.then_some(zl.as_slice()),
        )?;
        if zl.len() != n || sigma.len() != n {
            return Err(LensRateError::schema(format!(
                "lens samplers returned {} redshifts and {} dispersions for {n} sources",
                zl.len(),
                sigma.len()
            )));
        }
        let q = self.priors.axis_ratio.sample(rng, &sigma)?;
        let theta_e = einstein_radii(self.cosmology.as_ref(), &sigma, &zl, &zs)?;
        RecordBatch::from_columns([
            (fields::ZL, zl),
            (fields::ZS, zs),
            (fields::SIGMA, sigma),
            (fields::Q, q),
            (fields::THETA_E, theta_e),
        ])
    }
}
