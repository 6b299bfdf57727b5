//! Strong-lensing optical depth and the source-redshift sampler conditioned
//! on strong lensing.

use std::sync::Arc;

use rand::RngCore;

use crate::batch::RecordBatch;
use crate::cosmology::Cosmology;
use crate::error::{LensRateError, Result};
use crate::fields;
use crate::quota::{QuotaRejectionSampler, accept_under_bound};
use crate::source::SourcePopulation;

/// Probability that a source at each redshift is strongly lensed.
///
/// Implementations must be monotone non-decreasing over the sampled redshift
/// range; [`StrongLensingRedshiftSampler`] relies on `tau(z_max)` being the
/// supremum.
pub trait OpticalDepth: Send + Sync {
    fn tau(&self, z: &[f64]) -> Vec<f64>;
}

/// Singular-isothermal-sphere optical depth `τ(z) = (Dc(z) / 62.2 Gpc)³`.
#[derive(Clone)]
pub struct SisOpticalDepth {
    cosmology: Arc<dyn Cosmology>,
}

impl SisOpticalDepth {
    /// Comoving-distance scale of the SIS optical depth, in Gpc.
    pub const SCALE_GPC: f64 = 62.2;

    pub fn new(cosmology: Arc<dyn Cosmology>) -> Self {
        Self { cosmology }
    }
}

impl OpticalDepth for SisOpticalDepth {
    fn tau(&self, z: &[f64]) -> Vec<f64> {
        z.iter()
            .map(|&z| {
                let dc_gpc = self.cosmology.comoving_distance(z) * 1e-3;
                (dc_gpc / Self::SCALE_GPC).powi(3)
            })
            .collect()
    }
}

/// Number of grid points used to check the monotonicity precondition.
const MONOTONICITY_GRID: usize = 256;

/// Draws source redshifts conditioned on the source being strongly lensed.
pub struct StrongLensingRedshiftSampler {
    source: Arc<dyn SourcePopulation>,
    optical_depth: Arc<dyn OpticalDepth>,
    z_max: f64,
    tau_max: f64,
    quota: QuotaRejectionSampler,
}

impl StrongLensingRedshiftSampler {
    /// Fixes `tau_max = tau(z_max)` and verifies on a grid over
    /// `[z_min, z_max]` that no optical depth exceeds it or decreases.
    pub fn new(
        source: Arc<dyn SourcePopulation>,
        optical_depth: Arc<dyn OpticalDepth>,
        z_min: f64,
        z_max: f64,
        max_rounds: usize,
    ) -> Result<Self> {
        if !(z_min < z_max) {
            return Err(LensRateError::InvalidConfig(format!(
                "redshift range [{z_min}, {z_max}] is empty"
            )));
        }
        let tau_max = optical_depth.tau(&[z_max]).first().copied().unwrap_or(f64::NAN);
        if !tau_max.is_finite() || tau_max <= 0.0 {
            return Err(LensRateError::degenerate(
                "strongly lensed redshift sampling",
                format!("tau(z_max = {z_max}) = {tau_max}"),
            ));
        }

        let grid: Vec<f64> = (0..MONOTONICITY_GRID)
            .map(|i| z_min + (z_max - z_min) * i as f64 / (MONOTONICITY_GRID - 1) as f64)
            .collect();
        let taus = optical_depth.tau(&grid);
        for (i, (&z, &tau)) in grid.iter().zip(&taus).enumerate() {
            let decreasing = i > 0 && tau < taus[i - 1];
            if tau > tau_max || decreasing {
                return Err(LensRateError::NonMonotoneOpticalDepth { z, tau, tau_max });
            }
        }

        Ok(Self {
            source,
            optical_depth,
            z_max,
            tau_max,
            quota: QuotaRejectionSampler::new("strongly lensed redshift sampling", max_rounds),
        })
    }

    /// Supremum of the optical depth used as the rejection envelope.
    pub fn tau_max(&self) -> f64 {
        self.tau_max
    }

    pub fn z_max(&self) -> f64 {
        self.z_max
    }

    /// Exactly `size` redshifts, in acceptance order.
    pub fn sample(&self, rng: &mut dyn RngCore, size: usize) -> Result<Vec<f64>> {
        let accepted = self.quota.run(
            rng,
            size,
            |rng, n| {
                let zs = self.source.sample_redshifts(rng, n)?;
                RecordBatch::from_columns([(fields::ZS, zs)])
            },
            |rng, batch| {
                let zs = batch.scalar(fields::ZS)?.to_vec();
                let tau = self.optical_depth.tau(&zs);
                if let Some((&z, &t)) = zs.iter().zip(&tau).find(|(_, t)| **t > self.tau_max) {
                    return Err(LensRateError::NonMonotoneOpticalDepth {
                        z,
                        tau: t,
                        tau_max: self.tau_max,
                    });
                }
                accept_under_bound(rng, &tau, self.tau_max, "strongly lensed redshift sampling")
            },
        )?;
        Ok(accepted.scalar(fields::ZS)?.to_vec())
    }
}
