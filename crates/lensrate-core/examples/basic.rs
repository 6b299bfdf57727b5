//! Basic rate estimate example.
//!
//! Draws unlensed and lensed samples from a toy source population, scores
//! them with a distance-scaled SNR and prints both rates.
//!
//! Run: `cargo run --example basic`

use std::sync::Arc;

use lensrate_core::{
    PopulationConfig, RatePopulation, RecordBatch, SelectionSpec,
    SnrCalculator, SourcePopulation, fields,
};
use rand::{Rng, RngCore};

/// Mergers uniform in redshift on [0.1, 5] with a constant rate density.
struct ToyPopulation;

impl SourcePopulation for ToyPopulation {
    fn name(&self) -> &str {
        "toy"
    }

    fn sample_redshifts(&self, rng: &mut dyn RngCore, size: usize) -> lensrate_core::Result<Vec<f64>> {
        Ok((0..size).map(|_| 0.1 + 4.9 * rng.random::<f64>()).collect())
    }

    fn sample_parameters(
        &self,
        rng: &mut dyn RngCore,
        size: usize,
        fixed_redshifts: Option<&[f64]>,
    ) -> lensrate_core::Result<RecordBatch> {
        let zs = match fixed_redshifts {
            Some(z) => z.to_vec(),
            None => self.sample_redshifts(rng, size)?,
        };
        RecordBatch::from_columns([(fields::ZS, zs)])
    }

    fn merger_rate_density(&self, _z: f64) -> Option<f64> {
        Some(2.4e-8)
    }
}

/// SNR falling as `1 / (1 + z)`.
struct DistanceSnr;

impl SnrCalculator for DistanceSnr {
    fn evaluate(&self, batch: RecordBatch) -> lensrate_core::Result<RecordBatch> {
        let snr = batch.scalar(fields::ZS)?.mapv(|z| 25.0 / (1.0 + z));
        batch.with_column(fields::SNR_NET, snr)
    }
}

fn main() -> lensrate_core::Result<()> {
    env_logger::init();

    let config = PopulationConfig {
        z_max: 5.0,
        round_size: 10_000,
        seed: Some(1),
        ..PopulationConfig::default()
    };
    let mut population = RatePopulation::builder(config, Arc::new(ToyPopulation))
        .snr_calculator(Arc::new(DistanceSnr))
        .build()?;

    let (unlensed_c0, lensed_c0) = population.normalization();
    println!("C0: {:.4e} unlensed, {:.4e} lensed /yr", unlensed_c0.value(), lensed_c0.value());

    population.unlensed_statistics(20_000)?;
    population.lensed_statistics(5_000)?;

    let spec = SelectionSpec::single(8.0)?;
    let cmp = population.rate_comparison(&spec)?;
    println!("Unlensed rate: {:.4e} ± {:.1e} /yr", cmp.unlensed.step, cmp.unlensed.step_error);
    println!("Lensed rate:   {:.4e} ± {:.1e} /yr", cmp.lensed.step, cmp.lensed.step_error);
    println!("Ratio (step):  {:.1}", cmp.ratio_step);
    println!("Ratio (pdet):  {:.1}", cmp.ratio_pdet);
    Ok(())
}
