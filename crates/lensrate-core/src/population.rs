//! Top-level driver: owns every collaborator and the stored samples, and
//! produces unlensed and lensed detectable rates.

use std::sync::Arc;

use log::info;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::accumulate::BatchAccumulator;
use crate::batch::{RecordBatch, append};
use crate::config::PopulationConfig;
use crate::cosmology::{Cosmology, FlatLambdaCdm};
use crate::detection::{DetectionSelector, ImageTypeWindow, MissingValuePolicy, SelectionSpec};
use crate::enrich::{ImageSolver, SnrCalculator};
use crate::error::{LensRateError, Result};
use crate::fields;
use crate::normalization::NormalizationConstant;
use crate::optical_depth::{OpticalDepth, SisOpticalDepth};
use crate::pipeline::LensedSystemPipeline;
use crate::priors::LensPriors;
use crate::rate::{RateComparison, RateEstimate, RateEstimator};
use crate::source::SourcePopulation;

/// Simpson intervals used when integrating the normalization constants.
const NORMALIZATION_INTERVALS: usize = 512;

/// Which stored sample an operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Unlensed,
    Lensed,
}

impl std::fmt::Display for SampleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unlensed => write!(f, "unlensed"),
            Self::Lensed => write!(f, "lensed"),
        }
    }
}

/// Collects collaborators for a [`RatePopulation`].
pub struct RatePopulationBuilder {
    config: PopulationConfig,
    source: Arc<dyn SourcePopulation>,
    cosmology: Option<Arc<dyn Cosmology>>,
    optical_depth: Option<Arc<dyn OpticalDepth>>,
    priors: Option<LensPriors>,
    image_solver: Option<Arc<dyn ImageSolver>>,
    snr: Option<Arc<dyn SnrCalculator>>,
    unlensed_c0: Option<NormalizationConstant>,
    lensed_c0: Option<NormalizationConstant>,
    window: ImageTypeWindow,
}

impl RatePopulationBuilder {
    /// Defaults to a flat ΛCDM cosmology from the config.
    pub fn cosmology(mut self, cosmology: Arc<dyn Cosmology>) -> Self {
        self.cosmology = Some(cosmology);
        self
    }

    /// Defaults to the SIS optical depth.
    pub fn optical_depth(mut self, optical_depth: Arc<dyn OpticalDepth>) -> Self {
        self.optical_depth = Some(optical_depth);
        self
    }

    /// Defaults to the priors of the configured lens model.
    pub fn priors(mut self, priors: LensPriors) -> Self {
        self.priors = Some(priors);
        self
    }

    pub fn image_solver(mut self, solver: Arc<dyn ImageSolver>) -> Self {
        self.image_solver = Some(solver);
        self
    }

    pub fn snr_calculator(mut self, snr: Arc<dyn SnrCalculator>) -> Self {
        self.snr = Some(snr);
        self
    }

    /// Overrides the constants integrated from the source's merger-rate
    /// density. Required when the source does not provide one.
    pub fn normalization(mut self, unlensed: NormalizationConstant, lensed: NormalizationConstant) -> Self {
        self.unlensed_c0 = Some(unlensed);
        self.lensed_c0 = Some(lensed);
        self
    }

    pub fn image_window(mut self, window: ImageTypeWindow) -> Self {
        self.window = window;
        self
    }

    pub fn build(self) -> Result<RatePopulation> {
        let config = self.config;
        config.validate()?;

        let cosmology = self.cosmology.unwrap_or_else(|| {
            Arc::new(FlatLambdaCdm::new(config.cosmology, config.z_max)) as Arc<dyn Cosmology>
        });
        let optical_depth = self
            .optical_depth
            .unwrap_or_else(|| {
                Arc::new(SisOpticalDepth::new(Arc::clone(&cosmology))) as Arc<dyn OpticalDepth>
            });
        let unlensed_c0 = match self.unlensed_c0 {
            Some(c0) => c0,
            None => integrated_rate(self.source.as_ref(), cosmology.as_ref(), None, &config)?,
        };
        let lensed_c0 = match self.lensed_c0 {
            Some(c0) => c0,
            None => integrated_rate(
                self.source.as_ref(),
                cosmology.as_ref(),
                Some(optical_depth.as_ref()),
                &config,
            )?,
        };
        info!(
            "normalization: unlensed {:.4e}, lensed {:.4e} per year",
            unlensed_c0.value(),
            lensed_c0.value()
        );
        let priors = match self.priors {
            Some(priors) => priors,
            None => config.lens_model.priors(
                &config.lens_priors,
                Arc::clone(&cosmology),
                config.max_rounds,
            )?,
        };
        let pipeline = LensedSystemPipeline::new(
            &config,
            Arc::clone(&cosmology),
            Arc::clone(&self.source),
            optical_depth,
            priors,
        )?;

        let mut unlensed_acc = BatchAccumulator::new(config.round_size, config.max_topup_rounds)?;
        let mut lensed_acc = unlensed_acc.clone();
        if let Some(solver) = self.image_solver {
            lensed_acc = lensed_acc.with_image_solver(solver, config.image_bounds);
        }
        if let Some(snr) = self.snr {
            unlensed_acc = unlensed_acc.with_snr_calculator(Arc::clone(&snr));
            lensed_acc = lensed_acc.with_snr_calculator(snr);
        }

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        info!(
            "population '{}': {} lenses, {} condition, z in [{}, {}]",
            self.source.name(),
            config.lens_model,
            config.lensing_condition,
            config.z_min,
            config.z_max
        );

        Ok(RatePopulation {
            config,
            cosmology,
            source: self.source,
            pipeline,
            unlensed_acc,
            lensed_acc,
            unlensed_rates: RateEstimator::new(unlensed_c0),
            lensed_rates: RateEstimator::new(lensed_c0),
            window: self.window,
            rng,
            unlensed: None,
            lensed: None,
        })
    }
}

/// `∫ R(z) / (1 + z) · dVc/dz [· τ(z)] dz` over the configured redshift range.
fn integrated_rate(
    source: &dyn SourcePopulation,
    cosmology: &dyn Cosmology,
    optical_depth: Option<&dyn OpticalDepth>,
    config: &PopulationConfig,
) -> Result<NormalizationConstant> {
    if source.merger_rate_density(config.z_min).is_none() {
        return Err(LensRateError::InvalidConfig(format!(
            "source population '{}' has no merger-rate density; pass both normalization constants",
            source.name()
        )));
    }
    let density = |z: f64| {
        let rate = source.merger_rate_density(z).unwrap_or(f64::NAN);
        let tau = optical_depth.map_or(1.0, |od| od.tau(&[z]).first().copied().unwrap_or(f64::NAN));
        rate / (1.0 + z) * cosmology.differential_comoving_volume(z) * tau
    };
    NormalizationConstant::integrate(density, config.z_min, config.z_max, NORMALIZATION_INTERVALS)
}

/// Unlensed and lensed samples of one source population and their rates.
pub struct RatePopulation {
    config: PopulationConfig,
    cosmology: Arc<dyn Cosmology>,
    source: Arc<dyn SourcePopulation>,
    pipeline: LensedSystemPipeline,
    unlensed_acc: BatchAccumulator,
    lensed_acc: BatchAccumulator,
    unlensed_rates: RateEstimator,
    lensed_rates: RateEstimator,
    window: ImageTypeWindow,
    rng: StdRng,
    unlensed: Option<RecordBatch>,
    lensed: Option<RecordBatch>,
}

impl RatePopulation {
    pub fn builder(config: PopulationConfig, source: Arc<dyn SourcePopulation>) -> RatePopulationBuilder {
        RatePopulationBuilder {
            config,
            source,
            cosmology: None,
            optical_depth: None,
            priors: None,
            image_solver: None,
            snr: None,
            unlensed_c0: None,
            lensed_c0: None,
            window: ImageTypeWindow::Any,
        }
    }

    pub fn config(&self) -> &PopulationConfig {
        &self.config
    }

    pub fn cosmology(&self) -> &Arc<dyn Cosmology> {
        &self.cosmology
    }

    /// Unlensed and lensed normalization constants in use.
    pub fn normalization(&self) -> (NormalizationConstant, NormalizationConstant) {
        (self.unlensed_rates.normalization(), self.lensed_rates.normalization())
    }

    /// Stored sample, if one was drawn or loaded.
    pub fn sample(&self, kind: SampleKind) -> Option<&RecordBatch> {
        match kind {
            SampleKind::Unlensed => self.unlensed.as_ref(),
            SampleKind::Lensed => self.lensed.as_ref(),
        }
    }

    /// Replace the stored sample, e.g. with one read from disk.
    pub fn set_sample(&mut self, kind: SampleKind, batch: RecordBatch) {
        match kind {
            SampleKind::Unlensed => self.unlensed = Some(batch),
            SampleKind::Lensed => self.lensed = Some(batch),
        }
    }

    /// Draw and store `size` enriched unlensed systems.
    pub fn unlensed_statistics(&mut self, size: usize) -> Result<&RecordBatch> {
        let batch = self.draw(SampleKind::Unlensed, size)?;
        Ok(self.unlensed.insert(batch))
    }

    /// Draw and store `size` enriched lensed systems.
    pub fn lensed_statistics(&mut self, size: usize) -> Result<&RecordBatch> {
        let batch = self.draw(SampleKind::Lensed, size)?;
        Ok(self.lensed.insert(batch))
    }

    fn draw(&mut self, kind: SampleKind, size: usize) -> Result<RecordBatch> {
        info!("drawing {size} {kind} systems");
        let rng = &mut self.rng;
        match kind {
            SampleKind::Unlensed => {
                let source = &self.source;
                self.unlensed_acc
                    .run(rng, size, |rng, n| source.sample_parameters(rng, n, None))
            }
            SampleKind::Lensed => {
                let pipeline = &self.pipeline;
                self.lensed_acc.run(rng, size, |rng, n| pipeline.sample(rng, n))
            }
        }
    }

    fn stored(&self, kind: SampleKind) -> Result<&RecordBatch> {
        self.sample(kind).ok_or_else(|| {
            LensRateError::InvalidConfig(format!("no {kind} sample has been drawn or loaded"))
        })
    }

    fn selector(&self, kind: SampleKind, spec: &SelectionSpec) -> Result<DetectionSelector> {
        Ok(match kind {
            SampleKind::Unlensed => DetectionSelector::new(SelectionSpec::single(spec.max_threshold())?),
            SampleKind::Lensed => DetectionSelector::new(spec.clone()).with_window(self.window),
        })
    }

    /// Unlensed rate: one image above `threshold`.
    pub fn unlensed_rate(&self, threshold: f64) -> Result<RateEstimate> {
        let batch = self.stored(SampleKind::Unlensed)?;
        let selector = DetectionSelector::new(SelectionSpec::single(threshold)?);
        let detection = selector.evaluate(batch, fields::SNR_NET)?;
        self.unlensed_rates.estimate(&detection, None)
    }

    /// Lensed rate under a multi-image selection, weighted by the sample's
    /// importance weights when present.
    pub fn lensed_rate(&self, spec: &SelectionSpec) -> Result<RateEstimate> {
        let batch = self.stored(SampleKind::Lensed)?;
        let detection = self
            .selector(SampleKind::Lensed, spec)?
            .evaluate(batch, fields::SNR_NET)?;
        let weights = if batch.has_field(fields::WEIGHTS) {
            Some(batch.scalar(fields::WEIGHTS)?.to_vec())
        } else {
            None
        };
        self.lensed_rates.estimate(&detection, weights.as_deref())
    }

    /// Both rates and their ratio. The unlensed rate uses the strictest
    /// threshold of `spec`.
    pub fn rate_comparison(&self, spec: &SelectionSpec) -> Result<RateComparison> {
        let unlensed = self.unlensed_rate(spec.max_threshold())?;
        let lensed = self.lensed_rate(spec)?;
        let cmp = RateComparison::new(unlensed, lensed);
        info!(
            "unlensed/lensed rate ratio: {:.2} (step) {:.2} (pdet)",
            cmp.ratio_step, cmp.ratio_pdet
        );
        Ok(cmp)
    }

    /// Detectable systems of the stored sample.
    pub fn select_detectable(
        &self,
        kind: SampleKind,
        spec: &SelectionSpec,
        policy: MissingValuePolicy,
    ) -> Result<RecordBatch> {
        let batch = self.stored(kind)?;
        self.selector(kind, spec)?.select(batch, fields::SNR_NET, policy)
    }

    /// Exactly `size` detectable systems drawn fresh, one accumulator round
    /// at a time. Bounded by the configured `max_rounds`.
    pub fn sample_detectable(
        &mut self,
        kind: SampleKind,
        size: usize,
        spec: &SelectionSpec,
        policy: MissingValuePolicy,
    ) -> Result<RecordBatch> {
        let selector = self.selector(kind, spec)?;
        let round_size = self.config.round_size;
        let mut acc: Option<RecordBatch> = None;
        for round in 1..=self.config.max_rounds {
            let batch = self.draw(kind, round_size)?;
            let detected = selector.select(&batch, fields::SNR_NET, policy)?;
            let collected = append(acc.take(), detected)?;
            info!(
                "detectable {kind} round {round}: {}/{size} collected",
                collected.len()
            );
            if collected.len() >= size {
                return collected.trim(size);
            }
            acc = Some(collected);
        }
        Err(LensRateError::NonConvergence {
            stage: "detectable event collection",
            rounds: self.config.max_rounds,
            accepted: acc.map_or(0, |b| b.len()),
            target: size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, RngCore};

    /// SNR falls with redshift.
    struct RedshiftSnr;

    impl SnrCalculator for RedshiftSnr {
        fn evaluate(&self, batch: RecordBatch) -> Result<RecordBatch> {
            let zs = batch.scalar(fields::ZS)?.to_vec();
            let snr: Vec<f64> = zs.iter().map(|z| 20.0 / (1.0 + z)).collect();
            batch.with_column(fields::SNR_NET, snr)
        }
    }

    struct UniformSource;

    impl SourcePopulation for UniformSource {
        fn name(&self) -> &str {
            "uniform"
        }
        fn sample_redshifts(&self, rng: &mut dyn RngCore, size: usize) -> Result<Vec<f64>> {
            Ok((0..size).map(|_| 0.01 + 2.99 * rng.random::<f64>()).collect())
        }
        fn sample_parameters(
            &self,
            rng: &mut dyn RngCore,
            size: usize,
            fixed_redshifts: Option<&[f64]>,
        ) -> Result<RecordBatch> {
            let zs = match fixed_redshifts {
                Some(z) => z.to_vec(),
                None => self.sample_redshifts(rng, size)?,
            };
            RecordBatch::from_columns([(fields::ZS, zs)])
        }
    }

    /// Constant merger-rate density.
    struct RatedSource;

    impl SourcePopulation for RatedSource {
        fn name(&self) -> &str {
            "rated"
        }
        fn sample_redshifts(&self, rng: &mut dyn RngCore, size: usize) -> Result<Vec<f64>> {
            UniformSource.sample_redshifts(rng, size)
        }
        fn sample_parameters(
            &self,
            rng: &mut dyn RngCore,
            size: usize,
            fixed_redshifts: Option<&[f64]>,
        ) -> Result<RecordBatch> {
            UniformSource.sample_parameters(rng, size, fixed_redshifts)
        }
        fn merger_rate_density(&self, _z: f64) -> Option<f64> {
            Some(1e-8)
        }
    }

    fn population() -> RatePopulation {
        let config = PopulationConfig {
            z_max: 3.0,
            round_size: 200,
            seed: Some(42),
            ..PopulationConfig::default()
        };
        RatePopulation::builder(config, Arc::new(UniformSource))
            .snr_calculator(Arc::new(RedshiftSnr))
            .normalization(
                NormalizationConstant::new(1000.0).unwrap(),
                NormalizationConstant::new(1.0).unwrap(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_requires_normalization() {
        let err = RatePopulation::builder(PopulationConfig::default(), Arc::new(UniformSource))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, LensRateError::InvalidConfig(_)));
    }

    #[test]
    fn test_normalization_integrated_from_merger_rate_density() {
        let config = PopulationConfig {
            z_max: 3.0,
            ..PopulationConfig::default()
        };
        let pop = RatePopulation::builder(config.clone(), Arc::new(RatedSource))
            .build()
            .unwrap();
        let (unlensed, lensed) = pop.normalization();

        let cosmology = FlatLambdaCdm::new(config.cosmology, config.z_max);
        let tau = SisOpticalDepth::new(Arc::new(cosmology.clone()));
        let density = |z: f64| 1e-8 / (1.0 + z) * cosmology.differential_comoving_volume(z);
        let expected_unlensed = NormalizationConstant::integrate(density, 0.0, 3.0, 512).unwrap();
        let expected_lensed =
            NormalizationConstant::integrate(|z| density(z) * tau.tau(&[z])[0], 0.0, 3.0, 512)
                .unwrap();
        approx::assert_relative_eq!(unlensed.value(), expected_unlensed.value(), max_relative = 1e-12);
        approx::assert_relative_eq!(lensed.value(), expected_lensed.value(), max_relative = 1e-12);
        assert!(lensed.value() > 0.0 && lensed.value() < 1e-2 * unlensed.value());
    }

    #[test]
    fn test_explicit_normalization_overrides_density() {
        let pop = RatePopulation::builder(PopulationConfig::default(), Arc::new(RatedSource))
            .normalization(
                NormalizationConstant::new(10.0).unwrap(),
                NormalizationConstant::new(0.5).unwrap(),
            )
            .build()
            .unwrap();
        let (unlensed, lensed) = pop.normalization();
        assert_eq!(unlensed.value(), 10.0);
        assert_eq!(lensed.value(), 0.5);
    }

    #[test]
    fn test_unlensed_rate_from_stored_sample() {
        let mut pop = population();
        assert!(pop.unlensed_rate(8.0).is_err());
        assert_eq!(pop.unlensed_statistics(500).unwrap().len(), 500);
        let rate = pop.unlensed_rate(8.0).unwrap();
        // snr > 8 iff zs < 1.5: about half of U[0.01, 3].
        assert!(rate.step > 400.0 && rate.step < 600.0, "rate = {}", rate.step);
        assert!(rate.pdet > 0.0);
    }

    #[test]
    fn test_lensed_statistics_exact_size() {
        let mut pop = population();
        let lensed = pop.lensed_statistics(50).unwrap();
        assert_eq!(lensed.len(), 50);
        assert!(lensed.has_field(fields::SNR_NET));
        assert!(lensed.has_field(fields::THETA_E));
    }

    #[test]
    fn test_sample_detectable_exact_and_all_detected() {
        let mut pop = population();
        let spec = SelectionSpec::single(8.0).unwrap();
        let det = pop
            .sample_detectable(SampleKind::Unlensed, 300, &spec, MissingValuePolicy::Keep)
            .unwrap();
        assert_eq!(det.len(), 300);
        assert!(det.scalar(fields::SNR_NET).unwrap().iter().all(|s| *s > 8.0));
        assert!(det.has_field(fields::PDET_NET));
    }

    #[test]
    fn test_select_detectable_from_stored() {
        let mut pop = population();
        pop.unlensed_statistics(400).unwrap();
        let spec = SelectionSpec::new([(8.0, 1), (5.0, 1)]).unwrap();
        let det = pop
            .select_detectable(SampleKind::Unlensed, &spec, MissingValuePolicy::Zero)
            .unwrap();
        assert!(det.len() < 400);
        assert!(det.scalar(fields::SNR_NET).unwrap().iter().all(|s| *s > 8.0));
    }
}
