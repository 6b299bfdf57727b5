//! Integration tests for lensrate-core.
//!
//! These tests drive the full rate pipeline:
//! source population → lensed system sampling → enrichment → detection → rates.

use std::sync::Arc;

use lensrate_core::quota::accept_under_bound;
use lensrate_core::{
    Cosmology, CosmologyParams, FlatLambdaCdm, ImageCountBounds, ImageSolver, LensedSystemPipeline,
    MissingValuePolicy, NormalizationConstant, PopulationConfig, QuotaRejectionSampler,
    RatePopulation, RecordBatch, SampleKind, SelectionSpec, SisOpticalDepth, SnrCalculator,
    SourcePopulation, fields, persist,
};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Sources uniform in redshift with a chirp-mass-like field.
struct UniformSource;

impl SourcePopulation for UniformSource {
    fn name(&self) -> &str {
        "uniform"
    }

    fn sample_redshifts(&self, rng: &mut dyn RngCore, size: usize) -> lensrate_core::Result<Vec<f64>> {
        Ok((0..size).map(|_| 0.05 + 2.95 * rng.random::<f64>()).collect())
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
        let m1: Vec<f64> = (0..size).map(|_| 5.0 + 45.0 * rng.random::<f64>()).collect();
        let mc: Vec<f64> = m1.iter().map(|m| 0.8 * m).collect();
        RecordBatch::from_columns([
            (fields::ZS, zs),
            (fields::MASS_1, m1.clone()),
            (fields::MASS_2, m1),
            ("chirp_mass", mc),
        ])
    }
}

/// Two images for every lens; a double with magnifications 3 and 1.
struct DoubleImages;

impl ImageSolver for DoubleImages {
    fn solve(&self, batch: RecordBatch, bounds: ImageCountBounds) -> lensrate_core::Result<RecordBatch> {
        assert!(bounds.contains(2));
        let n = batch.len();
        let mut mu = Array2::from_elem((n, 4), f64::NAN);
        for i in 0..n {
            mu[[i, 0]] = 3.0;
            mu[[i, 1]] = 1.0;
        }
        batch.with_column("magnifications", mu)
    }
}

/// Per-image SNR `20 sqrt(mu) / (1 + zs)`; scalar `20 / (1 + zs)` without images.
struct MagnifiedSnr;

impl SnrCalculator for MagnifiedSnr {
    fn evaluate(&self, batch: RecordBatch) -> lensrate_core::Result<RecordBatch> {
        let zs = batch.scalar(fields::ZS)?.to_owned();
        let mu = batch.matrix("magnifications").ok().cloned();
        match mu {
            Some(mu) => {
                let mut snr = mu.mapv(f64::sqrt);
                for (mut row, z) in snr.rows_mut().into_iter().zip(zs.iter()) {
                    row.mapv_inplace(|s| 20.0 * s / (1.0 + z));
                }
                batch.with_column(fields::SNR_NET, snr)
            }
            None => {
                let snr = zs.mapv(|z| 20.0 / (1.0 + z));
                batch.with_column(fields::SNR_NET, snr)
            }
        }
    }
}

fn config(seed: u64) -> PopulationConfig {
    PopulationConfig {
        z_max: 3.0,
        round_size: 250,
        seed: Some(seed),
        ..PopulationConfig::default()
    }
}

fn population(seed: u64) -> RatePopulation {
    RatePopulation::builder(config(seed), Arc::new(UniformSource))
        .image_solver(Arc::new(DoubleImages))
        .snr_calculator(Arc::new(MagnifiedSnr))
        .normalization(
            NormalizationConstant::new(500.0).unwrap(),
            NormalizationConstant::new(2.0).unwrap(),
        )
        .build()
        .unwrap()
}

fn pipeline() -> LensedSystemPipeline {
    let config = config(1);
    let cosmology: Arc<dyn Cosmology> =
        Arc::new(FlatLambdaCdm::new(CosmologyParams::default(), config.z_max));
    let priors = config
        .lens_model
        .priors(&config.lens_priors, Arc::clone(&cosmology), config.max_rounds)
        .unwrap();
    LensedSystemPipeline::new(
        &config,
        Arc::clone(&cosmology),
        Arc::new(UniformSource),
        Arc::new(SisOpticalDepth::new(cosmology)),
        priors,
    )
    .unwrap()
}

#[test]
fn quota_sampler_reproduces_triangular_density() {
    init_logging();
    let mut rng = StdRng::seed_from_u64(2024);
    let sampler = QuotaRejectionSampler::new("triangular", 1000);
    let batch = sampler
        .run(
            &mut rng,
            4000,
            |rng, n| {
                let x: Vec<f64> = (0..n).map(|_| rng.random::<f64>()).collect();
                RecordBatch::from_columns([("x", x)])
            },
            |rng, batch| {
                let x = batch.scalar("x")?.to_vec();
                accept_under_bound(rng, &x, 1.0, "triangular")
            },
        )
        .unwrap();
    assert_eq!(batch.len(), 4000);

    let x = batch.scalar("x").unwrap().to_vec();
    let ks = lensrate_diagnostics::ks_one_sample(&x, |v| (v * v).clamp(0.0, 1.0));
    assert!(ks.p_value.unwrap() > 1e-4, "{ks:?}");
    let mean = x.iter().sum::<f64>() / x.len() as f64;
    assert!((mean - 2.0 / 3.0).abs() < 0.02, "mean = {mean}");
}

#[test]
fn lensed_systems_satisfy_lensing_condition() {
    init_logging();
    let pipeline = pipeline();
    let mut rng = StdRng::seed_from_u64(9);
    let lensed = pipeline.sample(&mut rng, 300).unwrap();
    assert_eq!(lensed.len(), 300);

    let zl = lensed.scalar(fields::ZL).unwrap();
    let zs = lensed.scalar(fields::ZS).unwrap();
    assert!(zl.iter().zip(zs.iter()).all(|(l, s)| l < s));
    let q = lensed.scalar(fields::Q).unwrap();
    assert!(q.iter().all(|q| (0.2..=1.0).contains(q)));
    assert!(lensed.scalar(fields::THETA_E).unwrap().iter().all(|t| *t > 0.0));
    for name in [fields::PHI, fields::E1, fields::E2, fields::GAMMA1, fields::GAMMA2, fields::GAMMA] {
        assert!(lensed.has_field(name), "missing {name}");
    }
    assert!(lensed.has_field("chirp_mass"));
    assert!(!lensed.has_field(fields::MASS_1));
    assert!(!lensed.has_field(fields::MASS_2));
}

#[test]
fn lensed_source_redshifts_lean_high() {
    init_logging();
    let pipeline = pipeline();
    let mut rng = StdRng::seed_from_u64(11);
    let lensed = pipeline.sample(&mut rng, 500).unwrap();
    let zs = lensed.scalar(fields::ZS).unwrap().to_vec();

    let mut rng = StdRng::seed_from_u64(12);
    let intrinsic = UniformSource.sample_redshifts(&mut rng, 500).unwrap();
    let ks = lensrate_diagnostics::ks_two_sample(&zs, &intrinsic);
    assert!(!ks.passed, "optical depth weighting should shift zs: {ks:?}");

    let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
    assert!(mean(&zs) > mean(&intrinsic));
}

#[test]
fn empty_draw_keeps_schema() {
    let pipeline = pipeline();
    let mut rng = StdRng::seed_from_u64(3);
    let empty = pipeline.sample(&mut rng, 0).unwrap();
    let full = pipeline.sample(&mut rng, 5).unwrap();
    assert!(empty.is_empty());
    let a: Vec<&str> = empty.field_names().collect();
    let b: Vec<&str> = full.field_names().collect();
    assert_eq!(a, b);
}

#[test]
fn end_to_end_rates() {
    init_logging();
    let mut pop = population(42);
    pop.unlensed_statistics(1000).unwrap();
    let lensed = pop.lensed_statistics(400).unwrap();
    assert_eq!(lensed.len(), 400);
    assert_eq!(lensed.matrix(fields::SNR_NET).unwrap().ncols(), 4);

    let spec = SelectionSpec::new([(8.0, 1), (8.0, 1)]).unwrap();
    let cmp = pop.rate_comparison(&spec).unwrap();
    assert!(cmp.unlensed.step > 0.0 && cmp.unlensed.step <= 500.0);
    assert!(cmp.lensed.step > 0.0 && cmp.lensed.step <= 2.0);
    assert!(cmp.lensed.pdet <= 2.0);
    assert!(cmp.ratio_step > 1.0);

    // Second image: 20 / (1 + zs) > 8 iff zs < 1.5, first image always brighter.
    let det = pop
        .select_detectable(SampleKind::Lensed, &spec, MissingValuePolicy::Zero)
        .unwrap();
    let zs = det.scalar(fields::ZS).unwrap();
    assert!(zs.iter().all(|z| *z < 1.5));
    let snr = det.matrix(fields::SNR_NET).unwrap();
    assert!(snr.iter().all(|s| s.is_finite()));
    assert_eq!(det.len(), cmp.lensed.detected);
}

#[test]
fn seeded_populations_are_reproducible() {
    let mut a = population(7);
    let mut b = population(7);
    let la = a.lensed_statistics(50).unwrap().clone();
    let lb = b.lensed_statistics(50).unwrap().clone();
    // Image columns hold NaN, so compare the lens and source fields.
    for name in [fields::ZS, fields::ZL, fields::SIGMA, fields::Q, fields::THETA_E] {
        assert_eq!(la.scalar(name).unwrap(), lb.scalar(name).unwrap(), "{name}");
    }

    let mut c = population(8);
    let lc = c.lensed_statistics(50).unwrap();
    assert_ne!(la.scalar(fields::ZS).unwrap(), lc.scalar(fields::ZS).unwrap());
}

#[test]
fn stored_sample_roundtrip() {
    let mut pop = population(5);
    let unlensed = pop.unlensed_statistics(200).unwrap().clone();
    let before = pop.unlensed_rate(8.0).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("unlensed.json");
    persist::write_json(&path, &unlensed).unwrap();
    let loaded: RecordBatch = persist::read_json(&path).unwrap();

    let mut fresh = population(6);
    fresh.set_sample(SampleKind::Unlensed, loaded);
    let after = fresh.unlensed_rate(8.0).unwrap();
    assert_eq!(before.detected, after.detected);
    assert!((before.step - after.step).abs() < 1e-9);
}
