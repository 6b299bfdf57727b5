use lensrate_core::quota::accept_under_bound;
use lensrate_core::{DEFAULT_MAX_ROUNDS, QuotaRejectionSampler, RecordBatch};
use lensrate_diagnostics::CheckResult;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

const FIELD: &str = "x";

/// Uniform candidates on [0, 1) accepted with probability `x` have density
/// `2x`, CDF `x²`. Returns the KS check and the per-round acceptance summary.
pub fn triangular_checks(rng: &mut dyn RngCore, samples: usize) -> lensrate_core::Result<Vec<CheckResult>> {
    let sampler = QuotaRejectionSampler::new("triangular selftest", DEFAULT_MAX_ROUNDS);
    let mut rounds: Vec<(usize, usize)> = Vec::new();
    let batch = sampler.run(
        rng,
        samples,
        |rng, n| {
            let x: Vec<f64> = (0..n).map(|_| rng.random::<f64>()).collect();
            RecordBatch::from_columns([(FIELD, x)])
        },
        |rng, batch| {
            let x = batch.scalar(FIELD)?.to_vec();
            let mask = accept_under_bound(rng, &x, 1.0, "triangular selftest")?;
            rounds.push((mask.iter().filter(|&&m| m).count(), mask.len()));
            Ok(mask)
        },
    )?;

    let x = batch.scalar(FIELD)?.to_vec();
    Ok(vec![
        lensrate_diagnostics::ks_one_sample(&x, |v| (v * v).clamp(0.0, 1.0)),
        lensrate_diagnostics::acceptance_summary(&rounds),
    ])
}

pub fn run(samples: usize, seed: Option<u64>) {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    println!("🔬 Quota sampler selftest: {samples} samples, triangular target\n");
    let results = match triangular_checks(&mut rng, samples) {
        Ok(results) => results,
        Err(e) => {
            eprintln!("Selftest failed to sample: {e}");
            std::process::exit(1);
        }
    };

    println!("{:<34} {:>6} {:>10} {:>10}", "Check", "Grade", "p-value", "Statistic");
    println!("{}", "-".repeat(64));
    for r in &results {
        let pval = r
            .p_value
            .map(|p| format!("{p:.4}"))
            .unwrap_or_else(|| "—".to_string());
        println!(
            "{:<34} {:>6} {:>10} {:>10.4}",
            r.name, r.grade, pval, r.statistic
        );
        println!("    {}", r.details);
    }
    let score = lensrate_diagnostics::quality_score(&results);
    println!("\nScore: {score:.0}/100");

    if results.iter().any(|r| !r.passed) {
        std::process::exit(1);
    }
}
