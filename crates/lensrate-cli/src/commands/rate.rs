use lensrate_core::{
    DetectionSelector, ImageTypeWindow, MissingValuePolicy, NormalizationConstant, RateEstimate,
    RateEstimator, RecordBatch, SelectionSpec, persist,
};
use lensrate_diagnostics::CheckResult;

pub struct RateCommandConfig<'a> {
    pub input_path: &'a str,
    pub requirements: &'a [(f64, usize)],
    pub c0: f64,
    pub field: &'a str,
    pub window: ImageTypeWindow,
    pub weights_field: Option<&'a str>,
    pub output_path: Option<&'a str>,
    pub zero_missing: bool,
}

pub fn run(cfg: RateCommandConfig<'_>) {
    let batch: RecordBatch = match persist::read_json(cfg.input_path) {
        Ok(batch) => batch,
        Err(e) => {
            eprintln!("Failed to read batch from {}: {e}", cfg.input_path);
            std::process::exit(1);
        }
    };

    log::info!("loaded {} systems from {}", batch.len(), cfg.input_path);
    let (estimate, detectable) = match evaluate(&batch, &cfg) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Rate evaluation failed: {e}");
            std::process::exit(1);
        }
    };

    let agreement = lensrate_diagnostics::rate_agreement(
        estimate.step,
        estimate.step_error,
        estimate.pdet,
        estimate.pdet_error,
    );
    print_summary(&cfg, &estimate, &agreement);

    if let Some(path) = cfg.output_path {
        match persist::write_json(path, &detectable) {
            Ok(()) => println!("\n📄 {} detectable systems saved to: {path}", detectable.len()),
            Err(e) => eprintln!("Failed to write detectable batch to {path}: {e}"),
        }
    }
}

/// Rate estimate and detectable sub-batch for one stored batch.
fn evaluate(
    batch: &RecordBatch,
    cfg: &RateCommandConfig<'_>,
) -> lensrate_core::Result<(RateEstimate, RecordBatch)> {
    let spec = SelectionSpec::new(cfg.requirements.iter().copied())?;
    let selector = DetectionSelector::new(spec).with_window(cfg.window);
    let detection = selector.evaluate(batch, cfg.field)?;
    let weights = match cfg.weights_field {
        Some(name) => Some(batch.scalar(name)?.to_vec()),
        None => None,
    };
    let estimator = RateEstimator::new(NormalizationConstant::new(cfg.c0)?);
    let estimate = estimator.estimate(&detection, weights.as_deref())?;
    let policy = if cfg.zero_missing {
        MissingValuePolicy::Zero
    } else {
        MissingValuePolicy::Keep
    };
    let detectable = selector.select(batch, cfg.field, policy)?;
    Ok((estimate, detectable))
}

fn print_summary(cfg: &RateCommandConfig<'_>, estimate: &RateEstimate, agreement: &CheckResult) {
    let spec: Vec<String> = cfg
        .requirements
        .iter()
        .map(|(t, n)| format!("{n}×>{t}"))
        .collect();
    println!("{}", "=".repeat(60));
    println!("  Input:      {}", cfg.input_path);
    println!("  Selection:  {} on '{}' ({:?} images)", spec.join(", "), cfg.field, cfg.window);
    println!("  C0:         {:.4e} per year", cfg.c0);
    println!(
        "  Detected:   {}/{} systems",
        estimate.detected, estimate.samples
    );
    println!("{}", "-".repeat(60));
    println!("{:<14} {:>14} {:>14}", "Convention", "Rate [1/yr]", "Std. error");
    println!("{:<14} {:>14.4e} {:>14.4e}", "step", estimate.step, estimate.step_error);
    println!("{:<14} {:>14.4e} {:>14.4e}", "pdet", estimate.pdet, estimate.pdet_error);
    println!("{}", "-".repeat(60));
    let ok = if agreement.passed { "✓" } else { "✗" };
    println!(
        "  {} {} [{}]: {}",
        ok, agreement.name, agreement.grade, agreement.details
    );
}
