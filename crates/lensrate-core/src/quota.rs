//! Quota-filling rejection sampling.
//!
//! The sampler draws a full `target`-sized candidate batch every round, keeps
//! the accepted rows, appends them to an accumulator and stops once at least
//! `target` rows are held. The accumulator is then truncated to exactly
//! `target` rows, so the result is the first `target` acceptances in draw
//! order. Every round draws the full target, not the remaining deficit.
//!
//! The loop is bounded by `max_rounds`; exhausting it yields
//! [`LensRateError::NonConvergence`].

use log::debug;
use rand::{Rng, RngCore};

use crate::batch::{AcceptanceMask, RecordBatch, append};
use crate::error::{LensRateError, Result};

/// Default round budget for every quota loop.
pub const DEFAULT_MAX_ROUNDS: usize = 10_000;

/// Acceptance rule applied to a whole candidate batch.
pub trait AcceptanceRule: Send + Sync {
    /// Return one keep/reject decision per row of `batch`.
    fn accept(&self, rng: &mut dyn RngCore, batch: &RecordBatch) -> Result<AcceptanceMask>;
}

/// Generic "sample, filter, top up, trim" loop.
#[derive(Debug, Clone, Copy)]
pub struct QuotaRejectionSampler {
    stage: &'static str,
    max_rounds: usize,
}

impl QuotaRejectionSampler {
    /// `stage` names the loop in logs and errors.
    pub fn new(stage: &'static str, max_rounds: usize) -> Self {
        Self {
            stage,
            max_rounds: max_rounds.max(1),
        }
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    /// Produce exactly `target` accepted rows.
    ///
    /// `draw(rng, n)` must return a candidate batch for any `n`; `accept`
    /// returns a mask with one entry per candidate row. A `target` of zero
    /// returns an empty batch carrying the generator's field set.
    pub fn run<G, A>(
        &self,
        rng: &mut dyn RngCore,
        target: usize,
        mut draw: G,
        mut accept: A,
    ) -> Result<RecordBatch>
    where
        G: FnMut(&mut dyn RngCore, usize) -> Result<RecordBatch>,
        A: FnMut(&mut dyn RngCore, &RecordBatch) -> Result<AcceptanceMask>,
    {
        if target == 0 {
            return draw(rng, 0)?.trim(0);
        }

        let mut acc: Option<RecordBatch> = None;
        for round in 1..=self.max_rounds {
            let candidates = draw(rng, target)?;
            if candidates.is_empty() {
                return Err(LensRateError::degenerate(
                    self.stage,
                    "candidate generator returned no rows",
                ));
            }
            let mask = accept(rng, &candidates)?;
            let accepted = candidates.filter(&mask)?;
            let batch = append(acc.take(), accepted)?;
            debug!(
                "{}: round {round} accepted {}/{target}",
                self.stage,
                batch.len()
            );
            if batch.len() >= target {
                return batch.trim(target);
            }
            acc = Some(batch);
        }

        Err(LensRateError::NonConvergence {
            stage: self.stage,
            rounds: self.max_rounds,
            accepted: acc.map_or(0, |b| b.len()),
            target,
        })
    }

    /// [`QuotaRejectionSampler::run`] with an [`AcceptanceRule`] object.
    pub fn run_with_rule<G>(
        &self,
        rng: &mut dyn RngCore,
        target: usize,
        draw: G,
        rule: &dyn AcceptanceRule,
    ) -> Result<RecordBatch>
    where
        G: FnMut(&mut dyn RngCore, usize) -> Result<RecordBatch>,
    {
        self.run(rng, target, draw, |rng, batch| rule.accept(rng, batch))
    }
}

/// Accept row `i` with probability `weights[i] / max(weights)`.
///
/// Draws `u ~ U[0, max)` per row and keeps the row iff `u < weights[i]`.
pub fn accept_by_weight(
    rng: &mut dyn RngCore,
    weights: &[f64],
    stage: &'static str,
) -> Result<AcceptanceMask> {
    if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return Err(LensRateError::degenerate(
            stage,
            format!("acceptance weight {bad} is not a finite non-negative number"),
        ));
    }
    let max = weights.iter().copied().fold(0.0_f64, f64::max);
    accept_under_bound(rng, weights, max, stage)
}

/// Accept row `i` iff `u_i < weights[i]` with `u_i ~ U[0, bound)`.
///
/// `bound` must be positive; a zero-width envelope is reported as
/// [`LensRateError::DegenerateDistribution`].
pub fn accept_under_bound(
    rng: &mut dyn RngCore,
    weights: &[f64],
    bound: f64,
    stage: &'static str,
) -> Result<AcceptanceMask> {
    if !bound.is_finite() || bound <= 0.0 {
        return Err(LensRateError::degenerate(
            stage,
            format!("acceptance envelope {bound} must be positive and finite"),
        ));
    }
    Ok(weights
        .iter()
        .map(|&w| rng.random::<f64>() * bound < w)
        .collect())
}
