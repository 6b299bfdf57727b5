//! Round-based accumulation of large samples.
//!
//! A request for `N` systems is split into one leading round of
//! `N - k·round_size` systems followed by `k = ceil(N / round_size) - 1` full
//! rounds. Every round is sampled, enriched and only then concatenated, so
//! peak memory is bounded by one round plus the accumulated output.
//!
//! Enrichment may drop systems (an image solver discards systems outside the
//! image-count bounds). When that leaves the total short of `N`, extra
//! full-size rounds are drawn until it is met, bounded by
//! `max_topup_rounds`, and the result is trimmed to exactly `N`.

use std::sync::Arc;

use log::{info, warn};
use rand::RngCore;

use crate::batch::{RecordBatch, append};
use crate::enrich::{ImageCountBounds, ImageSolver, SnrCalculator, enrich};
use crate::error::{LensRateError, Result};

/// Splits a request into rounds and runs per-round enrichment.
#[derive(Clone)]
pub struct BatchAccumulator {
    round_size: usize,
    max_topup_rounds: usize,
    bounds: ImageCountBounds,
    solver: Option<Arc<dyn ImageSolver>>,
    snr: Option<Arc<dyn SnrCalculator>>,
}

impl BatchAccumulator {
    pub fn new(round_size: usize, max_topup_rounds: usize) -> Result<Self> {
        if round_size == 0 {
            return Err(LensRateError::InvalidConfig("round_size must be positive".into()));
        }
        Ok(Self {
            round_size,
            max_topup_rounds,
            bounds: ImageCountBounds::default(),
            solver: None,
            snr: None,
        })
    }

    pub fn with_image_solver(mut self, solver: Arc<dyn ImageSolver>, bounds: ImageCountBounds) -> Self {
        self.solver = Some(solver);
        self.bounds = bounds;
        self
    }

    pub fn with_snr_calculator(mut self, snr: Arc<dyn SnrCalculator>) -> Self {
        self.snr = Some(snr);
        self
    }

    pub fn round_size(&self) -> usize {
        self.round_size
    }

    /// Planned round sizes for `total` systems: the remainder first, then
    /// full rounds. Empty for `total == 0`.
    pub fn round_sizes(&self, total: usize) -> Vec<usize> {
        if total == 0 {
            return Vec::new();
        }
        let k = total.div_ceil(self.round_size) - 1;
        let leading = total - k * self.round_size;
        std::iter::once(leading)
            .chain(std::iter::repeat_n(self.round_size, k))
            .collect()
    }

    /// Exactly `total` enriched systems from repeated `draw(rng, size)` calls.
    pub fn run<G>(&self, rng: &mut dyn RngCore, total: usize, mut draw: G) -> Result<RecordBatch>
    where
        G: FnMut(&mut dyn RngCore, usize) -> Result<RecordBatch>,
    {
        if total == 0 {
            return self.enriched_round(rng, 0, &mut draw)?.trim(0);
        }

        let plan = self.round_sizes(total);
        let mut acc: Option<RecordBatch> = None;
        for (i, &size) in plan.iter().enumerate() {
            let round = self.enriched_round(rng, size, &mut draw)?;
            let batch = append(acc.take(), round)?;
            info!(
                "round {}/{}: {} systems accumulated of {total}",
                i + 1,
                plan.len(),
                batch.len()
            );
            acc = Some(batch);
        }

        let mut batch = acc.unwrap_or_default();
        if batch.len() < total {
            warn!(
                "enrichment kept {} of {total} systems; drawing extra rounds",
                batch.len()
            );
        }
        let mut topups = 0;
        while batch.len() < total {
            if topups == self.max_topup_rounds {
                return Err(LensRateError::NonConvergence {
                    stage: "batch accumulation",
                    rounds: topups,
                    accepted: batch.len(),
                    target: total,
                });
            }
            topups += 1;
            let round = self.enriched_round(rng, self.round_size, &mut draw)?;
            batch = batch.concat(&round)?;
            info!("top-up round {topups}: {} systems of {total}", batch.len());
        }
        batch.trim(total)
    }

    fn enriched_round<G>(&self, rng: &mut dyn RngCore, size: usize, draw: &mut G) -> Result<RecordBatch>
    where
        G: FnMut(&mut dyn RngCore, usize) -> Result<RecordBatch>,
    {
        let raw = draw(rng, size)?;
        if raw.len() != size {
            return Err(LensRateError::schema(format!(
                "round sampler returned {} rows for {size}",
                raw.len()
            )));
        }
        enrich(raw, self.solver.as_deref(), self.snr.as_deref(), self.bounds)
    }
}
