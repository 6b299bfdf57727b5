//! Population configuration.

use serde::{Deserialize, Serialize};

use crate::cosmology::CosmologyParams;
use crate::enrich::ImageCountBounds;
use crate::error::{LensRateError, Result};
use crate::geometry::LensingCondition;
use crate::priors::{LensModelKind, LensPriorParams};
use crate::quota::DEFAULT_MAX_ROUNDS;

/// Plain values fixed when a population is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Lower edge of the source-redshift range.
    pub z_min: f64,
    /// Upper edge of the source-redshift range; `tau(z_max)` bounds the
    /// strongly-lensed redshift rejection.
    pub z_max: f64,
    /// Systems per accumulator round.
    pub round_size: usize,
    /// Round budget of every quota loop.
    pub max_rounds: usize,
    /// Extra accumulator rounds allowed when enrichment drops systems.
    pub max_topup_rounds: usize,
    /// Image multiplicity passed to the image solver.
    pub image_bounds: ImageCountBounds,
    pub lens_model: LensModelKind,
    pub lensing_condition: LensingCondition,
    /// Seed for `StdRng`; entropy-seeded when absent.
    pub seed: Option<u64>,
    pub lens_priors: LensPriorParams,
    pub cosmology: CosmologyParams,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            z_min: 0.0,
            z_max: 10.0,
            round_size: 50_000,
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_topup_rounds: 1_000,
            image_bounds: ImageCountBounds::default(),
            lens_model: LensModelKind::default(),
            lensing_condition: LensingCondition::default(),
            seed: None,
            lens_priors: LensPriorParams::default(),
            cosmology: CosmologyParams::default(),
        }
    }
}

impl PopulationConfig {
    /// Reject values no sampling stage can work with.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(LensRateError::InvalidConfig(msg));
        if !(self.z_min >= 0.0 && self.z_min < self.z_max && self.z_max.is_finite()) {
            return bad(format!("redshift range [{}, {}]", self.z_min, self.z_max));
        }
        if self.round_size == 0 {
            return bad("round_size must be positive".into());
        }
        if self.max_rounds == 0 {
            return bad("max_rounds must be positive".into());
        }
        if self.image_bounds.min == 0 || self.image_bounds.min > self.image_bounds.max {
            return bad(format!(
                "image bounds [{}, {}]",
                self.image_bounds.min, self.image_bounds.max
            ));
        }
        if !(self.cosmology.h0 > 0.0 && (0.0..=1.0).contains(&self.cosmology.omega_m)) {
            return bad(format!("cosmology {:?}", self.cosmology));
        }
        let p = &self.lens_priors;
        if !(0.0 < p.q_min && p.q_min < p.q_max && p.q_max <= 1.0) {
            return bad(format!("axis ratio range [{}, {}]", p.q_min, p.q_max));
        }
        if !(p.velocity_dispersion.vd_min < p.velocity_dispersion.vd_max) {
            return bad(format!(
                "velocity dispersion range [{}, {}]",
                p.velocity_dispersion.vd_min, p.velocity_dispersion.vd_max
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        PopulationConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_empty_redshift_range() {
        let config = PopulationConfig {
            z_min: 2.0,
            z_max: 2.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LensRateError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_zero_round_size() {
        let config = PopulationConfig {
            round_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PopulationConfig =
            serde_json::from_str(r#"{"z_max": 5.0, "lensing_condition": "cross_section", "seed": 7}"#)
                .unwrap();
        assert_eq!(config.z_max, 5.0);
        assert_eq!(config.lensing_condition, LensingCondition::CrossSection);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.round_size, PopulationConfig::default().round_size);
    }
}
