//! Lens geometry: Einstein radii, cross-section weighting and the
//! geometric rejection rules built on them.

use std::f64::consts::PI;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::batch::{AcceptanceMask, RecordBatch};
use crate::cosmology::Cosmology;
use crate::error::{LensRateError, Result};
use crate::fields;
use crate::quota::{AcceptanceRule, accept_by_weight};

/// Speed of light in km/s.
pub const SPEED_OF_LIGHT_KM_S: f64 = 299_792.458;

/// `theta_E = 4π (σ/c)² D_LS / D_S` in radians, σ in km/s.
pub fn einstein_radii(
    cosmology: &dyn Cosmology,
    sigma: &[f64],
    zl: &[f64],
    zs: &[f64],
) -> Result<Vec<f64>> {
    if sigma.len() != zl.len() || zl.len() != zs.len() {
        return Err(LensRateError::schema(format!(
            "einstein radius inputs have lengths {}, {}, {}",
            sigma.len(),
            zl.len(),
            zs.len()
        )));
    }
    let d_s = cosmology.angular_diameter_distance(zs);
    let d_ls = cosmology.angular_diameter_distance_z1z2(zl, zs);
    Ok(sigma
        .iter()
        .zip(d_ls.iter().zip(&d_s))
        .map(|(&s, (&dls, &ds))| {
            let v = s / SPEED_OF_LIGHT_KM_S;
            4.0 * PI * v * v * dls / ds
        })
        .collect())
}

/// Cut-curve correction of an SIE lens cross section relative to the
/// circular case. Continuous at `q = 1` where it equals `π`.
pub fn phi_cut_sie(q: f64) -> f64 {
    if q > 0.01 && q < 0.99 {
        2.0 * PI * q * q.ln() / (q * q - 1.0)
    } else if (0.99..1.01).contains(&q) {
        PI
    } else {
        0.0
    }
}

/// Axis rotation angle and axis ratio to ellipticity components.
pub fn phi_q_to_ellipticity(phi: f64, q: f64) -> (f64, f64) {
    let e = (1.0 - q) / (1.0 + q);
    ((2.0 * phi).cos() * e, (2.0 * phi).sin() * e)
}

/// Strong-lensing acceptance condition applied after the lens draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LensingCondition {
    /// Weight `theta_E²` (circularly symmetric cross section).
    #[default]
    EinsteinRadius,
    /// Weight `theta_E² · phi_cut(q)` (elliptical cross section).
    CrossSection,
}

impl LensingCondition {
    /// Per-row acceptance weight.
    pub fn weights(&self, batch: &RecordBatch) -> Result<Vec<f64>> {
        let theta_e = batch.scalar(fields::THETA_E)?;
        match self {
            Self::EinsteinRadius => Ok(theta_e.iter().map(|t| t * t).collect()),
            Self::CrossSection => {
                let q = batch.scalar(fields::Q)?;
                Ok(theta_e
                    .iter()
                    .zip(q.iter())
                    .map(|(t, &q)| t * t * phi_cut_sie(q))
                    .collect())
            }
        }
    }
}

impl AcceptanceRule for LensingCondition {
    fn accept(&self, rng: &mut dyn RngCore, batch: &RecordBatch) -> Result<AcceptanceMask> {
        let weights = self.weights(batch)?;
        accept_by_weight(rng, &weights, "lensing cross-section rejection")
    }
}

impl std::fmt::Display for LensingCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EinsteinRadius => write!(f, "einstein_radius"),
            Self::CrossSection => write!(f, "cross_section"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosmology::FlatLambdaCdm;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_einstein_radius_scales_with_sigma_squared() {
        let cosmo = FlatLambdaCdm::default();
        let r = einstein_radii(&cosmo, &[100.0, 200.0], &[0.5, 0.5], &[2.0, 2.0]).unwrap();
        assert_relative_eq!(r[1] / r[0], 4.0, max_relative = 1e-12);
        // ~1 arcsec for a 250 km/s lens at typical redshifts
        let arcsec = 250.0_f64.powi(2) / 200.0_f64.powi(2) * r[1] * 206_264.8;
        assert!(arcsec > 0.3 && arcsec < 3.0, "theta_E = {arcsec} arcsec");
    }

    #[test]
    fn test_einstein_radius_length_mismatch() {
        let cosmo = FlatLambdaCdm::default();
        assert!(einstein_radii(&cosmo, &[100.0], &[0.5, 0.6], &[2.0]).is_err());
    }

    #[test]
    fn test_phi_cut_continuity() {
        assert_relative_eq!(phi_cut_sie(0.989_999), PI, max_relative = 1e-3);
        assert_eq!(phi_cut_sie(1.0), PI);
        assert!(phi_cut_sie(0.5) < PI);
        assert_eq!(phi_cut_sie(0.005), 0.0);
    }

    #[test]
    fn test_ellipticity_round_lens_is_zero() {
        let (e1, e2) = phi_q_to_ellipticity(1.3, 1.0);
        assert_eq!((e1, e2), (0.0, 0.0));
        let (e1, e2) = phi_q_to_ellipticity(0.0, 0.5);
        assert_relative_eq!(e1, 1.0 / 3.0);
        assert_relative_eq!(e2, 0.0);
    }

    #[test]
    fn test_largest_einstein_radius_favoured() {
        let batch = RecordBatch::from_columns([
            (fields::THETA_E, vec![1.0; 2000].into_iter().chain(vec![0.1; 2000]).collect::<Vec<_>>()),
        ])
        .unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let mask = LensingCondition::EinsteinRadius
            .accept(&mut rng, &batch)
            .unwrap();
        let big = mask[..2000].iter().filter(|&&m| m).count();
        let small = mask[2000..].iter().filter(|&&m| m).count();
        assert_eq!(big, 2000);
        assert!(small < 60, "accepted {small} small lenses");
    }

    #[test]
    fn test_cross_section_weights_flattened_lenses() {
        let n = 4000;
        let q: Vec<f64> = (0..n).map(|i| if i < n / 2 { 1.0 } else { 0.3 }).collect();
        let batch = RecordBatch::from_columns([(fields::THETA_E, vec![2e-6; n]), (fields::Q, q)])
            .unwrap();

        let w = LensingCondition::CrossSection.weights(&batch).unwrap();
        assert_relative_eq!(w[0], 4e-12 * PI, max_relative = 1e-12);
        assert_relative_eq!(w[n - 1], 4e-12 * phi_cut_sie(0.3), max_relative = 1e-12);
        let circular = LensingCondition::EinsteinRadius.weights(&batch).unwrap();
        assert_eq!(circular[0], circular[n - 1]);

        let mut rng = StdRng::seed_from_u64(3);
        let mask = LensingCondition::CrossSection.accept(&mut rng, &batch).unwrap();
        let round = mask[..n / 2].iter().filter(|&&m| m).count();
        let flat = mask[n / 2..].iter().filter(|&&m| m).count();
        assert_eq!(round, n / 2);
        let ratio = flat as f64 / round as f64;
        let expected = phi_cut_sie(0.3) / PI;
        assert!((ratio - expected).abs() < 0.04, "ratio {ratio}, expected {expected}");
    }

    #[test]
    fn test_cross_section_requires_axis_ratio() {
        let batch = RecordBatch::from_columns([(fields::THETA_E, vec![1.0])]).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        assert!(LensingCondition::CrossSection.accept(&mut rng, &batch).is_err());
    }
}
