//! Lens-parameter samplers.
//!
//! Every lens parameter is drawn through a small trait so pipelines hold
//! injected trait objects rather than looking samplers up by name. The
//! [`LensModelKind`] enum resolves a complete default set once, at
//! construction; individual samplers can then be replaced on [`LensPriors`].

use std::f64::consts::PI;
use std::sync::Arc;

use rand::{Rng, RngCore};
use rand_distr::{Distribution, Gamma, Normal};
use serde::{Deserialize, Serialize};

use crate::cosmology::Cosmology;
use crate::error::{LensRateError, Result};

// ---------------------------------------------------------------------------
// Sampler contracts
// ---------------------------------------------------------------------------

/// Lens redshift per source redshift, with `0 < zl < zs`.
pub trait LensRedshiftSampler: Send + Sync {
    fn sample(&self, rng: &mut dyn RngCore, zs: &[f64]) -> Result<Vec<f64>>;
}

/// Velocity dispersion in km/s.
///
/// Samplers that depend on lens redshift declare it through
/// [`VelocityDispersionSampler::requires_lens_redshift`]; pipelines check the
/// capability once at construction and always pass the lens redshifts.
pub trait VelocityDispersionSampler: Send + Sync {
    fn requires_lens_redshift(&self) -> bool {
        false
    }

    fn sample(&self, rng: &mut dyn RngCore, size: usize, zl: Option<&[f64]>) -> Result<Vec<f64>>;
}

/// Axis ratio conditioned on velocity dispersion.
pub trait AxisRatioSampler: Send + Sync {
    fn sample(&self, rng: &mut dyn RngCore, sigma: &[f64]) -> Result<Vec<f64>>;
}

/// Independent per-system scalar (axis rotation angle, spectral index).
pub trait ScalarSampler: Send + Sync {
    fn sample(&self, rng: &mut dyn RngCore, size: usize) -> Result<Vec<f64>>;
}

/// External shear components `(gamma1, gamma2)`.
pub trait ShearSampler: Send + Sync {
    fn sample(&self, rng: &mut dyn RngCore, size: usize) -> Result<(Vec<f64>, Vec<f64>)>;
}

// ---------------------------------------------------------------------------
// Lens redshift
// ---------------------------------------------------------------------------

/// Lens at comoving-distance fraction `r` of its source, with
/// `P(<r) = 10r³ − 15r⁴ + 6r⁵`.
pub struct SdssLensRedshift {
    cosmology: Arc<dyn Cosmology>,
    r_grid: Vec<f64>,
    cdf: Vec<f64>,
}

impl SdssLensRedshift {
    const GRID: usize = 500;

    pub fn new(cosmology: Arc<dyn Cosmology>) -> Self {
        let r_grid: Vec<f64> = (0..Self::GRID)
            .map(|i| i as f64 / (Self::GRID - 1) as f64)
            .collect();
        let cdf = r_grid
            .iter()
            .map(|&u| 10.0 * u.powi(3) - 15.0 * u.powi(4) + 6.0 * u.powi(5))
            .collect();
        Self {
            cosmology,
            r_grid,
            cdf,
        }
    }
}

impl LensRedshiftSampler for SdssLensRedshift {
    fn sample(&self, rng: &mut dyn RngCore, zs: &[f64]) -> Result<Vec<f64>> {
        Ok(zs
            .iter()
            .map(|&z| {
                let r = inverse_transform(&self.cdf, &self.r_grid, rng.random::<f64>());
                let dc = self.cosmology.comoving_distance(z) * r;
                self.cosmology.redshift_at_comoving_distance(dc)
            })
            .collect())
    }
}

/// Linear interpolation of `x` at cumulative probability `u` on a
/// non-decreasing `cdf` table.
fn inverse_transform(cdf: &[f64], x: &[f64], u: f64) -> f64 {
    let hi = cdf.partition_point(|&c| c < u).clamp(1, cdf.len() - 1);
    let lo = hi - 1;
    let span = cdf[hi] - cdf[lo];
    if span <= 0.0 {
        return x[lo];
    }
    x[lo] + (x[hi] - x[lo]) * (u - cdf[lo]) / span
}

// ---------------------------------------------------------------------------
// Velocity dispersion
// ---------------------------------------------------------------------------

/// Generalized gamma `scale · G^(1/c)`, `G ~ Gamma(a)`, truncated to
/// `[vd_min, vd_max]`.
#[derive(Debug, Clone)]
pub struct GeneralizedGammaVelocityDispersion {
    gamma: Gamma<f64>,
    c: f64,
    scale: f64,
    vd_min: f64,
    vd_max: f64,
    max_rounds: usize,
}

impl GeneralizedGammaVelocityDispersion {
    pub fn new(params: &VelocityDispersionParams, max_rounds: usize) -> Result<Self> {
        if !(params.vd_min < params.vd_max) || params.c <= 0.0 {
            return Err(LensRateError::InvalidConfig(format!(
                "velocity dispersion parameters {params:?}"
            )));
        }
        let gamma = Gamma::new(params.a, 1.0)
            .map_err(|e| LensRateError::InvalidConfig(format!("velocity dispersion: {e}")))?;
        Ok(Self {
            gamma,
            c: params.c,
            scale: params.scale,
            vd_min: params.vd_min,
            vd_max: params.vd_max,
            max_rounds: max_rounds.max(1),
        })
    }

    fn draw_one(&self, rng: &mut dyn RngCore) -> Option<f64> {
        (0..self.max_rounds)
            .map(|_| self.scale * self.gamma.sample(rng).powf(1.0 / self.c))
            .find(|v| (self.vd_min..=self.vd_max).contains(v))
    }
}

impl VelocityDispersionSampler for GeneralizedGammaVelocityDispersion {
    fn sample(&self, rng: &mut dyn RngCore, size: usize, _zl: Option<&[f64]>) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(size);
        for _ in 0..size {
            let Some(v) = self.draw_one(rng) else {
                return Err(LensRateError::NonConvergence {
                    stage: "velocity dispersion truncation",
                    rounds: self.max_rounds,
                    accepted: out.len(),
                    target: size,
                });
            };
            out.push(v);
        }
        Ok(out)
    }
}

/// Velocity dispersion from tabulated inverse CDFs, one per lens-redshift
/// bin. Each lens uses the first bin edge at or above its redshift.
#[derive(Debug, Clone)]
pub struct TabulatedVelocityDispersion {
    zl_grid: Vec<f64>,
    tables: Vec<(Vec<f64>, Vec<f64>)>,
}

impl TabulatedVelocityDispersion {
    /// `tables[i] = (cdf, sigma)` for lens redshift `zl_grid[i]`.
    pub fn new(zl_grid: Vec<f64>, tables: Vec<(Vec<f64>, Vec<f64>)>) -> Result<Self> {
        if zl_grid.is_empty() || zl_grid.len() != tables.len() {
            return Err(LensRateError::InvalidConfig(
                "one velocity dispersion table per lens redshift bin".into(),
            ));
        }
        if zl_grid.windows(2).any(|w| w[0] >= w[1]) {
            return Err(LensRateError::InvalidConfig(
                "lens redshift bins must be strictly increasing".into(),
            ));
        }
        for (cdf, sigma) in &tables {
            if cdf.len() < 2 || cdf.len() != sigma.len() || cdf.windows(2).any(|w| w[0] > w[1]) {
                return Err(LensRateError::InvalidConfig(
                    "velocity dispersion table must be a non-decreasing cdf with matching values"
                        .into(),
                ));
            }
        }
        Ok(Self { zl_grid, tables })
    }
}

impl VelocityDispersionSampler for TabulatedVelocityDispersion {
    fn requires_lens_redshift(&self) -> bool {
        true
    }

    fn sample(&self, rng: &mut dyn RngCore, size: usize, zl: Option<&[f64]>) -> Result<Vec<f64>> {
        let zl = zl.ok_or_else(|| {
            LensRateError::InvalidConfig("tabulated velocity dispersion needs lens redshifts".into())
        })?;
        if zl.len() != size {
            return Err(LensRateError::schema(format!(
                "{} lens redshifts for {size} velocity dispersions",
                zl.len()
            )));
        }
        Ok(zl
            .iter()
            .map(|&z| {
                let bin = self
                    .zl_grid
                    .partition_point(|&edge| edge < z)
                    .min(self.zl_grid.len() - 1);
                let (cdf, sigma) = &self.tables[bin];
                inverse_transform(cdf, sigma, rng.random::<f64>())
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Axis ratio
// ---------------------------------------------------------------------------

/// `q = 1 − Rayleigh(s)`, `s = 0.38 − 5.7e−4 σ`, restricted to
/// `[q_min, q_max]` by redrawing.
#[derive(Debug, Clone)]
pub struct RayleighAxisRatio {
    q_min: f64,
    q_max: f64,
    max_rounds: usize,
}

impl RayleighAxisRatio {
    pub fn new(q_min: f64, q_max: f64, max_rounds: usize) -> Result<Self> {
        if !(0.0 < q_min && q_min < q_max && q_max <= 1.0) {
            return Err(LensRateError::InvalidConfig(format!(
                "axis ratio range [{q_min}, {q_max}]"
            )));
        }
        Ok(Self {
            q_min,
            q_max,
            max_rounds: max_rounds.max(1),
        })
    }
}

impl AxisRatioSampler for RayleighAxisRatio {
    fn sample(&self, rng: &mut dyn RngCore, sigma: &[f64]) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(sigma.len());
        for &s in sigma {
            let scale = 0.38 - 5.7e-4 * s;
            if scale <= 0.0 {
                return Err(LensRateError::degenerate(
                    "axis ratio",
                    format!("rayleigh scale {scale} for sigma = {s} km/s"),
                ));
            }
            let q = (0..self.max_rounds)
                .map(|_| {
                    let u: f64 = rng.random();
                    1.0 - scale * (-2.0 * (1.0 - u).ln()).sqrt()
                })
                .find(|q| (self.q_min..=self.q_max).contains(q));
            let Some(q) = q else {
                return Err(LensRateError::NonConvergence {
                    stage: "axis ratio truncation",
                    rounds: self.max_rounds,
                    accepted: out.len(),
                    target: sigma.len(),
                });
            };
            out.push(q);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Rejection-free parameters
// ---------------------------------------------------------------------------

/// Uniform on `[min, max)`.
#[derive(Debug, Clone, Copy)]
pub struct UniformSampler {
    min: f64,
    max: f64,
}

impl UniformSampler {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if !(min < max) {
            return Err(LensRateError::InvalidConfig(format!("uniform range [{min}, {max})")));
        }
        Ok(Self { min, max })
    }
}

impl ScalarSampler for UniformSampler {
    fn sample(&self, rng: &mut dyn RngCore, size: usize) -> Result<Vec<f64>> {
        Ok((0..size)
            .map(|_| self.min + (self.max - self.min) * rng.random::<f64>())
            .collect())
    }
}

/// Normal with fixed mean and standard deviation.
#[derive(Debug, Clone, Copy)]
pub struct NormalSampler {
    normal: Normal<f64>,
}

impl NormalSampler {
    pub fn new(mean: f64, std: f64) -> Result<Self> {
        let normal = Normal::new(mean, std)
            .map_err(|e| LensRateError::InvalidConfig(format!("normal({mean}, {std}): {e}")))?;
        Ok(Self { normal })
    }
}

impl ScalarSampler for NormalSampler {
    fn sample(&self, rng: &mut dyn RngCore, size: usize) -> Result<Vec<f64>> {
        Ok((0..size).map(|_| self.normal.sample(rng)).collect())
    }
}

/// Two independent zero-mean normal shear components.
#[derive(Debug, Clone, Copy)]
pub struct NormalShear {
    component: NormalSampler,
}

impl NormalShear {
    pub fn new(scale: f64) -> Result<Self> {
        Ok(Self {
            component: NormalSampler::new(0.0, scale)?,
        })
    }
}

impl ShearSampler for NormalShear {
    fn sample(&self, rng: &mut dyn RngCore, size: usize) -> Result<(Vec<f64>, Vec<f64>)> {
        let gamma1 = self.component.sample(rng, size)?;
        let gamma2 = self.component.sample(rng, size)?;
        Ok((gamma1, gamma2))
    }
}

// ---------------------------------------------------------------------------
// Parameters and model resolution
// ---------------------------------------------------------------------------

/// Generalized-gamma velocity dispersion parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityDispersionParams {
    pub a: f64,
    pub c: f64,
    /// km/s
    pub scale: f64,
    pub vd_min: f64,
    pub vd_max: f64,
}

impl Default for VelocityDispersionParams {
    fn default() -> Self {
        Self {
            a: 2.32 / 2.67,
            c: 2.67,
            scale: 161.0,
            vd_min: 0.0,
            vd_max: 600.0,
        }
    }
}

/// Parameters of the default lens priors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LensPriorParams {
    pub velocity_dispersion: VelocityDispersionParams,
    pub q_min: f64,
    pub q_max: f64,
    pub phi_min: f64,
    pub phi_max: f64,
    pub shear_scale: f64,
    pub gamma_mean: f64,
    pub gamma_std: f64,
}

impl Default for LensPriorParams {
    fn default() -> Self {
        Self {
            velocity_dispersion: VelocityDispersionParams::default(),
            q_min: 0.2,
            q_max: 1.0,
            phi_min: 0.0,
            phi_max: 2.0 * PI,
            shear_scale: 0.05,
            gamma_mean: 2.0,
            gamma_std: 0.2,
        }
    }
}

/// Lens model family. Each variant resolves to one concrete sampler set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LensModelKind {
    /// Elliptical power-law galaxy with external shear.
    #[default]
    EplGalaxy,
}

impl LensModelKind {
    /// Resolve the sampler set for this model.
    pub fn priors(
        &self,
        params: &LensPriorParams,
        cosmology: Arc<dyn Cosmology>,
        max_rounds: usize,
    ) -> Result<LensPriors> {
        match self {
            Self::EplGalaxy => Ok(LensPriors {
                lens_redshift: Arc::new(SdssLensRedshift::new(cosmology)),
                velocity_dispersion: Arc::new(GeneralizedGammaVelocityDispersion::new(
                    &params.velocity_dispersion,
                    max_rounds,
                )?),
                axis_ratio: Arc::new(RayleighAxisRatio::new(
                    params.q_min,
                    params.q_max,
                    max_rounds,
                )?),
                axis_rotation_angle: Arc::new(UniformSampler::new(params.phi_min, params.phi_max)?),
                shear: Arc::new(NormalShear::new(params.shear_scale)?),
                mass_density_spectral_index: Arc::new(NormalSampler::new(
                    params.gamma_mean,
                    params.gamma_std,
                )?),
            }),
        }
    }
}

impl std::fmt::Display for LensModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EplGalaxy => write!(f, "epl_galaxy"),
        }
    }
}

/// Resolved lens samplers injected into the lensed pipeline.
#[derive(Clone)]
pub struct LensPriors {
    pub lens_redshift: Arc<dyn LensRedshiftSampler>,
    pub velocity_dispersion: Arc<dyn VelocityDispersionSampler>,
    pub axis_ratio: Arc<dyn AxisRatioSampler>,
    pub axis_rotation_angle: Arc<dyn ScalarSampler>,
    pub shear: Arc<dyn ShearSampler>,
    pub mass_density_spectral_index: Arc<dyn ScalarSampler>,
}
