//! Cosmological distances.
//!
//! The [`Cosmology`] trait is the distance collaborator used by Einstein
//! radii, lens-redshift draws and optical depths. One instance is owned by the
//! top-level population and shared with every dependent by `Arc`.
//!
//! [`FlatLambdaCdm`] precomputes the line-of-sight comoving distance on a
//! regular redshift grid and interpolates linearly, which keeps the per-call
//! cost of the vectorized distance functions independent of redshift.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::geometry::SPEED_OF_LIGHT_KM_S;

/// Distance functions, all in Mpc.
pub trait Cosmology: Send + Sync {
    /// Line-of-sight comoving distance to `z`.
    fn comoving_distance(&self, z: f64) -> f64;

    /// Inverse of [`Cosmology::comoving_distance`].
    fn redshift_at_comoving_distance(&self, dc: f64) -> f64;

    /// Dimensionless Hubble rate `E(z) = H(z) / H0`.
    fn efunc(&self, z: f64) -> f64;

    /// Hubble distance `c / H0`.
    fn hubble_distance(&self) -> f64;

    /// Full-sky differential comoving volume `dVc/dz` in Mpc³.
    fn differential_comoving_volume(&self, z: f64) -> f64 {
        let dc = self.comoving_distance(z);
        4.0 * PI * self.hubble_distance() * dc * dc / self.efunc(z)
    }

    fn luminosity_distance(&self, z: f64) -> f64 {
        self.comoving_distance(z) * (1.0 + z)
    }

    /// Angular-diameter distance to each redshift.
    fn angular_diameter_distance(&self, z: &[f64]) -> Vec<f64> {
        z.iter()
            .map(|&z| self.comoving_distance(z) / (1.0 + z))
            .collect()
    }

    /// Angular-diameter distance between `z1[i]` and `z2[i]` (flat space).
    fn angular_diameter_distance_z1z2(&self, z1: &[f64], z2: &[f64]) -> Vec<f64> {
        z1.iter()
            .zip(z2)
            .map(|(&a, &b)| (self.comoving_distance(b) - self.comoving_distance(a)) / (1.0 + b))
            .collect()
    }
}

/// Flat ΛCDM parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CosmologyParams {
    /// Hubble constant in km/s/Mpc.
    pub h0: f64,
    /// Matter density today; dark energy is `1 - omega_m`.
    pub omega_m: f64,
}

impl Default for CosmologyParams {
    fn default() -> Self {
        Self {
            h0: 70.0,
            omega_m: 0.3,
        }
    }
}

/// Flat ΛCDM with a tabulated comoving distance.
#[derive(Debug, Clone)]
pub struct FlatLambdaCdm {
    params: CosmologyParams,
    dz: f64,
    z_table_max: f64,
    dc_table: Vec<f64>,
}

impl FlatLambdaCdm {
    /// Table resolution in redshift.
    const TABLE_POINTS: usize = 4001;

    /// Build a table covering `[0, z_table_max]`. Redshifts beyond the table
    /// are integrated directly.
    pub fn new(params: CosmologyParams, z_table_max: f64) -> Self {
        let z_table_max = z_table_max.max(1e-3);
        let n = Self::TABLE_POINTS;
        let dz = z_table_max / (n - 1) as f64;
        let mut cosmo = Self {
            params,
            dz,
            z_table_max,
            dc_table: Vec::with_capacity(n),
        };

        // Cumulative trapezoid of c/H0 / E(z).
        let dh = cosmo.hubble_distance();
        let mut dc = 0.0;
        let mut prev = 1.0 / cosmo.efunc(0.0);
        cosmo.dc_table.push(0.0);
        for i in 1..n {
            let inv_e = 1.0 / cosmo.efunc(i as f64 * dz);
            dc += 0.5 * (prev + inv_e) * dz * dh;
            cosmo.dc_table.push(dc);
            prev = inv_e;
        }
        cosmo
    }

    pub fn params(&self) -> CosmologyParams {
        self.params
    }

    /// Simpson integral of `c/H0 / E(z)` over `[z0, z1]`.
    fn integrate(&self, z0: f64, z1: f64) -> f64 {
        let n = 512;
        let h = (z1 - z0) / n as f64;
        let f = |z: f64| 1.0 / self.efunc(z);
        let mut sum = f(z0) + f(z1);
        for i in 1..n {
            let w = if i % 2 == 1 { 4.0 } else { 2.0 };
            sum += w * f(z0 + i as f64 * h);
        }
        sum * h / 3.0 * self.hubble_distance()
    }
}

impl Default for FlatLambdaCdm {
    fn default() -> Self {
        Self::new(CosmologyParams::default(), 20.0)
    }
}

impl Cosmology for FlatLambdaCdm {
    fn comoving_distance(&self, z: f64) -> f64 {
        if z <= 0.0 {
            return 0.0;
        }
        if z >= self.z_table_max {
            let last = self.dc_table[self.dc_table.len() - 1];
            return last + self.integrate(self.z_table_max, z);
        }
        let t = z / self.dz;
        let i = (t.floor() as usize).min(self.dc_table.len() - 2);
        let frac = t - i as f64;
        self.dc_table[i] + frac * (self.dc_table[i + 1] - self.dc_table[i])
    }

    fn redshift_at_comoving_distance(&self, dc: f64) -> f64 {
        if dc <= 0.0 {
            return 0.0;
        }
        let last = self.dc_table.len() - 1;
        if dc >= self.dc_table[last] {
            return self.z_table_max;
        }
        // First table entry strictly above dc.
        let hi = self.dc_table.partition_point(|&d| d <= dc);
        let lo = hi - 1;
        let frac = (dc - self.dc_table[lo]) / (self.dc_table[hi] - self.dc_table[lo]);
        (lo as f64 + frac) * self.dz
    }

    fn efunc(&self, z: f64) -> f64 {
        let om = self.params.omega_m;
        (om * (1.0 + z).powi(3) + (1.0 - om)).sqrt()
    }

    fn hubble_distance(&self) -> f64 {
        SPEED_OF_LIGHT_KM_S / self.params.h0
    }
}
