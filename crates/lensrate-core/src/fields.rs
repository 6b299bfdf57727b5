//! Canonical field names used across record batches.

/// Lens redshift.
pub const ZL: &str = "zl";
/// Source redshift.
pub const ZS: &str = "zs";
/// Lens velocity dispersion (km/s).
pub const SIGMA: &str = "sigma";
/// Lens axis ratio.
pub const Q: &str = "q";
/// Einstein radius (radians).
pub const THETA_E: &str = "theta_E";
/// Axis rotation angle (radians).
pub const PHI: &str = "phi";
pub const E1: &str = "e1";
pub const E2: &str = "e2";
pub const GAMMA1: &str = "gamma1";
pub const GAMMA2: &str = "gamma2";
/// Mass-density spectral index.
pub const GAMMA: &str = "gamma";

/// Detector-frame masses; dropped from lensed records in favour of the
/// source-frame masses plus redshift.
pub const MASS_1: &str = "mass_1";
pub const MASS_2: &str = "mass_2";

/// Network optimal SNR: per system (unlensed) or per image (lensed).
pub const SNR_NET: &str = "opt_snr_net";
/// Probability of detection written by the selection stage.
pub const PDET_NET: &str = "pdet_net";
/// Per-system importance weight carried into lensed rate estimates.
pub const WEIGHTS: &str = "weights";

/// The five fields that take part in the lens rejection step.
pub const LENS_CORE: [&str; 5] = [ZL, ZS, SIGMA, Q, THETA_E];
