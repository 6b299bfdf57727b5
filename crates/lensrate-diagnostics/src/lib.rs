//! Statistical checks for Monte-Carlo samples and rate estimates.
//!
//! Each check returns a [`CheckResult`] with a p-value (where applicable), a
//! pass/fail determination, and a letter grade (A through F). The checks take
//! plain slices and numbers so they can be applied to any sampler's output.

use statrs::function::erf::erfc;

// ═══════════════════════════════════════════════════════════════════════════════
// Core types
// ═══════════════════════════════════════════════════════════════════════════════

/// Confidence that a sampler or estimator reproduces its target.
///
/// A check's p-value is the chance that a correct sampler shows a
/// discrepancy at least as large as the observed one. Rejection samplers
/// with a wrong envelope or a truncated quota loop drift to `D` and `F` as the
/// sample grows, while a correct one stays at `A` or `B` in most runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    /// `A` for p ≥ 0.1, `B` ≥ 0.01, `C` ≥ 0.001, `D` ≥ 0.0001, else `F`.
    pub fn from_p_value(p: Option<f64>) -> Self {
        match p {
            Some(p) if p >= 0.1 => Self::A,
            Some(p) if p >= 0.01 => Self::B,
            Some(p) if p >= 0.001 => Self::C,
            Some(p) if p >= 0.0001 => Self::D,
            _ => Self::F,
        }
    }

    /// Points towards [`quality_score`].
    pub fn points(self) -> f64 {
        match self {
            Self::A => 100.0,
            Self::B => 75.0,
            Self::C => 50.0,
            Self::D => 25.0,
            Self::F => 0.0,
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let letter = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        };
        f.pad(letter)
    }
}

/// Outcome of one check on a sample or rate estimate.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub p_value: Option<f64>,
    pub statistic: f64,
    pub details: String,
    pub grade: Grade,
}

impl CheckResult {
    /// Significance below which a sample is rejected.
    pub const REJECT_BELOW: f64 = 0.01;

    fn from_p(name: &str, p: f64, statistic: f64, details: String) -> Self {
        Self {
            name: name.to_string(),
            passed: p >= Self::REJECT_BELOW,
            p_value: Some(p),
            statistic,
            details,
            grade: Grade::from_p_value(Some(p)),
        }
    }

    /// A check that could not run on the given input.
    fn failed(name: &str, statistic: f64, details: String) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            p_value: None,
            statistic,
            details,
            grade: Grade::F,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Too few draws for the check to say anything.
fn insufficient(name: &str, needed: usize, got: usize) -> CheckResult {
    CheckResult::failed(name, 0.0, format!("Insufficient data: need {needed}, got {got}"))
}

/// Asymptotic Kolmogorov distribution tail for an effective sample size.
fn kolmogorov_p(d_max: f64, n_eff: f64) -> f64 {
    let sqrt_n = n_eff.sqrt();
    let lambda = (sqrt_n + 0.12 + 0.11 / sqrt_n) * d_max;
    let mut p = 0.0;
    for k in 1..=100i32 {
        let sign = if k % 2 == 0 { -1.0 } else { 1.0 };
        p += sign * (-2.0 * (k as f64 * lambda).powi(2)).exp();
    }
    (2.0 * p).clamp(0.0, 1.0)
}

/// Finite values, sorted ascending.
fn sorted_finite(samples: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = samples.iter().copied().filter(|x| x.is_finite()).collect();
    v.sort_by(f64::total_cmp);
    v
}

// ═══════════════════════════════════════════════════════════════════════════════
// Distribution checks
// ═══════════════════════════════════════════════════════════════════════════════

/// Kolmogorov-Smirnov test of `samples` against a target CDF.
pub fn ks_one_sample(samples: &[f64], cdf: impl Fn(f64) -> f64) -> CheckResult {
    let name = "Kolmogorov-Smirnov (one-sample)";
    let sorted = sorted_finite(samples);
    let n = sorted.len();
    if n < 50 {
        return insufficient(name, 50, n);
    }

    // KS statistic: max |F_n(x) - F(x)|
    let mut d_max = 0.0f64;
    let nf = n as f64;
    for (i, &x) in sorted.iter().enumerate() {
        let f_x = cdf(x).clamp(0.0, 1.0);
        let d1 = ((i + 1) as f64 / nf - f_x).abs();
        let d2 = (i as f64 / nf - f_x).abs();
        d_max = d_max.max(d1).max(d2);
    }

    let p = kolmogorov_p(d_max, nf);
    CheckResult::from_p(name, p, d_max, format!("D={d_max:.6}, n={n}"))
}

/// Two-sample Kolmogorov-Smirnov test: were `a` and `b` drawn from the same
/// distribution?
pub fn ks_two_sample(a: &[f64], b: &[f64]) -> CheckResult {
    let name = "Kolmogorov-Smirnov (two-sample)";
    let a = sorted_finite(a);
    let b = sorted_finite(b);
    let got = a.len().min(b.len());
    if got < 50 {
        return insufficient(name, 50, got);
    }

    let (n, m) = (a.len(), b.len());
    let (mut i, mut j) = (0, 0);
    let mut d_max = 0.0f64;
    while i < n && j < m {
        let x = a[i].min(b[j]);
        while i < n && a[i] <= x {
            i += 1;
        }
        while j < m && b[j] <= x {
            j += 1;
        }
        let d = (i as f64 / n as f64 - j as f64 / m as f64).abs();
        d_max = d_max.max(d);
    }

    let n_eff = (n * m) as f64 / (n + m) as f64;
    let p = kolmogorov_p(d_max, n_eff);
    CheckResult::from_p(name, p, d_max, format!("D={d_max:.6}, n={n}, m={m}"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Estimator checks
// ═══════════════════════════════════════════════════════════════════════════════

/// Do two estimates of the same rate agree within their Monte-Carlo standard
/// errors? Two-sided normal test on `|a - b| / sqrt(err_a² + err_b²)`.
pub fn rate_agreement(a: f64, err_a: f64, b: f64, err_b: f64) -> CheckResult {
    let name = "Rate Agreement";
    if !(a.is_finite() && b.is_finite() && err_a >= 0.0 && err_b >= 0.0) {
        return CheckResult::failed(
            name,
            f64::NAN,
            format!("Non-finite input: a={a}, b={b}, errors {err_a}, {err_b}"),
        );
    }
    let sigma = (err_a * err_a + err_b * err_b).sqrt();
    let diff = (a - b).abs();
    let (z, p) = if sigma > 0.0 {
        let z = diff / sigma;
        (z, erfc(z / std::f64::consts::SQRT_2))
    } else if diff == 0.0 {
        (0.0, 1.0)
    } else {
        (f64::INFINITY, 0.0)
    };
    CheckResult::from_p(
        name,
        p,
        z,
        format!("a={a:.6e}, b={b:.6e}, sigma={sigma:.3e}, z={z:.3}"),
    )
}

/// Acceptance across quota-loop rounds. Each entry is `(accepted, drawn)`.
///
/// The statistic is the pooled acceptance fraction. Fails when nothing was
/// ever accepted, since the loop cannot converge.
pub fn acceptance_summary(rounds: &[(usize, usize)]) -> CheckResult {
    let name = "Acceptance Summary";
    let drawn: usize = rounds.iter().map(|r| r.1).sum();
    if drawn == 0 {
        return insufficient(name, 1, 0);
    }
    let accepted: usize = rounds.iter().map(|r| r.0).sum();
    let rate = accepted as f64 / drawn as f64;
    let per_round: Vec<f64> = rounds
        .iter()
        .filter(|r| r.1 > 0)
        .map(|r| r.0 as f64 / r.1 as f64)
        .collect();
    let min = per_round.iter().copied().fold(f64::INFINITY, f64::min);
    let max = per_round.iter().copied().fold(0.0, f64::max);
    let passed = accepted > 0;
    CheckResult {
        name: name.to_string(),
        passed,
        p_value: None,
        statistic: rate,
        details: format!(
            "accepted {accepted}/{drawn} over {} rounds (min {min:.4}, max {max:.4})",
            rounds.len()
        ),
        grade: if passed { Grade::A } else { Grade::F },
    }
}

/// Mean of the grade points of a self-test run, 0 to 100.
pub fn quality_score(results: &[CheckResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    results.iter().map(|r| r.grade.points()).sum::<f64>() / results.len() as f64
}
