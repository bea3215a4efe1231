//! Weibull distribution utilities (shape `k`, scale `lambda`).

use rand::Rng;
use sbb_core::Result;
use statrs::function::gamma::gamma;

use crate::math::require_positive;

/// Validate `k > 0`, `lambda > 0`.
pub fn validate(k: f64, lambda: f64) -> Result<()> {
    require_positive("k", k)?;
    require_positive("lambda", lambda)
}

/// Log-PDF of a Weibull distribution at `x`.
///
/// Support: `x >= 0`.
pub fn logpdf(x: f64, k: f64, lambda: f64) -> Result<f64> {
    validate(k, lambda)?;
    Ok(ln_density(x, k, lambda))
}

fn ln_density(x: f64, k: f64, lambda: f64) -> f64 {
    if x < 0.0 {
        return f64::NEG_INFINITY;
    }
    if x == 0.0 {
        if k < 1.0 {
            return f64::INFINITY;
        }
        if k > 1.0 {
            return f64::NEG_INFINITY;
        }
        // k == 1 => exponential with rate 1/lambda
        return -lambda.ln();
    }
    let x_over_l = x / lambda;
    k.ln() - lambda.ln() + (k - 1.0) * x_over_l.ln() - x_over_l.powf(k)
}

/// Density (parameters assumed valid).
pub fn pdf(x: f64, k: f64, lambda: f64) -> f64 {
    ln_density(x, k, lambda).exp()
}

/// CDF `1 - exp(-(x/lambda)^k)`.
pub fn cdf(x: f64, k: f64, lambda: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    -(-(x / lambda).powf(k)).exp_m1()
}

/// Quantile `lambda (-ln(1-p))^(1/k)`.
pub fn quantile(p: f64, k: f64, lambda: f64) -> f64 {
    if p <= 0.0 {
        return 0.0;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    lambda * (-(-p).ln_1p()).powf(1.0 / k)
}

/// Mean `lambda Γ(1 + 1/k)`.
pub fn mean(k: f64, lambda: f64) -> f64 {
    lambda * gamma(1.0 + 1.0 / k)
}

/// Variance `lambda^2 [Γ(1 + 2/k) - Γ(1 + 1/k)^2]`.
pub fn variance(k: f64, lambda: f64) -> f64 {
    let g1 = gamma(1.0 + 1.0 / k);
    lambda * lambda * (gamma(1.0 + 2.0 / k) - g1 * g1)
}

/// Variate by inversion.
pub fn sample<R: Rng>(rng: &mut R, k: f64, lambda: f64) -> f64 {
    let u: f64 = rng.random();
    quantile(u, k, lambda)
}
