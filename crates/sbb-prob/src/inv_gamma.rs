//! Inverse-Gamma distribution utilities (shape `alpha`, scale `beta`).
//!
//! If `G ~ Gamma(alpha, 1)` then `beta / G ~ InvGamma(alpha, beta)`; quantiles and variates
//! are derived from the Gamma side.

use rand::Rng;
use sbb_core::Result;
use statrs::function::gamma::{gamma_ur, ln_gamma};

use crate::math::require_positive;

/// Validate `alpha > 0`, `beta > 0`.
pub fn validate(alpha: f64, beta: f64) -> Result<()> {
    require_positive("alpha", alpha)?;
    require_positive("beta", beta)
}

/// Log-PDF at `x`. Support: `x > 0`.
pub fn logpdf(x: f64, alpha: f64, beta: f64) -> Result<f64> {
    validate(alpha, beta)?;
    Ok(ln_density(x, alpha, beta))
}

fn ln_density(x: f64, alpha: f64, beta: f64) -> f64 {
    if x <= 0.0 {
        return f64::NEG_INFINITY;
    }
    alpha * beta.ln() - ln_gamma(alpha) - (alpha + 1.0) * x.ln() - beta / x
}

/// Density (parameters assumed valid).
pub fn pdf(x: f64, alpha: f64, beta: f64) -> f64 {
    ln_density(x, alpha, beta).exp()
}

/// CDF `Q(alpha, beta / x)` (regularized upper incomplete gamma).
pub fn cdf(x: f64, alpha: f64, beta: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x.is_infinite() {
        return 1.0;
    }
    gamma_ur(alpha, beta / x)
}

/// Quantile via the Gamma quantile of the complementary probability.
pub fn quantile(p: f64, alpha: f64, beta: f64) -> f64 {
    if p <= 0.0 {
        return 0.0;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    beta / crate::gamma::quantile(1.0 - p, alpha, 1.0)
}

/// Mean `beta / (alpha - 1)`; infinite for `alpha <= 1`.
pub fn mean(alpha: f64, beta: f64) -> f64 {
    if alpha > 1.0 { beta / (alpha - 1.0) } else { f64::INFINITY }
}

/// Variance; infinite for `alpha <= 2`.
pub fn variance(alpha: f64, beta: f64) -> f64 {
    if alpha > 2.0 {
        beta * beta / ((alpha - 1.0) * (alpha - 1.0) * (alpha - 2.0))
    } else {
        f64::INFINITY
    }
}

/// Variate `beta / Gamma(alpha, 1)`.
pub fn sample<R: Rng>(rng: &mut R, alpha: f64, beta: f64) -> Result<f64> {
    Ok(beta / crate::gamma::sample(rng, alpha, 1.0)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_density_matches_change_of_variables() {
        // f_IG(x) = f_G(1/x; alpha, 1/beta) / x^2
        let (alpha, beta, x) = (3.0, 2.0, 0.8);
        let via_gamma = crate::gamma::pdf(1.0 / x, alpha, 1.0 / beta) / (x * x);
        assert_relative_eq!(pdf(x, alpha, beta), via_gamma, max_relative = 1e-12);
    }

    #[test]
    fn test_quantile_inverts_cdf() {
        for p in [0.01, 0.5, 0.95] {
            let q = quantile(p, 2.5, 1.5);
            assert_relative_eq!(cdf(q, 2.5, 1.5), p, max_relative = 1e-8);
        }
    }

    #[test]
    fn test_heavy_tail_moments() {
        assert!(mean(0.5, 1.0).is_infinite());
        assert!(variance(1.5, 1.0).is_infinite());
        assert_relative_eq!(mean(3.0, 4.0), 2.0);
    }
}
