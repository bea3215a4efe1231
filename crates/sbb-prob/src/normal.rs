//! Normal distribution utilities.

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use sbb_core::Result;

use crate::math::{require_finite, require_positive, std_normal_cdf, std_normal_quantile};

/// Natural log of `sqrt(2π)`.
const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

/// Validate `mu` (finite) and `sigma` (finite, > 0).
pub fn validate(mu: f64, sigma: f64) -> Result<()> {
    require_finite("mu", mu)?;
    require_positive("sigma", sigma)
}

/// Log-PDF of `N(mu, sigma)` at `x`.
///
/// `log p(x) = -0.5 * ((x-mu)/sigma)^2 - ln(sigma) - ln(sqrt(2π))`
pub fn logpdf(x: f64, mu: f64, sigma: f64) -> Result<f64> {
    validate(mu, sigma)?;
    Ok(ln_density(x, mu, sigma))
}

fn ln_density(x: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma;
    -0.5 * z * z - sigma.ln() - LN_SQRT_2PI
}

/// Density (parameters assumed valid).
pub fn pdf(x: f64, mu: f64, sigma: f64) -> f64 {
    ln_density(x, mu, sigma).exp()
}

/// CDF (parameters assumed valid).
pub fn cdf(x: f64, mu: f64, sigma: f64) -> f64 {
    std_normal_cdf((x - mu) / sigma)
}

/// Quantile (parameters assumed valid).
pub fn quantile(p: f64, mu: f64, sigma: f64) -> f64 {
    mu + sigma * std_normal_quantile(p)
}

/// Variate via `rand_distr::StandardNormal`.
pub fn sample<R: Rng>(rng: &mut R, mu: f64, sigma: f64) -> f64 {
    let z: f64 = StandardNormal.sample(rng);
    mu + sigma * z
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_peak_density() {
        assert_relative_eq!(logpdf(2.0, 2.0, 1.0).unwrap(), -LN_SQRT_2PI, epsilon = 1e-12);
        assert_relative_eq!(pdf(0.0, 0.0, 2.0), 0.5 * (-LN_SQRT_2PI).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_quantile_inverts_cdf() {
        let q = quantile(0.8, 3.0, 2.0);
        assert_relative_eq!(cdf(q, 3.0, 2.0), 0.8, epsilon = 1e-10);
    }

    #[test]
    fn test_validation() {
        assert!(validate(0.0, 0.0).is_err());
        assert!(validate(0.0, -1.0).is_err());
        assert!(validate(f64::NAN, 1.0).is_err());
        assert!(validate(-3.0, 0.5).is_ok());
    }
}
