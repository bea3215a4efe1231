//! Uniform distribution utilities.

use rand::Rng;
use sbb_core::{Error, Result};

use crate::math::require_finite;

/// Validate bounds: both finite, `a < b`.
pub fn validate(a: f64, b: f64) -> Result<()> {
    require_finite("a", a)?;
    require_finite("b", b)?;
    if a >= b {
        return Err(Error::InvalidParameter(format!("uniform requires a < b, got a={} b={}", a, b)));
    }
    Ok(())
}

/// Density on `[a, b)`.
pub fn pdf(x: f64, a: f64, b: f64) -> f64 {
    if x >= a && x < b { 1.0 / (b - a) } else { 0.0 }
}

/// CDF, linear between the bounds.
pub fn cdf(x: f64, a: f64, b: f64) -> f64 {
    ((x - a) / (b - a)).clamp(0.0, 1.0)
}

/// Quantile `a + p (b - a)`.
pub fn quantile(p: f64, a: f64, b: f64) -> f64 {
    a + p.clamp(0.0, 1.0) * (b - a)
}

/// Variate by inversion.
pub fn sample<R: Rng>(rng: &mut R, a: f64, b: f64) -> f64 {
    quantile(rng.random::<f64>(), a, b)
}
