//! Small numeric utilities shared by the distribution families.

use log::warn;
use sbb_core::{Error, Result};
use statrs::function::erf::{erf_inv, erfc};

/// Bisection iterations used by [`invert_cdf`]. 200 halvings exhaust f64 precision.
const MAX_BISECTION_STEPS: usize = 200;

/// Standard normal CDF `Φ(z)`.
///
/// Uses `erfc` for better tail behavior: `Φ(z) = 0.5 * erfc(-z / sqrt(2))`.
#[inline]
pub fn std_normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / std::f64::consts::SQRT_2)
}

/// Standard normal quantile `Φ⁻¹(p)`; `p` outside `(0, 1)` maps to `±inf`.
pub fn std_normal_quantile(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    std::f64::consts::SQRT_2 * erf_inv(2.0 * p - 1.0)
}

/// Invert a monotone CDF by bracketed bisection.
///
/// `lo` must satisfy `cdf(lo) <= p`. The upper bracket starts at `hi` and is pushed outwards
/// (doubling its distance from `lo`) until `cdf(hi) >= p`.
pub fn invert_cdf<F: Fn(f64) -> f64>(cdf: F, p: f64, lo: f64, hi: f64) -> f64 {
    let mut lo = lo;
    let mut hi = hi.max(lo + f64::EPSILON.max(lo.abs() * f64::EPSILON));
    let mut width = hi - lo;
    while cdf(hi) < p {
        if !hi.is_finite() {
            warn!("quantile p={} is not bracketed by a finite bound, returning +inf", p);
            return f64::INFINITY;
        }
        lo = hi;
        width *= 2.0;
        hi = lo + width;
    }
    for _ in 0..MAX_BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        if cdf(mid) < p {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Reject non-finite values.
pub fn require_finite(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(Error::InvalidParameter(format!("{} must be finite, got {}", name, value)));
    }
    Ok(())
}

/// Reject non-finite or non-positive values.
pub fn require_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(Error::InvalidParameter(format!(
            "{} must be finite and > 0, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Reject probabilities outside `[0, 1]`.
pub fn require_probability(name: &str, p: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&p) {
        return Err(Error::InvalidParameter(format!("{} must be in [0, 1], got {}", name, p)));
    }
    Ok(())
}
