//! Point mass (degenerate distribution) utilities.

use sbb_core::Result;

use crate::math::require_finite;

/// Validate the atom location.
pub fn validate(value: f64) -> Result<()> {
    require_finite("value", value)
}

/// Density of a point mass: infinite at the atom, zero elsewhere.
pub fn pdf(x: f64, value: f64) -> f64 {
    if x == value { f64::INFINITY } else { 0.0 }
}

/// Step CDF, right-continuous at the atom.
pub fn cdf(x: f64, value: f64) -> f64 {
    if x >= value { 1.0 } else { 0.0 }
}
