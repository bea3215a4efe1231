//! Evaluation result of a random variable: a closed form or a density grid.

use std::sync::Arc;

use rand::Rng;
use sbb_core::{Density, Result};

use crate::{DensityGrid, Distribution};

/// Marginal distribution of one node output.
///
/// Grids are reference counted so cached results can be handed out without copying.
#[derive(Debug, Clone, PartialEq)]
pub enum Marginal {
    /// Closed-form distribution.
    Analytic(Distribution),
    /// Numeric density on a uniform grid.
    Grid(Arc<DensityGrid>),
}

impl Marginal {
    /// The closed form, if any.
    pub fn as_distribution(&self) -> Option<&Distribution> {
        match self {
            Marginal::Analytic(d) => Some(d),
            Marginal::Grid(_) => None,
        }
    }

    /// The numeric grid, if any.
    pub fn as_grid(&self) -> Option<&DensityGrid> {
        match self {
            Marginal::Analytic(_) => None,
            Marginal::Grid(g) => Some(g),
        }
    }

    /// True for a closed form.
    pub fn is_analytic(&self) -> bool {
        matches!(self, Marginal::Analytic(_))
    }

    /// True when all mass sits on a single point.
    pub fn is_degenerate(&self) -> bool {
        match self {
            Marginal::Analytic(d) => d.is_degenerate(),
            Marginal::Grid(g) => g.values().iter().filter(|v| **v > 0.0).count() <= 1,
        }
    }

    /// Total probability mass (exactly 1 for closed forms).
    pub fn mass(&self) -> f64 {
        match self {
            Marginal::Analytic(_) => 1.0,
            Marginal::Grid(g) => g.mass(),
        }
    }

    /// Mean.
    pub fn mean(&self) -> f64 {
        match self {
            Marginal::Analytic(d) => d.mean(),
            Marginal::Grid(g) => g.mean(),
        }
    }

    /// Variance.
    pub fn variance(&self) -> f64 {
        match self {
            Marginal::Analytic(d) => d.variance(),
            Marginal::Grid(g) => g.variance(),
        }
    }

    /// Quantile function.
    pub fn quantile(&self, p: f64) -> f64 {
        match self {
            Marginal::Analytic(d) => d.quantile(p),
            Marginal::Grid(g) => g.quantile(p),
        }
    }

    /// Draw one variate (inverse CDF for grids).
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Result<f64> {
        match self {
            Marginal::Analytic(d) => d.sample(rng),
            Marginal::Grid(g) => Ok(g.sample(rng)),
        }
    }

    /// Cell masses on the grid `lower + i*dx`, `i < n`.
    pub fn discretize(&self, lower: f64, dx: f64, n: usize) -> Result<DensityGrid> {
        match self {
            Marginal::Analytic(d) => DensityGrid::discretize(d, lower, dx, n),
            Marginal::Grid(g) => g.resample(lower, dx, n),
        }
    }
}

impl Density for Marginal {
    fn pdf(&self, x: f64) -> f64 {
        match self {
            Marginal::Analytic(d) => d.pdf(x),
            Marginal::Grid(g) => g.pdf(x),
        }
    }

    fn cdf(&self, x: f64) -> f64 {
        match self {
            Marginal::Analytic(d) => d.cdf(x),
            Marginal::Grid(g) => g.cdf(x),
        }
    }

    fn support(&self, alpha: f64) -> (f64, f64) {
        match self {
            Marginal::Analytic(d) => d.support(alpha),
            Marginal::Grid(g) => g.support(alpha),
        }
    }
}

impl From<Distribution> for Marginal {
    fn from(d: Distribution) -> Self {
        Marginal::Analytic(d)
    }
}

impl From<DensityGrid> for Marginal {
    fn from(g: DensityGrid) -> Self {
        Marginal::Grid(Arc::new(g))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_analytic_delegates() {
        let m: Marginal = Distribution::normal(2.0, 0.5).unwrap().into();
        assert!(m.is_analytic());
        assert_eq!(m.mass(), 1.0);
        assert_relative_eq!(m.cdf(2.0), 0.5, epsilon = 1e-15);
        assert_relative_eq!(m.variance(), 0.25);
    }

    #[test]
    fn test_grid_resample_is_identity_on_same_layout() {
        let g = DensityGrid::new(0.0, 0.5, vec![1.0, 1.0]).unwrap();
        let m: Marginal = g.clone().into();
        assert_eq!(m.discretize(0.0, 0.5, 2).unwrap(), g);
        let coarse = m.discretize(0.0, 1.0, 1).unwrap();
        assert_relative_eq!(coarse.mass(), 1.0, epsilon = 1e-15);
        assert!(m.as_distribution().is_none());
    }

    #[test]
    fn test_degenerate_detection() {
        let d: Marginal = Distribution::delta(1.0).unwrap().into();
        assert!(d.is_degenerate());
        let g: Marginal = DensityGrid::new(0.0, 1.0, vec![0.0, 1.0, 0.0]).unwrap().into();
        assert!(g.is_degenerate());
    }
}
