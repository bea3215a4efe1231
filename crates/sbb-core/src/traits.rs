//! Core traits for StochBB
//!
//! Analytic distributions (`sbb-prob::Distribution`) and numeric density grids
//! (`sbb-prob::DensityGrid`) are both consumed by the evaluator through [`Density`], so
//! discretisation, order statistics and sampling do not care which representation a child has.

/// A univariate probability density with a cumulative distribution function.
pub trait Density: Send + Sync {
    /// Density at `x`. Point masses report `f64::INFINITY` at their atom.
    fn pdf(&self, x: f64) -> f64;

    /// Cumulative distribution function at `x`.
    fn cdf(&self, x: f64) -> f64;

    /// Interval holding all but `alpha` of the probability mass (central range).
    ///
    /// Bounded families return their exact bounds.
    fn support(&self, alpha: f64) -> (f64, f64);

    /// Survival function `P(X > x)`.
    fn survival(&self, x: f64) -> f64 {
        1.0 - self.cdf(x)
    }

    /// Probability mass in `(a, b]`, clamped at zero against rounding.
    fn mass_between(&self, a: f64, b: f64) -> f64 {
        (self.cdf(b) - self.cdf(a)).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Uniform(0, 1) written out by hand.
    struct UnitUniform;

    impl Density for UnitUniform {
        fn pdf(&self, x: f64) -> f64 {
            if (0.0..1.0).contains(&x) { 1.0 } else { 0.0 }
        }

        fn cdf(&self, x: f64) -> f64 {
            x.clamp(0.0, 1.0)
        }

        fn support(&self, _alpha: f64) -> (f64, f64) {
            (0.0, 1.0)
        }
    }

    #[test]
    fn test_default_mass_between() {
        let u = UnitUniform;
        assert!((u.mass_between(0.25, 0.75) - 0.5).abs() < 1e-15);
        assert_eq!(u.mass_between(0.75, 0.25), 0.0);
        assert!((u.survival(0.2) - 0.8).abs() < 1e-15);
    }

    #[test]
    fn test_trait_object() {
        let d: Box<dyn Density> = Box::new(UnitUniform);
        assert_eq!(d.support(1e-6), (0.0, 1.0));
        assert_eq!(d.pdf(2.0), 0.0);
    }
}
