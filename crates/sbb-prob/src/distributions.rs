//! The closed set of analytic distribution families.
//!
//! [`Distribution`] is validated at construction: every value that exists has parameters in
//! its family's domain, so the evaluation methods (`pdf`, `cdf`, `quantile`, ...) are
//! infallible. Gamma, InverseGamma and Weibull carry a location `shift`.

use std::fmt;

use rand::Rng;
use sbb_core::{Density, Error, Result};
use serde::{Deserialize, Serialize};

use crate::math::{require_finite, require_positive};
use crate::{delta, gamma, inv_gamma, normal, uniform, weibull};

/// Distribution family tag (used for compound nodes and rule signatures).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    /// Point mass `[value]`.
    Delta,
    /// `[a, b]`.
    Uniform,
    /// `[mu, sigma]`.
    Normal,
    /// `[k, theta]`.
    Gamma,
    /// `[alpha, beta]`.
    InverseGamma,
    /// `[k, lambda]`.
    Weibull,
}

impl Family {
    /// Number of (non-shift) parameters.
    pub fn arity(self) -> usize {
        match self {
            Family::Delta => 1,
            _ => 2,
        }
    }

    /// Parameter names in positional order.
    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            Family::Delta => &["value"],
            Family::Uniform => &["a", "b"],
            Family::Normal => &["mu", "sigma"],
            Family::Gamma => &["k", "theta"],
            Family::InverseGamma => &["alpha", "beta"],
            Family::Weibull => &["k", "lambda"],
        }
    }

    /// Check one positional parameter against the family's domain on its own.
    ///
    /// Constraints between parameters (Uniform `a < b`) need [`Family::with_params`].
    pub fn validate_param(self, index: usize, value: f64) -> Result<()> {
        let Some(name) = self.param_names().get(index) else {
            return Err(Error::InvalidArity {
                kind: self.name(),
                expected: format!("exactly {}", self.arity()),
                got: index + 1,
            });
        };
        match (self, index) {
            (Family::Delta | Family::Uniform, _) | (Family::Normal, 0) => require_finite(name, value),
            _ => require_positive(name, value),
        }
    }

    /// Build a validated distribution from positional parameters (no shift).
    pub fn with_params(self, params: &[f64]) -> Result<Distribution> {
        if params.len() != self.arity() {
            return Err(Error::InvalidArity {
                kind: self.name(),
                expected: format!("exactly {}", self.arity()),
                got: params.len(),
            });
        }
        match self {
            Family::Delta => Distribution::delta(params[0]),
            Family::Uniform => Distribution::uniform(params[0], params[1]),
            Family::Normal => Distribution::normal(params[0], params[1]),
            Family::Gamma => Distribution::gamma(params[0], params[1]),
            Family::InverseGamma => Distribution::inverse_gamma(params[0], params[1]),
            Family::Weibull => Distribution::weibull(params[0], params[1]),
        }
    }

    /// Lower-case family name.
    pub fn name(self) -> &'static str {
        match self {
            Family::Delta => "delta",
            Family::Uniform => "uniform",
            Family::Normal => "normal",
            Family::Gamma => "gamma",
            Family::InverseGamma => "inverse_gamma",
            Family::Weibull => "weibull",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Analytic distribution (validated tagged variant).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Distribution {
    /// Point mass at `value`.
    Delta {
        /// Atom location.
        value: f64,
    },
    /// Uniform on `[a, b)`.
    Uniform {
        /// Lower bound.
        a: f64,
        /// Upper bound.
        b: f64,
    },
    /// Normal `N(mu, sigma)`.
    Normal {
        /// Mean.
        mu: f64,
        /// Standard deviation.
        sigma: f64,
    },
    /// Gamma with shape `k`, scale `theta`, located at `shift`.
    Gamma {
        /// Shape.
        k: f64,
        /// Scale.
        theta: f64,
        /// Location.
        shift: f64,
    },
    /// Inverse-Gamma with shape `alpha`, scale `beta`, located at `shift`.
    InverseGamma {
        /// Shape.
        alpha: f64,
        /// Scale.
        beta: f64,
        /// Location.
        shift: f64,
    },
    /// Weibull with shape `k`, scale `lambda`, located at `shift`.
    Weibull {
        /// Shape.
        k: f64,
        /// Scale.
        lambda: f64,
        /// Location.
        shift: f64,
    },
}

impl Distribution {
    /// Point mass at `value`.
    pub fn delta(value: f64) -> Result<Self> {
        delta::validate(value)?;
        Ok(Distribution::Delta { value })
    }

    /// Uniform on `[a, b)`.
    pub fn uniform(a: f64, b: f64) -> Result<Self> {
        uniform::validate(a, b)?;
        Ok(Distribution::Uniform { a, b })
    }

    /// Normal `N(mu, sigma)`.
    pub fn normal(mu: f64, sigma: f64) -> Result<Self> {
        normal::validate(mu, sigma)?;
        Ok(Distribution::Normal { mu, sigma })
    }

    /// Gamma(k, theta) at zero.
    pub fn gamma(k: f64, theta: f64) -> Result<Self> {
        Self::shifted_gamma(k, theta, 0.0)
    }

    /// Gamma(k, theta) located at `shift`.
    pub fn shifted_gamma(k: f64, theta: f64, shift: f64) -> Result<Self> {
        gamma::validate(k, theta)?;
        require_finite("shift", shift)?;
        Ok(Distribution::Gamma { k, theta, shift })
    }

    /// Exponential with the given rate (Gamma with `k = 1`).
    pub fn exponential(rate: f64) -> Result<Self> {
        crate::math::require_positive("rate", rate)?;
        Self::gamma(1.0, 1.0 / rate)
    }

    /// InverseGamma(alpha, beta) at zero.
    pub fn inverse_gamma(alpha: f64, beta: f64) -> Result<Self> {
        Self::shifted_inverse_gamma(alpha, beta, 0.0)
    }

    /// InverseGamma(alpha, beta) located at `shift`.
    pub fn shifted_inverse_gamma(alpha: f64, beta: f64, shift: f64) -> Result<Self> {
        inv_gamma::validate(alpha, beta)?;
        require_finite("shift", shift)?;
        Ok(Distribution::InverseGamma { alpha, beta, shift })
    }

    /// Weibull(k, lambda) at zero.
    pub fn weibull(k: f64, lambda: f64) -> Result<Self> {
        Self::shifted_weibull(k, lambda, 0.0)
    }

    /// Weibull(k, lambda) located at `shift`.
    pub fn shifted_weibull(k: f64, lambda: f64, shift: f64) -> Result<Self> {
        weibull::validate(k, lambda)?;
        require_finite("shift", shift)?;
        Ok(Distribution::Weibull { k, lambda, shift })
    }

    /// Re-check the parameters (for values that bypassed the constructors, e.g. serde).
    pub fn validate(&self) -> Result<()> {
        match *self {
            Distribution::Delta { value } => delta::validate(value),
            Distribution::Uniform { a, b } => uniform::validate(a, b),
            Distribution::Normal { mu, sigma } => normal::validate(mu, sigma),
            Distribution::Gamma { k, theta, shift } => {
                gamma::validate(k, theta)?;
                require_finite("shift", shift)
            }
            Distribution::InverseGamma { alpha, beta, shift } => {
                inv_gamma::validate(alpha, beta)?;
                require_finite("shift", shift)
            }
            Distribution::Weibull { k, lambda, shift } => {
                weibull::validate(k, lambda)?;
                require_finite("shift", shift)
            }
        }
    }

    /// Family tag.
    pub fn family(&self) -> Family {
        match self {
            Distribution::Delta { .. } => Family::Delta,
            Distribution::Uniform { .. } => Family::Uniform,
            Distribution::Normal { .. } => Family::Normal,
            Distribution::Gamma { .. } => Family::Gamma,
            Distribution::InverseGamma { .. } => Family::InverseGamma,
            Distribution::Weibull { .. } => Family::Weibull,
        }
    }

    /// Positional parameters (excluding the shift), as accepted by [`Family::with_params`].
    pub fn params(&self) -> Vec<f64> {
        match *self {
            Distribution::Delta { value } => vec![value],
            Distribution::Uniform { a, b } => vec![a, b],
            Distribution::Normal { mu, sigma } => vec![mu, sigma],
            Distribution::Gamma { k, theta, .. } => vec![k, theta],
            Distribution::InverseGamma { alpha, beta, .. } => vec![alpha, beta],
            Distribution::Weibull { k, lambda, .. } => vec![k, lambda],
        }
    }

    /// Location shift of the positive families (zero for the others).
    pub fn shift(&self) -> f64 {
        match *self {
            Distribution::Gamma { shift, .. }
            | Distribution::InverseGamma { shift, .. }
            | Distribution::Weibull { shift, .. } => shift,
            _ => 0.0,
        }
    }

    /// True for a point mass.
    pub fn is_degenerate(&self) -> bool {
        matches!(self, Distribution::Delta { .. })
    }

    /// Quantile function. `p` is clamped to `[0, 1]`.
    pub fn quantile(&self, p: f64) -> f64 {
        let p = p.clamp(0.0, 1.0);
        match *self {
            Distribution::Delta { value } => value,
            Distribution::Uniform { a, b } => uniform::quantile(p, a, b),
            Distribution::Normal { mu, sigma } => normal::quantile(p, mu, sigma),
            Distribution::Gamma { k, theta, shift } => shift + gamma::quantile(p, k, theta),
            Distribution::InverseGamma { alpha, beta, shift } => {
                shift + inv_gamma::quantile(p, alpha, beta)
            }
            Distribution::Weibull { k, lambda, shift } => shift + weibull::quantile(p, k, lambda),
        }
    }

    /// Mean (infinite where the moment does not exist).
    pub fn mean(&self) -> f64 {
        match *self {
            Distribution::Delta { value } => value,
            Distribution::Uniform { a, b } => 0.5 * (a + b),
            Distribution::Normal { mu, .. } => mu,
            Distribution::Gamma { k, theta, shift } => shift + gamma::mean(k, theta),
            Distribution::InverseGamma { alpha, beta, shift } => shift + inv_gamma::mean(alpha, beta),
            Distribution::Weibull { k, lambda, shift } => shift + weibull::mean(k, lambda),
        }
    }

    /// Variance (infinite where the moment does not exist).
    pub fn variance(&self) -> f64 {
        match *self {
            Distribution::Delta { .. } => 0.0,
            Distribution::Uniform { a, b } => (b - a) * (b - a) / 12.0,
            Distribution::Normal { sigma, .. } => sigma * sigma,
            Distribution::Gamma { k, theta, .. } => gamma::variance(k, theta),
            Distribution::InverseGamma { alpha, beta, .. } => inv_gamma::variance(alpha, beta),
            Distribution::Weibull { k, lambda, .. } => weibull::variance(k, lambda),
        }
    }

    /// Distribution of `scale * X + offset` when the family is closed under that map.
    ///
    /// Delta, Uniform and Normal accept any non-zero scale; the positive families only a
    /// positive one. Returns `None` otherwise.
    pub fn affine(&self, scale: f64, offset: f64) -> Option<Distribution> {
        if scale == 0.0 || !scale.is_finite() || !offset.is_finite() {
            return None;
        }
        let d = match *self {
            Distribution::Delta { value } => Distribution::Delta { value: scale * value + offset },
            Distribution::Uniform { a, b } => {
                let (lo, hi) = if scale > 0.0 { (a, b) } else { (b, a) };
                Distribution::Uniform { a: scale * lo + offset, b: scale * hi + offset }
            }
            Distribution::Normal { mu, sigma } => {
                Distribution::Normal { mu: scale * mu + offset, sigma: scale.abs() * sigma }
            }
            _ if scale < 0.0 => return None,
            Distribution::Gamma { k, theta, shift } => {
                Distribution::Gamma { k, theta: scale * theta, shift: scale * shift + offset }
            }
            Distribution::InverseGamma { alpha, beta, shift } => Distribution::InverseGamma {
                alpha,
                beta: scale * beta,
                shift: scale * shift + offset,
            },
            Distribution::Weibull { k, lambda, shift } => {
                Distribution::Weibull { k, lambda: scale * lambda, shift: scale * shift + offset }
            }
        };
        // Rounding can collapse a tiny scaled parameter; treat that as "not closed".
        d.validate().ok().map(|_| d)
    }

    /// Draw one variate.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Result<f64> {
        Ok(match *self {
            Distribution::Delta { value } => value,
            Distribution::Uniform { a, b } => uniform::sample(rng, a, b),
            Distribution::Normal { mu, sigma } => normal::sample(rng, mu, sigma),
            Distribution::Gamma { k, theta, shift } => shift + gamma::sample(rng, k, theta)?,
            Distribution::InverseGamma { alpha, beta, shift } => {
                shift + inv_gamma::sample(rng, alpha, beta)?
            }
            Distribution::Weibull { k, lambda, shift } => shift + weibull::sample(rng, k, lambda),
        })
    }
}

impl Density for Distribution {
    fn pdf(&self, x: f64) -> f64 {
        match *self {
            Distribution::Delta { value } => delta::pdf(x, value),
            Distribution::Uniform { a, b } => uniform::pdf(x, a, b),
            Distribution::Normal { mu, sigma } => normal::pdf(x, mu, sigma),
            Distribution::Gamma { k, theta, shift } => gamma::pdf(x - shift, k, theta),
            Distribution::InverseGamma { alpha, beta, shift } => {
                inv_gamma::pdf(x - shift, alpha, beta)
            }
            Distribution::Weibull { k, lambda, shift } => weibull::pdf(x - shift, k, lambda),
        }
    }

    fn cdf(&self, x: f64) -> f64 {
        match *self {
            Distribution::Delta { value } => delta::cdf(x, value),
            Distribution::Uniform { a, b } => uniform::cdf(x, a, b),
            Distribution::Normal { mu, sigma } => normal::cdf(x, mu, sigma),
            Distribution::Gamma { k, theta, shift } => gamma::cdf(x - shift, k, theta),
            Distribution::InverseGamma { alpha, beta, shift } => {
                inv_gamma::cdf(x - shift, alpha, beta)
            }
            Distribution::Weibull { k, lambda, shift } => weibull::cdf(x - shift, k, lambda),
        }
    }

    fn support(&self, alpha: f64) -> (f64, f64) {
        match *self {
            Distribution::Delta { value } => (value, value),
            Distribution::Uniform { a, b } => (a, b),
            _ => (self.quantile(0.5 * alpha), self.quantile(1.0 - 0.5 * alpha)),
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Distribution::Delta { value } => write!(f, "Delta({})", value),
            Distribution::Uniform { a, b } => write!(f, "Uniform({}, {})", a, b),
            Distribution::Normal { mu, sigma } => write!(f, "Normal({}, {})", mu, sigma),
            Distribution::Gamma { k, theta, shift } => {
                write!(f, "Gamma({}, {}) + {}", k, theta, shift)
            }
            Distribution::InverseGamma { alpha, beta, shift } => {
                write!(f, "InverseGamma({}, {}) + {}", alpha, beta, shift)
            }
            Distribution::Weibull { k, lambda, shift } => {
                write!(f, "Weibull({}, {}) + {}", k, lambda, shift)
            }
        }
    }
}
