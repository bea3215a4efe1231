//! Probability building blocks for StochBB.
//!
//! This crate hosts the probability math the engine composes:
//! - the closed distribution families (pdf/cdf/quantile/moments/variates)
//! - [`Distribution`], the validated tagged variant over those families
//! - [`DensityGrid`], the discretised density used when no closed form exists
//! - [`Marginal`], the evaluation result (analytic or numeric)
//! - small numeric helpers (normal CDF, monotone inversion, validation)

pub mod math;
pub mod delta;
pub mod distributions;
pub mod gamma;
pub mod grid;
pub mod inv_gamma;
pub mod marginal;
pub mod normal;
pub mod uniform;
pub mod weibull;

pub use distributions::{Distribution, Family};
pub use grid::DensityGrid;
pub use marginal::Marginal;
