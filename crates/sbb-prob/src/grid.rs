//! Discretised densities on a uniform, cell-centred grid.
//!
//! Cell `i` covers `[lower + i*dx, lower + (i+1)*dx)` and holds a constant density
//! `values[i]`, so the PDF is piecewise constant and the CDF piecewise linear. Grids are built
//! from exact cell masses (CDF differences), which handles point masses and truncated tails
//! the same way as smooth densities.

use rand::Rng;
use sbb_core::{Density, Error, Result};

/// Relative tolerance when comparing cell widths of two grids.
const DX_REL_TOL: f64 = 1e-9;

/// Piecewise-constant density on a uniform grid.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityGrid {
    lower: f64,
    dx: f64,
    values: Vec<f64>,
    /// `cumulative[j]` = mass of cells `0..j` (length `values.len() + 1`).
    cumulative: Vec<f64>,
}

impl DensityGrid {
    /// Construct from density values.
    pub fn new(lower: f64, dx: f64, values: Vec<f64>) -> Result<Self> {
        if !lower.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "DensityGrid lower must be finite, got {lower}"
            )));
        }
        if !dx.is_finite() || dx <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "DensityGrid dx must be finite and > 0, got {dx}"
            )));
        }
        if values.is_empty() {
            return Err(Error::InvalidParameter("DensityGrid requires at least 1 cell".into()));
        }
        for (i, v) in values.iter().enumerate() {
            if !v.is_finite() || *v < 0.0 {
                return Err(Error::InvalidParameter(format!(
                    "DensityGrid values[{i}] must be finite and >= 0, got {v}"
                )));
            }
        }
        let mut cumulative = Vec::with_capacity(values.len() + 1);
        let mut acc = 0.0f64;
        cumulative.push(acc);
        for v in &values {
            acc += v * dx;
            cumulative.push(acc);
        }
        Ok(Self { lower, dx, values, cumulative })
    }

    /// Construct from per-cell probability masses.
    pub fn from_masses(lower: f64, dx: f64, masses: Vec<f64>) -> Result<Self> {
        let inv_dx = 1.0 / dx;
        let values = masses.into_iter().map(|m| m * inv_dx).collect();
        Self::new(lower, dx, values)
    }

    /// Discretise any density onto `n` cells starting at `lower`, using exact cell masses.
    pub fn discretize<D: Density + ?Sized>(density: &D, lower: f64, dx: f64, n: usize) -> Result<Self> {
        if n == 0 {
            return Err(Error::InvalidParameter("DensityGrid requires at least 1 cell".into()));
        }
        let mut prev = density.cdf(lower);
        let mut masses = Vec::with_capacity(n);
        for i in 0..n {
            let next = density.cdf(lower + (i + 1) as f64 * dx);
            masses.push((next - prev).max(0.0));
            prev = next;
        }
        Self::from_masses(lower, dx, masses)
    }

    /// Left edge of the first cell.
    pub fn lower(&self) -> f64 {
        self.lower
    }

    /// Right edge of the last cell.
    pub fn upper(&self) -> f64 {
        self.lower + self.values.len() as f64 * self.dx
    }

    /// Cell width.
    pub fn dx(&self) -> f64 {
        self.dx
    }

    /// Density per cell.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false for a constructed grid; kept for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Centre of cell `i`.
    pub fn centre(&self, i: usize) -> f64 {
        self.lower + (i as f64 + 0.5) * self.dx
    }

    /// Probability mass per cell.
    pub fn masses(&self) -> Vec<f64> {
        self.values.iter().map(|v| v * self.dx).collect()
    }

    /// Total probability mass.
    pub fn mass(&self) -> f64 {
        self.cumulative[self.values.len()]
    }

    /// Mean, treating each cell as uniform.
    pub fn mean(&self) -> f64 {
        let total = self.mass();
        if total <= 0.0 {
            return f64::NAN;
        }
        let s: f64 = self.values.iter().enumerate().map(|(i, v)| self.centre(i) * v * self.dx).sum();
        s / total
    }

    /// Variance, including the within-cell `dx²/12` term.
    pub fn variance(&self) -> f64 {
        let total = self.mass();
        if total <= 0.0 {
            return f64::NAN;
        }
        let m = self.mean();
        let s: f64 = self
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let d = self.centre(i) - m;
                d * d * v * self.dx
            })
            .sum();
        s / total + self.dx * self.dx / 12.0
    }

    /// Quantile by linear interpolation of the CDF inside the hit cell.
    pub fn quantile(&self, p: f64) -> f64 {
        let total = self.mass();
        let target = p.clamp(0.0, 1.0) * total;
        if target <= 0.0 {
            // First cell carrying mass.
            let first = self.values.iter().position(|v| *v > 0.0).unwrap_or(0);
            return self.lower + first as f64 * self.dx;
        }
        if target >= total {
            let last = self.values.iter().rposition(|v| *v > 0.0).unwrap_or(self.values.len() - 1);
            return self.lower + (last + 1) as f64 * self.dx;
        }
        // Number of cumulative entries strictly below target; cell index is one less.
        let k = self.cumulative.partition_point(|c| *c < target);
        let i = k.saturating_sub(1).min(self.values.len() - 1);
        let cell_mass = self.values[i] * self.dx;
        let frac = if cell_mass > 0.0 { (target - self.cumulative[i]) / cell_mass } else { 0.0 };
        self.lower + (i as f64 + frac.clamp(0.0, 1.0)) * self.dx
    }

    /// Inverse-CDF variate (binary search over the cumulative masses).
    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        let u: f64 = rng.random();
        self.quantile(u)
    }

    /// Distribution of the sum of two independent grids sharing a cell width.
    ///
    /// The sum of cell centres `c_i + c_j` becomes the centre of result cell `i + j`, so the
    /// result starts at `lower_a + lower_b + dx/2`.
    pub fn convolve(&self, other: &DensityGrid) -> Result<DensityGrid> {
        self.check_same_dx(other)?;
        let a = self.masses();
        let b = other.masses();
        let mut out = vec![0.0f64; a.len() + b.len() - 1];
        for (i, &ai) in a.iter().enumerate() {
            if ai == 0.0 {
                continue;
            }
            for (o, &bj) in out[i..i + b.len()].iter_mut().zip(&b) {
                *o += ai * bj;
            }
        }
        DensityGrid::from_masses(self.lower + other.lower + 0.5 * self.dx, self.dx, out)
    }

    /// Distribution of `scale * X + offset`.
    pub fn affine(&self, scale: f64, offset: f64) -> Result<DensityGrid> {
        if !scale.is_finite() || scale == 0.0 {
            return Err(Error::InvalidParameter(format!(
                "affine scale must be finite and non-zero, got {scale}"
            )));
        }
        let inv = 1.0 / scale.abs();
        if scale > 0.0 {
            let values = self.values.iter().map(|v| v * inv).collect();
            DensityGrid::new(scale * self.lower + offset, scale * self.dx, values)
        } else {
            let values = self.values.iter().rev().map(|v| v * inv).collect();
            DensityGrid::new(scale * self.upper() + offset, -scale * self.dx, values)
        }
    }

    /// Re-discretise onto another grid.
    pub fn resample(&self, lower: f64, dx: f64, n: usize) -> Result<DensityGrid> {
        if self.lower == lower && self.dx == dx && self.values.len() == n {
            return Ok(self.clone());
        }
        DensityGrid::discretize(self, lower, dx, n)
    }

    /// Drop leading and trailing cells whose mass is below `eps`.
    ///
    /// Keeps at least one cell.
    pub fn trimmed(&self, eps: f64) -> DensityGrid {
        let keep = |v: &f64| v * self.dx > eps;
        let first = match self.values.iter().position(keep) {
            Some(i) => i,
            None => return self.clone(),
        };
        let last = self.values.iter().rposition(keep).unwrap_or(first);
        if first == 0 && last + 1 == self.values.len() {
            return self.clone();
        }
        let values = self.values[first..=last].to_vec();
        let lower = self.lower + first as f64 * self.dx;
        // Values were already validated.
        let mut cumulative = Vec::with_capacity(values.len() + 1);
        let mut acc = 0.0;
        cumulative.push(acc);
        for v in &values {
            acc += v * self.dx;
            cumulative.push(acc);
        }
        DensityGrid { lower, dx: self.dx, values, cumulative }
    }

    fn check_same_dx(&self, other: &DensityGrid) -> Result<()> {
        if (self.dx - other.dx).abs() > DX_REL_TOL * self.dx.max(other.dx) {
            return Err(Error::InvalidParameter(format!(
                "grids must share a cell width, got {} and {}",
                self.dx, other.dx
            )));
        }
        Ok(())
    }

    fn cell_of(&self, x: f64) -> Option<usize> {
        if !(x >= self.lower) {
            return None;
        }
        let i = ((x - self.lower) / self.dx).floor() as usize;
        (i < self.values.len()).then_some(i)
    }
}

impl Density for DensityGrid {
    fn pdf(&self, x: f64) -> f64 {
        self.cell_of(x).map_or(0.0, |i| self.values[i])
    }

    fn cdf(&self, x: f64) -> f64 {
        if x <= self.lower {
            return 0.0;
        }
        match self.cell_of(x) {
            Some(i) => {
                let frac = (x - self.lower) / self.dx - i as f64;
                (self.cumulative[i] + frac * self.values[i] * self.dx).min(1.0)
            }
            None => self.mass().min(1.0),
        }
    }

    fn support(&self, alpha: f64) -> (f64, f64) {
        (self.quantile(0.5 * alpha), self.quantile(1.0 - 0.5 * alpha))
    }
}
