//! Grid planning: cell widths, lattices and mixtures of grids.

use log::warn;
use sbb_core::{Density, Method, Result};
use sbb_prob::{DensityGrid, Marginal};

use super::Ctx;

/// Relative slack when deciding whether two lattices line up.
const ALIGN_TOL: f64 = 1e-9;

/// Cell layout `lower + i * dx`, `i <= n`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Lattice {
    pub(crate) lower: f64,
    pub(crate) dx: f64,
    pub(crate) n: usize,
}

impl Lattice {
    /// Cells centred on `lo, lo + dx, ...` up to at least `hi`.
    pub(crate) fn covering(lo: f64, hi: f64, dx: f64) -> Lattice {
        let n = ((hi - lo).max(0.0) / dx).ceil() as usize + 1;
        Lattice { lower: lo - 0.5 * dx, dx, n }
    }

    /// Edge `i` (edge `n` is the upper bound).
    pub(crate) fn edge(&self, i: usize) -> f64 {
        self.lower + i as f64 * self.dx
    }

    pub(crate) fn upper(&self) -> f64 {
        self.edge(self.n)
    }

    /// Cell masses of `m` on this lattice.
    pub(crate) fn masses(&self, m: &Marginal) -> Vec<f64> {
        let mut prev = m.cdf(self.edge(0));
        (1..=self.n)
            .map(|i| {
                let next = m.cdf(self.edge(i));
                let mass = (next - prev).max(0.0);
                prev = next;
                mass
            })
            .collect()
    }

    /// CDF of `m` at every edge.
    pub(crate) fn edge_cdf(&self, m: &Marginal) -> Vec<f64> {
        (0..=self.n).map(|i| m.cdf(self.edge(i))).collect()
    }
}

/// Width of the cells for an operation whose result spans `total`.
///
/// `None` when every input is degenerate (no width to resolve).
pub(crate) fn cell_width(ctx: &Ctx<'_>, inputs: &[&Marginal], total: f64, cap: usize) -> Option<f64> {
    let alpha = ctx.config.tail_alpha;
    let narrowest = inputs
        .iter()
        .filter(|m| !m.is_degenerate())
        .map(|m| {
            let (lo, hi) = m.support(alpha);
            hi - lo
        })
        .filter(|w| w.is_finite() && *w > 0.0)
        .fold(f64::INFINITY, f64::min);
    if !narrowest.is_finite() {
        return None;
    }
    Some(capped(ctx, narrowest / ctx.config.resolution as f64, total, cap))
}

/// Coarsen `dx` until `total / dx` fits into `cap` cells.
pub(crate) fn capped(ctx: &Ctx<'_>, dx: f64, total: f64, cap: usize) -> f64 {
    if total.is_finite() && total / dx > cap as f64 {
        let coarse = total / cap as f64;
        warn!(
            "{}: grid of {:.0} cells exceeds {}, coarsening dx {:.3e} -> {:.3e}",
            ctx.name,
            total / dx,
            cap,
            dx,
            coarse
        );
        coarse
    } else {
        dx
    }
}

/// `m` discretised on cells of width `dx` over its `alpha` support.
pub(crate) fn grid_over(m: &Marginal, dx: f64, alpha: f64) -> Result<DensityGrid> {
    let (lo, hi) = m.support(alpha);
    let lat = Lattice::covering(lo, hi, dx);
    m.discretize(lat.lower, lat.dx, lat.n)
}

/// Weighted sum of grids on a common lattice (weights are not renormalised).
pub(crate) fn mixture(ctx: &Ctx<'_>, method: Method, parts: &[(f64, DensityGrid)]) -> Result<DensityGrid> {
    let Some((_, first)) = parts.first() else {
        return Err(ctx.fail(method, "every mixture component has zero weight"));
    };
    let mut dx = first.dx();
    let mut lower = first.lower();
    let mut upper = first.upper();
    for (_, g) in &parts[1..] {
        dx = dx.min(g.dx());
        lower = lower.min(g.lower());
        upper = upper.max(g.upper());
    }
    dx = capped(ctx, dx, upper - lower, ctx.config.max_grid_points);
    let n = (((upper - lower) / dx) - ALIGN_TOL).ceil().max(1.0) as usize;
    let mut out = vec![0.0f64; n];
    for (w, g) in parts {
        let offset = (g.lower() - lower) / dx;
        let aligned = (g.dx() - dx).abs() <= ALIGN_TOL * dx
            && (offset - offset.round()).abs() <= ALIGN_TOL * offset.abs().max(1.0);
        let masses = if aligned {
            g.masses()
        } else {
            let lat = Lattice { lower, dx, n };
            resampled_masses(g, &lat)?
        };
        let start = if aligned { offset.round() as usize } else { 0 };
        for (o, m) in out[start..].iter_mut().zip(masses) {
            *o += w * m;
        }
    }
    DensityGrid::from_masses(lower, dx, out)
}

fn resampled_masses(g: &DensityGrid, lat: &Lattice) -> Result<Vec<f64>> {
    Ok(g.resample(lat.lower, lat.dx, lat.n)?.masses())
}
