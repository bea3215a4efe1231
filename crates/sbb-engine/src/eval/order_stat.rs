//! Order statistics of independent children: minimum, maximum and join.

use sbb_core::{Density, Method, Result};
use sbb_prob::{DensityGrid, Distribution, Marginal};

use super::plan::{self, Lattice};
use super::Ctx;

/// Which end of the order statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Extreme {
    Min,
    Max,
}

/// Range of the extreme over the children's supports.
fn extreme_range(ctx: &Ctx<'_>, parts: &[Marginal], which: Extreme) -> (f64, f64) {
    let alpha = ctx.config.tail_alpha;
    let supports = parts.iter().map(|m| m.support(alpha));
    match which {
        Extreme::Min => supports.fold((f64::INFINITY, f64::INFINITY), |(a, b), (lo, hi)| {
            (a.min(lo), b.min(hi))
        }),
        Extreme::Max => supports.fold((f64::NEG_INFINITY, f64::NEG_INFINITY), |(a, b), (lo, hi)| {
            (a.max(lo), b.max(hi))
        }),
    }
}

/// CDF of the extreme at every lattice edge.
///
/// Minimum: `1 - prod S_i`. Maximum: `prod F_i`.
fn extreme_cdf(lat: &Lattice, parts: &[Marginal], which: Extreme) -> Vec<f64> {
    (0..=lat.n)
        .map(|i| {
            let x = lat.edge(i);
            match which {
                Extreme::Min => 1.0 - parts.iter().map(|m| m.survival(x)).product::<f64>(),
                Extreme::Max => parts.iter().map(|m| m.cdf(x)).product::<f64>(),
            }
        })
        .collect()
}

fn grid_from_cdf(lat: &Lattice, cdf: &[f64]) -> Result<DensityGrid> {
    let masses = cdf.windows(2).map(|w| (w[1] - w[0]).max(0.0)).collect();
    DensityGrid::from_masses(lat.lower, lat.dx, masses)
}

/// Minimum or maximum of independent marginals.
pub(super) fn extreme(ctx: &Ctx<'_>, parts: &[Marginal], which: Extreme) -> Result<Marginal> {
    let (lo, hi) = extreme_range(ctx, parts, which);
    if hi <= lo {
        return Ok(Marginal::Analytic(Distribution::delta(lo)?));
    }
    let refs: Vec<&Marginal> = parts.iter().collect();
    let dx = plan::cell_width(ctx, &refs, hi - lo, ctx.config.max_grid_points)
        .unwrap_or((hi - lo) / ctx.config.resolution as f64);
    let lat = Lattice::covering(lo, hi, dx);
    let cdf = extreme_cdf(&lat, parts, which);
    let grid = ctx.within(Method::OrderStatistic, grid_from_cdf(&lat, &cdf))?;
    ctx.checked(Method::OrderStatistic, grid)
}

/// Join outputs in port order: last arrival, first arrival, slack (last minus first).
///
/// The slack comes from the joint law of (first, last): with
/// `H(a, b) = prod_i P(e_a < X_i <= e_b)`, the probability that the first arrival falls in
/// cell `a` and the last in cell `b` is an inclusion-exclusion over four values of `H`.
pub(super) fn join(ctx: &Ctx<'_>, parts: &[Marginal]) -> Result<Vec<Marginal>> {
    if parts.iter().all(Marginal::is_degenerate) {
        let means: Vec<f64> = parts.iter().map(Marginal::mean).collect();
        let first = means.iter().copied().fold(f64::INFINITY, f64::min);
        let last = means.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        return Ok(vec![
            Marginal::Analytic(Distribution::delta(last)?),
            Marginal::Analytic(Distribution::delta(first)?),
            Marginal::Analytic(Distribution::delta(last - first)?),
        ]);
    }

    let (lo, _) = extreme_range(ctx, parts, Extreme::Min);
    let (_, hi) = extreme_range(ctx, parts, Extreme::Max);
    let refs: Vec<&Marginal> = parts.iter().collect();
    let dx = plan::cell_width(ctx, &refs, hi - lo, ctx.config.max_joint_side())
        .unwrap_or((hi - lo) / ctx.config.resolution as f64);
    let lat = Lattice::covering(lo, hi, dx);
    let n = lat.n;

    let last = grid_from_cdf(&lat, &extreme_cdf(&lat, parts, Extreme::Max));
    let first = grid_from_cdf(&lat, &extreme_cdf(&lat, parts, Extreme::Min));
    let last = ctx.checked(Method::OrderStatistic, ctx.within(Method::OrderStatistic, last)?)?;
    let first = ctx.checked(Method::OrderStatistic, ctx.within(Method::OrderStatistic, first)?)?;

    let edge_cdfs: Vec<Vec<f64>> = parts.iter().map(|m| lat.edge_cdf(m)).collect();
    let h = |a: usize, b: usize| -> f64 {
        if b <= a {
            return 0.0;
        }
        edge_cdfs.iter().map(|f| (f[b] - f[a]).max(0.0)).product()
    };
    let mut slack = vec![0.0f64; n];
    for a in 0..n {
        for b in a..n {
            let p = h(a, b + 1) - h(a + 1, b + 1) - h(a, b) + h(a + 1, b);
            if p > 0.0 {
                slack[b - a] += p;
            }
        }
    }
    let slack = ctx.within(Method::OrderStatistic, DensityGrid::from_masses(-0.5 * dx, dx, slack))?;
    let slack = ctx.checked(Method::OrderStatistic, slack)?;
    Ok(vec![last, first, slack])
}
