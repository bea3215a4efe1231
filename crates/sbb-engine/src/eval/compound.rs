//! Compound distributions: mixtures over random parameters.
//!
//! Every random parameter is discretised into equal-width cells over its support and
//! represented by the cell centres, weighted by the cell masses. The mixture CDF at each output
//! edge is the weighted sum of the component CDFs over the cartesian product of parameter
//! nodes. Parameter cells are halved until the output cell masses move by less than the
//! tolerance (L1).

use log::debug;
use rayon::prelude::*;
use sbb_core::{Density, Error, Method, Result};
use sbb_prob::{DensityGrid, Distribution, Family, Marginal};

use super::plan::{self, Lattice};
use super::{Ctx, port_marginal};
use crate::var::Param;

/// One parameter of the family.
enum Axis {
    Known(f64),
    Random { marginal: Marginal, lo: f64, hi: f64 },
}

impl Axis {
    /// `(value, weight)` nodes for `cells` equal cells.
    fn nodes(&self, cells: usize) -> Vec<(f64, f64)> {
        match self {
            Axis::Known(v) => vec![(*v, 1.0)],
            Axis::Random { marginal, lo, hi } => {
                let w = (hi - lo) / cells as f64;
                let mut prev = marginal.cdf(*lo);
                (0..cells)
                    .map(|j| {
                        let next = marginal.cdf(lo + (j + 1) as f64 * w);
                        let node = (lo + (j as f64 + 0.5) * w, (next - prev).max(0.0));
                        prev = next;
                        node
                    })
                    .collect()
            }
        }
    }

    /// Values used to find the output range: the nodes plus both support ends.
    fn points(&self, cells: usize) -> Vec<f64> {
        match self {
            Axis::Known(v) => vec![*v],
            Axis::Random { lo, hi, .. } => {
                let mut out = vec![*lo];
                out.extend(self.nodes(cells).into_iter().map(|(v, _)| v));
                out.push(*hi);
                out
            }
        }
    }
}

/// Cartesian product of per-axis items.
fn product<T: Clone>(axes: &[Vec<T>]) -> Vec<Vec<T>> {
    axes.iter().fold(vec![Vec::new()], |acc, items| {
        acc.iter()
            .flat_map(|prefix| {
                items.iter().map(move |item| {
                    let mut next = prefix.clone();
                    next.push(item.clone());
                    next
                })
            })
            .collect()
    })
}

/// Valid components and the weight of invalid parameter combinations.
fn components(family: Family, axes: &[Axis], cells: usize) -> (Vec<(Distribution, f64)>, f64) {
    let nodes: Vec<Vec<(f64, f64)>> = axes.iter().map(|a| a.nodes(cells)).collect();
    let mut valid = Vec::new();
    let mut invalid = 0.0;
    for combo in product(&nodes) {
        let weight: f64 = combo.iter().map(|(_, w)| w).product();
        if weight <= 0.0 {
            continue;
        }
        let values: Vec<f64> = combo.iter().map(|(v, _)| *v).collect();
        match family.with_params(&values) {
            Ok(d) => valid.push((d, weight)),
            Err(_) => invalid += weight,
        }
    }
    (valid, invalid)
}

/// Mixture cell masses on `lat`.
fn mixture_masses(lat: &Lattice, parts: &[(Distribution, f64)]) -> Vec<f64> {
    let cdf: Vec<f64> = (0..=lat.n)
        .into_par_iter()
        .map(|i| {
            let x = lat.edge(i);
            parts.iter().map(|(d, w)| w * d.cdf(x)).sum()
        })
        .collect();
    cdf.windows(2).map(|w| (w[1] - w[0]).max(0.0)).collect()
}

/// Density of `family` whose parameters are (partly) random.
pub(super) fn mixture(ctx: &Ctx<'_>, family: Family, params: &[Param]) -> Result<Marginal> {
    let cfg = ctx.config;
    let alpha = cfg.tail_alpha;
    let mut axes = Vec::with_capacity(params.len());
    for p in params {
        axes.push(match p {
            Param::Fixed(v) => Axis::Known(*v),
            Param::Random(v) => {
                let marginal = port_marginal(v)?;
                let (lo, hi) = marginal.support(alpha);
                if marginal.is_degenerate() || hi <= lo {
                    Axis::Known(marginal.mean())
                } else {
                    Axis::Random { marginal, lo, hi }
                }
            }
        });
    }
    let random = axes.iter().filter(|a| matches!(a, Axis::Random { .. })).count();
    if random == 0 {
        let values: Vec<f64> = axes
            .iter()
            .map(|a| match a {
                Axis::Known(v) => *v,
                Axis::Random { marginal, .. } => marginal.mean(),
            })
            .collect();
        return family.with_params(&values).map(Marginal::Analytic).map_err(|e| {
            Error::UnsupportedCombination(format!("{}: {} with {:?}: {}", ctx.name, family, values, e))
        });
    }

    // Output lattice, fixed from the coarsest level.
    let points: Vec<Vec<f64>> = axes.iter().map(|a| a.points(cfg.compound_nodes)).collect();
    let (mut lo, mut hi, mut narrowest) = (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY);
    for values in product(&points) {
        if let Ok(d) = family.with_params(&values) {
            let (a, b) = d.support(alpha);
            lo = lo.min(a);
            hi = hi.max(b);
            if b > a {
                narrowest = narrowest.min(b - a);
            }
        }
    }
    if !(lo.is_finite() && hi.is_finite()) {
        return Err(Error::UnsupportedCombination(format!(
            "{}: no {} parameter combination is valid",
            ctx.name, family
        )));
    }
    let dx = if narrowest.is_finite() {
        plan::capped(ctx, narrowest / cfg.resolution as f64, hi - lo, cfg.max_grid_points)
    } else {
        ((hi - lo) / cfg.resolution as f64).max(f64::MIN_POSITIVE)
    };
    let lat = Lattice::covering(lo, hi, dx);

    let level = |l: usize| -> Result<Vec<f64>> {
        let cells = cfg.compound_nodes << l;
        let combos = cells.checked_pow(random as u32).unwrap_or(usize::MAX);
        if combos > cfg.max_joint_points {
            return Err(ctx.fail(
                Method::Compound,
                format!("{} parameter combinations exceed the budget of {}", combos, cfg.max_joint_points),
            ));
        }
        let (parts, invalid) = components(family, &axes, cells);
        if invalid > cfg.tolerance {
            return Err(Error::UnsupportedCombination(format!(
                "{}: random {} parameters leave the family's domain with probability {:.3e}",
                ctx.name, family, invalid
            )));
        }
        Ok(mixture_masses(&lat, &parts))
    };

    let mut masses = level(0)?;
    let mut converged = cfg.max_refinements == 0;
    let mut change = f64::NAN;
    for l in 1..=cfg.max_refinements {
        let finer = level(l)?;
        change = finer.iter().zip(&masses).map(|(a, b)| (a - b).abs()).sum();
        debug!("{}: compound level {} ({} nodes), L1 change {:.3e}", ctx.name, l, cfg.compound_nodes << l, change);
        masses = finer;
        if change < cfg.tolerance {
            converged = true;
            break;
        }
    }
    if !converged {
        return Err(ctx.fail(
            Method::Compound,
            format!(
                "mixture did not converge after {} refinements (L1 change {:.3e} >= {})",
                cfg.max_refinements, change, cfg.tolerance
            ),
        ));
    }
    let grid = ctx.within(Method::Compound, DensityGrid::from_masses(lat.lower, lat.dx, masses))?;
    ctx.checked(Method::Compound, grid)
}
