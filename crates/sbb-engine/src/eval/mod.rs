//! Numeric evaluation.
//!
//! Nodes are evaluated children first, in an explicit post-order over the nodes that have no
//! cached result yet. Every node stores one marginal per output port in a write-once cell, so
//! a shared sub-expression is evaluated once no matter how many parents reach it, and later
//! requests are answered from the cache.
//!
//! Closed forms stay analytic; everything else becomes a [`DensityGrid`] built from exact cell
//! masses. Grids whose mass drifts from 1 by more than the configured tolerance are rejected
//! rather than renormalised.

mod compound;
mod convolve;
mod inhibition;
mod mixture;
mod order_stat;
pub(crate) mod plan;

use std::sync::atomic::Ordering;
use std::time::Instant;

use log::{debug, warn};
use sbb_core::{Density, Error, Method, Result};
use sbb_prob::{DensityGrid, Marginal};

use crate::config::EvalConfig;
use crate::graph::Graph;
use crate::var::{Kind, Node, Var, post_order};

/// Per-node evaluation context: where errors point and which knobs apply.
pub(crate) struct Ctx<'a> {
    pub(crate) name: String,
    pub(crate) config: &'a EvalConfig,
}

impl<'a> Ctx<'a> {
    pub(crate) fn new(node: &Node, config: &'a EvalConfig) -> Self {
        Self { name: node.describe(), config }
    }

    pub(crate) fn fail(&self, method: Method, reason: impl Into<String>) -> Error {
        Error::Evaluation { node: self.name.clone(), method, reason: reason.into() }
    }

    /// Re-label grid construction errors as evaluation failures of this node.
    pub(crate) fn within<T>(&self, method: Method, r: Result<T>) -> Result<T> {
        r.map_err(|e| match e {
            Error::InvalidParameter(reason) => self.fail(method, reason),
            other => other,
        })
    }

    /// Mass check; the accepted grid loses its empty border cells.
    pub(crate) fn checked(&self, method: Method, grid: DensityGrid) -> Result<Marginal> {
        let mass = grid.mass();
        if !mass.is_finite() || (mass - 1.0).abs() > self.config.tolerance {
            return Err(self.fail(
                method,
                format!(
                    "grid mass {:.6} deviates from 1 by more than {} ({} cells, dx {:.3e})",
                    mass,
                    self.config.tolerance,
                    grid.len(),
                    grid.dx()
                ),
            ));
        }
        Ok(Marginal::from(grid.trimmed(0.0)))
    }
}

/// Marginal of the port `var` selects; the node must be evaluated.
pub(crate) fn port_marginal(var: &Var) -> Result<Marginal> {
    let kind = var.node.defined_kind()?;
    let fail = |reason: &str| Error::Evaluation {
        node: var.node.describe(),
        method: Method::Lookup,
        reason: format!("port {}: {}", var.port, reason),
    };
    let cache = var.node.cache.get().ok_or_else(|| fail("node has not been evaluated"))?;
    let idx = kind
        .ports()
        .iter()
        .position(|p| *p == var.port)
        .ok_or_else(|| fail("no such port"))?;
    match cache.get(idx) {
        Some(Some(m)) => Ok(m.clone()),
        _ => Err(fail("conditioning event has zero probability")),
    }
}

impl Graph {
    /// Marginal distribution of `var`.
    ///
    /// Reduces first when `reduce_before_eval` is set. Results are cached on the nodes, so
    /// repeated calls (and shared children) cost nothing after the first evaluation.
    pub fn evaluate(&self, var: &Var) -> Result<Marginal> {
        let target = self.prepare(var)?;
        self.fill_caches(&target)?;
        port_marginal(&target)
    }

    /// Probability that `x` finishes first in an inhibition or conditional node (ties split
    /// evenly).
    pub fn win_probability(&self, var: &Var) -> Result<f64> {
        let target = self.prepare(var)?;
        let (x, y) = match target.kind() {
            Some(Kind::Inhibition { x, y, .. }) | Some(Kind::Conditional { x, y, .. }) => (x, y),
            _ => {
                return Err(Error::InvalidParameter(format!(
                    "win probability needs an inhibition or conditional node, got {}",
                    target
                )));
            }
        };
        self.fill_caches(x)?;
        self.fill_caches(y)?;
        let ctx = Ctx::new(&target.node, &self.config);
        let race = inhibition::Race::new(&ctx, &port_marginal(x)?, &port_marginal(y)?)?;
        Ok(race.p_x())
    }

    /// The variable evaluation and sampling act on.
    pub(crate) fn prepare(&self, var: &Var) -> Result<Var> {
        if self.config.reduce_before_eval { self.reduce(var) } else { Ok(var.clone()) }
    }

    fn fill_caches(&self, root: &Var) -> Result<()> {
        let pending = post_order(&root.node, |n| n.cache.get().is_some())?;
        for node in pending {
            let started = Instant::now();
            let kind = node.defined_kind()?;
            let ctx = Ctx::new(&node, &self.config);
            let outputs = evaluate_kind(&ctx, kind)?;
            if node.cache.set(outputs).is_ok() {
                node.evaluations.fetch_add(1, Ordering::Relaxed);
                debug!("evaluated {} ({}) in {:?}", ctx.name, kind.tag().name(), started.elapsed());
            }
        }
        Ok(())
    }
}

fn evaluate_kind(ctx: &Ctx<'_>, kind: &Kind) -> Result<Vec<Option<Marginal>>> {
    let one = |m: Marginal| vec![Some(m)];
    let marginals = |cs: &[Var]| cs.iter().map(port_marginal).collect::<Result<Vec<_>>>();
    if !matches!(kind, Kind::Atomic(_) | Kind::Affine { .. } | Kind::Mixture { .. }) {
        warn!("{}: no closed form, falling back to numeric {}", ctx.name, kind.tag().name());
    }
    Ok(match kind {
        Kind::Atomic(d) => one(Marginal::Analytic(*d)),
        Kind::Affine { child, scale, offset } => {
            one(affine(ctx, &port_marginal(child)?, *scale, *offset)?)
        }
        Kind::Convolution(cs) => one(convolve::sum(ctx, &summands(ctx, cs)?)?),
        Kind::Minimum(cs) => one(order_stat::extreme(ctx, &marginals(cs)?, order_stat::Extreme::Min)?),
        Kind::Maximum(cs) => one(order_stat::extreme(ctx, &marginals(cs)?, order_stat::Extreme::Max)?),
        Kind::Join(cs) => order_stat::join(ctx, &marginals(cs)?)?.into_iter().map(Some).collect(),
        Kind::Inhibition { x, y, continuations } => {
            let x = port_marginal(x)?;
            let y = port_marginal(y)?;
            let cont = match continuations {
                Some((a, b)) => Some((port_marginal(a)?, port_marginal(b)?)),
                None => None,
            };
            inhibition::evaluate(ctx, &x, &y, cont.as_ref())?
        }
        Kind::Compound { family, params } => one(compound::mixture(ctx, *family, params)?),
        Kind::Mixture { weights, children } => one(mixture::mixture(ctx, weights, &marginals(children)?)?),
        Kind::Conditional { x, y, on_x, on_y } => one(mixture::conditional(
            ctx,
            &port_marginal(x)?,
            &port_marginal(y)?,
            &port_marginal(on_x)?,
            &port_marginal(on_y)?,
        )?),
    })
}

/// Marginals of the distinct summands; a child listed `n` times is one draw scaled by `n`.
fn summands(ctx: &Ctx<'_>, children: &[Var]) -> Result<Vec<Marginal>> {
    let mut counts: Vec<(&Var, usize)> = Vec::with_capacity(children.len());
    for c in children {
        match counts.iter_mut().find(|(v, _)| *v == c) {
            Some((_, n)) => *n += 1,
            None => counts.push((c, 1)),
        }
    }
    counts
        .into_iter()
        .map(|(v, n)| {
            let m = port_marginal(v)?;
            if n == 1 { Ok(m) } else { affine(ctx, &m, n as f64, 0.0) }
        })
        .collect()
}

/// `scale * X + offset`: closed form when the family allows it, else a transformed grid.
fn affine(ctx: &Ctx<'_>, child: &Marginal, scale: f64, offset: f64) -> Result<Marginal> {
    if let Some(d) = child.as_distribution().and_then(|d| d.affine(scale, offset)) {
        return Ok(Marginal::Analytic(d));
    }
    if child.is_analytic() {
        warn!("{}: no closed form, falling back to numeric affine", ctx.name);
    }
    let grid = match child {
        Marginal::Grid(g) => (**g).clone(),
        Marginal::Analytic(_) => {
            let (lo, hi) = child.support(ctx.config.tail_alpha);
            let dx = plan::cell_width(ctx, &[child], hi - lo, ctx.config.max_grid_points)
                .unwrap_or(1.0);
            ctx.within(Method::Affine, plan::grid_over(child, dx, ctx.config.tail_alpha))?
        }
    };
    let out = ctx.within(Method::Affine, grid.affine(scale, offset))?;
    ctx.checked(Method::Affine, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sbb_prob::Distribution;

    use crate::var::Port;

    #[test]
    fn test_atomic_stays_analytic() {
        let g = Graph::new();
        let x = g.gamma(2.0, 3.0).unwrap();
        let m = g.evaluate(&x).unwrap();
        assert_eq!(m.as_distribution(), Some(&Distribution::gamma(2.0, 3.0).unwrap()));
        assert_eq!(x.evaluations(), 1);
        g.evaluate(&x).unwrap();
        assert_eq!(x.evaluations(), 1);
    }

    #[test]
    fn test_negative_affine_of_gamma_is_numeric() {
        let g = Graph::new();
        let x = g.gamma(2.0, 1.0).unwrap();
        let y = g.affine(&x, -1.0, 0.0).unwrap();
        let m = g.evaluate(&y).unwrap();
        assert!(!m.is_analytic());
        assert_relative_eq!(m.mass(), 1.0, epsilon = 1e-3);
        assert_relative_eq!(m.mean(), -2.0, epsilon = 1e-2);
    }

    #[test]
    fn test_undefined_placeholder_is_lookup_error() {
        let g = Graph::new();
        let p = g.placeholder("later");
        let x = g.uniform(0.0, 1.0).unwrap();
        let c = g.convolution(&[x, p]).unwrap();
        let err = g.evaluate(&c).unwrap_err();
        assert!(matches!(err, Error::Evaluation { method: Method::Lookup, .. }));
    }

    #[test]
    fn test_repeated_summand_is_scaled_not_convolved() {
        let g = Graph::with_config(EvalConfig { reduce_before_eval: false, ..Default::default() }).unwrap();
        let u = g.uniform(0.0, 1.0).unwrap();
        let twice = g.convolution(&[u.clone(), u.clone()]).unwrap();
        let m = g.evaluate(&twice).unwrap();
        // 2U is U(0, 2); two independent draws would be triangular.
        assert_eq!(m.as_distribution(), Some(&Distribution::uniform(0.0, 2.0).unwrap()));
        assert_eq!(u.evaluations(), 1);
    }

    #[test]
    fn test_conditional_win_probability() {
        let g = Graph::new();
        let x = g.exponential(1.0).unwrap();
        let y = g.exponential(3.0).unwrap();
        let a = g.delta(1.0).unwrap();
        let b = g.delta(2.0).unwrap();
        let pick = g.conditional(&x, &y, &a, &b).unwrap();
        assert_relative_eq!(g.win_probability(&pick).unwrap(), 0.25, epsilon = 2e-3);
        let m = g.evaluate(&pick).unwrap();
        assert_relative_eq!(m.mean(), 0.25 * 1.0 + 0.75 * 2.0, epsilon = 1e-2);
    }

    #[test]
    fn test_win_probability_requires_inhibition() {
        let g = Graph::new();
        let x = g.uniform(0.0, 1.0).unwrap();
        assert!(matches!(g.win_probability(&x), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_zero_probability_port_is_an_error() {
        let g = Graph::new();
        let early = g.uniform(0.0, 1.0).unwrap();
        let late = g.uniform(5.0, 6.0).unwrap();
        let race = g.inhibition(&early, &late).unwrap();
        assert!(g.evaluate(&race.port(Port::XWins).unwrap()).is_ok());
        let err = g.evaluate(&race.port(Port::YWins).unwrap()).unwrap_err();
        assert!(matches!(err, Error::Evaluation { method: Method::Lookup, .. }));
    }
}
