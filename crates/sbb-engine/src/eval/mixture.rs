//! Weighted choices among variables: explicit mixtures and race-selected branches.
//!
//! Components are discretised on one cell width (the narrowest component's, capped) and summed
//! with their weights. A conditional is the mixture of its branches weighted by the win
//! probabilities of its race.

use sbb_core::{Density, Method, Result};
use sbb_prob::Marginal;

use super::inhibition::Race;
use super::{Ctx, plan};

/// `sum_i w_i * parts_i` with weights normalised to one; zero-weight parts are ignored.
fn blend(ctx: &Ctx<'_>, method: Method, parts: &[(f64, &Marginal)]) -> Result<Marginal> {
    let total: f64 = parts.iter().map(|(w, _)| *w).sum();
    let live: Vec<(f64, &Marginal)> =
        parts.iter().filter(|(w, _)| *w > 0.0).map(|(w, m)| (*w / total, *m)).collect();
    if let [(_, only)] = live.as_slice() {
        return Ok((*only).clone());
    }
    let alpha = ctx.config.tail_alpha;
    let inputs: Vec<&Marginal> = live.iter().map(|(_, m)| *m).collect();
    let (lo, hi) = inputs.iter().map(|m| m.support(alpha)).fold(
        (f64::INFINITY, f64::NEG_INFINITY),
        |(lo, hi), (l, h)| (lo.min(l), hi.max(h)),
    );
    let dx = plan::cell_width(ctx, &inputs, hi - lo, ctx.config.max_grid_points)
        .unwrap_or_else(|| if hi > lo { (hi - lo) / ctx.config.resolution as f64 } else { 1.0 });
    let mut grids = Vec::with_capacity(live.len());
    for (w, m) in &live {
        grids.push((*w, ctx.within(method, plan::grid_over(m, dx, alpha))?));
    }
    let grid = ctx.within(method, plan::mixture(ctx, method, &grids))?;
    ctx.checked(method, grid)
}

/// Child `i` with probability `weights[i] / sum(weights)`.
pub(super) fn mixture(ctx: &Ctx<'_>, weights: &[f64], parts: &[Marginal]) -> Result<Marginal> {
    let parts: Vec<(f64, &Marginal)> = weights.iter().copied().zip(parts).collect();
    blend(ctx, Method::Mixture, &parts)
}

/// `on_x` if `x` finishes first, otherwise `on_y`; ties split evenly.
pub(super) fn conditional(
    ctx: &Ctx<'_>,
    x: &Marginal,
    y: &Marginal,
    on_x: &Marginal,
    on_y: &Marginal,
) -> Result<Marginal> {
    let race = Race::new(ctx, x, y)?;
    let p_x = race.p_x().clamp(0.0, 1.0);
    blend(ctx, Method::Conditional, &[(p_x, on_x), (1.0 - p_x, on_y)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvalConfig;
    use crate::var::Node;
    use approx::assert_relative_eq;
    use sbb_prob::Distribution;

    fn m(d: sbb_core::Result<Distribution>) -> Marginal {
        d.unwrap().into()
    }

    #[test]
    fn test_mixture_of_separated_uniforms() {
        let node = Node::new("mix".into(), None);
        let config = EvalConfig::default();
        let ctx = Ctx::new(&node, &config);
        let out = mixture(
            &ctx,
            &[1.0, 3.0],
            &[m(Distribution::uniform(0.0, 1.0)), m(Distribution::uniform(2.0, 4.0))],
        )
        .unwrap();
        assert_relative_eq!(out.mass(), 1.0, epsilon = 1e-3);
        assert_relative_eq!(out.mean(), 0.25 * 0.5 + 0.75 * 3.0, epsilon = 1e-2);
        assert_relative_eq!(out.cdf(1.5), 0.25, epsilon = 1e-2);
    }

    #[test]
    fn test_point_masses_mix() {
        let node = Node::new("mix".into(), None);
        let config = EvalConfig::default();
        let ctx = Ctx::new(&node, &config);
        let out =
            mixture(&ctx, &[1.0, 1.0], &[m(Distribution::delta(0.0)), m(Distribution::delta(10.0))])
                .unwrap();
        assert_relative_eq!(out.mean(), 5.0, epsilon = 1e-6);
        assert_relative_eq!(out.cdf(5.0), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_weight_leaves_the_other_component() {
        let node = Node::new("mix".into(), None);
        let config = EvalConfig::default();
        let ctx = Ctx::new(&node, &config);
        let g = m(Distribution::gamma(2.0, 1.0));
        let out = mixture(&ctx, &[0.0, 2.0], &[m(Distribution::normal(0.0, 1.0)), g.clone()]).unwrap();
        assert_eq!(out, g);
    }

    #[test]
    fn test_conditional_weights_by_win_probability() {
        let node = Node::new("cond".into(), None);
        let config = EvalConfig::default();
        let ctx = Ctx::new(&node, &config);
        let out = conditional(
            &ctx,
            &m(Distribution::exponential(1.0)),
            &m(Distribution::exponential(2.0)),
            &m(Distribution::delta(10.0)),
            &m(Distribution::uniform(0.0, 1.0)),
        )
        .unwrap();
        // P(X1 < X2) = 1/3 for rates 1 and 2.
        assert_relative_eq!(out.cdf(5.0), 2.0 / 3.0, epsilon = 5e-3);
        assert_relative_eq!(out.mean(), 10.0 / 3.0 + 1.0 / 3.0, epsilon = 2e-2);
    }
}
