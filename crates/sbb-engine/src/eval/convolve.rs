//! Sums of independent children.

use sbb_core::{Density, Method, Result};
use sbb_prob::{DensityGrid, Distribution, Marginal};

use super::{Ctx, plan};

/// Distribution of the sum of independent marginals.
///
/// Point masses only shift the result. The rest are discretised on one cell width and
/// convolved pairwise.
pub(super) fn sum(ctx: &Ctx<'_>, parts: &[Marginal]) -> Result<Marginal> {
    let mut shift = 0.0;
    let mut rest: Vec<&Marginal> = Vec::with_capacity(parts.len());
    for m in parts {
        match m.as_distribution() {
            Some(Distribution::Delta { value }) => shift += value,
            _ => rest.push(m),
        }
    }
    match rest.as_slice() {
        [] => return Ok(Marginal::Analytic(Distribution::delta(shift)?)),
        [single] => {
            if let Some(d) = single.as_distribution().and_then(|d| d.affine(1.0, shift)) {
                return Ok(Marginal::Analytic(d));
            }
        }
        _ => {}
    }

    let alpha = ctx.config.tail_alpha;
    let total: f64 = rest
        .iter()
        .map(|m| {
            let (lo, hi) = m.support(alpha);
            hi - lo
        })
        .sum();
    let Some(dx) = plan::cell_width(ctx, &rest, total, ctx.config.max_grid_points) else {
        // Degenerate grids: every child is a single cell.
        let value = shift + rest.iter().map(|m| m.mean()).sum::<f64>();
        return Ok(Marginal::Analytic(Distribution::delta(value)?));
    };

    let mut acc: Option<DensityGrid> = None;
    for m in &rest {
        let g = ctx.within(Method::Convolution, plan::grid_over(m, dx, alpha))?;
        acc = Some(match acc {
            None => g,
            Some(a) => ctx.within(Method::Convolution, a.convolve(&g))?.trimmed(0.0),
        });
    }
    let Some(mut grid) = acc else {
        return Err(ctx.fail(Method::Convolution, "nothing to convolve"));
    };
    if shift != 0.0 {
        grid = ctx.within(Method::Convolution, grid.affine(1.0, shift))?;
    }
    ctx.checked(Method::Convolution, grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvalConfig;
    use crate::var::Node;
    use approx::assert_relative_eq;

    fn run(parts: &[Marginal]) -> Marginal {
        let node = Node::new("sum".into(), None);
        let config = EvalConfig::default();
        sum(&Ctx::new(&node, &config), parts).unwrap()
    }

    #[test]
    fn test_point_masses_only_shift() {
        let m = run(&[
            Distribution::delta(1.5).unwrap().into(),
            Distribution::normal(0.0, 1.0).unwrap().into(),
            Distribution::delta(-0.5).unwrap().into(),
        ]);
        assert_eq!(m.as_distribution(), Some(&Distribution::normal(1.0, 1.0).unwrap()));
        let m = run(&[Distribution::delta(1.0).unwrap().into(), Distribution::delta(2.0).unwrap().into()]);
        assert_eq!(m.as_distribution(), Some(&Distribution::delta(3.0).unwrap()));
    }

    #[test]
    fn test_uniform_sum_is_triangular() {
        let u: Marginal = Distribution::uniform(0.0, 1.0).unwrap().into();
        let m = run(&[u.clone(), u]);
        assert_relative_eq!(m.mass(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(m.mean(), 1.0, epsilon = 1e-6);
        for (x, expected) in [(0.25, 0.25), (0.5, 0.5), (1.0, 1.0), (1.5, 0.5)] {
            assert_relative_eq!(m.pdf(x), expected, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_three_weibulls_keep_mean_and_variance() {
        let w = Distribution::weibull(1.5, 2.0).unwrap();
        let parts: Vec<Marginal> = vec![w.into(), w.into(), w.into()];
        let m = run(&parts);
        assert_relative_eq!(m.mean(), 3.0 * w.mean(), epsilon = 1e-2);
        assert_relative_eq!(m.variance(), 3.0 * w.variance(), epsilon = 2e-2);
    }
}
