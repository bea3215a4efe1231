//! Races between two independent processes.
//!
//! Both racers are discretised on one lattice. For each cell `i` the weight of "x finishes in
//! `i` and wins" is `px[i] * (P(Y beyond cell i) + py[i] / 2)`: ties inside a cell are split
//! evenly. The margin (loser minus winner) accumulates `px[i] * py[j]` over cell distances
//! `|i - j|`. Conditional finishing times are the winner weights normalised by the win
//! probability.

use sbb_core::{Density, Method, Result};
use sbb_prob::{DensityGrid, Distribution, Marginal};

use super::plan::{self, Lattice};
use super::Ctx;

/// Win probabilities below this leave the conditional port empty.
const MIN_WIN: f64 = 1e-12;

/// Discretised race of `x` against `y`.
pub(super) struct Race {
    lat: Lattice,
    px: Vec<f64>,
    py: Vec<f64>,
    wx: Vec<f64>,
    wy: Vec<f64>,
}

impl Race {
    pub(super) fn new(ctx: &Ctx<'_>, x: &Marginal, y: &Marginal) -> Result<Race> {
        let alpha = ctx.config.tail_alpha;
        let (xl, xh) = x.support(alpha);
        let (yl, yh) = y.support(alpha);
        let (lo, hi) = (xl.min(yl), xh.max(yh));
        let dx = plan::cell_width(ctx, &[x, y], hi - lo, ctx.config.max_joint_side())
            .unwrap_or_else(|| if hi > lo { (hi - lo) / ctx.config.resolution as f64 } else { 1.0 });
        let lat = Lattice::covering(lo, hi, dx);
        let px = lat.masses(x);
        let py = lat.masses(y);
        let wx = (0..lat.n)
            .map(|i| px[i] * (y.survival(lat.edge(i + 1)) + 0.5 * py[i]))
            .collect();
        let wy = (0..lat.n)
            .map(|i| py[i] * (x.survival(lat.edge(i + 1)) + 0.5 * px[i]))
            .collect();
        Ok(Race { lat, px, py, wx, wy })
    }

    /// P(x finishes first).
    pub(super) fn p_x(&self) -> f64 {
        self.wx.iter().sum()
    }

    /// P(y finishes first).
    pub(super) fn p_y(&self) -> f64 {
        self.wy.iter().sum()
    }

    /// Finishing time of the winner.
    fn winner(&self) -> Result<DensityGrid> {
        let masses = self.wx.iter().zip(&self.wy).map(|(a, b)| a + b).collect();
        DensityGrid::from_masses(self.lat.lower, self.lat.dx, masses)
    }

    /// Finishing time given that the racer with weights `w` wins.
    fn conditional(w: &[f64], p: f64, lat: &Lattice) -> Result<Option<DensityGrid>> {
        if p <= MIN_WIN {
            return Ok(None);
        }
        let masses = w.iter().map(|v| v / p).collect();
        Ok(Some(DensityGrid::from_masses(lat.lower, lat.dx, masses)?))
    }

    /// Loser minus winner, in cells centred on multiples of `dx`.
    fn margin(&self) -> Result<DensityGrid> {
        let n = self.lat.n;
        let mut m = vec![0.0f64; n];
        m[0] = self.px.iter().zip(&self.py).map(|(a, b)| a * b).sum();
        for (d, slot) in m.iter_mut().enumerate().skip(1) {
            let mut acc = 0.0;
            for i in 0..n - d {
                acc += self.px[i] * self.py[i + d] + self.py[i] * self.px[i + d];
            }
            *slot = acc;
        }
        DensityGrid::from_masses(-0.5 * self.lat.dx, self.lat.dx, m)
    }
}

/// `winner + next` for independent `next`, on the winner's cell width when it fits.
fn continue_with(ctx: &Ctx<'_>, winner: &DensityGrid, next: &Marginal) -> Result<DensityGrid> {
    if let Some(Distribution::Delta { value }) = next.as_distribution() {
        return winner.affine(1.0, *value);
    }
    let alpha = ctx.config.tail_alpha;
    let (lo, hi) = next.support(alpha);
    let span = (winner.upper() - winner.lower()) + (hi - lo);
    let dx = plan::capped(ctx, winner.dx(), span, ctx.config.max_grid_points);
    let base = if dx == winner.dx() {
        winner.clone()
    } else {
        let n = ((winner.upper() - winner.lower()) / dx).ceil().max(1.0) as usize;
        winner.resample(winner.lower(), dx, n)?
    };
    let step = plan::grid_over(next, dx, alpha)?;
    Ok(base.convolve(&step)?.trimmed(0.0))
}

/// Port marginals in port order: out, x wins, y wins, margin.
pub(super) fn evaluate(
    ctx: &Ctx<'_>,
    x: &Marginal,
    y: &Marginal,
    continuations: Option<&(Marginal, Marginal)>,
) -> Result<Vec<Option<Marginal>>> {
    let m = Method::Inhibition;
    let race = Race::new(ctx, x, y)?;
    let (p_x, p_y) = (race.p_x(), race.p_y());
    let x_wins = ctx.within(m, Race::conditional(&race.wx, p_x, &race.lat))?;
    let y_wins = ctx.within(m, Race::conditional(&race.wy, p_y, &race.lat))?;

    let out = match continuations {
        None => ctx.within(m, race.winner())?,
        Some((a, b)) => {
            let mut parts = Vec::with_capacity(2);
            if let Some(g) = &x_wins {
                parts.push((p_x, ctx.within(m, continue_with(ctx, g, a))?));
            }
            if let Some(g) = &y_wins {
                parts.push((p_y, ctx.within(m, continue_with(ctx, g, b))?));
            }
            ctx.within(m, plan::mixture(ctx, m, &parts))?
        }
    };
    let margin = ctx.within(m, race.margin())?;

    Ok(vec![
        Some(ctx.checked(m, out)?),
        x_wins.map(|g| ctx.checked(m, g)).transpose()?,
        y_wins.map(|g| ctx.checked(m, g)).transpose()?,
        Some(ctx.checked(m, margin)?),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvalConfig;
    use crate::var::Node;
    use approx::assert_relative_eq;

    fn exp(rate: f64) -> Marginal {
        Distribution::exponential(rate).unwrap().into()
    }

    #[test]
    fn test_exponential_race_probabilities() {
        let node = Node::new("race".into(), None);
        let config = EvalConfig::default();
        let race = Race::new(&Ctx::new(&node, &config), &exp(1.0), &exp(2.0)).unwrap();
        assert_relative_eq!(race.p_x(), 1.0 / 3.0, epsilon = 2e-3);
        assert_relative_eq!(race.p_x() + race.p_y(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_exponential_race_ports() {
        let node = Node::new("race".into(), None);
        let config = EvalConfig::default();
        let ports = evaluate(&Ctx::new(&node, &config), &exp(1.0), &exp(2.0), None).unwrap();
        let [out, xw, yw, margin] = ports.as_slice() else { panic!("four ports") };
        // min(X, Y) ~ Exp(3), and so is each conditional finishing time.
        assert_relative_eq!(out.as_ref().unwrap().mean(), 1.0 / 3.0, epsilon = 1e-2);
        assert_relative_eq!(xw.as_ref().unwrap().mean(), 1.0 / 3.0, epsilon = 1e-2);
        assert_relative_eq!(yw.as_ref().unwrap().mean(), 1.0 / 3.0, epsilon = 1e-2);
        // Memorylessness: margin is Exp(2) w.p. 1/3 and Exp(1) w.p. 2/3.
        assert_relative_eq!(margin.as_ref().unwrap().mean(), 5.0 / 6.0, epsilon = 1e-2);
    }

    #[test]
    fn test_continuations_mix_by_win_probability() {
        let node = Node::new("race".into(), None);
        let config = EvalConfig::default();
        let cont = (
            Marginal::from(Distribution::delta(10.0).unwrap()),
            Marginal::from(Distribution::delta(20.0).unwrap()),
        );
        let ports = evaluate(&Ctx::new(&node, &config), &exp(1.0), &exp(2.0), Some(&cont)).unwrap();
        let out = ports[0].as_ref().unwrap();
        assert_relative_eq!(out.mass(), 1.0, epsilon = 1e-3);
        assert_relative_eq!(out.mean(), 1.0 / 3.0 + 10.0 / 3.0 + 40.0 / 3.0, epsilon = 5e-2);
    }
}
