//! Numeric evaluation cross-checked against Monte Carlo draws.
//!
//! Coverage:
//! - sample moments of a reduced Gamma sum
//! - exponential race win probability (closed form and sampled)
//! - compound Gamma mean
//! - order statistic and join slack CDFs against empirical CDFs
//! - inhibition with continuations
//! - mixtures and race-selected branches
//! - joint draws of variables sharing nodes

use approx::assert_relative_eq;
use sbb_engine::{Density, Family, Graph, Port};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn variance(xs: &[f64]) -> f64 {
    let m = mean(xs);
    xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (xs.len() - 1) as f64
}

fn empirical_cdf(xs: &[f64], x: f64) -> f64 {
    xs.iter().filter(|v| **v <= x).count() as f64 / xs.len() as f64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_gamma_sample_moments() {
    let g = Graph::new();
    let a = g.gamma(0.5, 3.0).unwrap();
    let b = g.gamma(1.5, 3.0).unwrap();
    let total = g.convolution(&[a, b]).unwrap();
    let xs = g.sample(&total, 100_000, 2024).unwrap();
    assert_eq!(xs.len(), 100_000);
    // Gamma(2, 3): mean 6, variance 18.
    assert_relative_eq!(mean(&xs), 6.0, epsilon = 0.06);
    assert_relative_eq!(variance(&xs), 18.0, epsilon = 0.6);
}

#[test]
fn test_exponential_race() {
    let g = Graph::new();
    let x = g.exponential(1.0).unwrap();
    let y = g.exponential(2.0).unwrap();
    let race = g.inhibition(&x, &y).unwrap();
    let p = g.win_probability(&race).unwrap();
    assert_relative_eq!(p, 1.0 / 3.0, epsilon = 2e-3);

    // X's branch lands near 0, Y's near 100.
    let marked = g.inhibition_with(&x, &y, &g.delta(0.0).unwrap(), &g.delta(100.0).unwrap()).unwrap();
    let xs = g.sample(&marked, 100_000, 5).unwrap();
    assert_relative_eq!(empirical_cdf(&xs, 50.0), p, epsilon = 1e-2);

    // min of the two is Exp(3).
    let out = g.evaluate(&race).unwrap();
    assert_relative_eq!(out.mean(), 1.0 / 3.0, epsilon = 1e-2);
}

#[test]
fn test_compound_gamma_mean() {
    let g = Graph::new();
    let k = g.uniform(1.0, 3.0).unwrap();
    let x = g.compound(Family::Gamma, vec![k.into(), 2.0.into()]).unwrap();
    let m = g.evaluate(&x).unwrap();
    let xs = g.sample(&x, 100_000, 9).unwrap();
    assert_relative_eq!(m.mean(), mean(&xs), epsilon = 0.05);
    assert_relative_eq!(m.cdf(4.0), empirical_cdf(&xs, 4.0), epsilon = 1e-2);
}

#[test]
fn test_minimum_cdf_matches_draws() {
    let g = Graph::new();
    let w = g.weibull(2.0, 1.5).unwrap();
    let e = g.gamma(2.0, 0.8).unwrap();
    let first = g.minimum(&[w, e]).unwrap();
    let m = g.evaluate(&first).unwrap();
    let xs = g.sample(&first, 100_000, 13).unwrap();
    for x in [0.5, 1.0, 1.5] {
        assert_relative_eq!(m.cdf(x), empirical_cdf(&xs, x), epsilon = 1e-2);
    }
}

#[test]
fn test_join_slack_matches_draws() {
    let g = Graph::new();
    let a = g.exponential(1.0).unwrap();
    let b = g.exponential(2.0).unwrap();
    let slack = g.join(&[a, b]).unwrap().port(Port::Slack).unwrap();
    let m = g.evaluate(&slack).unwrap();
    let xs = g.sample(&slack, 100_000, 17).unwrap();
    assert_relative_eq!(m.mean(), mean(&xs), epsilon = 2e-2);
    assert_relative_eq!(m.cdf(0.5), empirical_cdf(&xs, 0.5), epsilon = 1e-2);
}

#[test]
fn test_inhibition_with_continuations() {
    let g = Graph::new();
    let x = g.uniform(0.0, 2.0).unwrap();
    let y = g.gamma(2.0, 0.5).unwrap();
    let a = g.normal(3.0, 0.5).unwrap();
    let b = g.uniform(0.0, 1.0).unwrap();
    let race = g.inhibition_with(&x, &y, &a, &b).unwrap();
    let m = g.evaluate(&race).unwrap();
    let xs = g.sample(&race, 100_000, 21).unwrap();
    assert_relative_eq!(m.mass(), 1.0, epsilon = 1e-3);
    assert_relative_eq!(m.mean(), mean(&xs), epsilon = 3e-2);
    assert_relative_eq!(m.cdf(2.0), empirical_cdf(&xs, 2.0), epsilon = 1e-2);

    let margin = race.port(Port::Margin).unwrap();
    let mm = g.evaluate(&margin).unwrap();
    let ms = g.sample(&margin, 100_000, 22).unwrap();
    assert_relative_eq!(mm.mean(), mean(&ms), epsilon = 2e-2);
}

#[test]
fn test_mixture_matches_draws() {
    let g = Graph::new();
    let fast = g.gamma(2.0, 0.5).unwrap();
    let slow = g.weibull(3.0, 4.0).unwrap();
    let mix = g.mixture(&[0.3, 0.7], &[fast, slow]).unwrap();
    let m = g.evaluate(&mix).unwrap();
    let xs = g.sample(&mix, 100_000, 31).unwrap();
    assert_relative_eq!(m.mean(), mean(&xs), epsilon = 3e-2);
    for x in [1.0, 2.5, 4.0] {
        assert_relative_eq!(m.cdf(x), empirical_cdf(&xs, x), epsilon = 1e-2);
    }
}

#[test]
fn test_conditional_matches_draws() {
    let g = Graph::new();
    let x = g.exponential(1.0).unwrap();
    let y = g.exponential(2.0).unwrap();
    let on_x = g.normal(5.0, 1.0).unwrap();
    let on_y = g.uniform(0.0, 1.0).unwrap();
    let cond = g.conditional(&x, &y, &on_x, &on_y).unwrap();
    let m = g.evaluate(&cond).unwrap();
    let xs = g.sample(&cond, 100_000, 37).unwrap();
    // X wins a third of the time.
    assert_relative_eq!(empirical_cdf(&xs, 2.0), 2.0 / 3.0, epsilon = 1e-2);
    assert_relative_eq!(m.cdf(2.0), empirical_cdf(&xs, 2.0), epsilon = 1e-2);
    assert_relative_eq!(m.mean(), mean(&xs), epsilon = 3e-2);
}

#[test]
fn test_joint_draws_keep_dependence() {
    let g = Graph::new();
    let x = g.gamma(2.0, 1.0).unwrap();
    let y = g.gamma(3.0, 1.0).unwrap();
    let total = g.convolution(&[x.clone(), y.clone()]).unwrap();
    let rows = g.sample_joint(&[x.clone(), total.clone()], 50_000, 41).unwrap();
    let xs: Vec<f64> = rows.iter().map(|r| r[0]).collect();
    let ts: Vec<f64> = rows.iter().map(|r| r[1]).collect();
    let (mx, mt) = (mean(&xs), mean(&ts));
    let cov = rows.iter().map(|r| (r[0] - mx) * (r[1] - mt)).sum::<f64>() / (rows.len() - 1) as f64;
    // Cov(X, X + Y) = Var(X) = 2.
    assert_relative_eq!(cov, 2.0, epsilon = 0.1);
    assert!(rows.iter().all(|r| r[1] >= r[0]));
    // Each column on its own still has its marginal law.
    let m = g.evaluate(&total).unwrap();
    assert_relative_eq!(m.cdf(5.0), empirical_cdf(&ts, 5.0), epsilon = 1e-2);
}
