//! Structural and numeric properties of reduction and evaluation.
//!
//! - Gamma sums reduce to exact parameters
//! - reduction is idempotent on arbitrary expressions
//! - numeric grids integrate to one within the tolerance
//! - shared children are evaluated once
//! - a node is one variable: repeats scale, dependent order statistics are refused
//! - order statistics and sums match their analytic densities
//! - cycles are rejected without touching the graph

use approx::assert_relative_eq;
use proptest::prelude::*;
use sbb_engine::{
    Density, Distribution, Error, EvalConfig, Family, Graph, Kind, Marginal, Port, Var,
};

fn assert_unit_mass(m: &Marginal) {
    assert!((m.mass() - 1.0).abs() <= 1e-3, "mass {} is not within 1e-3 of 1", m.mass());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_gamma_sum_reduces_exactly(k1 in 0.1f64..20.0, k2 in 0.1f64..20.0, theta in 0.05f64..10.0) {
        let g = Graph::new();
        let a = g.gamma(k1, theta).unwrap();
        let b = g.gamma(k2, theta).unwrap();
        let r = g.reduce(&g.convolution(&[a, b]).unwrap()).unwrap();
        prop_assert_eq!(r.distribution(), Some(&Distribution::gamma(k1 + k2, theta).unwrap()));
    }

    #[test]
    fn prop_reduction_is_idempotent(ops in prop::collection::vec((0u8..6, 0usize..64, 0usize..64), 1..12)) {
        let g = Graph::new();
        let mut pool: Vec<Var> = vec![
            g.gamma(2.0, 1.0).unwrap(),
            g.gamma(3.0, 1.0).unwrap(),
            g.normal(0.0, 1.0).unwrap(),
            g.delta(1.0).unwrap(),
            g.uniform(0.0, 1.0).unwrap(),
            g.weibull(1.5, 1.0).unwrap(),
        ];
        for (op, i, j) in ops {
            let (a, b) = (pool[i % pool.len()].clone(), pool[j % pool.len()].clone());
            let v = match op {
                0 => g.convolution(&[a, b]),
                1 => g.minimum(&[a, b]),
                2 => g.maximum(&[a, b]),
                3 => g.affine(&a, 2.0, -1.0),
                4 => g.join(&[a, b]).and_then(|j| j.port(Port::First)),
                _ => g.compound(Family::Normal, vec![a.into(), 0.5.into()]),
            };
            // Operands drawn from overlapping sub-expressions are refused.
            match v {
                Ok(v) => pool.push(v),
                Err(e) => prop_assert!(matches!(e, Error::UnsupportedCombination(_)), "{}", e),
            }
        }
        for v in &pool {
            let once = g.reduce(v).unwrap();
            let twice = g.reduce(&once).unwrap();
            prop_assert_eq!(&once, &twice);
        }
    }

    #[test]
    fn prop_weibull_sum_grid_has_unit_mass(k in 0.8f64..4.0, lambda in 0.2f64..5.0) {
        let g = Graph::new();
        let a = g.weibull(k, lambda).unwrap();
        let b = g.weibull(k + 0.5, lambda).unwrap();
        let m = g.evaluate(&g.convolution(&[a, b]).unwrap()).unwrap();
        prop_assert!((m.mass() - 1.0).abs() <= 1e-3);
    }
}

#[test]
fn test_every_numeric_combinator_has_unit_mass() {
    let g = Graph::new();
    let w = g.weibull(2.0, 1.0).unwrap();
    let e = g.exponential(1.5).unwrap();
    let u = g.uniform(0.5, 2.0).unwrap();
    let j = g.join(&[w.clone(), e.clone(), u.clone()]).unwrap();
    let race = g.inhibition_with(&w, &e, &u, &g.delta(0.5).unwrap()).unwrap();
    let k = g.uniform(1.0, 2.0).unwrap();
    let mut vars = vec![
        g.convolution(&[w.clone(), e.clone(), u.clone()]).unwrap(),
        g.minimum(&[w.clone(), e.clone()]).unwrap(),
        g.maximum(&[w.clone(), u.clone()]).unwrap(),
        g.affine(&e, -2.0, 1.0).unwrap(),
        g.compound(Family::Weibull, vec![k.into(), 1.0.into()]).unwrap(),
    ];
    for port in [Port::Out, Port::First, Port::Slack] {
        vars.push(j.port(port).unwrap());
    }
    for port in [Port::Out, Port::XWins, Port::YWins, Port::Margin] {
        vars.push(race.port(port).unwrap());
    }
    for v in &vars {
        let m = g.evaluate(v).unwrap();
        assert!(!m.is_analytic(), "{} should be numeric", v);
        assert_unit_mass(&m);
    }
}

#[test]
fn test_shared_child_is_evaluated_once() {
    let g = Graph::with_config(EvalConfig { reduce_before_eval: false, ..Default::default() }).unwrap();
    let x = g.weibull(1.5, 2.0).unwrap();
    let c = g.convolution(&[x.clone(), x.clone()]).unwrap();
    let hi = g.maximum(&[x.clone(), g.uniform(0.0, 3.0).unwrap()]).unwrap();
    let lo = g.minimum(&[x.clone(), g.exponential(1.0).unwrap()]).unwrap();
    for v in [&c, &hi, &lo, &c] {
        g.evaluate(v).unwrap();
    }
    assert_eq!(x.evaluations(), 1);
    assert_eq!(c.evaluations(), 1);
    assert_eq!(hi.evaluations(), 1);
}

#[test]
fn test_repeated_summand_is_one_variable() {
    let g = Graph::with_config(EvalConfig { reduce_before_eval: false, ..Default::default() }).unwrap();
    let u = g.uniform(0.0, 1.0).unwrap();
    let twice = g.evaluate(&g.convolution(&[u.clone(), u.clone()]).unwrap()).unwrap();
    // U + U is 2U, flat on [0, 2], not the triangular sum of two draws.
    for x in [0.2, 1.0, 1.8] {
        assert_relative_eq!(twice.pdf(x), 0.5, epsilon = 1e-2);
    }
    assert_relative_eq!(twice.cdf(1.0), 0.5, epsilon = 1e-2);

    let reduced = Graph::new();
    let w = reduced.weibull(1.5, 2.0).unwrap();
    let r = reduced.reduce(&reduced.convolution(&[w.clone(), w]).unwrap()).unwrap();
    assert_eq!(r.distribution(), Some(&Distribution::weibull(1.5, 4.0).unwrap()));
}

#[test]
fn test_dependent_order_statistics_are_refused() {
    let g = Graph::new();
    let x = g.uniform(0.0, 1.0).unwrap();
    let shifted = g.affine(&x, 1.0, 0.25).unwrap();
    let sum = g.convolution(&[x.clone(), g.uniform(0.0, 1.0).unwrap()]).unwrap();
    for attempt in [
        g.maximum(&[x.clone(), x.clone()]),
        g.minimum(&[x.clone(), shifted.clone()]),
        g.join(&[sum.clone(), x.clone()]),
        g.inhibition(&x, &shifted),
        g.inhibition_with(&x, &g.exponential(1.0).unwrap(), &sum, &g.delta(0.0).unwrap()),
        g.conditional(&sum, &g.exponential(1.0).unwrap(), &x, &x),
        g.convolution(&[sum.clone(), x.clone()]),
        g.compound(Family::Normal, vec![x.clone().into(), shifted.clone().into()]),
    ] {
        assert!(matches!(attempt, Err(Error::UnsupportedCombination(_))), "{:?}", attempt);
    }
    assert!(x.independent_of(&g.uniform(0.0, 1.0).unwrap()));
    assert!(!x.independent_of(&sum));

    // Branches of a race may share with each other, just not with the racers.
    let a = g.gamma(2.0, 1.0).unwrap();
    let race = g
        .inhibition_with(&x, &g.exponential(1.0).unwrap(), &a, &g.affine(&a, 1.0, 1.0).unwrap())
        .unwrap();
    assert_unit_mass(&g.evaluate(&race).unwrap());
    // A mixture is a choice, not a combination; any components are fine.
    let mix = g.mixture(&[1.0, 1.0], &[x.clone(), shifted]).unwrap();
    assert_relative_eq!(g.evaluate(&mix).unwrap().mean(), 0.625, epsilon = 1e-2);
}

#[test]
fn test_mixture_and_conditional_integrate_to_one() {
    let g = Graph::new();
    let w = g.weibull(2.0, 1.0).unwrap();
    let e = g.exponential(1.5).unwrap();
    let mix = g.mixture(&[2.0, 1.0, 1.0], &[w.clone(), e.clone(), g.normal(4.0, 0.5).unwrap()]).unwrap();
    let m = g.evaluate(&mix).unwrap();
    assert_unit_mass(&m);
    assert_relative_eq!(m.mean(), 0.5 * 0.886_226_9 + 0.25 / 1.5 + 0.25 * 4.0, epsilon = 1e-2);

    let cond = g.conditional(&w, &e, &g.delta(1.0).unwrap(), &g.uniform(2.0, 3.0).unwrap()).unwrap();
    let c = g.evaluate(&cond).unwrap();
    assert_unit_mass(&c);
    let p = g.win_probability(&cond).unwrap();
    assert_relative_eq!(c.cdf(1.5), p, epsilon = 1e-2);
}

#[test]
fn test_minimum_of_uniforms_matches_beta() {
    let g = Graph::new();
    let a = g.uniform(0.0, 1.0).unwrap();
    let b = g.uniform(0.0, 1.0).unwrap();
    let m = g.evaluate(&g.minimum(&[a, b]).unwrap()).unwrap();
    assert_relative_eq!(m.pdf(0.5), 1.0, epsilon = 1e-2);
    assert_relative_eq!(m.pdf(0.25), 1.5, epsilon = 1e-2);
    assert_relative_eq!(m.cdf(0.5), 0.75, epsilon = 1e-2);
}

#[test]
fn test_maximum_of_uniforms_matches_beta() {
    let g = Graph::new();
    let a = g.uniform(0.0, 1.0).unwrap();
    let b = g.uniform(0.0, 1.0).unwrap();
    let m = g.evaluate(&g.maximum(&[a, b]).unwrap()).unwrap();
    assert_relative_eq!(m.pdf(0.5), 1.0, epsilon = 1e-2);
    assert_relative_eq!(m.pdf(0.75), 1.5, epsilon = 1e-2);
}

#[test]
fn test_uniform_sum_is_triangular() {
    let g = Graph::new();
    let a = g.uniform(0.0, 1.0).unwrap();
    let b = g.uniform(0.0, 1.0).unwrap();
    let m = g.evaluate(&g.convolution(&[a, b]).unwrap()).unwrap();
    for x in [0.2, 0.6, 1.0, 1.3, 1.8] {
        let expected = if x <= 1.0 { x } else { 2.0 - x };
        assert_relative_eq!(m.pdf(x), expected, epsilon = 1e-2);
    }
}

#[test]
fn test_numeric_gamma_sum_matches_closed_form() {
    let g = Graph::with_config(EvalConfig { reduce_before_eval: false, ..Default::default() }).unwrap();
    let a = g.gamma(2.0, 1.5).unwrap();
    let b = g.gamma(3.0, 1.5).unwrap();
    let m = g.evaluate(&g.convolution(&[a, b]).unwrap()).unwrap();
    assert!(!m.is_analytic());
    let exact = Distribution::gamma(5.0, 1.5).unwrap();
    for x in [2.0, 5.0, 7.5, 12.0] {
        assert_relative_eq!(m.cdf(x), exact.cdf(x), epsilon = 2e-3);
    }
}

#[test]
fn test_closed_forms_survive_evaluation() {
    let g = Graph::new();
    let n = g.convolution(&[g.normal(1.0, 3.0).unwrap(), g.normal(2.0, 4.0).unwrap()]).unwrap();
    assert_eq!(g.evaluate(&n).unwrap().as_distribution(), Some(&Distribution::normal(3.0, 5.0).unwrap()));

    let shifted = g.convolution(&[g.delta(2.0).unwrap(), g.weibull(2.0, 1.0).unwrap()]).unwrap();
    let m = g.evaluate(&shifted).unwrap();
    assert_eq!(m.as_distribution(), Some(&Distribution::shifted_weibull(2.0, 1.0, 2.0).unwrap()));

    let scaled = g.affine(&g.gamma(2.0, 1.0).unwrap(), 3.0, 0.0).unwrap();
    let r = g.reduce(&scaled).unwrap();
    assert_eq!(r.distribution(), Some(&Distribution::gamma(2.0, 3.0).unwrap()));
}

#[test]
fn test_compound_normal_location_reduces() {
    let g = Graph::new();
    let mu = g.normal(1.0, 0.6).unwrap();
    let x = g.compound(Family::Normal, vec![mu.into(), 0.8.into()]).unwrap();
    let r = g.reduce(&x).unwrap();
    match r.distribution() {
        Some(Distribution::Normal { mu, sigma }) => {
            assert_relative_eq!(*mu, 1.0);
            assert_relative_eq!(*sigma, 1.0, epsilon = 1e-12);
        }
        other => panic!("expected a normal, got {:?}", other),
    }
}

#[test]
fn test_cycle_rejection_leaves_graph_untouched() {
    let g = Graph::new();
    let p = g.placeholder("p");
    let a = g.uniform(0.0, 1.0).unwrap();
    let c = g.convolution(&[a.clone(), p.clone()]).unwrap();
    let b = g.uniform(0.0, 1.0).unwrap();
    let m = g.maximum(&[c.clone(), b]).unwrap();

    let err = g.define(&p, Kind::Minimum(vec![m.clone(), a.clone()])).unwrap_err();
    assert!(matches!(err, Error::CyclicGraph { .. }));
    let err = g.define(&p, Kind::Affine { child: p.clone(), scale: 1.0, offset: 0.0 }).unwrap_err();
    assert!(matches!(err, Error::CyclicGraph { .. }));
    assert!(p.kind().is_none());
    assert_eq!(a.parents().len(), 1);
    assert!(m.parents().is_empty());

    g.define(&p, Kind::Atomic(Distribution::uniform(0.0, 1.0).unwrap())).unwrap();
    assert_unit_mass(&g.evaluate(&c).unwrap());
}
