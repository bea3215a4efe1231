//! Built-in closed forms.

use sbb_core::Result;
use sbb_prob::{Distribution, Family};

use super::{NodeRuleFn, PairRuleFn, Rewrite, Rule, RuleAction, RuleRegistry, Shape, Signature};
use crate::graph::Graph;
use crate::var::{CombinatorTag, Kind, Param, Port, Var};

const ALL_FAMILIES: [Family; 6] = [
    Family::Delta,
    Family::Uniform,
    Family::Normal,
    Family::Gamma,
    Family::InverseGamma,
    Family::Weibull,
];

pub(super) fn install(reg: &mut RuleRegistry) {
    use CombinatorTag as T;

    let node = |name: &'static str, f: NodeRuleFn| Rule { name, action: RuleAction::Node(f) };
    let pair = |name: &'static str, f: PairRuleFn| Rule { name, action: RuleAction::Pair(f) };

    reg.register(T::Convolution, Signature::Any, node("fold_repeats", fold_repeats));
    reg.register(T::Convolution, Signature::Any, node("flatten_convolution", flatten_convolution));
    reg.register(T::Minimum, Signature::Any, node("flatten_minimum", flatten_minimum));
    reg.register(T::Maximum, Signature::Any, node("flatten_maximum", flatten_maximum));

    reg.register(
        T::Convolution,
        Signature::Pair(Shape::Atomic(Family::Delta), Shape::Any),
        pair("delta_shift", delta_shift),
    );
    reg.register(
        T::Convolution,
        Signature::Pair(Shape::Atomic(Family::Gamma), Shape::Atomic(Family::Gamma)),
        pair("gamma_sum", gamma_sum),
    );
    reg.register(
        T::Convolution,
        Signature::Pair(Shape::Atomic(Family::Normal), Shape::Atomic(Family::Normal)),
        pair("normal_sum", normal_sum),
    );
    reg.register(
        T::Convolution,
        Signature::Pair(Shape::Compound(Family::Gamma), Shape::Compound(Family::Gamma)),
        pair("compound_gamma_sum", compound_gamma_sum),
    );
    reg.register(
        T::Convolution,
        Signature::Pair(Shape::Compound(Family::Gamma), Shape::Atomic(Family::Gamma)),
        pair("compound_gamma_plus_gamma", compound_gamma_plus_gamma),
    );

    reg.register(T::Affine, Signature::Any, node("affine_identity", affine_identity));
    reg.register(
        T::Affine,
        Signature::Unary(Shape::Combinator(T::Affine)),
        node("affine_compose", affine_compose),
    );
    for family in ALL_FAMILIES {
        reg.register(
            T::Affine,
            Signature::Unary(Shape::Atomic(family)),
            node("affine_closed_form", affine_closed_form),
        );
    }

    reg.register(T::Compound, Signature::Any, node("compound_fixed", compound_fixed));
    reg.register(T::Compound, Signature::Family(Family::Delta), node("compound_delta", compound_delta));
    reg.register(
        T::Compound,
        Signature::Family(Family::Normal),
        node("compound_normal_location", compound_normal_location),
    );

    reg.register(T::Mixture, Signature::Any, node("merge_components", merge_components));
    reg.register(T::Conditional, Signature::Any, node("same_branch", same_branch));
}

/// Value of a parameter that is fixed or a point mass.
fn known_value(p: &Param) -> Option<f64> {
    match p {
        Param::Fixed(v) => Some(*v),
        Param::Random(v) => match v.distribution() {
            Some(Distribution::Delta { value }) => Some(*value),
            _ => None,
        },
    }
}

/// `X + X + Y` is `2X + Y`: repeats of one summand are a single draw.
fn fold_repeats(g: &Graph, kind: &Kind) -> Result<Option<Rewrite>> {
    let Kind::Convolution(cs) = kind else { return Ok(None) };
    let mut counts: Vec<(&Var, usize)> = Vec::with_capacity(cs.len());
    for c in cs {
        match counts.iter_mut().find(|(v, _)| *v == c) {
            Some((_, n)) => *n += 1,
            None => counts.push((c, 1)),
        }
    }
    if counts.len() == cs.len() {
        return Ok(None);
    }
    let mut folded = Vec::with_capacity(counts.len());
    for (v, n) in counts {
        folded.push(if n == 1 {
            v.clone()
        } else {
            g.derived(Kind::Affine { child: v.clone(), scale: n as f64, offset: 0.0 })?
        });
    }
    Ok(Some(match folded.as_slice() {
        [only] => Rewrite::Forward(only.clone()),
        _ => Rewrite::Into(Kind::Convolution(folded)),
    }))
}

fn flatten_with(
    children: &[Var],
    same: fn(&Kind) -> Option<&[Var]>,
    rebuild: fn(Vec<Var>) -> Kind,
) -> Option<Rewrite> {
    // A nested node with other parents stays shared instead of being copied into this one.
    let nested = |c: &Var| {
        c.selected_port() == Port::Out
            && c.kind().and_then(same).is_some()
            && c.node.live_parents().len() <= 1
    };
    if !children.iter().any(nested) {
        return None;
    }
    let mut flat = Vec::with_capacity(children.len() + 2);
    for c in children {
        match c.kind().and_then(same) {
            Some(inner) if nested(c) => flat.extend(inner.iter().cloned()),
            _ => flat.push(c.clone()),
        }
    }
    Some(Rewrite::Into(rebuild(flat)))
}

fn convolution_children(k: &Kind) -> Option<&[Var]> {
    match k {
        Kind::Convolution(cs) => Some(cs),
        _ => None,
    }
}

fn minimum_children(k: &Kind) -> Option<&[Var]> {
    match k {
        Kind::Minimum(cs) => Some(cs),
        _ => None,
    }
}

fn maximum_children(k: &Kind) -> Option<&[Var]> {
    match k {
        Kind::Maximum(cs) => Some(cs),
        _ => None,
    }
}

fn flatten_convolution(_g: &Graph, kind: &Kind) -> Result<Option<Rewrite>> {
    Ok(convolution_children(kind).and_then(|cs| flatten_with(cs, convolution_children, Kind::Convolution)))
}

fn flatten_minimum(_g: &Graph, kind: &Kind) -> Result<Option<Rewrite>> {
    Ok(minimum_children(kind).and_then(|cs| flatten_with(cs, minimum_children, Kind::Minimum)))
}

fn flatten_maximum(_g: &Graph, kind: &Kind) -> Result<Option<Rewrite>> {
    Ok(maximum_children(kind).and_then(|cs| flatten_with(cs, maximum_children, Kind::Maximum)))
}

/// `Delta(v) + X` is `X` shifted by `v`.
fn delta_shift(g: &Graph, a: &Var, b: &Var) -> Result<Option<Var>> {
    let Some(Distribution::Delta { value }) = a.distribution() else { return Ok(None) };
    Ok(Some(g.derived(Kind::Affine { child: b.clone(), scale: 1.0, offset: *value })?))
}

/// `Gamma(k1, θ) + Gamma(k2, θ) = Gamma(k1 + k2, θ)`; shifts add.
fn gamma_sum(g: &Graph, a: &Var, b: &Var) -> Result<Option<Var>> {
    match (a.distribution(), b.distribution()) {
        (
            Some(Distribution::Gamma { k: k1, theta: t1, shift: s1 }),
            Some(Distribution::Gamma { k: k2, theta: t2, shift: s2 }),
        ) if t1 == t2 => {
            let d = Distribution::shifted_gamma(k1 + k2, *t1, s1 + s2)?;
            Ok(Some(g.derived(Kind::Atomic(d))?))
        }
        _ => Ok(None),
    }
}

/// `N(μ1, σ1) + N(μ2, σ2) = N(μ1 + μ2, sqrt(σ1² + σ2²))`.
fn normal_sum(g: &Graph, a: &Var, b: &Var) -> Result<Option<Var>> {
    match (a.distribution(), b.distribution()) {
        (
            Some(Distribution::Normal { mu: m1, sigma: s1 }),
            Some(Distribution::Normal { mu: m2, sigma: s2 }),
        ) => {
            let d = Distribution::normal(m1 + m2, s1.hypot(*s2))?;
            Ok(Some(g.derived(Kind::Atomic(d))?))
        }
        _ => Ok(None),
    }
}

/// Shape and fixed scale of a compound Gamma.
fn compound_gamma_parts(v: &Var) -> Option<(&Param, f64)> {
    match v.kind() {
        Some(Kind::Compound { family: Family::Gamma, params }) => {
            Some((&params[0], known_value(&params[1])?))
        }
        _ => None,
    }
}

/// Sum of two shape parameters as a parameter.
fn add_shapes(g: &Graph, a: &Param, b: &Param) -> Result<Param> {
    Ok(match (known_value(a), known_value(b), a, b) {
        (Some(x), Some(y), _, _) => Param::Fixed(x + y),
        (Some(x), None, _, Param::Random(v)) | (None, Some(x), Param::Random(v), _) => {
            Param::Random(g.derived(Kind::Affine { child: v.clone(), scale: 1.0, offset: x })?)
        }
        (_, _, Param::Random(u), Param::Random(v)) => {
            Param::Random(g.derived(Kind::Convolution(vec![u.clone(), v.clone()]))?)
        }
        // Unreachable: a parameter without a known value is random.
        _ => return Ok(a.clone()),
    })
}

/// `Gamma(K1, θ) + Gamma(K2, θ) = Gamma(K1 + K2, θ)` with a common fixed scale.
fn compound_gamma_sum(g: &Graph, a: &Var, b: &Var) -> Result<Option<Var>> {
    let (Some((k1, t1)), Some((k2, t2))) = (compound_gamma_parts(a), compound_gamma_parts(b)) else {
        return Ok(None);
    };
    if t1 != t2 {
        return Ok(None);
    }
    let shape = add_shapes(g, k1, k2)?;
    let kind = Kind::Compound { family: Family::Gamma, params: vec![shape, Param::Fixed(t1)] };
    Ok(Some(g.derived(kind)?))
}

/// `Gamma(K, θ) + Gamma(k, θ) = Gamma(K + k, θ)` for an unshifted atomic Gamma.
fn compound_gamma_plus_gamma(g: &Graph, a: &Var, b: &Var) -> Result<Option<Var>> {
    let Some((k1, t1)) = compound_gamma_parts(a) else { return Ok(None) };
    let Some(Distribution::Gamma { k, theta, shift }) = b.distribution() else { return Ok(None) };
    if *theta != t1 || *shift != 0.0 {
        return Ok(None);
    }
    let shape = add_shapes(g, k1, &Param::Fixed(*k))?;
    let kind = Kind::Compound { family: Family::Gamma, params: vec![shape, Param::Fixed(t1)] };
    Ok(Some(g.derived(kind)?))
}

fn affine_identity(_g: &Graph, kind: &Kind) -> Result<Option<Rewrite>> {
    match kind {
        Kind::Affine { child, scale, offset } if *scale == 1.0 && *offset == 0.0 => {
            Ok(Some(Rewrite::Forward(child.clone())))
        }
        _ => Ok(None),
    }
}

/// `s2 (s1 X + o1) + o2 = (s1 s2) X + (s2 o1 + o2)`.
fn affine_compose(_g: &Graph, kind: &Kind) -> Result<Option<Rewrite>> {
    let Kind::Affine { child, scale, offset } = kind else { return Ok(None) };
    match child.kind() {
        Some(Kind::Affine { child: inner, scale: s1, offset: o1 }) => {
            Ok(Some(Rewrite::Into(Kind::Affine {
                child: inner.clone(),
                scale: s1 * scale,
                offset: scale * o1 + offset,
            })))
        }
        _ => Ok(None),
    }
}

fn affine_closed_form(_g: &Graph, kind: &Kind) -> Result<Option<Rewrite>> {
    let Kind::Affine { child, scale, offset } = kind else { return Ok(None) };
    Ok(child
        .distribution()
        .and_then(|d| d.affine(*scale, *offset))
        .map(|d| Rewrite::Into(Kind::Atomic(d))))
}

fn compound_fixed(_g: &Graph, kind: &Kind) -> Result<Option<Rewrite>> {
    let Kind::Compound { family, params } = kind else { return Ok(None) };
    let values: Option<Vec<f64>> = params.iter().map(known_value).collect();
    match values {
        Some(values) => Ok(Some(Rewrite::Into(Kind::Atomic(family.with_params(&values)?)))),
        None => Ok(None),
    }
}

/// A point mass located at a random variable is that variable.
fn compound_delta(_g: &Graph, kind: &Kind) -> Result<Option<Rewrite>> {
    match kind {
        Kind::Compound { family: Family::Delta, params } => {
            Ok(params[0].random().map(|v| Rewrite::Forward(v.clone())))
        }
        _ => Ok(None),
    }
}

/// `N(M, σ) = M + N(0, σ)` for fixed σ.
fn compound_normal_location(g: &Graph, kind: &Kind) -> Result<Option<Rewrite>> {
    let Kind::Compound { family: Family::Normal, params } = kind else { return Ok(None) };
    let (Param::Random(mu), Some(sigma)) = (&params[0], known_value(&params[1])) else {
        return Ok(None);
    };
    let noise = g.derived(Kind::Atomic(Distribution::normal(0.0, sigma)?))?;
    Ok(Some(Rewrite::Into(Kind::Convolution(vec![mu.clone(), noise]))))
}

/// Identical components pool their weights; a single one is the whole mixture.
fn merge_components(_g: &Graph, kind: &Kind) -> Result<Option<Rewrite>> {
    let Kind::Mixture { weights, children } = kind else { return Ok(None) };
    let mut pooled: Vec<(f64, Var)> = Vec::with_capacity(children.len());
    for (w, c) in weights.iter().zip(children) {
        if *w == 0.0 {
            continue;
        }
        match pooled.iter_mut().find(|(_, v)| v == c) {
            Some((total, _)) => *total += w,
            None => pooled.push((*w, c.clone())),
        }
    }
    if pooled.len() == children.len() {
        return Ok(None);
    }
    Ok(Some(match pooled.as_slice() {
        [(_, only)] => Rewrite::Forward(only.clone()),
        _ => {
            let (weights, children) = pooled.into_iter().unzip();
            Rewrite::Into(Kind::Mixture { weights, children })
        }
    }))
}

/// Both branches are the same variable, so the race does not matter.
fn same_branch(_g: &Graph, kind: &Kind) -> Result<Option<Rewrite>> {
    match kind {
        Kind::Conditional { on_x, on_y, .. } if on_x == on_y => Ok(Some(Rewrite::Forward(on_x.clone()))),
        _ => Ok(None),
    }
}
