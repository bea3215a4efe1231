//! Reduction: local, meaning-preserving rewrites towards closed forms.
//!
//! Rules live in a table keyed by `(CombinatorTag, Signature)`. Reduction walks the graph
//! bottom-up; each node is rewritten greedily until no rule fires and the outcome is stored in
//! the node (once), so repeated reductions are free and idempotent.

mod rules;

use std::collections::HashMap;
use std::time::Instant;

use log::{debug, warn};
use sbb_core::Result;
use sbb_prob::Family;

use crate::graph::Graph;
use crate::var::{CombinatorTag, Kind, Node, Port, Reduction, Var, post_order};

/// Upper bound on rewrites of a single node.
const MAX_REWRITES: usize = 256;

/// Result of a successful rule application.
#[derive(Debug, Clone)]
pub enum Rewrite {
    /// The node has a new body (reduction continues on it).
    Into(Kind),
    /// The node is equivalent to an existing variable.
    Forward(Var),
}

/// Whole-node rewrite.
pub type NodeRuleFn = fn(&Graph, &Kind) -> Result<Option<Rewrite>>;

/// Merge two children of a convolution into one equivalent variable.
pub type PairRuleFn = fn(&Graph, &Var, &Var) -> Result<Option<Var>>;

/// Rule body.
#[derive(Debug, Clone, Copy)]
pub enum RuleAction {
    /// Applied to the node as a whole.
    Node(NodeRuleFn),
    /// Applied to each matching pair of children.
    Pair(PairRuleFn),
}

/// A named rewrite.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    /// Name used in debug logs.
    pub name: &'static str,
    /// What the rule does.
    pub action: RuleAction,
}

/// Coarse classification of a child variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Wildcard.
    Any,
    /// Atomic node of a family.
    Atomic(Family),
    /// Compound node of a family.
    Compound(Family),
    /// Any other combinator (or a non-default port).
    Combinator(CombinatorTag),
}

impl Shape {
    /// Classify a variable.
    pub fn of(var: &Var) -> Shape {
        match var.kind() {
            Some(Kind::Atomic(d)) => Shape::Atomic(d.family()),
            Some(Kind::Compound { family, .. }) if var.selected_port() == Port::Out => {
                Shape::Compound(*family)
            }
            Some(k) => Shape::Combinator(k.tag()),
            None => Shape::Any,
        }
    }
}

/// Second key of the rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signature {
    /// Tried for every node of the tag.
    Any,
    /// Compound nodes of one family.
    Family(Family),
    /// Unary combinators by child shape.
    Unary(Shape),
    /// Pairs of children of an n-ary combinator (order-insensitive).
    Pair(Shape, Shape),
}

/// Table of reduction rules.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    table: HashMap<(CombinatorTag, Signature), Vec<Rule>>,
}

impl RuleRegistry {
    /// No rules at all (reduction then only substitutes reduced children).
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in closed forms.
    pub fn standard() -> Self {
        let mut reg = Self::empty();
        rules::install(&mut reg);
        reg
    }

    /// Add a rule; rules under the same key are tried in registration order.
    pub fn register(&mut self, tag: CombinatorTag, signature: Signature, rule: Rule) {
        self.table.entry((tag, signature)).or_default().push(rule);
    }

    /// Number of registered rules.
    pub fn len(&self) -> usize {
        self.table.values().map(Vec::len).sum()
    }

    /// True when no rule is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, tag: CombinatorTag, signature: Signature) -> &[Rule] {
        self.table.get(&(tag, signature)).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Apply the first matching rule to `kind`.
    fn rewrite(&self, graph: &Graph, kind: &Kind) -> Result<Option<(&'static str, Rewrite)>> {
        let tag = kind.tag();
        let mut keys = vec![Signature::Any];
        match kind {
            Kind::Affine { child, .. } => keys.push(Signature::Unary(Shape::of(child))),
            Kind::Compound { family, .. } => keys.push(Signature::Family(*family)),
            _ => {}
        }
        for key in keys {
            for rule in self.get(tag, key) {
                if let RuleAction::Node(f) = rule.action {
                    if let Some(rw) = f(graph, kind)? {
                        return Ok(Some((rule.name, rw)));
                    }
                }
            }
        }
        if let Kind::Convolution(children) = kind {
            return self.merge_pairs(graph, children);
        }
        Ok(None)
    }

    /// Try pair rules on every unordered pair of convolution children.
    fn merge_pairs(&self, graph: &Graph, children: &[Var]) -> Result<Option<(&'static str, Rewrite)>> {
        let shapes: Vec<Shape> = children.iter().map(Shape::of).collect();
        for i in 0..children.len() {
            for j in (i + 1)..children.len() {
                let (a, b) = (&children[i], &children[j]);
                let (sa, sb) = (shapes[i], shapes[j]);
                let candidates = [
                    (Signature::Pair(sa, sb), false),
                    (Signature::Pair(sb, sa), true),
                    (Signature::Pair(sa, Shape::Any), false),
                    (Signature::Pair(sb, Shape::Any), true),
                ];
                for (key, swapped) in candidates {
                    for rule in self.get(CombinatorTag::Convolution, key) {
                        let RuleAction::Pair(f) = rule.action else { continue };
                        let merged = if swapped { f(graph, b, a)? } else { f(graph, a, b)? };
                        if let Some(v) = merged {
                            let mut rest: Vec<Var> = Vec::with_capacity(children.len() - 1);
                            for (k, c) in children.iter().enumerate() {
                                if k == i {
                                    rest.push(v.clone());
                                } else if k != j {
                                    rest.push(c.clone());
                                }
                            }
                            let rw = if rest.len() == 1 {
                                Rewrite::Forward(v)
                            } else {
                                Rewrite::Into(Kind::Convolution(rest))
                            };
                            return Ok(Some((rule.name, rw)));
                        }
                    }
                }
            }
        }
        Ok(None)
    }
}

/// Normal form of a kind: a body that no rule changes, or an existing variable.
enum Normal {
    Kind(Kind),
    Forward(Var),
}

/// Follow redirects to the reduced form of `var`.
pub(crate) fn resolve(var: &Var) -> Var {
    let mut v = var.clone();
    while let Some(Reduction::Redirect(target)) = v.node.reduced.get() {
        v = if v.port == Port::Out {
            target.clone()
        } else {
            Var { node: target.node.clone(), port: v.port }
        };
    }
    v
}

impl Graph {
    /// Reduced form of `var`.
    ///
    /// Idempotent: reducing the result again returns it unchanged.
    pub fn reduce(&self, var: &Var) -> Result<Var> {
        let started = Instant::now();
        let pending = post_order(&var.node, |n| n.reduced.get().is_some())?;
        let count = pending.len();
        for node in pending {
            self.reduce_node(&node)?;
        }
        let out = resolve(var);
        if count > 0 {
            debug!("reduced {} node(s) under {} in {:?} -> {}", count, var, started.elapsed(), out);
        }
        Ok(out)
    }

    /// Create a node for `kind` in normal form (used by rules that build new subterms).
    pub fn derived(&self, kind: Kind) -> Result<Var> {
        kind.validate()?;
        match self.normalise(kind)?.0 {
            Normal::Forward(v) => Ok(v),
            Normal::Kind(k) => {
                let label = k.tag().name().to_string();
                Ok(self.insert_reduced(label, k))
            }
        }
    }

    fn reduce_node(&self, node: &std::sync::Arc<Node>) -> Result<()> {
        let kind = node.defined_kind()?;
        let mut changed = false;
        let resolved = kind.map_children(|c| {
            let r = resolve(c);
            if r != *c {
                changed = true;
            }
            r
        });
        let (normal, fired) = self.normalise(resolved)?;
        match normal {
            Normal::Forward(target) => self.redirect(node, target),
            Normal::Kind(_) if !changed && !fired => {
                let _ = node.reduced.set(Reduction::Irreducible);
            }
            Normal::Kind(k) => {
                let replacement = self.insert_reduced(node.label(), k);
                self.redirect(node, replacement);
            }
        }
        Ok(())
    }

    /// Rewrite until no rule fires. The flag reports whether any rule fired.
    fn normalise(&self, mut kind: Kind) -> Result<(Normal, bool)> {
        let mut fired = false;
        for _ in 0..MAX_REWRITES {
            match self.rules.rewrite(self, &kind)? {
                Some((name, Rewrite::Forward(v))) => {
                    debug!("rule {}: {} -> {}", name, kind.tag().name(), v);
                    return Ok((Normal::Forward(v), true));
                }
                Some((name, Rewrite::Into(next))) => {
                    debug!("rule {}: {} -> {}", name, kind.tag().name(), next.tag().name());
                    kind = next;
                    fired = true;
                }
                None => return Ok((Normal::Kind(kind), fired)),
            }
        }
        warn!("rewrite limit of {} reached for a {} node, keeping current form", MAX_REWRITES, kind.tag().name());
        Ok((Normal::Kind(kind), fired))
    }

    /// Point `old` at `target`, handing over its back-references.
    fn redirect(&self, old: &std::sync::Arc<Node>, target: Var) {
        if old.reduced.set(Reduction::Redirect(target.clone())).is_err() {
            return;
        }
        target.node.adopt_parents(old.take_parents());
        // The target stands for `old`, so it inherits every source `old` depended on.
        target.node.extend_sources(&old.sources());
        if let Some(kind) = old.kind.get() {
            for c in kind.children() {
                c.node.remove_parent(old);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbb_prob::Distribution;

    #[test]
    fn test_standard_registry_is_populated() {
        let reg = RuleRegistry::standard();
        assert!(!reg.is_empty());
        assert!(RuleRegistry::empty().is_empty());
    }

    #[test]
    fn test_shape_classification() {
        let g = Graph::new();
        let a = g.gamma(2.0, 1.0).unwrap();
        let k = g.compound(Family::Gamma, vec![a.clone().into(), 1.0.into()]).unwrap();
        let j = g.join(&[a.clone(), g.gamma(3.0, 1.0).unwrap()]).unwrap();
        assert_eq!(Shape::of(&a), Shape::Atomic(Family::Gamma));
        assert_eq!(Shape::of(&k), Shape::Compound(Family::Gamma));
        assert_eq!(Shape::of(&j.port(Port::First).unwrap()), Shape::Combinator(CombinatorTag::Join));
    }

    #[test]
    fn test_redirect_moves_parents() {
        let g = Graph::new();
        let a = g.gamma(1.0, 2.0).unwrap();
        let b = g.gamma(3.0, 2.0).unwrap();
        let c = g.convolution(&[a.clone(), b.clone()]).unwrap();
        let top = g.affine(&c, 2.0, 1.0).unwrap();
        let r = g.reduce(&c).unwrap();
        assert_eq!(r.distribution(), Some(&Distribution::shifted_gamma(4.0, 2.0, 0.0).unwrap()));
        assert!(a.parents().is_empty());
        assert_eq!(r.parents(), vec![top.clone()]);
    }

    #[test]
    fn test_reduced_form_keeps_dependencies() {
        let g = Graph::new();
        let a = g.gamma(1.0, 2.0).unwrap();
        let b = g.gamma(3.0, 2.0).unwrap();
        let r = g.reduce(&g.convolution(&[a.clone(), b]).unwrap()).unwrap();
        assert!(r.distribution().is_some());
        assert!(!r.independent_of(&a));
        assert!(matches!(g.maximum(&[r, a]), Err(sbb_core::Error::UnsupportedCombination(_))));
    }

    #[test]
    fn test_empty_registry_keeps_structure() {
        let mut g = Graph::new();
        *g.rules_mut() = RuleRegistry::empty();
        let a = g.gamma(1.0, 2.0).unwrap();
        let b = g.gamma(3.0, 2.0).unwrap();
        let c = g.convolution(&[a, b]).unwrap();
        assert_eq!(g.reduce(&c).unwrap(), c);
    }
}
