//! Graph: node construction, forward declarations and the ownership registry.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use log::debug;
use sbb_core::{Error, Result};
use sbb_prob::{Distribution, Family};
use serde::{Deserialize, Serialize};

use crate::config::EvalConfig;
use crate::reduce::RuleRegistry;
use crate::var::{Kind, Node, Param, Reduction, Var, ancestors, reaches, sources_of};

/// Registry length below which dead entries are not worth pruning.
const MIN_PRUNE: usize = 64;

/// Constructor selector for [`Graph::build`] and network descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Atomic distribution of the given family; params are the family parameters,
    /// optionally followed by a location shift for Gamma, InverseGamma and Weibull.
    Atomic(Family),
    /// params `[scale, offset]`, one child.
    Affine,
    /// Two or more children.
    Convolution,
    /// Two or more children.
    Minimum,
    /// Two or more children.
    Maximum,
    /// Two or more children.
    Join,
    /// Children `[x, y]` or `[x, y, a, b]`.
    Inhibition,
    /// params are the (fixed or random) family parameters.
    Compound(Family),
    /// params are one weight per child.
    Mixture,
    /// Children `[x, y, on_x, on_y]`.
    Conditional,
}

/// Weak handles on every node created through a graph.
///
/// Dead entries are dropped whenever the list outgrows twice its size after the last prune,
/// so the registry stays proportional to the live node count.
#[derive(Default)]
struct Registry {
    nodes: Vec<Weak<Node>>,
    next_prune: usize,
}

impl Registry {
    fn push(&mut self, node: &Arc<Node>) {
        if self.nodes.len() >= self.next_prune.max(MIN_PRUNE) {
            self.prune();
        }
        self.nodes.push(Arc::downgrade(node));
    }

    fn prune(&mut self) -> usize {
        self.nodes.retain(|w| w.strong_count() > 0);
        self.next_prune = 2 * self.nodes.len();
        self.nodes.len()
    }
}

/// Owner of the construction API, the rule table and the evaluation settings.
///
/// Nodes are shared through [`Var`] handles and outlive the graph if handles survive; the
/// graph only keeps weak references for bookkeeping.
pub struct Graph {
    pub(crate) config: EvalConfig,
    pub(crate) rules: RuleRegistry,
    registry: Mutex<Registry>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Graph with default configuration and the standard rule set.
    pub fn new() -> Self {
        Self {
            config: EvalConfig::default(),
            rules: RuleRegistry::standard(),
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Graph with a custom configuration.
    pub fn with_config(config: EvalConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, ..Self::new() })
    }

    /// Evaluation settings.
    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Reduction rule table.
    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    /// Mutable rule table, for registering additional closed forms.
    pub fn rules_mut(&mut self) -> &mut RuleRegistry {
        &mut self.rules
    }

    /// Create and register a node; children get a back-reference.
    pub(crate) fn insert(&self, label: String, kind: Kind) -> Var {
        let node = Node::new(label, Some(kind));
        if let Some(kind) = node.kind.get() {
            for c in kind.children() {
                c.node.add_parent(&node);
            }
        }
        self.register(&node);
        Var::out(node)
    }

    /// Insert a node produced by a rewrite; it is final, so reduction skips it.
    pub(crate) fn insert_reduced(&self, label: String, kind: Kind) -> Var {
        let v = self.insert(label, kind);
        let _ = v.node.reduced.set(Reduction::Irreducible);
        v
    }

    fn register(&self, node: &Arc<Node>) {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner).push(node);
    }

    /// Validate, check independence, insert.
    fn create(&self, kind: Kind) -> Result<Var> {
        kind.validate()?;
        kind.check_independence(|v| v.node.sources())?;
        let label = kind.tag().name().to_string();
        Ok(self.insert(label, kind))
    }

    /// Atomic node.
    pub fn atomic(&self, distribution: Distribution) -> Result<Var> {
        distribution.validate()?;
        let label = distribution.family().name().to_string();
        Ok(self.insert(label, Kind::Atomic(distribution)))
    }

    /// Point mass at `value`.
    pub fn delta(&self, value: f64) -> Result<Var> {
        self.atomic(Distribution::delta(value)?)
    }

    /// Uniform on `[a, b)`.
    pub fn uniform(&self, a: f64, b: f64) -> Result<Var> {
        self.atomic(Distribution::uniform(a, b)?)
    }

    /// Normal `N(mu, sigma)`.
    pub fn normal(&self, mu: f64, sigma: f64) -> Result<Var> {
        self.atomic(Distribution::normal(mu, sigma)?)
    }

    /// Gamma with shape `k` and scale `theta`.
    pub fn gamma(&self, k: f64, theta: f64) -> Result<Var> {
        self.atomic(Distribution::gamma(k, theta)?)
    }

    /// Exponential with the given rate.
    pub fn exponential(&self, rate: f64) -> Result<Var> {
        self.atomic(Distribution::exponential(rate)?)
    }

    /// Inverse-Gamma with shape `alpha` and scale `beta`.
    pub fn inverse_gamma(&self, alpha: f64, beta: f64) -> Result<Var> {
        self.atomic(Distribution::inverse_gamma(alpha, beta)?)
    }

    /// Weibull with shape `k` and scale `lambda`.
    pub fn weibull(&self, k: f64, lambda: f64) -> Result<Var> {
        self.atomic(Distribution::weibull(k, lambda)?)
    }

    /// `scale * child + offset`.
    pub fn affine(&self, child: &Var, scale: f64, offset: f64) -> Result<Var> {
        self.create(Kind::Affine { child: child.clone(), scale, offset })
    }

    /// Sum of independent children. A child listed `n` times counts as `n` times its value.
    pub fn convolution(&self, children: &[Var]) -> Result<Var> {
        self.create(Kind::Convolution(children.to_vec()))
    }

    /// Minimum of independent children.
    pub fn minimum(&self, children: &[Var]) -> Result<Var> {
        self.create(Kind::Minimum(children.to_vec()))
    }

    /// Maximum of independent children.
    pub fn maximum(&self, children: &[Var]) -> Result<Var> {
        self.create(Kind::Maximum(children.to_vec()))
    }

    /// Join of independent children; select `First`/`Slack` with [`Var::port`].
    pub fn join(&self, children: &[Var]) -> Result<Var> {
        self.create(Kind::Join(children.to_vec()))
    }

    /// Race between `x` and `y`.
    pub fn inhibition(&self, x: &Var, y: &Var) -> Result<Var> {
        self.create(Kind::Inhibition { x: x.clone(), y: y.clone(), continuations: None })
    }

    /// Race between `x` and `y` where the winner continues: `x + a` if `x` wins, else `y + b`.
    pub fn inhibition_with(&self, x: &Var, y: &Var, a: &Var, b: &Var) -> Result<Var> {
        self.create(Kind::Inhibition {
            x: x.clone(),
            y: y.clone(),
            continuations: Some((a.clone(), b.clone())),
        })
    }

    /// Distribution of `family` whose parameters may be random.
    pub fn compound(&self, family: Family, params: Vec<Param>) -> Result<Var> {
        self.create(Kind::Compound { family, params })
    }

    /// Child `i` with probability proportional to `weights[i]`.
    pub fn mixture(&self, weights: &[f64], children: &[Var]) -> Result<Var> {
        self.create(Kind::Mixture { weights: weights.to_vec(), children: children.to_vec() })
    }

    /// `on_x` if `x` finishes before `y`, otherwise `on_y`.
    pub fn conditional(&self, x: &Var, y: &Var, on_x: &Var, on_y: &Var) -> Result<Var> {
        self.create(Kind::Conditional {
            x: x.clone(),
            y: y.clone(),
            on_x: on_x.clone(),
            on_y: on_y.clone(),
        })
    }

    /// Forward declaration, completed later with [`Graph::define`].
    pub fn placeholder(&self, label: impl Into<String>) -> Var {
        let node = Node::new(label.into(), None);
        self.register(&node);
        Var::out(node)
    }

    /// Give a placeholder its body.
    ///
    /// Fails with `CyclicGraph` if the placeholder is reachable from any new child, and with
    /// `UnsupportedCombination` if the body would make the children of the placeholder or of
    /// any of its ancestors dependent. No node is modified in either case.
    pub fn define(&self, placeholder: &Var, kind: Kind) -> Result<()> {
        let node = &placeholder.node;
        if node.kind.get().is_some() {
            return Err(Error::InvalidParameter(format!("node {} is already defined", node.describe())));
        }
        kind.validate()?;
        if reaches(&kind.children(), node) {
            return Err(Error::CyclicGraph { node: node.describe() });
        }
        kind.check_independence(|v| v.node.sources())?;

        // Ancestors see the placeholder through every path; re-check them with its new sources.
        let mut added: BTreeSet<_> = sources_of(node.id, &kind);
        added.insert(node.id);
        let upstream = ancestors(node);
        let widened = |v: &Var| {
            let own = v.node.sources();
            if own.contains(&node.id) {
                Arc::new(own.union(&added).copied().collect())
            } else {
                own
            }
        };
        for a in &upstream {
            if let Some(k) = a.kind.get() {
                k.check_independence(widened)?;
            }
        }

        let children: Vec<Var> = kind.children().into_iter().cloned().collect();
        if node.kind.set(kind).is_err() {
            return Err(Error::InvalidParameter(format!("node {} is already defined", node.describe())));
        }
        for c in &children {
            c.node.add_parent(node);
        }
        node.extend_sources(&added);
        for a in &upstream {
            a.extend_sources(&added);
        }
        debug!("defined {}", node.describe());
        Ok(())
    }

    /// Generic constructor dispatching on a [`NodeKind`].
    ///
    /// Only compounds accept random parameters.
    pub fn build(&self, kind: NodeKind, params: &[Param], children: &[Var]) -> Result<Var> {
        let expect_children = |n: usize| -> Result<()> {
            if children.len() != n {
                return Err(Error::InvalidArity {
                    kind: kind_name(kind),
                    expected: format!("exactly {}", n),
                    got: children.len(),
                });
            }
            Ok(())
        };
        if !matches!(kind, NodeKind::Compound(_)) {
            if let Some(p) = params.iter().find(|p| p.random().is_some()) {
                return Err(Error::InvalidParameter(format!(
                    "{} accepts only fixed parameters, got {:?}",
                    kind_name(kind),
                    p
                )));
            }
        }
        let fixed: Vec<f64> = params.iter().filter_map(Param::fixed).collect();
        match kind {
            NodeKind::Atomic(family) => {
                expect_children(0)?;
                self.atomic(atomic_from_params(family, &fixed)?)
            }
            NodeKind::Affine => {
                expect_children(1)?;
                if fixed.len() != 2 {
                    return Err(Error::InvalidArity {
                        kind: "affine",
                        expected: "exactly 2 (scale, offset)".into(),
                        got: fixed.len(),
                    });
                }
                self.affine(&children[0], fixed[0], fixed[1])
            }
            NodeKind::Convolution => self.convolution(children),
            NodeKind::Minimum => self.minimum(children),
            NodeKind::Maximum => self.maximum(children),
            NodeKind::Join => self.join(children),
            NodeKind::Inhibition => match children {
                [x, y] => self.inhibition(x, y),
                [x, y, a, b] => self.inhibition_with(x, y, a, b),
                _ => Err(Error::InvalidArity {
                    kind: "inhibition",
                    expected: "2 or 4".into(),
                    got: children.len(),
                }),
            },
            NodeKind::Compound(family) => {
                expect_children(0)?;
                self.compound(family, params.to_vec())
            }
            NodeKind::Mixture => self.mixture(&fixed, children),
            NodeKind::Conditional => match children {
                [x, y, on_x, on_y] => self.conditional(x, y, on_x, on_y),
                _ => Err(Error::InvalidArity {
                    kind: "conditional",
                    expected: "exactly 4".into(),
                    got: children.len(),
                }),
            },
        }
    }

    /// Nodes created through this graph that are still alive.
    pub fn live_nodes(&self) -> usize {
        let reg = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        reg.nodes.iter().filter(|w| w.strong_count() > 0).count()
    }

    /// Drop registry entries of reclaimed nodes; returns the number still alive.
    pub fn collect(&self) -> usize {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner).prune()
    }

    /// Registry entries, dead ones included.
    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner).nodes.len()
    }
}

fn kind_name(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Atomic(f) => f.name(),
        NodeKind::Affine => "affine",
        NodeKind::Convolution => "convolution",
        NodeKind::Minimum => "minimum",
        NodeKind::Maximum => "maximum",
        NodeKind::Join => "join",
        NodeKind::Inhibition => "inhibition",
        NodeKind::Compound(_) => "compound",
        NodeKind::Mixture => "mixture",
        NodeKind::Conditional => "conditional",
    }
}

fn atomic_from_params(family: Family, params: &[f64]) -> Result<Distribution> {
    let n = family.arity();
    let shiftable = matches!(family, Family::Gamma | Family::InverseGamma | Family::Weibull);
    match (params.len(), shiftable) {
        (len, _) if len == n => family.with_params(params),
        (len, true) if len == n + 1 => {
            let (a, b, shift) = (params[0], params[1], params[2]);
            match family {
                Family::Gamma => Distribution::shifted_gamma(a, b, shift),
                Family::InverseGamma => Distribution::shifted_inverse_gamma(a, b, shift),
                _ => Distribution::shifted_weibull(a, b, shift),
            }
        }
        (len, _) => Err(Error::InvalidArity {
            kind: family.name(),
            expected: if shiftable {
                format!("{} or {} (with shift)", n, n + 1)
            } else {
                format!("exactly {}", n)
            },
            got: len,
        }),
    }
}
