//! Random-variable nodes and handles.
//!
//! A [`Var`] is a strong handle on a node plus the output port it selects. Parents own their
//! children through the `Var`s stored in their [`Kind`]; children only keep `Weak`
//! back-references to their parents, so the child relation never forms a reference cycle.
//!
//! Every node also records the random sources it depends on: atomic and compound draws and
//! undefined placeholders. Combinators that need independent inputs compare these sets at
//! construction and refuse children that share a source.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use sbb_core::{Error, Method, NodeId, Result};
use sbb_prob::{Distribution, Family, Marginal};
use serde::{Deserialize, Serialize};

/// Process-wide id source; ids are never reused.
static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Named output of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Port {
    /// Default output. Join: last arrival. Inhibition: race outcome (with continuation).
    Out,
    /// Join: earliest arrival.
    First,
    /// Join: last minus first arrival.
    Slack,
    /// Inhibition: finishing time given that `x` wins.
    XWins,
    /// Inhibition: finishing time given that `y` wins.
    YWins,
    /// Inhibition: loser minus winner.
    Margin,
}

const SINGLE_PORT: &[Port] = &[Port::Out];
const JOIN_PORTS: &[Port] = &[Port::Out, Port::First, Port::Slack];
const INHIBITION_PORTS: &[Port] = &[Port::Out, Port::XWins, Port::YWins, Port::Margin];

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Port::Out => "out",
            Port::First => "first",
            Port::Slack => "slack",
            Port::XWins => "x_wins",
            Port::YWins => "y_wins",
            Port::Margin => "margin",
        };
        f.write_str(s)
    }
}

/// Node kind without its payload; first key of the reduction rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinatorTag {
    /// Closed-form distribution.
    Atomic,
    /// `scale * X + offset`.
    Affine,
    /// Sum of independent children.
    Convolution,
    /// Earliest of independent children.
    Minimum,
    /// Latest of independent children.
    Maximum,
    /// Synchronisation of independent children (multi-port).
    Join,
    /// Race of two processes, optionally continued (multi-port).
    Inhibition,
    /// Distribution with random parameters.
    Compound,
    /// Weighted choice among children.
    Mixture,
    /// One of two branches, chosen by a race.
    Conditional,
}

impl CombinatorTag {
    /// Lower-case name.
    pub fn name(self) -> &'static str {
        match self {
            CombinatorTag::Atomic => "atomic",
            CombinatorTag::Affine => "affine",
            CombinatorTag::Convolution => "convolution",
            CombinatorTag::Minimum => "minimum",
            CombinatorTag::Maximum => "maximum",
            CombinatorTag::Join => "join",
            CombinatorTag::Inhibition => "inhibition",
            CombinatorTag::Compound => "compound",
            CombinatorTag::Mixture => "mixture",
            CombinatorTag::Conditional => "conditional",
        }
    }
}

/// Parameter of a compound distribution.
#[derive(Debug, Clone)]
pub enum Param {
    /// Known value.
    Fixed(f64),
    /// Value drawn from another variable.
    Random(Var),
}

impl Param {
    /// The fixed value, if any.
    pub fn fixed(&self) -> Option<f64> {
        match self {
            Param::Fixed(v) => Some(*v),
            Param::Random(_) => None,
        }
    }

    /// The random variable, if any.
    pub fn random(&self) -> Option<&Var> {
        match self {
            Param::Fixed(_) => None,
            Param::Random(v) => Some(v),
        }
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Fixed(v)
    }
}

impl From<Var> for Param {
    fn from(v: Var) -> Self {
        Param::Random(v)
    }
}

impl From<&Var> for Param {
    fn from(v: &Var) -> Self {
        Param::Random(v.clone())
    }
}

/// Body of a defined node.
#[derive(Debug, Clone)]
pub enum Kind {
    /// Closed-form distribution.
    Atomic(Distribution),
    /// `scale * child + offset`.
    Affine {
        /// Transformed variable.
        child: Var,
        /// Non-zero finite scale.
        scale: f64,
        /// Finite offset.
        offset: f64,
    },
    /// Sum of independent children.
    Convolution(Vec<Var>),
    /// Minimum of independent children.
    Minimum(Vec<Var>),
    /// Maximum of independent children.
    Maximum(Vec<Var>),
    /// Join of independent children (ports Out/First/Slack).
    Join(Vec<Var>),
    /// Race between `x` and `y` (ports Out/XWins/YWins/Margin).
    Inhibition {
        /// First racer.
        x: Var,
        /// Second racer.
        y: Var,
        /// `(a, b)`: Out is `x + a` when `x` wins and `y + b` otherwise.
        continuations: Option<(Var, Var)>,
    },
    /// `family` with possibly random parameters.
    Compound {
        /// Distribution family.
        family: Family,
        /// Positional parameters (`family.arity()` of them).
        params: Vec<Param>,
    },
    /// Child `i` with probability `weights[i] / sum(weights)`.
    Mixture {
        /// Non-negative finite weights, one per child.
        weights: Vec<f64>,
        /// Components (need not be independent).
        children: Vec<Var>,
    },
    /// `on_x` if `x` finishes before `y`, otherwise `on_y`.
    Conditional {
        /// First racer.
        x: Var,
        /// Second racer.
        y: Var,
        /// Outcome when `x` wins.
        on_x: Var,
        /// Outcome when `y` wins.
        on_y: Var,
    },
}

impl Kind {
    /// Combinator tag.
    pub fn tag(&self) -> CombinatorTag {
        match self {
            Kind::Atomic(_) => CombinatorTag::Atomic,
            Kind::Affine { .. } => CombinatorTag::Affine,
            Kind::Convolution(_) => CombinatorTag::Convolution,
            Kind::Minimum(_) => CombinatorTag::Minimum,
            Kind::Maximum(_) => CombinatorTag::Maximum,
            Kind::Join(_) => CombinatorTag::Join,
            Kind::Inhibition { .. } => CombinatorTag::Inhibition,
            Kind::Compound { .. } => CombinatorTag::Compound,
            Kind::Mixture { .. } => CombinatorTag::Mixture,
            Kind::Conditional { .. } => CombinatorTag::Conditional,
        }
    }

    /// Output ports in cache order.
    pub fn ports(&self) -> &'static [Port] {
        match self {
            Kind::Join(_) => JOIN_PORTS,
            Kind::Inhibition { .. } => INHIBITION_PORTS,
            _ => SINGLE_PORT,
        }
    }

    /// Every variable this node depends on (random compound parameters included).
    pub fn children(&self) -> Vec<&Var> {
        match self {
            Kind::Atomic(_) => Vec::new(),
            Kind::Affine { child, .. } => vec![child],
            Kind::Convolution(cs) | Kind::Minimum(cs) | Kind::Maximum(cs) | Kind::Join(cs) => {
                cs.iter().collect()
            }
            Kind::Inhibition { x, y, continuations } => {
                let mut out = vec![x, y];
                if let Some((a, b)) = continuations {
                    out.push(a);
                    out.push(b);
                }
                out
            }
            Kind::Compound { params, .. } => params.iter().filter_map(Param::random).collect(),
            Kind::Mixture { children, .. } => children.iter().collect(),
            Kind::Conditional { x, y, on_x, on_y } => vec![x, y, on_x, on_y],
        }
    }

    /// Same kind with every child variable passed through `f`.
    pub fn map_children<F: FnMut(&Var) -> Var>(&self, mut f: F) -> Kind {
        match self {
            Kind::Atomic(d) => Kind::Atomic(*d),
            Kind::Affine { child, scale, offset } => {
                Kind::Affine { child: f(child), scale: *scale, offset: *offset }
            }
            Kind::Convolution(cs) => Kind::Convolution(cs.iter().map(&mut f).collect()),
            Kind::Minimum(cs) => Kind::Minimum(cs.iter().map(&mut f).collect()),
            Kind::Maximum(cs) => Kind::Maximum(cs.iter().map(&mut f).collect()),
            Kind::Join(cs) => Kind::Join(cs.iter().map(&mut f).collect()),
            Kind::Inhibition { x, y, continuations } => {
                let x = f(x);
                let y = f(y);
                let continuations = continuations.as_ref().map(|(a, b)| (f(a), f(b)));
                Kind::Inhibition { x, y, continuations }
            }
            Kind::Compound { family, params } => Kind::Compound {
                family: *family,
                params: params
                    .iter()
                    .map(|p| match p {
                        Param::Fixed(v) => Param::Fixed(*v),
                        Param::Random(v) => Param::Random(f(v)),
                    })
                    .collect(),
            },
            Kind::Mixture { weights, children } => Kind::Mixture {
                weights: weights.clone(),
                children: children.iter().map(&mut f).collect(),
            },
            Kind::Conditional { x, y, on_x, on_y } => {
                Kind::Conditional { x: f(x), y: f(y), on_x: f(on_x), on_y: f(on_y) }
            }
        }
    }

    /// Check arity and parameter domains.
    pub fn validate(&self) -> Result<()> {
        match self {
            Kind::Atomic(d) => d.validate(),
            Kind::Affine { scale, offset, .. } => {
                if !scale.is_finite() || *scale == 0.0 {
                    return Err(Error::InvalidParameter(format!(
                        "affine scale must be finite and non-zero, got {}",
                        scale
                    )));
                }
                if !offset.is_finite() {
                    return Err(Error::InvalidParameter(format!(
                        "affine offset must be finite, got {}",
                        offset
                    )));
                }
                Ok(())
            }
            Kind::Convolution(cs) | Kind::Minimum(cs) | Kind::Maximum(cs) | Kind::Join(cs) => {
                if cs.len() < 2 {
                    return Err(Error::InvalidArity {
                        kind: self.tag().name(),
                        expected: "at least 2".into(),
                        got: cs.len(),
                    });
                }
                Ok(())
            }
            Kind::Inhibition { .. } | Kind::Conditional { .. } => Ok(()),
            Kind::Compound { family, params } => {
                if params.len() != family.arity() {
                    return Err(Error::InvalidArity {
                        kind: "compound",
                        expected: format!("exactly {} {}", family.arity(), family),
                        got: params.len(),
                    });
                }
                let fixed: Option<Vec<f64>> = params.iter().map(Param::fixed).collect();
                if let Some(values) = fixed {
                    return family.with_params(&values).map(|_| ());
                }
                for (i, p) in params.iter().enumerate() {
                    if let Param::Fixed(v) = p {
                        family.validate_param(i, *v)?;
                    }
                }
                Ok(())
            }
            Kind::Mixture { weights, children } => {
                if children.len() < 2 {
                    return Err(Error::InvalidArity {
                        kind: "mixture",
                        expected: "at least 2".into(),
                        got: children.len(),
                    });
                }
                if weights.len() != children.len() {
                    return Err(Error::InvalidArity {
                        kind: "mixture",
                        expected: format!("one weight per child ({})", children.len()),
                        got: weights.len(),
                    });
                }
                if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
                    return Err(Error::InvalidParameter(format!(
                        "mixture weights must be finite and >= 0, got {}",
                        w
                    )));
                }
                if weights.iter().sum::<f64>() <= 0.0 {
                    return Err(Error::InvalidParameter("mixture weights sum to zero".into()));
                }
                Ok(())
            }
        }
    }

    /// Reject children that share a random source where this combinator needs independence.
    ///
    /// `sources` maps a child to the sources it depends on. Repeats of one convolution child
    /// are a scaled copy rather than a dependency, so they are allowed.
    pub(crate) fn check_independence<F: Fn(&Var) -> Sources>(&self, sources: F) -> Result<()> {
        let groups: Vec<Vec<&Var>> = match self {
            Kind::Atomic(_) | Kind::Affine { .. } | Kind::Mixture { .. } => return Ok(()),
            Kind::Convolution(cs) => {
                let mut distinct: Vec<&Var> = Vec::with_capacity(cs.len());
                for c in cs {
                    if !distinct.contains(&c) {
                        distinct.push(c);
                    }
                }
                distinct.into_iter().map(|c| vec![c]).collect()
            }
            Kind::Minimum(cs) | Kind::Maximum(cs) | Kind::Join(cs) => {
                cs.iter().map(|c| vec![c]).collect()
            }
            Kind::Inhibition { x, y, continuations } => match continuations {
                Some((a, b)) => vec![vec![x], vec![y], vec![a, b]],
                None => vec![vec![x], vec![y]],
            },
            Kind::Conditional { x, y, on_x, on_y } => vec![vec![x], vec![y], vec![on_x, on_y]],
            Kind::Compound { params, .. } => {
                params.iter().filter_map(Param::random).map(|v| vec![v]).collect()
            }
        };
        let mut seen: BTreeSet<NodeId> = BTreeSet::new();
        for group in groups {
            let mut own: BTreeSet<NodeId> = BTreeSet::new();
            for v in &group {
                own.extend(sources(v).iter().copied());
            }
            if let Some(shared) = own.intersection(&seen).next() {
                return Err(Error::UnsupportedCombination(format!(
                    "{} needs independent children, but {} shares the random source {} with another child",
                    self.tag().name(),
                    group[0],
                    shared
                )));
            }
            seen.extend(own);
        }
        Ok(())
    }

    /// Move every owned child node into `out` (used by the iterative drop).
    fn release_into(self, out: &mut Vec<Arc<Node>>) {
        match self {
            Kind::Atomic(_) => {}
            Kind::Affine { child, .. } => out.push(child.node),
            Kind::Convolution(cs) | Kind::Minimum(cs) | Kind::Maximum(cs) | Kind::Join(cs) => {
                out.extend(cs.into_iter().map(|v| v.node))
            }
            Kind::Inhibition { x, y, continuations } => {
                out.push(x.node);
                out.push(y.node);
                if let Some((a, b)) = continuations {
                    out.push(a.node);
                    out.push(b.node);
                }
            }
            Kind::Compound { params, .. } => out.extend(params.into_iter().filter_map(|p| match p {
                Param::Random(v) => Some(v.node),
                Param::Fixed(_) => None,
            })),
            Kind::Mixture { children, .. } => out.extend(children.into_iter().map(|v| v.node)),
            Kind::Conditional { x, y, on_x, on_y } => {
                out.extend([x.node, y.node, on_x.node, on_y.node])
            }
        }
    }
}

/// Outcome of reducing a node; written at most once.
#[derive(Debug)]
pub(crate) enum Reduction {
    /// No rule applies and every child is already in reduced form.
    Irreducible,
    /// The node is equivalent to another variable.
    Redirect(Var),
}

/// Ids of the random sources a node depends on.
pub(crate) type Sources = Arc<BTreeSet<NodeId>>;

/// One vertex of the variable graph.
pub(crate) struct Node {
    pub(crate) id: NodeId,
    label: Mutex<String>,
    pub(crate) kind: OnceLock<Kind>,
    parents: Mutex<Vec<Weak<Node>>>,
    sources: Mutex<Sources>,
    /// One entry per port; `None` for a conditional port whose condition has zero probability.
    pub(crate) cache: OnceLock<Vec<Option<Marginal>>>,
    pub(crate) reduced: OnceLock<Reduction>,
    pub(crate) evaluations: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Node {
    pub(crate) fn new(label: String, kind: Option<Kind>) -> Arc<Node> {
        let id = NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed));
        let sources = match &kind {
            Some(kind) => sources_of(id, kind),
            None => BTreeSet::from([id]),
        };
        let cell = OnceLock::new();
        if let Some(kind) = kind {
            let _ = cell.set(kind);
        }
        Arc::new(Node {
            id,
            label: Mutex::new(label),
            kind: cell,
            parents: Mutex::new(Vec::new()),
            sources: Mutex::new(Arc::new(sources)),
            cache: OnceLock::new(),
            reduced: OnceLock::new(),
            evaluations: AtomicUsize::new(0),
        })
    }

    pub(crate) fn label(&self) -> String {
        lock(&self.label).clone()
    }

    /// `'label' #id`, used in error messages and logs.
    pub(crate) fn describe(&self) -> String {
        format!("'{}' {}", lock(&self.label), self.id)
    }

    /// Body of the node, or a lookup error for an undefined placeholder.
    pub(crate) fn defined_kind(&self) -> Result<&Kind> {
        self.kind.get().ok_or_else(|| Error::Evaluation {
            node: self.describe(),
            method: Method::Lookup,
            reason: "placeholder was never defined".into(),
        })
    }

    pub(crate) fn add_parent(&self, parent: &Arc<Node>) {
        let mut own = lock(&self.parents);
        if !own.iter().any(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(parent))) {
            own.push(Arc::downgrade(parent));
        }
    }

    pub(crate) fn remove_parent(&self, parent: &Node) {
        lock(&self.parents).retain(|w| !std::ptr::eq(w.as_ptr(), parent));
    }

    pub(crate) fn take_parents(&self) -> Vec<Weak<Node>> {
        std::mem::take(&mut *lock(&self.parents))
    }

    pub(crate) fn adopt_parents(&self, parents: Vec<Weak<Node>>) {
        let mut own = lock(&self.parents);
        for p in parents {
            if p.strong_count() > 0 && !own.iter().any(|q| Weak::ptr_eq(q, &p)) {
                own.push(p);
            }
        }
    }

    pub(crate) fn live_parents(&self) -> Vec<Arc<Node>> {
        let mut parents = lock(&self.parents);
        parents.retain(|w| w.strong_count() > 0);
        parents.iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn sources(&self) -> Sources {
        lock(&self.sources).clone()
    }

    pub(crate) fn extend_sources(&self, extra: &BTreeSet<NodeId>) {
        let mut own = lock(&self.sources);
        if !extra.is_subset(&**own) {
            Arc::make_mut(&mut own).extend(extra.iter().copied());
        }
    }
}

/// Sources of a node with body `kind`: its own draw (if it makes one) plus its children's.
pub(crate) fn sources_of(id: NodeId, kind: &Kind) -> BTreeSet<NodeId> {
    let mut out = BTreeSet::new();
    match kind {
        Kind::Atomic(d) if !d.is_degenerate() => {
            out.insert(id);
        }
        Kind::Compound { .. } => {
            out.insert(id);
        }
        _ => {}
    }
    for c in kind.children() {
        out.extend(c.node.sources().iter().copied());
    }
    out
}

impl Drop for Node {
    fn drop(&mut self) {
        // Unlink children without recursing, so long chains cannot overflow the stack.
        let mut pending = Vec::new();
        release(self, &mut pending);
        while let Some(child) = pending.pop() {
            if let Some(mut inner) = Arc::into_inner(child) {
                release(&mut inner, &mut pending);
            }
        }
    }
}

fn release(node: &mut Node, out: &mut Vec<Arc<Node>>) {
    if let Some(kind) = node.kind.take() {
        kind.release_into(out);
    }
    if let Some(Reduction::Redirect(target)) = node.reduced.take() {
        out.push(target.node);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("label", &self.label())
            .field("tag", &self.kind.get().map(Kind::tag))
            .finish()
    }
}

/// Handle on a node output. Cloning shares the node.
#[derive(Clone)]
pub struct Var {
    pub(crate) node: Arc<Node>,
    pub(crate) port: Port,
}

impl Var {
    pub(crate) fn out(node: Arc<Node>) -> Var {
        Var { node, port: Port::Out }
    }

    /// Stable node id.
    pub fn id(&self) -> NodeId {
        self.node.id
    }

    /// Selected output port.
    pub fn selected_port(&self) -> Port {
        self.port
    }

    /// Handle on another output of the same node.
    pub fn port(&self, port: Port) -> Result<Var> {
        let kind = self.node.kind.get().ok_or_else(|| {
            Error::InvalidParameter(format!(
                "cannot select port {} of undefined node {}",
                port,
                self.node.describe()
            ))
        })?;
        if !kind.ports().contains(&port) {
            return Err(Error::InvalidParameter(format!(
                "{} node {} has no port {}",
                kind.tag().name(),
                self.node.describe(),
                port
            )));
        }
        Ok(Var { node: self.node.clone(), port })
    }

    /// Human readable label (not load-bearing).
    pub fn label(&self) -> String {
        self.node.label()
    }

    /// Replace the label.
    pub fn set_label(&self, label: impl Into<String>) {
        *lock(&self.node.label) = label.into();
    }

    /// Node body; `None` for an undefined placeholder.
    pub fn kind(&self) -> Option<&Kind> {
        self.node.kind.get()
    }

    /// Combinator tag; `None` for an undefined placeholder.
    pub fn tag(&self) -> Option<CombinatorTag> {
        self.kind().map(Kind::tag)
    }

    /// The closed form if this is an atomic node.
    pub fn distribution(&self) -> Option<&Distribution> {
        match self.kind() {
            Some(Kind::Atomic(d)) => Some(d),
            _ => None,
        }
    }

    /// Children of the node (random compound parameters included).
    pub fn children(&self) -> Vec<Var> {
        self.kind().map(|k| k.children().into_iter().cloned().collect()).unwrap_or_default()
    }

    /// Live parents, as `Out` handles.
    pub fn parents(&self) -> Vec<Var> {
        self.node.live_parents().into_iter().map(Var::out).collect()
    }

    /// How many times the node's marginals were computed (0 or 1).
    pub fn evaluations(&self) -> usize {
        self.node.evaluations.load(Ordering::Relaxed)
    }

    /// Whether a cached evaluation exists.
    pub fn is_evaluated(&self) -> bool {
        self.node.cache.get().is_some()
    }

    /// True when the two variables share no random source.
    pub fn independent_of(&self, other: &Var) -> bool {
        self.node.sources().is_disjoint(&other.node.sources())
    }

    /// True when both handles point at the same node (ports ignored).
    pub fn same_node(&self, other: &Var) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        self.same_node(other) && self.port == other.port
    }
}

impl Eq for Var {}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Var({}", self.node.describe())?;
        if self.port != Port::Out {
            write!(f, ".{}", self.port)?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Nodes reachable from `root`, children before parents.
///
/// Nodes for which `skip` returns true are neither emitted nor expanded. Every expanded node
/// must be defined.
pub(crate) fn post_order<F: Fn(&Node) -> bool>(root: &Arc<Node>, skip: F) -> Result<Vec<Arc<Node>>> {
    let mut order = Vec::new();
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<(Arc<Node>, bool)> = vec![(root.clone(), false)];
    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            order.push(node);
            continue;
        }
        if skip(&node) || !visited.insert(node.id) {
            continue;
        }
        let kind = node.defined_kind()?;
        let children: Vec<Arc<Node>> = kind
            .children()
            .into_iter()
            .filter(|c| !visited.contains(&c.node.id))
            .map(|c| c.node.clone())
            .collect();
        stack.push((node, true));
        for c in children.into_iter().rev() {
            stack.push((c, false));
        }
    }
    Ok(order)
}

/// Every node that reaches `node` through parent edges, `node` excluded.
pub(crate) fn ancestors(node: &Node) -> Vec<Arc<Node>> {
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut out = Vec::new();
    let mut stack = node.live_parents();
    while let Some(n) = stack.pop() {
        if seen.insert(n.id) {
            stack.extend(n.live_parents());
            out.push(n);
        }
    }
    out
}

/// True if `target` is reachable from any of `from` (following child edges).
pub(crate) fn reaches(from: &[&Var], target: &Node) -> bool {
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<Arc<Node>> = from.iter().map(|v| v.node.clone()).collect();
    while let Some(node) = stack.pop() {
        if std::ptr::eq(Arc::as_ptr(&node), target) {
            return true;
        }
        if !visited.insert(node.id) {
            continue;
        }
        if let Some(kind) = node.kind.get() {
            stack.extend(kind.children().into_iter().map(|c| c.node.clone()));
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(d: Distribution) -> Var {
        Var::out(Node::new("atom".into(), Some(Kind::Atomic(d))))
    }

    #[test]
    fn test_ports_per_kind() {
        let a = atom(Distribution::uniform(0.0, 1.0).unwrap());
        let b = atom(Distribution::uniform(0.0, 2.0).unwrap());
        assert!(a.port(Port::First).is_err());
        let join = Var::out(Node::new("join".into(), Some(Kind::Join(vec![a.clone(), b.clone()]))));
        let first = join.port(Port::First).unwrap();
        assert_eq!(first.selected_port(), Port::First);
        assert!(join.port(Port::Margin).is_err());
        assert_ne!(first, join);
        assert!(first.same_node(&join));
    }

    #[test]
    fn test_undefined_node_has_no_ports() {
        let p = Var::out(Node::new("pending".into(), None));
        assert!(p.kind().is_none());
        assert!(p.port(Port::Out).is_err());
    }

    #[test]
    fn test_compound_arity_validation() {
        let k = Kind::Compound { family: Family::Gamma, params: vec![Param::Fixed(1.0)] };
        assert!(matches!(k.validate(), Err(Error::InvalidArity { got: 1, .. })));
        let k = Kind::Compound {
            family: Family::Gamma,
            params: vec![Param::Fixed(1.0), Param::Fixed(f64::NAN)],
        };
        assert!(matches!(k.validate(), Err(Error::InvalidParameter(_))));
        let k = Kind::Compound { family: Family::Gamma, params: vec![Param::Fixed(-1.0), Param::Fixed(1.0)] };
        assert!(matches!(k.validate(), Err(Error::InvalidParameter(_))));
        let shape = atom(Distribution::uniform(1.0, 2.0).unwrap());
        let k = Kind::Compound { family: Family::Gamma, params: vec![shape.into(), Param::Fixed(0.0)] };
        assert!(matches!(k.validate(), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_mixture_validation() {
        let a = atom(Distribution::uniform(0.0, 1.0).unwrap());
        let b = atom(Distribution::uniform(2.0, 3.0).unwrap());
        let mix = |weights: Vec<f64>| Kind::Mixture { weights, children: vec![a.clone(), b.clone()] };
        assert!(mix(vec![0.3, 0.7]).validate().is_ok());
        assert!(matches!(mix(vec![1.0]).validate(), Err(Error::InvalidArity { got: 1, .. })));
        assert!(matches!(mix(vec![-1.0, 2.0]).validate(), Err(Error::InvalidParameter(_))));
        assert!(matches!(mix(vec![0.0, 0.0]).validate(), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_sources_follow_children() {
        let x = atom(Distribution::uniform(0.0, 1.0).unwrap());
        let y = atom(Distribution::uniform(0.0, 1.0).unwrap());
        let d = atom(Distribution::delta(1.0).unwrap());
        let shifted = Var::out(Node::new("a".into(), Some(Kind::Affine { child: x.clone(), scale: 1.0, offset: 1.0 })));
        assert!(d.node.sources().is_empty());
        assert!(x.independent_of(&y));
        assert!(!shifted.independent_of(&x));

        let by_node = |v: &Var| v.node.sources();
        assert!(Kind::Maximum(vec![x.clone(), y.clone(), d.clone(), d.clone()]).check_independence(by_node).is_ok());
        assert!(matches!(
            Kind::Maximum(vec![x.clone(), x.clone()]).check_independence(by_node),
            Err(Error::UnsupportedCombination(_))
        ));
        assert!(matches!(
            Kind::Minimum(vec![x.clone(), shifted.clone()]).check_independence(by_node),
            Err(Error::UnsupportedCombination(_))
        ));
        assert!(Kind::Convolution(vec![x.clone(), x.clone(), y.clone()]).check_independence(by_node).is_ok());
        assert!(Kind::Convolution(vec![x.clone(), shifted.clone()]).check_independence(by_node).is_err());

        // Continuations may share a source with each other, never with the racers.
        let race = |a: &Var, b: &Var| Kind::Inhibition {
            x: x.clone(),
            y: y.clone(),
            continuations: Some((a.clone(), b.clone())),
        };
        let z = atom(Distribution::normal(0.0, 1.0).unwrap());
        assert!(race(&z, &z).check_independence(by_node).is_ok());
        assert!(race(&z, &shifted).check_independence(by_node).is_err());
        let mix = Kind::Mixture { weights: vec![1.0, 1.0], children: vec![x.clone(), shifted.clone()] };
        assert!(mix.check_independence(by_node).is_ok());
    }

    #[test]
    fn test_long_chain_drops_without_overflow() {
        let mut v = atom(Distribution::normal(0.0, 1.0).unwrap());
        for _ in 0..200_000 {
            let node = Node::new("a".into(), Some(Kind::Affine { child: v, scale: 1.0, offset: 1.0 }));
            v = Var::out(node);
        }
        drop(v);
    }

    #[test]
    fn test_post_order_visits_shared_child_once() {
        let x = atom(Distribution::uniform(0.0, 1.0).unwrap());
        let conv = Var::out(Node::new("c".into(), Some(Kind::Convolution(vec![x.clone(), x.clone()]))));
        let order = post_order(&conv.node, |_| false).unwrap();
        assert_eq!(order.len(), 2);
        assert_eq!(order[0].id, x.id());
        assert_eq!(order[1].id, conv.id());
    }
}
