//! Monte Carlo sampling of variables.
//!
//! A node is one random variable, so within a draw every node is realised once and each parent
//! reads the same value: a draw is one walk over the graph with a value map keyed by node id.
//! The walk is demand-driven, so a mixture or a conditional only draws the branch it picks.
//! It uses an explicit task stack; deep chains cannot overflow the call stack.
//!
//! Conditional ports (`XWins` / `YWins`) and compounds with out-of-domain parameters redraw
//! their own inputs until the condition holds. Compound redraws are counted, and a run whose
//! share of invalid parameter draws exceeds the configured tolerance fails the same way
//! numeric evaluation does.
//!
//! Draws are split into fixed-size chunks processed in parallel with rayon. Chunk `c` gets its
//! own `StdRng` seeded from `(seed, c)`, so results depend only on the seed and `n`, never on
//! the number of threads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use log::debug;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use sbb_core::{Error, Method, NodeId, Result};
use sbb_prob::Family;

use crate::graph::Graph;
use crate::var::{Kind, Node, Param, Var, post_order};

/// Draws per parallel chunk.
const CHUNK: usize = 4096;

/// Attempts before a conditional port (`XWins` / `YWins`) gives up.
const MAX_REJECTIONS: usize = 10_000;

/// Attempts before a compound gives up on drawing valid parameters.
const MAX_PARAM_REDRAWS: usize = 1000;

/// Seed of chunk `chunk`.
fn chunk_seed(seed: u64, chunk: u64) -> u64 {
    seed.wrapping_mul(2_654_435_761).wrapping_add(chunk)
}

/// Values of one node in one draw, in [`Kind::ports`] order; NaN where a port is undefined.
type Ports = [f64; 4];

const UNDEFINED: f64 = f64::NAN;

fn single(v: f64) -> Ports {
    [v, UNDEFINED, UNDEFINED, UNDEFINED]
}

/// Weighted pickers of every mixture below the roots, built once per sampling call.
type Pickers = HashMap<NodeId, WeightedIndex<f64>>;

/// Parameter draws of one compound node: `(total, invalid)`.
type Tally = HashMap<NodeId, (usize, usize)>;

fn fail(var: &Var, method: Method, reason: String) -> Error {
    Error::Evaluation { node: var.node.describe(), method, reason }
}

/// Position of the selected port in [`Kind::ports`].
fn port_index(var: &Var) -> Result<usize> {
    var.node
        .defined_kind()?
        .ports()
        .iter()
        .position(|p| *p == var.port)
        .ok_or_else(|| fail(var, Method::Lookup, format!("no port {}", var.port)))
}

enum Task<'a> {
    /// Push the value of `var`, drawing its node first if this draw has not reached it yet.
    Visit(&'a Var),
    /// Racers of `var` are on the value stack; pick the branch to draw next.
    Branch(&'a Var),
    /// Operands of `var` are on the value stack; `x_first` is the race outcome if a branch
    /// was already taken.
    Finish(&'a Var, Option<bool>),
}

/// Operands drawn before a node is combined, for nodes without branches.
fn operands(kind: &Kind) -> Vec<&Var> {
    match kind {
        Kind::Atomic(_) | Kind::Mixture { .. } | Kind::Conditional { .. } => Vec::new(),
        Kind::Affine { child, .. } => vec![child],
        Kind::Convolution(cs) | Kind::Minimum(cs) | Kind::Maximum(cs) | Kind::Join(cs) => {
            cs.iter().collect()
        }
        Kind::Inhibition { x, y, .. } => vec![x, y],
        Kind::Compound { params, .. } => params.iter().filter_map(Param::random).collect(),
    }
}

/// Stacks and value map of one draw.
struct Draw<'a> {
    pickers: &'a Pickers,
    tasks: Vec<Task<'a>>,
    values: Vec<f64>,
    memo: HashMap<NodeId, Ports>,
}

impl<'a> Draw<'a> {
    fn new(pickers: &'a Pickers) -> Self {
        Self { pickers, tasks: Vec::new(), values: Vec::new(), memo: HashMap::new() }
    }

    /// Start a new realisation of the graph.
    fn reset(&mut self) {
        self.tasks.clear();
        self.values.clear();
        self.memo.clear();
    }

    /// Value of `root` in the current realisation.
    fn value<R: Rng>(&mut self, root: &'a Var, rng: &mut R, tally: &mut Tally) -> Result<f64> {
        self.tasks.push(Task::Visit(root));
        while let Some(task) = self.tasks.pop() {
            match task {
                Task::Visit(var) => self.visit(var, rng, tally)?,
                Task::Branch(var) => self.branch(var, rng)?,
                Task::Finish(var, x_first) => {
                    let ports = self.finish(var, x_first, rng, tally)?;
                    self.memo.insert(var.node.id, ports);
                    self.emit(var, ports, rng, tally)?;
                }
            }
        }
        self.values.pop().ok_or_else(|| fail(root, Method::Lookup, "no value was drawn".into()))
    }

    fn visit<R: Rng>(&mut self, var: &'a Var, rng: &mut R, tally: &mut Tally) -> Result<()> {
        if let Some(ports) = self.memo.get(&var.node.id).copied() {
            return self.emit(var, ports, rng, tally);
        }
        match var.node.defined_kind()? {
            Kind::Atomic(d) => {
                let v = d.sample(rng)?;
                self.memo.insert(var.node.id, single(v));
                self.values.push(v);
            }
            Kind::Mixture { children, .. } => {
                let pickers = self.pickers;
                let picker = pickers.get(&var.node.id).ok_or_else(|| {
                    fail(var, Method::Lookup, "mixture has no weight table".into())
                })?;
                self.tasks.push(Task::Finish(var, None));
                self.tasks.push(Task::Visit(&children[rng.sample(picker)]));
            }
            Kind::Inhibition { x, y, continuations: Some(_) } | Kind::Conditional { x, y, .. } => {
                self.tasks.push(Task::Branch(var));
                self.tasks.push(Task::Visit(y));
                self.tasks.push(Task::Visit(x));
            }
            kind => {
                self.tasks.push(Task::Finish(var, None));
                for c in operands(kind).into_iter().rev() {
                    self.tasks.push(Task::Visit(c));
                }
            }
        }
        Ok(())
    }

    fn branch<R: Rng>(&mut self, var: &'a Var, rng: &mut R) -> Result<()> {
        let n = self.values.len();
        if n < 2 {
            return Err(fail(var, Method::Lookup, "operand stack underflow".into()));
        }
        let (x, y) = (self.values[n - 2], self.values[n - 1]);
        let x_first = x < y || (x == y && rng.random_bool(0.5));
        let next = match var.node.defined_kind()? {
            Kind::Inhibition { continuations: Some((a, b)), .. } => {
                if x_first { a } else { b }
            }
            Kind::Conditional { on_x, on_y, .. } => {
                if x_first { on_x } else { on_y }
            }
            other => {
                return Err(fail(var, Method::Lookup, format!("{} has no branches", other.tag().name())));
            }
        };
        self.tasks.push(Task::Finish(var, Some(x_first)));
        self.tasks.push(Task::Visit(next));
        Ok(())
    }

    fn finish<R: Rng>(
        &mut self,
        var: &'a Var,
        x_first: Option<bool>,
        rng: &mut R,
        tally: &mut Tally,
    ) -> Result<Ports> {
        let kind = var.node.defined_kind()?;
        let arity = match kind {
            Kind::Mixture { .. } => 1,
            Kind::Conditional { .. } | Kind::Inhibition { continuations: Some(_), .. } => 3,
            other => operands(other).len(),
        };
        let start = self
            .values
            .len()
            .checked_sub(arity)
            .ok_or_else(|| fail(var, Method::Lookup, "operand stack underflow".into()))?;
        let ops: Vec<f64> = self.values.drain(start..).collect();
        Ok(match kind {
            Kind::Atomic(d) => single(d.sample(rng)?),
            Kind::Affine { scale, offset, .. } => single(scale * ops[0] + offset),
            Kind::Convolution(_) => single(ops.iter().sum()),
            Kind::Minimum(_) => single(ops.iter().copied().fold(f64::INFINITY, f64::min)),
            Kind::Maximum(_) => single(ops.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
            Kind::Join(_) => {
                let first = ops.iter().copied().fold(f64::INFINITY, f64::min);
                let last = ops.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                [last, first, last - first, UNDEFINED]
            }
            Kind::Inhibition { .. } => {
                let (x, y) = (ops[0], ops[1]);
                let x_first = x_first.unwrap_or_else(|| x < y || (x == y && rng.random_bool(0.5)));
                let winner = if x_first { x } else { y };
                let out = ops.get(2).map_or(winner, |next| winner + next);
                let (xw, yw) = if x_first { (x, UNDEFINED) } else { (UNDEFINED, y) };
                [out, xw, yw, (x - y).abs()]
            }
            Kind::Conditional { .. } | Kind::Mixture { .. } => single(ops[arity - 1]),
            Kind::Compound { family, params } => {
                single(self.compound(var, *family, params, ops, rng, tally)?)
            }
        })
    }

    /// Push the port `var` selects, redrawing the race on its own while the port is undefined.
    fn emit<R: Rng>(&mut self, var: &Var, ports: Ports, rng: &mut R, tally: &mut Tally) -> Result<()> {
        let idx = port_index(var)?;
        let mut value = ports[idx];
        let mut attempts = 1;
        while value.is_nan() {
            if attempts >= MAX_REJECTIONS {
                return Err(fail(
                    var,
                    Method::Inhibition,
                    format!("conditional port {} rejected {} draws in a row", var.port, MAX_REJECTIONS),
                ));
            }
            attempts += 1;
            value = self.redraw(&var.node, rng, tally)?[idx];
        }
        self.values.push(value);
        Ok(())
    }

    /// Value of `var` in a realisation of its own, independent of the current one.
    fn fresh<R: Rng>(&self, var: &Var, rng: &mut R, tally: &mut Tally) -> Result<f64> {
        Draw::new(self.pickers).value(var, rng, tally)
    }

    /// Ports of `node` in a realisation of its own, independent of the current one.
    fn redraw<R: Rng>(&self, node: &Arc<Node>, rng: &mut R, tally: &mut Tally) -> Result<Ports> {
        let root = Var::out(node.clone());
        let mut fresh = Draw::new(self.pickers);
        fresh.value(&root, rng, tally)?;
        fresh
            .memo
            .get(&node.id)
            .copied()
            .ok_or_else(|| fail(&root, Method::Lookup, "node was not drawn".into()))
    }

    fn compound<R: Rng>(
        &self,
        var: &Var,
        family: Family,
        params: &[Param],
        mut drawn: Vec<f64>,
        rng: &mut R,
        tally: &mut Tally,
    ) -> Result<f64> {
        let mut last = None;
        for _ in 0..MAX_PARAM_REDRAWS {
            let mut random = drawn.iter();
            let values: Vec<f64> = params
                .iter()
                .map(|p| match p {
                    Param::Fixed(v) => *v,
                    Param::Random(_) => random.next().copied().unwrap_or(UNDEFINED),
                })
                .collect();
            let count = tally.entry(var.node.id).or_insert((0, 0));
            count.0 += 1;
            match family.with_params(&values) {
                Ok(d) => return d.sample(rng),
                Err(e) => {
                    count.1 += 1;
                    last = Some(e);
                }
            }
            drawn = params
                .iter()
                .filter_map(Param::random)
                .map(|p| self.fresh(p, rng, tally))
                .collect::<Result<Vec<f64>>>()?;
        }
        Err(Error::UnsupportedCombination(format!(
            "{}: no valid {} parameters after {} draws (last: {})",
            var.node.describe(),
            family,
            MAX_PARAM_REDRAWS,
            last.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

impl Graph {
    /// `n` independent draws of `var`, reproducible for a given `seed`.
    pub fn sample(&self, var: &Var, n: usize, seed: u64) -> Result<Vec<f64>> {
        let target = self.prepare(var)?;
        self.draw_rows(std::slice::from_ref(&target), n, seed)
    }

    /// `n` joint draws of `vars`, reproducible for a given `seed`.
    ///
    /// Row `i` holds one realisation of every variable: nodes reachable from several of them
    /// are drawn once per row and shared. The graph is sampled as built, without reduction,
    /// because a closed form found by reduction is a fresh node that shares nothing.
    pub fn sample_joint(&self, vars: &[Var], n: usize, seed: u64) -> Result<Vec<Vec<f64>>> {
        if vars.is_empty() {
            return Err(Error::InvalidArity { kind: "sample_joint", expected: "at least 1".into(), got: 0 });
        }
        let flat = self.draw_rows(vars, n, seed)?;
        Ok(flat.chunks(vars.len()).map(<[f64]>::to_vec).collect())
    }

    /// Row-major draws of `targets`.
    fn draw_rows(&self, targets: &[Var], n: usize, seed: u64) -> Result<Vec<f64>> {
        let started = Instant::now();
        // Surface undefined placeholders before spawning any work.
        let mut pickers = Pickers::new();
        for t in targets {
            for node in post_order(&t.node, |_| false)? {
                if let Some(Kind::Mixture { weights, .. }) = node.kind.get() {
                    let picker = WeightedIndex::new(weights).map_err(|e| {
                        Error::InvalidParameter(format!("mixture {} weights: {}", node.describe(), e))
                    })?;
                    pickers.insert(node.id, picker);
                }
            }
        }

        let chunks = n.div_ceil(CHUNK);
        let parts: Vec<(Vec<f64>, Tally)> = (0..chunks)
            .into_par_iter()
            .map(|c| -> Result<(Vec<f64>, Tally)> {
                let len = CHUNK.min(n - c * CHUNK);
                let mut rng = StdRng::seed_from_u64(chunk_seed(seed, c as u64));
                let mut tally = Tally::new();
                let mut draw = Draw::new(&pickers);
                let mut out = Vec::with_capacity(len * targets.len());
                for _ in 0..len {
                    draw.reset();
                    for t in targets {
                        out.push(draw.value(t, &mut rng, &mut tally)?);
                    }
                }
                Ok((out, tally))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(n * targets.len());
        let mut tally = Tally::new();
        for (values, part) in parts {
            out.extend(values);
            for (id, (total, invalid)) in part {
                let count = tally.entry(id).or_insert((0, 0));
                count.0 += total;
                count.1 += invalid;
            }
        }
        for (id, (total, invalid)) in tally {
            let share = invalid as f64 / total as f64;
            if share > self.config.tolerance {
                return Err(Error::UnsupportedCombination(format!(
                    "compound {}: {:.3e} of the drawn parameters leave the family's domain",
                    id, share
                )));
            }
        }
        debug!("sampled {} draws of {} variable(s) in {:?}", n, targets.len(), started.elapsed());
        Ok(out)
    }
}
