//! # sbb-engine
//!
//! Random-variable algebra for StochBB.
//!
//! This crate provides:
//! - the variable DAG ([`Graph`], [`Var`]) with affine, convolution, minimum, maximum, join,
//!   inhibition, compound, mixture and conditional combinators
//! - the reduction rule table ([`RuleRegistry`]) that rewrites sub-graphs into closed forms
//! - numeric evaluation into [`Marginal`]s (analytic or [`DensityGrid`]) with per-node caching
//! - Monte Carlo sampling ([`Graph::sample`], [`Graph::sample_joint`]) for cross-checks
//! - JSON network descriptions ([`NetworkSpec`])
//!
//! ## Architecture
//!
//! Nodes are shared through `Arc` handles; parents own children, children keep weak
//! back-references. Reduction and evaluation are explicit post-order walks over the nodes that
//! still need work, and both store their outcome in write-once cells on the node.
//!
//! A node is one random variable: every parent sees the same realisation. Combinators whose
//! operands must be independent (order statistics, races, compound parameters, distinct
//! summands) refuse operands that share a source node with
//! [`Error::UnsupportedCombination`]; a repeated summand is a scale (`x + x = 2x`).
//!
//! ```
//! use sbb_engine::Graph;
//!
//! let g = Graph::new();
//! let a = g.gamma(2.0, 1.5).unwrap();
//! let b = g.gamma(3.0, 1.5).unwrap();
//! let total = g.convolution(&[a, b]).unwrap();
//! let m = g.evaluate(&total).unwrap();
//! assert!(m.is_analytic());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Evaluation settings.
pub mod config;
mod eval;
/// Graph construction and ownership bookkeeping.
pub mod graph;
/// JSON network descriptions.
pub mod network;
/// Reduction rules.
pub mod reduce;
mod sampler;
/// Nodes, handles, ports and node bodies.
pub mod var;

pub use config::EvalConfig;
pub use graph::{Graph, NodeKind};
pub use network::{ChildRef, Network, NetworkSpec, NodeSpec, ParamSpec};
pub use reduce::{NodeRuleFn, PairRuleFn, Rewrite, Rule, RuleAction, RuleRegistry, Shape, Signature};
pub use var::{CombinatorTag, Kind, Param, Port, Var};

pub use sbb_core::{Density, Error, Method, NodeId, Result};
pub use sbb_prob::{DensityGrid, Distribution, Family, Marginal};
