//! Common data types for StochBB

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of a node in a variable graph.
///
/// Ids are unique per graph and never reused, so they are safe keys for memo tables
/// even after the node itself has been reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Evaluation method attempted for a node (carried by evaluation errors).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// Closed-form distribution, no numeric work.
    Analytic,
    /// Affine transform of a numeric grid.
    Affine,
    /// Discrete convolution of cell masses.
    Convolution,
    /// Order statistics (minimum / maximum / join).
    OrderStatistic,
    /// Joint winner/margin accumulation of a race.
    Inhibition,
    /// Mixture integral over random parameters.
    Compound,
    /// Weighted choice among variables.
    Mixture,
    /// Branch selected by a race.
    Conditional,
    /// Resolving a node body (placeholders, ports).
    Lookup,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Analytic => "analytic",
            Method::Affine => "affine",
            Method::Convolution => "convolution",
            Method::OrderStatistic => "order statistic",
            Method::Inhibition => "inhibition",
            Method::Compound => "compound",
            Method::Mixture => "mixture",
            Method::Conditional => "conditional",
            Method::Lookup => "lookup",
        };
        f.write_str(name)
    }
}
