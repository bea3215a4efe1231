//! Evaluation configuration.

use sbb_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Numeric knobs for reduction, evaluation and sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Accepted deviation of a grid's mass from 1, and convergence threshold (L1 over cell
    /// masses) for compound refinement.
    pub tolerance: f64,
    /// Tail probability left outside a child's support when planning grids.
    pub tail_alpha: f64,
    /// Cells across the narrowest non-degenerate child support.
    pub resolution: usize,
    /// Upper bound on the cells of a one-dimensional grid.
    pub max_grid_points: usize,
    /// Upper bound on the cells of a two-dimensional accumulation (join slack, race margin).
    pub max_joint_points: usize,
    /// Initial discretisation nodes per random compound parameter.
    pub compound_nodes: usize,
    /// Maximum number of node doublings for compound mixtures.
    pub max_refinements: usize,
    /// Apply the reduction rules before numeric evaluation.
    pub reduce_before_eval: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-3,
            tail_alpha: 1e-6,
            resolution: 512,
            max_grid_points: 1 << 15,
            max_joint_points: 1 << 20,
            compound_nodes: 32,
            max_refinements: 4,
            reduce_before_eval: true,
        }
    }
}

impl EvalConfig {
    /// Check that every knob is usable.
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0 && self.tolerance < 1.0) {
            return Err(Error::InvalidParameter(format!(
                "tolerance must be in (0, 1), got {}",
                self.tolerance
            )));
        }
        if !(self.tail_alpha.is_finite() && self.tail_alpha > 0.0 && self.tail_alpha < self.tolerance)
        {
            return Err(Error::InvalidParameter(format!(
                "tail_alpha must be in (0, tolerance), got {}",
                self.tail_alpha
            )));
        }
        if self.resolution < 8 {
            return Err(Error::InvalidParameter(format!(
                "resolution must be >= 8, got {}",
                self.resolution
            )));
        }
        if self.max_grid_points < self.resolution {
            return Err(Error::InvalidParameter(format!(
                "max_grid_points must be >= resolution, got {} < {}",
                self.max_grid_points, self.resolution
            )));
        }
        if self.max_joint_points < 64 {
            return Err(Error::InvalidParameter(format!(
                "max_joint_points must be >= 64, got {}",
                self.max_joint_points
            )));
        }
        if self.compound_nodes < 2 {
            return Err(Error::InvalidParameter(format!(
                "compound_nodes must be >= 2, got {}",
                self.compound_nodes
            )));
        }
        Ok(())
    }

    /// Side length cap of a square two-dimensional accumulation.
    pub(crate) fn max_joint_side(&self) -> usize {
        ((self.max_joint_points as f64).sqrt() as usize).min(self.max_grid_points)
    }
}
