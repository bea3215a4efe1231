//! # sbb-core
//!
//! Shared foundations for the StochBB engine.
//!
//! This crate provides:
//! - the error taxonomy used by every other crate ([`Error`], [`Result`])
//! - the [`Density`] trait implemented by analytic distributions and numeric grids
//! - small identity/diagnostic types ([`NodeId`], [`Method`])
//!
//! ## Architecture
//!
//! Probability math (`sbb-prob`) and the variable DAG (`sbb-engine`) both depend on this
//! crate, never on each other's internals.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Error types.
pub mod error;
/// Core traits.
pub mod traits;
/// Shared small types.
pub mod types;

pub use error::{Error, Result};
pub use traits::Density;
pub use types::{Method, NodeId};
