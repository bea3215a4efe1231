//! Error types for StochBB

use thiserror::Error;

use crate::types::Method;

/// StochBB error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Distribution or combinator parameter outside its valid domain.
    ///
    /// Raised at construction, never at evaluation.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Combinator or family given too few (or too many) children or parameters.
    #[error("Invalid arity: {kind} expects {expected} arguments, got {got}")]
    InvalidArity {
        /// Combinator name.
        kind: &'static str,
        /// Human readable arity requirement (e.g. "at least 2").
        expected: String,
        /// Number of children supplied.
        got: usize,
    },

    /// Adding an edge would make a node its own descendant.
    #[error("Cyclic graph: defining {node} would make it reachable from its own children")]
    CyclicGraph {
        /// Label and id of the node that would close the cycle.
        node: String,
    },

    /// Numeric evaluation did not reach the configured tolerance.
    #[error("Evaluation of {node} failed ({method}): {reason}")]
    Evaluation {
        /// Label and id of the offending node.
        node: String,
        /// Method that was attempted.
        method: Method,
        /// What went wrong.
        reason: String,
    },

    /// A combinator/family pairing that has no implementation, or children that are not
    /// independent where the combinator requires it.
    #[error("Unsupported combination: {0}")]
    UnsupportedCombination(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_error_mentions_node_and_method() {
        let err = Error::Evaluation {
            node: "'lexical' #7".into(),
            method: Method::Compound,
            reason: "mixture did not converge after 4 refinements".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'lexical' #7"));
        assert!(msg.contains("compound"));
        assert!(msg.contains("4 refinements"));
    }

    #[test]
    fn test_arity_message() {
        let err = Error::InvalidArity { kind: "minimum", expected: "at least 2".into(), got: 1 };
        assert_eq!(err.to_string(), "Invalid arity: minimum expects at least 2 arguments, got 1");
    }

    #[test]
    fn test_json_error_converts() {
        let bad: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = bad.unwrap_err().into();
        assert!(matches!(err, Error::Json(_)));
    }
}
