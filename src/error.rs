//! Error types for graph editing and evaluation.
//!
//! Structural errors ([`Error::Cycle`], [`Error::Direction`],
//! [`Error::ConnectedPlug`], [`Error::TypeMismatch`]) are detected before
//! the graph is mutated. Computation failures are reported as
//! [`Error::Compute`] and are shared between every caller waiting on the
//! same computation.

use std::fmt;
use std::sync::Arc;

use crate::plug::{Direction, NodeId, PlugId};
use crate::value::ValueKind;

/// Errors returned by [`Graph`](crate::Graph) operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Connecting would create a circular dependency.
    #[error("connecting {source_plug} to {destination} would create a cycle")]
    Cycle {
        /// Path of the would-be source plug.
        source_plug: String,
        /// Path of the would-be destination plug.
        destination: String,
    },

    /// A plug with the wrong direction was used in a connection or value-set call.
    #[error("{plug} is an {direction} plug and cannot be used for {operation}")]
    Direction {
        /// Path of the offending plug.
        plug: String,
        /// Its direction.
        direction: Direction,
        /// The attempted operation.
        operation: &'static str,
    },

    /// Attempt to set the value of a plug that is driven by a connection.
    #[error("cannot set the value of {plug} because it has an input connection from {input}")]
    ConnectedPlug {
        /// Path of the driven plug.
        plug: String,
        /// Path of the plug driving it.
        input: String,
    },

    /// A value or connection does not match the plug's kind.
    #[error("{plug} holds {expected} values, not {found}")]
    TypeMismatch {
        /// Path of the plug.
        plug: String,
        /// The plug's kind.
        expected: ValueKind,
        /// The kind that was supplied.
        found: ValueKind,
    },

    /// The plug does not exist, or was destroyed.
    #[error("unknown plug {0:?}")]
    UnknownPlug(PlugId),

    /// The node does not exist, or was destroyed.
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    /// No plug with this name exists on the node, or no such path exists.
    #[error("no plug named {0:?}")]
    UnknownPlugName(String),

    /// A computation failed.
    #[error(transparent)]
    Compute(#[from] ComputeError),
}

/// A failed computation.
///
/// Clone is cheap; the same error value is delivered to the caller that ran
/// the computation and to every caller that joined it. Failures are never
/// cached, so the next request for the same value retries.
#[derive(Clone)]
pub struct ComputeError {
    plug: PlugId,
    plug_path: Arc<str>,
    cause: Arc<anyhow::Error>,
}

impl ComputeError {
    pub(crate) fn new(plug: PlugId, plug_path: impl Into<Arc<str>>, cause: anyhow::Error) -> Self {
        Self {
            plug,
            plug_path: plug_path.into(),
            cause: Arc::new(cause),
        }
    }

    /// The plug whose computation failed.
    pub fn plug(&self) -> PlugId {
        self.plug
    }

    /// Path (`node.plug`) of the plug whose computation failed.
    pub fn plug_path(&self) -> &str {
        &self.plug_path
    }

    /// The underlying cause.
    pub fn cause(&self) -> &Arc<anyhow::Error> {
        &self.cause
    }

    /// Attempts to downcast the cause to a specific type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.cause.downcast_ref::<E>()
    }

    /// Returns `true` if the computation failed because of an evaluation cycle.
    pub fn is_cycle(&self) -> bool {
        self.downcast_ref::<EvaluationCycle>().is_some()
    }
}

impl fmt::Debug for ComputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeError")
            .field("plug", &self.plug_path)
            .field("cause", &self.cause)
            .finish()
    }
}

impl fmt::Display for ComputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error computing {}: {:#}", self.plug_path, self.cause)
    }
}

impl std::error::Error for ComputeError {}

/// Cause used when a computation re-enters a value that is already being
/// computed on the same thread.
#[derive(Debug, Clone, thiserror::Error)]
#[error("evaluation cycle: {}", path.join(" -> "))]
pub struct EvaluationCycle {
    /// Plug paths forming the cycle, outermost first.
    pub path: Vec<String>,
}

/// Cause used when the thread running a computation unwound before
/// publishing a result.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("computation abandoned before completion")]
pub struct ComputationAbandoned;

/// Result alias for graph operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    fn plug() -> PlugId {
        PlugId::new(3, 7)
    }

    #[test]
    fn test_compute_error_display() {
        let err = ComputeError::new(plug(), "add.sum", anyhow::anyhow!("overflow"));
        assert_eq!(err.plug_path(), "add.sum");
        assert!(err.to_string().contains("overflow"));
        assert!(!err.is_cycle());
    }

    #[test]
    fn test_cycle_cause() {
        let cause = EvaluationCycle {
            path: vec!["a.out".into(), "b.out".into(), "a.out".into()],
        };
        let err = ComputeError::new(plug(), "a.out", cause.into());
        assert!(err.is_cycle());
        assert!(err.to_string().contains("a.out -> b.out -> a.out"));
    }

    #[test]
    fn test_compute_error_converts() {
        let err: Error = ComputeError::new(plug(), "n.out", anyhow::anyhow!("boom")).into();
        assert!(matches!(err, Error::Compute(_)));
        assert!(err.to_string().contains("boom"));
    }
}
