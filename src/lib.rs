//! Plug-Flow: a plug-based dataflow graph for incremental computation.
//!
//! Nodes own typed input and output plugs. Inputs hold a stored value or
//! are connected to another plug; outputs are computed by their node from
//! the inputs that affect them and from ambient [`Context`] variables.
//!
//! # Key Features
//!
//! - **Dirty propagation**: edits dirty every downstream plug exactly once,
//!   even through diamonds, and notify observers through [`Signal`]s
//! - **Content hashing**: every plug has a SHA-256 hash composed from
//!   upstream hashes, computed without evaluating any value
//! - **Compute cache**: values are cached by `(plug, hash)`, so equal inputs
//!   never compute twice
//! - **Task collaboration**: concurrent requests for the same value share one
//!   computation, and all of them see the same result or the same failure
//! - **Failure isolation**: failed computations are never cached and retry on
//!   the next request
//! - **Observability**: [`Tracer`] hooks, [`PerformanceMonitor`] and
//!   [`ContextMonitor`]
//!
//! # Example
//!
//! ```
//! use plug_flow::{Context, FnNode, Graph, ValueKind};
//!
//! let add = FnNode::builder("Add")
//!     .input("a", 0)
//!     .input("b", 0)
//!     .output("sum", ValueKind::Int, |inputs| {
//!         Ok((inputs.int("a")? + inputs.int("b")?).into())
//!     })
//!     .build();
//!
//! let graph = Graph::new();
//! let first = graph.add_node("first", add.clone());
//! let second = graph.add_node("second", add);
//!
//! let a = graph.plug_by_path("first.a").unwrap();
//! let b = graph.plug_by_path("first.b").unwrap();
//! graph.set_value(a, 1).unwrap();
//! graph.set_value(b, 2).unwrap();
//! graph
//!     .connect(graph.plug(first, "sum").unwrap(), graph.plug(second, "a").unwrap())
//!     .unwrap();
//!
//! let sum = graph.plug(second, "sum").unwrap();
//! let context = Context::new();
//! assert_eq!(graph.get_value(sum, &context).unwrap().as_int(), Some(3));
//! assert_eq!(graph.compute_count(sum), 1);
//!
//! // Served from the cache.
//! graph.get_value(sum, &context).unwrap();
//! assert_eq!(graph.compute_count(sum), 1);
//! ```

#![warn(missing_docs)]

mod cache;
mod config;
mod context;
mod error;
mod eval;
mod graph;
mod hash;
pub mod monitor;
mod node;
mod plug;
mod propagation;
pub mod signal;
pub mod tracer;
mod value;

pub use cache::{CacheStatistics, ComputeCache, ComputeKey, Lookup};
pub use config::{GraphConfig, DEFAULT_CACHE_CAPACITY, DEFAULT_HASH_CACHE_CAPACITY};
pub use context::{Context, Variable};
pub use error::{ComputationAbandoned, ComputeError, Error, EvaluationCycle, Result};
pub use graph::{Graph, GraphBuilder};
pub use hash::{Digest, DigestHasher};
pub use monitor::{ContextMonitor, ContextStatistics, PerformanceMonitor, PerformanceStatistics};
pub use node::{CachePolicy, ComputeInputs, FnNode, FnNodeBuilder, HashInputs, NodeType};
pub use plug::{Direction, NodeId, PlugDescriptor, PlugId};
pub use signal::{BlockedConnection, Connection, ScopedConnection, Signal};
pub use tracer::{ComputeOutcome, LogTracer, MultiplexTracer, NoopTracer, Tracer};
pub use value::{Value, ValueKind};
