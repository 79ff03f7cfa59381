//! Tracer trait for observing graph evaluation.
//!
//! All methods have empty default implementations, so a tracer only
//! implements what it needs. The default [`NoopTracer`] compiles down to
//! nothing.
//!
//! # Example
//!
//! ```ignore
//! use plug_flow::{Graph, PlugId, Tracer};
//!
//! struct PrintDirty;
//!
//! impl Tracer for PrintDirty {
//!     fn on_plug_dirtied(&self, plug: PlugId) {
//!         println!("dirtied: {plug:?}");
//!     }
//! }
//!
//! let graph = Graph::builder().tracer(PrintDirty).build();
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{ComputeKey, Lookup};
use crate::context::Context;
use crate::plug::PlugId;

/// Result of a computation, as reported to tracers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputeOutcome {
    /// The value was computed.
    Computed,
    /// The computation failed.
    Failed {
        /// Rendered error.
        message: String,
    },
}

/// Observer of graph evaluation events.
///
/// Methods are called on the evaluating thread, possibly from many threads
/// at once, and must not block.
pub trait Tracer: Send + Sync + 'static {
    /// A hash was requested for an output plug. `cached` is true when it was
    /// served from the hash cache.
    #[inline]
    fn on_hash(&self, _plug: PlugId, _context: &Context, _cached: bool) {}

    /// The compute cache was consulted for a standard-policy output.
    #[inline]
    fn on_cache_check(&self, _key: &ComputeKey, _lookup: Lookup) {}

    /// This thread joined a computation another thread was running.
    #[inline]
    fn on_collaboration(&self, _key: &ComputeKey) {}

    /// A computation is about to run.
    #[inline]
    fn on_compute_start(&self, _plug: PlugId, _context: &Context) {}

    /// A computation finished.
    #[inline]
    fn on_compute_end(
        &self,
        _plug: PlugId,
        _context: &Context,
        _outcome: &ComputeOutcome,
        _duration: Duration,
    ) {
    }

    /// A plug was dirtied by propagation.
    #[inline]
    fn on_plug_dirtied(&self, _plug: PlugId) {}

    /// An evaluation re-entered a value already being evaluated on the
    /// same thread.
    #[inline]
    fn on_cycle_detected(&self, _path: &[String]) {}
}

/// Tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

impl<T: Tracer + ?Sized> Tracer for Arc<T> {
    fn on_hash(&self, plug: PlugId, context: &Context, cached: bool) {
        (**self).on_hash(plug, context, cached)
    }

    fn on_cache_check(&self, key: &ComputeKey, lookup: Lookup) {
        (**self).on_cache_check(key, lookup)
    }

    fn on_collaboration(&self, key: &ComputeKey) {
        (**self).on_collaboration(key)
    }

    fn on_compute_start(&self, plug: PlugId, context: &Context) {
        (**self).on_compute_start(plug, context)
    }

    fn on_compute_end(
        &self,
        plug: PlugId,
        context: &Context,
        outcome: &ComputeOutcome,
        duration: Duration,
    ) {
        (**self).on_compute_end(plug, context, outcome, duration)
    }

    fn on_plug_dirtied(&self, plug: PlugId) {
        (**self).on_plug_dirtied(plug)
    }

    fn on_cycle_detected(&self, path: &[String]) {
        (**self).on_cycle_detected(path)
    }
}

/// Tracer that writes events to the `log` facade.
///
/// Computations and cycles are logged at debug level, everything else at
/// trace level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn on_hash(&self, plug: PlugId, _context: &Context, cached: bool) {
        log::trace!("hash {plug:?} cached={cached}");
    }

    fn on_cache_check(&self, key: &ComputeKey, lookup: Lookup) {
        log::trace!("cache {:?} {} -> {lookup:?}", key.plug, key.hash);
    }

    fn on_collaboration(&self, key: &ComputeKey) {
        log::trace!("joined computation of {:?}", key.plug);
    }

    fn on_compute_start(&self, plug: PlugId, context: &Context) {
        log::debug!("compute {plug:?} frame={}", context.frame());
    }

    fn on_compute_end(
        &self,
        plug: PlugId,
        _context: &Context,
        outcome: &ComputeOutcome,
        duration: Duration,
    ) {
        match outcome {
            ComputeOutcome::Computed => log::debug!("computed {plug:?} in {duration:?}"),
            ComputeOutcome::Failed { message } => {
                log::debug!("compute of {plug:?} failed after {duration:?}: {message}")
            }
        }
    }

    fn on_plug_dirtied(&self, plug: PlugId) {
        log::trace!("dirtied {plug:?}");
    }

    fn on_cycle_detected(&self, path: &[String]) {
        log::debug!("evaluation cycle: {}", path.join(" -> "));
    }
}

/// Forwards every event to several tracers, in order.
#[derive(Default)]
pub struct MultiplexTracer {
    tracers: Vec<Box<dyn Tracer>>,
}

impl std::fmt::Debug for MultiplexTracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiplexTracer")
            .field("tracers", &self.tracers.len())
            .finish()
    }
}

impl MultiplexTracer {
    /// An empty multiplexer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tracer.
    pub fn with(mut self, tracer: impl Tracer) -> Self {
        self.tracers.push(Box::new(tracer));
        self
    }

    /// Add a tracer.
    pub fn push(&mut self, tracer: impl Tracer) {
        self.tracers.push(Box::new(tracer));
    }
}

impl Tracer for MultiplexTracer {
    fn on_hash(&self, plug: PlugId, context: &Context, cached: bool) {
        for tracer in &self.tracers {
            tracer.on_hash(plug, context, cached);
        }
    }

    fn on_cache_check(&self, key: &ComputeKey, lookup: Lookup) {
        for tracer in &self.tracers {
            tracer.on_cache_check(key, lookup);
        }
    }

    fn on_collaboration(&self, key: &ComputeKey) {
        for tracer in &self.tracers {
            tracer.on_collaboration(key);
        }
    }

    fn on_compute_start(&self, plug: PlugId, context: &Context) {
        for tracer in &self.tracers {
            tracer.on_compute_start(plug, context);
        }
    }

    fn on_compute_end(
        &self,
        plug: PlugId,
        context: &Context,
        outcome: &ComputeOutcome,
        duration: Duration,
    ) {
        for tracer in &self.tracers {
            tracer.on_compute_end(plug, context, outcome, duration);
        }
    }

    fn on_plug_dirtied(&self, plug: PlugId) {
        for tracer in &self.tracers {
            tracer.on_plug_dirtied(plug);
        }
    }

    fn on_cycle_detected(&self, path: &[String]) {
        for tracer in &self.tracers {
            tracer.on_cycle_detected(path);
        }
    }
}
