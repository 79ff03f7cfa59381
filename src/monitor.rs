//! Tracers that collect evaluation statistics.
//!
//! [`PerformanceMonitor`] counts hashes and computations per plug and sums
//! compute time. [`ContextMonitor`] records how many distinct contexts each
//! plug was evaluated in, and which context variables varied between them.
//! Install them with [`GraphBuilder::tracer`](crate::GraphBuilder::tracer),
//! keeping an `Arc` to read the statistics afterwards.

use std::collections::{BTreeMap, HashSet};
use std::ops::AddAssign;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::context::{Context, Variable};
use crate::hash::Digest;
use crate::plug::PlugId;
use crate::tracer::{ComputeOutcome, Tracer};

/// Evaluation counters of one plug, or of several combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PerformanceStatistics {
    /// Hashes computed (hash cache hits excluded).
    pub hash_count: u64,
    /// Values computed (cache hits and joined computations excluded).
    pub compute_count: u64,
    /// Time spent in compute functions.
    pub total_compute_time: Duration,
}

impl AddAssign for PerformanceStatistics {
    fn add_assign(&mut self, rhs: Self) {
        self.hash_count += rhs.hash_count;
        self.compute_count += rhs.compute_count;
        self.total_compute_time += rhs.total_compute_time;
    }
}

/// Collects [`PerformanceStatistics`] per plug.
#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    statistics: Mutex<ahash::HashMap<PlugId, PerformanceStatistics>>,
}

impl PerformanceMonitor {
    /// A monitor with no statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics of one plug. Zero if the plug was never evaluated.
    pub fn plug_statistics(&self, plug: PlugId) -> PerformanceStatistics {
        self.statistics
            .lock()
            .get(&plug)
            .copied()
            .unwrap_or_default()
    }

    /// Statistics of every evaluated plug.
    pub fn all_statistics(&self) -> BTreeMap<PlugId, PerformanceStatistics> {
        self.statistics
            .lock()
            .iter()
            .map(|(plug, stats)| (*plug, *stats))
            .collect()
    }

    /// Sum over all plugs.
    pub fn combined_statistics(&self) -> PerformanceStatistics {
        let mut combined = PerformanceStatistics::default();
        for stats in self.statistics.lock().values() {
            combined += *stats;
        }
        combined
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.statistics.lock().clear();
    }
}

impl Tracer for PerformanceMonitor {
    fn on_hash(&self, plug: PlugId, _context: &Context, cached: bool) {
        if !cached {
            self.statistics.lock().entry(plug).or_default().hash_count += 1;
        }
    }

    fn on_compute_end(
        &self,
        plug: PlugId,
        _context: &Context,
        _outcome: &ComputeOutcome,
        duration: Duration,
    ) {
        let mut statistics = self.statistics.lock();
        let stats = statistics.entry(plug).or_default();
        stats.compute_count += 1;
        stats.total_compute_time += duration;
    }
}

/// Contexts one plug (or several, combined) was evaluated in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextStatistics {
    contexts: HashSet<Digest>,
    values: BTreeMap<Variable, HashSet<Digest>>,
}

impl ContextStatistics {
    fn record(&mut self, context: &Context) {
        if !self.contexts.insert(context.hash()) {
            return;
        }
        for variable in context.variables() {
            self.values
                .entry(variable)
                .or_default()
                .insert(context.variable_hash(variable));
        }
    }

    /// Number of distinct contexts.
    pub fn num_unique_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// Variables present in any of the contexts, in a stable order.
    pub fn variable_names(&self) -> Vec<Variable> {
        self.values.keys().copied().collect()
    }

    /// Number of distinct values a variable took.
    pub fn num_unique_values(&self, variable: Variable) -> usize {
        self.values.get(&variable).map_or(0, HashSet::len)
    }
}

impl AddAssign<&ContextStatistics> for ContextStatistics {
    fn add_assign(&mut self, rhs: &ContextStatistics) {
        self.contexts.extend(rhs.contexts.iter().copied());
        for (variable, values) in &rhs.values {
            self.values
                .entry(*variable)
                .or_default()
                .extend(values.iter().copied());
        }
    }
}

/// Collects [`ContextStatistics`] per plug.
///
/// Contexts are recorded when an output is hashed or computed.
#[derive(Debug, Default)]
pub struct ContextMonitor {
    statistics: Mutex<ahash::HashMap<PlugId, ContextStatistics>>,
}

impl ContextMonitor {
    /// A monitor with no statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics of one plug.
    pub fn plug_statistics(&self, plug: PlugId) -> ContextStatistics {
        self.statistics
            .lock()
            .get(&plug)
            .cloned()
            .unwrap_or_default()
    }

    /// Statistics of every evaluated plug.
    pub fn all_statistics(&self) -> BTreeMap<PlugId, ContextStatistics> {
        self.statistics
            .lock()
            .iter()
            .map(|(plug, stats)| (*plug, stats.clone()))
            .collect()
    }

    /// Union over all plugs.
    pub fn combined_statistics(&self) -> ContextStatistics {
        let mut combined = ContextStatistics::default();
        for stats in self.statistics.lock().values() {
            combined += stats;
        }
        combined
    }

    fn record(&self, plug: PlugId, context: &Context) {
        self.statistics
            .lock()
            .entry(plug)
            .or_default()
            .record(context);
    }
}

impl Tracer for ContextMonitor {
    fn on_hash(&self, plug: PlugId, context: &Context, cached: bool) {
        if !cached {
            self.record(plug, context);
        }
    }

    fn on_compute_start(&self, plug: PlugId, context: &Context) {
        self.record(plug, context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_performance_statistics_accumulate() {
        let monitor = PerformanceMonitor::new();
        let a = PlugId::new(0, 1);
        let b = PlugId::new(1, 2);
        let context = Context::new();
        monitor.on_hash(a, &context, false);
        monitor.on_hash(a, &context, true);
        monitor.on_compute_end(a, &context, &ComputeOutcome::Computed, Duration::from_millis(2));
        monitor.on_compute_end(b, &context, &ComputeOutcome::Computed, Duration::from_millis(3));

        let stats = monitor.plug_statistics(a);
        assert_eq!(stats.hash_count, 1);
        assert_eq!(stats.compute_count, 1);
        let combined = monitor.combined_statistics();
        assert_eq!(combined.compute_count, 2);
        assert_eq!(combined.total_compute_time, Duration::from_millis(5));
        assert_eq!(monitor.all_statistics().len(), 2);
    }

    #[test]
    fn test_context_statistics() {
        let monitor = ContextMonitor::new();
        let plug = PlugId::new(0, 1);
        for frame in [1.0, 2.0, 2.0, 3.0] {
            monitor.on_compute_start(plug, &Context::new().with_frame(frame));
        }
        let stats = monitor.plug_statistics(plug);
        assert_eq!(stats.num_unique_contexts(), 3);
        assert_eq!(stats.num_unique_values(Variable::Frame), 3);
        assert_eq!(stats.num_unique_values(Variable::FramesPerSecond), 1);
        assert_eq!(stats.num_unique_values(Variable::ScenePath), 0);
        assert_eq!(
            stats.variable_names(),
            vec![Variable::Frame, Variable::FramesPerSecond]
        );
    }
}
