//! The plug graph: nodes, plugs, connections and values.
//!
//! Structural edits take an exclusive lock; evaluation only takes short
//! shared locks to snapshot what it needs, and never holds a lock while
//! running node code. Signals are emitted after the lock is released.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use slab::Slab;

use crate::cache::{CacheStatistics, ComputeCache, HashCache, PlugCounters};
use crate::config::GraphConfig;
use crate::error::{Error, Result};
use crate::node::NodeType;
use crate::plug::{Direction, NodeData, NodeId, PlugData, PlugDescriptor, PlugId};
use crate::signal::Signal;
use crate::tracer::{NoopTracer, Tracer};
use crate::value::{Value, ValueKind};

/// Nodes and plugs, guarded together by the graph's lock.
#[derive(Default)]
pub(crate) struct Structure {
    nodes: Slab<NodeData>,
    plugs: Slab<PlugData>,
    names: ahash::HashMap<String, NodeId>,
    generation: u64,
}

impl Structure {
    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub(crate) fn plug(&self, id: PlugId) -> Result<&PlugData> {
        self.plugs
            .get(id.key())
            .filter(|p| p.id == id)
            .ok_or(Error::UnknownPlug(id))
    }

    pub(crate) fn plug_mut(&mut self, id: PlugId) -> Result<&mut PlugData> {
        self.plugs
            .get_mut(id.key())
            .filter(|p| p.id == id)
            .ok_or(Error::UnknownPlug(id))
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&NodeData> {
        self.nodes
            .get(id.key())
            .filter(|n| n.id == id)
            .ok_or(Error::UnknownNode(id))
    }

    pub(crate) fn find_plug(&self, node: &NodeData, name: &str) -> Option<PlugId> {
        node.plugs
            .iter()
            .copied()
            .find(|id| self.plug(*id).is_ok_and(|p| p.name == name))
    }

    /// `node.plug` path, or the debug form of a destroyed id.
    pub(crate) fn path(&self, id: PlugId) -> String {
        match self.plug(id) {
            Ok(plug) => match self.node(plug.node) {
                Ok(node) => format!("{}.{}", node.name, plug.name),
                Err(_) => plug.name.clone(),
            },
            Err(_) => format!("{id:?}"),
        }
    }

    fn unique_name(&self, name: &str) -> String {
        if !self.names.contains_key(name) {
            return name.to_string();
        }
        let base = name.trim_end_matches(|c: char| c.is_ascii_digit());
        let base = if base.is_empty() { name } else { base };
        (1u64..)
            .map(|n| format!("{base}{n}"))
            .find(|candidate| !self.names.contains_key(candidate))
            .unwrap_or_else(|| name.to_string())
    }

    fn unique_plug_name(&self, node: &NodeData, name: &str) -> String {
        if self.find_plug(node, name).is_none() {
            return name.to_string();
        }
        let base = name.trim_end_matches(|c: char| c.is_ascii_digit());
        let base = if base.is_empty() { name } else { base };
        (1u64..)
            .map(|n| format!("{base}{n}"))
            .find(|candidate| self.find_plug(node, candidate).is_none())
            .unwrap_or_else(|| name.to_string())
    }

    fn insert_plug(&mut self, node: NodeId, descriptor: PlugDescriptor) -> PlugId {
        let generation = self.next_generation();
        let entry = self.plugs.vacant_entry();
        let id = PlugId::new(entry.key(), generation);
        entry.insert(PlugData::new(id, node, descriptor));
        id
    }

    /// Remove the connection into `destination`, if any. Returns the source.
    fn sever_input(&mut self, destination: PlugId) -> Result<Option<PlugId>> {
        let Some(source) = self.plug_mut(destination)?.input.take() else {
            return Ok(None);
        };
        if let Ok(source_data) = self.plug_mut(source) {
            source_data.outputs.retain(|p| *p != destination);
        }
        Ok(Some(source))
    }
}

pub(crate) struct GraphSignals {
    pub(crate) plug_dirtied: Signal<PlugId>,
    pub(crate) plug_set: Signal<PlugId>,
    pub(crate) plug_input_changed: Signal<PlugId>,
}

/// Source of graph ids. Ids are never reused within a process.
static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct Shared {
    pub(crate) id: u64,
    pub(crate) structure: RwLock<Structure>,
    pub(crate) cache: Arc<ComputeCache>,
    pub(crate) hash_cache: HashCache,
    pub(crate) counters: PlugCounters,
    pub(crate) tracer: Arc<dyn Tracer>,
    pub(crate) signals: GraphSignals,
}

/// A graph of nodes connected through their plugs.
///
/// Cloning is cheap and clones share all state. `Graph` is `Send + Sync`:
/// any number of threads may evaluate concurrently while edits are
/// serialized.
#[derive(Clone)]
pub struct Graph {
    pub(crate) shared: Arc<Shared>,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let structure = self.structure();
        f.debug_struct("Graph")
            .field("nodes", &structure.nodes.len())
            .field("plugs", &structure.plugs.len())
            .field("cache", &self.shared.cache)
            .finish()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

/// Changes collected under the lock, reported once it is released.
#[derive(Default)]
struct Changes {
    dirtied: Vec<PlugId>,
    set: Vec<PlugId>,
    input_changed: Vec<PlugId>,
}

impl Graph {
    /// Create an empty graph with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for customizing the graph.
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    /// Create an empty graph with the given configuration.
    pub fn with_config(config: GraphConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Process-unique id of this graph, shared by its clones.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub(crate) fn structure(&self) -> RwLockReadGuard<'_, Structure> {
        self.shared.structure.read()
    }

    fn report(&self, changes: Changes) {
        let signals = &self.shared.signals;
        for plug in &changes.input_changed {
            signals.plug_input_changed.emit(plug);
        }
        for plug in &changes.set {
            signals.plug_set.emit(plug);
        }
        for plug in &changes.dirtied {
            self.shared.tracer.on_plug_dirtied(*plug);
            signals.plug_dirtied.emit(plug);
        }
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    /// Add a node. An empty name is replaced by the type name, and a name
    /// already in use gets a numeric suffix (`Add`, `Add1`, `Add2`, ...).
    pub fn add_node(&self, name: &str, node_type: Arc<dyn NodeType>) -> NodeId {
        let mut structure = self.shared.structure.write();
        let name = if name.is_empty() { node_type.type_name() } else { name };
        let name = structure.unique_name(name);
        let generation = structure.next_generation();
        let key = structure.nodes.vacant_entry().key();
        let id = NodeId::new(key, generation);
        let plugs = node_type
            .plugs()
            .into_iter()
            .map(|descriptor| structure.insert_plug(id, descriptor))
            .collect();
        structure.nodes.insert(NodeData {
            id,
            name: name.clone(),
            node_type,
            plugs,
        });
        structure.names.insert(name.clone(), id);
        log::debug!("added node {name}");
        id
    }

    /// Add a plug to an existing node. A name already used on the node gets
    /// a numeric suffix.
    pub fn add_plug(&self, node: NodeId, mut descriptor: PlugDescriptor) -> Result<PlugId> {
        let mut structure = self.shared.structure.write();
        let data = structure.node(node)?;
        descriptor.name = structure.unique_plug_name(data, &descriptor.name);
        let node_name = data.name.clone();
        let plug_name = descriptor.name.clone();
        let id = structure.insert_plug(node, descriptor);
        if let Some(data) = structure.nodes.get_mut(node.key()) {
            data.plugs.push(id);
        }
        log::debug!("added plug {node_name}.{plug_name}");
        Ok(id)
    }

    /// Remove a node and its plugs.
    ///
    /// Connections to and from the node are severed first, dirtying the
    /// plugs they used to drive. Cached values of the node's plugs are dropped.
    pub fn remove_node(&self, node: NodeId) -> Result<()> {
        let mut changes = Changes::default();
        let removed = {
            let mut structure = self.shared.structure.write();
            let plugs = structure.node(node)?.plugs.clone();
            let mut severed = Vec::new();
            for &plug in &plugs {
                structure.sever_input(plug)?;
                let destinations = std::mem::take(&mut structure.plug_mut(plug)?.outputs);
                for destination in destinations {
                    if let Ok(data) = structure.plug_mut(destination) {
                        data.input = None;
                    }
                    if !plugs.contains(&destination) {
                        severed.push(destination);
                    }
                }
            }
            changes.dirtied = structure.dirty_from(&severed);
            changes.input_changed = severed;
            for &plug in &plugs {
                structure.plugs.try_remove(plug.key());
            }
            if let Some(data) = structure.nodes.try_remove(node.key()) {
                structure.names.remove(&data.name);
                log::debug!("removed node {}", data.name);
            }
            plugs
        };
        let removed_set: std::collections::HashSet<PlugId, ahash::RandomState> =
            removed.iter().copied().collect();
        self.shared.cache.remove_plugs(self.shared.id, &removed_set);
        for plug in removed {
            self.shared.counters.remove(plug);
        }
        self.report(changes);
        Ok(())
    }

    /// Connect `source` into `destination`, replacing any existing input.
    ///
    /// The destination must be an input plug of the same kind as the source.
    /// Fails without changing anything if the connection would create a
    /// cycle. On success, the destination and everything downstream of it
    /// is dirtied.
    pub fn connect(&self, source: PlugId, destination: PlugId) -> Result<()> {
        let changes = {
            let mut structure = self.shared.structure.write();
            let src = structure.plug(source)?;
            let dst = structure.plug(destination)?;
            if dst.direction != Direction::Input {
                return Err(Error::Direction {
                    plug: structure.path(destination),
                    direction: dst.direction,
                    operation: "connection destination",
                });
            }
            if src.kind != dst.kind {
                return Err(Error::TypeMismatch {
                    plug: structure.path(destination),
                    expected: dst.kind,
                    found: src.kind,
                });
            }
            if dst.input == Some(source) {
                return Ok(());
            }
            if structure.reaches(destination, source) {
                return Err(Error::Cycle {
                    source_plug: structure.path(source),
                    destination: structure.path(destination),
                });
            }
            structure.sever_input(destination)?;
            structure.plug_mut(destination)?.input = Some(source);
            structure.plug_mut(source)?.outputs.push(destination);
            log::debug!(
                "connected {} -> {}",
                structure.path(source),
                structure.path(destination)
            );
            Changes {
                dirtied: structure.dirty_from(&[destination]),
                set: Vec::new(),
                input_changed: vec![destination],
            }
        };
        self.report(changes);
        Ok(())
    }

    /// Remove the input connection of `destination`. The plug reverts to its
    /// own stored value and is dirtied along with everything downstream.
    /// Does nothing if the plug has no input.
    pub fn disconnect(&self, destination: PlugId) -> Result<()> {
        let changes = {
            let mut structure = self.shared.structure.write();
            let Some(source) = structure.sever_input(destination)? else {
                return Ok(());
            };
            log::debug!(
                "disconnected {} -> {}",
                structure.path(source),
                structure.path(destination)
            );
            Changes {
                dirtied: structure.dirty_from(&[destination]),
                set: Vec::new(),
                input_changed: vec![destination],
            }
        };
        self.report(changes);
        Ok(())
    }

    /// Set the stored value of an unconnected input plug.
    ///
    /// Setting the value the plug already holds does nothing. Otherwise the
    /// plug and everything downstream of it is dirtied, so later reads
    /// compute with the new value.
    pub fn set_value(&self, plug: PlugId, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let changes = {
            let mut structure = self.shared.structure.write();
            let data = structure.plug(plug)?;
            if data.direction != Direction::Input {
                return Err(Error::Direction {
                    plug: structure.path(plug),
                    direction: data.direction,
                    operation: "setting a value",
                });
            }
            if let Some(input) = data.input {
                return Err(Error::ConnectedPlug {
                    plug: structure.path(plug),
                    input: structure.path(input),
                });
            }
            if value.kind() != data.kind {
                return Err(Error::TypeMismatch {
                    plug: structure.path(plug),
                    expected: data.kind,
                    found: value.kind(),
                });
            }
            // Bitwise for floats, matching the digest.
            if data.value == value {
                return Ok(());
            }
            structure.plug_mut(plug)?.value = value;
            log::debug!("set {}", structure.path(plug));
            Changes {
                dirtied: structure.dirty_from(&[plug]),
                set: structure.connected_downstream(plug),
                input_changed: Vec::new(),
            }
        };
        self.report(changes);
        Ok(())
    }

    /// Reset an input plug to its default value.
    pub fn set_to_default(&self, plug: PlugId) -> Result<()> {
        let default = self.structure().plug(plug)?.default.clone();
        self.set_value(plug, default)
    }

    /// Returns true if an unconnected plug holds its default value. Connected
    /// plugs are never at their default.
    pub fn is_set_to_default(&self, plug: PlugId) -> Result<bool> {
        let structure = self.structure();
        let data = structure.plug(plug)?;
        Ok(data.input.is_none() && data.value == data.default)
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// Node with the given name.
    pub fn node(&self, name: &str) -> Option<NodeId> {
        self.structure().names.get(name).copied()
    }

    /// All nodes, in no particular order.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.structure().nodes.iter().map(|(_, n)| n.id).collect()
    }

    /// Name of a node.
    pub fn node_name(&self, node: NodeId) -> Result<String> {
        Ok(self.structure().node(node)?.name.clone())
    }

    /// Type of a node.
    pub fn node_type(&self, node: NodeId) -> Result<Arc<dyn NodeType>> {
        Ok(self.structure().node(node)?.node_type.clone())
    }

    /// Plugs of a node in declaration order, dynamic plugs last.
    pub fn plugs(&self, node: NodeId) -> Result<Vec<PlugId>> {
        Ok(self.structure().node(node)?.plugs.clone())
    }

    /// Plug of a node by name.
    pub fn plug(&self, node: NodeId, name: &str) -> Result<PlugId> {
        self.node_plug(node, name)
    }

    pub(crate) fn node_plug(&self, node: NodeId, name: &str) -> Result<PlugId> {
        let structure = self.structure();
        let data = structure.node(node)?;
        structure
            .find_plug(data, name)
            .ok_or_else(|| Error::UnknownPlugName(format!("{}.{name}", data.name)))
    }

    /// Plug by `node.plug` path.
    pub fn plug_by_path(&self, path: &str) -> Result<PlugId> {
        let (node, plug) = path
            .split_once('.')
            .ok_or_else(|| Error::UnknownPlugName(path.to_string()))?;
        let node = self
            .node(node)
            .ok_or_else(|| Error::UnknownPlugName(path.to_string()))?;
        self.node_plug(node, plug)
    }

    /// `node.plug` path of a plug.
    pub fn plug_path(&self, plug: PlugId) -> Result<String> {
        let structure = self.structure();
        structure.plug(plug)?;
        Ok(structure.path(plug))
    }

    pub(crate) fn describe(&self, plug: PlugId) -> String {
        self.structure().path(plug)
    }

    /// Name of a plug within its node.
    pub fn plug_name(&self, plug: PlugId) -> Result<String> {
        Ok(self.structure().plug(plug)?.name.clone())
    }

    /// Node owning a plug.
    pub fn plug_node(&self, plug: PlugId) -> Result<NodeId> {
        Ok(self.structure().plug(plug)?.node)
    }

    /// Direction of a plug.
    pub fn direction(&self, plug: PlugId) -> Result<Direction> {
        Ok(self.structure().plug(plug)?.direction)
    }

    /// Kind of value a plug holds.
    pub fn kind(&self, plug: PlugId) -> Result<ValueKind> {
        Ok(self.structure().plug(plug)?.kind)
    }

    /// Source of a plug's input connection.
    pub fn input(&self, plug: PlugId) -> Result<Option<PlugId>> {
        Ok(self.structure().plug(plug)?.input)
    }

    /// Plugs connected to this one's output, in connection order.
    pub fn outputs(&self, plug: PlugId) -> Result<Vec<PlugId>> {
        Ok(self.structure().plug(plug)?.outputs.clone())
    }

    /// The plug at the end of the input chain: the plug itself if it is
    /// unconnected.
    pub fn source(&self, plug: PlugId) -> Result<PlugId> {
        let structure = self.structure();
        let mut current = plug;
        while let Some(input) = structure.plug(current)?.input {
            current = input;
        }
        Ok(current)
    }

    /// Returns true if the plug was dirtied since its value was last read.
    pub fn is_dirty(&self, plug: PlugId) -> Result<bool> {
        Ok(self.structure().plug(plug)?.is_dirty())
    }

    /// Number of times the plug has been dirtied.
    pub fn dirty_count(&self, plug: PlugId) -> Result<u64> {
        Ok(self.structure().plug(plug)?.dirty_count)
    }

    /// Input plugs of `node` that affect `output`, in declaration order.
    pub(crate) fn dependencies(&self, node: NodeId, output: &str) -> Result<Vec<PlugId>> {
        let structure = self.structure();
        let data = structure.node(node)?;
        let mut dependencies = Vec::new();
        for &id in &data.plugs {
            let plug = structure.plug(id)?;
            if plug.direction == Direction::Input
                && data.node_type.affects(&plug.name).iter().any(|o| o == output)
            {
                dependencies.push(id);
            }
        }
        Ok(dependencies)
    }

    // ------------------------------------------------------------------
    // Signals
    // ------------------------------------------------------------------

    /// Emitted once for each plug dirtied by an edit, after the edit.
    pub fn plug_dirtied_signal(&self) -> &Signal<PlugId> {
        &self.shared.signals.plug_dirtied
    }

    /// Emitted when a plug's stored value changes, for the plug and for
    /// every plug connected downstream of it.
    pub fn plug_set_signal(&self) -> &Signal<PlugId> {
        &self.shared.signals.plug_set
    }

    /// Emitted when a plug's input connection is made, replaced or removed.
    pub fn plug_input_changed_signal(&self) -> &Signal<PlugId> {
        &self.shared.signals.plug_input_changed
    }

    // ------------------------------------------------------------------
    // Cache
    // ------------------------------------------------------------------

    /// The compute cache.
    pub fn cache(&self) -> &Arc<ComputeCache> {
        &self.shared.cache
    }

    /// Drop every cached value and memoized hash. Running computations are
    /// unaffected.
    pub fn clear_cache(&self) {
        self.shared.cache.clear();
        self.shared.hash_cache.clear();
        log::debug!("cleared caches");
    }

    /// Change the maximum number of cached values.
    pub fn set_cache_capacity(&self, capacity: usize) {
        self.shared.cache.set_capacity(capacity);
    }

    /// Change the maximum number of memoized hashes.
    pub fn set_hash_cache_capacity(&self, capacity: usize) {
        self.shared.hash_cache.set_capacity(capacity);
    }

    /// Compute cache counters.
    pub fn cache_statistics(&self) -> CacheStatistics {
        self.shared.cache.statistics()
    }

    /// Number of memoized hashes.
    pub fn hash_cache_len(&self) -> usize {
        self.shared.hash_cache.len()
    }

    /// Number of times the plug's value was computed.
    pub fn compute_count(&self, plug: PlugId) -> u64 {
        self.shared.counters.computes(plug)
    }

    /// Number of times the plug's hash was computed rather than served from
    /// the hash cache.
    pub fn hash_count(&self, plug: PlugId) -> u64 {
        self.shared.counters.hashes(plug)
    }

    /// Reset all compute and hash counts to zero.
    pub fn reset_counts(&self) {
        self.shared.counters.clear();
    }
}

/// Builder for [`Graph`].
///
/// # Example
///
/// ```
/// use plug_flow::{Graph, LogTracer};
///
/// let graph = Graph::builder()
///     .cache_capacity(500)
///     .tracer(LogTracer)
///     .build();
/// assert_eq!(graph.cache_statistics().capacity, 500);
/// ```
pub struct GraphBuilder {
    config: GraphConfig,
    tracer: Arc<dyn Tracer>,
    cache: Option<Arc<ComputeCache>>,
}

impl fmt::Debug for GraphBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphBuilder")
            .field("config", &self.config)
            .field("shared_cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            config: GraphConfig::default(),
            tracer: Arc::new(NoopTracer),
            cache: None,
        }
    }

    /// Use the given configuration.
    pub fn config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    /// Maximum number of cached values. Ignored if a cache is supplied with
    /// [`GraphBuilder::cache`].
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.cache_capacity = capacity;
        self
    }

    /// Maximum number of memoized hashes.
    pub fn hash_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.hash_cache_capacity = capacity;
        self
    }

    /// Observe evaluation with `tracer`.
    pub fn tracer(mut self, tracer: impl Tracer) -> Self {
        self.tracer = Arc::new(tracer);
        self
    }

    /// Use an existing compute cache, possibly shared with other graphs.
    pub fn cache(mut self, cache: Arc<ComputeCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build the graph.
    pub fn build(self) -> Graph {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(ComputeCache::new(self.config.cache_capacity)));
        Graph {
            shared: Arc::new(Shared {
                id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
                structure: RwLock::new(Structure::default()),
                cache,
                hash_cache: HashCache::new(self.config.hash_cache_capacity),
                counters: PlugCounters::new(),
                tracer: self.tracer,
                signals: GraphSignals {
                    plug_dirtied: Signal::new(),
                    plug_set: Signal::new(),
                    plug_input_changed: Signal::new(),
                },
            }),
        }
    }
}
