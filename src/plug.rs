//! Plugs, nodes and their identifiers.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::node::NodeType;
use crate::value::{Value, ValueKind};

/// Identifier of a plug.
///
/// Plug storage slots are recycled, so identifiers carry a generation: an id
/// held after its plug was destroyed never refers to a newer plug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlugId {
    key: usize,
    generation: u64,
}

impl PlugId {
    pub(crate) fn new(key: usize, generation: u64) -> Self {
        Self { key, generation }
    }

    pub(crate) fn key(&self) -> usize {
        self.key
    }

    /// Generation of the storage slot when the id was issued.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Identifier of a node. Generational, like [`PlugId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    key: usize,
    generation: u64,
}

impl NodeId {
    pub(crate) fn new(key: usize, generation: u64) -> Self {
        Self { key, generation }
    }

    pub(crate) fn key(&self) -> usize {
        self.key
    }

    /// Generation of the storage slot when the id was issued.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Plug direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Receives a value, either stored on the plug or from an input connection.
    Input,
    /// Produces a value computed by its node.
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// Declaration of a plug, used when creating nodes and adding dynamic plugs.
#[derive(Debug, Clone, PartialEq)]
pub struct PlugDescriptor {
    /// Name, unique within the node.
    pub name: String,
    /// Direction.
    pub direction: Direction,
    /// Kind of value the plug holds.
    pub kind: ValueKind,
    /// Initial and default value. Always of `kind`.
    pub default: Value,
}

impl PlugDescriptor {
    /// An input plug with the given default value.
    pub fn input(name: impl Into<String>, default: impl Into<Value>) -> Self {
        let default = default.into();
        Self {
            name: name.into(),
            direction: Direction::Input,
            kind: default.kind(),
            default,
        }
    }

    /// An output plug of the given kind.
    pub fn output(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Output,
            kind,
            default: kind.default_value(),
        }
    }
}

/// Stored state of a node.
pub(crate) struct NodeData {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) node_type: Arc<dyn NodeType>,
    /// Plugs in declaration order, dynamic plugs last.
    pub(crate) plugs: Vec<PlugId>,
}

/// Stored state of a plug.
pub(crate) struct PlugData {
    pub(crate) id: PlugId,
    pub(crate) name: String,
    pub(crate) node: NodeId,
    pub(crate) direction: Direction,
    pub(crate) kind: ValueKind,
    pub(crate) default: Value,
    /// Own value, used while the plug has no input.
    pub(crate) value: Value,
    /// Source of the input connection. At most one.
    pub(crate) input: Option<PlugId>,
    /// Plugs this one is the input of. Any number.
    pub(crate) outputs: Vec<PlugId>,
    /// Incremented every time the plug is dirtied.
    pub(crate) dirty_count: u64,
    /// Set by dirty propagation, cleared when the value is next evaluated.
    /// Atomic so readers can clear it under a shared lock.
    pub(crate) dirty: AtomicBool,
}

impl PlugData {
    pub(crate) fn new(id: PlugId, node: NodeId, descriptor: PlugDescriptor) -> Self {
        Self {
            id,
            name: descriptor.name,
            node,
            direction: descriptor.direction,
            kind: descriptor.kind,
            value: descriptor.default.clone(),
            default: descriptor.default,
            input: None,
            outputs: Vec::new(),
            dirty_count: 0,
            dirty: AtomicBool::new(false),
        }
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty_count += 1;
        self.dirty.store(true, Ordering::Release);
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub(crate) fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }
}
