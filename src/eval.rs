//! Evaluation: hashing and computing plug values.
//!
//! `get_value` on an output plug hashes it, then looks the
//! `(graph, plug, hash)` key up in the compute cache, computing on a miss. Hashes are composed
//! from upstream hashes and never require upstream values.
//!
//! A thread-local stack records the plugs being hashed or computed on the
//! current thread, so a node that reads its own output fails with an
//! evaluation cycle instead of waiting on itself forever.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::{ComputeKey, HashKey, HashMemo, Lookup};
use crate::context::Context;
use crate::error::{ComputeError, Error, EvaluationCycle, Result};
use crate::graph::Graph;
use crate::hash::{Digest, DigestHasher};
use crate::node::{CachePolicy, ComputeInputs, HashInputs, NodeType};
use crate::plug::{Direction, NodeId, PlugId};
use crate::tracer::ComputeOutcome;
use crate::value::{Value, ValueKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Hash,
    Compute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    plug: PlugId,
    context: Digest,
    phase: Phase,
}

thread_local! {
    static EVALUATION_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Pops its frame when dropped, including on unwind.
struct StackGuard;

impl StackGuard {
    /// Push `frame`, or return the plugs forming a cycle if it is already on
    /// the stack.
    fn enter(frame: Frame) -> std::result::Result<Self, Vec<PlugId>> {
        EVALUATION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(position) = stack.iter().position(|f| *f == frame) {
                let mut cycle: Vec<PlugId> = stack[position..].iter().map(|f| f.plug).collect();
                cycle.push(frame.plug);
                return Err(cycle);
            }
            stack.push(frame);
            Ok(StackGuard)
        })
    }
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        EVALUATION_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// An output plug, snapshotted so evaluation can run without the lock.
struct Target {
    plug: PlugId,
    node: NodeId,
    output: String,
    node_type: Arc<dyn NodeType>,
    kind: ValueKind,
    dirty_count: u64,
}

enum Source {
    Stored(Value),
    Output(Target),
}

struct Resolved {
    /// The requested plug followed by every plug on its input chain, with
    /// their dirty counts when resolved.
    chain: Vec<(PlugId, u64)>,
    source: Source,
}

impl Graph {
    /// Follow input connections to the plug that provides the value.
    fn resolve(&self, plug: PlugId) -> Result<Resolved> {
        let structure = self.structure();
        let mut chain = Vec::new();
        let mut current = plug;
        loop {
            let data = structure.plug(current)?;
            chain.push((current, data.dirty_count));
            if let Some(input) = data.input {
                current = input;
                continue;
            }
            let source = match data.direction {
                Direction::Input => Source::Stored(data.value.clone()),
                Direction::Output => Source::Output(Target {
                    plug: current,
                    node: data.node,
                    output: data.name.clone(),
                    node_type: structure.node(data.node)?.node_type.clone(),
                    kind: data.kind,
                    dirty_count: data.dirty_count,
                }),
            };
            return Ok(Resolved { chain, source });
        }
    }

    /// The value of `plug` in `context`.
    ///
    /// Unconnected input plugs return their stored value and connected plugs
    /// the value of their source. Output plugs are served from the compute
    /// cache when possible; concurrent requests for the same uncached value
    /// share a single computation, and every caller sees the same result or
    /// the same [`Error::Compute`]. Failures are not cached.
    pub fn get_value(&self, plug: PlugId, context: &Context) -> Result<Value> {
        let resolved = self.resolve(plug)?;
        let value = match resolved.source {
            Source::Stored(value) => value,
            Source::Output(target) => self.evaluate(&target, context)?,
        };
        // Plugs dirtied again since they were resolved stay dirty.
        let structure = self.structure();
        for (id, dirty_count) in resolved.chain {
            if let Ok(data) = structure.plug(id) {
                if data.dirty_count == dirty_count {
                    data.clear_dirty();
                }
            }
        }
        Ok(value)
    }

    /// The hash of `plug` in `context`.
    ///
    /// Equal hashes imply equal values. Stored values hash as their kind and
    /// content; outputs hash through their node type, by default from the
    /// hashes of the inputs that affect them and the context variables they
    /// read.
    pub fn hash(&self, plug: PlugId, context: &Context) -> Result<Digest> {
        match self.resolve(plug)?.source {
            Source::Stored(value) => Ok(value.digest()),
            Source::Output(target) => self.hash_output(&target, context),
        }
    }

    fn enter(&self, frame: Frame) -> Result<StackGuard> {
        StackGuard::enter(frame).map_err(|cycle| {
            let path: Vec<String> = cycle.iter().map(|p| self.describe(*p)).collect();
            self.shared.tracer.on_cycle_detected(&path);
            log::debug!("evaluation cycle: {}", path.join(" -> "));
            Error::Compute(ComputeError::new(
                frame.plug,
                self.describe(frame.plug),
                EvaluationCycle { path }.into(),
            ))
        })
    }

    fn hash_output(&self, target: &Target, context: &Context) -> Result<Digest> {
        let key = HashKey {
            plug: target.plug,
            dirty_count: target.dirty_count,
            context: context.hash(),
        };
        if let Some(memo) = self.shared.hash_cache.get(&key) {
            if self.unchanged_since(&memo.reads) {
                self.shared.tracer.on_hash(target.plug, context, true);
                return Ok(memo.digest);
            }
        }

        let _guard = self.enter(Frame {
            plug: target.plug,
            context: key.context,
            phase: Phase::Hash,
        })?;
        self.shared.counters.record_hash(target.plug);
        self.shared.tracer.on_hash(target.plug, context, false);

        let mut hasher = DigestHasher::new();
        let inputs = HashInputs {
            graph: self,
            node: target.node,
            node_type: target.node_type.as_ref(),
            output: &target.output,
            context,
            reads: RefCell::new(Vec::new()),
        };
        target
            .node_type
            .hash(&target.output, &inputs, &mut hasher)?;
        let digest = hasher.finish();
        let reads: Arc<[(PlugId, u64)]> = inputs.reads.into_inner().into();

        // An edit during hashing may have mixed old and new upstream state.
        let unchanged = self
            .structure()
            .plug(target.plug)
            .is_ok_and(|p| p.dirty_count == target.dirty_count);
        if unchanged && self.unchanged_since(&reads) {
            self.shared.hash_cache.insert(key, HashMemo { digest, reads });
        }
        Ok(digest)
    }

    /// Returns true if every plug still has the recorded dirty count.
    fn unchanged_since(&self, reads: &[(PlugId, u64)]) -> bool {
        if reads.is_empty() {
            return true;
        }
        let structure = self.structure();
        reads.iter().all(|(plug, dirty_count)| {
            structure
                .plug(*plug)
                .is_ok_and(|p| p.dirty_count == *dirty_count)
        })
    }

    fn evaluate(&self, target: &Target, context: &Context) -> Result<Value> {
        match target.node_type.cache_policy(&target.output) {
            CachePolicy::Uncached => {
                let _guard = self.enter(Frame {
                    plug: target.plug,
                    context: context.hash(),
                    phase: Phase::Compute,
                })?;
                Ok(self.compute(target, context)?)
            }
            CachePolicy::Standard => {
                let hash = self.hash_output(target, context)?;
                let key = ComputeKey::new(self.shared.id, target.plug, hash);
                // Checked before touching the cache: joining our own
                // in-flight computation would never return.
                let _guard = self.enter(Frame {
                    plug: target.plug,
                    context: context.hash(),
                    phase: Phase::Compute,
                })?;
                let (outcome, lookup) = self
                    .shared
                    .cache
                    .get_or_compute(key, || self.compute(target, context));
                self.shared.tracer.on_cache_check(&key, lookup);
                if lookup == Lookup::Joined {
                    self.shared.tracer.on_collaboration(&key);
                }
                Ok(outcome?)
            }
        }
    }

    fn compute(&self, target: &Target, context: &Context) -> Result<Value, ComputeError> {
        self.shared.counters.record_compute(target.plug);
        self.shared.tracer.on_compute_start(target.plug, context);
        log::trace!("computing {}", self.describe(target.plug));
        let start = Instant::now();

        let inputs = ComputeInputs {
            graph: self,
            node: target.node,
            output: &target.output,
            context,
        };
        let result = target
            .node_type
            .compute(&target.output, &inputs)
            .and_then(|value| {
                if value.kind() == target.kind {
                    Ok(value)
                } else {
                    Err(Error::TypeMismatch {
                        plug: self.describe(target.plug),
                        expected: target.kind,
                        found: value.kind(),
                    }
                    .into())
                }
            })
            .map_err(|cause| ComputeError::new(target.plug, self.describe(target.plug), cause));

        let duration = start.elapsed();
        let outcome = match &result {
            Ok(_) => ComputeOutcome::Computed,
            Err(err) => {
                log::debug!("{err}");
                ComputeOutcome::Failed {
                    message: err.to_string(),
                }
            }
        };
        self.shared
            .tracer
            .on_compute_end(target.plug, context, &outcome, duration);
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::context::Variable;
    use crate::node::FnNode;

    #[test]
    fn test_stored_and_connected_values() {
        let graph = Graph::new();
        let node = graph.add_node(
            "n",
            FnNode::builder("Double")
                .input("in", 3)
                .output("out", ValueKind::Int, |i| Ok((i.int("in")? * 2).into()))
                .build(),
        );
        let input = graph.plug(node, "in").unwrap();
        let out = graph.plug(node, "out").unwrap();
        let context = Context::new();
        assert_eq!(graph.get_value(input, &context).unwrap(), Value::Int(3));
        assert_eq!(graph.get_value(out, &context).unwrap(), Value::Int(6));
        assert_eq!(graph.compute_count(out), 1);
        assert_eq!(graph.get_value(out, &context).unwrap(), Value::Int(6));
        assert_eq!(graph.compute_count(out), 1);
    }

    #[test]
    fn test_reading_own_output_is_a_cycle() {
        let graph = Graph::new();
        let node = graph.add_node(
            "loop",
            FnNode::builder("Loop")
                .output("out", ValueKind::Int, |i| Ok(i.value("out")?))
                .build(),
        );
        let out = graph.plug(node, "out").unwrap();
        let Err(Error::Compute(err)) = graph.get_value(out, &Context::new()) else {
            panic!("expected a compute error");
        };
        // The outer computation fails with the inner cycle as its cause.
        assert!(err.to_string().contains("evaluation cycle"));
        assert!(EVALUATION_STACK.with(|s| s.borrow().is_empty()));
    }

    #[test]
    fn test_uncached_policy_always_computes() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let graph = Graph::new();
        let node = graph.add_node(
            "n",
            FnNode::builder("Counter")
                .output("out", ValueKind::Int, move |_| {
                    Ok((c.fetch_add(1, Ordering::SeqCst) as i64).into())
                })
                .cache_policy("out", CachePolicy::Uncached)
                .build(),
        );
        let out = graph.plug(node, "out").unwrap();
        let context = Context::new();
        graph.get_value(out, &context).unwrap();
        graph.get_value(out, &context).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(graph.cache().is_empty());
    }

    #[test]
    fn test_wrong_result_kind() {
        let graph = Graph::new();
        let node = graph.add_node(
            "n",
            FnNode::builder("Wrong")
                .output("out", ValueKind::Int, |_| Ok("text".into()))
                .build(),
        );
        let out = graph.plug(node, "out").unwrap();
        let Err(Error::Compute(err)) = graph.get_value(out, &Context::new()) else {
            panic!("expected a compute error");
        };
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_hash_cache_is_reused() {
        let graph = Graph::new();
        let node = graph.add_node(
            "n",
            FnNode::builder("Frame")
                .output("out", ValueKind::Float, |i| Ok(i.context().frame().into()))
                .reads("out", Variable::Frame)
                .build(),
        );
        let out = graph.plug(node, "out").unwrap();
        let context = Context::new();
        let first = graph.hash(out, &context).unwrap();
        assert_eq!(graph.hash(out, &context).unwrap(), first);
        assert_eq!(graph.hash_count(out), 1);
        assert_ne!(graph.hash(out, &context.clone().with_frame(2.0)).unwrap(), first);
        assert_eq!(graph.hash_count(out), 2);
    }
}
