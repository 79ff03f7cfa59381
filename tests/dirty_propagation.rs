//! Tests for dirty propagation and cache coherence after edits.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use plug_flow::{Context, FnNode, Graph, NodeId, PlugId, Value, ValueKind};

fn pass() -> Arc<FnNode> {
    FnNode::builder("Pass")
        .input("in", 0)
        .output("out", ValueKind::Int, |i| Ok(i.int("in")?.into()))
        .build()
}

fn sum() -> Arc<FnNode> {
    FnNode::builder("Sum")
        .input("x", 0)
        .input("y", 0)
        .output("out", ValueKind::Int, |i| Ok((i.int("x")? + i.int("y")?).into()))
        .build()
}

fn record_dirtied(graph: &Graph) -> (Arc<Mutex<Vec<PlugId>>>, plug_flow::ScopedConnection) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let l = log.clone();
    let connection = graph
        .plug_dirtied_signal()
        .connect(move |plug| l.lock().push(*plug));
    (log, connection.into())
}

struct Diamond {
    graph: Graph,
    a: NodeId,
    d: NodeId,
}

/// A feeds both B and C, both feed D.
fn diamond() -> Diamond {
    let graph = Graph::new();
    let a = graph.add_node("A", pass());
    let b = graph.add_node("B", pass());
    let c = graph.add_node("C", pass());
    let d = graph.add_node("D", sum());
    let p = |n, name| graph.plug(n, name).unwrap();
    graph.connect(p(a, "out"), p(b, "in")).unwrap();
    graph.connect(p(a, "out"), p(c, "in")).unwrap();
    graph.connect(p(b, "out"), p(d, "x")).unwrap();
    graph.connect(p(c, "out"), p(d, "y")).unwrap();
    Diamond { graph, a, d }
}

// =============================================================================
// Propagation
// =============================================================================

#[test]
fn test_diamond_notifies_once() {
    let Diamond { graph, a, d } = diamond();
    let (log, _connection) = record_dirtied(&graph);

    graph.set_value(graph.plug(a, "in").unwrap(), 5).unwrap();

    let log = log.lock();
    let d_out = graph.plug(d, "out").unwrap();
    assert_eq!(log.iter().filter(|p| **p == d_out).count(), 1);
    // A.in, A.out, B.in, C.in, B.out, C.out, D.x, D.y, D.out
    assert_eq!(log.len(), 9);
    let mut unique = log.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), log.len());
}

#[test]
fn test_connect_and_disconnect_dirty_downstream() {
    let graph = Graph::new();
    let a = graph.add_node("a", pass());
    let b = graph.add_node("b", pass());
    let a_out = graph.plug(a, "out").unwrap();
    let b_in = graph.plug(b, "in").unwrap();
    let b_out = graph.plug(b, "out").unwrap();
    let (log, _connection) = record_dirtied(&graph);

    graph.connect(a_out, b_in).unwrap();
    assert_eq!(*log.lock(), vec![b_in, b_out]);
    assert!(graph.is_dirty(b_out).unwrap());
    assert!(!graph.is_dirty(a_out).unwrap());

    log.lock().clear();
    graph.disconnect(b_in).unwrap();
    assert_eq!(*log.lock(), vec![b_in, b_out]);
    assert_eq!(graph.input(b_in).unwrap(), None);

    // Disconnecting an unconnected plug changes nothing.
    log.lock().clear();
    graph.disconnect(b_in).unwrap();
    assert!(log.lock().is_empty());
}

#[test]
fn test_reading_clears_dirty_flag() {
    let graph = Graph::new();
    let node = graph.add_node("n", pass());
    let input = graph.plug(node, "in").unwrap();
    let out = graph.plug(node, "out").unwrap();

    graph.set_value(input, 3).unwrap();
    assert!(graph.is_dirty(out).unwrap());
    let before = graph.dirty_count(out).unwrap();
    graph.get_value(out, &Context::new()).unwrap();
    assert!(!graph.is_dirty(out).unwrap());
    assert_eq!(graph.dirty_count(out).unwrap(), before);
}

#[test]
fn test_edit_during_read_keeps_dirty_flag() {
    let target: Arc<OnceLock<(Graph, PlugId)>> = Arc::new(OnceLock::new());
    let t = target.clone();
    let node_type = FnNode::builder("Touch")
        .input("in", 0)
        .input("revision", 0)
        .output("out", ValueKind::Int, move |i| {
            if let Some((graph, revision)) = t.get() {
                graph.set_value(*revision, 1)?;
            }
            Ok(i.int("in")?.into())
        })
        .build();
    let graph = Graph::new();
    let node = graph.add_node("touch", node_type);
    let out = graph.plug(node, "out").unwrap();
    target
        .set((graph.clone(), graph.plug(node, "revision").unwrap()))
        .unwrap();

    // The computation dirties its own output while running.
    let context = Context::new();
    assert_eq!(graph.get_value(out, &context).unwrap(), Value::Int(0));
    assert!(graph.is_dirty(out).unwrap());

    // Nothing changes during the second read.
    graph.get_value(out, &context).unwrap();
    assert!(!graph.is_dirty(out).unwrap());
}

#[test]
fn test_setting_same_value_is_a_no_op() {
    let graph = Graph::new();
    let node = graph.add_node("n", pass());
    let input = graph.plug(node, "in").unwrap();
    graph.set_value(input, 2).unwrap();
    let (log, _connection) = record_dirtied(&graph);
    let count = graph.dirty_count(input).unwrap();

    graph.set_value(input, 2).unwrap();
    assert!(log.lock().is_empty());
    assert_eq!(graph.dirty_count(input).unwrap(), count);
}

#[test]
fn test_float_values_compare_bitwise() {
    let inverse = FnNode::builder("Inverse")
        .input("x", 0.0)
        .output("out", ValueKind::Float, |i| Ok((1.0 / i.float("x")?).into()))
        .build();
    let graph = Graph::new();
    let node = graph.add_node("inverse", inverse);
    let x = graph.plug(node, "x").unwrap();
    let out = graph.plug(node, "out").unwrap();
    let context = Context::new();

    assert_eq!(graph.get_value(out, &context).unwrap(), Value::Float(f64::INFINITY));
    graph.set_value(x, -0.0).unwrap();
    assert_eq!(
        graph.get_value(out, &context).unwrap(),
        Value::Float(f64::NEG_INFINITY)
    );
    assert!(!graph.is_set_to_default(x).unwrap());

    graph.set_value(x, f64::NAN).unwrap();
    let (log, _connection) = record_dirtied(&graph);
    let count = graph.dirty_count(x).unwrap();
    graph.set_value(x, f64::NAN).unwrap();
    assert!(log.lock().is_empty());
    assert_eq!(graph.dirty_count(x).unwrap(), count);
}

#[test]
fn test_affects_limits_propagation() {
    let node_type = FnNode::builder("Split")
        .input("left", 0)
        .input("right", 0)
        .output("l", ValueKind::Int, |i| Ok(i.int("left")?.into()))
        .output("r", ValueKind::Int, |i| Ok(i.int("right")?.into()))
        .affects("left", ["l"])
        .affects("right", ["r"])
        .build();
    let graph = Graph::new();
    let node = graph.add_node("split", node_type);
    let (log, _connection) = record_dirtied(&graph);

    let left = graph.plug(node, "left").unwrap();
    graph.set_value(left, 1).unwrap();
    assert_eq!(*log.lock(), vec![left, graph.plug(node, "l").unwrap()]);
    assert!(!graph.is_dirty(graph.plug(node, "r").unwrap()).unwrap());
}

#[test]
fn test_removing_a_node_dirties_what_it_drove() {
    let graph = Graph::new();
    let a = graph.add_node("a", pass());
    let b = graph.add_node("b", pass());
    let b_in = graph.plug(b, "in").unwrap();
    let b_out = graph.plug(b, "out").unwrap();
    graph.connect(graph.plug(a, "out").unwrap(), b_in).unwrap();
    graph.get_value(b_out, &Context::new()).unwrap();

    let (log, _connection) = record_dirtied(&graph);
    graph.remove_node(a).unwrap();
    assert_eq!(*log.lock(), vec![b_in, b_out]);
    assert_eq!(graph.input(b_in).unwrap(), None);
    assert_eq!(graph.node("a"), None);
}

// =============================================================================
// Cache coherence
// =============================================================================

#[test]
fn test_set_value_invalidates_downstream() {
    let Diamond { graph, a, d } = diamond();
    let a_in = graph.plug(a, "in").unwrap();
    let d_out = graph.plug(d, "out").unwrap();
    let context = Context::new();

    graph.set_value(a_in, 1).unwrap();
    assert_eq!(graph.get_value(d_out, &context).unwrap(), Value::Int(2));
    assert_eq!(graph.get_value(d_out, &context).unwrap(), Value::Int(2));
    assert_eq!(graph.compute_count(d_out), 1);

    graph.set_value(a_in, 10).unwrap();
    assert_eq!(graph.get_value(d_out, &context).unwrap(), Value::Int(20));
    assert_eq!(graph.compute_count(d_out), 2);

    // Returning to an earlier value reuses the earlier result.
    graph.set_value(a_in, 1).unwrap();
    assert_eq!(graph.get_value(d_out, &context).unwrap(), Value::Int(2));
    assert_eq!(graph.compute_count(d_out), 2);
}

#[test]
fn test_clear_cache_forces_recompute() {
    let Diamond { graph, d, .. } = diamond();
    let d_out = graph.plug(d, "out").unwrap();
    let context = Context::new();
    graph.get_value(d_out, &context).unwrap();
    graph.clear_cache();
    assert!(graph.cache().is_empty());
    graph.get_value(d_out, &context).unwrap();
    assert_eq!(graph.compute_count(d_out), 2);
}

#[test]
fn test_eviction_does_not_break_results() {
    let graph = Graph::builder().cache_capacity(1).build();
    let node = graph.add_node("n", sum());
    let x = graph.plug(node, "x").unwrap();
    let out = graph.plug(node, "out").unwrap();
    let context = Context::new();
    for value in 0..5 {
        graph.set_value(x, value).unwrap();
        assert_eq!(graph.get_value(out, &context).unwrap(), Value::Int(value as i64));
    }
    assert_eq!(graph.cache().len(), 1);
    assert!(graph.cache_statistics().evictions >= 4);
}
