//! Tests for context variables and their effect on hashing and caching.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use plug_flow::{ComputeInputs, Context, FnNode, Graph, PlugId, Value, ValueKind, Variable};

fn frame_reader(computations: Arc<AtomicUsize>) -> (Graph, PlugId, PlugId) {
    let node = FnNode::builder("Reader")
        .input("scale", 1.0)
        .output("timed", ValueKind::Float, {
            let computations = computations.clone();
            move |i: &ComputeInputs<'_>| {
                computations.fetch_add(1, Ordering::SeqCst);
                Ok((i.float("scale")? * i.context().frame()).into())
            }
        })
        .output("static", ValueKind::Float, move |i| {
            computations.fetch_add(1, Ordering::SeqCst);
            Ok(i.float("scale")?.into())
        })
        .reads("timed", Variable::Frame)
        .build();
    let graph = Graph::new();
    let node = graph.add_node("reader", node);
    let timed = graph.plug(node, "timed").unwrap();
    let fixed = graph.plug(node, "static").unwrap();
    (graph, timed, fixed)
}

#[test]
fn test_equal_contexts_hash_identically() {
    let (graph, timed, _) = frame_reader(Arc::new(AtomicUsize::new(0)));
    let mut a = Context::new().with_frame(3.0);
    a.set_custom("shot", "sh010");
    let mut b = Context::new();
    b.set_custom("shot", "sh010");
    b.set_frame(3.0);
    assert_eq!(a, b);
    assert_eq!(graph.hash(timed, &a).unwrap(), graph.hash(timed, &b).unwrap());
}

#[test]
fn test_only_declared_variables_affect_hash() {
    let computations = Arc::new(AtomicUsize::new(0));
    let (graph, timed, fixed) = frame_reader(computations.clone());
    let one = Context::new().with_frame(1.0);
    let two = Context::new().with_frame(2.0);

    assert_ne!(graph.hash(timed, &one).unwrap(), graph.hash(timed, &two).unwrap());
    assert_eq!(graph.hash(fixed, &one).unwrap(), graph.hash(fixed, &two).unwrap());

    // The frame-independent output is computed once across frames.
    assert_eq!(graph.get_value(fixed, &one).unwrap(), Value::Float(1.0));
    assert_eq!(graph.get_value(fixed, &two).unwrap(), Value::Float(1.0));
    assert_eq!(graph.compute_count(fixed), 1);

    assert_eq!(graph.get_value(timed, &one).unwrap(), Value::Float(1.0));
    assert_eq!(graph.get_value(timed, &two).unwrap(), Value::Float(2.0));
    assert_eq!(graph.compute_count(timed), 2);
    assert_eq!(computations.load(Ordering::SeqCst), 3);
}

#[test]
fn test_undeclared_custom_variable_is_ignored() {
    let (graph, timed, _) = frame_reader(Arc::new(AtomicUsize::new(0)));
    let plain = Context::new();
    let mut extra = Context::new();
    extra.set_custom("unused", 42);
    assert_ne!(plain.hash(), extra.hash());
    assert_eq!(graph.hash(timed, &plain).unwrap(), graph.hash(timed, &extra).unwrap());
}

#[test]
fn test_unset_variable_hashes_distinctly() {
    let node = FnNode::builder("Path")
        .output("depth", ValueKind::Int, |i| {
            Ok((i.context().scene_path().map_or(-1, |p| p.len() as i64)).into())
        })
        .reads("depth", Variable::ScenePath)
        .build();
    let graph = Graph::new();
    let node = graph.add_node("path", node);
    let depth = graph.plug(node, "depth").unwrap();

    let unset = Context::new();
    let root = Context::new().with_scene_path("/");
    let leaf = Context::new().with_scene_path("/world/geo");
    let hashes = [
        graph.hash(depth, &unset).unwrap(),
        graph.hash(depth, &root).unwrap(),
        graph.hash(depth, &leaf).unwrap(),
    ];
    assert_ne!(hashes[0], hashes[1]);
    assert_ne!(hashes[1], hashes[2]);
    assert_eq!(graph.get_value(depth, &unset).unwrap(), Value::Int(-1));
    assert_eq!(graph.get_value(depth, &root).unwrap(), Value::Int(0));
    assert_eq!(graph.get_value(depth, &leaf).unwrap(), Value::Int(2));
}

#[test]
fn test_context_time() {
    let mut context = Context::new().with_frame(48.0);
    assert_eq!(context.time(), 2.0);
    context.set_frames_per_second(48.0);
    assert_eq!(context.time(), 1.0);
    assert_eq!(context.variables(), vec![Variable::Frame, Variable::FramesPerSecond]);
}
