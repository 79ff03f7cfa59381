//! Tests for tracers and monitors installed on a graph.

use std::sync::Arc;

use plug_flow::{
    Context, ContextMonitor, FnNode, Graph, LogTracer, MultiplexTracer, PerformanceMonitor,
    ValueKind, Variable,
};

fn frame_graph(tracer: MultiplexTracer) -> (Graph, plug_flow::PlugId, plug_flow::PlugId) {
    let source = FnNode::builder("Source")
        .input("value", 2)
        .output("out", ValueKind::Int, |i| Ok(i.int("value")?.into()))
        .build();
    let scale = FnNode::builder("Scale")
        .input("in", 0)
        .output("out", ValueKind::Float, |i| {
            Ok((i.int("in")? as f64 * i.context().frame()).into())
        })
        .reads("out", Variable::Frame)
        .build();
    let graph = Graph::builder().tracer(tracer).build();
    let source = graph.add_node("source", source);
    let scale = graph.add_node("scale", scale);
    let source_out = graph.plug(source, "out").unwrap();
    graph
        .connect(source_out, graph.plug(scale, "in").unwrap())
        .unwrap();
    let scale_out = graph.plug(scale, "out").unwrap();
    (graph, source_out, scale_out)
}

#[test]
fn test_performance_monitor_counts() {
    let _ = env_logger::builder().is_test(true).try_init();
    let monitor = Arc::new(PerformanceMonitor::new());
    let (graph, source_out, scale_out) =
        frame_graph(MultiplexTracer::new().with(monitor.clone()).with(LogTracer));

    for frame in [1.0, 2.0, 3.0, 1.0] {
        graph
            .get_value(scale_out, &Context::new().with_frame(frame))
            .unwrap();
    }

    let scale = monitor.plug_statistics(scale_out);
    assert_eq!(scale.compute_count, 3);
    assert_eq!(scale.hash_count, 3);
    assert_eq!(scale.compute_count, graph.compute_count(scale_out));

    // The source does not read the frame, so one computation serves all
    // frames.
    let source = monitor.plug_statistics(source_out);
    assert_eq!(source.compute_count, 1);

    let combined = monitor.combined_statistics();
    assert_eq!(combined.compute_count, 4);
    assert_eq!(monitor.all_statistics().len(), 2);
}

#[test]
fn test_context_monitor_variables() {
    let monitor = Arc::new(ContextMonitor::new());
    let (graph, _, scale_out) = frame_graph(MultiplexTracer::new().with(monitor.clone()));

    for frame in [1.0, 2.0, 2.0, 5.0] {
        graph
            .get_value(scale_out, &Context::new().with_frame(frame))
            .unwrap();
    }

    let stats = monitor.plug_statistics(scale_out);
    assert_eq!(stats.num_unique_contexts(), 3);
    assert_eq!(stats.num_unique_values(Variable::Frame), 3);
    assert_eq!(stats.num_unique_values(Variable::FramesPerSecond), 1);
    assert!(stats.variable_names().contains(&Variable::Frame));
    assert_eq!(monitor.combined_statistics().num_unique_values(Variable::Frame), 3);
}
