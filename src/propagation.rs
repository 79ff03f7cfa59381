//! Dirty propagation and reachability over plug dependencies.
//!
//! A plug's dependents are the plugs its value flows into: the destinations
//! of its connections and, for an input plug, the outputs of its node that
//! `affects` reports. Every traversal keeps a visited set, so in a diamond
//! each plug is reached exactly once.

use std::collections::VecDeque;

use crate::graph::Structure;
use crate::plug::{Direction, PlugId};

impl Structure {
    /// Plugs whose value depends directly on `plug`.
    pub(crate) fn dependents(&self, plug: PlugId) -> Vec<PlugId> {
        let Ok(data) = self.plug(plug) else {
            return Vec::new();
        };
        let mut dependents = data.outputs.clone();
        if data.direction == Direction::Input {
            if let Ok(node) = self.node(data.node) {
                for output in node.node_type.affects(&data.name) {
                    if let Some(id) = self.find_plug(node, &output) {
                        if self.plug(id).is_ok_and(|p| p.direction == Direction::Output) {
                            dependents.push(id);
                        }
                    }
                }
            }
        }
        dependents
    }

    /// Breadth-first walk from `start` along dependents, `start` included.
    /// Each plug is yielded once.
    pub(crate) fn downstream(&self, start: PlugId) -> Vec<PlugId> {
        let mut visited = ahash::HashSet::default();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([start]);
        visited.insert(start);
        while let Some(plug) = queue.pop_front() {
            order.push(plug);
            for dependent in self.dependents(plug) {
                if visited.insert(dependent) {
                    queue.push_back(dependent);
                }
            }
        }
        order
    }

    /// Returns true if `to` depends on `from`, directly or transitively.
    pub(crate) fn reaches(&self, from: PlugId, to: PlugId) -> bool {
        if from == to {
            return true;
        }
        let mut visited = ahash::HashSet::default();
        let mut queue = VecDeque::from([from]);
        visited.insert(from);
        while let Some(plug) = queue.pop_front() {
            for dependent in self.dependents(plug) {
                if dependent == to {
                    return true;
                }
                if visited.insert(dependent) {
                    queue.push_back(dependent);
                }
            }
        }
        false
    }

    /// Mark every plug downstream of each start plug dirty, starting plugs
    /// included. A plug reachable from several starts is dirtied once.
    /// Returns the dirtied plugs in visit order.
    pub(crate) fn dirty_from(&mut self, starts: &[PlugId]) -> Vec<PlugId> {
        let mut visited = ahash::HashSet::default();
        let mut order = Vec::new();
        for &start in starts {
            if self.plug(start).is_err() || visited.contains(&start) {
                continue;
            }
            let mut queue = VecDeque::from([start]);
            visited.insert(start);
            while let Some(plug) = queue.pop_front() {
                order.push(plug);
                for dependent in self.dependents(plug) {
                    if visited.insert(dependent) {
                        queue.push_back(dependent);
                    }
                }
            }
        }
        for &plug in &order {
            if let Ok(data) = self.plug_mut(plug) {
                data.mark_dirty();
            }
        }
        order
    }

    /// Plugs that receive `plug`'s value through connections, `plug` included.
    pub(crate) fn connected_downstream(&self, plug: PlugId) -> Vec<PlugId> {
        let mut order = vec![plug];
        let mut index = 0;
        while index < order.len() {
            if let Ok(data) = self.plug(order[index]) {
                order.extend(data.outputs.iter().copied());
            }
            index += 1;
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::Graph;
    use crate::node::FnNode;
    use crate::value::ValueKind;

    fn pass_through() -> std::sync::Arc<FnNode> {
        FnNode::builder("Pass")
            .input("in", 0)
            .input("unused", 0)
            .output("out", ValueKind::Int, |inputs| Ok(inputs.int("in")?.into()))
            .affects("unused", Vec::<String>::new())
            .build()
    }

    #[test]
    fn test_affects_limits_dependents() {
        let graph = Graph::new();
        let node = graph.add_node("n", pass_through());
        let input = graph.plug(node, "in").unwrap();
        let unused = graph.plug(node, "unused").unwrap();
        let out = graph.plug(node, "out").unwrap();

        let structure = graph.structure();
        assert_eq!(structure.dependents(input), vec![out]);
        assert!(structure.dependents(unused).is_empty());
        assert!(structure.reaches(input, out));
        assert!(!structure.reaches(out, input));
    }

    #[test]
    fn test_diamond_dirties_once() {
        let graph = Graph::new();
        let a = graph.add_node("a", pass_through());
        let b = graph.add_node("b", pass_through());
        let c = graph.add_node("c", pass_through());
        let sum = FnNode::builder("Sum")
            .input("x", 0)
            .input("y", 0)
            .output("out", ValueKind::Int, |i| Ok((i.int("x")? + i.int("y")?).into()))
            .build();
        let d = graph.add_node("d", sum);

        let plug = |n, name| graph.plug(n, name).unwrap();
        graph.connect(plug(a, "out"), plug(b, "in")).unwrap();
        graph.connect(plug(a, "out"), plug(c, "in")).unwrap();
        graph.connect(plug(b, "out"), plug(d, "x")).unwrap();
        graph.connect(plug(c, "out"), plug(d, "y")).unwrap();

        let order = graph.structure().downstream(plug(a, "in"));
        let d_out = plug(d, "out");
        assert_eq!(order.iter().filter(|p| **p == d_out).count(), 1);
        assert_eq!(order.len(), 9);
    }
}
