// ============================================================
// Layer 5b — Graph Simplification
// ============================================================
// Folds operations that do no work at inference time:
//
//   1. Identity nodes are removed. Readers of the Identity output
//      read its input instead; if the output is a graph output the
//      producer is renamed so output names survive.
//   2. Nodes whose outputs nobody needs are dropped.
//   3. Initializers no remaining node reads are dropped.
//
// The caller re-checks the result and keeps the original on failure.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::export::graph::{GraphArtifact, Node, Op};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimplifyStats {
    pub nodes_before:      usize,
    pub nodes_after:       usize,
    pub bytes_before:      usize,
    pub bytes_after:       usize,
    pub identities_folded: usize,
    pub dead_nodes:        usize,
    pub unused_weights:    usize,
}

impl SimplifyStats {
    pub fn bytes_saved(&self) -> usize {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

pub fn simplify(graph: &GraphArtifact) -> (GraphArtifact, SimplifyStats) {
    let mut out = graph.clone();
    let mut stats = SimplifyStats {
        nodes_before: graph.nodes.len(),
        bytes_before: graph.byte_size(),
        ..SimplifyStats::default()
    };

    stats.identities_folded = fold_identities(&mut out);
    stats.dead_nodes        = drop_dead_nodes(&mut out);
    stats.unused_weights    = drop_unused_initializers(&mut out);

    stats.nodes_after = out.nodes.len();
    stats.bytes_after = out.byte_size();
    (out, stats)
}

fn fold_identities(graph: &mut GraphArtifact) -> usize {
    let graph_outputs: HashSet<String> = graph.outputs.iter().map(|o| o.name.clone()).collect();
    let external: HashSet<String> = graph
        .inputs
        .iter()
        .map(|i| i.name.clone())
        .chain(graph.initializers.iter().map(|i| i.name.clone()))
        .collect();

    let mut folded = 0;
    let mut i = 0;
    while i < graph.nodes.len() {
        let node = &graph.nodes[i];
        if node.op != Op::Identity || node.inputs.len() != 1 || node.outputs.len() != 1 {
            i += 1;
            continue;
        }
        let src = node.inputs[0].clone();
        let dst = node.outputs[0].clone();

        if graph_outputs.contains(&dst) {
            // rename the producer of `src` to `dst`; impossible when `src`
            // is external or itself a graph output
            if external.contains(&src) || graph_outputs.contains(&src) {
                i += 1;
                continue;
            }
            rename_value(&mut graph.nodes, &src, &dst);
        } else {
            rename_uses(&mut graph.nodes, &dst, &src);
        }
        graph.nodes.remove(i);
        folded += 1;
    }
    folded
}

/// Every definition and use of `from` becomes `to`.
fn rename_value(nodes: &mut [Node], from: &str, to: &str) {
    for node in nodes.iter_mut() {
        for name in node.inputs.iter_mut().chain(node.outputs.iter_mut()) {
            if name == from {
                *name = to.to_string();
            }
        }
    }
}

fn rename_uses(nodes: &mut [Node], from: &str, to: &str) {
    for node in nodes.iter_mut() {
        for name in node.inputs.iter_mut() {
            if name == from {
                *name = to.to_string();
            }
        }
    }
}

fn drop_dead_nodes(graph: &mut GraphArtifact) -> usize {
    let mut needed: HashSet<String> = graph.outputs.iter().map(|o| o.name.clone()).collect();
    let mut keep = vec![false; graph.nodes.len()];

    for (k, node) in graph.nodes.iter().enumerate().rev() {
        if node.outputs.iter().any(|o| needed.contains(o)) {
            keep[k] = true;
            needed.extend(node.inputs.iter().cloned());
        }
    }

    let before = graph.nodes.len();
    let mut flags = keep.into_iter();
    graph.nodes.retain(|_| flags.next().unwrap_or(false));
    before - graph.nodes.len()
}

fn drop_unused_initializers(graph: &mut GraphArtifact) -> usize {
    let used: HashSet<&str> = graph
        .nodes
        .iter()
        .flat_map(|n| n.inputs.iter().map(String::as_str))
        .collect();

    let before = graph.initializers.len();
    graph.initializers.retain(|i| used.contains(i.name.as_str()));
    before - graph.initializers.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::check::check;
    use crate::export::graph::{Initializer, OUTPUT_HIRE, OUTPUT_NEXT, OUTPUT_TENURE};

    fn init(name: &str) -> Initializer {
        Initializer { name: name.into(), dims: vec![3, 2], data: vec![0.5; 6] }
    }

    fn graph() -> GraphArtifact {
        let mut g = GraphArtifact::with_signature("test", 2, 3);
        g.initializers = vec![init("table"), init("unused")];
        g.nodes = vec![
            Node::new("emb", Op::Embedding, &["title_ids", "table"], &["e"]),
            Node::new("drop", Op::Identity, &["e"], &["e2"]),
            Node::new("relu", Op::Relu, &["e2"], &["r"]),
            Node::new("dead", Op::Relu, &["e2"], &["nobody"]),
            Node::new("o1", Op::Identity, &["r"], &[OUTPUT_NEXT]),
            Node::new("o2", Op::Identity, &["e"], &[OUTPUT_TENURE]),
            Node::new("o3", Op::Identity, &["lengths"], &[OUTPUT_HIRE]),
        ];
        g
    }

    #[test]
    fn test_identities_dead_nodes_and_weights_removed() {
        let g = graph();
        check(&g).unwrap();
        let (s, stats) = simplify(&g);

        check(&s).unwrap();
        assert!(stats.nodes_after < stats.nodes_before);
        assert!(stats.bytes_after < stats.bytes_before);
        assert_eq!(stats.dead_nodes, 1);
        assert_eq!(stats.unused_weights, 1);
        assert!(s.initializer("unused").is_none());

        // o3 renames a graph input and must stay
        assert!(s.nodes.iter().any(|n| n.name == "o3"));
        assert_eq!(stats.identities_folded, 3);
        // producers now write the outputs directly
        let relu = s.nodes.iter().find(|n| n.name == "relu").unwrap();
        assert_eq!(relu.inputs, vec![OUTPUT_TENURE.to_string()]);
        assert_eq!(relu.outputs, vec![OUTPUT_NEXT.to_string()]);
    }

    #[test]
    fn test_already_minimal_graph_is_unchanged() {
        let g = graph();
        let (once, _)      = simplify(&g);
        let (twice, stats) = simplify(&once);
        assert_eq!(once, twice);
        assert_eq!(stats.nodes_before, stats.nodes_after);
    }
}
