// ============================================================
// Layer 5b — Structural Check
// ============================================================
// An artifact is accepted only if it is well formed:
//
//   - known format version, every op within the declared opset
//   - inputs exactly title_ids [batch, seq] and lengths [batch], i64,
//     with batch and seq symbolic and batch shared
//   - outputs exactly next_role_logits, tenure_pred, hireability
//   - initializer payloads match their dims, names unique
//   - nodes topologically ordered, every value assigned once,
//     op arity respected, every output produced

use std::collections::HashSet;

use crate::domain::error::{TrajectoryError, TrajectoryResult};
use crate::export::graph::{
    DType, Dim, GraphArtifact, ARTIFACT_FORMAT_VERSION, INPUT_LENGTHS, INPUT_TITLE_IDS,
    OUTPUT_HIRE, OUTPUT_NEXT, OUTPUT_TENURE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckSummary {
    pub nodes:        usize,
    pub initializers: usize,
    pub parameters:   usize,
}

fn reject(msg: impl Into<String>) -> TrajectoryError {
    TrajectoryError::MalformedArtifact(msg.into())
}

pub fn check(graph: &GraphArtifact) -> TrajectoryResult<CheckSummary> {
    if graph.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(reject(format!("unknown format_version {}", graph.format_version)));
    }

    check_inputs(graph)?;
    check_outputs(graph)?;

    let mut defined: HashSet<&str> = graph.inputs.iter().map(|v| v.name.as_str()).collect();
    for init in &graph.initializers {
        let expected: usize = init.dims.iter().product();
        if init.data.len() != expected {
            return Err(reject(format!(
                "initializer '{}' has {} values but dims {:?}",
                init.name, init.data.len(), init.dims
            )));
        }
        if !defined.insert(init.name.as_str()) {
            return Err(reject(format!("value '{}' is defined twice", init.name)));
        }
    }

    for node in &graph.nodes {
        if node.op.min_opset() > graph.opset {
            return Err(reject(format!(
                "node '{}' uses {} which needs opset {} (artifact declares {})",
                node.name, node.op.kind(), node.op.min_opset(), graph.opset
            )));
        }
        let (n_in, n_out) = node.op.arity();
        if node.inputs.len() != n_in || node.outputs.len() != n_out {
            return Err(reject(format!(
                "node '{}' ({}) has {} inputs / {} outputs, expected {} / {}",
                node.name, node.op.kind(), node.inputs.len(), node.outputs.len(), n_in, n_out
            )));
        }
        if let Some(missing) = node.inputs.iter().find(|i| !defined.contains(i.as_str())) {
            return Err(reject(format!(
                "node '{}' reads '{}' before it is defined",
                node.name, missing
            )));
        }
        for out in &node.outputs {
            if !defined.insert(out.as_str()) {
                return Err(reject(format!("value '{out}' is assigned more than once")));
            }
        }
    }

    if let Some(missing) = graph.outputs.iter().find(|o| !defined.contains(o.name.as_str())) {
        return Err(reject(format!("graph output '{}' is never produced", missing.name)));
    }

    Ok(CheckSummary {
        nodes:        graph.nodes.len(),
        initializers: graph.initializers.len(),
        parameters:   graph.parameter_count(),
    })
}

fn check_inputs(graph: &GraphArtifact) -> TrajectoryResult<()> {
    let names: Vec<&str> = graph.inputs.iter().map(|v| v.name.as_str()).collect();
    if names != [INPUT_TITLE_IDS, INPUT_LENGTHS] {
        return Err(reject(format!("inputs must be [title_ids, lengths], found {names:?}")));
    }
    let ids     = &graph.inputs[0];
    let lengths = &graph.inputs[1];
    if ids.dtype != DType::Int64 || lengths.dtype != DType::Int64 {
        return Err(reject("title_ids and lengths must be Int64"));
    }

    let (batch, seq) = match ids.dims.as_slice() {
        [Dim::Symbolic(b), Dim::Symbolic(s)] if b != s => (b, s),
        other => return Err(reject(format!("title_ids dims must be two distinct symbols, found {other:?}"))),
    };
    match lengths.dims.as_slice() {
        [Dim::Symbolic(b)] if b == batch => {}
        other => {
            return Err(reject(format!(
                "lengths dims must be [{batch}] (shared with title_ids), found {other:?}"
            )))
        }
    }
    tracing::debug!("Input dims: batch='{}' seq='{}'", batch, seq);
    Ok(())
}

fn check_outputs(graph: &GraphArtifact) -> TrajectoryResult<()> {
    let names: Vec<&str> = graph.outputs.iter().map(|v| v.name.as_str()).collect();
    if names != [OUTPUT_NEXT, OUTPUT_TENURE, OUTPUT_HIRE] {
        return Err(reject(format!(
            "outputs must be [next_role_logits, tenure_pred, hireability], found {names:?}"
        )));
    }
    let batch = graph.inputs[0].dims.first().cloned();
    for out in &graph.outputs {
        if out.dtype != DType::Float32 {
            return Err(reject(format!("output '{}' must be Float32", out.name)));
        }
        if out.dims.first().cloned() != batch {
            return Err(reject(format!("output '{}' must lead with the batch dimension", out.name)));
        }
    }
    match graph.outputs[0].dims.as_slice() {
        [_, Dim::Fixed(v)] if *v >= 2 => {}
        other => return Err(reject(format!("next_role_logits dims {other:?} lack a vocabulary size"))),
    }
    if graph.outputs[1].dims.get(1) != Some(&Dim::Fixed(2)) || graph.outputs[1].dims.len() != 2 {
        return Err(reject("tenure_pred must be [batch, 2]"));
    }
    if graph.outputs[2].dims.len() != 1 {
        return Err(reject("hireability must be [batch]"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::graph::{Initializer, Node, Op};

    /// Smallest graph that passes: an embedding and three renames.
    fn valid() -> GraphArtifact {
        let mut g = GraphArtifact::with_signature("test", 2, 3);
        g.initializers = vec![
            Initializer { name: "table".into(), dims: vec![3, 2], data: vec![0.0; 6] },
        ];
        g.nodes = vec![
            Node::new("emb", Op::Embedding, &["title_ids", "table"], &["e"]),
            Node::new("a", Op::Identity, &["e"], &[OUTPUT_NEXT]),
            Node::new("b", Op::Identity, &["e"], &[OUTPUT_TENURE]),
            Node::new("c", Op::Identity, &["lengths"], &[OUTPUT_HIRE]),
        ];
        g
    }

    #[test]
    fn test_valid_graph_passes() {
        let s = check(&valid()).unwrap();
        assert_eq!(s.nodes, 4);
        assert_eq!(s.parameters, 6);
    }

    #[test]
    fn test_wrong_version_or_opset() {
        let mut g = valid();
        g.format_version = 99;
        assert!(check(&g).is_err());

        let mut g = valid();
        g.opset = 1;
        g.nodes.push(Node::new("r", Op::Relu, &["e"], &["r"]));
        assert!(check(&g).is_err());
    }

    #[test]
    fn test_fixed_or_unshared_batch_rejected() {
        let mut g = valid();
        g.inputs[0].dims[0] = Dim::Fixed(1);
        assert!(check(&g).is_err());

        let mut g = valid();
        g.inputs[1].dims[0] = Dim::symbol("other");
        assert!(check(&g).is_err());
    }

    #[test]
    fn test_output_names_must_match() {
        let mut g = valid();
        g.outputs[2].name = "score".into();
        assert!(check(&g).is_err());
    }

    #[test]
    fn test_bad_initializer_rejected() {
        let mut g = valid();
        g.initializers[0].data.pop();
        assert!(check(&g).is_err());
    }

    #[test]
    fn test_ordering_and_single_assignment() {
        let mut g = valid();
        g.nodes.swap(0, 1);
        assert!(check(&g).is_err());

        let mut g = valid();
        g.nodes.push(Node::new("dup", Op::Identity, &["e"], &["e"]));
        assert!(check(&g).is_err());
    }

    #[test]
    fn test_arity_and_missing_outputs() {
        let mut g = valid();
        g.nodes[0].inputs.pop();
        assert!(check(&g).is_err());

        let mut g = valid();
        g.nodes.pop();
        assert!(check(&g).is_err());
    }
}
