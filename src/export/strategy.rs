// ============================================================
// Layer 5b — Export Strategies
// ============================================================
// Two ways to turn a ModelSnapshot into a GraphArtifact:
//
//   traced-graph  (preferred, opset 2)
//     one node per primitive op, the way a tracer records it:
//
//       Gather → PaddingMask → Identity(dropout)
//         → BiLstm → Identity(dropout) → BiLstm
//         → Concat(h_fwd, h_bwd)
//         → per head: Gemm → Relu → Identity(dropout) → Gemm
//         → Identity(output name)       (tenure: OrderedBand first,
//                                        hireability: Sigmoid → Squeeze)
//
//   module-graph  (fallback, opset 1)
//     one composite node per model component:
//
//       Embedding → Encoder → 3 × MlpHead
//
// Both name their weights identically, so the two artifacts differ
// only in how finely the computation is spelled out.

use crate::domain::error::{TrajectoryError, TrajectoryResult};
use crate::export::graph::{
    Activation, GraphArtifact, Initializer, Node, Op, INPUT_LENGTHS, INPUT_TITLE_IDS,
    OUTPUT_HIRE, OUTPUT_NEXT, OUTPUT_TENURE,
};
use crate::export::snapshot::{CellSnapshot, HostTensor, LinearSnapshot, MlpSnapshot, ModelSnapshot};
use crate::export::ExportOptions;

pub const TRACED_GRAPH: &str = "traced-graph";
pub const MODULE_GRAPH: &str = "module-graph";

/// One way of producing an artifact. Strategies are tried in order.
pub trait ExportStrategy {
    fn name(&self) -> &'static str;

    fn export(&self, model: &ModelSnapshot, opts: &ExportOptions) -> TrajectoryResult<GraphArtifact>;
}

// ─── Shared naming ────────────────────────────────────────────────────────────
struct GraphBuilder {
    graph: GraphArtifact,
}

impl GraphBuilder {
    fn new(strategy: &str, opset: u32, model: &ModelSnapshot) -> Self {
        let mut graph = GraphArtifact::with_signature(strategy, opset, model.vocab_size);
        graph.metadata.insert("vocab_size".into(), model.vocab_size.to_string());
        graph.metadata.insert("embedding_dim".into(), model.embedding_dim.to_string());
        graph.metadata.insert("hidden_dim".into(), model.hidden_dim.to_string());
        graph.metadata.insert("num_layers".into(), model.layers.len().to_string());
        Self { graph }
    }

    fn weight(&mut self, name: String, t: &HostTensor) -> String {
        self.graph.initializers.push(Initializer {
            name: name.clone(),
            dims: t.dims.clone(),
            data: t.data.clone(),
        });
        name
    }

    fn linear(&mut self, prefix: &str, l: &LinearSnapshot) -> [String; 2] {
        [
            self.weight(format!("{prefix}.weight"), &l.weight),
            self.weight(format!("{prefix}.bias"), &l.bias_or_zeros()),
        ]
    }

    fn cell(&mut self, prefix: &str, c: &CellSnapshot) -> [String; 3] {
        [
            self.weight(format!("{prefix}.w_ih"), &c.w_ih),
            self.weight(format!("{prefix}.b_ih"), &c.b_ih),
            self.weight(format!("{prefix}.w_hh"), &c.w_hh),
        ]
    }

    fn layer_weights(&mut self, model: &ModelSnapshot, l: usize) -> Vec<String> {
        let layer = &model.layers[l];
        let mut names = self.cell(&format!("encoder.{l}.forward"), &layer.forward).to_vec();
        names.extend(self.cell(&format!("encoder.{l}.backward"), &layer.backward));
        names
    }

    fn node(&mut self, name: impl Into<String>, op: Op, inputs: &[&str], outputs: &[&str]) {
        self.graph.nodes.push(Node::new(name, op, inputs, outputs));
    }

    fn finish(self) -> GraphArtifact {
        self.graph
    }
}

fn heads(model: &ModelSnapshot) -> [(&'static str, &'static str, &MlpSnapshot); 3] {
    [
        ("next_title", OUTPUT_NEXT, &model.next_title),
        ("tenure", OUTPUT_TENURE, &model.tenure),
        ("hireability", OUTPUT_HIRE, &model.hireability),
    ]
}

fn ensure_layers(model: &ModelSnapshot, strategy: &str) -> TrajectoryResult<()> {
    if model.layers.is_empty() {
        return Err(TrajectoryError::export(strategy, "model has no recurrent layers"));
    }
    Ok(())
}

// ─── traced-graph ─────────────────────────────────────────────────────────────
pub struct TracedGraphStrategy;

impl TracedGraphStrategy {
    pub const MIN_OPSET: u32 = 2;
}

impl ExportStrategy for TracedGraphStrategy {
    fn name(&self) -> &'static str {
        TRACED_GRAPH
    }

    fn export(&self, model: &ModelSnapshot, opts: &ExportOptions) -> TrajectoryResult<GraphArtifact> {
        if opts.opset < Self::MIN_OPSET {
            return Err(TrajectoryError::export(
                TRACED_GRAPH,
                format!("needs opset ≥ {} for BiLstm, target is {}", Self::MIN_OPSET, opts.opset),
            ));
        }
        ensure_layers(model, TRACED_GRAPH)?;

        let mut g = GraphBuilder::new(TRACED_GRAPH, opts.opset, model);
        let table = g.weight("embedding.weight".into(), &model.embedding);

        g.node("embedding/gather", Op::Gather, &[&table, INPUT_TITLE_IDS], &["embedding/raw"]);
        g.node("embedding/mask", Op::PaddingMask, &["embedding/raw", INPUT_TITLE_IDS], &["embedding/masked"]);
        g.node("embedding/dropout", Op::Identity, &["embedding/masked"], &["encoder/input.0"]);

        let hd = model.hidden_dim;
        let last = model.layers.len() - 1;
        for l in 0..model.layers.len() {
            let w     = g.layer_weights(model, l);
            let input = format!("encoder/input.{l}");
            let seq   = format!("encoder/seq.{l}");
            let h_f   = format!("encoder/h_fwd.{l}");
            let h_b   = format!("encoder/h_bwd.{l}");
            let mut inputs: Vec<&str> = vec![input.as_str(), INPUT_LENGTHS];
            inputs.extend(w.iter().map(String::as_str));
            g.node(format!("encoder/bilstm.{l}"), Op::BiLstm { hidden_dim: hd }, &inputs, &[&seq, &h_f, &h_b]);

            if l < last {
                let next = format!("encoder/input.{}", l + 1);
                g.node(format!("encoder/dropout.{l}"), Op::Identity, &[&seq], &[&next]);
            } else {
                g.node("encoder/summary", Op::Concat { axis: 1 }, &[&h_f, &h_b], &["summary"]);
            }
        }

        for (name, output, mlp) in heads(model) {
            let [w1, b1] = g.linear(&format!("head.{name}.hidden"), &mlp.hidden);
            let [w2, b2] = g.linear(&format!("head.{name}.output"), &mlp.output);
            let p = |s: &str| format!("{name}/{s}");

            g.node(p("hidden"), Op::Gemm, &["summary", &w1, &b1], &[&p("hidden.out")]);
            g.node(p("relu"), Op::Relu, &[&p("hidden.out")], &[&p("relu.out")]);
            g.node(p("dropout"), Op::Identity, &[&p("relu.out")], &[&p("dropout.out")]);
            g.node(p("output"), Op::Gemm, &[&p("dropout.out"), &w2, &b2], &[&p("logits")]);

            if output == OUTPUT_HIRE {
                g.node(p("sigmoid"), Op::Sigmoid, &[&p("logits")], &[&p("prob")]);
                g.node(p("squeeze"), Op::Squeeze { axis: 1 }, &[&p("prob")], &[&p("prob.flat")]);
                g.node(p("name"), Op::Identity, &[&p("prob.flat")], &[output]);
            } else if output == OUTPUT_TENURE {
                g.node(p("band"), Op::OrderedBand, &[&p("logits")], &[&p("band.out")]);
                g.node(p("name"), Op::Identity, &[&p("band.out")], &[output]);
            } else {
                g.node(p("name"), Op::Identity, &[&p("logits")], &[output]);
            }
        }

        Ok(g.finish())
    }
}

// ─── module-graph ─────────────────────────────────────────────────────────────
pub struct ModuleGraphStrategy;

impl ModuleGraphStrategy {
    /// Composite ops are all opset 1; the artifact always declares it.
    pub const OPSET: u32 = 1;
}

impl ExportStrategy for ModuleGraphStrategy {
    fn name(&self) -> &'static str {
        MODULE_GRAPH
    }

    fn export(&self, model: &ModelSnapshot, opts: &ExportOptions) -> TrajectoryResult<GraphArtifact> {
        if opts.opset < Self::OPSET {
            return Err(TrajectoryError::export(MODULE_GRAPH, format!("opset {} is below 1", opts.opset)));
        }
        ensure_layers(model, MODULE_GRAPH)?;

        let mut g     = GraphBuilder::new(MODULE_GRAPH, Self::OPSET, model);
        let table     = g.weight("embedding.weight".into(), &model.embedding);
        g.node("embedding", Op::Embedding, &[INPUT_TITLE_IDS, &table], &["embedded"]);

        let mut weights = Vec::new();
        for l in 0..model.layers.len() {
            weights.extend(g.layer_weights(model, l));
        }
        let mut inputs: Vec<&str> = vec!["embedded", INPUT_LENGTHS];
        inputs.extend(weights.iter().map(String::as_str));
        g.node(
            "encoder",
            Op::Encoder { num_layers: model.layers.len(), hidden_dim: model.hidden_dim },
            &inputs,
            &["summary"],
        );

        for (name, output, mlp) in heads(model) {
            let [w1, b1] = g.linear(&format!("head.{name}.hidden"), &mlp.hidden);
            let [w2, b2] = g.linear(&format!("head.{name}.output"), &mlp.output);
            let hire       = output == OUTPUT_HIRE;
            let activation = match output {
                OUTPUT_HIRE   => Some(Activation::Sigmoid),
                OUTPUT_TENURE => Some(Activation::OrderedBand),
                _             => None,
            };
            let op = Op::MlpHead { activation, squeeze: hire };
            g.node(format!("head.{name}"), op, &["summary", &w1, &b1, &w2, &b2], &[output]);
        }

        Ok(g.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::check::check;
    use crate::ml::model::TrajectoryModelConfig;
    use burn::backend::NdArray;

    fn snapshot() -> ModelSnapshot {
        let model = TrajectoryModelConfig::new(5)
            .with_embedding_dim(4)
            .with_hidden_dim(3)
            .with_head_hidden_dim(6)
            .init::<NdArray>(&Default::default());
        ModelSnapshot::from_model(&model)
    }

    #[test]
    fn test_traced_graph_is_well_formed() {
        let g = TracedGraphStrategy.export(&snapshot(), &ExportOptions::default()).unwrap();
        assert_eq!(g.strategy, TRACED_GRAPH);
        assert_eq!(g.opset, 2);
        check(&g).unwrap();
        assert!(g.nodes.iter().any(|n| matches!(n.op, Op::BiLstm { hidden_dim: 3 })));
        assert!(g.nodes.iter().any(|n| n.op == Op::OrderedBand));
    }

    #[test]
    fn test_traced_graph_needs_opset_two() {
        let opts = ExportOptions { opset: 1, ..ExportOptions::default() };
        assert!(matches!(
            TracedGraphStrategy.export(&snapshot(), &opts),
            Err(TrajectoryError::ExportStrategy { .. })
        ));
    }

    #[test]
    fn test_module_graph_is_well_formed_at_opset_one() {
        let opts = ExportOptions { opset: 1, ..ExportOptions::default() };
        let g    = ModuleGraphStrategy.export(&snapshot(), &opts).unwrap();
        assert_eq!(g.opset, 1);
        assert_eq!(g.nodes.len(), 5);
        check(&g).unwrap();
        let tenure = g.nodes.iter().find(|n| n.outputs == [OUTPUT_TENURE]).unwrap();
        assert_eq!(tenure.op, Op::MlpHead { activation: Some(Activation::OrderedBand), squeeze: false });
    }

    #[test]
    fn test_both_strategies_share_weights() {
        let snap   = snapshot();
        let traced = TracedGraphStrategy.export(&snap, &ExportOptions::default()).unwrap();
        let module = ModuleGraphStrategy.export(&snap, &ExportOptions::default()).unwrap();
        assert_eq!(traced.parameter_count(), module.parameter_count());
        assert_eq!(traced.initializer("encoder.1.backward.w_hh"), module.initializer("encoder.1.backward.w_hh"));
    }
}
