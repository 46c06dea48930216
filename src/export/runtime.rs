// ============================================================
// Layer 5b — Host Graph Runtime
// ============================================================
// Executes an exported GraphArtifact on plain f32 vectors. Used to
// prove an artifact is runnable and to compare it against the
// in-memory model; it is not a serving runtime.
//
// The recurrent kernel walks each row only up to its true length:
// forward from step 0, backward from step len−1. Steps past the
// length stay zero in the sequence output.

use std::collections::HashMap;

use crate::domain::error::{TrajectoryError, TrajectoryResult};
use crate::export::graph::{
    Activation, GraphArtifact, Node, Op, INPUT_LENGTHS, INPUT_TITLE_IDS, OUTPUT_HIRE, OUTPUT_NEXT,
    OUTPUT_TENURE,
};
use crate::export::snapshot::HostTensor;

#[derive(Debug, Clone)]
enum Value {
    Float(HostTensor),
    Int { dims: Vec<usize>, data: Vec<i64> },
}

#[derive(Debug, Clone)]
pub struct SessionOutputs {
    /// [batch, V]
    pub next_role_logits: HostTensor,
    /// [batch, 2]
    pub tenure_pred:      HostTensor,
    /// [batch]
    pub hireability:      HostTensor,
}

pub struct GraphSession<'a> {
    graph:      &'a GraphArtifact,
    vocab_size: usize,
}

fn malformed(msg: impl Into<String>) -> TrajectoryError {
    TrajectoryError::MalformedArtifact(msg.into())
}

impl<'a> GraphSession<'a> {
    pub fn new(graph: &'a GraphArtifact) -> TrajectoryResult<Self> {
        let vocab_size = graph
            .vocab_size()
            .ok_or_else(|| malformed("output 'next_role_logits' has no fixed vocabulary dimension"))?;
        Ok(Self { graph, vocab_size })
    }

    /// title_ids is row-major [batch, seq].
    pub fn run(
        &self,
        title_ids: &[i64],
        lengths:   &[i64],
        batch:     usize,
        seq:       usize,
    ) -> TrajectoryResult<SessionOutputs> {
        self.check_inputs(title_ids, lengths, batch, seq)?;

        let mut values: HashMap<&str, Value> = HashMap::new();
        values.insert(INPUT_TITLE_IDS, Value::Int { dims: vec![batch, seq], data: title_ids.to_vec() });
        values.insert(INPUT_LENGTHS, Value::Int { dims: vec![batch], data: lengths.to_vec() });
        for init in &self.graph.initializers {
            values.insert(&init.name, Value::Float(HostTensor::new(init.dims.clone(), init.data.clone())));
        }

        for node in &self.graph.nodes {
            let outs = self.execute(node, &values)?;
            if outs.len() != node.outputs.len() {
                return Err(malformed(format!("node '{}' produced {} values", node.name, outs.len())));
            }
            for (name, v) in node.outputs.iter().zip(outs) {
                values.insert(name.as_str(), v);
            }
        }

        let mut take = |name: &str| match values.remove(name) {
            Some(Value::Float(t)) => Ok(t),
            _ => Err(malformed(format!("graph output '{name}' was never produced"))),
        };
        Ok(SessionOutputs {
            next_role_logits: take(OUTPUT_NEXT)?,
            tenure_pred:      take(OUTPUT_TENURE)?,
            hireability:      take(OUTPUT_HIRE)?,
        })
    }

    fn check_inputs(&self, ids: &[i64], lengths: &[i64], batch: usize, seq: usize) -> TrajectoryResult<()> {
        let bad = |m: String| TrajectoryError::config("graph inputs", m);
        if batch == 0 || seq == 0 {
            return Err(bad(format!("empty input shape [{batch}, {seq}]")));
        }
        if ids.len() != batch * seq {
            return Err(bad(format!("title_ids has {} values, expected {batch}×{seq}", ids.len())));
        }
        if lengths.len() != batch {
            return Err(bad(format!("lengths has {} values for a batch of {batch}", lengths.len())));
        }
        for (row, &l) in lengths.iter().enumerate() {
            if l <= 0 {
                return Err(TrajectoryError::EmptySequence { row });
            }
            if l as usize > seq {
                return Err(bad(format!("row {row} length {l} exceeds seq {seq}")));
            }
        }
        if let Some(&id) = ids.iter().find(|&&id| id < 0 || id as usize >= self.vocab_size) {
            return Err(bad(format!("title id {id} is outside the vocabulary of {}", self.vocab_size)));
        }
        Ok(())
    }

    fn execute(&self, node: &Node, values: &HashMap<&str, Value>) -> TrajectoryResult<Vec<Value>> {
        let float = |i: usize| -> TrajectoryResult<&HostTensor> {
            match node.inputs.get(i).and_then(|n| values.get(n.as_str())) {
                Some(Value::Float(t)) => Ok(t),
                _ => Err(malformed(format!("node '{}' input {i} is not a float tensor", node.name))),
            }
        };
        let int = |i: usize| -> TrajectoryResult<(&[usize], &[i64])> {
            match node.inputs.get(i).and_then(|n| values.get(n.as_str())) {
                Some(Value::Int { dims, data }) => Ok((dims.as_slice(), data.as_slice())),
                _ => Err(malformed(format!("node '{}' input {i} is not an int tensor", node.name))),
            }
        };
        let one = |t: HostTensor| Ok(vec![Value::Float(t)]);

        match &node.op {
            Op::Gather => {
                let (dims, ids) = int(1)?;
                one(gather(float(0)?, ids, dims)?)
            }
            Op::PaddingMask => {
                let (_, ids) = int(1)?;
                one(padding_mask(float(0)?, ids))
            }
            Op::BiLstm { hidden_dim } => {
                let (_, lengths) = int(1)?;
                let cells = [float(2)?, float(3)?, float(4)?, float(5)?, float(6)?, float(7)?];
                let (seq, h_f, h_b) = bilstm(float(0)?, lengths, cells, *hidden_dim)?;
                Ok(vec![Value::Float(seq), Value::Float(h_f), Value::Float(h_b)])
            }
            Op::Concat { axis } => {
                if *axis != 1 {
                    return Err(malformed(format!("Concat on axis {axis} is not supported")));
                }
                one(concat_cols(float(0)?, float(1)?)?)
            }
            Op::Gemm    => one(gemm(float(0)?, float(1)?, float(2)?)?),
            Op::Relu    => one(map(float(0)?, |x| x.max(0.0))),
            Op::Sigmoid => one(map(float(0)?, sigmoid)),
            Op::OrderedBand => one(ordered_band(float(0)?)?),
            Op::Identity => match node.inputs.first().and_then(|n| values.get(n.as_str())) {
                Some(v) => Ok(vec![v.clone()]),
                None => Err(malformed(format!("Identity '{}' has no input", node.name))),
            },
            Op::Squeeze { axis } => one(squeeze(float(0)?, *axis)?),

            Op::Embedding => {
                let (dims, ids) = int(0)?;
                one(padding_mask(&gather(float(1)?, ids, dims)?, ids))
            }
            Op::Encoder { num_layers, hidden_dim } => {
                let (_, lengths) = int(1)?;
                let mut x = float(0)?.clone();
                let mut finals = None;
                for l in 0..*num_layers {
                    let k = 2 + 6 * l;
                    let cells = [float(k)?, float(k + 1)?, float(k + 2)?, float(k + 3)?, float(k + 4)?, float(k + 5)?];
                    let (seq, h_f, h_b) = bilstm(&x, lengths, cells, *hidden_dim)?;
                    x = seq;
                    finals = Some((h_f, h_b));
                }
                let (h_f, h_b) = finals.ok_or_else(|| malformed("Encoder with zero layers"))?;
                one(concat_cols(&h_f, &h_b)?)
            }
            Op::MlpHead { activation, squeeze: sq } => {
                let hidden = map(&gemm(float(0)?, float(1)?, float(2)?)?, |x| x.max(0.0));
                let mut out = gemm(&hidden, float(3)?, float(4)?)?;
                match activation {
                    Some(Activation::Sigmoid)     => out = map(&out, sigmoid),
                    Some(Activation::OrderedBand) => out = ordered_band(&out)?,
                    None => {}
                }
                if *sq {
                    out = squeeze(&out, 1)?;
                }
                one(out)
            }
        }
    }
}

// ─── Kernels ──────────────────────────────────────────────────────────────────
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn softplus(x: f32) -> f32 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// [n, 2] raw → [min, min + softplus(width)]
fn ordered_band(t: &HostTensor) -> TrajectoryResult<HostTensor> {
    if !matches!(t.dims.as_slice(), [_, 2]) {
        return Err(malformed(format!("OrderedBand expects [n, 2], got {:?}", t.dims)));
    }
    let data = t.data.chunks(2).flat_map(|r| [r[0], r[0] + softplus(r[1])]).collect();
    Ok(HostTensor::new(t.dims.clone(), data))
}

fn map(t: &HostTensor, f: impl Fn(f32) -> f32) -> HostTensor {
    HostTensor::new(t.dims.clone(), t.data.iter().map(|&x| f(x)).collect())
}

fn gather(table: &HostTensor, ids: &[i64], id_dims: &[usize]) -> TrajectoryResult<HostTensor> {
    let (rows, width) = match table.dims.as_slice() {
        [r, w] => (*r, *w),
        _ => return Err(malformed("Gather table must be 2-D")),
    };
    let mut data = Vec::with_capacity(ids.len() * width);
    for &id in ids {
        let r = id as usize;
        if id < 0 || r >= rows {
            return Err(malformed(format!("Gather index {id} outside table of {rows} rows")));
        }
        data.extend_from_slice(&table.data[r * width..(r + 1) * width]);
    }
    let mut dims = id_dims.to_vec();
    dims.push(width);
    Ok(HostTensor::new(dims, data))
}

fn padding_mask(x: &HostTensor, ids: &[i64]) -> HostTensor {
    let width = x.dims.last().copied().unwrap_or(0);
    let mut out = x.clone();
    for (pos, &id) in ids.iter().enumerate() {
        if id == 0 {
            out.data[pos * width..(pos + 1) * width].fill(0.0);
        }
    }
    out
}

/// x [n, k] · w [k, m] + b [m]
fn gemm(x: &HostTensor, w: &HostTensor, b: &HostTensor) -> TrajectoryResult<HostTensor> {
    let (n, k) = match x.dims.as_slice() {
        [n, k] => (*n, *k),
        _ => return Err(malformed("Gemm input must be 2-D")),
    };
    let m = match w.dims.as_slice() {
        [wk, m] if *wk == k => *m,
        _ => return Err(malformed(format!("Gemm weight {:?} does not fit input width {k}", w.dims))),
    };
    if b.data.len() != m {
        return Err(malformed("Gemm bias length mismatch"));
    }
    Ok(HostTensor::new(vec![n, m], matmul_add(&x.data, n, k, &w.data, m, &b.data)))
}

fn matmul_add(x: &[f32], n: usize, k: usize, w: &[f32], m: usize, b: &[f32]) -> Vec<f32> {
    let mut out = Vec::with_capacity(n * m);
    for r in 0..n {
        out.extend_from_slice(b);
        let row = &mut out[r * m..(r + 1) * m];
        for (i, &xi) in x[r * k..(r + 1) * k].iter().enumerate() {
            if xi == 0.0 {
                continue;
            }
            for (o, &wij) in row.iter_mut().zip(&w[i * m..(i + 1) * m]) {
                *o += xi * wij;
            }
        }
    }
    out
}

fn concat_cols(a: &HostTensor, b: &HostTensor) -> TrajectoryResult<HostTensor> {
    let (n, wa, wb) = match (a.dims.as_slice(), b.dims.as_slice()) {
        ([n, wa], [nb, wb]) if n == nb => (*n, *wa, *wb),
        _ => return Err(malformed("Concat inputs must be 2-D with equal rows")),
    };
    let mut data = Vec::with_capacity(n * (wa + wb));
    for r in 0..n {
        data.extend_from_slice(&a.data[r * wa..(r + 1) * wa]);
        data.extend_from_slice(&b.data[r * wb..(r + 1) * wb]);
    }
    Ok(HostTensor::new(vec![n, wa + wb], data))
}

fn squeeze(t: &HostTensor, axis: usize) -> TrajectoryResult<HostTensor> {
    if t.dims.get(axis) != Some(&1) {
        return Err(malformed(format!("cannot squeeze axis {axis} of {:?}", t.dims)));
    }
    let mut dims = t.dims.clone();
    dims.remove(axis);
    Ok(HostTensor::new(dims, t.data.clone()))
}

/// One direction over one row; `steps` yields time indices in visit order.
fn lstm_row(
    x:      &[f32],
    d_in:   usize,
    steps:  impl Iterator<Item = usize>,
    cell:   [&HostTensor; 3],
    hd:     usize,
    out:    &mut [f32],
    offset: usize,
) -> Vec<f32> {
    let [w_ih, b_ih, w_hh] = cell;
    let zero = vec![0.0; 4 * hd];
    let mut h = vec![0.0f32; hd];
    let mut c = vec![0.0f32; hd];

    for t in steps {
        let xi   = &x[t * d_in..(t + 1) * d_in];
        let mut g = matmul_add(xi, 1, d_in, &w_ih.data, 4 * hd, &b_ih.data);
        let hh   = matmul_add(&h, 1, hd, &w_hh.data, 4 * hd, &zero);
        for (a, b) in g.iter_mut().zip(hh) {
            *a += b;
        }
        for j in 0..hd {
            let i_g = sigmoid(g[j]);
            let f_g = sigmoid(g[hd + j]);
            let c_g = g[2 * hd + j].tanh();
            let o_g = sigmoid(g[3 * hd + j]);
            c[j] = f_g * c[j] + i_g * c_g;
            h[j] = o_g * c[j].tanh();
        }
        out[t * 2 * hd + offset..t * 2 * hd + offset + hd].copy_from_slice(&h);
    }
    h
}

fn bilstm(
    x:       &HostTensor,
    lengths: &[i64],
    cells:   [&HostTensor; 6],
    hd:      usize,
) -> TrajectoryResult<(HostTensor, HostTensor, HostTensor)> {
    let (batch, seq, d_in) = match x.dims.as_slice() {
        [b, s, d] => (*b, *s, *d),
        _ => return Err(malformed("BiLstm input must be 3-D")),
    };
    for (k, w) in cells.iter().enumerate() {
        let ok = match k % 3 {
            0 => w.dims == [d_in, 4 * hd],
            1 => w.dims == [4 * hd],
            _ => w.dims == [hd, 4 * hd],
        };
        if !ok {
            return Err(malformed(format!("BiLstm weight {k} has dims {:?}", w.dims)));
        }
    }

    let mut seq_out = vec![0.0f32; batch * seq * 2 * hd];
    let mut h_fwd   = Vec::with_capacity(batch * hd);
    let mut h_bwd   = Vec::with_capacity(batch * hd);

    for r in 0..batch {
        let len  = (lengths[r].max(0) as usize).min(seq);
        let xr   = &x.data[r * seq * d_in..(r + 1) * seq * d_in];
        let outr = &mut seq_out[r * seq * 2 * hd..(r + 1) * seq * 2 * hd];
        h_fwd.extend(lstm_row(xr, d_in, 0..len, [cells[0], cells[1], cells[2]], hd, outr, 0));
        h_bwd.extend(lstm_row(xr, d_in, (0..len).rev(), [cells[3], cells[4], cells[5]], hd, outr, hd));
    }

    Ok((
        HostTensor::new(vec![batch, seq, 2 * hd], seq_out),
        HostTensor::new(vec![batch, hd], h_fwd),
        HostTensor::new(vec![batch, hd], h_bwd),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::graph::{GraphArtifact, Initializer, Node};

    fn init(name: &str, dims: Vec<usize>, data: Vec<f32>) -> Initializer {
        Initializer { name: name.into(), dims, data }
    }

    /// One Gemm reading a value nothing defines.
    fn toy_graph() -> GraphArtifact {
        let mut g = GraphArtifact::with_signature("toy", 2, 3);
        g.initializers = vec![
            init("w_next", vec![2, 3], vec![1.0, 0.0, -1.0, 0.0, 1.0, 0.5]),
            init("b_next", vec![3], vec![0.1, 0.2, 0.3]),
        ];
        g.nodes = vec![
            Node::new("head", Op::Gemm, &["summary", "w_next", "b_next"], &["next_role_logits"]),
        ];
        g
    }

    #[test]
    fn test_ordered_band_never_inverts() {
        let raw  = HostTensor::new(vec![3, 2], vec![4.0, -30.0, -2.0, 0.0, 1.0, 40.0]);
        let band = ordered_band(&raw).unwrap();
        assert!(band.data.chunks(2).all(|r| r[0] <= r[1]));
        assert!((band.data[3] - (-2.0 + 2f32.ln())).abs() < 1e-6);
        assert!((band.data[5] - 41.0).abs() < 1e-4);
        assert!(ordered_band(&HostTensor::new(vec![1, 3], vec![0.0; 3])).is_err());
    }

    #[test]
    fn test_gemm_and_matmul() {
        let x = HostTensor::new(vec![1, 2], vec![1.0, 2.0]);
        let w = HostTensor::new(vec![2, 3], vec![1.0, 0.0, -1.0, 0.0, 1.0, 0.5]);
        let b = HostTensor::new(vec![3], vec![0.1, 0.2, 0.3]);
        let y = gemm(&x, &w, &b).unwrap();
        assert_eq!(y.dims, vec![1, 3]);
        let expected = [1.1, 2.2, 0.3];
        for (a, e) in y.data.iter().zip(expected) {
            assert!((a - e).abs() < 1e-6);
        }
    }

    #[test]
    fn test_gather_and_mask() {
        let table = HostTensor::new(vec![3, 2], vec![9.0, 9.0, 1.0, 2.0, 3.0, 4.0]);
        let ids   = [2i64, 0, 1, 1];
        let g     = gather(&table, &ids, &[2, 2]).unwrap();
        assert_eq!(g.dims, vec![2, 2, 2]);
        let m = padding_mask(&g, &ids);
        assert_eq!(m.data, vec![3.0, 4.0, 0.0, 0.0, 1.0, 2.0, 1.0, 2.0]);
        assert!(gather(&table, &[5], &[1, 1]).is_err());
    }

    #[test]
    fn test_bilstm_ignores_steps_past_length() {
        let hd   = 2;
        let d_in = 1;
        let w_ih = HostTensor::new(vec![d_in, 4 * hd], (0..8).map(|i| 0.1 * i as f32).collect());
        let b_ih = HostTensor::new(vec![4 * hd], vec![0.05; 8]);
        let w_hh = HostTensor::new(vec![hd, 4 * hd], (0..16).map(|i| 0.02 * i as f32 - 0.1).collect());
        let cells = [&w_ih, &b_ih, &w_hh, &w_ih, &b_ih, &w_hh];

        let a = HostTensor::new(vec![1, 3, 1], vec![0.5, -0.5, 0.0]);
        let b = HostTensor::new(vec![1, 3, 1], vec![0.5, -0.5, 7.0]);
        let (sa, fa, ba) = bilstm(&a, &[2], cells, hd).unwrap();
        let (sb, fb, bb) = bilstm(&b, &[2], cells, hd).unwrap();
        assert_eq!(fa, fb);
        assert_eq!(ba, bb);
        assert_eq!(sa, sb);
        // padded step stays zero
        assert!(sa.data[2 * 2 * hd..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_session_rejects_bad_inputs() {
        let g = toy_graph();
        let s = GraphSession::new(&g).unwrap();
        assert!(s.run(&[1, 2], &[1], 1, 3).is_err());
        assert!(matches!(s.run(&[1, 2], &[0], 1, 2), Err(TrajectoryError::EmptySequence { row: 0 })));
        assert!(s.run(&[1, 2], &[3], 1, 2).is_err());
        assert!(s.run(&[1, 9], &[2], 1, 2).is_err());
    }

    #[test]
    fn test_session_reports_missing_values() {
        let g = toy_graph();
        let s = GraphSession::new(&g).unwrap();
        assert!(matches!(s.run(&[1, 2], &[2], 1, 2), Err(TrajectoryError::MalformedArtifact(_))));
    }
}
