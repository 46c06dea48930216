// ============================================================
// Layer 5 — Output Heads
// ============================================================
// Three independent heads read the same trajectory summary vector:
//
//   NextTitleHead    summary → logits over the vocabulary
//   TenureHead       summary → [min_months, max_months], max ≥ min
//   HireabilityHead  summary → probability in [0, 1]
//
// Each one is a two-layer feed-forward net (Linear → ReLU → Linear)
// behind the TrajectoryHead trait, so the encoder never knows how
// many heads exist or what they predict.

use burn::{
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation::{relu, sigmoid},
};

/// Vector in, task output out.
pub trait TrajectoryHead<B: Backend> {
    type Output;

    fn predict(&self, summary: Tensor<B, 2>) -> Self::Output;
}

// ─── Shared two-layer MLP ─────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct MlpHeadConfig {
    pub d_input:  usize,
    pub d_hidden: usize,
    pub d_output: usize,
    #[config(default = 0.2)]
    pub dropout:  f64,
}

impl MlpHeadConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MlpHead<B> {
        MlpHead {
            hidden:  LinearConfig::new(self.d_input, self.d_hidden).init(device),
            output:  LinearConfig::new(self.d_hidden, self.d_output).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

#[derive(Module, Debug)]
pub struct MlpHead<B: Backend> {
    pub hidden:  Linear<B>,
    pub output:  Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> MlpHead<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = relu(self.hidden.forward(x));
        self.output.forward(self.dropout.forward(x))
    }
}

// ─── Next title ───────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct NextTitleHead<B: Backend> {
    pub mlp: MlpHead<B>,
}

impl<B: Backend> TrajectoryHead<B> for NextTitleHead<B> {
    /// [batch, vocab_size] unnormalised logits
    type Output = Tensor<B, 2>;

    fn predict(&self, summary: Tensor<B, 2>) -> Tensor<B, 2> {
        self.mlp.forward(summary)
    }
}

// ─── Tenure range ─────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct TenureHead<B: Backend> {
    pub mlp: MlpHead<B>,
}

impl<B: Backend> TrajectoryHead<B> for TenureHead<B> {
    /// [batch, 2] = [min_months, max_months]
    type Output = Tensor<B, 2>;

    fn predict(&self, summary: Tensor<B, 2>) -> Tensor<B, 2> {
        ordered_band(self.mlp.forward(summary))
    }
}

/// [n, 2] raw → [min, min + softplus(width)]
pub fn ordered_band<B: Backend>(raw: Tensor<B, 2>) -> Tensor<B, 2> {
    let [n, _] = raw.dims();
    let min    = raw.clone().slice([0..n, 0..1]);
    let width  = raw.slice([0..n, 1..2]);
    Tensor::cat(vec![min.clone(), min + softplus(width)], 1)
}

/// log(1 + eˣ) without overflow for large x.
fn softplus<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    x.clone().clamp_min(0.0) + x.abs().neg().exp().log1p()
}

// ─── Hireability ──────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct HireabilityHead<B: Backend> {
    pub mlp: MlpHead<B>,
}

impl<B: Backend> TrajectoryHead<B> for HireabilityHead<B> {
    /// [batch] probabilities
    type Output = Tensor<B, 1>;

    fn predict(&self, summary: Tensor<B, 2>) -> Tensor<B, 1> {
        let [batch, _] = summary.dims();
        sigmoid(self.mlp.forward(summary)).reshape([batch])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    fn mlp(d_output: usize) -> MlpHead<B> {
        MlpHeadConfig::new(8, 6, d_output).init(&Default::default())
    }

    #[test]
    fn test_head_output_shapes() {
        let summary = Tensor::<B, 2>::ones([3, 8], &Default::default());
        let next    = NextTitleHead { mlp: mlp(5) }.predict(summary.clone());
        let tenure  = TenureHead { mlp: mlp(2) }.predict(summary.clone());
        let hire    = HireabilityHead { mlp: mlp(1) }.predict(summary);
        assert_eq!(next.dims(), [3, 5]);
        assert_eq!(tenure.dims(), [3, 2]);
        assert_eq!(hire.dims(), [3]);
    }

    #[test]
    fn test_tenure_band_is_ordered() {
        let summary = Tensor::<B, 2>::random(
            [32, 8],
            burn::tensor::Distribution::Normal(0.0, 10.0),
            &Default::default(),
        );
        let band: Vec<f32> = TenureHead { mlp: mlp(2) }.predict(summary).into_data().iter::<f32>().collect();
        assert!(band.chunks(2).all(|r| r[0] <= r[1]));
    }

    #[test]
    fn test_ordered_band_values() {
        let raw = Tensor::<B, 2>::from_data(
            TensorData::new(vec![3.0f32, 0.0, 5.0, -50.0, -1.0, 60.0], [3, 2]),
            &Default::default(),
        );
        let band: Vec<f32> = ordered_band(raw).into_data().iter::<f32>().collect();
        assert_eq!(band[0], 3.0);
        assert!((band[1] - (3.0 + 2f32.ln())).abs() < 1e-5);
        assert!(band[3] >= band[2] && band[3] - band[2] < 1e-6);
        assert!((band[5] - 59.0).abs() < 1e-3);
    }

    #[test]
    fn test_hireability_is_a_probability() {
        let summary = Tensor::<B, 2>::random(
            [16, 8],
            burn::tensor::Distribution::Normal(0.0, 10.0),
            &Default::default(),
        );
        let probs: Vec<f32> = HireabilityHead { mlp: mlp(1) }
            .predict(summary)
            .into_data()
            .iter::<f32>()
            .collect();
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }
}
