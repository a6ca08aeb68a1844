//! Trained regressors that map standardized features to a raw star value.
//!
//! Weights use the PyTorch state-dict names: `fc1`/`fc2` for the tiny MLP and
//! `network.{index}` (Linear, ReLU, BatchNorm1d, Dropout per hidden layer)
//! for the ordinal model.

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder};

use crate::config::RatingModelKind;

const BATCH_NORM_EPS: f64 = 1e-5;
const STARS: usize = 5;
/// Sequential slots per hidden layer: Linear, ReLU, BatchNorm1d, Dropout.
const SLOTS_PER_LAYER: usize = 4;

/// Inference-mode `BatchNorm1d` with running statistics.
pub(crate) struct BatchNorm {
    weight: Tensor,
    bias: Tensor,
    running_mean: Tensor,
    running_var: Tensor,
}

impl BatchNorm {
    fn load(dim: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            weight: vb.get(dim, "weight")?,
            bias: vb.get(dim, "bias")?,
            running_mean: vb.get(dim, "running_mean")?,
            running_var: vb.get(dim, "running_var")?,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let denom = (&self.running_var + BATCH_NORM_EPS)?.sqrt()?;
        xs.broadcast_sub(&self.running_mean)?
            .broadcast_div(&denom)?
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}

pub(crate) struct HiddenLayer {
    linear: Linear,
    norm: BatchNorm,
}

pub(crate) enum RatingModel {
    /// `in -> hidden -> 1`, ReLU.
    Tiny { fc1: Linear, fc2: Linear },
    /// Hidden layers then 4 cumulative logits `P(star > k)`; output is the
    /// expected star.
    Ordinal {
        hidden: Vec<HiddenLayer>,
        head: Linear,
    },
}

impl RatingModel {
    pub(crate) fn load(
        kind: &RatingModelKind,
        input_dim: usize,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        match kind {
            RatingModelKind::Tiny { hidden_dim } => Ok(Self::Tiny {
                fc1: candle_nn::linear(input_dim, *hidden_dim, vb.pp("fc1"))?,
                fc2: candle_nn::linear(*hidden_dim, 1, vb.pp("fc2"))?,
            }),
            RatingModelKind::Ordinal { hidden_dims } => {
                let network = vb.pp("network");
                let mut hidden = Vec::with_capacity(hidden_dims.len());
                let mut prev = input_dim;
                for (layer, &dim) in hidden_dims.iter().enumerate() {
                    let base = layer * SLOTS_PER_LAYER;
                    hidden.push(HiddenLayer {
                        linear: candle_nn::linear(prev, dim, network.pp(base.to_string()))?,
                        norm: BatchNorm::load(dim, network.pp((base + 2).to_string()))?,
                    });
                    prev = dim;
                }
                let head_index = hidden_dims.len() * SLOTS_PER_LAYER;
                let head = candle_nn::linear(prev, STARS - 1, network.pp(head_index.to_string()))?;
                Ok(Self::Ordinal { hidden, head })
            }
        }
    }

    /// Raw (unclamped) star value for one standardized feature row.
    pub(crate) fn predict(&self, features: &[f64]) -> candle_core::Result<f64> {
        let row: Vec<f32> = features.iter().map(|&x| x as f32).collect();
        let xs = Tensor::from_vec(row, (1, features.len()), &Device::Cpu)?;
        match self {
            Self::Tiny { fc1, fc2 } => {
                let h = fc1.forward(&xs)?.relu()?;
                let out = fc2.forward(&h)?.flatten_all()?.to_dtype(DType::F64)?;
                out.get(0)?.to_scalar::<f64>()
            }
            Self::Ordinal { hidden, head } => {
                let mut h = xs;
                for layer in hidden {
                    h = layer.norm.forward(&layer.linear.forward(&h)?.relu()?)?;
                }
                let cumulative = candle_nn::ops::sigmoid(&head.forward(&h)?)?
                    .flatten_all()?
                    .to_dtype(DType::F64)?
                    .to_vec1::<f64>()?;
                Ok(expected_star(&cumulative))
            }
        }
    }

    /// Total trainable parameters (batch-norm running statistics excluded).
    pub(crate) fn parameter_count(&self) -> usize {
        let linear = |l: &Linear| {
            l.weight().elem_count() + l.bias().map_or(0, |b| b.elem_count())
        };
        match self {
            Self::Tiny { fc1, fc2 } => linear(fc1) + linear(fc2),
            Self::Ordinal { hidden, head } => {
                hidden
                    .iter()
                    .map(|l| linear(&l.linear) + 2 * l.norm.weight.elem_count())
                    .sum::<usize>()
                    + linear(head)
            }
        }
    }

    pub(crate) fn architecture(&self, input_dim: usize) -> String {
        let dims: Vec<usize> = match self {
            Self::Tiny { fc1, .. } => vec![input_dim, out_dim(fc1), 1],
            Self::Ordinal { hidden, head } => std::iter::once(input_dim)
                .chain(hidden.iter().map(|l| out_dim(&l.linear)))
                .chain(std::iter::once(out_dim(head)))
                .collect(),
        };
        let body = dims
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join(" → ");
        match self {
            Self::Tiny { .. } => body,
            Self::Ordinal { .. } => format!("{body} (ordinal)"),
        }
    }
}

fn out_dim(linear: &Linear) -> usize {
    linear.weight().dims().first().copied().unwrap_or(0)
}

/// `Σ k · P(star = k)` from cumulative probabilities `P(star > k)`, k = 1..4.
fn expected_star(cumulative: &[f64]) -> f64 {
    let mut expected = 0.0;
    let mut above_prev = 1.0;
    for (k, &above) in cumulative.iter().enumerate() {
        expected += (k + 1) as f64 * (above_prev - above);
        above_prev = above;
    }
    expected + (cumulative.len() + 1) as f64 * above_prev
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use candle_core::{DType, Device, Tensor};

    use super::*;

    fn tensor(values: &[f32], shape: &[usize]) -> Tensor {
        Tensor::from_vec(values.to_vec(), shape, &Device::Cpu).unwrap()
    }

    #[test]
    fn tiny_forward_matches_hand_computation() {
        // fc1: 2 hidden units on 3 inputs; fc2 sums them plus 1.
        let mut t = HashMap::new();
        t.insert("fc1.weight".to_string(), tensor(&[1.0, 0.0, 0.0, 0.0, -1.0, 0.0], &[2, 3]));
        t.insert("fc1.bias".to_string(), tensor(&[0.0, 0.5], &[2]));
        t.insert("fc2.weight".to_string(), tensor(&[1.0, 1.0], &[1, 2]));
        t.insert("fc2.bias".to_string(), tensor(&[1.0], &[1]));
        let vb = VarBuilder::from_tensors(t, DType::F32, &Device::Cpu);
        let model = RatingModel::load(&RatingModelKind::Tiny { hidden_dim: 2 }, 3, vb).unwrap();

        // relu(2) + relu(-3 + 0.5) + 1
        let raw = model.predict(&[2.0, 3.0, 7.0]).unwrap();
        assert!((raw - 3.0).abs() < 1e-6);
        assert_eq!(model.parameter_count(), 8 + 3);
        assert_eq!(model.architecture(3), "3 → 2 → 1");
    }

    #[test]
    fn default_tiny_has_161_parameters() {
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = RatingModel::load(&RatingModelKind::default(), 3, vb).unwrap();
        assert_eq!(model.parameter_count(), 161);
        assert_eq!(model.architecture(3), "3 → 32 → 1");
    }

    #[test]
    fn ordinal_expected_star() {
        assert!((expected_star(&[0.0; 4]) - 1.0).abs() < 1e-12);
        assert!((expected_star(&[1.0; 4]) - 5.0).abs() < 1e-12);
        assert!((expected_star(&[0.5; 4]) - 3.0).abs() < 1e-12);
        assert!((expected_star(&[1.0, 1.0, 0.0, 0.0]) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn ordinal_forward_uses_running_statistics() {
        let mut t = HashMap::new();
        t.insert("network.0.weight".to_string(), tensor(&[1.0, 0.0, 0.0], &[1, 3]));
        t.insert("network.0.bias".to_string(), tensor(&[0.0], &[1]));
        t.insert("network.2.weight".to_string(), tensor(&[1.0], &[1]));
        t.insert("network.2.bias".to_string(), tensor(&[0.0], &[1]));
        t.insert("network.2.running_mean".to_string(), tensor(&[1.0], &[1]));
        t.insert("network.2.running_var".to_string(), tensor(&[4.0], &[1]));
        // four thresholds on the single hidden unit; huge gain makes the
        // cumulative probabilities effectively 0 or 1
        t.insert("network.4.weight".to_string(), tensor(&[100.0; 4], &[4, 1]));
        t.insert(
            "network.4.bias".to_string(),
            tensor(&[100.0, 50.0, -50.0, -100.0], &[4]),
        );
        let vb = VarBuilder::from_tensors(t, DType::F32, &Device::Cpu);
        let kind = RatingModelKind::Ordinal {
            hidden_dims: vec![1],
        };
        let model = RatingModel::load(&kind, 3, vb).unwrap();

        // relu(1) -> (1 - 1) / 2 = 0 -> logits [100, 50, -50, -100] -> 3 stars
        let raw = model.predict(&[1.0, 9.0, 9.0]).unwrap();
        assert!((raw - 3.0).abs() < 1e-4, "raw = {raw}");
        // relu(5) -> 2 -> all logits positive -> 5 stars
        let raw = model.predict(&[5.0, 0.0, 0.0]).unwrap();
        assert!((raw - 5.0).abs() < 1e-4, "raw = {raw}");
        assert_eq!(model.parameter_count(), 4 + 2 + 8);
        assert_eq!(model.architecture(3), "3 → 1 → 4 (ordinal)");
    }
}
