//! wav2vec2 with a CTC head, loaded from HuggingFace safetensors.
//!
//! Both encoder layouts are supported: post-norm (`wav2vec2-base`) and the
//! stable pre-norm variant used by the large phoneme checkpoints.

use candle_core::{Module, Tensor, D};
use candle_nn::{Conv1d, Conv1dConfig, GroupNorm, LayerNorm, Linear, VarBuilder};

use crate::config::Wav2Vec2ModelConfig;

enum ConvNorm {
    None,
    Layer(LayerNorm),
    Group(GroupNorm),
}

struct ConvBlock {
    conv: Conv1d,
    norm: ConvNorm,
}

impl ConvBlock {
    fn load(cfg: &Wav2Vec2ModelConfig, index: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let in_channels = if index == 0 { 1 } else { cfg.conv_dim[index - 1] };
        let out_channels = cfg.conv_dim[index];
        let conv_cfg = Conv1dConfig {
            stride: cfg.conv_stride[index],
            ..Default::default()
        };
        let kernel = cfg.conv_kernel[index];
        let conv = if cfg.conv_bias {
            candle_nn::conv1d(in_channels, out_channels, kernel, conv_cfg, vb.pp("conv"))?
        } else {
            candle_nn::conv1d_no_bias(in_channels, out_channels, kernel, conv_cfg, vb.pp("conv"))?
        };
        let norm = match cfg.feat_extract_norm.as_str() {
            "layer" => ConvNorm::Layer(candle_nn::layer_norm(
                out_channels,
                cfg.layer_norm_eps,
                vb.pp("layer_norm"),
            )?),
            // "group" mode normalizes only the first block, one group per channel.
            "group" if index == 0 => ConvNorm::Group(candle_nn::group_norm(
                out_channels,
                out_channels,
                cfg.layer_norm_eps,
                vb.pp("layer_norm"),
            )?),
            _ => ConvNorm::None,
        };
        Ok(Self { conv, norm })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let xs = self.conv.forward(xs)?;
        let xs = match &self.norm {
            ConvNorm::None => xs,
            ConvNorm::Group(gn) => gn.forward(&xs)?,
            ConvNorm::Layer(ln) => ln
                .forward(&xs.transpose(1, 2)?.contiguous()?)?
                .transpose(1, 2)?
                .contiguous()?,
        };
        xs.gelu_erf()
    }
}

struct FeatureEncoder {
    blocks: Vec<ConvBlock>,
    projection_norm: LayerNorm,
    projection: Linear,
}

impl FeatureEncoder {
    fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let conv_vb = vb.pp("feature_extractor").pp("conv_layers");
        let blocks = (0..cfg.conv_dim.len())
            .map(|i| ConvBlock::load(cfg, i, conv_vb.pp(i)))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let feat_dim = cfg.conv_dim.last().copied().unwrap_or(cfg.hidden_size);
        let proj_vb = vb.pp("feature_projection");
        Ok(Self {
            blocks,
            projection_norm: candle_nn::layer_norm(
                feat_dim,
                cfg.layer_norm_eps,
                proj_vb.pp("layer_norm"),
            )?,
            projection: candle_nn::linear(feat_dim, cfg.hidden_size, proj_vb.pp("projection"))?,
        })
    }

    /// `(batch, samples)` to `(batch, frames, hidden)`.
    fn forward(&self, audio: &Tensor) -> candle_core::Result<Tensor> {
        let mut h = audio.unsqueeze(1)?;
        for block in &self.blocks {
            h = block.forward(&h)?;
        }
        let h = h.transpose(1, 2)?.contiguous()?;
        self.projection.forward(&self.projection_norm.forward(&h)?)
    }
}

/// Grouped convolution positional embedding with weight normalization.
struct PositionalConv {
    conv: Conv1d,
}

impl PositionalConv {
    fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let groups = cfg.num_conv_pos_embedding_groups;
        let kernel = cfg.num_conv_pos_embeddings;
        let hidden = cfg.hidden_size;
        let shape = (hidden, hidden / groups, kernel);
        let vb = vb.pp("conv");

        let weight = match weight_norm_parts(&vb, shape, kernel)? {
            Some((direction, magnitude)) => {
                if magnitude.dims3()? == (1, 1, kernel) {
                    // Norm taken over every axis but the kernel axis.
                    let norm = direction
                        .sqr()?
                        .sum_keepdim(0)?
                        .sum_keepdim(1)?
                        .sqrt()?;
                    direction.broadcast_div(&norm)?.broadcast_mul(&magnitude)?
                } else {
                    let norm = direction
                        .sqr()?
                        .sum_keepdim(2)?
                        .sum_keepdim(1)?
                        .sqrt()?;
                    direction.broadcast_div(&norm)?.broadcast_mul(&magnitude)?
                }
            }
            None => vb.get(shape, "weight")?,
        };
        let bias = vb.get(hidden, "bias")?;
        let conv_cfg = Conv1dConfig {
            padding: kernel / 2,
            groups,
            ..Default::default()
        };
        Ok(Self {
            conv: Conv1d::new(weight, Some(bias), conv_cfg),
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let frames = xs.dim(1)?;
        let h = self.conv.forward(&xs.transpose(1, 2)?.contiguous()?)?;
        // Even kernels produce one extra frame.
        h.narrow(2, 0, frames)?
            .gelu_erf()?
            .transpose(1, 2)?
            .contiguous()
    }
}

/// Loads `(direction, magnitude)` from either the legacy `weight_v`/`weight_g`
/// names or the newer `parametrizations.weight.original{0,1}` names.
fn weight_norm_parts(
    vb: &VarBuilder,
    shape: (usize, usize, usize),
    kernel: usize,
) -> candle_core::Result<Option<(Tensor, Tensor)>> {
    let candidates = [
        ("weight_v", "weight_g"),
        (
            "parametrizations.weight.original1",
            "parametrizations.weight.original0",
        ),
    ];
    for (v_name, g_name) in candidates {
        if !vb.contains_tensor(v_name) {
            continue;
        }
        let direction = vb.get(shape, v_name)?;
        let magnitude = vb
            .get((1, 1, kernel), g_name)
            .or_else(|_| vb.get((shape.0, 1, 1), g_name))?;
        return Ok(Some((direction, magnitude)));
    }
    Ok(None)
}

struct MultiHeadAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    heads: usize,
    head_dim: usize,
}

impl MultiHeadAttention {
    fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let hidden = cfg.hidden_size;
        Ok(Self {
            q_proj: candle_nn::linear(hidden, hidden, vb.pp("q_proj"))?,
            k_proj: candle_nn::linear(hidden, hidden, vb.pp("k_proj"))?,
            v_proj: candle_nn::linear(hidden, hidden, vb.pp("v_proj"))?,
            out_proj: candle_nn::linear(hidden, hidden, vb.pp("out_proj"))?,
            heads: cfg.num_attention_heads,
            head_dim: hidden / cfg.num_attention_heads,
        })
    }

    fn split_heads(&self, xs: Tensor, batch: usize, frames: usize) -> candle_core::Result<Tensor> {
        xs.reshape((batch, frames, self.heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (batch, frames, hidden) = xs.dims3()?;
        let scale = (self.head_dim as f64).powf(-0.5);
        let q = self.split_heads((self.q_proj.forward(xs)? * scale)?, batch, frames)?;
        let k = self.split_heads(self.k_proj.forward(xs)?, batch, frames)?;
        let v = self.split_heads(self.v_proj.forward(xs)?, batch, frames)?;

        let scores = q.matmul(&k.transpose(2, 3)?.contiguous()?)?;
        let weights = candle_nn::ops::softmax_last_dim(&scores)?;
        let context = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, frames, hidden))?;
        self.out_proj.forward(&context)
    }
}

struct TransformerLayer {
    attention: MultiHeadAttention,
    attention_norm: LayerNorm,
    intermediate: Linear,
    output: Linear,
    final_norm: LayerNorm,
    pre_norm: bool,
}

impl TransformerLayer {
    fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let hidden = cfg.hidden_size;
        let ff = vb.pp("feed_forward");
        Ok(Self {
            attention: MultiHeadAttention::load(cfg, vb.pp("attention"))?,
            attention_norm: candle_nn::layer_norm(hidden, cfg.layer_norm_eps, vb.pp("layer_norm"))?,
            intermediate: candle_nn::linear(
                hidden,
                cfg.intermediate_size,
                ff.pp("intermediate_dense"),
            )?,
            output: candle_nn::linear(cfg.intermediate_size, hidden, ff.pp("output_dense"))?,
            final_norm: candle_nn::layer_norm(
                hidden,
                cfg.layer_norm_eps,
                vb.pp("final_layer_norm"),
            )?,
            pre_norm: cfg.do_stable_layer_norm,
        })
    }

    fn feed_forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.output
            .forward(&self.intermediate.forward(xs)?.gelu_erf()?)
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        if self.pre_norm {
            let h = (xs + self.attention.forward(&self.attention_norm.forward(xs)?)?)?;
            let ff = self.feed_forward(&self.final_norm.forward(&h)?)?;
            h + ff
        } else {
            let h = self
                .attention_norm
                .forward(&(xs + self.attention.forward(xs)?)?)?;
            let ff = self.feed_forward(&h)?;
            self.final_norm.forward(&(h + ff)?)
        }
    }
}

struct TransformerEncoder {
    positional: PositionalConv,
    norm: LayerNorm,
    layers: Vec<TransformerLayer>,
    pre_norm: bool,
}

impl TransformerEncoder {
    fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let layers_vb = vb.pp("layers");
        let layers = (0..cfg.num_hidden_layers)
            .map(|i| TransformerLayer::load(cfg, layers_vb.pp(i)))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self {
            positional: PositionalConv::load(cfg, vb.pp("pos_conv_embed"))?,
            norm: candle_nn::layer_norm(cfg.hidden_size, cfg.layer_norm_eps, vb.pp("layer_norm"))?,
            layers,
            pre_norm: cfg.do_stable_layer_norm,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut h = (xs + self.positional.forward(xs)?)?;
        if !self.pre_norm {
            h = self.norm.forward(&h)?;
        }
        for layer in &self.layers {
            h = layer.forward(&h)?;
        }
        if self.pre_norm {
            h = self.norm.forward(&h)?;
        }
        Ok(h)
    }
}

pub(crate) struct Wav2Vec2Ctc {
    features: FeatureEncoder,
    encoder: TransformerEncoder,
    lm_head: Linear,
}

impl Wav2Vec2Ctc {
    pub(crate) fn load(cfg: &Wav2Vec2ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let backbone = vb.pp("wav2vec2");
        Ok(Self {
            features: FeatureEncoder::load(cfg, backbone.clone())?,
            encoder: TransformerEncoder::load(cfg, backbone.pp("encoder"))?,
            lm_head: candle_nn::linear(cfg.hidden_size, cfg.vocab_size, vb.pp("lm_head"))?,
        })
    }

    /// `(batch, samples)` to log-probabilities `(batch, frames, vocab)`.
    pub(crate) fn log_probs(&self, audio: &Tensor) -> candle_core::Result<Tensor> {
        let h = self.features.forward(audio)?;
        let h = self.encoder.forward(&h)?;
        let logits = self.lm_head.forward(&h)?;
        candle_nn::ops::log_softmax(&logits, D::Minus1)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use candle_core::{DType, Device};

    use super::*;

    fn tiny_config(stable: bool) -> Wav2Vec2ModelConfig {
        serde_json::from_value(serde_json::json!({
            "hidden_size": 8,
            "num_hidden_layers": 1,
            "num_attention_heads": 2,
            "intermediate_size": 16,
            "conv_dim": [4, 4],
            "conv_kernel": [4, 2],
            "conv_stride": [4, 2],
            "num_conv_pos_embeddings": 4,
            "num_conv_pos_embedding_groups": 2,
            "do_stable_layer_norm": stable,
            "feat_extract_norm": if stable { "layer" } else { "group" },
            "conv_bias": stable,
            "pad_token_id": 0,
            "vocab_size": 5
        }))
        .unwrap()
    }

    #[test]
    fn forward_emits_normalized_log_probs() {
        for stable in [false, true] {
            let cfg = tiny_config(stable);
            let device = Device::Cpu;
            let varmap = candle_nn::VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let model = Wav2Vec2Ctc::load(&cfg, vb).unwrap();

            let audio = Tensor::randn(0f32, 1.0, (1, 160), &device).unwrap();
            let lp = model.log_probs(&audio).unwrap();
            let (b, t, v) = lp.dims3().unwrap();
            assert_eq!((b, v), (1, 5));
            // 160 -> (160-4)/4+1 = 40 -> (40-2)/2+1 = 20
            assert_eq!(t, 20);

            let rows: Vec<Vec<f32>> = lp.squeeze(0).unwrap().to_vec2().unwrap();
            for row in rows {
                let mass: f32 = row.iter().map(|x| x.exp()).sum();
                assert!((mass - 1.0).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn positional_conv_accepts_weight_norm_parts() {
        let cfg = tiny_config(false);
        let device = Device::Cpu;
        let mut tensors = HashMap::new();
        tensors.insert(
            "conv.weight_v".to_string(),
            Tensor::ones((8, 4, 4), DType::F32, &device).unwrap(),
        );
        tensors.insert(
            "conv.weight_g".to_string(),
            Tensor::ones((1, 1, 4), DType::F32, &device).unwrap(),
        );
        tensors.insert(
            "conv.bias".to_string(),
            Tensor::zeros(8, DType::F32, &device).unwrap(),
        );
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let pos = PositionalConv::load(&cfg, vb).unwrap();
        let xs = Tensor::ones((1, 6, 8), DType::F32, &device).unwrap();
        let out = pos.forward(&xs).unwrap();
        assert_eq!(out.dims3().unwrap(), (1, 6, 8));
    }
}
