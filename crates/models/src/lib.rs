//! Burn segmentation networks for the stacked-ensemble training harness.
//!
//! This crate defines the members an ensemble is built from:
//! - `SegmentationModel`: the seam the harness trains against. Any burn module that
//!   maps an image batch `[N, C, H, W]` to per-pixel foreground probabilities
//!   `[N, 1, H, W]` can join an ensemble.
//! - `SegNet`: a small fully-convolutional network (3x3 conv stack + 1x1 head).
//!
//! The models know nothing about ensembles, losses or checkpoints; the `stack_training`
//! crate owns all of that.

use burn::module::Module;
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::tensor::activation::{relu, sigmoid};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// A network producing a foreground probability map for every input image.
pub trait SegmentationModel<B: Backend>: Module<B> {
    /// `images`: `[N, C, H, W]`, returns probabilities in `[0, 1]` with shape `[N, 1, H, W]`.
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4>;
}

#[derive(Debug, Clone)]
pub struct SegNetConfig {
    pub in_channels: usize,
    pub hidden: usize,
    /// Number of hidden 3x3 blocks after the stem.
    pub depth: usize,
    pub dropout: f64,
}

impl Default for SegNetConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            hidden: 16,
            depth: 1,
            dropout: 0.1,
        }
    }
}

impl SegNetConfig {
    pub fn with_hidden(mut self, hidden: usize) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }
}

#[derive(Debug, Module)]
pub struct SegNet<B: Backend> {
    stem: Conv2d<B>,
    blocks: Vec<Conv2d<B>>,
    dropout: nn::Dropout,
    head: Conv2d<B>,
}

impl<B: Backend> SegNet<B> {
    pub fn new(cfg: SegNetConfig, device: &B::Device) -> Self {
        let hidden = cfg.hidden.max(1);
        let stem = conv3x3(cfg.in_channels.max(1), hidden, device);
        let blocks = (0..cfg.depth).map(|_| conv3x3(hidden, hidden, device)).collect();
        let dropout = nn::DropoutConfig::new(cfg.dropout).init();
        let head = Conv2dConfig::new([hidden, 1], [1, 1]).init(device);
        Self {
            stem,
            blocks,
            dropout,
            head,
        }
    }
}

impl<B: Backend> SegmentationModel<B> for SegNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = relu(self.stem.forward(images));
        for block in &self.blocks {
            x = relu(block.forward(x));
        }
        // Dropout is a no-op on non-autodiff backends, i.e. after `valid()`.
        let x = self.dropout.forward(x);
        sigmoid(self.head.forward(x))
    }
}

fn conv3x3<B: Backend>(input: usize, output: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([input, output], [3, 3])
        .with_padding(nn::PaddingConfig2d::Same)
        .init(device)
}

pub mod prelude {
    pub use super::{SegNet, SegNetConfig, SegmentationModel};
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn forward_keeps_spatial_dims_and_emits_one_channel() {
        let device = Default::default();
        let model = SegNet::<B>::new(SegNetConfig::default().with_hidden(4), &device);
        let input = Tensor::<B, 4>::zeros([2, 3, 5, 7], &device);
        let out = model.forward(input);
        assert_eq!(out.dims(), [2, 1, 5, 7]);
    }

    #[test]
    fn outputs_are_probabilities() {
        let device = Default::default();
        let model = SegNet::<B>::new(SegNetConfig::default(), &device);
        let input = Tensor::<B, 4>::ones([1, 3, 4, 4], &device);
        let values = model
            .forward(input)
            .into_data()
            .to_vec::<f32>()
            .unwrap_or_default();
        assert_eq!(values.len(), 16);
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }
}
