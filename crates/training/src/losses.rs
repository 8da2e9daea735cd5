//! Segmentation loss and the ensemble alignment penalty.

use burn::tensor::{backend::Backend, Tensor};

const EPS: f32 = 1e-6;

/// Loss between a probability map and its ground-truth mask.
pub trait Criterion {
    /// Column label used in logs, e.g. `BCELoss`.
    fn name(&self) -> &'static str;

    fn forward<B: Backend>(&self, pred: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1>;
}

/// Binary cross-entropy on probabilities, clamped away from 0 and 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct BceLoss;

impl Criterion for BceLoss {
    fn name(&self) -> &'static str {
        "BCELoss"
    }

    fn forward<B: Backend>(&self, pred: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1> {
        let pred = pred.clamp(EPS, 1.0 - EPS);
        let pred_inv = pred.clone().neg().add_scalar(1.0);
        let target_inv = target.clone().neg().add_scalar(1.0);
        (target * pred.log() + target_inv * pred_inv.log())
            .mean()
            .neg()
    }
}

/// Element-wise mean of the member outputs.
pub fn ensemble_mean<B: Backend>(outputs: &[Tensor<B, 4>]) -> Option<Tensor<B, 4>> {
    let count = outputs.len();
    let sum = outputs.iter().cloned().reduce(|acc, out| acc + out)?;
    Some(sum.div_scalar(count as f32))
}

/// Mean squared deviation of every member output from the ensemble mean.
///
/// Zero for a single member.
pub fn align_mse<B: Backend>(outputs: &[Tensor<B, 4>], device: &B::Device) -> Tensor<B, 1> {
    if outputs.len() < 2 {
        return Tensor::zeros([1], device);
    }
    let Some(center) = ensemble_mean(outputs) else {
        return Tensor::zeros([1], device);
    };
    let count = outputs.len();
    outputs
        .iter()
        .map(|out| {
            let diff = out.clone() - center.clone();
            (diff.clone() * diff).mean()
        })
        .reduce(|acc, dev| acc + dev)
        .map(|total| total.div_scalar(count as f32))
        .unwrap_or_else(|| Tensor::zeros([1], device))
}
