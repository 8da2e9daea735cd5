//! Accuracy metrics and small numeric helpers.

use burn::tensor::{backend::Backend, ElementConversion, Tensor};

/// Score between a probability map and its ground-truth mask.
pub trait Evaluator {
    /// Column label used in logs, e.g. `OAAcc`.
    fn name(&self) -> &'static str;

    fn forward<B: Backend>(&self, pred: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1>;
}

/// Overall pixel accuracy of the thresholded prediction.
#[derive(Debug, Clone, Copy)]
pub struct OverallAccuracy {
    pub threshold: f32,
}

impl Default for OverallAccuracy {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

impl Evaluator for OverallAccuracy {
    fn name(&self) -> &'static str {
        "OAAcc"
    }

    fn forward<B: Backend>(&self, pred: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1> {
        let pred = pred.greater_elem(self.threshold);
        let target = target.greater_elem(self.threshold);
        pred.equal(target).float().mean()
    }
}

pub fn scalar<B: Backend>(value: Tensor<B, 1>) -> f64 {
    value.into_scalar().elem::<f64>()
}

pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
