//! Weighted cross-entropy over a sequence of per-step predictions.
//!
//! ```text
//! loss = sum_i w_i * CE(pred_i, labels)
//! multi-step:  w_i = scale_weight^(N - 1 - i)   (the final step weighs 1)
//! multi-scale: w_i = scale_weight^i             (the first step weighs 1)
//! ```

use burn::{
    config::Config,
    nn::loss::Reduction,
    tensor::{backend::Backend, Int, Tensor},
};

use crate::cross_entropy::CrossEntropy2d;

/// Default decay between consecutive step weights.
pub const DEFAULT_SCALE_WEIGHT: f64 = 0.4;

/// Which end of the prediction sequence receives the full weight.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum StepWeighting {
    /// Later steps weigh more; the final prediction has weight 1.
    FinalStep,
    /// Earlier predictions weigh more; the first has weight 1.
    FirstStep,
}

/// Weights of `num_steps` predictions.
pub fn step_weights(num_steps: usize, scale_weight: f64, weighting: StepWeighting) -> Vec<f64> {
    (0..num_steps)
        .map(|i| {
            let exponent = match weighting {
                StepWeighting::FinalStep => num_steps - 1 - i,
                StepWeighting::FirstStep => i,
            };
            scale_weight.powi(exponent as i32)
        })
        .collect()
}

/// Sum of per-step cross-entropies with geometric step weights.
#[derive(Clone, Debug)]
pub struct MultiStepCrossEntropy2d {
    pub cross_entropy: CrossEntropy2d,
    pub scale_weight: f64,
    pub weighting: StepWeighting,
}

impl MultiStepCrossEntropy2d {
    pub fn new(cross_entropy: CrossEntropy2d, scale_weight: f64, weighting: StepWeighting) -> Self {
        Self {
            cross_entropy,
            scale_weight,
            weighting,
        }
    }

    /// # Shapes
    ///
    /// - predictions: `N x [batch_size, num_classes, height, width]`
    /// - labels: `[batch_size, height, width]`
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        predictions: &[Tensor<B, 4>],
        labels: Tensor<B, 3, Int>,
        reduction: Reduction,
    ) -> Tensor<B, 1> {
        assert!(
            !predictions.is_empty(),
            "MultiStepCrossEntropy2d needs at least one prediction"
        );

        step_weights(predictions.len(), self.scale_weight, self.weighting)
            .into_iter()
            .zip(predictions)
            .map(|(weight, prediction)| {
                self.cross_entropy
                    .forward(prediction.clone(), labels.clone(), reduction.clone())
                    * weight
            })
            .reduce(|total, step| total + step)
            .unwrap_or_else(|| Tensor::zeros([1], &labels.device()))
    }
}
