//! Per-pixel cross-entropy for dense predictions.
//!
//! Multi-channel logits use softmax cross-entropy. A single-channel prediction
//! is a foreground logit and uses sigmoid binary cross-entropy instead.
//!
//! ```text
//! loss(p) = -w[y_p] * log softmax(x_p)[y_p]        pixels with y_p != ignore_index
//! mean    = sum_p loss(p) / sum_p w[y_p]
//! ```

use burn::{
    config::Config,
    module::Module,
    nn::loss::Reduction,
    tensor::{
        activation::{log_sigmoid, log_softmax},
        backend::Backend,
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
        Int, Tensor, TensorData,
    },
};

/// Label value excluded from the loss.
pub const DEFAULT_IGNORE_INDEX: i64 = 250;

/// Configuration for creating a [2d cross-entropy loss](CrossEntropy2d).
#[derive(Config, Debug)]
pub struct CrossEntropy2dConfig {
    /// Per-class weights. Every pixel weighs 1 when absent.
    pub weight: Option<Vec<f32>>,
    /// Label value excluded from the loss. Default: 250
    #[config(default = "DEFAULT_IGNORE_INDEX")]
    pub ignore_index: i64,
}

impl CrossEntropy2dConfig {
    /// Initialize [2d cross-entropy loss](CrossEntropy2d).
    pub fn init(&self) -> CrossEntropy2d {
        self.assertions();
        CrossEntropy2d {
            weight: self.weight.clone(),
            ignore_index: self.ignore_index,
        }
    }

    fn assertions(&self) {
        if let Some(weight) = &self.weight {
            assert!(
                weight.iter().all(|w| *w >= 0.0),
                "Class weights for CrossEntropy2d must be non-negative, got {weight:?}"
            );
        }
    }
}

/// Per-pixel cross-entropy with class weights and an ignored label.
#[derive(Module, Clone, Debug)]
pub struct CrossEntropy2d {
    /// Per-class weights.
    pub weight: Option<Vec<f32>>,
    /// Label value excluded from the loss.
    pub ignore_index: i64,
}

impl Default for CrossEntropy2d {
    fn default() -> Self {
        Self::new()
    }
}

impl CrossEntropy2d {
    /// Create a new loss with default configuration.
    pub fn new() -> Self {
        CrossEntropy2dConfig::new().init()
    }

    /// Compute the criterion with reduction.
    ///
    /// `Mean` divides by the total weight of the non-ignored pixels, so an
    /// all-ignored batch yields zero.
    ///
    /// # Shapes
    ///
    /// - logits: `[batch_size, num_classes, height, width]`
    /// - labels: `[batch_size, height', width']`
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 4>,
        labels: Tensor<B, 3, Int>,
        reduction: Reduction,
    ) -> Tensor<B, 1> {
        let (loss, weight) = self.forward_no_reduction(logits, labels);
        let total = loss.sum();
        match reduction {
            Reduction::Mean | Reduction::Auto => total / weight.sum().clamp_min(f32::EPSILON),
            Reduction::Sum => total,
        }
    }

    /// Compute the weighted per-pixel loss and the weight of every pixel.
    ///
    /// Ignored pixels carry zero loss and zero weight. Logits are resized to
    /// the label size first when the two disagree.
    ///
    /// # Shapes
    ///
    /// - logits: `[batch_size, num_classes, height, width]`
    /// - labels: `[batch_size, height', width']`
    /// - output: `([batch_size, height', width'], [batch_size, height', width'])`
    pub fn forward_no_reduction<B: Backend>(
        &self,
        logits: Tensor<B, 4>,
        labels: Tensor<B, 3, Int>,
    ) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let [batch_size, height, width] = labels.dims();
        let logits = resize_logits(logits, [height, width]);
        let [logit_batch, num_classes, _, _] = logits.dims();
        assert_eq!(
            logit_batch, batch_size,
            "Batch size of logits ({logit_batch}) must match labels ({batch_size})"
        );

        let ignored = labels.clone().equal_elem(self.ignore_index);
        let valid = ignored.clone().bool_not().float();
        let safe_labels = labels.mask_fill(ignored, 0);

        let nll = if num_classes == 1 {
            let logits = logits.reshape([batch_size, height, width]);
            let targets = safe_labels.clone().float();
            let positive = log_sigmoid(logits.clone()) * targets.clone();
            let negative = log_sigmoid(logits.neg()) * (targets.neg() + 1.0);
            (positive + negative).neg()
        } else {
            log_softmax(logits, 1)
                .gather(1, safe_labels.clone().reshape([batch_size, 1, height, width]))
                .reshape([batch_size, height, width])
                .neg()
        };

        let weight = match &self.weight {
            Some(class_weight) => {
                let classes = num_classes.max(2);
                assert!(
                    class_weight.len() >= classes,
                    "Expected at least {classes} class weights, got {}",
                    class_weight.len()
                );
                let device = nll.device();
                let class_weight = Tensor::<B, 1>::from_data(
                    TensorData::new(class_weight.clone(), [class_weight.len()]),
                    &device,
                );
                class_weight
                    .select(0, safe_labels.reshape([batch_size * height * width]))
                    .reshape([batch_size, height, width])
                    * valid
            }
            None => valid,
        };

        (nll * weight.clone(), weight)
    }
}

/// Nearest-neighbour resize of logits to the label size, a no-op when they
/// agree.
///
/// Nearest is the only interpolation mode Burn can differentiate.
pub fn resize_logits<B: Backend>(logits: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let [_, _, height, width] = logits.dims();
    if [height, width] == size {
        return logits;
    }
    interpolate(logits, size, InterpolateOptions::new(InterpolateMode::Nearest))
}
