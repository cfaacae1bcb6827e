//! Soft Dice loss over all classes of a batch.
//!
//! ```text
//! dice_c = (2 * sum(p_c * t_c) + smooth) / (sum(p_c) + sum(t_c) + smooth)
//! loss   = 1 - mean_c(dice_c)
//! ```
//!
//! `p` is the softmax of the logits, or the sigmoid of a single foreground
//! channel, and `t` the one-hot labels. Ignored pixels are masked from both.

use burn::{
    config::Config,
    module::Module,
    tensor::{
        activation::{sigmoid, softmax},
        backend::Backend,
        Int, Tensor,
    },
};

use crate::cross_entropy::{resize_logits, DEFAULT_IGNORE_INDEX};

/// Configuration for creating a [Dice loss](DiceLoss).
#[derive(Config, Debug)]
pub struct DiceLossConfig {
    /// Additive smoothing of numerator and denominator. Default: 1.0
    #[config(default = 1.0)]
    pub smooth: f64,
    #[config(default = "DEFAULT_IGNORE_INDEX")]
    pub ignore_index: i64,
}

impl DiceLossConfig {
    /// Initialize [Dice loss](DiceLoss).
    pub fn init(&self) -> DiceLoss {
        assert!(
            self.smooth > 0.0,
            "Smoothing for DiceLoss must be positive, got {}",
            self.smooth
        );
        DiceLoss {
            smooth: self.smooth,
            ignore_index: self.ignore_index,
        }
    }
}

#[derive(Module, Clone, Debug)]
pub struct DiceLoss {
    pub smooth: f64,
    pub ignore_index: i64,
}

impl Default for DiceLoss {
    fn default() -> Self {
        DiceLossConfig::new().init()
    }
}

impl DiceLoss {
    /// # Shapes
    ///
    /// - logits: `[batch_size, num_classes, height, width]`
    /// - labels: `[batch_size, height', width']`
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 4>,
        labels: Tensor<B, 3, Int>,
    ) -> Tensor<B, 1> {
        let [batch_size, height, width] = labels.dims();
        let logits = resize_logits(logits, [height, width]);
        let num_classes = logits.dims()[1];

        let ignored = labels.clone().equal_elem(self.ignore_index);
        let valid = ignored
            .clone()
            .bool_not()
            .float()
            .reshape([batch_size, 1, height, width]);
        let labels = labels
            .mask_fill(ignored, 0)
            .reshape([batch_size, 1, height, width]);

        let (probs, targets) = if num_classes == 1 {
            (sigmoid(logits), labels.float())
        } else {
            let classes = Tensor::<B, 1, Int>::arange(0..num_classes as i64, &labels.device())
                .reshape([1, num_classes, 1, 1]);
            (
                softmax(logits, 1),
                labels
                    .expand([batch_size, num_classes, height, width])
                    .equal(classes.expand([batch_size, num_classes, height, width]))
                    .float(),
            )
        };
        let probs = probs * valid.clone();
        let targets = targets * valid;

        // Sum over batch and space, one value per class.
        let per_class = |x: Tensor<B, 4>| {
            x.swap_dims(0, 1)
                .reshape([num_classes as i32, -1])
                .sum_dim(1)
        };
        let intersection = per_class(probs.clone() * targets.clone());
        let denominator = per_class(probs) + per_class(targets);
        let dice = (intersection * 2.0 + self.smooth) / (denominator + self.smooth);

        dice.mean().neg() + 1.0
    }
}
