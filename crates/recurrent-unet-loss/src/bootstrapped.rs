//! Bootstrapped cross-entropy: only the hardest pixels of every image count.
//!
//! ```text
//! loss_i = mean(top_k(ce_i))     per image i
//! loss   = mean_i(loss_i)
//! ```

use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Int, Tensor},
};

use crate::cross_entropy::{CrossEntropy2d, CrossEntropy2dConfig, DEFAULT_IGNORE_INDEX};

/// Configuration for creating a [bootstrapped cross-entropy](BootstrappedCrossEntropy2d).
#[derive(Config, Debug)]
pub struct BootstrappedCrossEntropy2dConfig {
    /// Number of hardest pixels kept per image.
    pub top_k: usize,
    pub weight: Option<Vec<f32>>,
    #[config(default = "DEFAULT_IGNORE_INDEX")]
    pub ignore_index: i64,
}

impl BootstrappedCrossEntropy2dConfig {
    /// Initialize [bootstrapped cross-entropy](BootstrappedCrossEntropy2d).
    pub fn init(&self) -> BootstrappedCrossEntropy2d {
        assert!(
            self.top_k > 0,
            "top_k for BootstrappedCrossEntropy2d must be positive, got {}",
            self.top_k
        );
        BootstrappedCrossEntropy2d {
            cross_entropy: CrossEntropy2dConfig::new()
                .with_weight(self.weight.clone())
                .with_ignore_index(self.ignore_index)
                .init(),
            top_k: self.top_k,
        }
    }
}

/// Mean of the `top_k` largest per-pixel cross-entropies of each image.
#[derive(Module, Clone, Debug)]
pub struct BootstrappedCrossEntropy2d {
    pub cross_entropy: CrossEntropy2d,
    pub top_k: usize,
}

impl BootstrappedCrossEntropy2d {
    /// # Shapes
    ///
    /// - logits: `[batch_size, num_classes, height, width]`
    /// - labels: `[batch_size, height, width]`
    /// - output: `[1]`
    ///
    /// Ignored pixels enter the ranking with zero loss. `top_k` is clamped to
    /// the pixel count of an image.
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 4>,
        labels: Tensor<B, 3, Int>,
    ) -> Tensor<B, 1> {
        let [batch_size, height, width] = labels.dims();
        let (per_pixel, _) = self.cross_entropy.forward_no_reduction(logits, labels);
        let k = self.top_k.min(height * width);

        per_pixel
            .reshape([batch_size, height * width])
            .topk(k, 1)
            .mean()
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{TensorData, Tolerance};

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn keeps_only_the_hardest_pixels() {
        let device = Default::default();
        let loss = BootstrappedCrossEntropy2dConfig::new(2).init();
        // Margins 0, 2, -2, 4 for the true class give losses
        // ln 2, 0.1269, 2.1269, 0.0181.
        let logits = Tensor::<TestBackend, 4>::from_data(
            TensorData::from([[[[0.0, 2.0, -2.0, 4.0]], [[0.0, 0.0, 0.0, 0.0]]]]),
            &device,
        );
        let labels =
            Tensor::<TestBackend, 3, Int>::from_data(TensorData::from([[[0, 0, 0, 0]]]), &device);

        let result = loss.forward(logits, labels);

        result
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([1.410_037_6f32]), Tolerance::default());
    }

    #[test]
    fn top_k_larger_than_image_averages_all_pixels() {
        let device = Default::default();
        let loss = BootstrappedCrossEntropy2dConfig::new(100).init();
        let logits = Tensor::<TestBackend, 4>::zeros([2, 3, 2, 2], &device);
        let labels = Tensor::<TestBackend, 3, Int>::zeros([2, 2, 2], &device);

        let result = loss.forward(logits, labels);

        let expected = TensorData::from([3.0f32.ln()]);
        result
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    #[should_panic = "top_k for BootstrappedCrossEntropy2d must be positive"]
    fn zero_top_k_panics() {
        let _loss = BootstrappedCrossEntropy2dConfig::new(0).init();
    }
}
