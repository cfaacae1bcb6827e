//! Batch and output structures shared by the model, loss and training crates.
//!
//! They live in the model crate so that the loss and data crates can depend on
//! them without depending on each other.

use burn::prelude::*;
use derive_new::new;

/// A batch of images with their per-pixel class labels.
#[derive(Debug, Clone, new)]
pub struct SegmentationBatch<B: Backend> {
    /// Images with shape `[batch, channels, height, width]`.
    pub images: Tensor<B, 4>,
    /// Class index per pixel with shape `[batch, height, width]`.
    pub labels: Tensor<B, 3, Int>,
}

impl<B: Backend> SegmentationBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.images.dims()[0]
    }
}

/// Ordered per-step predictions of a recurrent forward pass.
#[derive(Debug, Clone, new)]
pub struct RecurrentOutput<B: Backend> {
    /// One raw-logit map per step, oldest first.
    pub predictions: Vec<Tensor<B, 4>>,
}

impl<B: Backend> RecurrentOutput<B> {
    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    /// The most refined prediction.
    pub fn last(&self) -> Option<&Tensor<B, 4>> {
        self.predictions.last()
    }

    /// Consumes the output and returns the most refined prediction.
    pub fn into_last(mut self) -> Option<Tensor<B, 4>> {
        self.predictions.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn output_exposes_final_prediction() {
        let device = Default::default();
        let output = RecurrentOutput::<TestBackend>::new(vec![
            Tensor::zeros([1, 2, 4, 4], &device),
            Tensor::ones([1, 2, 4, 4], &device),
        ]);

        assert_eq!(output.len(), 2);
        assert!(!output.is_empty());
        let last = output.into_last().map(|t| t.sum().into_scalar());
        assert_eq!(last, Some(32.0));
    }

    #[test]
    fn batch_size_follows_images() {
        let device = Default::default();
        let batch = SegmentationBatch::<TestBackend>::new(
            Tensor::zeros([3, 3, 8, 8], &device),
            Tensor::zeros([3, 8, 8], &device),
        );

        assert_eq!(batch.batch_size(), 3);
    }
}
