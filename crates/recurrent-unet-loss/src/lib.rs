//! Segmentation losses for recurrent models.
//!
//! Every loss consumes the ordered list of per-step predictions produced by a
//! recurrent model together with a `[batch, height, width]` label map.
//!
//! ## Per-prediction losses
//! - **[`CrossEntropy2d`]**: softmax (or sigmoid for one channel) cross-entropy
//!   with class weights and an ignored label
//! - **[`BootstrappedCrossEntropy2d`]**: mean of the hardest pixels per image
//! - **[`DiceLoss`]**: soft Dice over all classes
//!
//! ## Sequence losses
//! - **[`MultiStepCrossEntropy2d`]**: geometrically weighted sum over steps
//! - **[`SegmentationLoss`]**: the closed set built by [`build_loss`] from a
//!   [`LossConfig`]
//!
//! Individual losses follow Burn's `forward` / `forward_no_reduction`
//! convention where a per-pixel result makes sense.

mod bootstrapped;
mod cross_entropy;
mod dice;
mod error;
mod factory;
mod multi_step;

pub use bootstrapped::{BootstrappedCrossEntropy2d, BootstrappedCrossEntropy2dConfig};
pub use cross_entropy::{
    resize_logits, CrossEntropy2d, CrossEntropy2dConfig, DEFAULT_IGNORE_INDEX,
};
pub use dice::{DiceLoss, DiceLossConfig};
pub use error::{LossError, LossResult};
pub use factory::{build_loss, LossConfig, LossReduction, SegmentationLoss};
pub use multi_step::{step_weights, MultiStepCrossEntropy2d, StepWeighting, DEFAULT_SCALE_WEIGHT};

#[cfg(test)]
mod tests {
    use burn::backend::{Autodiff, NdArray};

    pub type TestBackend = NdArray<f32>;

    pub type TestAutodiffBackend = Autodiff<TestBackend>;
}
