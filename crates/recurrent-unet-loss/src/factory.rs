//! Loss registry: resolves a configured loss name into a [`SegmentationLoss`].

use burn::{
    config::Config,
    nn::loss::Reduction,
    tensor::{backend::Backend, Int, Tensor},
};
use serde::{Deserialize, Serialize};

use crate::{
    bootstrapped::{BootstrappedCrossEntropy2d, BootstrappedCrossEntropy2dConfig},
    cross_entropy::{CrossEntropy2d, CrossEntropy2dConfig, DEFAULT_IGNORE_INDEX},
    dice::{DiceLoss, DiceLossConfig},
    error::{LossError, LossResult},
    multi_step::{MultiStepCrossEntropy2d, StepWeighting, DEFAULT_SCALE_WEIGHT},
};

/// How per-pixel losses are reduced to a scalar.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossReduction {
    /// Average over non-ignored pixels.
    #[default]
    Mean,
    Sum,
}

impl From<LossReduction> for Reduction {
    fn from(reduction: LossReduction) -> Self {
        match reduction {
            LossReduction::Mean => Reduction::Mean,
            LossReduction::Sum => Reduction::Sum,
        }
    }
}

/// Loss section of an experiment configuration.
#[derive(Config, Debug)]
pub struct LossConfig {
    /// Registered loss name, see [`build_loss`].
    #[config(default = "\"multi_step_cross_entropy\".to_string()")]
    pub name: String,
    /// Decay between consecutive step weights.
    #[config(default = "DEFAULT_SCALE_WEIGHT")]
    pub scale_weight: f64,
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
    /// Per-class weights.
    pub weight: Option<Vec<f32>>,
    #[config(default = "DEFAULT_IGNORE_INDEX")]
    pub ignore_index: i64,
    /// Pixels kept per image by `bootstrapped_cross_entropy`.
    pub top_k: Option<usize>,
    /// Smoothing of the Dice loss.
    #[config(default = 1.0)]
    pub smooth: f64,
}

impl LossConfig {
    fn cross_entropy(&self) -> CrossEntropy2d {
        CrossEntropy2dConfig::new()
            .with_weight(self.weight.clone())
            .with_ignore_index(self.ignore_index)
            .init()
    }

    fn validate(&self) -> LossResult<()> {
        if self.scale_weight.is_nan() || self.scale_weight <= 0.0 {
            return Err(LossError::invalid(format!(
                "scale_weight must be positive, got {}",
                self.scale_weight
            )));
        }
        if let Some(weight) = &self.weight {
            if weight.iter().any(|w| w.is_nan() || *w < 0.0) {
                return Err(LossError::invalid(format!(
                    "class weights must be non-negative, got {weight:?}"
                )));
            }
        }
        if self.smooth.is_nan() || self.smooth <= 0.0 {
            return Err(LossError::invalid(format!(
                "smooth must be positive, got {}",
                self.smooth
            )));
        }
        Ok(())
    }
}

/// A loss over the ordered per-step predictions of a recurrent model.
#[derive(Clone, Debug)]
pub enum SegmentationLoss {
    /// Cross-entropy on the final prediction.
    CrossEntropy {
        loss: CrossEntropy2d,
        reduction: Reduction,
    },
    /// Geometrically weighted cross-entropy over every prediction.
    MultiStep {
        loss: MultiStepCrossEntropy2d,
        reduction: Reduction,
    },
    /// Hardest-pixel cross-entropy on the final prediction.
    Bootstrapped(BootstrappedCrossEntropy2d),
    /// Dice loss on the final prediction.
    Dice(DiceLoss),
}

impl SegmentationLoss {
    /// # Shapes
    ///
    /// - predictions: `N x [batch_size, channels, height, width]`, oldest first
    /// - labels: `[batch_size, height, width]`
    /// - output: `[1]`
    ///
    /// # Panics
    ///
    /// If `predictions` is empty.
    pub fn forward<B: Backend>(
        &self,
        predictions: &[Tensor<B, 4>],
        labels: Tensor<B, 3, Int>,
    ) -> Tensor<B, 1> {
        assert!(
            !predictions.is_empty(),
            "SegmentationLoss needs at least one prediction"
        );
        let last = predictions[predictions.len() - 1].clone();

        match self {
            Self::CrossEntropy { loss, reduction } => loss.forward(last, labels, reduction.clone()),
            Self::MultiStep { loss, reduction } => {
                loss.forward(predictions, labels, reduction.clone())
            }
            Self::Bootstrapped(loss) => loss.forward(last, labels),
            Self::Dice(loss) => loss.forward(last, labels),
        }
    }
}

/// Builds the loss registered under `config.name`.
///
/// | name | loss |
/// |---|---|
/// | `cross_entropy`, `my_cross_entropy` | cross-entropy on the final step |
/// | `multi_step_cross_entropy`, `my_multi_step_cross_entropy` | final step weighted most |
/// | `multi_scale_cross_entropy` | first step weighted most |
/// | `bootstrapped_cross_entropy` | top-k cross-entropy, needs `top_k` |
/// | any name containing `Dice` | Dice on the final step |
///
/// # Errors
///
/// - `LossError::NotImplemented` for unregistered names.
/// - `LossError::InvalidParameter` for out-of-range parameters.
pub fn build_loss(config: &LossConfig) -> LossResult<SegmentationLoss> {
    config.validate()?;
    let name = config.name.as_str();
    let reduction = Reduction::from(config.reduction);

    let loss = match name {
        _ if name.contains("Dice") => SegmentationLoss::Dice(
            DiceLossConfig::new()
                .with_smooth(config.smooth)
                .with_ignore_index(config.ignore_index)
                .init(),
        ),
        "cross_entropy" | "my_cross_entropy" => SegmentationLoss::CrossEntropy {
            loss: config.cross_entropy(),
            reduction,
        },
        "multi_step_cross_entropy" | "my_multi_step_cross_entropy" => SegmentationLoss::MultiStep {
            loss: MultiStepCrossEntropy2d::new(
                config.cross_entropy(),
                config.scale_weight,
                StepWeighting::FinalStep,
            ),
            reduction,
        },
        "multi_scale_cross_entropy" => SegmentationLoss::MultiStep {
            loss: MultiStepCrossEntropy2d::new(
                config.cross_entropy(),
                config.scale_weight,
                StepWeighting::FirstStep,
            ),
            reduction,
        },
        "bootstrapped_cross_entropy" => {
            let top_k = match config.top_k {
                Some(k) if k > 0 => k,
                other => {
                    return Err(LossError::invalid(format!(
                        "bootstrapped_cross_entropy needs a positive top_k, got {other:?}"
                    )))
                }
            };
            SegmentationLoss::Bootstrapped(
                BootstrappedCrossEntropy2dConfig::new(top_k)
                    .with_weight(config.weight.clone())
                    .with_ignore_index(config.ignore_index)
                    .init(),
            )
        }
        _ => {
            return Err(LossError::NotImplemented {
                name: name.to_string(),
            })
        }
    };

    tracing::info!(loss = name, scale_weight = config.scale_weight, "using loss");
    Ok(loss)
}
