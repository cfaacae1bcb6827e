//! Core configuration record for recurrent U-Net models.
//!
//! `ModelConfig` is immutable once a model has been built from it. All width
//! arithmetic (feature-scale division, level slicing) lives here so that the
//! module constructors only ever receive concrete channel lists.

use burn::prelude::*;

use super::enums::{GateBlock, GateCount, HiddenInit, InterpolationStrategy, OutputMode};
use crate::error::{ModelError, ModelResult};

/// Base widths of the plain U-Net before division by `feature_scale`.
pub const UNET_BASE_FILTERS: [usize; 5] = [64, 128, 256, 512, 1024];

/// Base widths of the recurrent cell before division by `feature_scale`.
pub const CELL_BASE_FILTERS: [usize; 5] = [32, 64, 128, 256, 512];

/// Maximum number of encoder levels.
pub const MAX_LEVEL: usize = 4;

/// Hyperparameters shared by every recurrent U-Net variant.
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// Architecture name resolved by [`build_model`](crate::build_model).
    #[config(default = "\"dru\".to_string()")]
    pub arch: String,
    /// Divisor applied to every base width.
    #[config(default = 4)]
    pub feature_scale: usize,
    /// Number of encoder levels (pooling steps) of the outer U-Net.
    #[config(default = 4)]
    pub unet_level: usize,
    /// Number of levels of a multi-resolution GRU gate.
    /// Values `<= 1` derive it as `5 - unet_level`.
    #[config(default = 0)]
    pub recurrent_level: usize,
    /// Number of refinement steps.
    #[config(default = 3)]
    pub steps: usize,
    /// Gate formulation of the ConvGRU.
    #[config(default = "GateCount::Three")]
    pub gate: GateCount,
    /// Channel width of the ConvGRU hidden state.
    #[config(default = 32)]
    pub hidden_size: usize,
    /// Fill policy for synthesized hidden states and feedback channels.
    #[config(default = "HiddenInit::Zeros")]
    pub initial: HiddenInit,
    /// Block used for single-scale GRU gates.
    #[config(default = "GateBlock::DoubleConv")]
    pub structure: GateBlock,
    /// Channel layout of the predictions.
    #[config(default = "OutputMode::MultiClass")]
    pub output_mode: OutputMode,
    /// Channels of the raw image.
    #[config(default = 3)]
    pub input_channels: usize,
    #[config(default = true)]
    pub is_batchnorm: bool,
    /// Transposed convolutions for upsampling instead of a 2x resize.
    #[config(default = true)]
    pub is_deconv: bool,
    /// Resize mode of the non-deconv upsamplers.
    #[config(default = "InterpolationStrategy::Nearest")]
    pub interpolation: InterpolationStrategy,
}

impl ModelConfig {
    /// Checks every structural invariant for a model predicting `n_classes`.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidConfiguration` describing the first
    /// violated rule.
    pub fn validate(&self, n_classes: usize) -> ModelResult<()> {
        if self.unet_level == 0 || self.unet_level > MAX_LEVEL {
            return Err(ModelError::invalid(format!(
                "unet_level must be in 1..={MAX_LEVEL}, got {}",
                self.unet_level
            )));
        }
        if self.steps == 0 {
            return Err(ModelError::invalid("steps must be at least 1"));
        }
        if self.feature_scale == 0 || CELL_BASE_FILTERS[0] / self.feature_scale == 0 {
            return Err(ModelError::invalid(format!(
                "feature_scale {} leaves no channels at the first level",
                self.feature_scale
            )));
        }
        if self.hidden_size == 0 {
            return Err(ModelError::invalid("hidden_size must be at least 1"));
        }
        if self.input_channels == 0 {
            return Err(ModelError::invalid("input_channels must be at least 1"));
        }
        match self.output_mode {
            OutputMode::Binary if n_classes != 2 => {
                return Err(ModelError::invalid(format!(
                    "Binary output needs exactly 2 classes, got n_classes = {n_classes}"
                )));
            }
            OutputMode::MultiClass if n_classes == 0 => {
                return Err(ModelError::invalid("MultiClass output needs at least one class"));
            }
            _ => {}
        }

        let unet_filters = self.cell_unet_filters();
        if self.unet_level > unet_filters.len() {
            return Err(ModelError::invalid(format!(
                "unet_level {} exceeds the {} available U-Net widths",
                self.unet_level,
                unet_filters.len()
            )));
        }
        let recurrent_filters = self.recurrent_filters();
        if self.gru_level() > recurrent_filters.len() {
            return Err(ModelError::invalid(format!(
                "gru_level {} exceeds the {} available recurrent widths",
                self.gru_level(),
                recurrent_filters.len()
            )));
        }
        Ok(())
    }

    /// Number of prediction channels for `n_classes` classes.
    pub fn prediction_channels(&self, n_classes: usize) -> usize {
        self.output_mode.channels(n_classes)
    }

    /// Level count of a multi-resolution GRU gate.
    pub const fn gru_level(&self) -> usize {
        if self.recurrent_level > 1 {
            self.recurrent_level
        } else {
            (MAX_LEVEL + 1).saturating_sub(self.unet_level)
        }
    }

    /// Plain U-Net widths `[f_0, .., f_level]`.
    pub fn unet_filters(&self) -> Vec<usize> {
        scale(&UNET_BASE_FILTERS[..=self.unet_level.min(MAX_LEVEL)], self.feature_scale)
    }

    /// Widths of the recurrent cell's outer U-Net, `[f_0, .., f_level]`.
    pub fn cell_unet_filters(&self) -> Vec<usize> {
        scale(&CELL_BASE_FILTERS[..=self.unet_level.min(MAX_LEVEL)], self.feature_scale)
    }

    /// Widths left for the GRU gates, `[f_level, .., f_4]`.
    pub fn recurrent_filters(&self) -> Vec<usize> {
        scale(&CELL_BASE_FILTERS[self.unet_level.min(MAX_LEVEL)..], self.feature_scale)
    }
}

fn scale(filters: &[usize], feature_scale: usize) -> Vec<usize> {
    filters
        .iter()
        .map(|f| f / feature_scale.max(1))
        .collect()
}
