//! Architecture registry.

use core::fmt;

use burn::prelude::*;

use super::recurrent::{
    plain_unet, GruOnlyBaseline, HiddenStateFeedback, InputStackFeedback, RecurrentUNet,
    RecurrentVariant,
};
use crate::config::{GateBlock, ModelConfig};
use crate::error::{ModelError, ModelResult};

/// Hidden width forced by `unet_only_hidden`.
const ONLY_HIDDEN_SIZE: usize = 128;
/// Feature scale forced by `unet_only_hidden` and `unet_gru_r`.
const FIXED_FEATURE_SCALE: usize = 4;

/// The architectures [`build_model`] knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelArch {
    /// `unet`: a single U-Net pass.
    Unet,
    /// `dru`: predictions stacked onto the image.
    Dru,
    /// `dru_hidden`: ConvGRU at the encoder bottleneck.
    DruHidden,
    /// `unet_only_hidden`: `dru_hidden` with fixed widths and single-conv gates.
    UnetOnlyHidden,
    /// `unet_gru`: U-Net followed by a ConvGRU.
    UnetGru,
    /// `unet_gru_r`: `unet_gru` with the feature scale fixed to 4.
    UnetGruR,
}

impl ModelArch {
    pub const ALL: [Self; 6] = [
        Self::Unet,
        Self::Dru,
        Self::DruHidden,
        Self::UnetOnlyHidden,
        Self::UnetGru,
        Self::UnetGruR,
    ];

    /// Resolves a registered architecture name.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::UnknownArchitecture` for unregistered names.
    pub fn from_name(name: &str) -> ModelResult<Self> {
        Self::ALL
            .into_iter()
            .find(|arch| arch.name() == name)
            .ok_or_else(|| ModelError::UnknownArchitecture {
                arch: name.to_string(),
            })
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Unet => "unet",
            Self::Dru => "dru",
            Self::DruHidden => "dru_hidden",
            Self::UnetOnlyHidden => "unet_only_hidden",
            Self::UnetGru => "unet_gru",
            Self::UnetGruR => "unet_gru_r",
        }
    }

    /// Applies the fixed hyperparameters of this architecture.
    pub fn resolve(&self, config: &ModelConfig) -> ModelConfig {
        let config = config.clone().with_arch(self.name().to_string());
        match self {
            Self::UnetOnlyHidden => config
                .with_hidden_size(ONLY_HIDDEN_SIZE)
                .with_structure(GateBlock::SingleConv)
                .with_feature_scale(FIXED_FEATURE_SCALE)
                .with_unet_level(4),
            Self::UnetGru => config.with_unet_level(4),
            Self::UnetGruR => config
                .with_feature_scale(FIXED_FEATURE_SCALE)
                .with_unet_level(4),
            Self::Unet | Self::Dru | Self::DruHidden => config,
        }
    }
}

impl fmt::Display for ModelArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Builds the model registered as `arch`.
///
/// The configuration is resolved and validated before any module is
/// allocated.
///
/// # Errors
///
/// - `ModelError::UnknownArchitecture` if `arch` is not registered.
/// - `ModelError::InvalidConfiguration` if the resolved configuration violates
///   an invariant.
pub fn build_model<B: Backend>(
    arch: &str,
    n_classes: usize,
    config: &ModelConfig,
    device: &B::Device,
) -> ModelResult<RecurrentUNet<B>> {
    let arch = ModelArch::from_name(arch)?;
    let config = arch.resolve(config);
    config.validate(n_classes)?;

    tracing::info!(
        %arch,
        n_classes,
        steps = config.steps,
        unet_level = config.unet_level,
        gru_level = config.gru_level(),
        hidden_size = config.hidden_size,
        "building model"
    );

    let variant = match arch {
        ModelArch::Unet => RecurrentVariant::PlainUNet(plain_unet(&config, n_classes, device)),
        ModelArch::Dru => RecurrentVariant::InputStackFeedback(InputStackFeedback::new(
            &config, n_classes, device,
        )),
        ModelArch::DruHidden | ModelArch::UnetOnlyHidden => RecurrentVariant::HiddenStateFeedback(
            HiddenStateFeedback::new(&config, n_classes, device),
        ),
        ModelArch::UnetGru | ModelArch::UnetGruR => {
            RecurrentVariant::GruOnlyBaseline(GruOnlyBaseline::new(&config, n_classes, device))
        }
    };

    Ok(RecurrentUNet::new(variant, config.steps))
}
