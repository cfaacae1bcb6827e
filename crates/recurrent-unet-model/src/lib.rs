//! # Recurrent U-Net
//!
//! Recurrent encoder-decoder networks for semantic segmentation, built with
//! the Burn deep learning framework. Every model produces an ordered sequence
//! of predictions, one per refinement step.
//!
//! ## Modules
//!
//! - `config`: `ModelConfig` and the option enums it is built from.
//! - `error`: the error type raised while building a model.
//! - `models`: convolution blocks, encoder, decoder, U-Net, ConvGRU cell and
//!   the recurrent refinement driver.
//! - `training`: batch and output structures shared with the loss and data
//!   crates.
//!
//! ## Key Components
//!
//! - `build_model`: resolves an architecture name into a `RecurrentUNet`.
//! - `RecurrentUNet`: the refinement driver.
//! - `ConvGruCell`: the gated convolutional unit.

mod config;
mod error;
mod models;
pub mod training;

#[doc(inline)]
pub use config::{
    core::{CELL_BASE_FILTERS, MAX_LEVEL, UNET_BASE_FILTERS},
    GateBlock, GateCount, HiddenInit, InterpolationStrategy, ModelConfig, OutputMode,
};
#[doc(inline)]
pub use error::{ModelError, ModelResult};
#[doc(inline)]
pub use models::{
    conv_gru::{gru_update, ConvGruCell, ConvGruCellConfig, GateTransform},
    decoder::{pad_to, resize_to, Decoder, DecoderConfig, UpBlock, UpBlockConfig, Upsample},
    encoder::{Encoder, EncoderConfig, EncoderOutput},
    factory::{build_model, ModelArch},
    hidden::{init_hidden_state, init_state_like},
    modules::{default_initializer, zero_bias, ConvBlock, ConvBlockConfig},
    recurrent::{
        GruOnlyBaseline, HiddenStateFeedback, InputStackFeedback, RecurrentUNet,
        RecurrentUNetRecord, RecurrentVariant,
    },
    unet::{UNet, UNetConfig},
};
#[doc(inline)]
pub use training::{RecurrentOutput, SegmentationBatch};
