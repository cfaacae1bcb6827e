//! Configuration module for recurrent U-Net models.
//!
//! - `core`: the `ModelConfig` record and its derived quantities
//! - `enums`: the closed option sets used by `ModelConfig`

pub mod core;
pub mod enums;

pub use self::core::ModelConfig;
pub use enums::{GateBlock, GateCount, HiddenInit, InterpolationStrategy, OutputMode};
