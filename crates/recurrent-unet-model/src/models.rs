//! Model architectures.

pub mod conv_gru;
pub mod decoder;
pub mod encoder;
pub mod factory;
pub mod hidden;
pub mod modules;
pub mod recurrent;
pub mod unet;
