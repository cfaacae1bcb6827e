//! Reusable building blocks shared by the encoder, decoder and GRU gates.

pub mod conv_block;

pub use conv_block::{default_initializer, zero_bias, ConvBlock, ConvBlockConfig, ConvLayer};
