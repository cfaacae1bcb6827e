//! # Encoder
//!
//! A cascade of `ConvBlock -> 2x2 max-pool` stages. Stage `i` maps
//! `filters[i - 1]` (or the input channels) to `filters[i]` channels and halves
//! the spatial size through the pool that follows it.

use burn::{
    nn::{
        pool::{MaxPool2d, MaxPool2dConfig},
        Initializer,
    },
    prelude::*,
};

use super::modules::{default_initializer, ConvBlock, ConvBlockConfig};

/// Multi-resolution features produced by an [`Encoder`].
#[derive(Debug, Clone)]
pub struct EncoderOutput<B: Backend> {
    /// Pre-pool output of every stage, finest first. Used as skip connections.
    pub skips: Vec<Tensor<B, 4>>,
    /// Pooled output of the last stage, the input of the bottleneck.
    pub pooled: Tensor<B, 4>,
}

/// Configuration for an [`Encoder`].
#[derive(Config, Debug)]
pub struct EncoderConfig {
    /// Channels of the encoder input.
    pub in_channels: usize,
    /// Output width of every stage, finest first.
    pub filters: Vec<usize>,
    #[config(default = true)]
    pub is_batchnorm: bool,
    #[config(default = "default_initializer()")]
    pub initializer: Initializer,
}

impl EncoderConfig {
    /// Initializes a new [`Encoder`].
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Encoder<B> {
        assert!(
            !self.filters.is_empty(),
            "Encoder needs at least one stage, got empty filters"
        );

        let mut in_channels = self.in_channels;
        let stages = self
            .filters
            .iter()
            .map(|&out_channels| {
                let stage = ConvBlockConfig::new(in_channels, out_channels)
                    .with_is_batchnorm(self.is_batchnorm)
                    .with_initializer(self.initializer.clone())
                    .init(device);
                in_channels = out_channels;
                stage
            })
            .collect();

        Encoder {
            stages,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }
}

/// Convolution + downsampling cascade.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    stages: Vec<ConvBlock<B>>,
    pool: MaxPool2d,
}

impl<B: Backend> Encoder<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> EncoderOutput<B> {
        let mut skips = Vec::with_capacity(self.stages.len());
        let mut pooled = x;
        for stage in &self.stages {
            let features = stage.forward(pooled);
            pooled = self.pool.forward(features.clone());
            skips.push(features);
        }

        EncoderOutput { skips, pooled }
    }

    /// Number of stages, which is also the number of pooling steps.
    pub fn num_levels(&self) -> usize {
        self.stages.len()
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn encoder_produces_one_skip_per_level() {
        let device = Default::default();
        let encoder = EncoderConfig::new(3, vec![4, 8, 16]).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::random([2, 3, 32, 32], Distribution::Default, &device);

        let output = encoder.forward(x);

        let dims: Vec<_> = output.skips.iter().map(Tensor::dims).collect();
        assert_eq!(dims, vec![[2, 4, 32, 32], [2, 8, 16, 16], [2, 16, 8, 8]]);
        assert_eq!(output.pooled.dims(), [2, 16, 4, 4]);
        assert_eq!(encoder.num_levels(), 3);
    }

    #[test]
    #[should_panic = "Encoder needs at least one stage"]
    fn encoder_without_filters_panics() {
        let device = Default::default();
        let _encoder = EncoderConfig::new(3, vec![]).init::<TestBackend>(&device);
    }
}
