//! # U-Net
//!
//! Encoder, bottleneck block and decoder with configurable input and output
//! channels. Used as the refinement network of the input-stacking variant, as
//! the plain baseline and as a multi-resolution ConvGRU gate.

use burn::{nn::Initializer, prelude::*};

use super::{
    decoder::{Decoder, DecoderConfig},
    encoder::{Encoder, EncoderConfig},
    modules::{default_initializer, ConvBlock, ConvBlockConfig},
};
use crate::config::InterpolationStrategy;

/// Configuration for a [`UNet`].
#[derive(Config, Debug)]
pub struct UNetConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    /// Widths `[f_0, .., f_L]`. The encoder uses `L` levels, `f_L` is the
    /// bottleneck width.
    pub filters: Vec<usize>,
    #[config(default = true)]
    pub is_deconv: bool,
    #[config(default = true)]
    pub is_batchnorm: bool,
    #[config(default = "InterpolationStrategy::Nearest")]
    pub interpolation: InterpolationStrategy,
    #[config(default = "default_initializer()")]
    pub initializer: Initializer,
}

impl UNetConfig {
    /// Initializes a new [`UNet`].
    pub fn init<B: Backend>(&self, device: &Device<B>) -> UNet<B> {
        assert!(
            self.filters.len() >= 2,
            "UNet needs at least two widths, got {:?}",
            self.filters
        );
        let level = self.filters.len() - 1;

        UNet {
            encoder: EncoderConfig::new(self.in_channels, self.filters[..level].to_vec())
                .with_is_batchnorm(self.is_batchnorm)
                .with_initializer(self.initializer.clone())
                .init(device),
            center: ConvBlockConfig::new(self.filters[level - 1], self.filters[level])
                .with_is_batchnorm(self.is_batchnorm)
                .with_initializer(self.initializer.clone())
                .init(device),
            decoder: DecoderConfig::new(self.filters.clone(), self.out_channels)
                .with_is_deconv(self.is_deconv)
                .with_is_batchnorm(self.is_batchnorm)
                .with_interpolation(self.interpolation.clone())
                .with_initializer(self.initializer.clone())
                .init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    encoder: Encoder<B>,
    center: ConvBlock<B>,
    decoder: Decoder<B>,
}

impl<B: Backend> UNet<B> {
    /// # Shapes
    ///
    /// - input: `[batch, in_channels, H, W]`
    /// - output: `[batch, out_channels, H, W]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let features = self.encoder.forward(x);
        let center = self.center.forward(features.pooled);
        self.decoder.forward(&features.skips, center)
    }

    /// Number of pooling steps.
    pub fn level(&self) -> usize {
        self.encoder.num_levels()
    }
}

#[cfg(test)]
mod tests {
    use burn::{module::AutodiffModule, tensor::Distribution};

    use super::*;
    use crate::tests::{TestAutodiffBackend, TestBackend};

    #[test]
    fn unet_maps_channels_and_keeps_resolution() {
        let device = Default::default();
        let unet = UNetConfig::new(5, 2, vec![4, 8, 16, 32, 64]).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::random([1, 5, 64, 64], Distribution::Default, &device);

        assert_eq!(unet.forward(x).dims(), [1, 2, 64, 64]);
        assert_eq!(unet.level(), 4);
    }

    #[test]
    fn unet_handles_sizes_not_divisible_by_two() {
        let device = Default::default();
        let unet = UNetConfig::new(1, 3, vec![2, 4, 8])
            .with_is_deconv(false)
            .init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::random([2, 1, 13, 10], Distribution::Default, &device);

        assert_eq!(unet.forward(x).dims(), [2, 3, 13, 10]);
    }

    #[test]
    fn eval_forward_is_deterministic() {
        let device = Default::default();
        let unet = UNetConfig::new(3, 2, vec![4, 8, 16]).init::<TestAutodiffBackend>(&device);
        let unet = unet.valid();
        let x = Tensor::<TestBackend, 4>::random([2, 3, 16, 16], Distribution::Default, &device);

        let first = unet.forward(x.clone()).into_data();
        let second = unet.forward(x).into_data();

        assert_eq!(first, second);
    }

    #[test]
    #[should_panic = "UNet needs at least two widths"]
    fn single_width_unet_panics() {
        let device = Default::default();
        let _unet = UNetConfig::new(3, 2, vec![4]).init::<TestBackend>(&device);
    }
}
