//! # Decoder
//!
//! Mirrors an [`Encoder`](super::encoder::Encoder): every up-stage doubles the
//! spatial size, concatenates the matching skip connection and fuses the
//! result with a `ConvBlock`. A final 1x1 convolution produces raw logits.

use burn::{
    module::Ignored,
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        Initializer,
    },
    prelude::*,
    tensor::{module::interpolate, ops::InterpolateOptions},
};

use super::modules::{default_initializer, zero_bias, ConvBlock, ConvBlockConfig};
use crate::config::InterpolationStrategy;

/// Resizes `x` to `size`, a no-op when the sizes already agree.
pub fn resize_to<B: Backend>(
    x: Tensor<B, 4>,
    size: [usize; 2],
    strategy: &InterpolationStrategy,
) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    if [height, width] == size {
        return x;
    }
    interpolate(x, size, InterpolateOptions::new(strategy.mode()))
}

/// Crops or zero-pads `x` at the bottom and right edges to `size`.
pub fn pad_to<B: Backend>(x: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let [batch, channels, height, width] = x.dims();
    let [target_height, target_width] = size;
    if [height, width] == size {
        return x;
    }

    let height = height.min(target_height);
    let width = width.min(target_width);
    let x = x.slice([0..batch, 0..channels, 0..height, 0..width]);
    Tensor::zeros([batch, channels, target_height, target_width], &x.device())
        .slice_assign([0..batch, 0..channels, 0..height, 0..width], x)
}

/// Learned or fixed 2x upsampling.
#[derive(Module, Debug)]
pub enum Upsample<B: Backend> {
    /// 2x2 transposed convolution with stride 2.
    Deconv(ConvTranspose2d<B>),
    /// 2x resize followed by a 1x1 channel projection.
    Resize(Conv2d<B>),
}

impl<B: Backend> Upsample<B> {
    pub fn forward(&self, x: Tensor<B, 4>, strategy: &InterpolationStrategy) -> Tensor<B, 4> {
        match self {
            Self::Deconv(deconv) => deconv.forward(x),
            Self::Resize(project) => {
                let [_, _, height, width] = x.dims();
                project.forward(resize_to(x, [height * 2, width * 2], strategy))
            }
        }
    }
}

/// Configuration for an [`UpBlock`].
#[derive(Config, Debug)]
pub struct UpBlockConfig {
    /// Channels of the coarser input.
    pub in_channels: usize,
    /// Channels of the skip connection and of the block output.
    pub out_channels: usize,
    #[config(default = true)]
    pub is_deconv: bool,
    #[config(default = true)]
    pub is_batchnorm: bool,
    #[config(default = "InterpolationStrategy::Nearest")]
    pub interpolation: InterpolationStrategy,
    #[config(default = "default_initializer()")]
    pub initializer: Initializer,
}

impl UpBlockConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> UpBlock<B> {
        let channels = [self.in_channels, self.out_channels];
        let up = if self.is_deconv {
            let mut deconv = ConvTranspose2dConfig::new(channels, [2, 2])
                .with_stride([2, 2])
                .with_initializer(self.initializer.clone())
                .init(device);
            deconv.bias = zero_bias(deconv.bias);
            Upsample::Deconv(deconv)
        } else {
            let mut project = Conv2dConfig::new(channels, [1, 1])
                .with_initializer(self.initializer.clone())
                .init(device);
            project.bias = zero_bias(project.bias);
            Upsample::Resize(project)
        };

        UpBlock {
            up,
            fuse: ConvBlockConfig::new(self.out_channels * 2, self.out_channels)
                .with_is_batchnorm(self.is_batchnorm)
                .with_initializer(self.initializer.clone())
                .init(device),
            interpolation: Ignored(self.interpolation.clone()),
        }
    }
}

/// Upsample, concatenate with the skip connection and fuse.
#[derive(Module, Debug)]
pub struct UpBlock<B: Backend> {
    up: Upsample<B>,
    fuse: ConvBlock<B>,
    interpolation: Ignored<InterpolationStrategy>,
}

impl<B: Backend> UpBlock<B> {
    pub fn forward(&self, skip: Tensor<B, 4>, below: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = skip.dims();
        // Odd input sizes leave the upsampled map one pixel short.
        let up = pad_to(self.up.forward(below, &self.interpolation), [height, width]);
        self.fuse.forward(Tensor::cat(vec![skip, up], 1))
    }
}

/// Configuration for a [`Decoder`].
#[derive(Config, Debug)]
pub struct DecoderConfig {
    /// Widths `[f_0, .., f_L]`; `f_L` is the bottleneck width.
    pub filters: Vec<usize>,
    /// Channels of the output logits.
    pub out_channels: usize,
    #[config(default = true)]
    pub is_deconv: bool,
    #[config(default = true)]
    pub is_batchnorm: bool,
    #[config(default = "InterpolationStrategy::Nearest")]
    pub interpolation: InterpolationStrategy,
    #[config(default = "default_initializer()")]
    pub initializer: Initializer,
}

impl DecoderConfig {
    /// Initializes a new [`Decoder`].
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Decoder<B> {
        assert!(
            self.filters.len() >= 2,
            "Decoder needs a bottleneck and at least one skip width, got {:?}",
            self.filters
        );

        // Deepest stage first, matching the order the skips are consumed in.
        let ups = self
            .filters
            .windows(2)
            .rev()
            .map(|pair| {
                UpBlockConfig::new(pair[1], pair[0])
                    .with_is_deconv(self.is_deconv)
                    .with_is_batchnorm(self.is_batchnorm)
                    .with_interpolation(self.interpolation.clone())
                    .with_initializer(self.initializer.clone())
                    .init(device)
            })
            .collect();

        let mut final_conv = Conv2dConfig::new([self.filters[0], self.out_channels], [1, 1])
            .with_initializer(self.initializer.clone())
            .init(device);
        final_conv.bias = zero_bias(final_conv.bias);

        Decoder { ups, final_conv }
    }
}

/// Upsampling path with skip connections and a 1x1 classifier.
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    ups: Vec<UpBlock<B>>,
    final_conv: Conv2d<B>,
}

impl<B: Backend> Decoder<B> {
    /// Decodes `center` using `skips` ordered finest first.
    ///
    /// # Shapes
    ///
    /// - skips[i]: `[batch, f_i, H / 2^i, W / 2^i]`
    /// - center: `[batch, f_L, H / 2^L, W / 2^L]`
    /// - output: `[batch, out_channels, H, W]`
    pub fn forward(&self, skips: &[Tensor<B, 4>], center: Tensor<B, 4>) -> Tensor<B, 4> {
        assert_eq!(
            skips.len(),
            self.ups.len(),
            "Decoder expects one skip per up-stage"
        );

        let x = self
            .ups
            .iter()
            .zip(skips.iter().rev())
            .fold(center, |x, (up, skip)| up.forward(skip.clone(), x));

        self.final_conv.forward(x)
    }

    pub fn num_levels(&self) -> usize {
        self.ups.len()
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{Distribution, TensorData, Tolerance};

    use super::*;
    use crate::tests::{TestAutodiffBackend, TestBackend};

    fn features(
        dims: [usize; 4],
        device: &<TestBackend as Backend>::Device,
    ) -> Tensor<TestBackend, 4> {
        Tensor::random(dims, Distribution::Default, device)
    }

    #[test]
    fn decoder_restores_input_resolution() {
        let device = Default::default();
        let decoder = DecoderConfig::new(vec![4, 8, 16], 3).init::<TestBackend>(&device);
        let skips = vec![
            features([1, 4, 16, 16], &device),
            features([1, 8, 8, 8], &device),
        ];

        let output = decoder.forward(&skips, features([1, 16, 4, 4], &device));

        assert_eq!(output.dims(), [1, 3, 16, 16]);
        assert_eq!(decoder.num_levels(), 2);
    }

    #[test]
    fn resize_decoder_restores_input_resolution() {
        let device = Default::default();
        let decoder = DecoderConfig::new(vec![4, 8], 2)
            .with_is_deconv(false)
            .init::<TestBackend>(&device);
        let skips = vec![features([2, 4, 12, 12], &device)];

        let output = decoder.forward(&skips, features([2, 8, 6, 6], &device));

        assert_eq!(output.dims(), [2, 2, 12, 12]);
    }

    #[test]
    fn odd_skip_sizes_are_matched_by_padding() {
        let device = Default::default();
        let block = UpBlockConfig::new(8, 4).init::<TestBackend>(&device);
        let skip = features([1, 4, 9, 7], &device);

        let output = block.forward(skip, features([1, 8, 4, 3], &device));

        assert_eq!(output.dims(), [1, 4, 9, 7]);
    }

    #[test]
    fn pad_to_fills_bottom_and_right_with_zeros() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([1, 1, 2, 2], &device);

        let expected = TensorData::from([[[
            [1.0f32, 1.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 0.0, 0.0],
        ]]]);
        pad_to(x, [3, 3])
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    fn pad_to_crops_larger_maps() {
        let device = Default::default();
        let x = features([1, 2, 6, 5], &device);

        assert_eq!(pad_to(x, [4, 5]).dims(), [1, 2, 4, 5]);
    }

    #[test]
    fn resize_to_same_size_is_identity() {
        let device = Default::default();
        let x = features([1, 2, 5, 5], &device);

        resize_to(x.clone(), [5, 5], &InterpolationStrategy::Bilinear)
            .into_data()
            .assert_approx_eq::<f32>(&x.into_data(), Tolerance::default());
    }

    #[test]
    fn resize_to_upsamples_constant_maps() {
        let device = Default::default();
        let expected = TensorData::from([[[[1.0f32; 4]; 4]]]);

        for strategy in [InterpolationStrategy::Bilinear, InterpolationStrategy::Nearest] {
            let x = Tensor::<TestBackend, 4>::ones([1, 1, 2, 2], &device);
            resize_to(x, [4, 4], &strategy)
                .into_data()
                .assert_approx_eq::<f32>(&expected, Tolerance::default());
        }
    }

    #[test]
    fn resize_decoder_backward_with_odd_sizes() {
        let device = Default::default();
        let decoder = DecoderConfig::new(vec![2, 4, 8], 2)
            .with_is_deconv(false)
            .init::<TestAutodiffBackend>(&device);
        let skips = vec![
            Tensor::random([1, 2, 11, 9], Distribution::Default, &device),
            Tensor::random([1, 4, 5, 4], Distribution::Default, &device),
        ];
        let center = Tensor::<TestAutodiffBackend, 4>::random(
            [1, 8, 2, 2],
            Distribution::Default,
            &device,
        )
        .require_grad();

        let output = decoder.forward(&skips, center.clone());
        assert_eq!(output.dims(), [1, 2, 11, 9]);

        let grads = output.sum().backward();
        let center_grad = center.grad(&grads).expect("center should receive a gradient");
        assert_eq!(center_grad.dims(), [1, 8, 2, 2]);
    }

    #[test]
    fn final_conv_bias_starts_at_zero() {
        let device = Default::default();
        let decoder = DecoderConfig::new(vec![4, 8], 3).init::<TestBackend>(&device);

        let bias = decoder
            .final_conv
            .bias
            .as_ref()
            .expect("final conv has a bias")
            .val();
        assert_eq!(bias.abs().sum().into_scalar(), 0.0);
    }
}
