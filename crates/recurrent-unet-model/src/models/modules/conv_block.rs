//! # Convolution Blocks
//!
//! `ConvBlock` is the unit every encoder stage, decoder stage and single-scale
//! GRU gate is built from: one or more `3x3 conv -> norm -> ReLU` layers that
//! preserve the spatial size.

use core::f64::consts::SQRT_2;

use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
    },
    prelude::*,
};

use crate::config::GateBlock;

/// Kaiming-normal initialization with ReLU gain, used for every convolution.
pub fn default_initializer() -> Initializer {
    Initializer::KaimingNormal {
        gain: SQRT_2,
        fan_out_only: false,
    }
}

/// Zeroes a freshly initialized convolution bias.
///
/// Burn applies the weight initializer to biases as well.
pub fn zero_bias<B: Backend>(bias: Option<Param<Tensor<B, 1>>>) -> Option<Param<Tensor<B, 1>>> {
    bias.map(|bias| bias.map(|tensor| tensor.zeros_like()))
}

/// Configuration for a [`ConvBlock`].
#[derive(Config, Debug)]
pub struct ConvBlockConfig {
    /// Number of input channels.
    pub in_channels: usize,
    /// Number of output channels of every layer.
    pub out_channels: usize,
    /// Number of stacked conv-norm-ReLU layers.
    #[config(default = 2)]
    pub num_layers: usize,
    #[config(default = true)]
    pub is_batchnorm: bool,
    /// Weight and bias initializer of the convolutions.
    #[config(default = "default_initializer()")]
    pub initializer: Initializer,
}

impl ConvBlockConfig {
    /// Configuration of a single-scale GRU gate block.
    pub fn for_gate(in_channels: usize, out_channels: usize, block: &GateBlock) -> Self {
        let num_layers = match block {
            GateBlock::SingleConv => 1,
            GateBlock::DoubleConv => 2,
        };
        Self::new(in_channels, out_channels).with_num_layers(num_layers)
    }

    /// Initializes a new [`ConvBlock`].
    pub fn init<B: Backend>(&self, device: &Device<B>) -> ConvBlock<B> {
        let layers = (0..self.num_layers.max(1))
            .map(|i| {
                let in_channels = if i == 0 {
                    self.in_channels
                } else {
                    self.out_channels
                };
                let mut conv = Conv2dConfig::new([in_channels, self.out_channels], [3, 3])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .with_initializer(self.initializer.clone())
                    .init(device);
                conv.bias = zero_bias(conv.bias);

                ConvLayer {
                    conv,
                    norm: self
                        .is_batchnorm
                        .then(|| BatchNormConfig::new(self.out_channels).init(device)),
                    relu: Relu::new(),
                }
            })
            .collect();

        ConvBlock { layers }
    }
}

/// A single `conv -> norm -> ReLU` layer.
#[derive(Module, Debug)]
pub struct ConvLayer<B: Backend> {
    conv: Conv2d<B>,
    /// Absent when batch normalization is disabled.
    norm: Option<BatchNorm<B, 2>>,
    relu: Relu,
}

impl<B: Backend> ConvLayer<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        self.relu.forward(x)
    }
}

/// Stack of spatial-size-preserving convolution layers.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    layers: Vec<ConvLayer<B>>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.layers.iter().fold(x, |x, layer| layer.forward(x))
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{Distribution, TensorData, Tolerance};

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn conv_block_preserves_spatial_size() {
        let device = Default::default();
        let block = ConvBlockConfig::new(3, 8).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::random([2, 3, 9, 7], Distribution::Default, &device);

        assert_eq!(block.forward(x).dims(), [2, 8, 9, 7]);
        assert_eq!(block.num_layers(), 2);
    }

    #[test]
    fn gate_block_selects_layer_count() {
        let device = Default::default();
        let single = ConvBlockConfig::for_gate(4, 4, &GateBlock::SingleConv)
            .init::<TestBackend>(&device);
        let double = ConvBlockConfig::for_gate(4, 4, &GateBlock::DoubleConv)
            .init::<TestBackend>(&device);

        assert_eq!(single.num_layers(), 1);
        assert_eq!(double.num_layers(), 2);
    }

    #[test]
    fn constant_weights_without_batchnorm() {
        let device = Default::default();
        let block = ConvBlockConfig::new(1, 1)
            .with_num_layers(1)
            .with_is_batchnorm(false)
            .with_initializer(Initializer::Constant { value: 0.5 })
            .init::<TestBackend>(&device);
        // 1x1 input with zero padding: only the centre tap contributes, the
        // bias is zero.
        let x = Tensor::<TestBackend, 4>::from_data(TensorData::from([[[[2.0]]]]), &device);

        let expected = TensorData::from([[[[0.5 * 2.0]]]]);
        block
            .forward(x)
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    fn conv_biases_start_at_zero() {
        let device = Default::default();
        let block = ConvBlockConfig::new(3, 4)
            .with_initializer(Initializer::Constant { value: 0.5 })
            .init::<TestBackend>(&device);

        for layer in &block.layers {
            let bias = layer.conv.bias.as_ref().expect("conv has a bias").val();
            assert_eq!(bias.abs().sum().into_scalar(), 0.0);
        }
    }

    #[test]
    fn relu_clamps_negative_responses() {
        let device = Default::default();
        let block = ConvBlockConfig::new(1, 1)
            .with_num_layers(1)
            .with_is_batchnorm(false)
            .with_initializer(Initializer::Constant { value: 1.0 })
            .init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::from_data(TensorData::from([[[[-5.0]]]]), &device);

        let expected = TensorData::from([[[[0.0]]]]);
        block
            .forward(x)
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }
}
