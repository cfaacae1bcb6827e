//! # Recurrent Refinement
//!
//! [`RecurrentUNet`] runs a fixed number of refinement steps and returns every
//! intermediate prediction. What is carried from one step to the next depends
//! on the [`RecurrentVariant`]:
//!
//! - `InputStackFeedback`: the previous prediction is concatenated to the image.
//! - `HiddenStateFeedback`: a ConvGRU at the encoder bottleneck carries a
//!   hidden state between decoder passes.
//! - `GruOnlyBaseline`: a U-Net runs once, a ConvGRU refines its features.
//! - `PlainUNet`: a single forward pass, no recurrence.
//!
//! State is always an explicit value returned by one `step` and passed into
//! the next; nothing is cached on the modules between passes.

use burn::{module::Ignored, prelude::*};

use super::{
    conv_gru::{ConvGruCell, ConvGruCellConfig},
    decoder::{Decoder, DecoderConfig},
    encoder::{Encoder, EncoderConfig, EncoderOutput},
    hidden::init_state_like,
    unet::{UNet, UNetConfig},
};
use crate::config::{HiddenInit, ModelConfig};
use crate::training::RecurrentOutput;

/// Refinement network fed with `cat(image, previous prediction)`.
#[derive(Module, Debug)]
pub struct InputStackFeedback<B: Backend> {
    unet: UNet<B>,
    input_channels: usize,
    feedback_channels: usize,
    initial: Ignored<HiddenInit>,
}

impl<B: Backend> InputStackFeedback<B> {
    pub fn new(config: &ModelConfig, n_classes: usize, device: &B::Device) -> Self {
        let feedback_channels = config.prediction_channels(n_classes);
        Self {
            unet: UNetConfig::new(
                config.input_channels + feedback_channels,
                feedback_channels,
                config.unet_filters(),
            )
            .with_is_deconv(config.is_deconv)
            .with_interpolation(config.interpolation.clone())
            .with_is_batchnorm(config.is_batchnorm)
            .init(device),
            input_channels: config.input_channels,
            feedback_channels,
            initial: Ignored(config.initial.clone()),
        }
    }

    /// Feedback used before the first prediction exists.
    pub fn init_feedback(&self, image: &Tensor<B, 4>) -> Tensor<B, 4> {
        init_state_like(&self.initial, image, self.feedback_channels)
    }

    /// Predicts from the image and the previous prediction.
    pub fn step(&self, image: Tensor<B, 4>, feedback: Tensor<B, 4>) -> Tensor<B, 4> {
        self.unet.forward(Tensor::cat(vec![image, feedback], 1))
    }

    /// Channel count of the stacked refinement input.
    pub fn stacked_channels(&self) -> usize {
        self.input_channels + self.feedback_channels
    }
}

/// Encoder and decoder around a bottleneck ConvGRU.
#[derive(Module, Debug)]
pub struct HiddenStateFeedback<B: Backend> {
    encoder: Encoder<B>,
    gru: ConvGruCell<B>,
    decoder: Decoder<B>,
}

impl<B: Backend> HiddenStateFeedback<B> {
    pub fn new(config: &ModelConfig, n_classes: usize, device: &B::Device) -> Self {
        let filters = config.cell_unet_filters();
        let level = config.unet_level;

        Self {
            encoder: EncoderConfig::new(config.input_channels, filters[..level].to_vec())
                .with_is_batchnorm(config.is_batchnorm)
                .init(device),
            gru: ConvGruCellConfig::new(
                config.recurrent_filters(),
                filters[level - 1],
                config.hidden_size,
                filters[level],
            )
            .with_gru_level(config.gru_level())
            .with_gate(config.gate.clone())
            .with_structure(config.structure.clone())
            .with_initial(config.initial.clone())
            .with_is_batchnorm(config.is_batchnorm)
            .init(device),
            decoder: DecoderConfig::new(filters, config.prediction_channels(n_classes))
                .with_is_deconv(config.is_deconv)
                .with_interpolation(config.interpolation.clone())
                .with_is_batchnorm(config.is_batchnorm)
                .init(device),
        }
    }

    /// The image never changes between steps, so its features are computed
    /// once per pass.
    pub fn encode(&self, image: Tensor<B, 4>) -> EncoderOutput<B> {
        self.encoder.forward(image)
    }

    /// Updates the bottleneck state and decodes a prediction.
    ///
    /// Returns `(prediction, new_state)`.
    pub fn step(
        &self,
        features: &EncoderOutput<B>,
        state: Option<Tensor<B, 4>>,
    ) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let (center, state) = self.gru.forward(features.pooled.clone(), state);
        (self.decoder.forward(&features.skips, center), state)
    }
}

/// U-Net features refined by a ConvGRU at full resolution.
#[derive(Module, Debug)]
pub struct GruOnlyBaseline<B: Backend> {
    unet: UNet<B>,
    gru: ConvGruCell<B>,
}

/// Width of the single-scale gates of the baseline GRU.
const BASELINE_GATE_FILTERS: usize = 32;

impl<B: Backend> GruOnlyBaseline<B> {
    pub fn new(config: &ModelConfig, n_classes: usize, device: &B::Device) -> Self {
        Self {
            unet: UNetConfig::new(config.input_channels, config.hidden_size, config.unet_filters())
                .with_is_deconv(config.is_deconv)
                .with_interpolation(config.interpolation.clone())
                .with_is_batchnorm(config.is_batchnorm)
                .init(device),
            gru: ConvGruCellConfig::new(
                vec![BASELINE_GATE_FILTERS],
                config.hidden_size,
                config.hidden_size,
                config.prediction_channels(n_classes),
            )
            .with_gate(config.gate.clone())
            .with_structure(config.structure.clone())
            .with_initial(config.initial.clone())
            .with_is_batchnorm(config.is_batchnorm)
            .init(device),
        }
    }

    pub fn features(&self, image: Tensor<B, 4>) -> Tensor<B, 4> {
        self.unet.forward(image)
    }

    /// Returns `(prediction, new_state)`.
    pub fn step(
        &self,
        features: Tensor<B, 4>,
        state: Option<Tensor<B, 4>>,
    ) -> (Tensor<B, 4>, Tensor<B, 4>) {
        self.gru.forward(features, state)
    }
}

/// The refinement strategy of a [`RecurrentUNet`].
#[derive(Module, Debug)]
pub enum RecurrentVariant<B: Backend> {
    InputStackFeedback(InputStackFeedback<B>),
    HiddenStateFeedback(HiddenStateFeedback<B>),
    GruOnlyBaseline(GruOnlyBaseline<B>),
    PlainUNet(UNet<B>),
}

/// Recurrent segmentation network producing one prediction per step.
#[derive(Module, Debug)]
pub struct RecurrentUNet<B: Backend> {
    variant: RecurrentVariant<B>,
    steps: usize,
}

impl<B: Backend> RecurrentUNet<B> {
    pub fn new(variant: RecurrentVariant<B>, steps: usize) -> Self {
        Self { variant, steps }
    }

    /// Runs every refinement step on `image`.
    ///
    /// # Shapes
    ///
    /// - image: `[batch, input_channels, H, W]`
    /// - each prediction: `[batch, prediction_channels, H, W]`
    ///
    /// The output holds exactly [`num_steps`](Self::num_steps) predictions,
    /// the refined one last.
    pub fn forward(&self, image: Tensor<B, 4>) -> RecurrentOutput<B> {
        let mut predictions = Vec::with_capacity(self.num_steps());

        match &self.variant {
            RecurrentVariant::InputStackFeedback(model) => {
                let mut feedback = model.init_feedback(&image);
                for _ in 0..self.steps {
                    let prediction = model.step(image.clone(), feedback);
                    feedback = prediction.clone();
                    predictions.push(prediction);
                }
            }
            RecurrentVariant::HiddenStateFeedback(model) => {
                let features = model.encode(image);
                let mut state = None;
                for _ in 0..self.steps {
                    let (prediction, next) = model.step(&features, state);
                    state = Some(next);
                    predictions.push(prediction);
                }
            }
            RecurrentVariant::GruOnlyBaseline(model) => {
                let features = model.features(image);
                let mut state = None;
                for _ in 0..self.steps {
                    let (prediction, next) = model.step(features.clone(), state);
                    state = Some(next);
                    predictions.push(prediction);
                }
            }
            RecurrentVariant::PlainUNet(unet) => predictions.push(unet.forward(image)),
        }

        RecurrentOutput::new(predictions)
    }

    /// Number of predictions produced by [`forward`](Self::forward).
    pub fn num_steps(&self) -> usize {
        match &self.variant {
            RecurrentVariant::PlainUNet(_) => 1,
            _ => self.steps,
        }
    }

    pub fn variant(&self) -> &RecurrentVariant<B> {
        &self.variant
    }

    /// Channel count of the refinement input when predictions are stacked
    /// onto the image.
    pub fn stacked_input_channels(&self) -> Option<usize> {
        match &self.variant {
            RecurrentVariant::InputStackFeedback(model) => Some(model.stacked_channels()),
            _ => None,
        }
    }
}

/// Wraps a plain [`UNet`] so it can stand in a [`RecurrentVariant`].
pub fn plain_unet<B: Backend>(
    config: &ModelConfig,
    n_classes: usize,
    device: &B::Device,
) -> UNet<B> {
    UNetConfig::new(
        config.input_channels,
        config.prediction_channels(n_classes),
        config.unet_filters(),
    )
    .with_is_deconv(config.is_deconv)
    .with_interpolation(config.interpolation.clone())
    .with_is_batchnorm(config.is_batchnorm)
    .init(device)
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;

    use super::*;
    use crate::{config::OutputMode, tests::TestBackend};

    fn image(dims: [usize; 4]) -> Tensor<TestBackend, 4> {
        Tensor::random(dims, Distribution::Default, &Default::default())
    }

    #[test]
    fn input_stacking_yields_one_prediction_per_step() {
        let device = Default::default();
        let config = ModelConfig::new().with_steps(3).with_unet_level(2);
        let model = RecurrentUNet::new(
            RecurrentVariant::InputStackFeedback(InputStackFeedback::new(&config, 2, &device)),
            config.steps,
        );

        let output = model.forward(image([2, 3, 32, 32]));

        assert_eq!(output.len(), 3);
        for prediction in &output.predictions {
            assert_eq!(prediction.dims(), [2, 2, 32, 32]);
        }
        assert_eq!(model.stacked_input_channels(), Some(5));
    }

    #[test]
    fn binary_feedback_uses_one_channel() {
        let device = Default::default();
        let config = ModelConfig::new()
            .with_unet_level(2)
            .with_output_mode(OutputMode::Binary);
        let model = InputStackFeedback::<TestBackend>::new(&config, 2, &device);

        let feedback = model.init_feedback(&image([1, 3, 16, 16]));

        assert_eq!(feedback.dims(), [1, 1, 16, 16]);
        assert_eq!(model.stacked_channels(), 4);
    }

    #[test]
    fn hidden_state_variant_decodes_every_step() {
        let device = Default::default();
        let config = ModelConfig::new().with_unet_level(3).with_steps(2);
        let model = RecurrentUNet::new(
            RecurrentVariant::HiddenStateFeedback(HiddenStateFeedback::new(&config, 3, &device)),
            config.steps,
        );

        let output = model.forward(image([1, 3, 32, 32]));

        assert_eq!(output.len(), 2);
        assert!(output.predictions.iter().all(|p| p.dims() == [1, 3, 32, 32]));
        assert_eq!(model.stacked_input_channels(), None);
    }

    #[test]
    fn hidden_state_keeps_bottleneck_shape() {
        let device = Default::default();
        let config = ModelConfig::new().with_unet_level(4).with_is_batchnorm(false);
        let model = HiddenStateFeedback::<TestBackend>::new(&config, 2, &device);
        let features = model.encode(image([1, 3, 32, 32]));

        let (_, first) = model.step(&features, None);
        let (_, second) = model.step(&features, Some(first.clone()));

        assert_eq!(first.dims(), [1, config.hidden_size, 2, 2]);
        assert_eq!(second.dims(), first.dims());
    }

    #[test]
    fn gru_baseline_refines_full_resolution_features() {
        let device = Default::default();
        let config = ModelConfig::new().with_hidden_size(4).with_steps(4);
        let model = RecurrentUNet::new(
            RecurrentVariant::GruOnlyBaseline(GruOnlyBaseline::new(&config, 2, &device)),
            config.steps,
        );

        let output = model.forward(image([1, 3, 32, 32]));

        assert_eq!(output.len(), 4);
        assert_eq!(output.last().map(Tensor::dims), Some([1, 2, 32, 32]));
    }

    #[test]
    fn plain_unet_returns_a_single_prediction() {
        let device = Default::default();
        let config = ModelConfig::new().with_steps(5);
        let model = RecurrentUNet::new(
            RecurrentVariant::PlainUNet(plain_unet(&config, 4, &device)),
            config.steps,
        );

        let output = model.forward(image([1, 3, 32, 32]));

        assert_eq!(model.num_steps(), 1);
        assert_eq!(output.len(), 1);
        assert_eq!(output.predictions[0].dims(), [1, 4, 32, 32]);
    }
}
