//! # Convolutional GRU
//!
//! A GRU whose gates are convolutional transforms over feature maps. Each gate
//! is either a single [`ConvBlock`] or, when more than one width is given, a
//! complete multi-resolution [`UNet`].
//!
//! ```text
//! update = sigmoid(update_gate(x))
//! reset  = sigmoid(reset_gate(x))                 (three gates only)
//! cand   = tanh(out_gate(cat(x, prev * reset)))   (three gates)
//! cand   = tanh(out_gate(x))                      (two gates)
//! H_t    = prev * (1 - update) + cand * update
//! y_t    = conv_down(H_t)
//! ```

use burn::{
    module::Ignored,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Initializer,
    },
    prelude::*,
    tensor::activation::{sigmoid, tanh},
};

use super::{
    hidden::init_state_like,
    modules::{default_initializer, zero_bias, ConvBlock, ConvBlockConfig},
    unet::{UNet, UNetConfig},
};
use crate::config::{GateBlock, GateCount, HiddenInit};

/// Transform computing the pre-activation of one gate.
#[derive(Module, Debug)]
pub enum GateTransform<B: Backend> {
    Single(ConvBlock<B>),
    MultiScale(UNet<B>),
}

impl<B: Backend> GateTransform<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Single(block) => block.forward(x),
            Self::MultiScale(unet) => unet.forward(x),
        }
    }
}

/// Configuration for a [`ConvGruCell`].
#[derive(Config, Debug)]
pub struct ConvGruCellConfig {
    /// Gate widths. A single entry selects conv-block gates, more select
    /// U-Net gates over `filters[..gru_level]`.
    pub filters: Vec<usize>,
    pub input_size: usize,
    pub hidden_size: usize,
    pub output_size: usize,
    /// Width count of a U-Net gate.
    #[config(default = 1)]
    pub gru_level: usize,
    #[config(default = "GateCount::Three")]
    pub gate: GateCount,
    #[config(default = "GateBlock::SingleConv")]
    pub structure: GateBlock,
    #[config(default = "HiddenInit::Zeros")]
    pub initial: HiddenInit,
    #[config(default = true)]
    pub is_batchnorm: bool,
    #[config(default = "default_initializer()")]
    pub initializer: Initializer,
}

impl ConvGruCellConfig {
    fn build_gate<B: Backend>(&self, in_channels: usize, device: &Device<B>) -> GateTransform<B> {
        if self.filters.len() > 1 && self.gru_level > 1 {
            GateTransform::MultiScale(
                UNetConfig::new(
                    in_channels,
                    self.hidden_size,
                    self.filters[..self.gru_level].to_vec(),
                )
                .with_is_batchnorm(self.is_batchnorm)
                .with_initializer(self.initializer.clone())
                .init(device),
            )
        } else {
            GateTransform::Single(
                ConvBlockConfig::for_gate(in_channels, self.hidden_size, &self.structure)
                    .with_is_batchnorm(self.is_batchnorm)
                    .with_initializer(self.initializer.clone())
                    .init(device),
            )
        }
    }

    /// Initializes a new [`ConvGruCell`].
    pub fn init<B: Backend>(&self, device: &Device<B>) -> ConvGruCell<B> {
        assert!(
            !self.filters.is_empty() && self.gru_level <= self.filters.len(),
            "gru_level {} exceeds the {} gate widths",
            self.gru_level,
            self.filters.len()
        );

        let (reset_gate, out_gate_input) = if self.gate.has_reset() {
            (
                Some(self.build_gate(self.input_size, device)),
                self.input_size + self.hidden_size,
            )
        } else {
            (None, self.input_size)
        };

        let mut conv_down = Conv2dConfig::new([self.hidden_size, self.output_size], [1, 1])
            .with_initializer(self.initializer.clone())
            .init(device);
        conv_down.bias = zero_bias(conv_down.bias);

        ConvGruCell {
            reset_gate,
            update_gate: self.build_gate(self.input_size, device),
            out_gate: self.build_gate(out_gate_input, device),
            conv_down,
            hidden_size: self.hidden_size,
            initial: Ignored(self.initial.clone()),
        }
    }
}

/// One convolutional GRU cell, applied once per refinement step.
#[derive(Module, Debug)]
pub struct ConvGruCell<B: Backend> {
    /// Absent for the two-gate formulation.
    reset_gate: Option<GateTransform<B>>,
    update_gate: GateTransform<B>,
    out_gate: GateTransform<B>,
    conv_down: Conv2d<B>,
    hidden_size: usize,
    initial: Ignored<HiddenInit>,
}

impl<B: Backend> ConvGruCell<B> {
    /// Runs one GRU step.
    ///
    /// A missing `prev_state` is synthesized with the configured fill policy
    /// as `[batch, hidden_size, height, width]` of `x`.
    ///
    /// Returns `(output, new_state)`.
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
        prev_state: Option<Tensor<B, 4>>,
    ) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let prev =
            prev_state.unwrap_or_else(|| init_state_like(&self.initial, &x, self.hidden_size));

        let update = sigmoid(self.update_gate.forward(x.clone()));
        let candidate_input = match &self.reset_gate {
            Some(reset_gate) => {
                let reset = sigmoid(reset_gate.forward(x.clone()));
                Tensor::cat(vec![x, prev.clone() * reset], 1)
            }
            None => x,
        };
        let candidate = tanh(self.out_gate.forward(candidate_input));

        let state = gru_update(prev, candidate, update);
        (self.conv_down.forward(state.clone()), state)
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn has_reset_gate(&self) -> bool {
        self.reset_gate.is_some()
    }
}

/// Convex blend `prev * (1 - update) + candidate * update`.
pub fn gru_update<B: Backend>(
    prev: Tensor<B, 4>,
    candidate: Tensor<B, 4>,
    update: Tensor<B, 4>,
) -> Tensor<B, 4> {
    prev * (update.clone().neg() + 1.0) + candidate * update
}

#[cfg(test)]
mod tests {
    use burn::tensor::{Distribution, TensorData, Tolerance};

    use super::*;
    use crate::tests::TestBackend;

    fn constant_cell(gate: GateCount) -> ConvGruCell<TestBackend> {
        let device = Default::default();
        ConvGruCellConfig::new(vec![32], 2, 2, 2)
            .with_gate(gate)
            .with_is_batchnorm(false)
            .with_initializer(Initializer::Constant { value: 0.5 })
            .init(&device)
    }

    fn ones_input() -> Tensor<TestBackend, 4> {
        Tensor::ones([1, 2, 1, 1], &Default::default())
    }

    #[test]
    fn three_gate_step_matches_hand_computation() {
        let cell = constant_cell(GateCount::Three);

        // Each gate: relu(0.5 * (1 + 1)) = 1 per channel, prev = 0. Biases
        // start at zero, so conv_down returns the state unchanged.
        let (output, state) = cell.forward(ones_input(), None);

        let expected_state = TensorData::from([[[[0.556_769_9f32]], [[0.556_769_9]]]]);
        let expected_output = expected_state.clone();
        state
            .clone()
            .into_data()
            .assert_approx_eq::<f32>(&expected_state, Tolerance::default());
        output
            .into_data()
            .assert_approx_eq::<f32>(&expected_output, Tolerance::default());

        // Second step: the reset gate now scales a non-zero state.
        let (output, state) = cell.forward(ones_input(), Some(state));

        let expected_state = TensorData::from([[[[0.798_086_6f32]], [[0.798_086_6]]]]);
        let expected_output = expected_state.clone();
        state
            .into_data()
            .assert_approx_eq::<f32>(&expected_state, Tolerance::default());
        output
            .into_data()
            .assert_approx_eq::<f32>(&expected_output, Tolerance::default());
    }

    #[test]
    fn two_gate_candidate_ignores_previous_state() {
        let cell = constant_cell(GateCount::Two);
        assert!(!cell.has_reset_gate());

        let (_, state) = cell.forward(ones_input(), None);
        let (output, state) = cell.forward(ones_input(), Some(state));

        let expected_state = TensorData::from([[[[0.706_508_4f32]], [[0.706_508_4]]]]);
        let expected_output = expected_state.clone();
        state
            .into_data()
            .assert_approx_eq::<f32>(&expected_state, Tolerance::default());
        output
            .into_data()
            .assert_approx_eq::<f32>(&expected_output, Tolerance::default());
    }

    #[test]
    fn synthesized_state_matches_input_geometry() {
        let device = Default::default();
        let cell = ConvGruCellConfig::new(vec![8], 3, 5, 4).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::random([2, 3, 6, 10], Distribution::Default, &device);

        let (output, state) = cell.forward(x, None);

        assert_eq!(state.dims(), [2, 5, 6, 10]);
        assert_eq!(output.dims(), [2, 4, 6, 10]);
        assert_eq!(cell.hidden_size(), 5);
    }

    #[test]
    fn multi_scale_gates_keep_resolution() {
        let device = Default::default();
        let cell = ConvGruCellConfig::new(vec![4, 8, 16], 6, 4, 6)
            .with_gru_level(3)
            .init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::random([1, 6, 8, 8], Distribution::Default, &device);

        let (output, state) = cell.forward(x, None);

        assert_eq!(output.dims(), [1, 6, 8, 8]);
        assert_eq!(state.dims(), [1, 4, 8, 8]);
    }

    #[test]
    fn gru_update_blends_states() {
        let device = Default::default();
        let prev = Tensor::<TestBackend, 4>::from_data([[[[2.0, 2.0]]]], &device);
        let candidate = Tensor::<TestBackend, 4>::from_data([[[[-1.0, -1.0]]]], &device);
        let update = Tensor::<TestBackend, 4>::from_data([[[[0.0, 0.25]]]], &device);

        let expected = TensorData::from([[[[2.0f32, 1.25]]]]);
        gru_update(prev, candidate, update)
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    #[should_panic = "gru_level 3 exceeds the 2 gate widths"]
    fn gru_level_beyond_widths_panics() {
        let device = Default::default();
        let _cell = ConvGruCellConfig::new(vec![4, 8], 2, 2, 2)
            .with_gru_level(3)
            .init::<TestBackend>(&device);
    }
}
