//! Synthesized recurrent state.

use burn::prelude::*;

use crate::config::HiddenInit;

/// Creates a `[batch, channels, height, width]` state filled per `initial`.
///
/// Used for the first ConvGRU state of a pass and for the initial feedback
/// channels of the input-stacking variant. The tensor lives on `device` and is
/// owned by the caller for the rest of the pass.
pub fn init_hidden_state<B: Backend>(
    initial: &HiddenInit,
    batch: usize,
    channels: usize,
    [height, width]: [usize; 2],
    device: &B::Device,
) -> Tensor<B, 4> {
    initial.tensor([batch, channels, height, width], device)
}

/// [`init_hidden_state`] matching the batch, spatial size and device of `like`.
pub fn init_state_like<B: Backend>(
    initial: &HiddenInit,
    like: &Tensor<B, 4>,
    channels: usize,
) -> Tensor<B, 4> {
    let [batch, _, height, width] = like.dims();
    init_hidden_state(initial, batch, channels, [height, width], &like.device())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn state_follows_input_geometry() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([3, 5, 7, 9], &device);

        let state = init_state_like(&HiddenInit::Zeros, &x, 2);

        assert_eq!(state.dims(), [3, 2, 7, 9]);
        assert_eq!(state.sum().into_scalar(), 0.0);
    }

    #[test]
    fn ones_policy_fills_with_ones() {
        let device = Default::default();
        let state = init_hidden_state::<TestBackend>(&HiddenInit::Ones, 1, 4, [2, 2], &device);

        assert_eq!(state.sum().into_scalar(), 16.0);
    }
}
