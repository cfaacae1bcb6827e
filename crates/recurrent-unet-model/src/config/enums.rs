//! Enumeration types for recurrent U-Net configuration.

use burn::{prelude::*, tensor::ops::InterpolateMode};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};

/// Either the integer flag of an experiment file or a variant name.
#[derive(Deserialize)]
#[serde(untagged)]
enum FlagOrName {
    Flag(i64),
    Name(String),
}

/// Number of gates in the convolutional GRU.
///
/// Deserializes from `2`/`3` as well as `"Two"`/`"Three"`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum GateCount {
    /// Update and candidate gates only. The candidate sees the raw input.
    Two,
    /// Reset, update and candidate gates. The candidate sees `cat(x, h * reset)`.
    Three,
}

impl GateCount {
    /// Maps the numeric gate count used in experiment files.
    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            2 => Some(Self::Two),
            3 => Some(Self::Three),
            _ => None,
        }
    }

    pub const fn has_reset(&self) -> bool {
        matches!(self, Self::Three)
    }
}

impl<'de> Deserialize<'de> for GateCount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match FlagOrName::deserialize(deserializer)? {
            FlagOrName::Flag(count) => usize::try_from(count)
                .ok()
                .and_then(Self::from_count)
                .ok_or_else(|| D::Error::custom(format!("gate count must be 2 or 3, got {count}"))),
            FlagOrName::Name(name) => match name.as_str() {
                "Two" => Ok(Self::Two),
                "Three" => Ok(Self::Three),
                other => Err(D::Error::unknown_variant(other, &["Two", "Three"])),
            },
        }
    }
}

/// Fill value for a synthesized hidden state or feedback channel.
///
/// Deserializes from the flags `0`/`1` as well as `"Zeros"`/`"Ones"`.
/// Unrecognized values fall back to [`HiddenInit::Ones`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum HiddenInit {
    /// All-zeros state.
    Zeros,
    /// All-ones state.
    Ones,
}

impl HiddenInit {
    /// Maps the integer flag of experiment files (`0` or `1`).
    ///
    /// Any other value falls back to [`HiddenInit::Ones`].
    pub fn from_flag(flag: i64) -> Self {
        match flag {
            0 => Self::Zeros,
            1 => Self::Ones,
            other => {
                tracing::warn!(flag = other, "unrecognized hidden-state init flag, using ones");
                Self::Ones
            }
        }
    }

    /// Maps a variant name, case-insensitively.
    ///
    /// Any other name falls back to [`HiddenInit::Ones`].
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("zeros") {
            Self::Zeros
        } else if name.eq_ignore_ascii_case("ones") {
            Self::Ones
        } else {
            tracing::warn!(name, "unrecognized hidden-state init, using ones");
            Self::Ones
        }
    }

    /// Creates a tensor of `shape` on `device` filled according to this policy.
    pub fn tensor<B: Backend>(&self, shape: [usize; 4], device: &B::Device) -> Tensor<B, 4> {
        match self {
            Self::Zeros => Tensor::zeros(shape, device),
            Self::Ones => Tensor::ones(shape, device),
        }
    }
}

impl<'de> Deserialize<'de> for HiddenInit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match FlagOrName::deserialize(deserializer)? {
            FlagOrName::Flag(flag) => Self::from_flag(flag),
            FlagOrName::Name(name) => Self::from_name(&name),
        })
    }
}

/// Resize mode of interpolating upsamplers.
///
/// Burn implements the backward pass of nearest interpolation only, so
/// `Bilinear` is limited to inference.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum InterpolationStrategy {
    /// Smoother output, forward only.
    Bilinear,
    /// Differentiable on every backend.
    Nearest,
}

impl InterpolationStrategy {
    pub const fn mode(&self) -> InterpolateMode {
        match self {
            Self::Bilinear => InterpolateMode::Bilinear,
            Self::Nearest => InterpolateMode::Nearest,
        }
    }
}

/// Convolution block used as a single-scale GRU gate.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum GateBlock {
    /// One conv-BN-ReLU layer (the classic ConvGRU gate).
    SingleConv,
    /// Two stacked conv-BN-ReLU layers.
    DoubleConv,
}

/// Channel layout of a prediction.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// One logit channel per class.
    MultiClass,
    /// One channel fewer than the class count, e.g. a single foreground
    /// logit for two-class problems.
    Binary,
}

impl OutputMode {
    /// Number of prediction channels for `n_classes` classes.
    pub const fn channels(&self, n_classes: usize) -> usize {
        match self {
            Self::MultiClass => n_classes,
            Self::Binary => n_classes.saturating_sub(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn hidden_init_flag_mapping() {
        assert_eq!(HiddenInit::from_flag(0), HiddenInit::Zeros);
        assert_eq!(HiddenInit::from_flag(1), HiddenInit::Ones);
        assert_eq!(HiddenInit::from_flag(7), HiddenInit::Ones);
    }

    #[test]
    fn hidden_init_fills_requested_shape() {
        let device = Default::default();
        let zeros = HiddenInit::Zeros.tensor::<TestBackend>([2, 3, 4, 5], &device);
        let ones = HiddenInit::Ones.tensor::<TestBackend>([2, 3, 4, 5], &device);

        assert_eq!(zeros.dims(), [2, 3, 4, 5]);
        assert_eq!(zeros.sum().into_scalar(), 0.0);
        assert_eq!(ones.sum().into_scalar(), 120.0);
    }

    #[test]
    fn output_mode_channels() {
        assert_eq!(OutputMode::MultiClass.channels(2), 2);
        assert_eq!(OutputMode::Binary.channels(2), 1);
        assert_eq!(OutputMode::Binary.channels(0), 0);
    }

    #[test]
    fn hidden_init_name_mapping() {
        assert_eq!(HiddenInit::from_name("zeros"), HiddenInit::Zeros);
        assert_eq!(HiddenInit::from_name("Ones"), HiddenInit::Ones);
        assert_eq!(HiddenInit::from_name("random"), HiddenInit::Ones);
    }

    #[test]
    fn flags_and_names_deserialize() {
        let gate: GateCount = serde_json::from_str("3").expect("numeric gate count");
        assert_eq!(gate, GateCount::Three);
        let gate: GateCount = serde_json::from_str(r#""Two""#).expect("named gate count");
        assert_eq!(gate, GateCount::Two);
        assert!(serde_json::from_str::<GateCount>("4").is_err());
        assert!(serde_json::from_str::<GateCount>(r#""Four""#).is_err());

        let initial: HiddenInit = serde_json::from_str("0").expect("numeric init flag");
        assert_eq!(initial, HiddenInit::Zeros);
        let initial: HiddenInit = serde_json::from_str("5").expect("unknown flags fall back");
        assert_eq!(initial, HiddenInit::Ones);
        let initial: HiddenInit = serde_json::from_str(r#""Zeros""#).expect("named init");
        assert_eq!(initial, HiddenInit::Zeros);
    }

    #[test]
    fn serialized_names_round_trip() {
        let json = serde_json::to_string(&GateCount::Three).expect("serializable");
        assert_eq!(json, r#""Three""#);
        let gate: GateCount = serde_json::from_str(&json).expect("deserializable");
        assert_eq!(gate, GateCount::Three);
    }

    #[test]
    fn gate_count_from_numeric() {
        assert_eq!(GateCount::from_count(2), Some(GateCount::Two));
        assert_eq!(GateCount::from_count(3), Some(GateCount::Three));
        assert_eq!(GateCount::from_count(4), None);
        assert!(GateCount::Three.has_reset());
        assert!(!GateCount::Two.has_reset());
    }
}
