use thiserror::Error;

/// The error type for loss construction.
#[derive(Error, Debug)]
pub enum LossError {
    /// The loss name is not registered in the loss factory.
    #[error("Loss {name} not implemented")]
    NotImplemented {
        /// The name that failed to resolve.
        name: String,
    },

    /// A loss parameter is out of range or missing.
    #[error("Invalid loss parameter: {reason}")]
    InvalidParameter {
        /// The reason why the parameter is invalid.
        reason: String,
    },
}

/// A specialized `Result` type for loss operations.
pub type LossResult<T> = Result<T, LossError>;

impl LossError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            reason: reason.into(),
        }
    }
}
