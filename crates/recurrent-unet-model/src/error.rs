use thiserror::Error;

/// The error type for model construction.
///
/// Every variant is raised while resolving a configuration, before any module
/// is allocated, so a failed build never leaves a partially constructed model.
#[derive(Error, Debug)]
pub enum ModelError {
    /// The requested architecture name is not registered in the model factory.
    #[error("Unknown architecture: {arch}")]
    UnknownArchitecture {
        /// The name that failed to resolve.
        arch: String,
    },

    /// The configuration violates a structural invariant.
    #[error("Invalid model configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },
}

/// A specialized `Result` type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

impl ModelError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}
