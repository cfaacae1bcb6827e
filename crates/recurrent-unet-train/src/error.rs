//! Error types for dataset discovery and loading.

use std::path::PathBuf;

use thiserror::Error;

/// Error type for dataset operations.
#[derive(Error, Debug)]
pub enum DatasetError {
    /// Error when walking a dataset directory fails.
    #[error("Failed to read directory: {path}")]
    DirectoryReadFailed {
        /// The directory path that failed to read.
        path: PathBuf,
        /// The underlying walk error.
        #[source]
        source: walkdir::Error,
    },

    /// Error when the image directory of a split is missing.
    #[error("Image directory not found: {path}")]
    ImageDirectoryNotFound {
        /// The expected image directory path.
        path: PathBuf,
    },

    /// Error when the label directory of a split is missing.
    #[error("Label directory not found: {path}")]
    LabelDirectoryNotFound {
        /// The expected label directory path.
        path: PathBuf,
    },

    /// Error when no image/label pairs are found for a split.
    #[error("No valid image/label pairs found in: {path}")]
    NoValidPairs {
        /// The directory where no pairs were found.
        path: PathBuf,
    },

    /// Error when opening or decoding an image file fails.
    #[error("Failed to open image: {path}")]
    ImageOpenFailed {
        /// The image file path that failed to open.
        path: PathBuf,
        /// The underlying image processing error.
        #[source]
        source: image::ImageError,
    },

    /// Error when a file has no usable stem.
    #[error("File has no valid UTF-8 stem: {path}")]
    InvalidFileStem {
        /// The offending file path.
        path: PathBuf,
    },

    /// Error when the data configuration is unusable.
    #[error("Invalid data configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },
}

/// A specialized `Result` type for dataset operations.
pub type DatasetResult<T> = Result<T, DatasetError>;
