//! Data loading for recurrent U-Net training.
//!
//! - `dataset`: the image/label folder dataset, its configuration and the
//!   batcher that turns items into tensors.
//! - `error`: dataset errors.

pub mod dataset;
pub mod error;

pub use dataset::{
    encode_labels, DataConfig, SegmentationBatcher, SegmentationDataset, SegmentationItem,
};
pub use error::{DatasetError, DatasetResult};

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    pub type TestBackend = NdArray;
}
