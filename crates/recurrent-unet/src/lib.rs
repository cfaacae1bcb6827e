//! Recurrent U-Net semantic segmentation.
//!
//! Training driver, checkpoint bundle and backend selection on top of the
//! model, loss, metric and data crates, which are re-exported here.

pub mod backend;
pub mod checkpoint;
pub mod training;

#[doc(inline)]
pub use recurrent_unet_loss as loss;
#[doc(inline)]
pub use recurrent_unet_metric as metric;
#[doc(inline)]
pub use recurrent_unet_model as model;
#[doc(inline)]
pub use recurrent_unet_train as train;
