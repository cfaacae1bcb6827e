//! # Recurrent U-Net Metrics
//!
//! Validation scores for semantic segmentation.
//!
//! - [`RunningScore`]: confusion matrix accumulated across batches, reporting
//!   overall accuracy, mean class accuracy, frequency-weighted IoU, mean IoU
//!   and per-class IoU and F1.
//! - [`AverageMeter`]: running mean of a scalar such as the loss.
//! - [`predict_classes`]: hard class decisions from raw logits.

mod average_meter;
mod running_score;

pub use average_meter::AverageMeter;
pub use running_score::{predict_classes, RunningScore, Scores};
