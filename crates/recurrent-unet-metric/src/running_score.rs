//! Running confusion-matrix scores.
//!
//! The matrix is accumulated on the host across validation batches; rows index
//! the ground-truth class, columns the predicted class.

use core::fmt;

use burn::tensor::{backend::Backend, Int, Tensor};

/// Summary scores of a [`RunningScore`].
///
/// Class averages skip classes that never occur in either the labels or the
/// predictions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scores {
    /// Fraction of correctly classified pixels.
    pub overall_acc: f64,
    /// Per-class pixel accuracy averaged over classes.
    pub mean_acc: f64,
    /// IoU weighted by ground-truth class frequency.
    pub freq_weighted_acc: f64,
    /// IoU averaged over classes.
    pub mean_iou: f64,
}

impl fmt::Display for Scores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Overall Acc: {:.4}, Mean Acc: {:.4}, FreqW Acc: {:.4}, Mean IoU: {:.4}",
            self.overall_acc, self.mean_acc, self.freq_weighted_acc, self.mean_iou
        )
    }
}

/// Confusion matrix accumulated over many batches.
#[derive(Debug, Clone)]
pub struct RunningScore {
    n_classes: usize,
    confusion: Vec<u64>,
}

impl RunningScore {
    pub fn new(n_classes: usize) -> Self {
        assert!(n_classes > 0, "RunningScore needs at least one class");
        Self {
            n_classes,
            confusion: vec![0; n_classes * n_classes],
        }
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Adds a batch of flattened labels and predictions.
    ///
    /// Pixels whose label is outside `0..n_classes` (such as an ignore index)
    /// are skipped, as are out-of-range predictions.
    pub fn update(&mut self, labels: &[i64], predictions: &[i64]) {
        assert_eq!(
            labels.len(),
            predictions.len(),
            "labels and predictions must have the same number of pixels"
        );
        let n = self.n_classes as i64;
        for (&gt, &pred) in labels.iter().zip(predictions) {
            if (0..n).contains(&gt) && (0..n).contains(&pred) {
                self.confusion[(gt * n + pred) as usize] += 1;
            }
        }
    }

    /// Adds a batch of `[batch, height, width]` label and prediction maps.
    pub fn update_tensors<B: Backend>(
        &mut self,
        labels: Tensor<B, 3, Int>,
        predictions: Tensor<B, 3, Int>,
    ) {
        let labels: Vec<i64> = labels.into_data().iter::<i64>().collect();
        let predictions: Vec<i64> = predictions.into_data().iter::<i64>().collect();
        self.update(&labels, &predictions);
    }

    /// Count of pixels with label `gt` predicted as `pred`.
    pub fn count(&self, gt: usize, pred: usize) -> u64 {
        self.confusion[gt * self.n_classes + pred]
    }

    /// Returns the summary scores, the per-class IoU and the per-class F1.
    ///
    /// Per-class entries are `NaN` for classes absent from both labels and
    /// predictions.
    pub fn get_scores(&self) -> (Scores, Vec<f64>, Vec<f64>) {
        let n = self.n_classes;
        let tp: Vec<f64> = (0..n).map(|c| self.count(c, c) as f64).collect();
        let gt_total: Vec<f64> = (0..n)
            .map(|c| (0..n).map(|p| self.count(c, p)).sum::<u64>() as f64)
            .collect();
        let pred_total: Vec<f64> = (0..n)
            .map(|c| (0..n).map(|g| self.count(g, c)).sum::<u64>() as f64)
            .collect();
        let total: f64 = gt_total.iter().sum();

        let class_acc: Vec<f64> = (0..n).map(|c| tp[c] / gt_total[c]).collect();
        let class_iou: Vec<f64> = (0..n)
            .map(|c| tp[c] / (gt_total[c] + pred_total[c] - tp[c]))
            .collect();
        let class_f1: Vec<f64> = (0..n)
            .map(|c| 2.0 * tp[c] / (gt_total[c] + pred_total[c]))
            .collect();

        let freq_weighted_acc = (0..n)
            .filter(|&c| gt_total[c] > 0.0)
            .map(|c| gt_total[c] / total * class_iou[c])
            .sum();

        let scores = Scores {
            overall_acc: tp.iter().sum::<f64>() / total,
            mean_acc: nan_mean(&class_acc),
            freq_weighted_acc,
            mean_iou: nan_mean(&class_iou),
        };
        (scores, class_iou, class_f1)
    }

    pub fn reset(&mut self) {
        self.confusion.fill(0);
    }
}

/// Mean of the non-NaN values, `NaN` when there are none.
fn nan_mean(values: &[f64]) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Hard class decisions from raw logits.
///
/// Multi-channel logits take the arg-max over channels; a single foreground
/// channel is thresholded at zero.
///
/// # Shapes
///
/// - logits: `[batch, channels, height, width]`
/// - output: `[batch, height, width]`
pub fn predict_classes<B: Backend>(logits: Tensor<B, 4>) -> Tensor<B, 3, Int> {
    let [batch, channels, height, width] = logits.dims();
    let classes = if channels == 1 {
        logits.greater_elem(0.0).int()
    } else {
        logits.argmax(1)
    };
    classes.reshape([batch, height, width])
}
