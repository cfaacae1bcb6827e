/// Running average of a scalar such as the loss or the step time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AverageMeter {
    /// Most recent value.
    pub val: f64,
    pub sum: f64,
    pub count: usize,
    pub avg: f64,
}

impl AverageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `val` observed `n` times.
    pub fn update(&mut self, val: f64, n: usize) {
        self.val = val;
        self.sum += val * n as f64;
        self.count += n;
        if self.count > 0 {
            self.avg = self.sum / self.count as f64;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_is_weighted_by_count() {
        let mut meter = AverageMeter::new();
        meter.update(1.0, 1);
        meter.update(4.0, 3);

        assert_eq!(meter.val, 4.0);
        assert_eq!(meter.count, 4);
        assert_eq!(meter.avg, 13.0 / 4.0);
    }

    #[test]
    fn zero_count_update_keeps_average() {
        let mut meter = AverageMeter::new();
        meter.update(2.0, 2);
        meter.update(10.0, 0);

        assert_eq!(meter.avg, 2.0);
        assert_eq!(meter.val, 10.0);

        meter.reset();
        assert_eq!(meter, AverageMeter::default());
    }
}
