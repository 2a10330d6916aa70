//! Running summaries of logged scalars
use std::fmt;

/// Running mean, spread and range of a scalar series.
///
/// The mean and variance are updated with Welford's method.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ScalarSummary {
    count: u64,
    mean: f64,
    sum_sq_dev: f64,
    min: f64,
    max: f64,
}

impl Default for ScalarSummary {
    fn default() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            sum_sq_dev: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl ScalarSummary {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.sum_sq_dev += delta * (value - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub const fn count(&self) -> u64 {
        self.count
    }

    pub const fn mean(&self) -> f64 {
        self.mean
    }

    /// Population standard deviation. Zero when empty.
    pub fn stddev(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum_sq_dev / self.count as f64).sqrt()
        }
    }

    /// Smallest and largest value, if any were pushed.
    pub fn range(&self) -> Option<(f64, f64)> {
        (self.count > 0).then(|| (self.min, self.max))
    }
}

impl Extend<f64> for ScalarSummary {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        iter.into_iter().for_each(|value| self.push(value));
    }
}

/// Formats a float in scientific notation when it is very large or very small.
///
/// Optimizer statistics such as KL divergences and residual norms span many orders
/// of magnitude so fixed precision alone would print most of them as zero.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Num(pub f64);

impl fmt::Display for Num {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let abs = self.0.abs();
        if self.0 != 0.0 && !(1e-4..1e6).contains(&abs) {
            fmt::LowerExp::fmt(&self.0, f)
        } else {
            fmt::Display::fmt(&self.0, f)
        }
    }
}
