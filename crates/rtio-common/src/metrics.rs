//! Slack metrics collection.
//!
//! Records the slack (cursor minus live counter) observed at every emission
//! in a ring buffer, without heap allocations after construction.

use crate::time::Mu;
use serde::Serialize;

/// Slack statistics with ring buffer for percentile queries.
#[derive(Debug)]
pub struct SlackMetrics {
    /// Ring buffer of slack samples in mu.
    samples: Box<[Mu]>,
    /// Current write position in the ring buffer.
    write_pos: usize,
    /// Number of samples held (saturates at buffer size).
    sample_count: usize,
    /// Total samples recorded.
    total_samples: u64,
    /// Minimum observed slack.
    min: Mu,
    /// Maximum observed slack.
    max: Mu,
    /// Sum of all samples for the mean.
    sum: i128,
    /// Samples whose slack exceeded `fill_bound`.
    overfill_count: u64,
    /// Emissions rejected because the counter had passed the cursor.
    underflow_count: u64,
    /// Cursor resets issued to widen slack.
    break_count: u64,
    /// Upper slack bound; larger samples count as overfill.
    fill_bound: Mu,
}

impl SlackMetrics {
    /// Create a collector holding `histogram_size` samples.
    ///
    /// # Arguments
    ///
    /// * `histogram_size` - Number of samples to retain in the ring buffer.
    /// * `fill_bound` - Slack above this value counts as queue overfill.
    #[must_use]
    pub fn new(histogram_size: usize, fill_bound: Mu) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total_samples: 0,
            min: Mu::MAX,
            max: Mu::MIN,
            sum: 0,
            overfill_count: 0,
            underflow_count: 0,
            break_count: 0,
            fill_bound,
        }
    }

    /// Record the slack seen by one emission.
    pub fn record(&mut self, slack: Mu) {
        self.samples[self.write_pos] = slack;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.total_samples += 1;
        self.min = self.min.min(slack);
        self.max = self.max.max(slack);
        self.sum += i128::from(slack);

        if slack > self.fill_bound {
            self.overfill_count += 1;
        }
    }

    /// Count a rejected emission.
    pub fn record_underflow(&mut self) {
        self.underflow_count += 1;
    }

    /// Count a cursor reset.
    pub fn record_break(&mut self) {
        self.break_count += 1;
    }

    /// Total samples recorded.
    #[must_use]
    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Minimum observed slack.
    #[must_use]
    pub fn min(&self) -> Option<Mu> {
        (self.total_samples > 0).then_some(self.min)
    }

    /// Maximum observed slack.
    #[must_use]
    pub fn max(&self) -> Option<Mu> {
        (self.total_samples > 0).then_some(self.max)
    }

    /// Mean slack.
    #[must_use]
    pub fn mean(&self) -> Option<Mu> {
        if self.total_samples == 0 {
            return None;
        }
        Mu::try_from(self.sum / i128::from(self.total_samples)).ok()
    }

    /// Samples above the fill bound.
    #[must_use]
    pub fn overfill_count(&self) -> u64 {
        self.overfill_count
    }

    /// Rejected emissions.
    #[must_use]
    pub fn underflow_count(&self) -> u64 {
        self.underflow_count
    }

    /// Cursor resets.
    #[must_use]
    pub fn break_count(&self) -> u64 {
        self.break_count
    }

    /// Configured fill bound.
    #[must_use]
    pub fn fill_bound(&self) -> Mu {
        self.fill_bound
    }

    /// Compute a percentile (0.0 to 100.0) over the retained samples.
    ///
    /// Returns `None` with no samples or an out-of-range percentile.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn percentile(&self, percentile: f64) -> Option<Mu> {
        if self.sample_count == 0 || !(0.0..=100.0).contains(&percentile) {
            return None;
        }

        let mut sorted: Vec<Mu> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        let idx = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    /// Get a snapshot of current metrics.
    #[must_use]
    pub fn snapshot(&self) -> SlackSnapshot {
        SlackSnapshot {
            total_samples: self.total_samples,
            min: self.min(),
            max: self.max(),
            mean: self.mean(),
            overfill_count: self.overfill_count,
            underflow_count: self.underflow_count,
            break_count: self.break_count,
        }
    }

    /// Reset all metrics, keeping the fill bound.
    pub fn reset(&mut self) {
        self.samples.fill(0);
        self.write_pos = 0;
        self.sample_count = 0;
        self.total_samples = 0;
        self.min = Mu::MAX;
        self.max = Mu::MIN;
        self.sum = 0;
        self.overfill_count = 0;
        self.underflow_count = 0;
        self.break_count = 0;
    }
}

/// Immutable snapshot of slack metrics for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlackSnapshot {
    /// Total samples recorded.
    pub total_samples: u64,
    /// Minimum slack in mu.
    pub min: Option<Mu>,
    /// Maximum slack in mu.
    pub max: Option<Mu>,
    /// Mean slack in mu.
    pub mean: Option<Mu>,
    /// Samples above the fill bound.
    pub overfill_count: u64,
    /// Rejected emissions.
    pub underflow_count: u64,
    /// Cursor resets.
    pub break_count: u64,
}
