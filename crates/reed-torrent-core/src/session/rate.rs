// SPDX-License-Identifier: AGPL-3.0
// Reed Torrent Core - Rate estimation
//
// Rates are the delta between the last two samples. Only the previous
// sample is kept, so an entry costs the same no matter how long it lives.

use chrono::{DateTime, Utc};

/// Throughput between two byte-count samples, in bytes per second.
///
/// Returns `None` when no time has passed between the samples (or the clock
/// went backwards); the caller keeps whatever rate it had. A shrinking byte
/// count yields zero.
pub fn compute_rate(
    previous_bytes: u64,
    previous_at: DateTime<Utc>,
    current_bytes: u64,
    current_at: DateTime<Utc>,
) -> Option<u64> {
    let elapsed = (current_at - previous_at).to_std().ok()?;
    if elapsed.is_zero() {
        return None;
    }

    let delta = current_bytes.saturating_sub(previous_bytes);
    Some((delta as f64 / elapsed.as_secs_f64()) as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sample {
    bytes: u64,
    at: DateTime<Utc>,
}

/// Per-counter rate state for one entry
#[derive(Debug, Clone, Default)]
pub struct RateEstimator {
    baseline: Option<Sample>,
    rate: u64,
}

impl RateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last computed rate
    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Feed a new sample and return the updated rate
    pub fn sample(&mut self, bytes: u64, at: DateTime<Utc>) -> u64 {
        let Some(previous) = self.baseline else {
            self.baseline = Some(Sample { bytes, at });
            self.rate = 0;
            return 0;
        };

        if let Some(rate) = compute_rate(previous.bytes, previous.at, bytes, at) {
            self.rate = rate;
            self.baseline = Some(Sample { bytes, at });
        }

        self.rate
    }

    /// Forget history; the next sample becomes the new baseline
    pub fn reset(&mut self) {
        self.baseline = None;
        self.rate = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_rate_over_one_second() {
        let rate = compute_rate(0, t0(), 100_000, t0() + TimeDelta::seconds(1));
        assert_eq!(rate, Some(100_000));
    }

    #[test]
    fn test_rate_over_fractional_interval() {
        let rate = compute_rate(0, t0(), 50_000, t0() + TimeDelta::milliseconds(500));
        assert_eq!(rate, Some(100_000));
    }

    #[test]
    fn test_negative_delta_is_zero() {
        let rate = compute_rate(5_000, t0(), 1_000, t0() + TimeDelta::seconds(1));
        assert_eq!(rate, Some(0));
    }

    #[test]
    fn test_no_elapsed_time_keeps_previous() {
        assert_eq!(compute_rate(0, t0(), 10, t0()), None);
        assert_eq!(compute_rate(0, t0(), 10, t0() - TimeDelta::seconds(1)), None);
    }

    #[test]
    fn test_first_sample_is_zero() {
        let mut estimator = RateEstimator::new();
        assert_eq!(estimator.sample(4_096, t0()), 0);
    }

    #[test]
    fn test_same_tick_retains_rate() {
        let mut estimator = RateEstimator::new();
        estimator.sample(0, t0());
        let later = t0() + TimeDelta::seconds(2);
        assert_eq!(estimator.sample(20_000, later), 10_000);
        assert_eq!(estimator.sample(90_000, later), 10_000);
        // baseline stayed at the first sample of that tick
        assert_eq!(
            estimator.sample(30_000, later + TimeDelta::seconds(1)),
            10_000
        );
    }

    #[test]
    fn test_reset_drops_baseline() {
        let mut estimator = RateEstimator::new();
        estimator.sample(0, t0());
        estimator.sample(10_000, t0() + TimeDelta::seconds(1));
        estimator.reset();
        assert_eq!(estimator.rate(), 0);

        // a long gap after reset must not show up as a rate
        let resumed = t0() + TimeDelta::hours(1);
        assert_eq!(estimator.sample(500_000, resumed), 0);
        assert_eq!(
            estimator.sample(510_000, resumed + TimeDelta::seconds(1)),
            10_000
        );
    }
}
