//! Smoothed frame-rate estimation over a bounded window of recent frames.

use std::collections::VecDeque;
use std::time::Duration;

/// Default number of recent frames the displayed rate is averaged over.
pub const DEFAULT_WINDOW: usize = 200;

/// Why a duration sample was not recorded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RejectedSample {
    /// Zero-length iteration; its instantaneous rate is undefined.
    Zero,
    /// Negative, NaN or infinite duration.
    NotFinite(f64),
}

/// FIFO window of per-frame rates (`1 / duration`), averaged on demand.
///
/// Samples are evicted oldest-first once the window is full, so the mean
/// always reflects the most recent `capacity` frames.
#[derive(Clone, Debug)]
pub struct FrameRateEstimator {
    rates: VecDeque<f64>,
    capacity: usize,
}

impl FrameRateEstimator {
    /// A zero capacity is clamped to one sample.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            rates: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Records one iteration that took `seconds`.
    ///
    /// Zero and non-finite durations are skipped and reported back; the window
    /// is left untouched in that case.
    pub fn record(&mut self, seconds: f64) -> Result<(), RejectedSample> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(RejectedSample::NotFinite(seconds));
        }
        if seconds == 0.0 {
            return Err(RejectedSample::Zero);
        }
        while self.rates.len() >= self.capacity {
            self.rates.pop_front();
        }
        self.rates.push_back(1.0 / seconds);
        Ok(())
    }

    pub fn record_duration(&mut self, elapsed: Duration) -> Result<(), RejectedSample> {
        self.record(elapsed.as_secs_f64())
    }

    /// Mean of the per-frame rates in the window, or `0.0` when empty.
    pub fn current_rate(&self) -> f64 {
        if self.rates.is_empty() {
            return 0.0;
        }
        self.rates.iter().sum::<f64>() / self.rates.len() as f64
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for FrameRateEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn empty_window_reports_zero() {
        assert_eq!(FrameRateEstimator::default().current_rate(), 0.0);
    }

    #[test]
    fn averages_instantaneous_rates() {
        let mut est = FrameRateEstimator::default();
        for d in [1.0, 0.5, 0.25] {
            est.record(d).unwrap();
        }
        assert!(approx(est.current_rate(), 7.0 / 3.0));
    }

    #[test]
    fn evicts_oldest_sample_first() {
        let mut est = FrameRateEstimator::new(200);
        // A slow first frame followed by 199 frames at 10 fps.
        est.record(1.0).unwrap();
        for _ in 0..199 {
            est.record(0.1).unwrap();
        }
        assert_eq!(est.len(), 200);
        let with_slow = est.current_rate();
        assert!(with_slow < 10.0);

        est.record(0.1).unwrap();
        assert_eq!(est.len(), 200);
        assert!(approx(est.current_rate(), 10.0));
    }

    #[test]
    fn zero_and_invalid_durations_are_skipped() {
        let mut est = FrameRateEstimator::new(4);
        est.record(0.5).unwrap();
        assert_eq!(est.record(0.0), Err(RejectedSample::Zero));
        assert!(matches!(est.record(-1.0), Err(RejectedSample::NotFinite(_))));
        assert!(matches!(
            est.record(f64::NAN),
            Err(RejectedSample::NotFinite(_))
        ));
        assert_eq!(est.len(), 1);
        assert!(approx(est.current_rate(), 2.0));
    }
}
