//! Backlog-driven pull rate
//!
//! The brain pulls one chunk, probes the body's backlog depth `d`, then waits
//! `nominal × f(d)` before the next pull, where
//!
//! ```text
//! f(d) = 1 / (1 + e^(d − π))
//! ```
//!
//! With an empty backlog `f ≈ 0.96`, so the brain polls slightly faster than
//! real time. Around three queued chunks `f = 0.5`, and by ten queued chunks
//! the wait is effectively zero so the backlog drains at network speed.

use std::f64::consts::PI;
use std::time::Duration;

use crate::config::StreamConfig;

/// Logistic correction factor for a backlog of `depth` chunks, in `(0, 1)`
#[must_use]
pub fn correction_factor(depth: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let d = depth as f64;
    1.0 / (1.0 + (d - PI).exp())
}

/// Pull cadence derived from the chunk duration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PullRate {
    nominal: Duration,
}

impl PullRate {
    /// Nominal interval is one chunk's duration scaled by `slack`
    ///
    /// `slack` below one absorbs round-trip overhead so the puller keeps up
    /// with real time.
    #[must_use]
    pub fn new(samples_per_chunk: usize, sample_rate: u32, slack: f64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let chunk_secs = samples_per_chunk as f64 / f64::from(sample_rate.max(1));
        let secs = (chunk_secs * slack).max(0.0);
        Self {
            nominal: Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX),
        }
    }

    /// Interval between pulls at zero correction
    #[must_use]
    pub const fn nominal(&self) -> Duration {
        self.nominal
    }

    /// Wait before the next pull given the observed backlog
    #[must_use]
    pub fn delay(&self, depth: usize) -> Duration {
        self.nominal.mul_f64(correction_factor(depth))
    }
}

impl From<&StreamConfig> for PullRate {
    fn from(config: &StreamConfig) -> Self {
        Self::new(config.samples_per_chunk, config.sample_rate, config.slack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn empty_backlog_polls_near_real_time() {
        assert!(close(correction_factor(0), 0.9586));
    }

    #[test]
    fn deep_backlog_nearly_removes_delay() {
        assert!(close(correction_factor(10), 0.0292));
    }

    #[test]
    fn factor_is_half_at_pi() {
        let at_pi = 1.0 / (1.0 + (PI - PI).exp());
        assert!(close(at_pi, 0.5));
        assert!(correction_factor(3) > 0.5);
        assert!(correction_factor(4) < 0.5);
    }

    #[test]
    fn factor_decreases_with_depth() {
        let factors: Vec<f64> = (0..50).map(correction_factor).collect();
        assert!(factors.windows(2).all(|w| w[0] > w[1]));
        assert!(factors.iter().all(|f| *f > 0.0 && *f < 1.0));
    }

    #[test]
    fn nominal_interval_defaults() {
        let rate = PullRate::new(1365, 16_000, 0.8);
        let expected = 1365.0 / 16_000.0 * 0.8;
        assert!(close(rate.nominal().as_secs_f64(), expected));
    }

    #[test]
    fn delay_scales_nominal() {
        let rate = PullRate::new(1600, 16_000, 1.0);
        assert!(close(rate.delay(0).as_secs_f64(), 0.1 * correction_factor(0)));
        assert!(rate.delay(10) < rate.delay(0));
    }

    #[test]
    fn out_of_range_slack_does_not_panic() {
        assert_eq!(PullRate::new(1365, 16_000, 1e300).nominal(), Duration::MAX);
        assert_eq!(PullRate::new(1365, 16_000, -1.0).nominal(), Duration::ZERO);
    }

    #[test]
    fn from_stream_config() {
        let rate = PullRate::from(&StreamConfig::default());
        assert_eq!(rate, PullRate::new(1365, 16_000, 0.8));
    }
}
