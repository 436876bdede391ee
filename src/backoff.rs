//! Exponential backoff timer with jitter.
//!
//! Jitter keeps many clients that failed at the same moment from retrying in
//! lockstep. Every delay produced stays within `[initial_delay, max_delay]`.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::{RestError, Result};

/// Base of the exponent (Euler's number).
pub const DEFAULT_GROW_FACTOR: f64 = std::f64::consts::E;
/// Default upward jitter applied to each delay.
pub const DEFAULT_JITTER_FACTOR: f64 = 0.119_626_564_72;

/// Below this jitter factor growth is deterministic.
const JITTER_EPSILON: f64 = 0.000_01;

/// Parameters of an [`ExponentialBackoff`], in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackoffConfig {
    pub initial_delay_ms: f64,
    pub max_delay_ms: f64,
    pub grow_factor: f64,
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000.0,
            max_delay_ms: 300_000.0,
            grow_factor: DEFAULT_GROW_FACTOR,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl BackoffConfig {
    /// Config with the default grow and jitter factors.
    pub fn new(initial_delay_ms: f64, max_delay_ms: f64) -> Self {
        Self {
            initial_delay_ms,
            max_delay_ms,
            ..Self::default()
        }
    }

    pub fn with_grow_factor(mut self, grow_factor: f64) -> Self {
        self.grow_factor = grow_factor;
        self
    }

    pub fn with_jitter_factor(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    fn validate(&self) -> Result<()> {
        // Negated comparisons so NaN is rejected too.
        if !(self.initial_delay_ms > 0.0 && self.initial_delay_ms.is_finite()) {
            return Err(invalid("initial delay must be positive and finite"));
        }
        if !(self.max_delay_ms > 0.0 && self.max_delay_ms.is_finite()) {
            return Err(invalid("delay upper bound must be positive and finite"));
        }
        if !(self.grow_factor >= 0.0 && self.grow_factor.is_finite()) {
            return Err(invalid("grow factor must be non-negative and finite"));
        }
        if !(self.jitter_factor >= 0.0 && self.jitter_factor.is_finite()) {
            return Err(invalid("jitter factor must be non-negative and finite"));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(invalid("initial delay must not exceed the delay upper bound"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> RestError {
    RestError::InvalidConfiguration(message.to_owned())
}

/// Stateful retry delay calculator owned by a single logical request.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current_delay: f64,
    increment_count: u32,
}

impl Default for ExponentialBackoff {
    /// One second initial delay, five minute ceiling.
    fn default() -> Self {
        let config = BackoffConfig::default();
        let mut backoff = Self {
            config,
            current_delay: config.initial_delay_ms,
            increment_count: 0,
        };
        backoff.reset();
        backoff
    }
}

impl ExponentialBackoff {
    /// Validates `config` and resets the timer.
    pub fn new(config: BackoffConfig) -> Result<Self> {
        config.validate()?;
        let mut backoff = Self {
            config,
            current_delay: config.initial_delay_ms,
            increment_count: 0,
        };
        backoff.reset();
        Ok(backoff)
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Restarts the sequence. The first delay gets a small upward jitter
    /// instead of being exactly `initial_delay_ms`.
    pub fn reset(&mut self) {
        self.increment_count = 0;
        let jitter = rand::thread_rng().gen::<f64>() * self.config.jitter_factor + 1.0;
        self.current_delay = self.clamp((self.config.initial_delay_ms * jitter).round());
    }

    /// Current delay in milliseconds.
    pub fn current_delay_ms(&self) -> f64 {
        self.current_delay
    }

    /// Current delay as a [`Duration`], saturating at [`Duration::MAX`].
    pub fn current_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.current_delay / 1_000.0).unwrap_or(Duration::MAX)
    }

    /// Number of `advance` calls since the last reset.
    pub fn increment_count(&self) -> u32 {
        self.increment_count
    }

    /// Grows the delay, applies jitter, and returns the new delay in milliseconds.
    pub fn advance(&mut self) -> f64 {
        let delay = (self.current_delay * self.config.grow_factor).min(self.config.max_delay_ms);

        let next = if self.config.jitter_factor < JITTER_EPSILON {
            delay
        } else {
            (rand::thread_rng().gen::<f64>() * delay * self.config.jitter_factor + delay).round()
        };

        self.current_delay = self.clamp(next);
        self.increment_count += 1;
        self.current_delay
    }

    /// Returns the delay to wait now and primes the timer with the next one.
    pub fn take_current_and_advance(&mut self) -> Duration {
        let current = self.current_delay();
        self.advance();
        current
    }

    fn clamp(&self, delay: f64) -> f64 {
        delay
            .max(self.config.initial_delay_ms)
            .min(self.config.max_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{BackoffConfig, ExponentialBackoff};
    use crate::RestError;

    #[test]
    fn rejects_invalid_parameters() {
        let cases = [
            BackoffConfig::new(0.0, 100.0),
            BackoffConfig::new(10.0, -1.0),
            BackoffConfig::new(10.0, 100.0).with_grow_factor(-0.5),
            BackoffConfig::new(10.0, 100.0).with_jitter_factor(-0.1),
            BackoffConfig::new(f64::NAN, 100.0),
            BackoffConfig::new(200.0, 100.0),
            BackoffConfig::new(f64::INFINITY, f64::INFINITY),
            BackoffConfig::new(10.0, f64::INFINITY),
            BackoffConfig::new(10.0, 100.0).with_grow_factor(f64::INFINITY),
            BackoffConfig::new(10.0, 100.0).with_jitter_factor(f64::INFINITY),
        ];
        for config in cases {
            let err = ExponentialBackoff::new(config).expect_err("config must be rejected");
            assert!(matches!(err, RestError::InvalidConfiguration(_)), "{config:?}");
        }
    }

    #[test]
    fn delays_stay_within_bounds() {
        let configs = [
            BackoffConfig::new(100.0, 5_000.0),
            BackoffConfig::new(1.0, 2.0).with_jitter_factor(3.0),
            BackoffConfig::new(50.0, 50.0),
            BackoffConfig::new(10.0, 1_000.0).with_grow_factor(0.0),
            BackoffConfig::new(10.0, 1_000.0).with_grow_factor(0.5),
        ];
        for config in configs {
            let mut backoff = ExponentialBackoff::new(config).expect("valid config");
            for _ in 0..50 {
                let delay = backoff.advance();
                assert!(delay >= config.initial_delay_ms, "{config:?}: {delay}");
                assert!(delay <= config.max_delay_ms, "{config:?}: {delay}");
            }
        }
    }

    #[test]
    fn zero_jitter_grows_deterministically() {
        let config = BackoffConfig::new(10.0, 10_000.0)
            .with_grow_factor(3.0)
            .with_jitter_factor(0.0);
        let mut backoff = ExponentialBackoff::new(config).expect("valid config");
        assert_eq!(backoff.current_delay_ms(), 10.0);

        let produced: Vec<f64> = (0..8).map(|_| backoff.advance()).collect();
        let expected: Vec<f64> = (1..=8)
            .map(|n| (10.0 * 3f64.powi(n)).min(10_000.0))
            .collect();
        assert_eq!(produced, expected);
        assert_eq!(backoff.increment_count(), 8);
    }

    #[test]
    fn reset_restores_count_and_initial_window() {
        let config = BackoffConfig::new(1_000.0, 60_000.0).with_jitter_factor(0.25);
        let mut backoff = ExponentialBackoff::new(config).expect("valid config");
        for _ in 0..5 {
            backoff.advance();
        }
        backoff.reset();

        assert_eq!(backoff.increment_count(), 0);
        let delay = backoff.current_delay_ms();
        assert!((1_000.0..=1_250.0).contains(&delay), "{delay}");
    }

    #[test]
    fn take_current_returns_delay_before_advancing() {
        let config = BackoffConfig::new(100.0, 10_000.0)
            .with_grow_factor(2.0)
            .with_jitter_factor(0.0);
        let mut backoff = ExponentialBackoff::new(config).expect("valid config");

        assert_eq!(backoff.take_current_and_advance().as_millis(), 100);
        assert_eq!(backoff.take_current_and_advance().as_millis(), 200);
        assert_eq!(backoff.current_delay_ms(), 400.0);
        assert_eq!(backoff.increment_count(), 2);
    }

    #[test]
    fn huge_upper_bound_saturates_duration() {
        let mut backoff =
            ExponentialBackoff::new(BackoffConfig::new(1.0, 1e30)).expect("valid config");
        let mut last = Duration::ZERO;
        for _ in 0..200 {
            let delay = backoff.take_current_and_advance();
            assert!(delay >= last, "{delay:?} < {last:?}");
            last = delay;
        }
        assert_eq!(backoff.current_delay_ms(), 1e30);
        assert_eq!(backoff.current_delay(), Duration::MAX);
    }
}
