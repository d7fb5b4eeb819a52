// Copyright (c) 2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Plain configuration data types.
//!
//! These are data only — no argument parsing. Parsing CLI flags or env files
//! into a [`PoolConfig`] is an external concern; a consumer builds one of
//! these however it likes and hands it to [`crate::pool::WorkerPool`].

use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable that, when set to `"1"`, makes [`crate::pool::WorkerPool::new`]
/// log its effective configuration at `debug` level on startup.
pub const DANGEROUS_LOGS_ENV_VAR: &str = "GRAPHILE_ENABLE_DANGEROUS_LOGS";

/// Configuration for a [`crate::pool::WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of workers to supervise. Zero is valid: the listener and
    /// ticker still run, but no jobs are ever dequeued.
    pub concurrency: usize,
    /// If true, the pool never subscribes to the process-wide signal broker.
    pub no_handle_signals: bool,
    /// How long graceful shutdown waits before firing the pool's abort
    /// signal.
    pub graceful_shutdown_abort_timeout: Duration,
    /// Reset-locked ticker scheduling bounds.
    pub reset_locked: ResetLockedConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            no_handle_signals: false,
            graceful_shutdown_abort_timeout: Duration::from_secs(5),
            reset_locked: ResetLockedConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Validates cross-field invariants that cannot be expressed by the
    /// type alone.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.reset_locked.validate()
    }
}

/// Scheduling bounds for the reset-locked ticker.
#[derive(Debug, Clone, Copy)]
pub struct ResetLockedConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl Default for ResetLockedConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(8 * 60),
            max_interval: Duration::from_secs(10 * 60),
        }
    }
}

impl ResetLockedConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_interval.is_zero() {
            return Err(ConfigError::ResetLockedIntervalZero);
        }
        if self.min_interval > self.max_interval {
            return Err(ConfigError::ResetLockedIntervalOrder {
                min: self.min_interval.as_millis() as u64,
                max: self.max_interval.as_millis() as u64,
            });
        }
        Ok(())
    }

    /// The initial delay before the first tick: uniform in
    /// `[0, min(60_000ms, max_interval))`.
    pub fn initial_delay(&self) -> Duration {
        let cap = Duration::from_secs(60).min(self.max_interval);
        if cap.is_zero() {
            return Duration::ZERO;
        }
        let millis = rand::random::<f64>() * cap.as_millis() as f64;
        Duration::from_millis(millis as u64)
    }

    /// The delay for the next tick after the first: uniform in
    /// `[min_interval, max_interval]`, rounded up.
    pub fn next_delay(&self) -> Duration {
        if self.min_interval == self.max_interval {
            return self.min_interval;
        }
        let span = (self.max_interval - self.min_interval).as_millis() as f64;
        let millis = self.min_interval.as_millis() as f64 + rand::random::<f64>() * span;
        Duration::from_millis(millis.ceil() as u64)
    }
}

/// Signals the broker listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermSignal {
    Term,
    Int,
    Usr2,
}

impl TermSignal {
    pub const ALL: [TermSignal; 3] = [TermSignal::Term, TermSignal::Int, TermSignal::Usr2];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_min_greater_than_max() {
        let cfg = ResetLockedConfig {
            min_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(5),
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ResetLockedIntervalOrder {
                min: 10_000,
                max: 5_000
            })
        );
    }

    #[test]
    fn rejects_zero_min() {
        let cfg = ResetLockedConfig {
            min_interval: Duration::ZERO,
            max_interval: Duration::from_secs(5),
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ResetLockedIntervalZero));
    }

    #[test]
    fn min_equals_max_next_delay_is_exact() {
        let cfg = ResetLockedConfig {
            min_interval: Duration::from_secs(30),
            max_interval: Duration::from_secs(30),
        };
        for _ in 0..20 {
            assert_eq!(cfg.next_delay(), Duration::from_secs(30));
        }
    }

    #[test]
    fn next_delay_stays_within_bounds() {
        let cfg = ResetLockedConfig {
            min_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(20),
        };
        for _ in 0..200 {
            let d = cfg.next_delay();
            assert!(d >= cfg.min_interval && d <= cfg.max_interval);
        }
    }

    #[test]
    fn initial_delay_respects_cap() {
        let cfg = ResetLockedConfig {
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
        };
        for _ in 0..200 {
            let d = cfg.initial_delay();
            assert!(d <= Duration::from_secs(30));
        }
    }
}
