//! Reconnection backoff
//!
//! Consecutive reconnect attempts for a robot are spaced with exponential
//! backoff; a connection that reaches CONNECTED resets the attempt counter.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnection policy configuration
///
/// Controls how reconnection attempts are spaced when a connection fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionPolicy {
    /// Maximum number of reconnection attempts (default: 5)
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds (default: 1000ms)
    pub backoff_initial_ms: u64,
    /// Maximum backoff delay in milliseconds (default: 30000ms)
    pub backoff_max_ms: u64,
    /// Backoff multiplier (default: 2.0)
    pub backoff_multiplier: f64,
    /// Whether to add jitter to backoff (default: true)
    pub jitter_enabled: bool,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_initial_ms: 1000,
            backoff_max_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_enabled: true,
        }
    }
}

impl ReconnectionPolicy {
    /// Fast retries for robots on a local network
    pub fn aggressive() -> Self {
        Self {
            max_retries: 10,
            backoff_initial_ms: 100,
            backoff_max_ms: 5000,
            backoff_multiplier: 1.5,
            jitter_enabled: true,
        }
    }

    /// Few, widely spaced retries
    pub fn conservative() -> Self {
        Self {
            max_retries: 3,
            backoff_initial_ms: 2000,
            backoff_max_ms: 60000,
            backoff_multiplier: 2.5,
            jitter_enabled: true,
        }
    }

    /// Policy that never waits (first attempt) and never retries
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before attempt `attempt` (0-indexed)
    ///
    /// `initial * multiplier^attempt`, clamped to the maximum, plus up to 25%
    /// jitter when enabled.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let backoff_ms =
            (self.backoff_initial_ms as f64) * self.backoff_multiplier.powi(attempt as i32);

        let backoff_ms = backoff_ms.min(self.backoff_max_ms as f64);

        let final_ms = if self.jitter_enabled {
            backoff_ms + rand_jitter(backoff_ms * 0.25)
        } else {
            backoff_ms
        };

        Duration::from_millis(final_ms as u64)
    }

    /// Check if more retries are allowed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.backoff_multiplier < 1.0 || !self.backoff_multiplier.is_finite() {
            return Err(crate::Error::InvalidConfig(format!(
                "reconnection.backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.backoff_initial_ms > self.backoff_max_ms {
            return Err(crate::Error::InvalidConfig(format!(
                "reconnection.backoff_initial_ms ({}) exceeds backoff_max_ms ({})",
                self.backoff_initial_ms, self.backoff_max_ms
            )));
        }
        Ok(())
    }
}

/// Simple pseudo-random jitter using time-based seed
fn rand_jitter(max: f64) -> f64 {
    let seed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as f64;
    (seed % 1000.0) / 1000.0 * max
}
