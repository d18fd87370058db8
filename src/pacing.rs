//! Stealth pacing: scan-order randomization and per-unit delays.
//!
//! A [`Pacer`] owns its random generator. Seed it with [`Pacer::with_seed`] to get a
//! reproducible order and delay sequence.
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};

/// Longest delay accepted between two units.
pub const MAX_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub enabled: bool,
    pub randomize_order: bool,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            randomize_order: true,
            min_delay_ms: 100,
            max_delay_ms: 500,
        }
    }
}

impl PacingConfig {
    pub fn stealth() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Reject bounds that would stall a scan. `min >= max` is allowed and means a fixed delay.
    pub fn validate(&self) -> ScanResult<()> {
        if self.min_delay_ms > MAX_DELAY_MS || self.max_delay_ms > MAX_DELAY_MS {
            return Err(ScanError::InvalidPacing(format!(
                "delays must not exceed {MAX_DELAY_MS} ms (got {}-{})",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Pacer {
    config: PacingConfig,
    rng: StdRng,
}

impl Pacer {
    pub fn new(config: PacingConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_seed(config: PacingConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &PacingConfig {
        &self.config
    }

    /// The order units should be probed in: a shuffled copy in stealth mode with
    /// order randomization, otherwise an unchanged copy.
    pub fn order<T: Clone>(&mut self, units: &[T]) -> Vec<T> {
        if self.config.enabled && self.config.randomize_order {
            self.shuffle(units)
        } else {
            units.to_vec()
        }
    }

    /// Full Fisher-Yates permutation of `units`.
    pub fn shuffle<T: Clone>(&mut self, units: &[T]) -> Vec<T> {
        let mut out = units.to_vec();
        out.shuffle(&mut self.rng);
        out
    }

    /// Uniform delay in `[min, max)`; a fixed `min` when the bounds are degenerate.
    pub fn random_delay(&mut self) -> Duration {
        let PacingConfig {
            min_delay_ms: min,
            max_delay_ms: max,
            ..
        } = self.config;
        if min >= max {
            return Duration::from_millis(min);
        }
        Duration::from_millis(self.rng.random_range(min..max))
    }

    /// Delay to apply after a completed unit, if stealth mode is on.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.config.enabled.then(|| self.random_delay())
    }

    /// Sleep for [`Pacer::next_delay`], returning what was applied.
    pub async fn apply_delay(&mut self) -> Option<Duration> {
        let delay = self.next_delay()?;
        tokio::time::sleep(delay).await;
        Some(delay)
    }
}
