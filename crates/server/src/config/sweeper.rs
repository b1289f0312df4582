use std::time::Duration;

use serde::Deserialize;

use lapse_core::SweepConfig;

use crate::error::ServerError;

/// Configuration for the lifecycle sweeper.
#[derive(Debug, Deserialize)]
pub struct SweeperConfig {
    /// Whether `run` starts the periodic sweeper.
    #[serde(default = "default_sweeper_enabled")]
    pub enabled: bool,
    /// How often to sweep (seconds).
    #[serde(default = "default_sweep_interval")]
    pub interval_seconds: u64,
    /// Expired records fetched per search page.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Upper bound on expired records handled per cycle.
    #[serde(default = "default_max_per_cycle")]
    pub max_per_cycle: u64,
    /// Concurrent deletions.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweeper_enabled(),
            interval_seconds: default_sweep_interval(),
            batch_size: default_batch_size(),
            max_per_cycle: default_max_per_cycle(),
            concurrency: default_concurrency(),
        }
    }
}

impl SweeperConfig {
    pub(crate) fn validate(&self) -> Result<(), ServerError> {
        if self.interval_seconds == 0 {
            return Err(ServerError::Config(
                "[sweeper] interval_seconds must be positive".to_owned(),
            ));
        }
        if self.batch_size == 0 || self.max_per_cycle == 0 || self.concurrency == 0 {
            return Err(ServerError::Config(
                "[sweeper] batch_size, max_per_cycle and concurrency must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    /// The sweeper settings in the form the orchestrator expects.
    pub fn to_sweep_config(&self) -> SweepConfig {
        SweepConfig {
            interval: Duration::from_secs(self.interval_seconds),
            batch_size: self.batch_size,
            max_per_cycle: self.max_per_cycle,
            concurrency: self.concurrency,
        }
    }
}

fn default_sweeper_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    15 * 60
}

fn default_batch_size() -> u32 {
    100
}

fn default_max_per_cycle() -> u64 {
    1000
}

fn default_concurrency() -> usize {
    10
}
