//! Simulation parameters, shared by the CLI and library callers.

use palantir::config::{ENV_COUNT, ENV_SEMAPHORE};
use palantir::{DEFAULT_PALANTIRI, PoolConfig, SemaphoreKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimulationConfigError {
    #[error("at least one being is required")]
    NoBeings,
    #[error("at least one palantir is required")]
    NoPalantiri,
    #[error("gaze_min_ms ({min}) exceeds gaze_max_ms ({max})")]
    GazeBounds { min: u64, max: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, clap::Args, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of beings competing for palantiri
    #[arg(long, env = "PALANTIR_BEINGS", default_value_t = 10)]
    pub beings: usize,

    /// Number of palantiri in the pool
    #[arg(long, env = ENV_COUNT, default_value_t = DEFAULT_PALANTIRI)]
    pub palantiri: usize,

    /// Gazes per being
    #[arg(long, default_value_t = 5)]
    pub iterations: usize,

    /// Shortest gaze in milliseconds
    #[arg(long, default_value_t = 10)]
    pub gaze_min_ms: u64,

    /// Longest gaze in milliseconds
    #[arg(long, default_value_t = 50)]
    pub gaze_max_ms: u64,

    /// Fair semaphore strategy (condition or monitor)
    #[arg(long, env = ENV_SEMAPHORE, default_value_t = SemaphoreKind::Condition)]
    pub semaphore: SemaphoreKind,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            beings: 10,
            palantiri: DEFAULT_PALANTIRI,
            iterations: 5,
            gaze_min_ms: 10,
            gaze_max_ms: 50,
            semaphore: SemaphoreKind::Condition,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), SimulationConfigError> {
        if self.beings == 0 {
            return Err(SimulationConfigError::NoBeings);
        }
        if self.palantiri == 0 {
            return Err(SimulationConfigError::NoPalantiri);
        }
        if self.gaze_min_ms > self.gaze_max_ms {
            return Err(SimulationConfigError::GazeBounds {
                min: self.gaze_min_ms,
                max: self.gaze_max_ms,
            });
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::default()
            .with_palantiri(self.palantiri)
            .with_semaphore(self.semaphore)
    }
}
