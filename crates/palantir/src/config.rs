//! Pool configuration.
//!
//! Defaults can be overridden from an environment-like source with
//! [`PoolConfig::with_overrides`]:
//! - `PALANTIR_COUNT`: number of palantiri in the pool
//! - `PALANTIR_SEMAPHORE`: `condition` or `monitor`

use serde::{Deserialize, Serialize};

use crate::manager::PoolError;
use crate::semaphore::SemaphoreKind;

pub const DEFAULT_PALANTIRI: usize = 6;

pub const ENV_COUNT: &str = "PALANTIR_COUNT";
pub const ENV_SEMAPHORE: &str = "PALANTIR_SEMAPHORE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("a pool needs at least one palantir")]
    NoPalantiri,
    #[error("failed to parse pool config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to build palantir model: {0}")]
    Model(#[from] PoolError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Number of palantiri to build the model with.
    pub palantiri: usize,
    /// Blocking strategy of the pool's fair semaphore.
    pub semaphore: SemaphoreKind,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            palantiri: DEFAULT_PALANTIRI,
            semaphore: SemaphoreKind::default(),
        }
    }
}

impl PoolConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (an environment-like variable source).
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(ENV_COUNT) {
            self.palantiri = value
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                    var: ENV_COUNT,
                    value: value.clone(),
                    reason: e.to_string(),
                })?;
        }

        if let Some(value) = lookup(ENV_SEMAPHORE) {
            self.semaphore = value.parse().map_err(|e: crate::semaphore::UnknownSemaphoreKind| {
                ConfigError::InvalidValue {
                    var: ENV_SEMAPHORE,
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.palantiri == 0 {
            return Err(ConfigError::NoPalantiri);
        }
        Ok(())
    }

    pub fn with_palantiri(mut self, palantiri: usize) -> Self {
        self.palantiri = palantiri;
        self
    }

    pub fn with_semaphore(mut self, semaphore: SemaphoreKind) -> Self {
        self.semaphore = semaphore;
        self
    }
}
