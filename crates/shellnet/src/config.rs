use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::sync::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Tuning shared by every adapter in a replicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub tick_rate: u32,
    /// Radius around other crafts inside which an entity keeps replicating.
    pub pop_in_distance: f32,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_rate: 30,
            pop_in_distance: 200.0,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }

    pub fn pop_in_distance_sq(&self) -> f32 {
        self.pop_in_distance * self.pop_in_distance
    }
}
