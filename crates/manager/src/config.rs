//! Manager configuration with defaults and YAML loading.

use multiworld_common::{BlockPos, Dimension, GameMode};
use multiworld_kernel::WorldConfig;
use multiworld_persist::Compression;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Spawn written into every world loaded through the manager.
pub const LOADED_WORLD_SPAWN: BlockPos = BlockPos::new(0, -55, 0);
/// In-game time loaded worlds are frozen at (noon).
pub const FROZEN_TIME: i64 = 6000;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the config file from disk.
    #[error("failed to read config: {0}")]
    Read(#[source] std::io::Error),

    /// Failed to parse YAML content.
    #[error("failed to parse config: {0}")]
    Parse(#[source] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Root holding one subdirectory per loadable world.
    pub worlds_dir: PathBuf,
    /// Directory of the primary world. Kept outside `worlds_dir`.
    pub primary_dir: PathBuf,
    pub compression: Compression,
    pub spawn: BlockPos,
    pub time: i64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            worlds_dir: PathBuf::from("worlds"),
            primary_dir: PathBuf::from("world"),
            compression: Compression::Default,
            spawn: LOADED_WORLD_SPAWN,
            time: FROZEN_TIME,
        }
    }
}

impl ManagerConfig {
    /// Load a config from a YAML file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(ConfigError::Parse)
    }

    /// `<worlds_dir>/<name>`.
    pub fn world_path(&self, name: &str) -> PathBuf {
        self.worlds_dir.join(name)
    }

    /// Runtime policy for worlds loaded through the manager: a read-only
    /// snapshot with ticking, time and weather frozen.
    pub fn world_config(&self) -> WorldConfig {
        WorldConfig {
            dimension: Dimension::Overworld,
            read_only: true,
            tick_range: 0,
            time: self.time,
            time_stopped: true,
            weather_stopped: true,
            default_game_mode: GameMode::Survival,
        }
    }
}
