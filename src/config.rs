//! # Engine Configuration
//!
//! JSON configuration for a streaming session. Every field has a default, so
//! `{}` is a valid configuration.
//!
//! ```json
//! {
//!     "render_distance": 8,
//!     "max_parallel_jobs": 2,
//!     "seed": 1337,
//!     "world_type": { "type": "flat", "layers": ["bedrock", "dirt", "dirt", "grass"] },
//!     "backend": "host"
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine_state::voxels::block::BlockRegistry;
use crate::engine_state::voxels::chunk::CHUNK_HEIGHT;
use crate::engine_state::voxels::world_type::WorldType;
use crate::error::ConfigError;

/// Default render distance in chunks.
pub const DEFAULT_RENDER_DISTANCE: u32 = 12;

/// Default number of chunk pipelines running at once.
pub const DEFAULT_MAX_PARALLEL_JOBS: usize = 1;

/// World type as written in configuration files, with block names instead of ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorldTypeConfig {
    /// Layered world, bottom to top
    Flat {
        /// Block names per layer
        layers: Vec<String>,
    },
    /// Procedural terrain
    #[default]
    Normal,
}

impl WorldTypeConfig {
    /// Resolves block names against `registry`.
    pub fn resolve(&self, registry: &BlockRegistry) -> Result<WorldType, ConfigError> {
        match self {
            WorldTypeConfig::Normal => Ok(WorldType::Normal),
            WorldTypeConfig::Flat { layers } => {
                if layers.len() > CHUNK_HEIGHT {
                    return Err(ConfigError::ProfileTooTall {
                        len: layers.len(),
                        max: CHUNK_HEIGHT,
                    });
                }
                layers
                    .iter()
                    .map(|name| {
                        registry
                            .id_of(name)
                            .ok_or_else(|| ConfigError::UnknownBlock(name.clone()))
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(WorldType::Flat)
            }
        }
    }
}

/// Which device runs the compute stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// WGSL compute shaders through wgpu
    #[default]
    Gpu,
    /// Reference implementation on the CPU
    Host,
}

/// Tunables for one streaming session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Chunks kept resident in each direction from the viewpoint's chunk
    pub render_distance: u32,
    /// Pipelines allowed to run at once; each gets its own stage buffers
    pub max_parallel_jobs: usize,
    /// World seed; random when absent
    pub seed: Option<u32>,
    /// Terrain mode
    pub world_type: WorldTypeConfig,
    /// Compute backend
    pub backend: BackendKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            render_distance: DEFAULT_RENDER_DISTANCE,
            max_parallel_jobs: DEFAULT_MAX_PARALLEL_JOBS,
            seed: None,
            world_type: WorldTypeConfig::Normal,
            backend: BackendKind::Gpu,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Checks values serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel_jobs == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        Ok(())
    }

    /// The configured seed, or a fresh random one.
    pub fn resolve_seed(&self) -> u32 {
        self.seed.unwrap_or_else(|| fastrand::u32(..))
    }
}
