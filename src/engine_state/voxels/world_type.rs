//! World type selection and the settings every generator is built from.

use std::sync::Arc;

use crate::engine_state::voxels::block::{BlockId, BlockRegistry, AIR};
use crate::engine_state::voxels::chunk::CHUNK_HEIGHT;

/// How terrain is produced. Fixed for a play session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldType {
    /// Horizontal layers, bottom to top; everything above the profile is air.
    Flat(Vec<BlockId>),
    /// Seeded procedural terrain.
    Normal,
}

impl WorldType {
    /// Value of the `world_type` uniform read by `chunk_gen.wgsl`.
    pub fn shader_id(&self) -> u32 {
        match self {
            WorldType::Flat(_) => 0,
            WorldType::Normal => 1,
        }
    }

    /// Flat layers, empty for normal worlds.
    pub fn layers(&self) -> &[BlockId] {
        match self {
            WorldType::Flat(layers) => layers,
            WorldType::Normal => &[],
        }
    }
}

/// Lays a flat profile out as one full id per layer, padded with air.
///
/// Always returns `CHUNK_HEIGHT` words; layers past the chunk height are
/// ignored.
pub fn pack_flat_profile(layers: &[BlockId]) -> Vec<u32> {
    let mut packed = vec![AIR; CHUNK_HEIGHT];
    for (slot, &id) in packed.iter_mut().zip(layers) {
        *slot = id;
    }
    packed
}

/// Everything a generator needs besides the chunk it is filling.
#[derive(Debug, Clone)]
pub struct WorldSettings {
    /// World seed
    pub seed: u32,
    /// Terrain mode
    pub world_type: WorldType,
    /// Shared block catalogue
    pub registry: Arc<BlockRegistry>,
}

impl WorldSettings {
    /// Bundles seed, world type and registry.
    pub fn new(seed: u32, world_type: WorldType, registry: Arc<BlockRegistry>) -> Self {
        WorldSettings {
            seed,
            world_type,
            registry,
        }
    }
}
