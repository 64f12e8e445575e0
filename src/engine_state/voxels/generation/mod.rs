//! # Chunk Generation (Stage A)
//!
//! Turns `(seed, chunk coordinate, world type)` into a block grid. Output is a
//! pure function of those inputs on a given backend.
//!
//! Flat worlds copy the layer profile into every column. Normal worlds share
//! one terrain recipe between backends:
//!
//! * surface height is `BASE_HEIGHT + fbm(x, z) * HEIGHT_AMPLITUDE`
//! * bedrock at `y = 0`, stone below the top `DIRT_DEPTH` blocks, dirt then grass
//!   on top (sand instead of both near sea level)
//! * water fills air up to `SEA_LEVEL`
//! * stone cells roll for ore from a per-column generator seeded by
//!   [`column_seed`]
//!
//! The noise functions differ between backends (the `noise` crate on the host,
//! a WGSL port on the GPU), so normal terrain is only reproducible per backend.

pub mod gpu;
pub mod host;

use bytemuck::{Pod, Zeroable};

use crate::engine_state::compute::ComputeStage;
use crate::engine_state::voxels::block::{BlockId, BlockRegistry, AIR};
use crate::engine_state::voxels::chunk::block_grid::BlockGrid;
use crate::engine_state::voxels::chunk::ChunkKey;
use crate::engine_state::voxels::world_type::WorldSettings;
use crate::error::StageError;

/// Water fills air up to and including this height.
pub const SEA_LEVEL: i32 = 62;
/// Mean surface height.
pub const BASE_HEIGHT: f64 = 64.0;
/// Surface deviation at full noise amplitude.
pub const HEIGHT_AMPLITUDE: f64 = 24.0;
/// Noise samples per block.
pub const TERRAIN_FREQUENCY: f64 = 0.0104;
/// Fractal octaves summed for the height field.
pub const TERRAIN_OCTAVES: usize = 4;
/// Soil blocks between stone and the surface block.
pub const DIRT_DEPTH: i32 = 3;
/// Denominator of the per-cell ore roll.
pub const ORE_ROLL_RANGE: u32 = 1000;

/// What `generate` did with the grid it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// The grid was filled by a dispatch.
    Generated,
    /// The grid already started with bedrock and was returned untouched.
    Primed,
}

/// Stage A of the chunk pipeline.
#[allow(async_fn_in_trait)]
pub trait Generator: ComputeStage {
    /// Seed, world type and registry this generator was built with.
    fn settings(&self) -> &WorldSettings;

    /// Fills `grid` for `key`. The stage must already be ready.
    async fn dispatch(&mut self, key: ChunkKey, grid: &mut BlockGrid) -> Result<(), StageError>;

    /// Generates `key` into `grid`.
    ///
    /// A grid whose first block is the bedrock sentinel is a priming chunk and
    /// comes back unchanged without touching the device.
    async fn generate(
        &mut self,
        key: ChunkKey,
        grid: &mut BlockGrid,
    ) -> Result<GenerationOutcome, StageError> {
        if self.settings().registry.bedrock() == Some(grid.first_block()) {
            return Ok(GenerationOutcome::Primed);
        }
        self.wait_until_ready().await?;
        self.dispatch(key, grid).await?;
        Ok(GenerationOutcome::Generated)
    }
}

/// Block ids the normal terrain recipe places, resolved once per generator.
///
/// Uploaded as a uniform, so the layout matches `Palette` in `chunk_gen.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[allow(missing_docs)]
pub struct TerrainPalette {
    pub bedrock: BlockId,
    pub stone: BlockId,
    pub dirt: BlockId,
    pub grass: BlockId,
    pub sand: BlockId,
    pub water: BlockId,
    pub coal_ore: BlockId,
    pub iron_ore: BlockId,
    pub gold_ore: BlockId,
    pub diamond_ore: BlockId,
    _pad: [u32; 2],
}

impl TerrainPalette {
    /// Looks the terrain blocks up by name. Missing blocks fall back to stone,
    /// and stone falls back to the first registered solid id.
    pub fn from_registry(registry: &BlockRegistry) -> Self {
        let first_solid = if registry.len() > 1 { 1 } else { AIR };
        let stone = registry.id_of("stone").unwrap_or(first_solid);
        let pick = |name: &str| registry.id_of(name).unwrap_or(stone);
        TerrainPalette {
            bedrock: pick("bedrock"),
            stone,
            dirt: pick("dirt"),
            grass: pick("grass"),
            sand: pick("sand"),
            water: registry.id_of("water").unwrap_or(AIR),
            coal_ore: pick("coal_ore"),
            iron_ore: pick("iron_ore"),
            gold_ore: pick("gold_ore"),
            diamond_ore: pick("diamond_ore"),
            _pad: [0; 2],
        }
    }

    /// Stone or an ore for a stone cell at height `y`, given a roll in `0..ORE_ROLL_RANGE`.
    pub fn stone_or_ore(&self, roll: u32, y: i32) -> BlockId {
        match roll {
            0..=7 if y < 128 => self.coal_ore,
            8..=11 if y < 64 => self.iron_ore,
            12..=13 if y < 32 => self.gold_ore,
            14 if y < 16 => self.diamond_ore,
            _ => self.stone,
        }
    }

    /// Block at height `y` of a column whose surface is at `height`, before ore rolls.
    pub fn column_block(&self, y: i32, height: i32) -> ColumnCell {
        let beach = height <= SEA_LEVEL + 1;
        if y == 0 {
            ColumnCell::Block(self.bedrock)
        } else if y < height - DIRT_DEPTH {
            ColumnCell::Stone
        } else if y < height {
            ColumnCell::Block(if beach { self.sand } else { self.dirt })
        } else if y == height {
            ColumnCell::Block(if beach { self.sand } else { self.grass })
        } else if y <= SEA_LEVEL {
            ColumnCell::Block(self.water)
        } else {
            ColumnCell::Block(AIR)
        }
    }
}

/// One cell of a terrain column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnCell {
    /// A fixed block
    Block(BlockId),
    /// Stone that may become ore
    Stone,
}

/// Seed of the ore generator for world column `(x, z)`.
pub fn column_seed(seed: u32, world_x: i32, world_z: i32) -> u64 {
    let mut h = (seed as u64) << 32 ^ (world_x as u32 as u64).rotate_left(17) ^ world_z as u32 as u64;
    h = (h ^ (h >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    h = (h ^ (h >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    h ^ (h >> 31)
}

/// Fills `grid` with a flat layer profile.
pub fn fill_flat(grid: &mut BlockGrid, layers: &[BlockId]) {
    use crate::engine_state::voxels::chunk::{CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH};

    let blocks = grid.as_mut_slice();
    for z in 0..CHUNK_DEPTH {
        for y in 0..CHUNK_HEIGHT {
            let id = layers.get(y).copied().unwrap_or(AIR);
            let start = y * CHUNK_WIDTH + z * CHUNK_WIDTH * CHUNK_HEIGHT;
            blocks[start..start + CHUNK_WIDTH].fill(id);
        }
    }
}
