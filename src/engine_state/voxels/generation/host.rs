//! CPU implementation of the generation stage.

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use crate::engine_state::compute::{ComputeStage, StageKind};
use crate::engine_state::device::host::HostDevice;
use crate::engine_state::voxels::chunk::block_grid::BlockGrid;
use crate::engine_state::voxels::chunk::{ChunkKey, CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH};
use crate::engine_state::voxels::world_type::{WorldSettings, WorldType};
use crate::error::StageError;

use super::{
    column_seed, fill_flat, ColumnCell, Generator, TerrainPalette, BASE_HEIGHT, HEIGHT_AMPLITUDE,
    ORE_ROLL_RANGE, TERRAIN_FREQUENCY, TERRAIN_OCTAVES,
};

/// Generates chunks on the CPU, recording each dispatch on a [`HostDevice`].
pub struct HostGenerator {
    device: HostDevice,
    settings: WorldSettings,
    palette: TerrainPalette,
    terrain: Fbm<Perlin>,
    scratch: BlockGrid,
    ready: bool,
}

impl HostGenerator {
    /// Creates a generator with its own scratch grid.
    pub fn new(device: HostDevice, settings: WorldSettings) -> Self {
        let terrain = Fbm::<Perlin>::new(settings.seed)
            .set_octaves(TERRAIN_OCTAVES)
            .set_frequency(TERRAIN_FREQUENCY);
        HostGenerator {
            device,
            palette: TerrainPalette::from_registry(&settings.registry),
            settings,
            terrain,
            scratch: BlockGrid::new(),
            ready: false,
        }
    }

    /// Surface height of world column `(x, z)`.
    pub fn surface_height(&self, world_x: i32, world_z: i32) -> i32 {
        let n = self.terrain.get([world_x as f64, world_z as f64]);
        let height = (BASE_HEIGHT + n * HEIGHT_AMPLITUDE).round() as i32;
        height.clamp(1, CHUNK_HEIGHT as i32 - 2)
    }

    fn fill_normal(&mut self, key: ChunkKey) {
        let seed = self.settings.seed;
        for z in 0..CHUNK_DEPTH as i32 {
            for x in 0..CHUNK_WIDTH as i32 {
                let (world_x, world_z) = key.world_column(x, z);
                let height = self.surface_height(world_x, world_z);
                let mut rng = fastrand::Rng::with_seed(column_seed(seed, world_x, world_z));

                for y in 0..CHUNK_HEIGHT as i32 {
                    let id = match self.palette.column_block(y, height) {
                        ColumnCell::Block(id) => id,
                        ColumnCell::Stone => {
                            self.palette.stone_or_ore(rng.u32(..ORE_ROLL_RANGE), y)
                        }
                    };
                    let index = BlockGrid::index(x, y, z).unwrap_or_default();
                    self.scratch.as_mut_slice()[index] = id;
                }
            }
        }
    }

    fn run(&mut self, key: Option<ChunkKey>, grid: &mut BlockGrid) -> Result<(), StageError> {
        self.ensure_ready()?;
        let _dispatch = self.device.begin_dispatch(StageKind::Generate, key)?;
        match &self.settings.world_type {
            WorldType::Flat(layers) => fill_flat(&mut self.scratch, layers),
            WorldType::Normal => self.fill_normal(key.unwrap_or(ChunkKey::ORIGIN)),
        }
        grid.as_mut_slice().copy_from_slice(self.scratch.as_slice());
        Ok(())
    }
}

impl ComputeStage for HostGenerator {
    fn kind(&self) -> StageKind {
        StageKind::Generate
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn wait_until_ready(&mut self) -> Result<(), StageError> {
        self.ready = true;
        Ok(())
    }

    async fn warm_up(&mut self) -> Result<(), StageError> {
        self.wait_until_ready().await?;
        let mut grid = BlockGrid::new();
        self.run(None, &mut grid)
    }
}

impl Generator for HostGenerator {
    fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    async fn dispatch(&mut self, key: ChunkKey, grid: &mut BlockGrid) -> Result<(), StageError> {
        self.run(Some(key), grid)
    }
}
