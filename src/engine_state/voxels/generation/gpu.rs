//! wgpu implementation of the generation stage.

use bytemuck::{Pod, Zeroable};
use log::debug;

use crate::engine_state::compute::{ComputeStage, StageKind};
use crate::engine_state::device::wgpu_device::{storage_entry, uniform_entry, WgpuDevice};
use crate::engine_state::voxels::chunk::block_grid::BlockGrid;
use crate::engine_state::voxels::chunk::{
    ChunkKey, BLOCKS_PER_CHUNK, CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH,
};
use crate::engine_state::voxels::world_type::{pack_flat_profile, WorldSettings};
use crate::error::StageError;

use super::{Generator, TerrainPalette};

const SHADER: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/shaders/chunk_gen.wgsl"
));

const GRID_BYTES: u64 = (BLOCKS_PER_CHUNK * std::mem::size_of::<u32>()) as u64;

/// Per-dispatch uniforms, laid out like `Uniforms` in `chunk_gen.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GenerationUniforms {
    chunk_size: [u32; 4],
    chunk_coord: [i32; 4],
    seed: u32,
    world_type: u32,
    profile_len: u32,
    _pad: u32,
}

struct Pipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
}

/// Generates chunks with the `chunk_gen.wgsl` compute shader.
///
/// Owns one block buffer and one staging buffer, so a generator may only
/// have a single dispatch in flight.
pub struct GpuGenerator {
    device: WgpuDevice,
    settings: WorldSettings,
    layout: wgpu::BindGroupLayout,
    uniforms: wgpu::Buffer,
    palette: wgpu::Buffer,
    profile: wgpu::Buffer,
    blocks: wgpu::Buffer,
    staging: wgpu::Buffer,
    pipeline: Option<Pipeline>,
}

impl GpuGenerator {
    /// Allocates the stage buffers. The pipeline is built lazily.
    pub fn new(device: WgpuDevice, settings: WorldSettings) -> Self {
        let layout = device
            .device()
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("chunk_gen_layout"),
                entries: &[
                    uniform_entry(0),
                    uniform_entry(1),
                    storage_entry(2, true),
                    storage_entry(3, false),
                ],
            });

        let uniforms = device.create_buffer(
            "chunk_gen_uniforms",
            std::mem::size_of::<GenerationUniforms>() as u64,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        );
        let palette = device.create_buffer_init(
            "chunk_gen_palette",
            bytemuck::bytes_of(&TerrainPalette::from_registry(&settings.registry)),
            wgpu::BufferUsages::UNIFORM,
        );
        let profile = device.create_buffer_init(
            "chunk_gen_profile",
            bytemuck::cast_slice(&pack_flat_profile(settings.world_type.layers())),
            wgpu::BufferUsages::STORAGE,
        );
        let blocks = device.create_buffer(
            "chunk_gen_blocks",
            GRID_BYTES,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        );
        let staging = device.create_buffer(
            "chunk_gen_staging",
            GRID_BYTES,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        );

        GpuGenerator {
            device,
            settings,
            layout,
            uniforms,
            palette,
            profile,
            blocks,
            staging,
            pipeline: None,
        }
    }

    fn uniforms_for(&self, key: ChunkKey) -> GenerationUniforms {
        GenerationUniforms {
            chunk_size: [CHUNK_WIDTH as u32, CHUNK_HEIGHT as u32, CHUNK_DEPTH as u32, 0],
            chunk_coord: [key.x, 0, key.z, 0],
            seed: self.settings.seed,
            world_type: self.settings.world_type.shader_id(),
            profile_len: self.settings.world_type.layers().len().min(CHUNK_HEIGHT) as u32,
            _pad: 0,
        }
    }

    async fn run(&mut self, key: ChunkKey) -> Result<Vec<u8>, StageError> {
        self.ensure_ready()?;
        let Some(pipeline) = &self.pipeline else {
            return Err(StageError::NotReady(StageKind::Generate.label()));
        };

        self.device.queue().write_buffer(
            &self.uniforms,
            0,
            bytemuck::bytes_of(&self.uniforms_for(key)),
        );

        let mut encoder = self
            .device
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("chunk_gen_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("chunk_gen_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline.pipeline);
            pass.set_bind_group(0, &pipeline.bind_group, &[]);
            pass.dispatch_workgroups(1, 1, 1);
        }
        encoder.copy_buffer_to_buffer(&self.blocks, 0, &self.staging, 0, GRID_BYTES);
        self.device.queue().submit(Some(encoder.finish()));

        self.device.submitted_work_done("generate").await?;
        self.device
            .read_buffer("generate", &self.staging, GRID_BYTES)
            .await
    }
}

impl ComputeStage for GpuGenerator {
    fn kind(&self) -> StageKind {
        StageKind::Generate
    }

    fn is_ready(&self) -> bool {
        self.pipeline.is_some()
    }

    async fn wait_until_ready(&mut self) -> Result<(), StageError> {
        if self.pipeline.is_some() {
            return Ok(());
        }

        let pipeline = self
            .device
            .create_compute_pipeline("generate", SHADER, &self.layout)
            .await?;
        let bind_group = self
            .device
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("chunk_gen_bind_group"),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: self.uniforms.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: self.palette.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: self.profile.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: self.blocks.as_entire_binding(),
                    },
                ],
            });

        debug!("Generation pipeline ready");
        self.pipeline = Some(Pipeline {
            pipeline,
            bind_group,
        });
        Ok(())
    }

    async fn warm_up(&mut self) -> Result<(), StageError> {
        self.wait_until_ready().await?;
        self.run(ChunkKey::ORIGIN).await.map(|_| ())
    }
}

impl Generator for GpuGenerator {
    fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    async fn dispatch(&mut self, key: ChunkKey, grid: &mut BlockGrid) -> Result<(), StageError> {
        let bytes = self.run(key).await?;
        grid.copy_from_bytes(&bytes).map_err(|err| StageError::Readback {
            stage: StageKind::Generate.label(),
            reason: err.to_string(),
        })
    }
}
