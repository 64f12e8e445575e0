//! wgpu implementation of the meshing stage.

use bytemuck::{Pod, Zeroable};
use log::debug;

use crate::engine_state::compute::{ComputeStage, StageKind};
use crate::engine_state::device::wgpu_device::{storage_entry, uniform_entry, WgpuDevice};
use crate::engine_state::rendering::vertex::ChunkVertex;
use crate::engine_state::voxels::chunk::block_grid::BlockGrid;
use crate::engine_state::voxels::chunk::{
    ChunkKey, MeshBuffers, BLOCKS_PER_CHUNK, CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH,
};
use crate::error::StageError;

use super::{Mesher, INDICES_PER_FACE, MAX_FACES_PER_CHUNK, VERTICES_PER_FACE};

const SHADER: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/shaders/chunk_mesh.wgsl"
));

const WORKGROUP_SIZE: [u32; 3] = [4, 4, 4];
const GRID_BYTES: u64 = (BLOCKS_PER_CHUNK * std::mem::size_of::<u32>()) as u64;
const VERTEX_BYTES_PER_FACE: u64 = (VERTICES_PER_FACE * ChunkVertex::SIZE) as u64;
const INDEX_BYTES_PER_FACE: u64 = (INDICES_PER_FACE * std::mem::size_of::<u32>()) as u64;
const COUNTER_BYTES: u64 = std::mem::size_of::<u32>() as u64;

/// Laid out like `Uniforms` in `chunk_mesh.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct MeshUniforms {
    chunk_size: [u32; 4],
    max_faces: u32,
    _pad: [u32; 3],
}

struct Pipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
}

/// Meshes chunks with the `chunk_mesh.wgsl` compute shader.
///
/// The vertex and index scratch buffers are sized for
/// [`MAX_FACES_PER_CHUNK`] and reused for every chunk this mesher handles.
pub struct GpuMesher {
    device: WgpuDevice,
    layout: wgpu::BindGroupLayout,
    uniforms: wgpu::Buffer,
    blocks: wgpu::Buffer,
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    counter: wgpu::Buffer,
    counter_staging: wgpu::Buffer,
    pipeline: Option<Pipeline>,
    last_face_count: Option<u32>,
}

impl GpuMesher {
    /// Allocates the scratch buffers. The pipeline is built lazily.
    pub fn new(device: WgpuDevice) -> Self {
        let layout = device
            .device()
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("chunk_mesh_layout"),
                entries: &[
                    uniform_entry(0),
                    storage_entry(1, true),
                    storage_entry(2, false),
                    storage_entry(3, false),
                    storage_entry(4, false),
                ],
            });

        let uniforms = MeshUniforms {
            chunk_size: [CHUNK_WIDTH as u32, CHUNK_HEIGHT as u32, CHUNK_DEPTH as u32, 0],
            max_faces: MAX_FACES_PER_CHUNK as u32,
            _pad: [0; 3],
        };
        let uniforms = device.create_buffer_init(
            "chunk_mesh_uniforms",
            bytemuck::bytes_of(&uniforms),
            wgpu::BufferUsages::UNIFORM,
        );
        let blocks = device.create_buffer(
            "chunk_mesh_blocks",
            GRID_BYTES,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        );
        let vertices = device.create_buffer(
            "chunk_mesh_vertices",
            MAX_FACES_PER_CHUNK as u64 * VERTEX_BYTES_PER_FACE,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        );
        let indices = device.create_buffer(
            "chunk_mesh_indices",
            MAX_FACES_PER_CHUNK as u64 * INDEX_BYTES_PER_FACE,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        );
        let counter = device.create_buffer(
            "chunk_mesh_counter",
            COUNTER_BYTES,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        );
        let counter_staging = device.create_buffer(
            "chunk_mesh_counter_staging",
            COUNTER_BYTES,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        );

        GpuMesher {
            device,
            layout,
            uniforms,
            blocks,
            vertices,
            indices,
            counter,
            counter_staging,
            pipeline: None,
            last_face_count: None,
        }
    }

    async fn run(&mut self, grid: &BlockGrid) -> Result<u32, StageError> {
        self.ensure_ready()?;
        let Some(pipeline) = &self.pipeline else {
            return Err(StageError::NotReady(StageKind::Mesh.label()));
        };

        let queue = self.device.queue();
        queue.write_buffer(&self.blocks, 0, grid.as_bytes());
        queue.write_buffer(&self.counter, 0, bytemuck::bytes_of(&0u32));

        let mut encoder = self
            .device
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("chunk_mesh_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("chunk_mesh_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline.pipeline);
            pass.set_bind_group(0, &pipeline.bind_group, &[]);
            pass.dispatch_workgroups(
                CHUNK_WIDTH as u32 / WORKGROUP_SIZE[0],
                CHUNK_HEIGHT as u32 / WORKGROUP_SIZE[1],
                CHUNK_DEPTH as u32 / WORKGROUP_SIZE[2],
            );
        }
        encoder.copy_buffer_to_buffer(&self.counter, 0, &self.counter_staging, 0, COUNTER_BYTES);
        queue.submit(Some(encoder.finish()));

        self.device.submitted_work_done("mesh").await?;
        let bytes = self
            .device
            .read_buffer("mesh", &self.counter_staging, COUNTER_BYTES)
            .await?;
        if bytes.len() != COUNTER_BYTES as usize {
            return Err(StageError::Readback {
                stage: StageKind::Mesh.label(),
                reason: format!("face counter read {} bytes", bytes.len()),
            });
        }
        let counted: u32 = bytemuck::pod_read_unaligned(&bytes);
        let face_count = counted.min(MAX_FACES_PER_CHUNK as u32);
        self.last_face_count = Some(face_count);
        Ok(face_count)
    }

    fn chunk_buffer(&self, label: &str, size: u64, usage: wgpu::BufferUsages) -> wgpu::Buffer {
        // empty meshes still get a non-zero buffer
        self.device
            .create_buffer(label, size.max(COUNTER_BYTES), usage | wgpu::BufferUsages::COPY_DST)
    }
}

impl ComputeStage for GpuMesher {
    fn kind(&self) -> StageKind {
        StageKind::Mesh
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
            .create_compute_pipeline("mesh", SHADER, &self.layout)
            .await?;
        let entries = [
            &self.uniforms,
            &self.blocks,
            &self.vertices,
            &self.indices,
            &self.counter,
        ]
        .iter()
        .enumerate()
        .map(|(binding, buffer)| wgpu::BindGroupEntry {
            binding: binding as u32,
            resource: buffer.as_entire_binding(),
        })
        .collect::<Vec<_>>();
        let bind_group = self
            .device
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("chunk_mesh_bind_group"),
                layout: &self.layout,
                entries: &entries,
            });

        debug!("Meshing pipeline ready");
        self.pipeline = Some(Pipeline {
            pipeline,
            bind_group,
        });
        Ok(())
    }

    async fn warm_up(&mut self) -> Result<(), StageError> {
        self.wait_until_ready().await?;
        self.run(&BlockGrid::new()).await.map(|_| ())
    }
}

impl Mesher for GpuMesher {
    type Buffer = wgpu::Buffer;

    async fn dispatch(&mut self, _key: ChunkKey, grid: &BlockGrid) -> Result<u32, StageError> {
        self.run(grid).await
    }

    fn copy_out(&mut self, face_count: u32) -> Result<MeshBuffers<wgpu::Buffer>, StageError> {
        match self.last_face_count {
            Some(meshed) if face_count <= meshed => {}
            meshed => {
                return Err(StageError::Readback {
                    stage: StageKind::Mesh.label(),
                    reason: format!("{face_count} faces requested, last dispatch meshed {meshed:?}"),
                })
            }
        }

        let vertex_bytes = face_count as u64 * VERTEX_BYTES_PER_FACE;
        let index_bytes = face_count as u64 * INDEX_BYTES_PER_FACE;
        let vertex = self.chunk_buffer("chunk_vertices", vertex_bytes, wgpu::BufferUsages::VERTEX);
        let index = self.chunk_buffer("chunk_indices", index_bytes, wgpu::BufferUsages::INDEX);

        if face_count > 0 {
            let mut encoder = self
                .device
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("chunk_mesh_copy_out"),
                });
            encoder.copy_buffer_to_buffer(&self.vertices, 0, &vertex, 0, vertex_bytes);
            encoder.copy_buffer_to_buffer(&self.indices, 0, &index, 0, index_bytes);
            self.device.queue().submit(Some(encoder.finish()));
        }

        Ok(MeshBuffers {
            vertex,
            index,
            face_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniforms_match_the_shader_struct() {
        let uniforms = MeshUniforms {
            chunk_size: [1, 2, 3, 0],
            max_faces: 9,
            _pad: [0; 3],
        };
        let words: &[u32] = bytemuck::cast_slice(bytemuck::bytes_of(&uniforms));
        assert_eq!(words, &[1, 2, 3, 0, 9, 0, 0, 0]);

        let fields: Vec<&str> = SHADER
            .split("struct Uniforms {")
            .nth(1)
            .and_then(|rest| rest.split("};").next())
            .unwrap()
            .lines()
            .filter_map(|line| line.trim().split(':').next())
            .filter(|name| !name.is_empty())
            .collect();
        assert_eq!(fields, ["chunk_size", "max_faces", "_pad0", "_pad1", "_pad2"]);
    }
}
