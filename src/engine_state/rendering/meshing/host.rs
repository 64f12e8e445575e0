//! CPU implementation of the meshing stage.

use bitvec::vec::BitVec;

use crate::engine_state::compute::{ComputeStage, StageKind};
use crate::engine_state::device::host::{HostBuffer, HostDevice};
use crate::engine_state::rendering::vertex::ChunkVertex;
use crate::engine_state::voxels::block::block_side::BlockSide;
use crate::engine_state::voxels::block::BlockRegistry;
use crate::engine_state::voxels::chunk::block_grid::BlockGrid;
use crate::engine_state::voxels::chunk::{
    ChunkKey, MeshBuffers, CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH,
};
use crate::error::StageError;

use super::face::Face;
use super::{face_indices, Mesher, INDICES_PER_FACE, MAX_FACES_PER_CHUNK, VERTICES_PER_FACE};

const PADDED_WIDTH: usize = CHUNK_WIDTH + 2;
const PADDED_HEIGHT: usize = CHUNK_HEIGHT + 2;
const PADDED_DEPTH: usize = CHUNK_DEPTH + 2;

/// Solidity of every voxel plus a one-block ring of air around the chunk.
///
/// The ring makes neighbour lookups at the chunk border read air without
/// bounds checks.
struct SolidMask {
    bits: BitVec,
}

impl SolidMask {
    fn new() -> Self {
        let mut bits = BitVec::with_capacity(PADDED_WIDTH * PADDED_HEIGHT * PADDED_DEPTH);
        bits.resize(PADDED_WIDTH * PADDED_HEIGHT * PADDED_DEPTH, false);
        SolidMask { bits }
    }

    fn padded_index(x: i32, y: i32, z: i32) -> usize {
        let (x, y, z) = ((x + 1) as usize, (y + 1) as usize, (z + 1) as usize);
        x + y * PADDED_WIDTH + z * PADDED_WIDTH * PADDED_HEIGHT
    }

    fn fill(&mut self, grid: &BlockGrid) {
        self.bits.fill(false);
        for z in 0..CHUNK_DEPTH as i32 {
            for y in 0..CHUNK_HEIGHT as i32 {
                for x in 0..CHUNK_WIDTH as i32 {
                    let solid = grid
                        .get_block(x, y, z)
                        .map(BlockRegistry::is_solid)
                        .unwrap_or(false);
                    self.bits.set(Self::padded_index(x, y, z), solid);
                }
            }
        }
    }

    fn is_solid(&self, x: i32, y: i32, z: i32) -> bool {
        self.bits[Self::padded_index(x, y, z)]
    }
}

/// Meshes chunks on the CPU, recording each dispatch on a [`HostDevice`].
pub struct HostMesher {
    device: HostDevice,
    mask: SolidMask,
    vertices: Vec<ChunkVertex>,
    indices: Vec<u32>,
    ready: bool,
}

impl HostMesher {
    /// Creates a mesher whose scratch buffers are reserved for the worst case.
    pub fn new(device: HostDevice) -> Self {
        HostMesher {
            device,
            mask: SolidMask::new(),
            vertices: Vec::with_capacity(MAX_FACES_PER_CHUNK * VERTICES_PER_FACE),
            indices: Vec::with_capacity(MAX_FACES_PER_CHUNK * INDICES_PER_FACE),
            ready: false,
        }
    }

    fn run(&mut self, key: Option<ChunkKey>, grid: &BlockGrid) -> Result<u32, StageError> {
        self.ensure_ready()?;
        let _dispatch = self.device.begin_dispatch(StageKind::Mesh, key)?;

        self.mask.fill(grid);
        self.vertices.clear();
        self.indices.clear();

        let mut face_count = 0u32;
        for z in 0..CHUNK_DEPTH as i32 {
            for y in 0..CHUNK_HEIGHT as i32 {
                for x in 0..CHUNK_WIDTH as i32 {
                    if !self.mask.is_solid(x, y, z) {
                        continue;
                    }
                    let block = grid.get_block(x, y, z).unwrap_or_default();
                    for side in BlockSide::all() {
                        let n = side.offset();
                        if self.mask.is_solid(x + n.x, y + n.y, z + n.z) {
                            continue;
                        }
                        let face = Face::new(x as u32, y as u32, z as u32, block, side);
                        self.vertices.extend_from_slice(&face.vertices());
                        self.indices.extend_from_slice(&face_indices(face_count));
                        face_count += 1;
                    }
                }
            }
        }
        Ok(face_count)
    }
}

impl ComputeStage for HostMesher {
    fn kind(&self) -> StageKind {
        StageKind::Mesh
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
        self.run(None, &BlockGrid::new()).map(|_| ())
    }
}

impl Mesher for HostMesher {
    type Buffer = HostBuffer;

    async fn dispatch(&mut self, key: ChunkKey, grid: &BlockGrid) -> Result<u32, StageError> {
        self.run(Some(key), grid)
    }

    fn copy_out(&mut self, face_count: u32) -> Result<MeshBuffers<HostBuffer>, StageError> {
        let faces = face_count as usize;
        let vertex_end = faces * VERTICES_PER_FACE;
        let index_end = faces * INDICES_PER_FACE;
        if vertex_end > self.vertices.len() || index_end > self.indices.len() {
            return Err(StageError::Readback {
                stage: StageKind::Mesh.label(),
                reason: format!("{face_count} faces requested, {} meshed", self.vertices.len() / VERTICES_PER_FACE),
            });
        }

        let vertex = self.device.create_buffer(
            "chunk_vertices",
            bytemuck::cast_slice(&self.vertices[..vertex_end]).to_vec(),
        );
        let index = self.device.create_buffer(
            "chunk_indices",
            bytemuck::cast_slice(&self.indices[..index_end]).to_vec(),
        );
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
    use crate::engine_state::voxels::block::AIR;

    fn mesh(grid: &BlockGrid) -> (MeshBuffers<HostBuffer>, HostDevice) {
        let device = HostDevice::new();
        let mut mesher = HostMesher::new(device.clone());
        let buffers = pollster::block_on(mesher.mesh(ChunkKey::ORIGIN, grid)).unwrap();
        (buffers, device)
    }

    fn vertices(buffers: &MeshBuffers<HostBuffer>) -> Vec<ChunkVertex> {
        buffers
            .vertex
            .contents()
            .chunks_exact(ChunkVertex::SIZE)
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    #[test]
    fn empty_grid_has_no_faces() {
        let (buffers, _) = mesh(&BlockGrid::new());
        assert_eq!(buffers.face_count, 0);
        assert!(buffers.vertex.contents().is_empty());
        assert!(buffers.index.contents().is_empty());
    }

    #[test]
    fn lone_block_has_six_faces() {
        let mut grid = BlockGrid::new();
        grid.set_block(4, 10, 4, 2).unwrap();
        let (buffers, _) = mesh(&grid);
        assert_eq!(buffers.face_count, 6);
        assert_eq!(buffers.vertex.contents().len(), 6 * 4 * ChunkVertex::SIZE);
        assert_eq!(buffers.index.contents().len(), 6 * 6 * 4);
        assert!(vertices(&buffers).iter().all(|v| v.block == 2));
    }

    #[test]
    fn shared_faces_between_solids_are_culled() {
        let mut grid = BlockGrid::new();
        grid.set_block(4, 10, 4, 1).unwrap();
        grid.set_block(5, 10, 4, 1).unwrap();
        let (buffers, _) = mesh(&grid);
        assert_eq!(buffers.face_count, 10);
    }

    #[test]
    fn chunk_border_counts_as_air() {
        let (buffers, _) = mesh(&BlockGrid::filled(3));
        let sx = 16;
        let sy = 256;
        let sz = 16;
        assert_eq!(buffers.face_count as usize, 2 * (sx * sz + sx * sy + sy * sz));
    }

    #[test]
    fn every_face_sits_on_a_solid_air_boundary() {
        let mut grid = BlockGrid::new();
        let mut rng = fastrand::Rng::with_seed(11);
        for _ in 0..400 {
            let (x, y, z) = (rng.i32(0..16), rng.i32(0..24), rng.i32(0..16));
            grid.set_block(x, y, z, rng.u32(1..5)).unwrap();
        }
        let (buffers, _) = mesh(&grid);
        assert!(buffers.face_count as usize <= 6 * grid.solid_count());

        for quad in vertices(&buffers).chunks_exact(4) {
            let side: BlockSide = num::FromPrimitive::from_u32(quad[0].side).unwrap();
            let n = side.offset();
            let min = |axis: usize| quad.iter().map(|v| v.position[axis]).fold(f32::MAX, f32::min);
            let face_min = [min(0) as i32, min(1) as i32, min(2) as i32];
            let solid = [
                face_min[0] - n.x.max(0),
                face_min[1] - n.y.max(0),
                face_min[2] - n.z.max(0),
            ];
            let block = grid.get_block(solid[0], solid[1], solid[2]).unwrap();
            assert_ne!(block, AIR);
            assert_eq!(block, quad[0].block);
            let neighbour = grid
                .get_block(solid[0] + n.x, solid[1] + n.y, solid[2] + n.z)
                .unwrap_or(AIR);
            assert_eq!(neighbour, AIR);
        }
    }

    #[test]
    fn indices_stay_within_the_valid_prefix() {
        let mut grid = BlockGrid::new();
        grid.set_block(0, 0, 0, 1).unwrap();
        grid.set_block(15, 255, 15, 1).unwrap();
        let (buffers, _) = mesh(&grid);
        let vertex_count = buffers.face_count * 4;
        let indices: Vec<u32> = buffers
            .index
            .contents()
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert!(indices.iter().all(|&i| i < vertex_count));
    }

    #[test]
    fn copy_out_beyond_the_meshed_prefix_fails() {
        let device = HostDevice::new();
        let mut mesher = HostMesher::new(device.clone());
        let mut grid = BlockGrid::new();
        grid.set_block(1, 1, 1, 1).unwrap();
        let faces = pollster::block_on(async {
            mesher.wait_until_ready().await?;
            mesher.dispatch(ChunkKey::ORIGIN, &grid).await
        })
        .unwrap();
        assert_eq!(faces, 6);
        assert!(mesher.copy_out(7).is_err());
        assert_eq!(device.stats().buffers_created, 0);
    }
}
