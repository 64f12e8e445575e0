//! # Chunk Meshing (Stage B)
//!
//! Turns a block grid into quads. Every side of a solid voxel whose neighbour
//! is air gets exactly one face; voxels outside the chunk count as air, so
//! chunk borders are always closed.
//!
//! Output goes into scratch buffers sized for the worst case
//! ([`MAX_FACES_PER_CHUNK`]). Only the first `face_count` quads are valid,
//! and [`Mesher::copy_out`] moves exactly that prefix into buffers the chunk
//! owns. Scratch capacity past the prefix is never read.

pub mod face;
pub mod gpu;
pub mod host;

use crate::engine_state::compute::ComputeStage;
use crate::engine_state::voxels::chunk::block_grid::BlockGrid;
use crate::engine_state::voxels::chunk::{ChunkKey, MeshBuffers, BLOCKS_PER_CHUNK};
use crate::error::StageError;

/// Upper bound on faces one chunk can produce.
pub const MAX_FACES_PER_CHUNK: usize = 6 * BLOCKS_PER_CHUNK;
/// Vertices per face.
pub const VERTICES_PER_FACE: usize = 4;
/// Indices per face.
pub const INDICES_PER_FACE: usize = 6;

/// Indices of face `face`: two triangles over its four vertices.
pub fn face_indices(face: u32) -> [u32; INDICES_PER_FACE] {
    let base = face * VERTICES_PER_FACE as u32;
    [base, base + 1, base + 3, base, base + 3, base + 2]
}

/// Stage B of the chunk pipeline.
#[allow(async_fn_in_trait)]
pub trait Mesher: ComputeStage {
    /// Buffer type the published mesh lives in.
    type Buffer: Send + Sync + 'static;

    /// Meshes `grid` into the scratch buffers and returns the face count.
    ///
    /// The count is only read once the device reports the dispatch complete.
    async fn dispatch(&mut self, key: ChunkKey, grid: &BlockGrid) -> Result<u32, StageError>;

    /// Copies the first `face_count` faces into fresh chunk-owned buffers.
    fn copy_out(&mut self, face_count: u32) -> Result<MeshBuffers<Self::Buffer>, StageError>;

    /// Meshes `grid` and hands back buffers holding exactly its faces.
    async fn mesh(
        &mut self,
        key: ChunkKey,
        grid: &BlockGrid,
    ) -> Result<MeshBuffers<Self::Buffer>, StageError> {
        self.wait_until_ready().await?;
        let face_count = self.dispatch(key, grid).await?;
        self.copy_out(face_count)
    }
}
