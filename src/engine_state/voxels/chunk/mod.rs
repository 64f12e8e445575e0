//! # Chunk Module
//!
//! The chunk entity shared between the store on the control thread and the
//! pipeline worker that populates it.
//!
//! ## Lifecycle
//!
//! ```text
//! Unloaded -> Queued -> Generating -> Meshing -> Ready -> Disposed
//!                            \            \
//!                             +------------+--> Failed
//! ```
//!
//! Disposal can happen from any state. It raises the discard flag under the
//! same lock that guards the mesh buffers, so a pipeline that finishes after
//! eviction always sees the flag and hands its buffers back instead of
//! attaching them.

pub mod block_grid;
pub mod chunk_state;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use cgmath::{Matrix4, Point2, Vector3};
use num::FromPrimitive;

use crate::engine_state::voxels::block::BlockId;
use crate::error::ChunkError;
use block_grid::BlockGrid;
use chunk_state::ChunkState;

/// Width of a chunk along X, in blocks.
pub const CHUNK_WIDTH: usize = 16;
/// Height of a chunk along Y, in blocks.
pub const CHUNK_HEIGHT: usize = 256;
/// Depth of a chunk along Z, in blocks.
pub const CHUNK_DEPTH: usize = 16;
/// Total number of blocks in a chunk.
pub const BLOCKS_PER_CHUNK: usize = CHUNK_WIDTH * CHUNK_HEIGHT * CHUNK_DEPTH;
/// Edge length of one block in world units.
pub const BLOCK_SIZE: f32 = 1.0;

/// Horizontal chunk coordinate. Used directly as the store key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    /// Chunk coordinate along X
    pub x: i32,
    /// Chunk coordinate along Z
    pub z: i32,
}

impl ChunkKey {
    /// The chunk generated by bootstrap.
    pub const ORIGIN: ChunkKey = ChunkKey { x: 0, z: 0 };

    /// Creates a key from chunk coordinates.
    pub const fn new(x: i32, z: i32) -> Self {
        ChunkKey { x, z }
    }

    /// Chunk containing a world-space position. Only X and Z matter.
    pub fn from_world_position(position: Vector3<f32>) -> Self {
        let block_x = (position.x / BLOCK_SIZE).floor() as i32;
        let block_z = (position.z / BLOCK_SIZE).floor() as i32;
        Self::from_block(block_x, block_z)
    }

    /// Chunk containing a world block column.
    pub fn from_block(block_x: i32, block_z: i32) -> Self {
        ChunkKey {
            x: block_x.div_euclid(CHUNK_WIDTH as i32),
            z: block_z.div_euclid(CHUNK_DEPTH as i32),
        }
    }

    /// World block column of a chunk-local column.
    ///
    /// Wraps at the `i32` edges like the generation shader does.
    pub fn world_column(self, local_x: i32, local_z: i32) -> (i32, i32) {
        (
            self.x.wrapping_mul(CHUNK_WIDTH as i32).wrapping_add(local_x),
            self.z.wrapping_mul(CHUNK_DEPTH as i32).wrapping_add(local_z),
        )
    }

    /// Both coordinates packed into one integer, x in the high half.
    pub fn packed(self) -> u64 {
        ((self.x as u32 as u64) << 32) | self.z as u32 as u64
    }

    /// Inverse of [`ChunkKey::packed`].
    pub fn from_packed(packed: u64) -> Self {
        ChunkKey {
            x: (packed >> 32) as u32 as i32,
            z: packed as u32 as i32,
        }
    }

    /// Chebyshev distance in chunks.
    pub fn ring_distance(self, other: ChunkKey) -> u32 {
        self.x.abs_diff(other.x).max(self.z.abs_diff(other.z))
    }

    /// World-space position of the chunk's minimum corner.
    pub fn world_origin(self) -> Vector3<f32> {
        Vector3::new(
            self.x as f32 * CHUNK_WIDTH as f32 * BLOCK_SIZE,
            0.0,
            self.z as f32 * CHUNK_DEPTH as f32 * BLOCK_SIZE,
        )
    }

    /// Model transform placing chunk-local vertices in the world.
    pub fn transform(self) -> Matrix4<f32> {
        Matrix4::from_translation(self.world_origin()) * Matrix4::from_scale(BLOCK_SIZE)
    }
}

impl From<Point2<i32>> for ChunkKey {
    fn from(point: Point2<i32>) -> Self {
        ChunkKey::new(point.x, point.y)
    }
}

impl From<ChunkKey> for Point2<i32> {
    fn from(key: ChunkKey) -> Self {
        Point2::new(key.x, key.z)
    }
}

/// GPU geometry owned by one chunk. Only the first `face_count` quads exist.
#[derive(Debug)]
pub struct MeshBuffers<Buf> {
    /// `face_count * 4` vertices
    pub vertex: Buf,
    /// `face_count * 6` indices
    pub index: Buf,
    /// Number of quads emitted by the mesher
    pub face_count: u32,
}

impl<Buf> MeshBuffers<Buf> {
    /// Both buffers, vertex first.
    pub fn into_buffers(self) -> [Buf; 2] {
        [self.vertex, self.index]
    }
}

/// A chunk: coordinate, block grid, mesh buffers and lifecycle state.
pub struct Chunk<Buf> {
    key: ChunkKey,
    state: AtomicU8,
    discarded: AtomicBool,
    blocks: RwLock<Arc<BlockGrid>>,
    mesh: Mutex<Option<MeshBuffers<Buf>>>,
}

impl<Buf> Chunk<Buf> {
    /// Creates an unloaded chunk with an all-air grid.
    pub fn new(key: ChunkKey) -> Self {
        Self::with_blocks(key, BlockGrid::new())
    }

    /// Creates an unloaded chunk with a pre-filled grid.
    pub fn with_blocks(key: ChunkKey, blocks: BlockGrid) -> Self {
        Chunk {
            key,
            state: AtomicU8::new(ChunkState::Unloaded as u8),
            discarded: AtomicBool::new(false),
            blocks: RwLock::new(Arc::new(blocks)),
            mesh: Mutex::new(None),
        }
    }

    /// The chunk's coordinate.
    pub fn key(&self) -> ChunkKey {
        self.key
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChunkState {
        ChunkState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(ChunkState::Failed)
    }

    /// Whether the chunk has been evicted.
    pub fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::Acquire)
    }

    /// Moves from `from` to `to`, failing if the chunk was elsewhere.
    pub fn transition(&self, from: ChunkState, to: ChunkState) -> Result<(), ChunkError> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| ChunkError::InvalidTransition {
                key: self.key,
                from,
                to,
                actual: ChunkState::from_u8(actual).unwrap_or(ChunkState::Failed),
            })
    }

    /// Snapshot of the block grid.
    pub fn blocks(&self) -> Arc<BlockGrid> {
        self.blocks.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Installs a freshly generated grid.
    pub fn replace_blocks(&self, grid: BlockGrid) {
        *self.blocks.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(grid);
    }

    /// Block id at a local position.
    pub fn get_block(&self, x: i32, y: i32, z: i32) -> Result<BlockId, ChunkError> {
        self.blocks().get_block(x, y, z)
    }

    /// Writes a block at a local position. The mesh is not rebuilt.
    pub fn set_block(&self, x: i32, y: i32, z: i32, id: BlockId) -> Result<(), ChunkError> {
        let mut blocks = self.blocks.write().unwrap_or_else(PoisonError::into_inner);
        BlockGrid::index(x, y, z).ok_or(ChunkError::OutOfBounds { x, y, z })?;
        Arc::make_mut(&mut blocks).set_block(x, y, z, id)
    }

    /// Replaces a block with air and returns the old id.
    pub fn pop_block(&self, x: i32, y: i32, z: i32) -> Result<BlockId, ChunkError> {
        let mut blocks = self.blocks.write().unwrap_or_else(PoisonError::into_inner);
        BlockGrid::index(x, y, z).ok_or(ChunkError::OutOfBounds { x, y, z })?;
        Arc::make_mut(&mut blocks).pop_block(x, y, z)
    }

    /// Topmost solid block of a local column, or `None` before generation finished.
    pub fn highest_solid_block(&self, x: i32, z: i32) -> Result<Option<u32>, ChunkError> {
        if !self.state().has_blocks() {
            return Ok(None);
        }
        self.blocks().highest_solid_block(x, z).map(Some)
    }

    fn lock_mesh(&self) -> MutexGuard<'_, Option<MeshBuffers<Buf>>> {
        self.mesh.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Face count of the attached mesh.
    pub fn face_count(&self) -> Option<u32> {
        self.lock_mesh().as_ref().map(|mesh| mesh.face_count)
    }

    /// Runs `f` against the attached mesh, if any.
    pub fn with_mesh<R>(&self, f: impl FnOnce(&MeshBuffers<Buf>) -> R) -> Option<R> {
        self.lock_mesh().as_ref().map(f)
    }

    /// Attaches mesh buffers and marks the chunk ready.
    ///
    /// Returns the buffers they replaced, which the caller must release once
    /// the device is idle. A discarded chunk refuses the buffers and hands
    /// them back in `Err`.
    pub fn publish_mesh(
        &self,
        buffers: MeshBuffers<Buf>,
    ) -> Result<Option<MeshBuffers<Buf>>, MeshBuffers<Buf>> {
        let mut mesh = self.lock_mesh();
        if self.is_discarded() {
            return Err(buffers);
        }
        match self.transition(ChunkState::Meshing, ChunkState::Ready) {
            Ok(()) => Ok(mesh.replace(buffers)),
            Err(_) => Err(buffers),
        }
    }

    /// Evicts the chunk.
    ///
    /// The first call raises the discard flag, moves the chunk to `Disposed`
    /// and returns its buffers; later calls return `None`.
    pub fn dispose(&self) -> Option<MeshBuffers<Buf>> {
        let mut mesh = self.lock_mesh();
        if self.discarded.swap(true, Ordering::AcqRel) {
            return None;
        }
        self.state.store(ChunkState::Disposed as u8, Ordering::Release);
        mesh.take()
    }

    /// Records a fatal stage failure. Discarded chunks stay `Disposed`.
    pub fn mark_failed(&self) {
        let _mesh = self.lock_mesh();
        if !self.is_discarded() {
            self.state.store(ChunkState::Failed as u8, Ordering::Release);
        }
    }
}

impl<Buf> std::fmt::Debug for Chunk<Buf> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("key", &self.key)
            .field("state", &self.state())
            .field("discarded", &self.is_discarded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meshed_chunk() -> Chunk<u32> {
        let chunk = Chunk::new(ChunkKey::new(2, -3));
        chunk.transition(ChunkState::Unloaded, ChunkState::Queued).unwrap();
        chunk.transition(ChunkState::Queued, ChunkState::Generating).unwrap();
        chunk.transition(ChunkState::Generating, ChunkState::Meshing).unwrap();
        chunk
    }

    #[test]
    fn world_positions_floor_into_chunks() {
        assert_eq!(ChunkKey::from_world_position(Vector3::new(0.0, 80.0, 0.0)), ChunkKey::new(0, 0));
        assert_eq!(ChunkKey::from_world_position(Vector3::new(15.9, 0.0, 16.0)), ChunkKey::new(0, 1));
        assert_eq!(ChunkKey::from_world_position(Vector3::new(-0.1, 0.0, -16.0)), ChunkKey::new(-1, -1));
        assert_eq!(ChunkKey::from_world_position(Vector3::new(-16.5, 0.0, 0.0)), ChunkKey::new(-2, 0));
    }

    #[test]
    fn packed_keys_round_trip_negative_coordinates() {
        for key in [ChunkKey::new(0, 0), ChunkKey::new(-1, 5), ChunkKey::new(i32::MIN, i32::MAX)] {
            assert_eq!(ChunkKey::from_packed(key.packed()), key);
        }
        assert_ne!(ChunkKey::new(1, 2).packed(), ChunkKey::new(2, 1).packed());
    }

    #[test]
    fn world_columns_wrap_at_the_key_edges() {
        assert_eq!(ChunkKey::new(-2, 3).world_column(5, 15), (-27, 63));
        let last = ChunkKey::from_block(i32::MAX, i32::MIN);
        assert_eq!(last.world_column(15, 0), (i32::MAX, i32::MIN));
        assert_eq!(
            ChunkKey::new(i32::MAX, i32::MIN).world_column(15, 15),
            (i32::MAX.wrapping_mul(16).wrapping_add(15), 15)
        );
    }

    #[test]
    fn transform_translates_by_chunk_extent() {
        let origin = ChunkKey::new(2, -1).transform() * cgmath::Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert_eq!(origin, cgmath::Vector4::new(32.0, 0.0, -16.0, 1.0));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let chunk: Chunk<u32> = Chunk::new(ChunkKey::ORIGIN);
        let err = chunk.transition(ChunkState::Queued, ChunkState::Generating).unwrap_err();
        assert_eq!(
            err,
            ChunkError::InvalidTransition {
                key: ChunkKey::ORIGIN,
                from: ChunkState::Queued,
                to: ChunkState::Generating,
                actual: ChunkState::Unloaded,
            }
        );
        assert_eq!(chunk.state(), ChunkState::Unloaded);
    }

    #[test]
    fn publish_attaches_and_returns_replaced_buffers() {
        let chunk = meshed_chunk();
        let replaced = chunk.publish_mesh(MeshBuffers { vertex: 1, index: 2, face_count: 3 }).unwrap();
        assert!(replaced.is_none());
        assert_eq!(chunk.state(), ChunkState::Ready);
        assert_eq!(chunk.face_count(), Some(3));
    }

    #[test]
    fn disposal_hands_back_buffers_exactly_once() {
        let chunk = meshed_chunk();
        chunk.publish_mesh(MeshBuffers { vertex: 1, index: 2, face_count: 3 }).unwrap();
        let released = chunk.dispose().unwrap();
        assert_eq!(released.into_buffers(), [1, 2]);
        assert!(chunk.dispose().is_none());
        assert_eq!(chunk.state(), ChunkState::Disposed);
    }

    #[test]
    fn late_mesh_for_disposed_chunk_is_refused() {
        let chunk = meshed_chunk();
        assert!(chunk.dispose().is_none());
        let refused = chunk.publish_mesh(MeshBuffers { vertex: 7, index: 8, face_count: 1 }).unwrap_err();
        assert_eq!(refused.vertex, 7);
        assert_eq!(chunk.state(), ChunkState::Disposed);
        assert!(chunk.face_count().is_none());
    }

    #[test]
    fn failed_disposed_chunk_stays_disposed() {
        let chunk = meshed_chunk();
        chunk.dispose();
        chunk.mark_failed();
        assert_eq!(chunk.state(), ChunkState::Disposed);
    }

    #[test]
    fn height_is_unknown_until_generated() {
        let chunk: Chunk<u32> = Chunk::new(ChunkKey::ORIGIN);
        chunk.set_block(3, 40, 3, 1).unwrap();
        assert_eq!(chunk.highest_solid_block(3, 3).unwrap(), None);

        let chunk = meshed_chunk();
        chunk.set_block(3, 40, 3, 1).unwrap();
        assert_eq!(chunk.highest_solid_block(3, 3).unwrap(), Some(40));
        assert_eq!(chunk.pop_block(3, 40, 3).unwrap(), 1);
        assert_eq!(chunk.highest_solid_block(3, 3).unwrap(), Some(0));
    }
}
