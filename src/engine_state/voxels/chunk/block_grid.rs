//! # Block Grid
//!
//! Dense storage of one chunk's block ids. The layout is the one the compute
//! shaders read and write: `index = x + y * SX + z * SX * SY`.

use std::fmt;

use crate::engine_state::voxels::block::{BlockId, BlockRegistry, AIR};
use crate::error::ChunkError;

use super::{BLOCKS_PER_CHUNK, CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH};

/// A fixed-size `SX x SY x SZ` array of block ids.
#[derive(Clone, PartialEq, Eq)]
pub struct BlockGrid {
    blocks: Vec<BlockId>,
}

impl BlockGrid {
    /// A grid filled with air.
    pub fn new() -> Self {
        Self::filled(AIR)
    }

    /// A grid where every cell holds `id`.
    pub fn filled(id: BlockId) -> Self {
        BlockGrid {
            blocks: vec![id; BLOCKS_PER_CHUNK],
        }
    }

    /// Flat index of a local position, or `None` when it lies outside the chunk.
    pub fn index(x: i32, y: i32, z: i32) -> Option<usize> {
        let inside = (0..CHUNK_WIDTH as i32).contains(&x)
            && (0..CHUNK_HEIGHT as i32).contains(&y)
            && (0..CHUNK_DEPTH as i32).contains(&z);
        inside.then(|| {
            x as usize + y as usize * CHUNK_WIDTH + z as usize * CHUNK_WIDTH * CHUNK_HEIGHT
        })
    }

    fn checked_index(x: i32, y: i32, z: i32) -> Result<usize, ChunkError> {
        Self::index(x, y, z).ok_or(ChunkError::OutOfBounds { x, y, z })
    }

    /// Block id at a local position.
    pub fn get_block(&self, x: i32, y: i32, z: i32) -> Result<BlockId, ChunkError> {
        Ok(self.blocks[Self::checked_index(x, y, z)?])
    }

    /// Writes `id` at a local position. Out-of-range positions leave the grid untouched.
    pub fn set_block(&mut self, x: i32, y: i32, z: i32, id: BlockId) -> Result<(), ChunkError> {
        let index = Self::checked_index(x, y, z)?;
        self.blocks[index] = id;
        Ok(())
    }

    /// Replaces the block at a local position with air, returning what was there.
    pub fn pop_block(&mut self, x: i32, y: i32, z: i32) -> Result<BlockId, ChunkError> {
        let index = Self::checked_index(x, y, z)?;
        Ok(std::mem::replace(&mut self.blocks[index], AIR))
    }

    /// The block at index 0, checked against the bedrock priming sentinel.
    pub fn first_block(&self) -> BlockId {
        self.blocks[0]
    }

    /// Y of the topmost non-air block in column `(x, z)`.
    ///
    /// Scans down from the top while the cell is air and `y > 0`, so a column
    /// of pure air reports 0.
    pub fn highest_solid_block(&self, x: i32, z: i32) -> Result<u32, ChunkError> {
        Self::checked_index(x, 0, z)?;
        let mut y = CHUNK_HEIGHT as i32 - 1;
        while y > 0 && self.get_block(x, y, z)? == AIR {
            y -= 1;
        }
        Ok(y as u32)
    }

    /// Number of non-air cells.
    pub fn solid_count(&self) -> usize {
        self.blocks.iter().filter(|&&id| BlockRegistry::is_solid(id)).count()
    }

    /// Raw ids in grid order.
    pub fn as_slice(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Mutable raw ids in grid order.
    pub fn as_mut_slice(&mut self) -> &mut [BlockId] {
        &mut self.blocks
    }

    /// The grid as the little-endian bytes uploaded to storage buffers.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.blocks)
    }

    /// Overwrites the grid from a buffer readback of exactly `4 * SX * SY * SZ` bytes.
    ///
    /// Any other length is rejected and the grid is left untouched.
    pub fn copy_from_bytes(&mut self, bytes: &[u8]) -> Result<(), ChunkError> {
        let expected = self.blocks.len() * std::mem::size_of::<BlockId>();
        if bytes.len() != expected {
            return Err(ChunkError::ByteLength {
                expected,
                actual: bytes.len(),
            });
        }
        for (dst, src) in self.blocks.iter_mut().zip(bytes.chunks_exact(4)) {
            *dst = bytemuck::pod_read_unaligned(src);
        }
        Ok(())
    }
}

impl Default for BlockGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BlockGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockGrid")
            .field("solid", &self.solid_count())
            .field("first_block", &self.first_block())
            .finish()
    }
}
