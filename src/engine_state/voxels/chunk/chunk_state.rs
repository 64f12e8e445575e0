//! Lifecycle states of a chunk entity.

use num_derive::FromPrimitive;

/// Where a chunk is in its generate-then-mesh lifecycle.
///
/// Stored in an `AtomicU8` on the chunk, so the discriminants are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u8)]
pub enum ChunkState {
    /// Constructed but not yet handed to the scheduler
    Unloaded = 0,
    /// Waiting in the scheduler's FIFO
    Queued = 1,
    /// The generator is filling the block grid
    Generating = 2,
    /// The grid is complete and the mesher is running
    Meshing = 3,
    /// Mesh buffers are attached and the chunk can be drawn
    Ready = 4,
    /// Evicted; terminal
    Disposed = 5,
    /// A stage failed for this chunk; terminal until evicted
    Failed = 6,
}

impl ChunkState {
    /// Whether the block grid holds generated data.
    pub fn has_blocks(self) -> bool {
        matches!(self, ChunkState::Meshing | ChunkState::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num::FromPrimitive;

    #[test]
    fn only_meshing_and_ready_chunks_expose_blocks() {
        let with_blocks: Vec<ChunkState> = (0..=6u8)
            .filter_map(ChunkState::from_u8)
            .filter(|state| state.has_blocks())
            .collect();
        assert_eq!(with_blocks, [ChunkState::Meshing, ChunkState::Ready]);
        assert_eq!(ChunkState::from_u8(7), None);
    }
}
