//! Quads of single voxel faces, built from the per-side corner table.

use cgmath::Point3;

use crate::engine_state::rendering::vertex::ChunkVertex;
use crate::engine_state::voxels::block::block_side::BlockSide;
use crate::engine_state::voxels::block::BlockId;

/// UVs of the lower-left, lower-right, upper-left and upper-right corners.
const CORNER_UVS: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];

/// Represents a single quad face of a voxel in the mesh.
///
/// A face is defined by four corner points in chunk coordinates, seen from
/// outside the block. Vertices are emitted lower-left, lower-right,
/// upper-left, upper-right, which [`super::face_indices`] turns into two
/// triangles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Face {
    /// Lower-left corner
    pub ll: Point3<u32>,
    /// Lower-right corner
    pub lr: Point3<u32>,
    /// Upper-left corner
    pub ul: Point3<u32>,
    /// Upper-right corner
    pub ur: Point3<u32>,
    /// Block id of the voxel
    pub block: BlockId,
    /// Which side of the block this face represents
    pub side: BlockSide,
}

impl Face {
    /// Creates the face on `side` of the voxel at `(i, j, k)`.
    ///
    /// # Arguments
    /// * `i`, `j`, `k` - The coordinates of the voxel in chunk space
    /// * `block` - Block id of the voxel
    /// * `side` - Which side of the block this face represents
    pub fn new(i: u32, j: u32, k: u32, block: BlockId, side: BlockSide) -> Self {
        let p = |x: u32, y: u32, z: u32| Point3::new(i + x, j + y, k + z);
        let [ll, lr, ul, ur] = match side {
            BlockSide::FRONT => [p(0, 0, 0), p(0, 0, 1), p(0, 1, 0), p(0, 1, 1)],
            BlockSide::BACK => [p(1, 0, 1), p(1, 0, 0), p(1, 1, 1), p(1, 1, 0)],
            BlockSide::BOTTOM => [p(0, 0, 1), p(0, 0, 0), p(1, 0, 1), p(1, 0, 0)],
            BlockSide::TOP => [p(0, 1, 0), p(0, 1, 1), p(1, 1, 0), p(1, 1, 1)],
            BlockSide::LEFT => [p(1, 0, 0), p(0, 0, 0), p(1, 1, 0), p(0, 1, 0)],
            BlockSide::RIGHT => [p(0, 0, 1), p(1, 0, 1), p(0, 1, 1), p(1, 1, 1)],
        };
        Face {
            ll,
            lr,
            ul,
            ur,
            block,
            side,
        }
    }

    /// The four vertices in emission order.
    pub fn vertices(&self) -> [ChunkVertex; 4] {
        let corners = [self.ll, self.lr, self.ul, self.ur];
        std::array::from_fn(|i| ChunkVertex::new(corners[i], self.side, CORNER_UVS[i], self.block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_corner_lies_on_the_face_plane() {
        for side in BlockSide::all() {
            let face = Face::new(3, 4, 5, 1, side);
            let offset = side.offset();
            for corner in [face.ll, face.lr, face.ul, face.ur] {
                let plane = |c: u32, base: u32, d: i32| match d {
                    -1 => c == base,
                    1 => c == base + 1,
                    _ => true,
                };
                assert!(plane(corner.x, 3, offset.x), "{side:?} {corner:?}");
                assert!(plane(corner.y, 4, offset.y), "{side:?} {corner:?}");
                assert!(plane(corner.z, 5, offset.z), "{side:?} {corner:?}");
            }
        }
    }

    #[test]
    fn corners_are_distinct() {
        for side in BlockSide::all() {
            let face = Face::new(0, 0, 0, 1, side);
            let corners = [face.ll, face.lr, face.ul, face.ur];
            for a in 0..4 {
                for b in a + 1..4 {
                    assert_ne!(corners[a], corners[b]);
                }
            }
        }
    }
}
