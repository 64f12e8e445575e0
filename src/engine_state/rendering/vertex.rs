//! Vertex format written by the meshing stage.
//!
//! The layout is shared by the host mesher, `chunk_mesh.wgsl` and whatever
//! render pass consumes the published buffers.

use cgmath::{Point3, Vector3};

use crate::engine_state::voxels::block::block_side::BlockSide;
use crate::engine_state::voxels::block::BlockId;

/// One corner of a face, in chunk-local block units.
///
/// # Memory Layout
/// - Position: 4x f32 (16 bytes, `w = 1`)
/// - Normal: 4x f32 (16 bytes, `w = 0`)
/// - Texture Coordinates: 2x f32 (8 bytes)
/// - Block id: u32 (4 bytes)
/// - Side: u32 (4 bytes)
///
/// Total size: 48 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ChunkVertex {
    /// Chunk-local position
    pub position: [f32; 4],
    /// Outward face normal
    pub normal: [f32; 4],
    /// Corner UV in `0.0..=1.0`
    pub uv: [f32; 2],
    /// Block id of the solid voxel the face belongs to
    pub block: u32,
    /// [`BlockSide`] discriminant
    pub side: u32,
}

impl ChunkVertex {
    /// Byte size of one vertex.
    pub const SIZE: usize = std::mem::size_of::<ChunkVertex>();

    /// Creates a vertex.
    ///
    /// # Arguments
    /// * `pos` - Corner position in chunk-local block units
    /// * `side` - Side of the block the face belongs to
    /// * `uv` - Corner texture coordinate
    /// * `block` - Block id of the voxel
    pub fn new(pos: Point3<u32>, side: BlockSide, uv: [f32; 2], block: BlockId) -> Self {
        let normal: Vector3<f32> = side.normal();
        ChunkVertex {
            position: [pos.x as f32, pos.y as f32, pos.z as f32, 1.0],
            normal: [normal.x, normal.y, normal.z, 0.0],
            uv,
            block,
            side: side as u32,
        }
    }

    /// Returns the vertex buffer layout description for a render pipeline.
    ///
    /// # Shader Attributes
    /// - `location = 0`: position (vec4<f32>)
    /// - `location = 1`: normal (vec4<f32>)
    /// - `location = 2`: uv (vec2<f32>)
    /// - `location = 3`: block (u32)
    /// - `location = 4`: side (u32)
    pub fn desc<'a>() -> wgpu::VertexBufferLayout<'a> {
        const ATTRIBUTES: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
            0 => Float32x4,
            1 => Float32x4,
            2 => Float32x2,
            3 => Uint32,
            4 => Uint32,
        ];
        wgpu::VertexBufferLayout {
            array_stride: ChunkVertex::SIZE as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &ATTRIBUTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_48_bytes() {
        assert_eq!(ChunkVertex::SIZE, 48);
    }

    #[test]
    fn layout_stride_matches_struct() {
        let layout = ChunkVertex::desc();
        assert_eq!(layout.array_stride, 48);
        assert_eq!(layout.attributes.len(), 5);
        assert_eq!(layout.attributes[3].offset, 40);
    }

    #[test]
    fn vertex_carries_side_normal() {
        let v = ChunkVertex::new(Point3::new(1, 2, 3), BlockSide::TOP, [0.0, 1.0], 7);
        assert_eq!(v.position, [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(v.normal, [0.0, 1.0, 0.0, 0.0]);
        assert_eq!(v.side, BlockSide::TOP as u32);
    }
}
