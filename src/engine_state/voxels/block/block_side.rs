//! # Block Side Module
//!
//! The six faces of a voxel, with the neighbour offset and outward normal the
//! mesher needs for face culling.

use cgmath::Vector3;
use num_derive::FromPrimitive;

/// Represents the six possible faces of a voxel block.
///
/// The discriminants are the side indices stored in each vertex and must
/// match the positions of the `OFFSETS` and `CORNERS` tables in
/// `chunk_mesh.wgsl`.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug, FromPrimitive)]
pub enum BlockSide {
    /// The front face (facing negative X)
    FRONT = 0,

    /// The back face (facing positive X)
    BACK = 1,

    /// The bottom face (facing negative Y)
    BOTTOM = 2,

    /// The top face (facing positive Y)
    TOP = 3,

    /// The left face (facing negative Z)
    LEFT = 4,

    /// The right face (facing positive Z)
    RIGHT = 5,
}

impl BlockSide {
    /// Returns all six block faces in discriminant order.
    pub fn all() -> [BlockSide; 6] {
        [
            BlockSide::FRONT,
            BlockSide::BACK,
            BlockSide::BOTTOM,
            BlockSide::TOP,
            BlockSide::LEFT,
            BlockSide::RIGHT,
        ]
    }

    /// Offset from a voxel to the neighbour sharing this face.
    pub fn offset(self) -> Vector3<i32> {
        match self {
            BlockSide::FRONT => Vector3::new(-1, 0, 0),
            BlockSide::BACK => Vector3::new(1, 0, 0),
            BlockSide::BOTTOM => Vector3::new(0, -1, 0),
            BlockSide::TOP => Vector3::new(0, 1, 0),
            BlockSide::LEFT => Vector3::new(0, 0, -1),
            BlockSide::RIGHT => Vector3::new(0, 0, 1),
        }
    }

    /// Outward unit normal of the face.
    pub fn normal(self) -> Vector3<f32> {
        self.offset().cast::<f32>().unwrap_or(Vector3::new(0.0, 0.0, 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num::FromPrimitive;

    #[test]
    fn discriminants_round_trip() {
        for side in BlockSide::all() {
            assert_eq!(BlockSide::from_u8(side as u8), Some(side));
        }
        assert_eq!(BlockSide::from_u8(6), None);
    }

    #[test]
    fn offsets_follow_the_mesh_shader_table() {
        let shader = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/assets/shaders/chunk_mesh.wgsl"
        ));
        let table: Vec<Vector3<i32>> = shader
            .lines()
            .skip_while(|line| !line.contains("OFFSETS: array"))
            .skip(1)
            .take(6)
            .map(|line| {
                let inner = line.trim().trim_start_matches("vec3<i32>(").trim_end_matches("),");
                let parts: Vec<i32> = inner.split(',').map(|v| v.trim().parse().unwrap()).collect();
                Vector3::new(parts[0], parts[1], parts[2])
            })
            .collect();

        let offsets: Vec<Vector3<i32>> = BlockSide::all().iter().map(|side| side.offset()).collect();
        assert_eq!(table, offsets);
    }

    #[test]
    fn opposite_sides_cancel() {
        let sum = BlockSide::all()
            .iter()
            .fold(Vector3::new(0, 0, 0), |acc, side| acc + side.offset());
        assert_eq!(sum, Vector3::new(0, 0, 0));
    }
}
