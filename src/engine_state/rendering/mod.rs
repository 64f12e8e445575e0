//! Render-facing side of the streaming engine.
//!
//! The engine never draws anything itself. It meshes chunks into vertex and
//! index buffers and tells a [`SceneGraph`] when chunk nodes appear, become
//! drawable and go away. Renderers pull geometry through
//! [`RenderableChunk`] views.

use cgmath::Matrix4;

use super::voxels::chunk::ChunkKey;

pub mod meshing;
pub mod vertex;

pub use vertex::ChunkVertex;

/// Host scene graph notified about chunk nodes.
///
/// All calls happen on the thread driving the engine.
pub trait SceneGraph {
    /// A chunk entered the working set and its node should be placed at `transform`.
    fn attach(&mut self, key: ChunkKey, transform: Matrix4<f32>);

    /// The chunk's mesh was published and can be drawn.
    fn chunk_ready(&mut self, key: ChunkKey, face_count: u32);

    /// The chunk was evicted; its node must be removed.
    fn detach(&mut self, key: ChunkKey);
}

impl SceneGraph for () {
    fn attach(&mut self, _key: ChunkKey, _transform: Matrix4<f32>) {}

    fn chunk_ready(&mut self, _key: ChunkKey, _face_count: u32) {}

    fn detach(&mut self, _key: ChunkKey) {}
}

/// Geometry of one ready chunk.
///
/// Only the first `face_count * 4` vertices and `face_count * 6` indices
/// are meaningful.
pub struct RenderableChunk<'a, Buf> {
    /// Chunk coordinate
    pub key: ChunkKey,
    /// Chunk-local to world transform
    pub transform: Matrix4<f32>,
    /// Vertex buffer in [`ChunkVertex`] layout
    pub vertex: &'a Buf,
    /// `u32` index buffer
    pub index: &'a Buf,
    /// Number of quads
    pub face_count: u32,
}

impl<Buf> RenderableChunk<'_, Buf> {
    /// Number of indices to draw.
    pub fn index_count(&self) -> u32 {
        self.face_count * meshing::INDICES_PER_FACE as u32
    }
}
