//! Per-worker chunk pipeline: generation, then meshing.

use log::debug;
use web_time::Instant;

use crate::engine_state::device::{Backend, BufferOf};
use crate::engine_state::rendering::meshing::Mesher;
use crate::engine_state::voxels::chunk::chunk_state::ChunkState;
use crate::engine_state::voxels::chunk::{Chunk, MeshBuffers};
use crate::engine_state::voxels::generation::{GenerationOutcome, Generator};
use crate::engine_state::voxels::world_type::WorldSettings;
use crate::error::StageError;

use super::ComputeStage;

/// What a pipeline run produced for a chunk.
pub enum PipelineOutcome<Buf> {
    /// Generation and meshing finished; the buffers still need publishing.
    Meshed(MeshBuffers<Buf>),
    /// The chunk was disposed before meshing started, so nothing was produced.
    Stale,
}

/// One generator and one mesher, owned by a single worker.
pub struct ChunkPipeline<B: Backend> {
    worker: usize,
    generator: B::Generator,
    mesher: B::Mesher,
}

impl<B: Backend> ChunkPipeline<B> {
    /// Builds the stages for worker `worker`.
    pub fn new(backend: &B, settings: &WorldSettings, worker: usize) -> Result<Self, StageError> {
        Ok(ChunkPipeline {
            worker,
            generator: backend.create_generator(settings)?,
            mesher: backend.create_mesher()?,
        })
    }

    /// Index of the owning worker.
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Whether both stages have a validated pipeline.
    pub fn is_ready(&self) -> bool {
        self.generator.is_ready() && self.mesher.is_ready()
    }

    /// Brings both stages to steady state.
    pub async fn warm_up(&mut self) -> Result<(), StageError> {
        let start = Instant::now();
        self.generator.warm_up().await?;
        self.mesher.warm_up().await?;
        debug!(
            "Worker {} warmed up in {:?}",
            self.worker,
            start.elapsed()
        );
        Ok(())
    }

    /// Generates and meshes `chunk`.
    ///
    /// The chunk must be `Queued`. Its grid is replaced once generation
    /// finishes, and it is left in `Meshing` for the caller to publish. If the
    /// chunk is disposed at any point before meshing starts the run stops and
    /// reports [`PipelineOutcome::Stale`].
    pub async fn populate(
        &mut self,
        chunk: &Chunk<BufferOf<B>>,
    ) -> Result<PipelineOutcome<BufferOf<B>>, StageError> {
        let key = chunk.key();
        if chunk.transition(ChunkState::Queued, ChunkState::Generating).is_err() {
            return Ok(PipelineOutcome::Stale);
        }

        let start = Instant::now();
        let mut grid = chunk.blocks().as_ref().clone();
        let outcome = self.generator.generate(key, &mut grid).await?;
        let generated = start.elapsed();

        if chunk.is_discarded() {
            return Ok(PipelineOutcome::Stale);
        }
        chunk.replace_blocks(grid);
        if chunk.transition(ChunkState::Generating, ChunkState::Meshing).is_err() {
            return Ok(PipelineOutcome::Stale);
        }

        let blocks = chunk.blocks();
        let buffers = self.mesher.mesh(key, &blocks).await?;

        debug!(
            "Chunk ({}, {}) on worker {}: {} in {:?}, {} faces in {:?}",
            key.x,
            key.z,
            self.worker,
            match outcome {
                GenerationOutcome::Generated => "generated",
                GenerationOutcome::Primed => "primed",
            },
            generated,
            buffers.face_count,
            start.elapsed() - generated
        );
        Ok(PipelineOutcome::Meshed(buffers))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine_state::device::host::{HostBackend, HostDevice};
    use crate::engine_state::voxels::block::BlockRegistry;
    use crate::engine_state::voxels::chunk::ChunkKey;
    use crate::engine_state::compute::StageKind;
    use crate::engine_state::voxels::world_type::WorldType;

    fn pipeline(device: &HostDevice) -> ChunkPipeline<HostBackend> {
        let registry = Arc::new(BlockRegistry::default());
        let dirt = registry.id_of("dirt").unwrap();
        let settings = WorldSettings::new(5, WorldType::Flat(vec![1, dirt, dirt]), registry);
        ChunkPipeline::new(&HostBackend::with_device(device.clone()), &settings, 0).unwrap()
    }

    fn queued_chunk() -> Chunk<BufferOf<HostBackend>> {
        let chunk = Chunk::new(ChunkKey::new(2, -1));
        chunk.transition(ChunkState::Unloaded, ChunkState::Queued).unwrap();
        chunk
    }

    #[test]
    fn populate_generates_then_meshes() {
        let device = HostDevice::new();
        let mut pipeline = pipeline(&device);
        let chunk = queued_chunk();

        let outcome = pollster::block_on(pipeline.populate(&chunk)).unwrap();

        let PipelineOutcome::Meshed(buffers) = outcome else {
            panic!("expected a mesh");
        };
        assert!(pipeline.is_ready());
        assert_eq!(chunk.state(), ChunkState::Meshing);
        assert_eq!(chunk.highest_solid_block(3, 3).unwrap(), Some(2));
        // a 16x3x16 slab
        assert_eq!(buffers.face_count, 2 * 16 * 16 + 4 * 16 * 3);
        let stages: Vec<_> = device.dispatch_log().iter().map(|r| r.stage).collect();
        assert_eq!(stages, vec![StageKind::Generate, StageKind::Mesh]);
    }

    #[test]
    fn disposed_chunk_is_not_generated() {
        let device = HostDevice::new();
        let mut pipeline = pipeline(&device);
        let chunk = queued_chunk();
        chunk.dispose();

        let outcome = pollster::block_on(pipeline.populate(&chunk)).unwrap();

        assert!(matches!(outcome, PipelineOutcome::Stale));
        assert!(device.dispatch_log().is_empty());
    }

    #[test]
    fn stage_failure_is_returned() {
        let device = HostDevice::new();
        let mut pipeline = pipeline(&device);
        let chunk = queued_chunk();
        device.fail_dispatch(StageKind::Mesh, chunk.key());

        let err = pollster::block_on(pipeline.populate(&chunk)).err().unwrap();

        assert!(matches!(err, StageError::Dispatch { stage: "mesh", .. }));
        assert_eq!(device.stats().buffers_created, 0);
    }
}
