//! # Chunk Generation Task
//!
//! Runs the full pipeline (generate, then mesh) for one chunk on a worker
//! and publishes the mesh on the control thread.
//!
//! The chunk may be evicted at any point while the task is queued or
//! running. The pipeline stops early when it notices, and a late result is
//! dropped with its buffers parked for deferred release.

use std::sync::Arc;

use log::{debug, error};

use crate::engine_state::buffer_state::BufferState;
use crate::engine_state::compute::pipeline::{ChunkPipeline, PipelineOutcome};
use crate::engine_state::device::{Backend, BufferOf};
use crate::engine_state::task_management::task::{ChunkFailure, Task, TaskReport, TaskResult};
use crate::engine_state::voxels::chunk::Chunk;
use crate::error::StageError;

/// Generates and meshes one chunk.
pub struct ChunkGenerationTask<B: Backend> {
    /// The chunk to populate, shared with the store
    chunk: Arc<Chunk<BufferOf<B>>>,
}

impl<B: Backend> ChunkGenerationTask<B> {
    /// Creates a task for a chunk that is already `Queued`.
    pub fn new(chunk: Arc<Chunk<BufferOf<B>>>) -> Self {
        ChunkGenerationTask { chunk }
    }
}

impl<B: Backend> Task<B> for ChunkGenerationTask<B> {
    fn process(self: Box<Self>, pipeline: &mut ChunkPipeline<B>) -> Box<dyn TaskResult<B>> {
        let outcome = pollster::block_on(pipeline.populate(&self.chunk));
        Box::new(ChunkGenerationTaskResult {
            chunk: self.chunk,
            outcome,
        })
    }
}

/// A finished pipeline run waiting to be published.
pub struct ChunkGenerationTaskResult<B: Backend> {
    chunk: Arc<Chunk<BufferOf<B>>>,
    outcome: Result<PipelineOutcome<BufferOf<B>>, StageError>,
}

impl<B: Backend> TaskResult<B> for ChunkGenerationTaskResult<B> {
    fn handle_result(self: Box<Self>, buffer_state: &mut BufferState<B::Device>) -> TaskReport {
        let key = self.chunk.key();
        match self.outcome {
            Ok(PipelineOutcome::Meshed(buffers)) => match self.chunk.publish_mesh(buffers) {
                Ok(previous) => {
                    if let Some(previous) = previous {
                        buffer_state.schedule_release("replaced chunk mesh", previous);
                    }
                    TaskReport::Ready(key)
                }
                Err(buffers) => {
                    debug!("Dropping mesh of evicted chunk ({}, {})", key.x, key.z);
                    buffer_state.schedule_release("stale chunk mesh", buffers);
                    TaskReport::Discarded(key)
                }
            },
            Ok(PipelineOutcome::Stale) => {
                debug!("Chunk ({}, {}) evicted before meshing", key.x, key.z);
                TaskReport::Discarded(key)
            }
            Err(error) if self.chunk.is_discarded() => {
                debug!(
                    "Ignoring failure of evicted chunk ({}, {}): {}",
                    key.x, key.z, error
                );
                TaskReport::Discarded(key)
            }
            Err(error) => {
                error!("Chunk ({}, {}) failed: {}", key.x, key.z, error);
                self.chunk.mark_failed();
                TaskReport::Failed(ChunkFailure { key, error })
            }
        }
    }
}
