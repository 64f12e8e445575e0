//! # Task System Core Traits
//!
//! A [`Task`] runs on a pipeline worker with exclusive access to that
//! worker's [`ChunkPipeline`]. It hands back a [`TaskResult`], which is
//! handled on the control thread with access to the deferred release queue
//! and turned into a [`TaskReport`].

use crate::engine_state::buffer_state::BufferState;
use crate::engine_state::compute::pipeline::ChunkPipeline;
use crate::engine_state::device::Backend;
use crate::engine_state::voxels::chunk::ChunkKey;
use crate::error::StageError;

/// A unit of work executed on a pipeline worker.
pub trait Task<B: Backend>: Send {
    /// Processes the task with the worker's stages.
    ///
    /// Runs on the worker thread; any async stage work is driven to
    /// completion before returning.
    fn process(self: Box<Self>, pipeline: &mut ChunkPipeline<B>) -> Box<dyn TaskResult<B>>;
}

/// The outcome of a [`Task`], applied on the control thread.
pub trait TaskResult<B: Backend>: Send {
    /// Applies the result.
    ///
    /// # Arguments
    /// * `buffer_state` - Receives any buffers the result has to give up
    ///
    /// # Returns
    /// What happened, for the caller's tick report
    fn handle_result(self: Box<Self>, buffer_state: &mut BufferState<B::Device>) -> TaskReport;
}

/// A stage failure tied to the chunk it happened on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    /// Chunk whose pipeline failed
    pub key: ChunkKey,
    /// The stage error
    pub error: StageError,
}

/// Control-thread view of a finished task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskReport {
    /// A worker's stages reached steady state.
    WarmedUp {
        /// Worker index
        worker: usize,
    },
    /// A worker's warm-up failed.
    WarmUpFailed(StageError),
    /// A chunk's mesh was published.
    Ready(ChunkKey),
    /// A chunk finished after being evicted; its output was dropped.
    Discarded(ChunkKey),
    /// A chunk's pipeline failed.
    Failed(ChunkFailure),
}
