//! Brings one worker's stages to steady state before any real chunk runs.

use log::{error, info};

use crate::engine_state::buffer_state::BufferState;
use crate::engine_state::compute::pipeline::ChunkPipeline;
use crate::engine_state::device::Backend;
use crate::engine_state::task_management::task::{Task, TaskReport, TaskResult};
use crate::error::StageError;

/// Runs `warm_up` on both stages of the worker it lands on.
pub struct WarmUpTask;

impl<B: Backend> Task<B> for WarmUpTask {
    fn process(self: Box<Self>, pipeline: &mut ChunkPipeline<B>) -> Box<dyn TaskResult<B>> {
        Box::new(WarmUpTaskResult {
            worker: pipeline.worker(),
            outcome: pollster::block_on(pipeline.warm_up()),
        })
    }
}

/// Outcome of a warm-up.
pub struct WarmUpTaskResult {
    worker: usize,
    outcome: Result<(), StageError>,
}

impl<B: Backend> TaskResult<B> for WarmUpTaskResult {
    fn handle_result(self: Box<Self>, _buffer_state: &mut BufferState<B::Device>) -> TaskReport {
        match self.outcome {
            Ok(()) => {
                info!("Worker {} warmed up", self.worker);
                TaskReport::WarmedUp {
                    worker: self.worker,
                }
            }
            Err(err) => {
                error!("Worker {} failed to warm up: {}", self.worker, err);
                TaskReport::WarmUpFailed(err)
            }
        }
    }
}
