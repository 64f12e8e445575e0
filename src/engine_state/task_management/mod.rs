//! # Task Management System
//!
//! A bounded-concurrency scheduler for chunk pipelines.
//!
//! ## Architecture Overview
//! - One worker thread per concurrency slot. Each worker owns a
//!   [`ChunkPipeline`], so stage scratch buffers are never shared.
//! - At most [`MAX_TASKS_IN_FLIGHT`] task per worker, which caps the number of
//!   running pipelines at the worker count.
//! - Tasks that find no free worker wait in a FIFO queue and are dispatched in
//!   arrival order as workers free up.
//! - Workers report back over a single result channel. Results are handled on
//!   the control thread in [`Scheduler::process_completed_tasks`] or
//!   [`Scheduler::wait_for_next`].
//!
//! ## Task Lifecycle
//! 1. A task is handed to [`Scheduler::enqueue`] and appended to the queue.
//! 2. The queue is drained onto free workers, oldest first.
//! 3. The worker runs [`Task::process`] and sends the result back.
//! 4. The control thread runs [`TaskResult::handle_result`], frees the worker's
//!    slot and drains the queue again.

pub mod task;

use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use task::{Task, TaskReport, TaskResult};

use crate::engine_state::buffer_state::BufferState;
use crate::engine_state::compute::pipeline::ChunkPipeline;
use crate::engine_state::device::Backend;
use crate::engine_state::voxels::world_type::WorldSettings;
use crate::error::{EngineError, StageError};

/// Maximum number of tasks in flight per worker.
pub const MAX_TASKS_IN_FLIGHT: usize = 1;

type BoxedTask<B> = Box<dyn Task<B>>;
type WorkerResult<B> = (usize, Box<dyn TaskResult<B>>);

/// A worker thread and the sending half of its task channel.
struct TaskChannel<B: Backend> {
    task_sender: Option<Sender<BoxedTask<B>>>,
    num_tasks_in_flight: usize,
    worker: Option<JoinHandle<()>>,
}

/// FIFO scheduler over a fixed pool of pipeline workers.
pub struct Scheduler<B: Backend> {
    channels: Vec<TaskChannel<B>>,
    result_receiver: Receiver<WorkerResult<B>>,
    queued_tasks: VecDeque<BoxedTask<B>>,
    current_channel: usize,
}

impl<B: Backend> Scheduler<B> {
    /// Spawns `workers` pipeline workers, each with its own stages.
    ///
    /// # Arguments
    /// * `backend` - Builds each worker's generator and mesher
    /// * `settings` - Seed, world type and registry the generators use
    /// * `workers` - Maximum number of pipelines running at once
    pub fn new(backend: &B, settings: &WorldSettings, workers: usize) -> Result<Self, EngineError> {
        let (result_tx, result_rx) = channel::<WorkerResult<B>>();
        let mut channels = Vec::with_capacity(workers);

        for index in 0..workers {
            let mut pipeline = ChunkPipeline::new(backend, settings, index)?;
            let (task_tx, task_rx) = channel::<BoxedTask<B>>();
            let result_tx = result_tx.clone();

            let worker = thread::Builder::new()
                .name(format!("chunk-pipeline-{index}"))
                .spawn(move || {
                    while let Ok(task) = task_rx.recv() {
                        let result = task.process(&mut pipeline);
                        if result_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                })
                .map_err(EngineError::WorkerSpawn)?;

            channels.push(TaskChannel {
                task_sender: Some(task_tx),
                num_tasks_in_flight: 0,
                worker: Some(worker),
            });
        }

        info!("Started {} chunk pipeline workers on {}", workers, backend.name());
        Ok(Scheduler {
            channels,
            result_receiver: result_rx,
            queued_tasks: VecDeque::new(),
            current_channel: 0,
        })
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.channels.len()
    }

    /// Tasks currently running on workers.
    pub fn active_jobs(&self) -> usize {
        self.channels.iter().map(|c| c.num_tasks_in_flight).sum()
    }

    /// Tasks waiting for a free worker.
    pub fn queued_len(&self) -> usize {
        self.queued_tasks.len()
    }

    /// Whether nothing is running or queued.
    pub fn is_idle(&self) -> bool {
        self.active_jobs() == 0 && self.queued_tasks.is_empty()
    }

    /// Appends `task` to the queue and dispatches as much as capacity allows.
    pub fn enqueue(&mut self, task: BoxedTask<B>) {
        self.queued_tasks.push_back(task);
        self.process_queued_tasks();
    }

    /// Sends `task` to worker `worker`, bypassing the queue.
    ///
    /// Used to address one specific worker, e.g. for warm-up. Fails if the
    /// worker is busy or gone.
    pub fn dispatch_to(&mut self, worker: usize, task: BoxedTask<B>) -> Result<(), StageError> {
        match self.channels.get(worker) {
            Some(channel) if channel.num_tasks_in_flight >= MAX_TASKS_IN_FLIGHT => {
                return Err(StageError::WorkerBusy(worker))
            }
            Some(_) => {}
            None => return Err(StageError::WorkerDisconnected),
        }
        self.try_send_task(task, worker)
            .map_err(|_| StageError::WorkerDisconnected)
    }

    fn try_send_task(&mut self, task: BoxedTask<B>, channel_idx: usize) -> Result<(), BoxedTask<B>> {
        let channel = &mut self.channels[channel_idx];
        let Some(sender) = &channel.task_sender else {
            return Err(task);
        };
        match sender.send(task) {
            Ok(()) => {
                channel.num_tasks_in_flight += 1;
                Ok(())
            }
            Err(err) => Err(err.0),
        }
    }

    fn find_available_channel(&self) -> Option<usize> {
        let count = self.channels.len();
        (0..count)
            .map(|offset| (self.current_channel + offset) % count)
            .find(|&idx| {
                let channel = &self.channels[idx];
                channel.task_sender.is_some() && channel.num_tasks_in_flight < MAX_TASKS_IN_FLIGHT
            })
    }

    /// Moves queued tasks onto free workers, oldest first.
    pub fn process_queued_tasks(&mut self) {
        while !self.queued_tasks.is_empty() {
            let Some(channel_idx) = self.find_available_channel() else {
                break;
            };
            let Some(task) = self.queued_tasks.pop_front() else {
                break;
            };
            match self.try_send_task(task, channel_idx) {
                Ok(()) => self.current_channel = (channel_idx + 1) % self.channels.len(),
                Err(task) => {
                    warn!("Worker {} disconnected", channel_idx);
                    self.channels[channel_idx].task_sender = None;
                    self.queued_tasks.push_front(task);
                }
            }
        }
    }

    fn complete(
        &mut self,
        (worker, result): WorkerResult<B>,
        buffer_state: &mut BufferState<B::Device>,
    ) -> TaskReport {
        if let Some(channel) = self.channels.get_mut(worker) {
            channel.num_tasks_in_flight = channel.num_tasks_in_flight.saturating_sub(1);
        }
        result.handle_result(buffer_state)
    }

    /// Handles every result that has arrived, then refills free workers.
    pub fn process_completed_tasks(
        &mut self,
        buffer_state: &mut BufferState<B::Device>,
    ) -> Vec<TaskReport> {
        let mut reports = Vec::new();
        loop {
            match self.result_receiver.try_recv() {
                Ok(result) => reports.push(self.complete(result, buffer_state)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        self.process_queued_tasks();
        reports
    }

    /// Blocks until one task finishes and handles it.
    ///
    /// Returns `Ok(None)` when nothing is running or queued.
    pub fn wait_for_next(
        &mut self,
        buffer_state: &mut BufferState<B::Device>,
    ) -> Result<Option<TaskReport>, StageError> {
        self.process_queued_tasks();
        if self.active_jobs() == 0 {
            return Ok(None);
        }
        let result = self
            .result_receiver
            .recv()
            .map_err(|_| StageError::WorkerDisconnected)?;
        let report = self.complete(result, buffer_state);
        self.process_queued_tasks();
        Ok(Some(report))
    }

    /// Drops every queued task that has not started.
    pub fn clear_queue(&mut self) -> usize {
        let dropped = self.queued_tasks.len();
        self.queued_tasks.clear();
        dropped
    }

    /// Closes the task channels and joins every worker.
    ///
    /// Results of tasks still running are dropped with the channel; callers
    /// that need them should drain with [`Scheduler::wait_for_next`] first.
    pub fn shutdown(&mut self) {
        self.queued_tasks.clear();
        for channel in &mut self.channels {
            channel.task_sender = None;
        }
        for (index, channel) in self.channels.iter_mut().enumerate() {
            if let Some(worker) = channel.worker.take() {
                if worker.join().is_err() {
                    warn!("Chunk pipeline worker {} panicked", index);
                }
            }
            channel.num_tasks_in_flight = 0;
        }
        debug!("Chunk pipeline workers joined");
    }
}

impl<B: Backend> Drop for Scheduler<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
