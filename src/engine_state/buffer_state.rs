//! # Buffer State Module
//!
//! Deferred release of chunk mesh buffers.
//!
//! A chunk's buffers may still be referenced by commands already submitted to
//! the queue when the chunk is evicted or re-meshed. They are therefore never
//! destroyed on the spot. Each batch is parked together with a fence that the
//! device's "submitted work done" callback flips, and is destroyed on the first
//! [`BufferState::collect`] after that.
//!
//! Ownership of the buffers moves into the parked batch, so every buffer is
//! destroyed at most once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use crate::engine_state::device::GpuDevice;
use crate::engine_state::voxels::chunk::MeshBuffers;
use crate::error::StageError;

/// Running totals of deferred releases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseAnalytics {
    /// Batches handed to [`BufferState::schedule_release`]
    pub deferred_batches: u64,
    /// Buffers destroyed so far
    pub released_buffers: u64,
    /// Bytes destroyed so far
    pub released_bytes: u64,
}

struct PendingRelease<Buf> {
    label: String,
    fence: Arc<AtomicBool>,
    buffers: Vec<Buf>,
}

/// Owns buffers waiting for the GPU to stop using them.
pub struct BufferState<D: GpuDevice> {
    device: D,
    pending: VecDeque<PendingRelease<D::Buffer>>,
    analytics: ReleaseAnalytics,
}

impl<D: GpuDevice> BufferState<D> {
    /// Creates an empty release queue on `device`.
    pub fn new(device: D) -> Self {
        BufferState {
            device,
            pending: VecDeque::new(),
            analytics: ReleaseAnalytics::default(),
        }
    }

    /// Parks a chunk's buffers until everything submitted so far has completed.
    ///
    /// # Arguments
    /// * `label` - Shows up in logs when the batch is destroyed
    /// * `buffers` - The mesh buffers to release
    pub fn schedule_release(&mut self, label: &str, buffers: MeshBuffers<D::Buffer>) {
        let fence = Arc::new(AtomicBool::new(false));
        let signal = Arc::clone(&fence);
        self.device.on_submitted_work_done(Box::new(move || {
            signal.store(true, Ordering::Release);
        }));

        self.analytics.deferred_batches += 1;
        self.pending.push_back(PendingRelease {
            label: label.to_string(),
            fence,
            buffers: buffers.into_buffers().into(),
        });
    }

    /// Destroys every parked batch whose completion signal has fired.
    ///
    /// # Returns
    /// The number of buffers destroyed
    pub fn collect(&mut self) -> Result<usize, StageError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        self.device.poll()?;

        let mut released = 0;
        let mut waiting = VecDeque::with_capacity(self.pending.len());
        while let Some(batch) = self.pending.pop_front() {
            if batch.fence.load(Ordering::Acquire) {
                released += self.destroy(batch);
            } else {
                waiting.push_back(batch);
            }
        }
        self.pending = waiting;
        Ok(released)
    }

    /// Waits for the device to go idle and destroys everything parked.
    pub fn flush(&mut self) -> Result<usize, StageError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        self.device.wait_idle()?;

        let mut released = 0;
        while let Some(batch) = self.pending.pop_front() {
            released += self.destroy(batch);
        }
        Ok(released)
    }

    /// Number of buffers still waiting for their signal.
    pub fn pending_buffers(&self) -> usize {
        self.pending.iter().map(|batch| batch.buffers.len()).sum()
    }

    /// Totals since creation.
    pub fn analytics(&self) -> ReleaseAnalytics {
        self.analytics
    }

    fn destroy(&mut self, batch: PendingRelease<D::Buffer>) -> usize {
        let count = batch.buffers.len();
        let bytes: u64 = batch.buffers.iter().map(D::buffer_size).sum();
        for buffer in batch.buffers {
            self.device.destroy_buffer(buffer);
        }
        self.analytics.released_buffers += count as u64;
        self.analytics.released_bytes += bytes;
        debug!("Released {} buffers ({} bytes) for {}", count, bytes, batch.label);
        count
    }
}

impl<D: GpuDevice> Drop for BufferState<D> {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!("Leaking {} buffers: {}", self.pending_buffers(), err);
        }
    }
}
