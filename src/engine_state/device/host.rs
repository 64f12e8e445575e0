//! # Host Device
//!
//! A CPU stand-in for the GPU. Buffers are plain byte vectors and dispatches
//! run synchronously on the calling worker, but the device keeps the same
//! contracts as a real queue: completion callbacks only fire when the device
//! is polled, and buffers are only freed when the caller destroys them.
//!
//! Every allocation, release and dispatch is counted so tests can check
//! buffer lifetimes and scheduling limits. Tests can also hold dispatches at
//! a gate, hold completion signals, and make dispatches for a chunk fail.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::engine_state::compute::StageKind;
use crate::engine_state::rendering::meshing::host::HostMesher;
use crate::engine_state::voxels::chunk::ChunkKey;
use crate::engine_state::voxels::generation::host::HostGenerator;
use crate::engine_state::voxels::world_type::WorldSettings;
use crate::error::StageError;

use super::{Backend, GpuDevice, WorkDoneCallback};

/// A block of host memory standing in for a GPU buffer.
#[derive(Debug)]
pub struct HostBuffer {
    id: u64,
    label: String,
    bytes: Vec<u8>,
}

impl HostBuffer {
    /// Unique id assigned at allocation.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Label given at allocation.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Buffer contents.
    pub fn contents(&self) -> &[u8] {
        &self.bytes
    }
}

/// One dispatch as recorded by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchRecord {
    /// Stage that dispatched
    pub stage: StageKind,
    /// Chunk being processed, `None` for warm-up dispatches
    pub key: Option<ChunkKey>,
}

/// Snapshot of the device counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Buffers allocated
    pub buffers_created: u64,
    /// Buffers freed
    pub buffers_destroyed: u64,
    /// Frees of an id that was not live
    pub invalid_destroys: u64,
    /// Bytes currently allocated
    pub live_bytes: u64,
    /// Generation dispatches
    pub generate_dispatches: u64,
    /// Meshing dispatches
    pub mesh_dispatches: u64,
    /// Most generation dispatches ever running at once
    pub peak_concurrent_generations: u64,
}

#[derive(Default)]
struct GateState {
    held: bool,
    waiting: usize,
}

#[derive(Default)]
struct HostDeviceInner {
    next_buffer_id: AtomicU64,
    live_buffers: Mutex<HashMap<u64, u64>>,
    destroyed_buffers: Mutex<HashSet<u64>>,
    stats: Mutex<DeviceStats>,
    active_generations: Mutex<u64>,
    dispatch_log: Mutex<Vec<DispatchRecord>>,
    work_done: Mutex<Vec<WorkDoneCallback>>,
    hold_work_done: AtomicBool,
    gate: Mutex<GateState>,
    gate_changed: Condvar,
    failing: Mutex<HashSet<(StageKind, ChunkKey)>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Instrumented CPU device. Clones share the same state.
#[derive(Clone, Default)]
pub struct HostDevice {
    inner: Arc<HostDeviceInner>,
}

/// Marks a dispatch as running until dropped.
pub struct DispatchGuard {
    device: HostDevice,
    stage: StageKind,
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        if self.stage == StageKind::Generate {
            let mut active = lock(&self.device.inner.active_generations);
            *active = active.saturating_sub(1);
        }
    }
}

impl HostDevice {
    /// Creates a device with no buffers and an open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a buffer holding `bytes`.
    pub fn create_buffer(&self, label: &str, bytes: Vec<u8>) -> HostBuffer {
        let id = self.inner.next_buffer_id.fetch_add(1, Ordering::Relaxed);
        let size = bytes.len() as u64;
        lock(&self.inner.live_buffers).insert(id, size);
        let mut stats = lock(&self.inner.stats);
        stats.buffers_created += 1;
        stats.live_bytes += size;
        HostBuffer {
            id,
            label: label.to_string(),
            bytes,
        }
    }

    /// Starts a dispatch for `stage`.
    ///
    /// Blocks while the gate is held and fails if the chunk was marked with
    /// [`HostDevice::fail_dispatch`].
    pub fn begin_dispatch(
        &self,
        stage: StageKind,
        key: Option<ChunkKey>,
    ) -> Result<DispatchGuard, StageError> {
        {
            let mut gate = lock(&self.inner.gate);
            gate.waiting += 1;
            self.inner.gate_changed.notify_all();
            while gate.held {
                gate = self
                    .inner
                    .gate_changed
                    .wait(gate)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            gate.waiting -= 1;
            self.inner.gate_changed.notify_all();
        }

        if let Some(key) = key {
            if lock(&self.inner.failing).contains(&(stage, key)) {
                return Err(StageError::Dispatch {
                    stage: stage.label(),
                    reason: format!("injected failure for chunk ({}, {})", key.x, key.z),
                });
            }
        }

        let mut stats = lock(&self.inner.stats);
        match stage {
            StageKind::Generate => {
                stats.generate_dispatches += 1;
                let mut active = lock(&self.inner.active_generations);
                *active += 1;
                stats.peak_concurrent_generations = stats.peak_concurrent_generations.max(*active);
            }
            StageKind::Mesh => stats.mesh_dispatches += 1,
        }
        lock(&self.inner.dispatch_log).push(DispatchRecord { stage, key });

        Ok(DispatchGuard {
            device: self.clone(),
            stage,
        })
    }

    /// Makes every later dispatch block until [`HostDevice::release_dispatches`].
    pub fn hold_dispatches(&self) {
        lock(&self.inner.gate).held = true;
    }

    /// Lets held dispatches run.
    pub fn release_dispatches(&self) {
        lock(&self.inner.gate).held = false;
        self.inner.gate_changed.notify_all();
    }

    /// Blocks until `count` dispatches are waiting at the gate.
    pub fn wait_for_blocked_dispatches(&self, count: usize) {
        let mut gate = lock(&self.inner.gate);
        while gate.waiting < count {
            gate = self
                .inner
                .gate_changed
                .wait(gate)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// While held, polling does not fire completion callbacks.
    pub fn hold_work_done(&self, hold: bool) {
        self.inner.hold_work_done.store(hold, Ordering::Release);
    }

    /// Makes every dispatch of `stage` for `key` fail.
    pub fn fail_dispatch(&self, stage: StageKind, key: ChunkKey) {
        lock(&self.inner.failing).insert((stage, key));
    }

    /// Counter snapshot.
    pub fn stats(&self) -> DeviceStats {
        *lock(&self.inner.stats)
    }

    /// Every dispatch so far, in start order.
    pub fn dispatch_log(&self) -> Vec<DispatchRecord> {
        lock(&self.inner.dispatch_log).clone()
    }

    /// Number of buffers allocated and not yet destroyed.
    pub fn live_buffer_count(&self) -> usize {
        lock(&self.inner.live_buffers).len()
    }

    /// Whether `id` has been destroyed.
    pub fn was_destroyed(&self, id: u64) -> bool {
        lock(&self.inner.destroyed_buffers).contains(&id)
    }

    /// Number of completion callbacks not yet fired.
    pub fn pending_work_done(&self) -> usize {
        lock(&self.inner.work_done).len()
    }

    fn fire_work_done(&self) {
        let callbacks = std::mem::take(&mut *lock(&self.inner.work_done));
        for callback in callbacks {
            callback();
        }
    }
}

impl GpuDevice for HostDevice {
    type Buffer = HostBuffer;

    fn buffer_size(buffer: &HostBuffer) -> u64 {
        buffer.bytes.len() as u64
    }

    fn destroy_buffer(&self, buffer: HostBuffer) {
        let removed = lock(&self.inner.live_buffers).remove(&buffer.id);
        let mut stats = lock(&self.inner.stats);
        match removed {
            Some(size) => {
                lock(&self.inner.destroyed_buffers).insert(buffer.id);
                stats.buffers_destroyed += 1;
                stats.live_bytes -= size;
            }
            None => stats.invalid_destroys += 1,
        }
    }

    fn on_submitted_work_done(&self, callback: WorkDoneCallback) {
        lock(&self.inner.work_done).push(callback);
    }

    fn poll(&self) -> Result<(), StageError> {
        if !self.inner.hold_work_done.load(Ordering::Acquire) {
            self.fire_work_done();
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), StageError> {
        self.fire_work_done();
        Ok(())
    }
}

/// Backend running both stages on the CPU.
#[derive(Clone, Default)]
pub struct HostBackend {
    device: HostDevice,
}

impl HostBackend {
    /// Backend with a fresh device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend sharing an existing device, so a test can keep a handle to it.
    pub fn with_device(device: HostDevice) -> Self {
        HostBackend { device }
    }
}

impl Backend for HostBackend {
    type Device = HostDevice;
    type Generator = HostGenerator;
    type Mesher = HostMesher;

    fn name(&self) -> &'static str {
        "host"
    }

    fn device(&self) -> HostDevice {
        self.device.clone()
    }

    fn create_generator(&self, settings: &WorldSettings) -> Result<HostGenerator, StageError> {
        Ok(HostGenerator::new(self.device.clone(), settings.clone()))
    }

    fn create_mesher(&self) -> Result<HostMesher, StageError> {
        Ok(HostMesher::new(self.device.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroys_are_counted_once_per_buffer() {
        let device = HostDevice::new();
        let a = device.create_buffer("a", vec![0; 16]);
        let b = device.create_buffer("b", vec![0; 8]);
        let a_id = a.id();
        assert_eq!(device.stats().live_bytes, 24);
        device.destroy_buffer(a);
        assert!(device.was_destroyed(a_id));
        assert_eq!(device.live_buffer_count(), 1);
        device.destroy_buffer(b);
        let stats = device.stats();
        assert_eq!((stats.buffers_created, stats.buffers_destroyed, stats.invalid_destroys), (2, 2, 0));
        assert_eq!(stats.live_bytes, 0);
    }

    #[test]
    fn work_done_callbacks_wait_for_poll() {
        let device = HostDevice::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        device.on_submitted_work_done(Box::new(move || flag.store(true, Ordering::Release)));

        device.hold_work_done(true);
        device.poll().unwrap();
        assert!(!fired.load(Ordering::Acquire));

        device.hold_work_done(false);
        device.poll().unwrap();
        assert!(fired.load(Ordering::Acquire));
        assert_eq!(device.pending_work_done(), 0);
    }

    #[test]
    fn injected_failures_only_hit_their_chunk() {
        let device = HostDevice::new();
        device.fail_dispatch(StageKind::Mesh, ChunkKey::new(1, 1));
        assert!(device.begin_dispatch(StageKind::Mesh, Some(ChunkKey::new(1, 1))).is_err());
        assert!(device.begin_dispatch(StageKind::Mesh, Some(ChunkKey::new(1, 2))).is_ok());
        assert!(device.begin_dispatch(StageKind::Generate, Some(ChunkKey::new(1, 1))).is_ok());
    }

    #[test]
    fn held_gate_blocks_dispatch_until_released() {
        let device = HostDevice::new();
        device.hold_dispatches();
        let worker = {
            let device = device.clone();
            std::thread::spawn(move || {
                let _guard = device.begin_dispatch(StageKind::Generate, None).unwrap();
            })
        };
        device.wait_for_blocked_dispatches(1);
        assert_eq!(device.stats().generate_dispatches, 0);
        device.release_dispatches();
        worker.join().unwrap();
        assert_eq!(device.stats().generate_dispatches, 1);
        assert_eq!(device.stats().peak_concurrent_generations, 1);
    }
}
