//! # Devices and Backends
//!
//! A [`GpuDevice`] owns buffer memory and the queue's "submitted work done"
//! signal. A [`Backend`] pairs a device with factories for the two compute
//! stages; the engine builds one generator and one mesher per pipeline
//! worker, so no stage scratch buffer is ever shared by two running jobs.
//!
//! Two backends ship with the crate:
//! - [`wgpu_device::WgpuBackend`] runs the WGSL shaders in `assets/shaders`
//! - [`host::HostBackend`] runs the same contracts on the CPU against an
//!   instrumented [`host::HostDevice`]

pub mod host;
pub mod wgpu_device;

use crate::engine_state::rendering::meshing::Mesher;
use crate::engine_state::voxels::generation::Generator;
use crate::engine_state::voxels::world_type::WorldSettings;
use crate::error::StageError;

/// Callback fired once all work submitted before its registration has finished.
pub type WorkDoneCallback = Box<dyn FnOnce() + Send + 'static>;

/// Buffer ownership and queue completion tracking.
pub trait GpuDevice: Clone + Send + Sync + 'static {
    /// Handle to device memory.
    type Buffer: Send + Sync + 'static;

    /// Size of a buffer in bytes.
    fn buffer_size(buffer: &Self::Buffer) -> u64;

    /// Frees a buffer immediately. Callers must know no queued command still uses it.
    fn destroy_buffer(&self, buffer: Self::Buffer);

    /// Registers `callback` to run once everything submitted so far has completed.
    fn on_submitted_work_done(&self, callback: WorkDoneCallback);

    /// Fires any completion callbacks that are due without blocking.
    fn poll(&self) -> Result<(), StageError>;

    /// Blocks until the queue is empty and every pending callback has fired.
    fn wait_idle(&self) -> Result<(), StageError>;
}

/// Buffer type of a backend's device.
pub type BufferOf<B> = <<B as Backend>::Device as GpuDevice>::Buffer;

/// Factory for the device and stage instances a streaming session runs on.
pub trait Backend: Send + 'static {
    /// Device shared by every stage instance.
    type Device: GpuDevice;
    /// Stage A implementation.
    type Generator: Generator + Send + 'static;
    /// Stage B implementation; its buffers live on `Self::Device`.
    type Mesher: Mesher<Buffer = <Self::Device as GpuDevice>::Buffer> + Send + 'static;

    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Handle to the shared device.
    fn device(&self) -> Self::Device;

    /// Builds a generator with its own scratch buffers.
    fn create_generator(&self, settings: &WorldSettings) -> Result<Self::Generator, StageError>;

    /// Builds a mesher with its own scratch buffers.
    fn create_mesher(&self) -> Result<Self::Mesher, StageError>;
}
