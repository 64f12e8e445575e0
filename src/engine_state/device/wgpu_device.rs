//! # wgpu Device
//!
//! Headless wgpu device used by the GPU stages. The suspension points of a
//! chunk pipeline all live here: waiting for validation of a freshly created
//! pipeline, waiting for the queue's "submitted work done" signal, and
//! waiting for a mapped readback.
//!
//! Workers drive these futures with `pollster`, and the device is polled in
//! blocking mode while the worker waits, so no other thread has to pump
//! the device for a pipeline to make progress.

use std::sync::Arc;

use futures::channel::oneshot;
use log::info;
use wgpu::util::DeviceExt;

use crate::engine_state::rendering::meshing::gpu::GpuMesher;
use crate::engine_state::voxels::generation::gpu::GpuGenerator;
use crate::engine_state::voxels::world_type::WorldSettings;
use crate::error::StageError;

use super::{Backend, GpuDevice, WorkDoneCallback};

/// Shared handle to a wgpu device and its queue.
#[derive(Clone, Debug)]
pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl WgpuDevice {
    /// Requests a high performance adapter and a device with default limits.
    pub async fn request() -> Result<Self, StageError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            flags: wgpu::InstanceFlags::default(),
            backend_options: wgpu::BackendOptions::from_env_or_default(),
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| StageError::Device(err.to_string()))?;

        info!("Using adapter {:?}", adapter.get_info());

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("chunk streaming device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|err| StageError::Device(err.to_string()))?;

        Ok(WgpuDevice {
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }

    /// Wraps an existing device, e.g. one shared with a renderer.
    pub fn from_parts(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        WgpuDevice { device, queue }
    }

    /// The raw device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The raw queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Creates a buffer with initial contents.
    pub fn create_buffer_init(
        &self,
        label: &str,
        contents: &[u8],
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            })
    }

    /// Creates an uninitialised buffer.
    pub fn create_buffer(&self, label: &str, size: u64, usage: wgpu::BufferUsages) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    /// Compiles a WGSL compute shader into a pipeline and validates it.
    ///
    /// Resolves with the pipeline once the device has accepted it, or with a
    /// dispatch error carrying the validation message.
    pub async fn create_compute_pipeline(
        &self,
        stage: &'static str,
        source: &str,
        bind_group_layout: &wgpu::BindGroupLayout,
    ) -> Result<wgpu::ComputePipeline, StageError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(stage),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(stage),
                bind_group_layouts: &[bind_group_layout],
                push_constant_ranges: &[],
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(stage),
                layout: Some(&layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });

        match self.device.pop_error_scope().await {
            Some(err) => Err(StageError::Dispatch {
                stage,
                reason: err.to_string(),
            }),
            None => Ok(pipeline),
        }
    }

    /// Resolves once everything submitted so far has executed.
    pub async fn submitted_work_done(&self, stage: &'static str) -> Result<(), StageError> {
        let (sender, receiver) = oneshot::channel();
        self.queue.on_submitted_work_done(move || {
            let _ = sender.send(());
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| StageError::Dispatch {
                stage,
                reason: err.to_string(),
            })?;
        receiver.await.map_err(|_| StageError::Dispatch {
            stage,
            reason: "queue dropped the completion signal".to_string(),
        })
    }

    /// Maps a `MAP_READ` buffer and copies its first `size` bytes out.
    pub async fn read_buffer(
        &self,
        stage: &'static str,
        buffer: &wgpu::Buffer,
        size: u64,
    ) -> Result<Vec<u8>, StageError> {
        let readback_error = |reason: String| StageError::Readback { stage, reason };

        let slice = buffer.slice(..size);
        let (sender, receiver) = oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| readback_error(err.to_string()))?;
        receiver
            .await
            .map_err(|_| readback_error("mapping callback was dropped".to_string()))?
            .map_err(|err| readback_error(err.to_string()))?;

        let bytes = {
            let view = slice.get_mapped_range();
            view.to_vec()
        };
        buffer.unmap();
        Ok(bytes)
    }
}

/// Layout entry for a compute-visible uniform buffer.
pub fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Layout entry for a compute-visible storage buffer.
pub fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl GpuDevice for WgpuDevice {
    type Buffer = wgpu::Buffer;

    fn buffer_size(buffer: &wgpu::Buffer) -> u64 {
        buffer.size()
    }

    fn destroy_buffer(&self, buffer: wgpu::Buffer) {
        buffer.destroy();
    }

    fn on_submitted_work_done(&self, callback: WorkDoneCallback) {
        self.queue.on_submitted_work_done(callback);
    }

    fn poll(&self) -> Result<(), StageError> {
        self.device
            .poll(wgpu::PollType::Poll)
            .map(|_| ())
            .map_err(|err| StageError::Device(err.to_string()))
    }

    fn wait_idle(&self) -> Result<(), StageError> {
        self.device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|err| StageError::Device(err.to_string()))
    }
}

/// Backend running both stages as WGSL compute shaders.
#[derive(Clone, Debug)]
pub struct WgpuBackend {
    device: WgpuDevice,
}

impl WgpuBackend {
    /// Requests a device and wraps it.
    pub async fn new() -> Result<Self, StageError> {
        Ok(WgpuBackend {
            device: WgpuDevice::request().await?,
        })
    }

    /// Runs the stages on an existing device.
    pub fn with_device(device: WgpuDevice) -> Self {
        WgpuBackend { device }
    }
}

impl Backend for WgpuBackend {
    type Device = WgpuDevice;
    type Generator = GpuGenerator;
    type Mesher = GpuMesher;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn device(&self) -> WgpuDevice {
        self.device.clone()
    }

    fn create_generator(&self, settings: &WorldSettings) -> Result<GpuGenerator, StageError> {
        Ok(GpuGenerator::new(self.device.clone(), settings.clone()))
    }

    fn create_mesher(&self) -> Result<GpuMesher, StageError> {
        Ok(GpuMesher::new(self.device.clone()))
    }
}
