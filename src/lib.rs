#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rustdoc::invalid_rust_codeblocks)]

//! # Voxel Streaming
//!
//! Chunk streaming for voxel worlds: keeps a square of chunks around a moving
//! viewpoint generated, meshed and resident, with both stages running as
//! compute shaders on the GPU.
//!
//! ## Key Modules
//!
//! * `config` - JSON session configuration
//! * `engine_state` - The engine facade and its subsystems: compute stages, devices, scheduling and voxel data
//! * `error` - Typed errors for every layer
//!
//! ## Architecture
//!
//! The crate separates:
//! * Devices and backends (wgpu, or an instrumented host device)
//! * The two compute stages, generation and meshing
//! * Scheduling of per-chunk pipelines on worker threads
//! * Chunk residency around the viewpoint
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use cgmath::Vector3;
//! use voxel_streaming::{BlockRegistry, EngineConfig, VoxelEngine, WgpuBackend};
//!
//! voxel_streaming::init_logging();
//! let backend = pollster::block_on(WgpuBackend::new()).unwrap();
//! let mut engine =
//!     VoxelEngine::new(backend, &EngineConfig::default(), Arc::new(BlockRegistry::default())).unwrap();
//! engine.bootstrap().unwrap();
//! let spawn_y = engine.highest_solid_block(0, 0);
//! engine.load_chunks_within_render_distance(Vector3::new(0.0, spawn_y as f32 + 2.0, 0.0));
//! let report = engine.process_tasks();
//! ```

use log::info;

pub mod config;
pub mod engine_state;
pub mod error;

pub use config::{BackendKind, EngineConfig, WorldTypeConfig};
pub use engine_state::buffer_state::ReleaseAnalytics;
pub use engine_state::device::host::{HostBackend, HostDevice};
pub use engine_state::device::wgpu_device::{WgpuBackend, WgpuDevice};
pub use engine_state::device::{Backend, GpuDevice};
pub use engine_state::rendering::{ChunkVertex, RenderableChunk, SceneGraph};
pub use engine_state::task_management::task::ChunkFailure;
pub use engine_state::voxels::block::{BlockId, BlockRegistry, AIR};
pub use engine_state::voxels::chunk::block_grid::BlockGrid;
pub use engine_state::voxels::chunk::chunk_state::ChunkState;
pub use engine_state::voxels::chunk::{
    Chunk, ChunkKey, MeshBuffers, CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH,
};
pub use engine_state::voxels::world_type::WorldType;
pub use engine_state::{TickReport, VoxelEngine};
pub use error::{ChunkError, ConfigError, EngineError, RegistryError, StageError};

/// Sends `log` output to stdout, filtered by `RUST_LOG`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let initialized = env_logger::Builder::new()
        .target(env_logger::Target::Stdout)
        .parse_env("RUST_LOG")
        .try_init();

    if initialized.is_ok() {
        info!("Logger initialized");
    }
}
