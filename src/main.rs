//! # Voxel Streaming Demo
//!
//! Headless walk through a streamed world. Loads a configuration, bootstraps
//! the engine and moves a viewpoint east, logging every tick that changed
//! something.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=info cargo run --release -- [config.json]
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use cgmath::Vector3;
use log::{error, info, warn};
use voxel_streaming::{
    Backend, BackendKind, BlockRegistry, EngineConfig, EngineError, HostBackend, VoxelEngine,
    WgpuBackend, CHUNK_WIDTH,
};

/// Chunks walked east of the origin.
const WALK_CHUNKS: i32 = 6;
/// Viewpoint advance per step, in blocks.
const STEP_BLOCKS: f32 = 4.0;

fn main() -> ExitCode {
    voxel_streaming::init_logging();

    let config = match std::env::args().nth(1) {
        Some(path) => match EngineConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                error!("Could not load {}: {}", path, err);
                return ExitCode::FAILURE;
            }
        },
        None => EngineConfig::default(),
    };
    let registry = Arc::new(BlockRegistry::default());

    let result = match config.backend {
        BackendKind::Gpu => match pollster::block_on(WgpuBackend::new()) {
            Ok(backend) => walk(backend, &config, registry),
            Err(err) => {
                warn!("No GPU backend available ({}), falling back to host", err);
                walk(HostBackend::new(), &config, registry)
            }
        },
        BackendKind::Host => walk(HostBackend::new(), &config, registry),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn walk<B: Backend>(
    backend: B,
    config: &EngineConfig,
    registry: Arc<BlockRegistry>,
) -> Result<(), EngineError> {
    let mut engine = VoxelEngine::new(backend, config, registry)?;
    engine.bootstrap()?;

    let spawn_height = engine.highest_solid_block(0, 0) as f32 + 2.0;
    info!("Spawning at height {}", spawn_height);

    let steps = (WALK_CHUNKS * CHUNK_WIDTH as i32) as f32 / STEP_BLOCKS;
    for step in 0..=steps as u32 {
        let position = Vector3::new(step as f32 * STEP_BLOCKS, spawn_height, 0.0);
        engine.load_chunks_within_render_distance(position);
        log_tick(&mut engine);
    }

    while engine.active_jobs() > 0 || engine.queued_jobs() > 0 {
        log_tick(&mut engine);
        std::thread::yield_now();
    }

    let mut faces = 0u64;
    let mut drawable = 0;
    engine.for_each_renderable(|chunk| {
        faces += chunk.face_count as u64;
        drawable += 1;
    });
    info!("{} chunks drawable with {} faces", drawable, faces);

    let analytics = engine.buffer_analytics();
    engine.shutdown();
    info!(
        "Released {} buffers ({} bytes) over {} deferred batches",
        analytics.released_buffers, analytics.released_bytes, analytics.deferred_batches
    );
    Ok(())
}

fn log_tick<B: Backend>(engine: &mut VoxelEngine<B>) {
    let tick = engine.process_tasks();
    if tick.is_empty() {
        return;
    }
    info!(
        "Tick: {} ready, {} discarded, {} failed, {} buffers released, {} queued",
        tick.ready.len(),
        tick.discarded.len(),
        tick.failed.len(),
        tick.released_buffers,
        engine.queued_jobs()
    );
    for failure in &tick.failed {
        error!(
            "Chunk ({}, {}) will stay empty: {}",
            failure.key.x, failure.key.z, failure.error
        );
    }
}
