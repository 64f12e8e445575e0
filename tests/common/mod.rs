#![allow(dead_code)]

use std::sync::Arc;

use voxel_streaming::{
    BlockRegistry, EngineConfig, HostBackend, HostDevice, TickReport, VoxelEngine, WorldTypeConfig,
};

pub fn config(render_distance: u32, max_parallel_jobs: usize) -> EngineConfig {
    EngineConfig {
        render_distance,
        max_parallel_jobs,
        seed: Some(1337),
        ..EngineConfig::default()
    }
}

pub fn flat_config(render_distance: u32, layers: &[&str]) -> EngineConfig {
    EngineConfig {
        world_type: WorldTypeConfig::Flat {
            layers: layers.iter().map(|name| name.to_string()).collect(),
        },
        ..config(render_distance, 1)
    }
}

pub fn engine(config: &EngineConfig) -> (VoxelEngine<HostBackend>, HostDevice) {
    let device = HostDevice::new();
    let engine = VoxelEngine::new(
        HostBackend::with_device(device.clone()),
        config,
        Arc::new(BlockRegistry::default()),
    )
    .unwrap();
    (engine, device)
}

/// Ticks until nothing is running or queued, merging every tick report.
pub fn drain(engine: &mut VoxelEngine<HostBackend>) -> TickReport {
    let mut total = TickReport::default();
    loop {
        let idle = engine.active_jobs() == 0 && engine.queued_jobs() == 0;
        let tick = engine.process_tasks();
        total.ready.extend(tick.ready);
        total.discarded.extend(tick.discarded);
        total.failed.extend(tick.failed);
        total.released_buffers += tick.released_buffers;
        if idle {
            return total;
        }
        std::thread::yield_now();
    }
}
