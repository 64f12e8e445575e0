mod common;

use cgmath::Vector3;
use common::{config, drain, engine};
use voxel_streaming::engine_state::compute::StageKind;
use voxel_streaming::{ChunkKey, ChunkState, StageError};

fn at_chunk(x: i32, z: i32) -> Vector3<f32> {
    Vector3::new(x as f32 * 16.0 + 8.0, 90.0, z as f32 * 16.0 + 8.0)
}

#[test]
fn chunk_evicted_while_generating_is_discarded() {
    let (mut engine, device) = engine(&config(0, 1));
    device.hold_dispatches();

    engine.load_chunks_within_render_distance(at_chunk(0, 0));
    device.wait_for_blocked_dispatches(1);
    let in_flight = engine.chunk(ChunkKey::ORIGIN).unwrap().clone();
    assert_eq!(in_flight.state(), ChunkState::Generating);

    engine.load_chunks_within_render_distance(at_chunk(5, 0));
    assert!(in_flight.is_discarded());
    assert_eq!(engine.queued_jobs(), 1);

    device.release_dispatches();
    let tick = drain(&mut engine);

    assert_eq!(tick.discarded, vec![ChunkKey::ORIGIN]);
    assert_eq!(tick.ready, vec![ChunkKey::new(5, 0)]);
    assert!(tick.failed.is_empty());
    assert_eq!(in_flight.state(), ChunkState::Disposed);
    // the stale chunk never reached the mesher
    let meshed: Vec<_> = device
        .dispatch_log()
        .iter()
        .filter(|record| record.stage == StageKind::Mesh)
        .filter_map(|record| record.key)
        .collect();
    assert_eq!(meshed, vec![ChunkKey::new(5, 0)]);
}

#[test]
fn late_mesh_of_an_evicted_chunk_is_released_once() {
    let (mut engine, device) = engine(&config(0, 1));

    engine.load_chunks_within_render_distance(at_chunk(0, 0));
    // wait for the worker to allocate the chunk's buffers without publishing them
    while device.live_buffer_count() < 2 {
        std::thread::yield_now();
    }
    engine.load_chunks_within_render_distance(at_chunk(0, 9));
    let tick = drain(&mut engine);

    assert_eq!(tick.discarded, vec![ChunkKey::ORIGIN]);
    assert_eq!(tick.ready, vec![ChunkKey::new(0, 9)]);
    assert_eq!(device.live_buffer_count(), 2);
    assert_eq!(engine.buffer_analytics().released_buffers, 2);

    engine.shutdown();
    let stats = device.stats();
    assert_eq!(stats.buffers_created, 4);
    assert_eq!(stats.buffers_destroyed, 4);
    assert_eq!(stats.invalid_destroys, 0);
    assert_eq!(stats.live_bytes, 0);
}

#[test]
fn eviction_waits_for_the_device_before_destroying() {
    let (mut engine, device) = engine(&config(0, 1));
    engine.load_chunks_within_render_distance(at_chunk(0, 0));
    drain(&mut engine);
    let (vertex, index) = engine
        .chunk(ChunkKey::ORIGIN)
        .unwrap()
        .with_mesh(|mesh| (mesh.vertex.id(), mesh.index.id()))
        .unwrap();

    device.hold_work_done(true);
    engine.load_chunks_within_render_distance(at_chunk(3, 3));
    let tick = drain(&mut engine);
    assert_eq!(tick.ready, vec![ChunkKey::new(3, 3)]);
    assert_eq!(tick.released_buffers, 0);
    assert_eq!(engine.pending_releases(), 2);
    assert!(!device.was_destroyed(vertex));
    assert!(!device.was_destroyed(index));

    device.hold_work_done(false);
    let tick = engine.process_tasks();
    assert_eq!(tick.released_buffers, 2);
    assert!(device.was_destroyed(vertex));
    assert!(device.was_destroyed(index));
    assert_eq!(engine.pending_releases(), 0);
}

#[test]
fn stage_failure_is_fatal_to_that_chunk_only() {
    let (mut engine, device) = engine(&config(1, 2));
    let broken = ChunkKey::new(1, 0);
    device.fail_dispatch(StageKind::Mesh, broken);

    engine.load_chunks_within_render_distance(at_chunk(0, 0));
    let tick = drain(&mut engine);

    assert_eq!(tick.failed.len(), 1);
    assert_eq!(tick.failed[0].key, broken);
    assert!(matches!(tick.failed[0].error, StageError::Dispatch { stage: "mesh", .. }));
    assert_eq!(tick.ready.len(), 8);
    assert!(!tick.ready.contains(&broken));
    assert_eq!(engine.chunk(broken).unwrap().state(), ChunkState::Failed);

    // no retry while it stays resident
    let generations = device.stats().generate_dispatches;
    engine.load_chunks_within_render_distance(at_chunk(0, 1));
    drain(&mut engine);
    assert_eq!(engine.chunk(broken).unwrap().state(), ChunkState::Failed);
    assert_eq!(device.stats().generate_dispatches, generations + 3);
}

#[test]
fn shutdown_releases_everything_exactly_once() {
    let (mut engine, device) = engine(&config(2, 2));
    engine.bootstrap().unwrap();
    engine.load_chunks_within_render_distance(at_chunk(0, 0));
    drain(&mut engine);
    engine.load_chunks_within_render_distance(at_chunk(4, 0));
    // leave work in flight and queued
    engine.process_tasks();

    engine.shutdown();

    let stats = device.stats();
    assert_eq!(stats.buffers_created, stats.buffers_destroyed);
    assert_eq!(stats.invalid_destroys, 0);
    assert_eq!(stats.live_bytes, 0);
    assert_eq!(device.live_buffer_count(), 0);
    assert_eq!(device.pending_work_done(), 0);
    assert!(engine.resident_chunks().is_empty());
}

#[test]
fn loading_after_shutdown_stays_empty() {
    let (mut engine, device) = engine(&config(1, 2));
    engine.bootstrap().unwrap();
    engine.shutdown();
    let dispatches = device.dispatch_log().len();

    assert!(!engine.load_chunks_within_render_distance(at_chunk(3, 3)));
    for _ in 0..4 {
        assert!(engine.process_tasks().is_empty());
    }

    assert!(engine.resident_chunks().is_empty());
    assert_eq!(engine.queued_jobs(), 0);
    assert_eq!(engine.active_jobs(), 0);
    assert_eq!(device.dispatch_log().len(), dispatches);
    assert_eq!(device.live_buffer_count(), 0);
}

#[test]
fn bootstrap_reports_a_failed_origin() {
    let (mut engine, device) = engine(&config(0, 1));
    device.fail_dispatch(StageKind::Generate, ChunkKey::ORIGIN);

    let err = engine.bootstrap().unwrap_err();

    assert!(matches!(
        err,
        voxel_streaming::EngineError::Stage(StageError::Dispatch { stage: "generate", .. })
    ));
    assert!(!engine.is_bootstrapped());
    assert_eq!(engine.chunk(ChunkKey::ORIGIN).unwrap().state(), ChunkState::Failed);
}
