//! # Engine State Module
//!
//! The streaming engine facade and the subsystems behind it.
//!
//! ## Key Components
//!
//! * [`VoxelEngine`] - Keeps the chunks around a viewpoint generated, meshed and resident
//! * `buffer_state` - Deferred release of GPU buffers
//! * `compute` - The compute stage interface and the per-worker chunk pipeline
//! * `device` - GPU and host devices and the backends built on them
//! * `rendering` - Mesh layout, meshers and the scene graph seam
//! * `task_management` - Bounded-concurrency FIFO scheduler over pipeline workers
//! * `voxels` - Blocks, chunks, generation, visibility and the chunk store
//!
//! ## Architecture
//!
//! The engine is driven from a single control thread. Each tick the host calls
//! [`VoxelEngine::load_chunks_within_render_distance`] with the viewpoint and
//! [`VoxelEngine::process_tasks`] to collect finished chunks. Generation and
//! meshing run on the scheduler's workers; everything that touches the chunk
//! store, the scene graph or the release queue happens on the control thread.

use std::sync::Arc;

use cgmath::Vector3;
use log::{debug, error, info, warn};

use buffer_state::{BufferState, ReleaseAnalytics};
use device::{Backend, BufferOf};
use rendering::{RenderableChunk, SceneGraph};
use task_management::task::{ChunkFailure, TaskReport};
use task_management::Scheduler;
use voxels::block::BlockRegistry;
use voxels::chunk::chunk_state::ChunkState;
use voxels::chunk::{Chunk, ChunkKey, CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH};
use voxels::tasks::chunk_generation_task::ChunkGenerationTask;
use voxels::tasks::warm_up_task::WarmUpTask;
use voxels::visibility::VisibilityCalculator;
use voxels::world::ChunkStore;
use voxels::world_type::{WorldSettings, WorldType};

use crate::config::EngineConfig;
use crate::error::EngineError;

pub mod buffer_state;
pub mod compute;
pub mod device;
pub mod rendering;
pub mod task_management;
pub mod voxels;

/// What changed during one call to [`VoxelEngine::process_tasks`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Chunks whose mesh was published, in completion order
    pub ready: Vec<ChunkKey>,
    /// Chunks that finished after eviction; their results were dropped
    pub discarded: Vec<ChunkKey>,
    /// Chunks whose pipeline failed
    pub failed: Vec<ChunkFailure>,
    /// Buffers physically destroyed by the release queue
    pub released_buffers: usize,
}

impl TickReport {
    /// Whether nothing happened.
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
            && self.discarded.is_empty()
            && self.failed.is_empty()
            && self.released_buffers == 0
    }
}

/// Streams generated and meshed chunks around a moving viewpoint.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use cgmath::Vector3;
/// use voxel_streaming::{BlockRegistry, EngineConfig, HostBackend, VoxelEngine};
///
/// let config = EngineConfig::default();
/// let mut engine =
///     VoxelEngine::new(HostBackend::new(), &config, Arc::new(BlockRegistry::default())).unwrap();
/// engine.bootstrap().unwrap();
///
/// // Main loop
/// loop {
///     engine.load_chunks_within_render_distance(Vector3::new(0.0, 80.0, 0.0));
///     let report = engine.process_tasks();
///     # break;
/// }
/// ```
pub struct VoxelEngine<B: Backend> {
    /// Backend name for logs
    backend_name: &'static str,
    /// Seed, world type and registry shared with every generator
    settings: WorldSettings,
    /// Working set tracking
    visibility: VisibilityCalculator,
    /// Resident chunks
    store: ChunkStore<BufferOf<B>>,
    /// Pipeline workers
    scheduler: Scheduler<B>,
    /// Buffers waiting for the device to finish with them
    buffer_state: BufferState<B::Device>,
    /// Host scene graph
    scene: Box<dyn SceneGraph>,
    /// Completions seen outside `process_tasks`, reported on the next tick
    backlog: TickReport,
    bootstrapped: bool,
    shut_down: bool,
}

impl<B: Backend> VoxelEngine<B> {
    /// Creates an engine and starts its pipeline workers.
    ///
    /// # Arguments
    ///
    /// * `backend` - Device and stage factory
    /// * `config` - Session configuration
    /// * `registry` - Block catalogue shared by both stages
    ///
    /// # Returns
    ///
    /// An engine with no resident chunks. Call [`VoxelEngine::bootstrap`] before streaming.
    pub fn new(
        backend: B,
        config: &EngineConfig,
        registry: Arc<BlockRegistry>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let world_type = config.world_type.resolve(&registry)?;
        let seed = config.resolve_seed();
        let settings = WorldSettings::new(seed, world_type, registry);

        let scheduler = Scheduler::new(&backend, &settings, config.max_parallel_jobs)?;
        let buffer_state = BufferState::new(backend.device());

        info!(
            "Voxel engine created on {} (seed {}, {:?}, render distance {})",
            backend.name(),
            seed,
            settings.world_type,
            config.render_distance
        );

        Ok(VoxelEngine {
            backend_name: backend.name(),
            settings,
            visibility: VisibilityCalculator::new(config.render_distance),
            store: ChunkStore::new(),
            scheduler,
            buffer_state,
            scene: Box::new(()),
            backlog: TickReport::default(),
            bootstrapped: false,
            shut_down: false,
        })
    }

    /// Replaces the scene graph notified about chunk nodes.
    pub fn set_scene_graph(&mut self, scene: Box<dyn SceneGraph>) {
        self.scene = scene;
    }

    /// Warms up every worker and generates the origin chunk.
    ///
    /// Blocks until the origin chunk is ready, so spawn height queries are
    /// meaningful afterwards. Calling it again is a no-op. Fails once the
    /// engine is shut down.
    pub fn bootstrap(&mut self) -> Result<(), EngineError> {
        if self.shut_down {
            return Err(EngineError::ShutDown);
        }
        if self.bootstrapped {
            return Ok(());
        }
        let started = web_time::Instant::now();

        // warm-up addresses each worker directly, so they must all be free
        while let Some(report) = self.scheduler.wait_for_next(&mut self.buffer_state)? {
            self.record(report);
        }

        let workers = self.scheduler.workers();
        for worker in 0..workers {
            self.scheduler.dispatch_to(worker, Box::new(WarmUpTask))?;
        }
        let mut warm_up_failure = None;
        for _ in 0..workers {
            match self.scheduler.wait_for_next(&mut self.buffer_state)? {
                Some(TaskReport::WarmUpFailed(err)) => {
                    warm_up_failure.get_or_insert(err);
                }
                Some(report) => self.record(report),
                None => break,
            }
        }
        if let Some(err) = warm_up_failure {
            return Err(err.into());
        }

        let origin = self.ensure_origin();
        if origin.state() != ChunkState::Ready {
            self.wait_for_chunk(ChunkKey::ORIGIN)?;
        }

        self.bootstrapped = true;
        info!(
            "Bootstrap finished on {} in {:?}",
            self.backend_name,
            started.elapsed()
        );
        Ok(())
    }

    /// Returns the resident origin chunk, creating and queueing it if needed.
    fn ensure_origin(&mut self) -> Arc<Chunk<BufferOf<B>>> {
        if let Some(chunk) = self.store.get(ChunkKey::ORIGIN) {
            return Arc::clone(chunk);
        }
        let chunk = Arc::new(Chunk::new(ChunkKey::ORIGIN));
        // a fresh chunk is always Unloaded
        let _ = chunk.transition(ChunkState::Unloaded, ChunkState::Queued);
        self.store.insert(Arc::clone(&chunk));
        self.scene
            .attach(ChunkKey::ORIGIN, ChunkKey::ORIGIN.transform());
        self.scheduler
            .enqueue(Box::new(ChunkGenerationTask::<B>::new(Arc::clone(&chunk))));
        chunk
    }

    fn wait_for_chunk(&mut self, key: ChunkKey) -> Result<(), EngineError> {
        while let Some(report) = self.scheduler.wait_for_next(&mut self.buffer_state)? {
            let outcome = match &report {
                TaskReport::Ready(done) if *done == key => Some(Ok(())),
                TaskReport::Discarded(done) if *done == key => Some(Err(EngineError::Bootstrap(key))),
                TaskReport::Failed(failure) if failure.key == key => {
                    Some(Err(EngineError::Stage(failure.error.clone())))
                }
                _ => None,
            };
            self.record(report);
            if let Some(outcome) = outcome {
                return outcome;
            }
        }
        Err(EngineError::Bootstrap(key))
    }

    /// Reconciles the resident chunks against the viewpoint's working set.
    ///
    /// Does nothing unless the viewpoint moved into a different chunk since
    /// the previous call, and nothing at all after shutdown.
    ///
    /// # Returns
    ///
    /// Whether the working set was recomputed
    pub fn load_chunks_within_render_distance(&mut self, position: Vector3<f32>) -> bool {
        if self.shut_down {
            return false;
        }
        let Some(visible) = self.visibility.update(position) else {
            return false;
        };

        let change = self.store.reconcile(&visible);
        let (evicted, created) = (change.evicted.len(), change.created.len());

        for (key, buffers) in change.evicted {
            if let Some(buffers) = buffers {
                self.buffer_state.schedule_release("evicted chunk mesh", buffers);
            }
            self.scene.detach(key);
        }
        for chunk in change.created {
            let key = chunk.key();
            self.scene.attach(key, key.transform());
            self.scheduler
                .enqueue(Box::new(ChunkGenerationTask::<B>::new(chunk)));
        }

        info!(
            "Working set centred on ({}, {}): {} evicted, {} created, {} resident, {} queued",
            visible[0].x,
            visible[0].z,
            evicted,
            created,
            self.store.len(),
            self.scheduler.queued_len()
        );
        true
    }

    /// Publishes finished chunks, dispatches queued ones and releases
    /// buffers the device is done with. Call once per tick.
    ///
    /// Returns an empty report after shutdown.
    pub fn process_tasks(&mut self) -> TickReport {
        if self.shut_down {
            return TickReport::default();
        }
        for report in self.scheduler.process_completed_tasks(&mut self.buffer_state) {
            self.record(report);
        }
        let mut tick = std::mem::take(&mut self.backlog);
        tick.released_buffers += match self.buffer_state.collect() {
            Ok(released) => released,
            Err(err) => {
                error!("Failed to poll the device for finished work: {}", err);
                0
            }
        };
        tick
    }

    /// Folds a task report into the backlog and tells the scene graph.
    fn record(&mut self, report: TaskReport) {
        match report {
            TaskReport::Ready(key) => {
                let face_count = self
                    .store
                    .get(key)
                    .and_then(|chunk| chunk.face_count())
                    .unwrap_or(0);
                debug!("Chunk ({}, {}) ready with {} faces", key.x, key.z, face_count);
                self.scene.chunk_ready(key, face_count);
                self.backlog.ready.push(key);
            }
            TaskReport::Discarded(key) => self.backlog.discarded.push(key),
            TaskReport::Failed(failure) => self.backlog.failed.push(failure),
            TaskReport::WarmedUp { .. } => {}
            TaskReport::WarmUpFailed(err) => {
                warn!("Late warm-up failure ignored: {}", err);
            }
        }
    }

    /// Topmost solid block of a world column.
    ///
    /// Returns `CHUNK_HEIGHT - 1` while the column's chunk is not resident or
    /// not yet generated.
    pub fn highest_solid_block(&self, x: i32, z: i32) -> u32 {
        self.try_highest_solid_block(x, z)
            .unwrap_or(CHUNK_HEIGHT as u32 - 1)
    }

    /// Topmost solid block of a world column, or `None` if it is not known yet.
    pub fn try_highest_solid_block(&self, x: i32, z: i32) -> Option<u32> {
        let chunk = self.store.get(ChunkKey::from_block(x, z))?;
        let local_x = x.rem_euclid(CHUNK_WIDTH as i32);
        let local_z = z.rem_euclid(CHUNK_DEPTH as i32);
        chunk.highest_solid_block(local_x, local_z).ok().flatten()
    }

    /// The resident chunk at `key`.
    pub fn chunk(&self, key: ChunkKey) -> Option<&Arc<Chunk<BufferOf<B>>>> {
        self.store.get(key)
    }

    /// Keys of every resident chunk, sorted.
    pub fn resident_chunks(&self) -> Vec<ChunkKey> {
        let mut keys: Vec<_> = self.store.iter().map(|chunk| chunk.key()).collect();
        keys.sort_unstable();
        keys
    }

    /// Calls `f` with the geometry of every ready chunk.
    pub fn for_each_renderable<F>(&self, mut f: F)
    where
        F: FnMut(RenderableChunk<'_, BufferOf<B>>),
    {
        for chunk in self.store.iter() {
            if chunk.state() != ChunkState::Ready {
                continue;
            }
            let key = chunk.key();
            chunk.with_mesh(|mesh| {
                f(RenderableChunk {
                    key,
                    transform: key.transform(),
                    vertex: &mesh.vertex,
                    index: &mesh.index,
                    face_count: mesh.face_count,
                })
            });
        }
    }

    /// World seed.
    pub fn seed(&self) -> u32 {
        self.settings.seed
    }

    /// Terrain mode of this session.
    pub fn world_type(&self) -> &WorldType {
        &self.settings.world_type
    }

    /// Block catalogue.
    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.settings.registry
    }

    /// Render distance in chunks.
    pub fn render_distance(&self) -> u32 {
        self.visibility.render_distance()
    }

    /// Pipelines currently running.
    pub fn active_jobs(&self) -> usize {
        self.scheduler.active_jobs()
    }

    /// Chunks waiting for a free pipeline.
    pub fn queued_jobs(&self) -> usize {
        self.scheduler.queued_len()
    }

    /// Whether bootstrap has completed.
    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    /// Release queue totals.
    pub fn buffer_analytics(&self) -> ReleaseAnalytics {
        self.buffer_state.analytics()
    }

    /// Buffers still waiting for the device.
    pub fn pending_releases(&self) -> usize {
        self.buffer_state.pending_buffers()
    }

    /// Disposes every chunk, finishes in-flight work and joins the workers.
    ///
    /// Every buffer the engine ever handed to a chunk is destroyed exactly
    /// once by the time this returns. Calling it again is a no-op.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        for (key, buffers) in self.store.drain_all() {
            if let Some(buffers) = buffers {
                self.buffer_state.schedule_release("shutdown", buffers);
            }
            self.scene.detach(key);
        }
        let dropped = self.scheduler.clear_queue();

        loop {
            match self.scheduler.wait_for_next(&mut self.buffer_state) {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(err) => {
                    warn!("Pipeline worker lost during shutdown: {}", err);
                    break;
                }
            }
        }

        let released = self.buffer_state.flush().unwrap_or_else(|err| {
            error!("Failed to flush deferred releases: {}", err);
            0
        });
        self.scheduler.shutdown();
        self.visibility.reset();

        info!(
            "Voxel engine shut down ({} queued jobs dropped, {} buffers released)",
            dropped, released
        );
    }
}

impl<B: Backend> Drop for VoxelEngine<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use cgmath::Matrix4;

    use super::*;
    use crate::engine_state::device::host::{HostBackend, HostDevice};
    use crate::engine_state::compute::StageKind;

    #[derive(Clone, Default)]
    struct SceneLog(Arc<Mutex<Vec<String>>>);

    impl SceneGraph for SceneLog {
        fn attach(&mut self, key: ChunkKey, _transform: Matrix4<f32>) {
            self.0.lock().unwrap().push(format!("attach {} {}", key.x, key.z));
        }

        fn chunk_ready(&mut self, key: ChunkKey, face_count: u32) {
            self.0
                .lock()
                .unwrap()
                .push(format!("ready {} {} {}", key.x, key.z, face_count));
        }

        fn detach(&mut self, key: ChunkKey) {
            self.0.lock().unwrap().push(format!("detach {} {}", key.x, key.z));
        }
    }

    fn engine(render_distance: u32) -> (VoxelEngine<HostBackend>, HostDevice) {
        let device = HostDevice::new();
        let config = EngineConfig {
            render_distance,
            seed: Some(3),
            ..EngineConfig::default()
        };
        let engine = VoxelEngine::new(
            HostBackend::with_device(device.clone()),
            &config,
            Arc::new(BlockRegistry::default()),
        )
        .unwrap();
        (engine, device)
    }

    fn drain(engine: &mut VoxelEngine<HostBackend>) -> TickReport {
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

    #[test]
    fn spawn_height_is_a_sentinel_before_bootstrap() {
        let (engine, _) = engine(0);
        assert_eq!(engine.highest_solid_block(5, 5), CHUNK_HEIGHT as u32 - 1);
        assert_eq!(engine.try_highest_solid_block(5, 5), None);
    }

    #[test]
    fn bootstrap_warms_every_worker_then_readies_the_origin() {
        let (mut engine, device) = engine(0);
        let scene = SceneLog::default();
        engine.set_scene_graph(Box::new(scene.clone()));

        engine.bootstrap().unwrap();

        assert!(engine.is_bootstrapped());
        let origin = engine.chunk(ChunkKey::ORIGIN).unwrap();
        assert_eq!(origin.state(), ChunkState::Ready);
        let log = device.dispatch_log();
        assert_eq!(log[0].key, None);
        assert!(log
            .iter()
            .any(|record| record.stage == StageKind::Mesh && record.key == Some(ChunkKey::ORIGIN)));
        let events = scene.0.lock().unwrap().clone();
        assert_eq!(events[0], "attach 0 0");
        assert!(events[1].starts_with("ready 0 0"));
        assert!(engine.try_highest_solid_block(0, 0).is_some());
        assert_eq!(engine.process_tasks().ready, vec![ChunkKey::ORIGIN]);

        engine.bootstrap().unwrap();
        assert_eq!(device.dispatch_log().len(), log.len());
    }

    #[test]
    fn reconcile_only_runs_when_the_chunk_changes() {
        let (mut engine, _) = engine(1);
        assert!(engine.load_chunks_within_render_distance(Vector3::new(1.0, 70.0, 1.0)));
        assert!(!engine.load_chunks_within_render_distance(Vector3::new(15.9, 70.0, 0.2)));
        assert_eq!(engine.resident_chunks().len(), 9);

        let tick = drain(&mut engine);
        assert_eq!(tick.ready.len(), 9);

        let mut renderable = 0;
        engine.for_each_renderable(|chunk| {
            assert!(chunk.face_count > 0);
            renderable += 1;
        });
        assert_eq!(renderable, 9);
    }

    #[test]
    fn shutdown_releases_every_mesh() {
        let (mut engine, device) = engine(1);
        engine.load_chunks_within_render_distance(Vector3::new(0.0, 0.0, 0.0));
        drain(&mut engine);

        engine.shutdown();

        let stats = device.stats();
        assert_eq!(stats.invalid_destroys, 0);
        assert_eq!(engine.pending_releases(), 0);
        assert!(engine.resident_chunks().is_empty());
        assert_eq!(engine.buffer_analytics().released_buffers, 18);
        engine.shutdown();
    }

    #[test]
    fn every_outcome_of_a_load_is_reported() {
        let (mut engine, device) = engine(1);
        device.fail_dispatch(StageKind::Mesh, ChunkKey::new(1, -1));

        engine.load_chunks_within_render_distance(Vector3::new(0.0, 0.0, 0.0));
        let tick = drain(&mut engine);

        assert_eq!(tick.ready.len() + tick.failed.len(), 9);
        assert_eq!(tick.failed.len(), 1);
        assert_eq!(tick.failed[0].key, ChunkKey::new(1, -1));
        assert!(engine.process_tasks().is_empty());
    }

    #[test]
    fn a_shut_down_engine_ignores_further_calls() {
        let (mut engine, device) = engine(1);
        engine.shutdown();

        assert!(matches!(engine.bootstrap(), Err(EngineError::ShutDown)));
        assert!(!engine.load_chunks_within_render_distance(Vector3::new(0.0, 0.0, 0.0)));
        assert!(engine.process_tasks().is_empty());
        assert!(engine.resident_chunks().is_empty());
        assert_eq!(engine.queued_jobs(), 0);
        assert!(device.dispatch_log().is_empty());
    }
}
