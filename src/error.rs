//! # Error Types
//!
//! Typed failures for every layer of the streaming engine. Stage failures are
//! local to one chunk; everything else is reported to the caller through
//! [`EngineError`].

use thiserror::Error;

use crate::engine_state::voxels::chunk::{chunk_state::ChunkState, ChunkKey};

/// Errors raised by block grid access and chunk lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// A local coordinate fell outside the chunk extents.
    #[error("local block position ({x}, {y}, {z}) is outside the chunk")]
    OutOfBounds {
        /// Local x coordinate
        x: i32,
        /// Local y coordinate
        y: i32,
        /// Local z coordinate
        z: i32,
    },

    /// A byte buffer did not hold exactly one grid.
    #[error("grid readback holds {actual} bytes, expected {expected}")]
    ByteLength {
        /// Bytes in one grid
        expected: usize,
        /// Bytes supplied
        actual: usize,
    },

    /// The chunk was not in the state a transition expected.
    #[error("chunk {key:?} cannot move from {from:?} to {to:?} (currently {actual:?})")]
    InvalidTransition {
        /// Chunk being transitioned
        key: ChunkKey,
        /// Expected source state
        from: ChunkState,
        /// Requested target state
        to: ChunkState,
        /// State the chunk was actually in
        actual: ChunkState,
    },
}

/// Errors raised while building a [`BlockRegistry`](crate::BlockRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The same block name was listed twice.
    #[error("block `{0}` is registered more than once")]
    Duplicate(String),

    /// Air is always id 0 and may not be listed explicitly.
    #[error("`air` is reserved for id 0")]
    ReservedAir,
}

/// Failures of a GPU compute stage. Fatal to the chunk being processed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// A stage was dispatched before its pipeline was confirmed ready.
    #[error("{0} stage dispatched before its pipeline was ready")]
    NotReady(&'static str),

    /// The device could not be created or was lost.
    #[error("device error: {0}")]
    Device(String),

    /// Pipeline creation or command submission failed.
    #[error("{stage} dispatch failed: {reason}")]
    Dispatch {
        /// Stage label
        stage: &'static str,
        /// Driver or validation message
        reason: String,
    },

    /// Mapping a result buffer back to the host failed.
    #[error("{stage} readback failed: {reason}")]
    Readback {
        /// Stage label
        stage: &'static str,
        /// Driver message
        reason: String,
    },

    /// The pipeline worker for this job went away.
    #[error("pipeline worker disconnected")]
    WorkerDisconnected,

    /// A task was addressed to a worker that already has one in flight.
    #[error("pipeline worker {0} is busy")]
    WorkerBusy(usize),
}

/// Errors raised while loading or resolving an [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration was not valid JSON for this schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A flat layer referenced a block missing from the registry.
    #[error("unknown block `{0}` in flat world profile")]
    UnknownBlock(String),

    /// A flat profile had more layers than a chunk is tall.
    #[error("flat world profile has {len} layers but chunks are only {max} blocks tall")]
    ProfileTooTall {
        /// Number of layers supplied
        len: usize,
        /// Chunk height
        max: usize,
    },

    /// At least one pipeline is required.
    #[error("max_parallel_jobs must be at least 1")]
    InvalidConcurrency,
}

/// Top level error returned by the engine facade.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration problem
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Registry problem
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Compute stage failure outside a chunk job (warm-up, bootstrap)
    #[error(transparent)]
    Stage(#[from] StageError),

    /// Chunk access problem
    #[error(transparent)]
    Chunk(#[from] ChunkError),

    /// A pipeline worker thread could not be started.
    #[error("failed to spawn pipeline worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// The bootstrap chunk never became ready.
    #[error("bootstrap chunk {0:?} did not become ready")]
    Bootstrap(ChunkKey),

    /// The engine was already shut down.
    #[error("voxel engine has been shut down")]
    ShutDown,
}
