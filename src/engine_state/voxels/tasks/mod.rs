//! # Voxel Task System
//!
//! Tasks the engine schedules on pipeline workers.

pub mod chunk_generation_task;
pub mod warm_up_task;
