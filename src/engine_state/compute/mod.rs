//! # Compute Stages
//!
//! The common contract of the two GPU stages (generation and meshing) and the
//! per-worker pipeline that runs them back to back.
//!
//! A stage is not usable until its pipeline is ready. Callers must await
//! [`ComputeStage::wait_until_ready`] (the provided `generate`/`mesh` methods
//! do) and run [`ComputeStage::warm_up`] once before the first real chunk.

pub mod pipeline;

use crate::error::StageError;

/// Identifies a compute stage in logs, errors and device accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Stage A: block grid generation
    Generate,
    /// Stage B: face extraction
    Mesh,
}

impl StageKind {
    /// Short lowercase label.
    pub fn label(self) -> &'static str {
        match self {
            StageKind::Generate => "generate",
            StageKind::Mesh => "mesh",
        }
    }
}

/// A GPU compute stage with explicit readiness.
#[allow(async_fn_in_trait)]
pub trait ComputeStage {
    /// Which stage this is.
    fn kind(&self) -> StageKind;

    /// Whether the pipeline has been compiled and validated.
    fn is_ready(&self) -> bool;

    /// Compiles the pipeline if needed and resolves once it can be dispatched.
    async fn wait_until_ready(&mut self) -> Result<(), StageError>;

    /// Runs one throwaway dispatch so the first real chunk sees a steady-state pipeline.
    async fn warm_up(&mut self) -> Result<(), StageError>;

    /// Precondition check shared by every dispatch.
    fn ensure_ready(&self) -> Result<(), StageError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(StageError::NotReady(self.kind().label()))
        }
    }
}
