//! Execution identity and pipeline phases

use serde::{Deserialize, Serialize};

/// Unique execution identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub uuid::Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a single execution is in the pipeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionPhase {
    Requested,
    Validated,
    Wrapped,
    HostAllocated,
    Invoked,
    Succeeded,
    Failed,
}

impl ExecutionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionPhase::Succeeded | ExecutionPhase::Failed)
    }
}

/// Tracks one execution through its phases.
///
/// Transitions only move forward; a terminal phase is final.
#[derive(Debug)]
pub struct ExecutionTracker {
    id: ExecutionId,
    phase: ExecutionPhase,
    /// Last non-terminal phase reached, reported on failure
    reached: ExecutionPhase,
}

impl ExecutionTracker {
    pub fn new(id: ExecutionId) -> Self {
        tracing::debug!(execution_id = %id, phase = ?ExecutionPhase::Requested, "Execution requested");
        Self {
            id,
            phase: ExecutionPhase::Requested,
            reached: ExecutionPhase::Requested,
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    /// Phase reached before the execution terminated
    pub fn reached(&self) -> ExecutionPhase {
        self.reached
    }

    pub fn advance(&mut self, next: ExecutionPhase) {
        if self.phase.is_terminal() {
            tracing::warn!(
                execution_id = %self.id,
                phase = ?self.phase,
                next = ?next,
                "Ignoring transition out of terminal phase"
            );
            return;
        }
        tracing::debug!(execution_id = %self.id, from = ?self.phase, to = ?next, "Execution phase");
        if !next.is_terminal() {
            self.reached = next;
        }
        self.phase = next;
    }
}
