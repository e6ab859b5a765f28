use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The lifecycle states of a simulation job.
///
/// A job flows through:
/// ADDED → PREPROCESSING → CONFIGURED → QUEUED → RUNNING → DONE
/// with FAILED reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Created; geometry and profile inputs uploaded, setup not yet run.
    Added,
    /// The setup pipeline is converting geometry/profile inputs.
    Preprocessing,
    /// Setup succeeded; solver configuration and input files exist.
    Configured,
    /// Handed to the work queue, waiting for a worker slot.
    Queued,
    /// Provisioning, solver execution, or output conversion in progress.
    Running,
    /// All run stages succeeded. Terminal.
    Done,
    /// A pipeline stage failed. Terminal.
    Failed,
}

impl JobStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Added => write!(f, "ADDED"),
            JobStatus::Preprocessing => write!(f, "PREPROCESSING"),
            JobStatus::Configured => write!(f, "CONFIGURED"),
            JobStatus::Queued => write!(f, "QUEUED"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Done => write!(f, "DONE"),
            JobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal status transition {from} → {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// The legal transition table.
///
/// Status moves forward one pipeline step at a time; the only lateral move
/// is the universal escape to `Failed`. Nothing leaves `Done` or `Failed`.
/// Every status write goes through this check against the currently
/// persisted value, so a stale in-memory copy cannot resurrect a job.
pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), TransitionError> {
    use JobStatus::*;

    let legal = match (from, to) {
        (Added, Preprocessing) => true,
        (Preprocessing, Configured) => true,
        (Configured, Queued) => true,
        (Queued, Running) => true,
        (Running, Done) => true,
        (from, Failed) => !from.is_terminal(),
        _ => false,
    };

    if legal {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}
