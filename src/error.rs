use thiserror::Error;

use crate::command::StageOutcome;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum HemeflowError {
    #[error("Instance count must be between 1 and 36, got {0}")]
    InvalidInstanceCount(u32),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Output packaging failed: {0}")]
    Packaging(StageOutcome),

    #[error("Task queue is shut down")]
    QueueClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
