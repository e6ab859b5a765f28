mod job;
mod state;

pub use job::{ContainerImage, InstanceType, Job, JobId, MAX_INSTANCE_COUNT};
pub use state::{JobStatus, TransitionError, validate_transition};
