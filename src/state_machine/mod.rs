mod job;
mod state;

pub use job::{Artifact, JobRecord, JobStatus, MediaInfo, RetryConfig, new_job_id};
pub use state::{JobState, Phase, StateMachine, clamp_percent};
