use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShrinkrayError {
    #[error("{tool} exited with code {code:?}: {stderr}")]
    Tool {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("expected artifact is missing: {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error(
        "could not fit under {max_size_mb} MB: bitrate fell below the {min_kbps} kbps floor after {attempts} attempt(s)"
    )]
    SearchExhausted {
        min_kbps: u32,
        max_size_mb: f64,
        attempts: u32,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job {job_id} has no finished artifact (state {state})")]
    SourceNotReady { job_id: String, state: String },

    #[error("result notification failed: {0}")]
    Notify(#[from] reqwest::Error),

    #[error("result notification rejected with status {status}")]
    NotifyRejected { status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ShrinkrayError {
    /// Failures caused by the environment rather than by the request itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ShrinkrayError::Tool { .. }
                | ShrinkrayError::Spawn { .. }
                | ShrinkrayError::ArtifactMissing(_)
                | ShrinkrayError::Io(_)
        )
    }
}

pub type Result<T, E = ShrinkrayError> = std::result::Result<T, E>;
