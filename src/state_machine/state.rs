use std::fmt;

use serde::{Deserialize, Serialize};

use super::job::Artifact;

/// The externally visible lifecycle states of a job.
///
/// Each job flows through: PENDING → PROGRESS → SUCCESS | FAILURE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Progress,
    Success,
    Failure,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "PENDING"),
            JobState::Progress => write!(f, "PROGRESS"),
            JobState::Success => write!(f, "SUCCESS"),
            JobState::Failure => write!(f, "FAILURE"),
        }
    }
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }
}

/// What a job is doing right now, with the detail each phase carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    Queued,
    FetchingMetadata,
    Downloading {
        percent: u8,
    },
    Compressing {
        percent: u8,
        attempt: u32,
        bitrate_kbps: u32,
    },
    Converting {
        percent: u8,
    },
    Cutting {
        percent: u8,
        attempt: u32,
    },
    Notifying,
    Done {
        artifact: Artifact,
    },
    Failed {
        reason: String,
    },
}

impl Phase {
    pub fn state(&self) -> JobState {
        match self {
            Phase::Queued => JobState::Pending,
            Phase::Done { .. } => JobState::Success,
            Phase::Failed { .. } => JobState::Failure,
            _ => JobState::Progress,
        }
    }

    /// Free-text step label reported to pollers.
    pub fn step(&self) -> Option<&'static str> {
        match self {
            Phase::Queued => None,
            Phase::FetchingMetadata => Some("fetching_metadata"),
            Phase::Downloading { .. } => Some("downloading"),
            Phase::Compressing { .. } => Some("compressing"),
            Phase::Converting { .. } => Some("converting"),
            Phase::Cutting { .. } => Some("cutting"),
            Phase::Notifying => Some("notifying"),
            Phase::Done { .. } => Some("done"),
            Phase::Failed { .. } => Some("failed"),
        }
    }

    pub fn percent(&self) -> u8 {
        match self {
            Phase::Queued | Phase::FetchingMetadata | Phase::Failed { .. } => 0,
            Phase::Downloading { percent }
            | Phase::Compressing { percent, .. }
            | Phase::Converting { percent }
            | Phase::Cutting { percent, .. } => *percent,
            Phase::Notifying | Phase::Done { .. } => 100,
        }
    }

    /// Same phase kind with a new percentage; phases without a percentage are returned as is.
    pub fn with_percent(&self, percent: u8) -> Phase {
        match self {
            Phase::Downloading { .. } => Phase::Downloading { percent },
            Phase::Compressing {
                attempt,
                bitrate_kbps,
                ..
            } => Phase::Compressing {
                percent,
                attempt: *attempt,
                bitrate_kbps: *bitrate_kbps,
            },
            Phase::Converting { .. } => Phase::Converting { percent },
            Phase::Cutting { attempt, .. } => Phase::Cutting {
                percent,
                attempt: *attempt,
            },
            other => other.clone(),
        }
    }
}

/// Converts a raw extracted percentage into the integer range stored on a job.
pub fn clamp_percent(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.clamp(0.0, 100.0) as u8
}

/// Validates lifecycle transitions issued by the owning task.
pub struct StateMachine;

impl StateMachine {
    /// PENDING may move to PROGRESS or straight to FAILURE, PROGRESS may repeat
    /// or finish, and terminal states never move again.
    pub fn allows(from: JobState, to: JobState) -> bool {
        match (from, to) {
            (JobState::Pending, JobState::Pending) => true,
            (JobState::Pending, JobState::Progress) => true,
            (JobState::Pending, JobState::Failure) => true,
            (JobState::Progress, JobState::Progress) => true,
            (JobState::Progress, JobState::Success) => true,
            (JobState::Progress, JobState::Failure) => true,
            _ => false,
        }
    }
}
