use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::{JobState, Phase};

/// Descriptive metadata of the remote media, gathered before downloading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub duration_seconds: f64,
}

/// A finished output file handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub size_mb: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaInfo>,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed delay in milliseconds between attempts.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    2000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.delay_ms)
    }
}

pub fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}

/// The stored record for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub phase: Phase,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(id: impl Into<String>, phase: Phase) -> Self {
        Self {
            id: id.into(),
            phase,
            updated_at: Utc::now(),
        }
    }

    pub fn state(&self) -> JobState {
        self.phase.state()
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::from(self)
    }
}

/// The polling-friendly view returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub step: Option<String>,
    pub percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate_kbps: Option<u32>,
    pub result: Option<Artifact>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobStatus {
    fn from(record: &JobRecord) -> Self {
        let phase = &record.phase;
        let (attempt, bitrate_kbps) = match phase {
            Phase::Compressing {
                attempt,
                bitrate_kbps,
                ..
            } => (Some(*attempt), Some(*bitrate_kbps)),
            Phase::Cutting { attempt, .. } => (Some(*attempt), None),
            _ => (None, None),
        };
        let (result, error) = match phase {
            Phase::Done { artifact } => (Some(artifact.clone()), None),
            Phase::Failed { reason } => (None, Some(reason.clone())),
            _ => (None, None),
        };

        Self {
            state: phase.state(),
            step: phase.step().map(str::to_string),
            percent: phase.percent(),
            attempt,
            bitrate_kbps,
            result,
            error,
            updated_at: record.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_attempts(), 4);
        assert_eq!(config.delay().as_millis(), 2000);
    }

    #[test]
    fn job_ids_are_unique() {
        assert_ne!(new_job_id(), new_job_id());
    }

    #[test]
    fn status_of_progress_record() {
        let record = JobRecord::new(
            "job-1",
            Phase::Compressing {
                percent: 30,
                attempt: 2,
                bitrate_kbps: 81,
            },
        );
        let status = record.status();
        assert_eq!(status.state, JobState::Progress);
        assert_eq!(status.step.as_deref(), Some("compressing"));
        assert_eq!(status.percent, 30);
        assert_eq!(status.attempt, Some(2));
        assert_eq!(status.bitrate_kbps, Some(81));
        assert!(status.result.is_none());
        assert!(status.error.is_none());
    }

    #[test]
    fn status_of_failed_record_carries_error() {
        let record = JobRecord::new(
            "job-2",
            Phase::Failed {
                reason: "yt-dlp exited with code Some(1)".into(),
            },
        );
        let status = record.status();
        assert_eq!(status.state, JobState::Failure);
        assert_eq!(status.error.as_deref(), Some("yt-dlp exited with code Some(1)"));
    }

    #[test]
    fn status_json_shape() {
        let record = JobRecord::new(
            "job-3",
            Phase::Done {
                artifact: Artifact {
                    path: PathBuf::from("/data/clip.ogg"),
                    size_mb: 1.25,
                    media: None,
                },
            },
        );
        let json = serde_json::to_value(record.status()).unwrap();
        assert_eq!(json["state"], "SUCCESS");
        assert_eq!(json["step"], "done");
        assert_eq!(json["percent"], 100);
        assert_eq!(json["result"]["path"], "/data/clip.ogg");
        assert!(json["error"].is_null());
        assert!(json.get("attempt").is_none());
    }
}
