//! External tool invocation: the downloader and the transcoder are black boxes
//! that take a declarative [`Invocation`] and either produce an artifact or fail.

mod command;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Result, ShrinkrayError};
use crate::formats::AudioCodec;
use crate::progress::TailMonitor;
use crate::state_machine::MediaInfo;

pub use command::{CommandRunner, ffmpeg_progress_line};

/// What the external tool should do.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Download {
        url: String,
        output_dir: PathBuf,
        file_stem: String,
    },
    EncodeAudio {
        input: PathBuf,
        output: PathBuf,
        codec: AudioCodec,
        bitrate_kbps: u32,
        use_vbr: bool,
    },
    ConvertVideo {
        input: PathBuf,
        output: PathBuf,
    },
    Cut {
        input: PathBuf,
        output: PathBuf,
        start_seconds: f64,
        end_seconds: f64,
    },
}

impl Operation {
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Download { .. } => "download",
            Operation::EncodeAudio { .. } => "encode",
            Operation::ConvertVideo { .. } => "convert",
            Operation::Cut { .. } => "cut",
        }
    }
}

/// An operation plus the file its progress output is appended to.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub operation: Operation,
    pub progress_log: PathBuf,
}

/// Runs external operations to completion.
pub trait ToolRunner: Send + Sync {
    /// Looks up the remote media without downloading it.
    fn metadata(&self, url: &str) -> impl Future<Output = Result<MediaInfo>> + Send;

    /// Runs the operation, appending progress output to `invocation.progress_log`,
    /// and returns the artifact path.
    fn run(&self, invocation: &Invocation) -> impl Future<Output = Result<PathBuf>> + Send;
}

/// Runs one invocation with a [`TailMonitor`] watching its progress log.
///
/// Whatever the outcome, the monitor is stopped and joined and the progress
/// log removed before this returns. A reported artifact that does not exist
/// is a failure.
pub async fn run_monitored<R, F>(
    runner: &R,
    invocation: &Invocation,
    poll_interval: Duration,
    on_progress: F,
) -> Result<PathBuf>
where
    R: ToolRunner,
    F: FnMut(f64) + Send + 'static,
{
    if let Some(parent) = invocation.progress_log.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut monitor = TailMonitor::start(&invocation.progress_log, poll_interval, on_progress);
    let outcome = runner.run(invocation).await;
    monitor.stop().await;
    remove_file_quietly(&invocation.progress_log).await;

    let artifact = outcome?;
    if !tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
        return Err(ShrinkrayError::ArtifactMissing(artifact));
    }
    debug!(operation = invocation.operation.label(), artifact = %artifact.display(), "operation finished");
    Ok(artifact)
}

/// Deletes a file, treating "already gone" as success.
pub async fn remove_file_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    /// Writes progress lines, then either produces the output or fails.
    struct ScriptedRunner {
        lines: Vec<&'static str>,
        produce: bool,
        fail: bool,
    }

    impl ToolRunner for ScriptedRunner {
        async fn metadata(&self, url: &str) -> Result<MediaInfo> {
            Ok(MediaInfo {
                id: url.to_string(),
                title: "t".into(),
                duration_seconds: 1.0,
            })
        }

        async fn run(&self, invocation: &Invocation) -> Result<PathBuf> {
            for line in &self.lines {
                let mut log = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&invocation.progress_log)
                    .unwrap();
                writeln!(log, "{line}").unwrap();
                tokio::time::sleep(Duration::from_millis(15)).await;
            }
            let Operation::ConvertVideo { output, .. } = &invocation.operation else {
                unreachable!()
            };
            if self.fail {
                return Err(ShrinkrayError::Tool {
                    tool: "ffmpeg".into(),
                    code: Some(1),
                    stderr: "boom".into(),
                });
            }
            if self.produce {
                std::fs::write(output, b"data").unwrap();
            }
            Ok(output.clone())
        }
    }

    fn invocation(dir: &Path) -> Invocation {
        Invocation {
            operation: Operation::ConvertVideo {
                input: dir.join("in.webm"),
                output: dir.join("out.mp4"),
            },
            progress_log: dir.join("logs").join("convert.log"),
        }
    }

    #[tokio::test]
    async fn forwards_progress_and_cleans_up_log() {
        let dir = tempfile::tempdir().unwrap();
        let inv = invocation(dir.path());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let runner = ScriptedRunner {
            lines: vec!["progress 25%", "noise", "progress 75%"],
            produce: true,
            fail: false,
        };

        let artifact = run_monitored(&runner, &inv, Duration::from_millis(5), move |p| {
            sink.lock().unwrap().push(p)
        })
        .await
        .unwrap();

        assert_eq!(artifact, dir.path().join("out.mp4"));
        assert_eq!(*seen.lock().unwrap(), vec![25.0, 75.0]);
        assert!(!inv.progress_log.exists());
    }

    #[tokio::test]
    async fn missing_artifact_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let inv = invocation(dir.path());
        let runner = ScriptedRunner {
            lines: vec![],
            produce: false,
            fail: false,
        };

        let err = run_monitored(&runner, &inv, Duration::from_millis(5), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ShrinkrayError::ArtifactMissing(_)));
    }

    #[tokio::test]
    async fn tool_failure_still_removes_log() {
        let dir = tempfile::tempdir().unwrap();
        let inv = invocation(dir.path());
        let runner = ScriptedRunner {
            lines: vec!["10%"],
            produce: false,
            fail: true,
        };

        let err = run_monitored(&runner, &inv, Duration::from_millis(5), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ShrinkrayError::Tool { .. }));
        assert!(!inv.progress_log.exists());
    }

    #[tokio::test]
    async fn remove_missing_file_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        remove_file_quietly(&dir.path().join("ghost")).await;
    }
}
