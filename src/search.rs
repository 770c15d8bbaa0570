//! Iterative re-encoding at decreasing bitrate until the output fits a size budget.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::formats::AudioFormat;
use crate::probe::{file_size_mb, unique_output_path};
use crate::progress::DEFAULT_POLL_INTERVAL;
use crate::state_machine::Phase;
use crate::store::{JobStore, progress_reporter};
use crate::tool::{Invocation, Operation, ToolRunner, remove_file_quietly, run_monitored};

pub const DEFAULT_DECAY: f64 = 0.85;

/// What to encode and under which constraint.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub input: PathBuf,
    pub format: AudioFormat,
    /// `None` means no size ceiling: a single pass at `initial_kbps`.
    pub max_size_mb: Option<f64>,
    pub initial_kbps: u32,
    pub min_kbps: u32,
    pub use_vbr: bool,
}

/// One encode at one bitrate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodeAttempt {
    pub bitrate_kbps: u32,
    pub output_path: PathBuf,
    pub size_bytes: u64,
}

impl EncodeAttempt {
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// The kept artifact and how many encodes it took.
    Accepted { attempt: EncodeAttempt, attempts: u32 },
    /// The floor was reached without meeting the budget; nothing is left on disk.
    Exhausted { attempts: u32 },
}

/// Drives repeated encodes for one job, reporting each attempt to the store.
pub struct BitrateSearch<'a, R, S: ?Sized> {
    runner: &'a R,
    store: Arc<S>,
    decay: f64,
    poll_interval: Duration,
    log_dir: PathBuf,
    start_percent: u8,
}

impl<'a, R, S> BitrateSearch<'a, R, S>
where
    R: ToolRunner,
    S: JobStore + ?Sized + 'static,
{
    pub fn new(runner: &'a R, store: Arc<S>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            store,
            decay: DEFAULT_DECAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            log_dir: log_dir.into(),
            start_percent: 0,
        }
    }

    pub fn with_decay(mut self, decay: f64) -> Self {
        self.decay = decay;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Percentage published at the start of every attempt.
    pub fn with_start_percent(mut self, percent: u8) -> Self {
        self.start_percent = percent.min(100);
        self
    }

    /// Runs the search for `job_id`.
    ///
    /// Lossless targets and requests without a ceiling get exactly one encode,
    /// kept regardless of size. Otherwise each rejected attempt is deleted
    /// before the next one starts, and a bitrate below `min_kbps` ends the
    /// search without trying the floor itself.
    pub async fn search(&self, job_id: &str, request: &SearchRequest) -> Result<SearchOutcome> {
        let max_size_mb = match request.max_size_mb {
            Some(limit) if !request.format.is_lossless() => limit,
            _ => {
                info!(
                    job_id,
                    lossless = request.format.is_lossless(),
                    "single-pass encode, no size constraint applies"
                );
                let output = unique_output_path(&request.input, request.format.extension);
                let attempt = self
                    .encode(job_id, request, 1, request.initial_kbps, output)
                    .await?;
                return Ok(SearchOutcome::Accepted {
                    attempt,
                    attempts: 1,
                });
            }
        };

        if request.initial_kbps < request.min_kbps {
            warn!(
                job_id,
                initial_kbps = request.initial_kbps,
                min_kbps = request.min_kbps,
                "initial bitrate already below the floor"
            );
            return Ok(SearchOutcome::Exhausted { attempts: 0 });
        }

        let source_mb = file_size_mb(&request.input).await;
        let mut current = request.initial_kbps;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let output = attempt_path(&request.input, current, request.format.extension);
            let attempt = self.encode(job_id, request, attempts, current, output).await?;
            let size_mb = attempt.size_mb();

            if source_mb > 0.0 {
                info!(
                    job_id,
                    bitrate_kbps = current,
                    size_mb,
                    ratio_percent = size_mb / source_mb * 100.0,
                    "encode attempt finished"
                );
            }

            if size_mb <= max_size_mb {
                info!(job_id, bitrate_kbps = current, size_mb, max_size_mb, "size budget met");
                return Ok(SearchOutcome::Accepted { attempt, attempts });
            }

            warn!(
                job_id,
                bitrate_kbps = current,
                size_mb,
                max_size_mb,
                "output exceeds size budget, reducing bitrate"
            );
            remove_file_quietly(&attempt.output_path).await;

            let next = (f64::from(current) * self.decay).floor() as u32;
            if next < request.min_kbps || next == 0 || next >= current {
                error!(
                    job_id,
                    min_kbps = request.min_kbps,
                    attempts,
                    "reached the bitrate floor while still above the size budget"
                );
                return Ok(SearchOutcome::Exhausted { attempts });
            }
            current = next;
        }
    }

    async fn encode(
        &self,
        job_id: &str,
        request: &SearchRequest,
        attempt: u32,
        bitrate_kbps: u32,
        output: PathBuf,
    ) -> Result<EncodeAttempt> {
        let phase = Phase::Compressing {
            percent: self.start_percent,
            attempt,
            bitrate_kbps,
        };
        self.store.update(job_id, phase.clone());
        info!(job_id, attempt, bitrate_kbps, output = %output.display(), "encoding");

        let invocation = Invocation {
            operation: Operation::EncodeAudio {
                input: request.input.clone(),
                output: output.clone(),
                codec: request.format.codec,
                bitrate_kbps,
                use_vbr: request.use_vbr,
            },
            // Fresh file per attempt so the monitor never sees a previous attempt's output.
            progress_log: self
                .log_dir
                .join(format!("compress_{job_id}_{attempt}.log")),
        };
        let reporter = progress_reporter(Arc::clone(&self.store), job_id, phase);

        let artifact =
            match run_monitored(self.runner, &invocation, self.poll_interval, reporter).await {
                Ok(path) => path,
                Err(err) => {
                    remove_file_quietly(&output).await;
                    return Err(err);
                }
            };
        let size_bytes = tokio::fs::metadata(&artifact).await?.len();
        Ok(EncodeAttempt {
            bitrate_kbps,
            output_path: artifact,
            size_bytes,
        })
    }
}

fn attempt_path(input: &Path, bitrate_kbps: u32, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string());
    let base = input.with_file_name(format!("{stem}_{bitrate_kbps}k.{extension}"));
    unique_output_path(&base, extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShrinkrayError;
    use crate::formats::audio_format;
    use crate::state_machine::MediaInfo;
    use crate::store::MemoryJobStore;
    use parking_lot::Mutex;

    const MB: f64 = 1024.0 * 1024.0;

    /// Produces sparse files whose size is proportional to the bitrate.
    struct ProportionalEncoder {
        mb_per_kbps: f64,
        bitrates: Mutex<Vec<u32>>,
        fail_at: Option<u32>,
    }

    impl ProportionalEncoder {
        fn new(mb_per_kbps: f64) -> Self {
            Self {
                mb_per_kbps,
                bitrates: Mutex::new(Vec::new()),
                fail_at: None,
            }
        }

        fn bitrates(&self) -> Vec<u32> {
            self.bitrates.lock().clone()
        }
    }

    impl ToolRunner for ProportionalEncoder {
        async fn metadata(&self, _url: &str) -> Result<MediaInfo> {
            unreachable!("search never fetches metadata")
        }

        async fn run(&self, invocation: &Invocation) -> Result<PathBuf> {
            let Operation::EncodeAudio {
                output,
                bitrate_kbps,
                ..
            } = &invocation.operation
            else {
                panic!("unexpected operation {:?}", invocation.operation);
            };
            self.bitrates.lock().push(*bitrate_kbps);
            let file = std::fs::File::create(output)?;
            if self.fail_at == Some(*bitrate_kbps) {
                return Err(ShrinkrayError::Tool {
                    tool: "ffmpeg".into(),
                    code: Some(1),
                    stderr: "encoder crashed".into(),
                });
            }
            file.set_len((f64::from(*bitrate_kbps) * self.mb_per_kbps * MB) as u64)?;
            Ok(output.clone())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        store: Arc<MemoryJobStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("source.webm"), vec![0u8; 4096]).unwrap();
            Self {
                dir,
                store: Arc::new(MemoryJobStore::new()),
            }
        }

        fn request(&self, format: &str, max_size_mb: Option<f64>) -> SearchRequest {
            SearchRequest {
                input: self.dir.path().join("source.webm"),
                format: audio_format(format).unwrap(),
                max_size_mb,
                initial_kbps: 96,
                min_kbps: 32,
                use_vbr: true,
            }
        }

        fn engine<'a, R: ToolRunner>(&self, runner: &'a R) -> BitrateSearch<'a, R, MemoryJobStore> {
            BitrateSearch::new(runner, Arc::clone(&self.store), self.dir.path().join("logs"))
                .with_poll_interval(Duration::from_millis(5))
                .with_start_percent(50)
        }

        /// Output files left next to the source, excluding the source itself.
        fn outputs(&self) -> Vec<PathBuf> {
            std::fs::read_dir(self.dir.path())
                .unwrap()
                .map(|e| e.unwrap().path())
                .filter(|p| p.is_file() && p.file_name().unwrap() != "source.webm")
                .collect()
        }
    }

    #[tokio::test]
    async fn unreachable_target_exhausts_and_leaves_nothing() {
        let fx = Fixture::new();
        let encoder = ProportionalEncoder::new(0.1);

        let outcome = fx
            .engine(&encoder)
            .search("job", &fx.request("ogg", Some(0.5)))
            .await
            .unwrap();

        assert_eq!(outcome, SearchOutcome::Exhausted { attempts: 7 });
        assert_eq!(encoder.bitrates(), vec![96, 81, 68, 57, 48, 40, 34]);
        assert!(fx.outputs().is_empty());
        let logs = fx.dir.path().join("logs");
        assert_eq!(std::fs::read_dir(logs).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn target_met_at_initial_bitrate_takes_one_attempt() {
        let fx = Fixture::new();
        let encoder = ProportionalEncoder::new(0.1);

        let outcome = fx
            .engine(&encoder)
            .search("job", &fx.request("ogg", Some(10.0)))
            .await
            .unwrap();

        let SearchOutcome::Accepted { attempt, attempts } = outcome else {
            panic!("expected an accepted artifact");
        };
        assert_eq!(attempts, 1);
        assert_eq!(attempt.bitrate_kbps, 96);
        assert!(attempt.output_path.exists());
        assert_eq!(fx.outputs(), vec![attempt.output_path.clone()]);
        assert_eq!(encoder.bitrates(), vec![96]);
    }

    #[tokio::test]
    async fn converges_and_keeps_only_the_accepted_file() {
        let fx = Fixture::new();
        let encoder = ProportionalEncoder::new(0.1);

        let outcome = fx
            .engine(&encoder)
            .search("job", &fx.request("mp3", Some(6.0)))
            .await
            .unwrap();

        let SearchOutcome::Accepted { attempt, attempts } = outcome else {
            panic!("expected an accepted artifact");
        };
        assert_eq!(attempts, 4);
        assert_eq!(attempt.bitrate_kbps, 57);
        assert!(attempt.size_mb() <= 6.0);
        assert_eq!(fx.outputs(), vec![attempt.output_path.clone()]);

        let status = fx.store.get_status("job").unwrap();
        assert_eq!(status.attempt, Some(4));
        assert_eq!(status.bitrate_kbps, Some(57));
    }

    #[tokio::test]
    async fn lossless_ignores_size_ceiling() {
        let fx = Fixture::new();
        let encoder = ProportionalEncoder::new(0.1);

        let outcome = fx
            .engine(&encoder)
            .search("flac", &fx.request("flac", Some(0.01)))
            .await
            .unwrap();

        assert!(matches!(outcome, SearchOutcome::Accepted { attempts: 1, .. }));
        assert_eq!(encoder.bitrates(), vec![96]);
    }

    #[tokio::test]
    async fn no_ceiling_is_a_single_pass() {
        let fx = Fixture::new();
        let encoder = ProportionalEncoder::new(10.0);

        let outcome = fx
            .engine(&encoder)
            .search("job", &fx.request("ogg", None))
            .await
            .unwrap();

        let SearchOutcome::Accepted { attempt, .. } = outcome else {
            panic!("expected an accepted artifact");
        };
        assert_eq!(attempt.output_path, fx.dir.path().join("source.ogg"));
        assert_eq!(encoder.bitrates(), vec![96]);
    }

    #[tokio::test]
    async fn initial_below_floor_fails_without_encoding() {
        let fx = Fixture::new();
        let encoder = ProportionalEncoder::new(0.1);
        let mut request = fx.request("ogg", Some(1.0));
        request.initial_kbps = 24;

        let outcome = fx.engine(&encoder).search("job", &request).await.unwrap();

        assert_eq!(outcome, SearchOutcome::Exhausted { attempts: 0 });
        assert!(encoder.bitrates().is_empty());
    }

    #[tokio::test]
    async fn non_positive_ceiling_is_unreachable() {
        let fx = Fixture::new();
        let encoder = ProportionalEncoder::new(0.1);

        let outcome = fx
            .engine(&encoder)
            .search("job", &fx.request("webm", Some(0.0)))
            .await
            .unwrap();

        assert_eq!(outcome, SearchOutcome::Exhausted { attempts: 7 });
        assert!(fx.outputs().is_empty());
    }

    #[tokio::test]
    async fn tool_failure_propagates_and_removes_partial_output() {
        let fx = Fixture::new();
        let mut encoder = ProportionalEncoder::new(0.1);
        encoder.fail_at = Some(68);

        let err = fx
            .engine(&encoder)
            .search("job", &fx.request("ogg", Some(0.5)))
            .await
            .unwrap_err();

        assert!(matches!(err, ShrinkrayError::Tool { .. }));
        assert_eq!(encoder.bitrates(), vec![96, 81, 68]);
        assert!(fx.outputs().is_empty());
    }

    #[test]
    fn attempt_path_embeds_bitrate() {
        let path = attempt_path(Path::new("/data/My Song.webm"), 81, "ogg");
        assert_eq!(path, PathBuf::from("/data/My Song_81k.ogg"));
    }
}
