use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::ShrinkrayConfig;
use crate::error::{Result, ShrinkrayError};
use crate::formats::AudioFormat;
use crate::notify::{JobResult, ResultSink};
use crate::probe::{file_size_mb, sanitize_filename, unique_output_path};
use crate::search::{BitrateSearch, SearchOutcome, SearchRequest};
use crate::state_machine::{Artifact, JobState, MediaInfo, Phase, StateMachine, new_job_id};
use crate::store::{JobStore, progress_reporter};
use crate::tool::{Invocation, Operation, ToolRunner, remove_file_quietly, run_monitored};

/// Download a URL and reduce it to an audio file, optionally under a size ceiling.
#[derive(Debug, Clone)]
pub struct AudioRequest {
    pub url: String,
    pub format: AudioFormat,
    pub max_size_mb: Option<f64>,
    /// Per-job overrides of the configured search parameters.
    pub initial_kbps: Option<u32>,
    pub min_kbps: Option<u32>,
    pub use_vbr: Option<bool>,
}

/// Download a URL, optionally converting it to another container.
#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub url: String,
    pub target_ext: Option<String>,
}

/// Where a fragment is cut from.
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentSource {
    Url(String),
    /// Artifact of an earlier successful job.
    Job(String),
}

/// Cut `[start_seconds, end_seconds)` out of a source.
#[derive(Debug, Clone)]
pub struct FragmentRequest {
    pub source: FragmentSource,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub delete_original: bool,
}

#[derive(Debug, Clone)]
pub enum JobRequest {
    Audio(AudioRequest),
    Video(VideoRequest),
    Fragment(FragmentRequest),
}

impl JobRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            JobRequest::Audio(_) => "audio",
            JobRequest::Video(_) => "video",
            JobRequest::Fragment(_) => "fragment",
        }
    }
}

/// Drives jobs through their phases, publishing every boundary to the store.
///
/// One call to [`run`](Self::run) owns one job from start to a terminal
/// state; phases run strictly in sequence and each external operation gets
/// its own Tail Monitor.
pub struct JobOrchestrator<R, S: ?Sized, N> {
    config: ShrinkrayConfig,
    runner: R,
    store: Arc<S>,
    sink: N,
}

impl<R, S, N> JobOrchestrator<R, S, N>
where
    R: ToolRunner,
    S: JobStore + ?Sized + 'static,
    N: ResultSink,
{
    pub fn new(config: ShrinkrayConfig, runner: R, store: Arc<S>, sink: N) -> Self {
        Self {
            config,
            runner,
            store,
            sink,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Registers a job in PENDING and returns its id, generating one if none is given.
    pub fn create_job(&self, job_id: Option<String>) -> String {
        let job_id = job_id.unwrap_or_else(new_job_id);
        self.store.update(&job_id, Phase::Queued);
        info!(job_id = %job_id, "job queued");
        job_id
    }

    /// Runs a job to SUCCESS or FAILURE. The returned error is the one recorded on the job.
    pub async fn run(&self, job_id: &str, request: &JobRequest) -> Result<Artifact> {
        info!(job_id, kind = request.kind(), "job started");
        let produced = match request {
            JobRequest::Audio(req) => self.audio_job(job_id, req).await,
            JobRequest::Video(req) => self.video_job(job_id, req).await,
            JobRequest::Fragment(req) => self.fragment_job(job_id, req).await,
        };
        let delivered = match produced {
            Ok(artifact) => self.notify(job_id, request.kind(), artifact).await,
            Err(err) => Err(err),
        };

        match delivered {
            Ok(artifact) => {
                info!(job_id, path = %artifact.path.display(), size_mb = artifact.size_mb, "job succeeded");
                self.transition(
                    job_id,
                    Phase::Done {
                        artifact: artifact.clone(),
                    },
                );
                Ok(artifact)
            }
            Err(err) => {
                error!(job_id, error = %err, transient = err.is_transient(), "job failed");
                self.transition(
                    job_id,
                    Phase::Failed {
                        reason: err.to_string(),
                    },
                );
                Err(err)
            }
        }
    }

    pub async fn run_audio(&self, job_id: &str, request: AudioRequest) -> Result<Artifact> {
        self.run(job_id, &JobRequest::Audio(request)).await
    }

    pub async fn run_video(&self, job_id: &str, request: VideoRequest) -> Result<Artifact> {
        self.run(job_id, &JobRequest::Video(request)).await
    }

    pub async fn run_fragment(&self, job_id: &str, request: FragmentRequest) -> Result<Artifact> {
        self.run(job_id, &JobRequest::Fragment(request)).await
    }

    async fn audio_job(&self, job_id: &str, request: &AudioRequest) -> Result<Artifact> {
        let (media, downloaded) = self.acquire(job_id, &request.url).await?;

        let search = &self.config.search;
        let search_request = SearchRequest {
            input: downloaded,
            format: request.format,
            max_size_mb: request.max_size_mb,
            initial_kbps: request.initial_kbps.unwrap_or(search.initial_kbps),
            min_kbps: request.min_kbps.unwrap_or(search.min_kbps),
            use_vbr: request.use_vbr.unwrap_or(search.use_vbr),
        };
        let engine = BitrateSearch::new(
            &self.runner,
            Arc::clone(&self.store),
            &self.config.paths.log_dir,
        )
        .with_decay(search.decay)
        .with_poll_interval(self.config.monitor.poll_interval())
        .with_start_percent(self.config.compress_start_percent);

        match engine.search(job_id, &search_request).await? {
            SearchOutcome::Accepted { attempt, attempts } => {
                info!(job_id, attempts, bitrate_kbps = attempt.bitrate_kbps, "compression accepted");
                Ok(Artifact {
                    size_mb: attempt.size_mb(),
                    path: attempt.output_path,
                    media: Some(media),
                })
            }
            SearchOutcome::Exhausted { attempts } => Err(ShrinkrayError::SearchExhausted {
                min_kbps: search_request.min_kbps,
                max_size_mb: search_request.max_size_mb.unwrap_or(0.0),
                attempts,
            }),
        }
    }

    async fn video_job(&self, job_id: &str, request: &VideoRequest) -> Result<Artifact> {
        let (media, downloaded) = self.acquire(job_id, &request.url).await?;

        let target = request
            .target_ext
            .as_deref()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty());
        let current = downloaded
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());

        let path = match target {
            Some(ext) if current.as_deref() != Some(ext.as_str()) => {
                let phase = Phase::Converting { percent: 0 };
                self.transition(job_id, phase.clone());
                let output = unique_output_path(&downloaded, &ext);
                let invocation = Invocation {
                    operation: Operation::ConvertVideo {
                        input: downloaded.clone(),
                        output: output.clone(),
                    },
                    progress_log: self.progress_log("convert", job_id),
                };
                let converted = self.monitored(job_id, &invocation, phase).await;
                if converted.is_err() {
                    remove_file_quietly(&output).await;
                }
                let converted = converted?;
                // The converted file replaces the download.
                remove_file_quietly(&downloaded).await;
                converted
            }
            _ => downloaded,
        };

        Ok(Artifact {
            size_mb: file_size_mb(&path).await,
            path,
            media: Some(media),
        })
    }

    async fn fragment_job(&self, job_id: &str, request: &FragmentRequest) -> Result<Artifact> {
        validate_range(request.start_seconds, request.end_seconds)?;

        let (source, media) = match &request.source {
            FragmentSource::Url(url) => {
                let (media, downloaded) = self.acquire(job_id, url).await?;
                (downloaded, Some(media))
            }
            FragmentSource::Job(source_job) => {
                let artifact = self.finished_artifact(source_job)?;
                (artifact.path, artifact.media)
            }
        };

        let path = self.cut_with_retry(job_id, &source, request).await?;
        if request.delete_original {
            info!(job_id, source = %source.display(), "deleting original after cut");
            remove_file_quietly(&source).await;
        }

        Ok(Artifact {
            size_mb: file_size_mb(&path).await,
            path,
            media,
        })
    }

    /// Metadata lookup followed by the monitored download.
    async fn acquire(&self, job_id: &str, url: &str) -> Result<(MediaInfo, PathBuf)> {
        self.transition(job_id, Phase::FetchingMetadata);
        let media = self.runner.metadata(url).await?;
        info!(job_id, media_id = %media.id, title = %media.title, "metadata acquired");

        let phase = Phase::Downloading { percent: 0 };
        self.transition(job_id, phase.clone());
        let invocation = Invocation {
            operation: Operation::Download {
                url: url.to_string(),
                output_dir: self.config.paths.data_dir.clone(),
                file_stem: sanitize_filename(&format!("{}_{}", media.title, media.id)),
            },
            progress_log: self.progress_log("download", job_id),
        };
        let downloaded = self.monitored(job_id, &invocation, phase).await?;
        let size_mb = file_size_mb(&downloaded).await;
        info!(job_id, path = %downloaded.display(), size_mb, "download finished");
        Ok((media, downloaded))
    }

    /// Cuts the fragment, retrying transient failures with a fixed delay.
    async fn cut_with_retry(
        &self,
        job_id: &str,
        source: &Path,
        request: &FragmentRequest,
    ) -> Result<PathBuf> {
        let retry = &self.config.cut_retry;
        let max_attempts = retry.max_attempts();
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "fragment".to_string());
        let ext = source
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mp4".to_string());
        let base = source.with_file_name(format!(
            "{stem}_cut_{}_{}.{ext}",
            millis(request.start_seconds),
            millis(request.end_seconds)
        ));

        let mut attempt = 1;
        loop {
            let phase = Phase::Cutting {
                percent: 0,
                attempt,
            };
            self.transition(job_id, phase.clone());
            let output = unique_output_path(&base, &ext);
            let invocation = Invocation {
                operation: Operation::Cut {
                    input: source.to_path_buf(),
                    output: output.clone(),
                    start_seconds: request.start_seconds,
                    end_seconds: request.end_seconds,
                },
                progress_log: self.progress_log(&format!("cut_{attempt}"), job_id),
            };

            match self.monitored(job_id, &invocation, phase).await {
                Ok(path) => return Ok(path),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    warn!(
                        job_id,
                        attempt,
                        max_attempts,
                        delay_ms = retry.delay_ms,
                        error = %err,
                        "cut failed, retrying"
                    );
                    remove_file_quietly(&output).await;
                    tokio::time::sleep(retry.delay()).await;
                    attempt += 1;
                }
                Err(err) => {
                    remove_file_quietly(&output).await;
                    return Err(err);
                }
            }
        }
    }

    async fn notify(&self, job_id: &str, kind: &str, artifact: Artifact) -> Result<Artifact> {
        self.transition(job_id, Phase::Notifying);
        let result = JobResult {
            job_id: job_id.to_string(),
            kind: kind.to_string(),
            artifact,
        };
        self.sink.deliver(&result).await?;
        Ok(result.artifact)
    }

    async fn monitored(&self, job_id: &str, invocation: &Invocation, phase: Phase) -> Result<PathBuf> {
        let reporter = progress_reporter(Arc::clone(&self.store), job_id, phase);
        run_monitored(
            &self.runner,
            invocation,
            self.config.monitor.poll_interval(),
            reporter,
        )
        .await
    }

    fn finished_artifact(&self, source_job: &str) -> Result<Artifact> {
        let record = self
            .store
            .read(source_job)
            .ok_or_else(|| ShrinkrayError::JobNotFound(source_job.to_string()))?;
        match &record.phase {
            Phase::Done { artifact } => Ok(artifact.clone()),
            other => Err(ShrinkrayError::SourceNotReady {
                job_id: source_job.to_string(),
                state: other.state().to_string(),
            }),
        }
    }

    fn progress_log(&self, step: &str, job_id: &str) -> PathBuf {
        self.config
            .paths
            .log_dir
            .join(format!("{step}_{job_id}.log"))
    }

    /// Publishes a phase boundary unless the job already reached a terminal state.
    fn transition(&self, job_id: &str, phase: Phase) {
        let from = self
            .store
            .read(job_id)
            .map(|record| record.state())
            .unwrap_or(JobState::Pending);
        let to = phase.state();
        if !StateMachine::allows(from, to) {
            warn!(job_id, %from, %to, "ignoring transition");
            return;
        }
        self.store.update(job_id, phase);
    }
}

fn validate_range(start: f64, end: f64) -> Result<()> {
    if !start.is_finite() || !end.is_finite() || start < 0.0 {
        return Err(ShrinkrayError::InvalidRequest(format!(
            "invalid cut range {start}..{end}"
        )));
    }
    if start >= end {
        return Err(ShrinkrayError::InvalidRequest(format!(
            "cut start ({start}s) must be before end ({end}s)"
        )));
    }
    Ok(())
}

fn millis(seconds: f64) -> u64 {
    (seconds * 1000.0).round() as u64
}

/// Parses `SS[.fff]`, `MM:SS[.fff]` or `HH:MM:SS[.fff]` into seconds.
pub fn parse_timestamp(input: &str) -> Result<f64> {
    let invalid = || ShrinkrayError::InvalidRequest(format!("invalid timestamp: {input:?}"));
    let parts: Vec<&str> = input.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(invalid());
    }

    let mut total = 0.0;
    for (i, part) in parts.iter().enumerate() {
        let is_last = i == parts.len() - 1;
        let value = if is_last {
            part.parse::<f64>().map_err(|_| invalid())?
        } else {
            f64::from(part.parse::<u32>().map_err(|_| invalid())?)
        };
        if !value.is_finite() || value < 0.0 {
            return Err(invalid());
        }
        // Every field after the first is bounded by its unit.
        if i > 0 && value >= 60.0 {
            return Err(invalid());
        }
        total = total * 60.0 + value;
    }
    Ok(total)
}
