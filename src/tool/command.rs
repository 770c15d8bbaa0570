use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::{Invocation, Operation, ToolRunner};
use crate::config::ToolsConfig;
use crate::error::{Result, ShrinkrayError};
use crate::probe;
use crate::state_machine::MediaInfo;

/// Lines of stderr kept for the error message of a failed run.
const STDERR_TAIL_LINES: usize = 20;

/// How stdout lines are turned into progress-log lines.
#[derive(Debug, Clone, Copy)]
enum LineMode {
    /// Copy lines as they are (yt-dlp already prints percentages).
    Verbatim,
    /// Translate `-progress pipe:1` key/value output into percentages.
    FfmpegProgress { total_seconds: f64 },
}

/// [`ToolRunner`] backed by the `yt-dlp` and `ffmpeg` executables.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    tools: ToolsConfig,
}

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    duration: Option<f64>,
}

impl CommandRunner {
    pub fn new(tools: ToolsConfig) -> Self {
        Self { tools }
    }

    async fn download(
        &self,
        url: &str,
        output_dir: &Path,
        file_stem: &str,
        progress_log: &Path,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(output_dir).await?;
        let template = output_dir.join(format!("{file_stem}.%(ext)s"));
        let path_file = output_dir.join(format!(".{file_stem}.path"));

        let args: Vec<OsString> = vec![
            "-f".into(),
            "bv+ba/best".into(),
            "--newline".into(),
            "--progress".into(),
            "--no-playlist".into(),
            "-o".into(),
            template.into_os_string(),
            "--print-to-file".into(),
            "after_move:filepath".into(),
            path_file.clone().into_os_string(),
            url.into(),
        ];
        self.spawn_logged(&self.tools.yt_dlp, args, progress_log, LineMode::Verbatim)
            .await?;

        let printed = tokio::fs::read_to_string(&path_file).await.map_err(|_| {
            ShrinkrayError::ArtifactMissing(output_dir.join(format!("{file_stem}.*")))
        })?;
        let _ = tokio::fs::remove_file(&path_file).await;
        let artifact = printed
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| PathBuf::from(l.trim()))
            .ok_or_else(|| ShrinkrayError::ArtifactMissing(output_dir.to_path_buf()))?;
        Ok(artifact)
    }

    async fn ffmpeg(
        &self,
        input: &Path,
        output: &Path,
        pre_input: Vec<OsString>,
        post_input: Vec<String>,
        total_seconds: f64,
        progress_log: &Path,
    ) -> Result<PathBuf> {
        let mut args: Vec<OsString> = vec![
            "-y".into(),
            "-nostats".into(),
            "-progress".into(),
            "pipe:1".into(),
        ];
        args.extend(pre_input);
        args.push("-i".into());
        args.push(input.as_os_str().to_owned());
        args.extend(post_input.into_iter().map(OsString::from));
        args.push(output.as_os_str().to_owned());

        self.spawn_logged(
            &self.tools.ffmpeg,
            args,
            progress_log,
            LineMode::FfmpegProgress { total_seconds },
        )
        .await?;
        Ok(output.to_path_buf())
    }

    /// Spawns `tool`, appends its progress to `progress_log`, and waits for it.
    async fn spawn_logged(
        &self,
        tool: &str,
        args: Vec<OsString>,
        progress_log: &Path,
        mode: LineMode,
    ) -> Result<()> {
        debug!(tool, ?args, "spawning external tool");
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(progress_log)
            .await?;

        let mut child = Command::new(tool)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ShrinkrayError::Spawn {
                tool: tool.to_string(),
                source,
            })?;

        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(tail_lines(stderr)));

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                let translated = match mode {
                    LineMode::Verbatim => Some(line),
                    LineMode::FfmpegProgress { total_seconds } => {
                        ffmpeg_progress_line(&line, total_seconds)
                    }
                };
                if let Some(text) = translated {
                    log.write_all(text.as_bytes()).await?;
                    log.write_all(b"\n").await?;
                    log.flush().await?;
                }
            }
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(ShrinkrayError::Tool {
                tool: tool.to_string(),
                code: status.code(),
                stderr,
            });
        }
        Ok(())
    }
}

impl ToolRunner for CommandRunner {
    async fn metadata(&self, url: &str) -> Result<MediaInfo> {
        info!(url, "fetching media metadata");
        let output = Command::new(&self.tools.yt_dlp)
            .args(["--dump-single-json", "--no-playlist", "--skip-download"])
            .arg(url)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ShrinkrayError::Spawn {
                tool: self.tools.yt_dlp.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ShrinkrayError::Tool {
                tool: self.tools.yt_dlp.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let info: YtDlpInfo = serde_json::from_slice(&output.stdout)?;
        Ok(MediaInfo {
            id: info.id,
            title: info.title,
            duration_seconds: info.duration.unwrap_or(0.0),
        })
    }

    async fn run(&self, invocation: &Invocation) -> Result<PathBuf> {
        let log = invocation.progress_log.as_path();
        match &invocation.operation {
            Operation::Download {
                url,
                output_dir,
                file_stem,
            } => self.download(url, output_dir, file_stem, log).await,
            Operation::EncodeAudio {
                input,
                output,
                codec,
                bitrate_kbps,
                use_vbr,
            } => {
                let total = probe::duration_seconds(&self.tools.ffprobe, input).await;
                let mut post = vec!["-vn".to_string()];
                post.extend(codec.encode_args(*bitrate_kbps, *use_vbr));
                self.ffmpeg(input, output, Vec::new(), post, total, log).await
            }
            Operation::ConvertVideo { input, output } => {
                let total = probe::duration_seconds(&self.tools.ffprobe, input).await;
                self.ffmpeg(input, output, Vec::new(), Vec::new(), total, log)
                    .await
            }
            Operation::Cut {
                input,
                output,
                start_seconds,
                end_seconds,
            } => {
                let length = end_seconds - start_seconds;
                let pre = vec!["-ss".into(), format!("{start_seconds:.3}").into()];
                let post = vec![
                    "-t".to_string(),
                    format!("{length:.3}"),
                    "-c".to_string(),
                    "copy".to_string(),
                    "-avoid_negative_ts".to_string(),
                    "make_zero".to_string(),
                ];
                self.ffmpeg(input, output, pre, post, length, log).await
            }
        }
    }
}

/// Converts one line of ffmpeg `-progress` output into a `"<pct>%"` line.
///
/// Returns `None` for keys that carry no position, or when the total duration is unknown.
pub fn ffmpeg_progress_line(line: &str, total_seconds: f64) -> Option<String> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        // Both keys are in microseconds despite the name of the second one.
        "out_time_us" | "out_time_ms" if total_seconds > 0.0 => {
            let micros = value.trim().parse::<f64>().ok()?;
            let percent = (micros / 1_000_000.0 / total_seconds * 100.0).clamp(0.0, 100.0);
            Some(format!("{percent:.1}%"))
        }
        "progress" if value.trim() == "end" => Some("100%".to_string()),
        _ => None,
    }
}

async fn tail_lines<R: AsyncRead + Unpin>(reader: R) -> String {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into_iter().collect::<Vec<_>>().join("\n")
}
