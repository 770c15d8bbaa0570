//! File probes shared by the search engine, the orchestrator and the tool runner.

use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::process::Command;
use tracing::{debug, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Size of `path` in MB, or 0 when the file does not exist.
pub async fn file_size_mb(path: &Path) -> f64 {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len() as f64 / BYTES_PER_MB,
        Err(_) => {
            warn!(path = %path.display(), "file not found while probing size");
            0.0
        }
    }
}

/// Duration of a media file in seconds according to ffprobe, or 0 on any failure.
pub async fn duration_seconds(ffprobe: &str, path: &Path) -> f64 {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            let text = String::from_utf8_lossy(&out.stdout);
            let duration = text.trim().parse::<f64>().unwrap_or(0.0);
            debug!(path = %path.display(), duration, "probed duration");
            duration
        }
        Ok(out) => {
            warn!(
                path = %path.display(),
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "ffprobe failed"
            );
            0.0
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "could not run ffprobe");
            0.0
        }
    }
}

/// `<stem>.<ext>` next to `base`, or `<stem>_<timestamp>.<ext>` when that already exists.
pub fn unique_output_path(base: &Path, ext: &str) -> PathBuf {
    let candidate = base.with_extension(ext);
    if !candidate.exists() {
        return candidate;
    }
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let stamped = base.with_file_name(format!("{stem}_{stamp}.{ext}"));
    if !stamped.exists() {
        return stamped;
    }
    // Same second twice: fall back to a counter.
    (1u32..)
        .map(|n| base.with_file_name(format!("{stem}_{stamp}_{n}.{ext}")))
        .find(|p| !p.exists())
        .unwrap_or(stamped)
}

/// Replaces characters that are awkward in file names with underscores.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}
