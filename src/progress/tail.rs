use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace};

use super::extract::extract_percent;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Background observer of an append-only progress file.
///
/// Content already present when the monitor starts is ignored, so a log file
/// reused across attempts only reports what the new attempt writes. A missing
/// file is treated as not created yet.
pub struct TailMonitor {
    path: PathBuf,
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl TailMonitor {
    /// Spawns the monitor on the current tokio runtime.
    pub fn start<F>(path: impl Into<PathBuf>, poll_interval: Duration, on_progress: F) -> Self
    where
        F: FnMut(f64) + Send + 'static,
    {
        let path = path.into();
        let reader = TailReader::at_end_of(&path);
        let (stop_tx, stop_rx) = watch::channel(false);
        debug!(path = %path.display(), offset = reader.offset, "starting progress monitor");

        let handle = tokio::spawn(tail_loop(reader, poll_interval, stop_rx, on_progress));

        Self {
            path,
            stop_tx,
            handle: Some(handle),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signals the monitor and waits for its last read cycle to finish.
    ///
    /// Safe to call more than once. The backing file may be removed once this returns.
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                debug!(path = %self.path.display(), error = %err, "progress monitor task ended abnormally");
            }
            debug!(path = %self.path.display(), "progress monitor stopped");
        }
    }
}

impl Drop for TailMonitor {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

async fn tail_loop<F>(
    mut reader: TailReader,
    poll_interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
    mut on_progress: F,
) where
    F: FnMut(f64) + Send + 'static,
{
    loop {
        reader.poll(&mut on_progress, false).await;
        if *stop_rx.borrow() {
            break;
        }
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = sleep(poll_interval) => {}
        }
    }
    // Pick up anything written between the last poll and the stop signal.
    reader.poll(&mut on_progress, true).await;
}

/// Incremental reader remembering how far into the file it has consumed.
struct TailReader {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
}

impl TailReader {
    fn at_end_of(path: &Path) -> Self {
        let offset = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        Self {
            path: path.to_path_buf(),
            offset,
            partial: Vec::new(),
        }
    }

    async fn poll<F: FnMut(f64)>(&mut self, on_progress: &mut F, flush: bool) {
        match self.read_appended().await {
            Ok(chunk) => self.consume(&chunk, on_progress),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => trace!(path = %self.path.display(), error = %err, "progress read failed, retrying"),
        }
        if flush && !self.partial.is_empty() {
            let rest = std::mem::take(&mut self.partial);
            emit(&rest, on_progress);
        }
    }

    async fn read_appended(&mut self) -> std::io::Result<Vec<u8>> {
        let mut file = File::open(&self.path).await?;
        let len = file.metadata().await?.len();
        if len < self.offset {
            // Truncated or recreated: start over from the top.
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }
        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut chunk = Vec::with_capacity((len - self.offset) as usize);
        let read = file.read_to_end(&mut chunk).await?;
        self.offset += read as u64;
        Ok(chunk)
    }

    fn consume<F: FnMut(f64)>(&mut self, chunk: &[u8], on_progress: &mut F) {
        self.partial.extend_from_slice(chunk);
        // Tools redraw progress with '\r' as often as they emit '\n'.
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n' || b == b'\r') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            emit(&line[..line.len() - 1], on_progress);
        }
    }
}

fn emit<F: FnMut(f64)>(line: &[u8], on_progress: &mut F) {
    if line.is_empty() {
        return;
    }
    if let Some(percent) = extract_percent(&String::from_utf8_lossy(line)) {
        on_progress(percent);
    }
}
