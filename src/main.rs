use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use console::Style;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use shrinkray::cli::{Cli, Command};
use shrinkray::formats::{SUPPORTED_AUDIO_FORMATS, audio_format};
use shrinkray::ui::JobProgress;
use shrinkray::{
    AudioRequest, CommandRunner, FragmentRequest, FragmentSource, JobOrchestrator, JobRequest,
    JobState, JobStore, MemoryJobStore, Notifier, ShrinkrayConfig, VideoRequest, parse_timestamp,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => ShrinkrayConfig::load_from(path)?,
        None => ShrinkrayConfig::load()?,
    };

    let request = match cli.command {
        Command::Formats => {
            print_formats();
            return Ok(());
        }
        Command::Audio {
            url,
            format,
            max_size_mb,
            initial_kbps,
            min_kbps,
            no_vbr,
        } => JobRequest::Audio(AudioRequest {
            url,
            format: audio_format(&format)?,
            max_size_mb,
            initial_kbps,
            min_kbps,
            use_vbr: no_vbr.then_some(false),
        }),
        Command::Video { url, ext } => JobRequest::Video(VideoRequest {
            url,
            target_ext: ext,
        }),
        Command::Cut {
            source,
            start,
            end,
            delete_original,
        } => JobRequest::Fragment(FragmentRequest {
            source: fragment_source(source),
            start_seconds: parse_timestamp(&start)?,
            end_seconds: parse_timestamp(&end)?,
            delete_original,
        }),
    };

    std::fs::create_dir_all(&config.paths.data_dir)
        .with_context(|| format!("failed to create {}", config.paths.data_dir.display()))?;
    std::fs::create_dir_all(&config.paths.log_dir)
        .with_context(|| format!("failed to create {}", config.paths.log_dir.display()))?;

    let poll_interval = config.monitor.poll_interval();
    let sink = Notifier::from_url(config.notify_url.as_deref())?;
    let runner = CommandRunner::new(config.tools.clone());
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = Arc::new(JobOrchestrator::new(config, runner, Arc::clone(&store), sink));

    let job_id = orchestrator.create_job(cli.job_id);
    let mut progress = JobProgress::start(&job_id, request.kind());

    let handle = {
        let orchestrator = Arc::clone(&orchestrator);
        let job_id = job_id.clone();
        tokio::spawn(async move { orchestrator.run(&job_id, &request).await })
    };

    let mut ticker = tokio::time::interval(poll_interval);
    while !handle.is_finished() {
        ticker.tick().await;
        if let Some(status) = store.get_status(&job_id) {
            progress.update(&status);
        }
    }
    // The outcome is already recorded in the store.
    let _ = handle.await.context("job task panicked")?;

    let status = store
        .get_status(&job_id)
        .context("job vanished from the store")?;
    progress.complete(&status);
    progress.print_status(&status);

    if status.state == JobState::Failure {
        std::process::exit(1);
    }
    Ok(())
}

/// A cut source that is not an http(s) URL names an earlier job.
fn fragment_source(source: String) -> FragmentSource {
    if source.starts_with("http://") || source.starts_with("https://") {
        FragmentSource::Url(source)
    } else {
        FragmentSource::Job(source)
    }
}

fn print_formats() {
    let bold = Style::new().bold();
    println!("{}", bold.apply_to("Supported audio formats"));
    for format in SUPPORTED_AUDIO_FORMATS {
        println!(
            "  {:<6} {:<11} {}",
            bold.apply_to(format.extension),
            format.codec.ffmpeg_name(),
            format.description
        );
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
