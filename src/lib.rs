//! Asynchronous media job pipeline: download, bitrate-constrained encode,
//! fragment cut and result hand-off, with live progress published per job.

pub mod cli;
pub mod config;
pub mod error;
pub mod formats;
pub mod notify;
pub mod orchestrator;
pub mod probe;
pub mod progress;
pub mod search;
pub mod state_machine;
pub mod store;
pub mod tool;
pub mod ui;

pub use config::ShrinkrayConfig;
pub use error::{Result, ShrinkrayError};
pub use notify::{HttpNotifier, JobResult, LogSink, Notifier, ResultSink};
pub use orchestrator::{
    AudioRequest, FragmentRequest, FragmentSource, JobOrchestrator, JobRequest, VideoRequest,
    parse_timestamp,
};
pub use progress::{TailMonitor, extract_percent};
pub use search::{BitrateSearch, EncodeAttempt, SearchOutcome, SearchRequest};
pub use state_machine::{Artifact, JobState, JobStatus, Phase};
pub use store::{JobStore, MemoryJobStore};
pub use tool::{CommandRunner, Invocation, Operation, ToolRunner};
