//! Shared job state, addressed purely by job id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::state_machine::{JobRecord, JobStatus, Phase, clamp_percent};

/// Externally visible job state, written by the owning job task and read by pollers.
///
/// Updates are last-write-wins; callers serialize their own updates per job.
pub trait JobStore: Send + Sync {
    fn update(&self, job_id: &str, phase: Phase);

    fn read(&self, job_id: &str) -> Option<Arc<JobRecord>>;

    /// Status query for pollers. Never waits on in-progress work.
    fn get_status(&self, job_id: &str) -> Option<JobStatus> {
        self.read(job_id).map(|record| record.status())
    }
}

impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    fn update(&self, job_id: &str, phase: Phase) {
        (**self).update(job_id, phase)
    }

    fn read(&self, job_id: &str) -> Option<Arc<JobRecord>> {
        (**self).read(job_id)
    }
}

/// In-process store. Records are immutable snapshots swapped in whole, so a
/// reader sees either the old or the new record and never a mix.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<String, Arc<JobRecord>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl JobStore for MemoryJobStore {
    fn update(&self, job_id: &str, phase: Phase) {
        // Build outside the lock so the write section is a single pointer swap.
        let record = Arc::new(JobRecord::new(job_id, phase));
        self.records.write().insert(job_id.to_string(), record);
    }

    fn read(&self, job_id: &str) -> Option<Arc<JobRecord>> {
        self.records.read().get(job_id).cloned()
    }
}

/// Builds a Tail Monitor callback that republishes each percentage into `phase`.
pub fn progress_reporter<S>(
    store: Arc<S>,
    job_id: &str,
    phase: Phase,
) -> impl FnMut(f64) + Send + 'static
where
    S: JobStore + ?Sized + 'static,
{
    let job_id = job_id.to_string();
    move |raw| store.update(&job_id, phase.with_percent(clamp_percent(raw)))
}
