//! Job registry polled by clients while grading jobs run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use uuid::Uuid;

use crate::service::GradeReport;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

/// Externally visible state of one job. Serializes to the `/progress` body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub progress: u8,
    pub status: JobStatus,
    pub result: Option<GradeReport>,
    pub error: Option<String>,
    #[serde(skip)]
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    fn new() -> Self {
        Self {
            progress: 0,
            status: JobStatus::Processing,
            result: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Receives fractional progress (0.0 to 1.0) from a long-running step.
pub trait ProgressSink {
    fn report(&self, fraction: f32);
}

impl<F: Fn(f32)> ProgressSink for F {
    fn report(&self, fraction: f32) {
        self(fraction)
    }
}

/// Sink that drops every report.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _fraction: f32) {}
}

/// Concurrent map of job id to snapshot.
///
/// Entries are sharded, so polls of different jobs do not contend on one
/// lock. A completed job is handed out once and then forgotten; processing
/// and failed jobs stay readable until swept.
#[derive(Debug, Default)]
pub struct ProgressStore {
    jobs: DashMap<JobId, JobSnapshot>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, id: JobId) {
        self.jobs.insert(id, JobSnapshot::new());
    }

    /// Raise the progress of a running job. Lower values and updates to
    /// finished jobs are ignored.
    pub fn update(&self, id: &JobId, progress: u8) {
        if let Some(mut job) = self.jobs.get_mut(id) {
            if job.status == JobStatus::Processing && progress > job.progress {
                job.progress = progress.min(100);
                job.touch();
            }
        }
    }

    pub fn complete(&self, id: &JobId, report: GradeReport) {
        if let Some(mut job) = self.jobs.get_mut(id) {
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.result = Some(report);
            job.error = None;
            job.touch();
        }
    }

    /// Mark a job failed. Progress stays where the job stopped.
    pub fn fail(&self, id: &JobId, message: impl Into<String>) {
        if let Some(mut job) = self.jobs.get_mut(id) {
            job.status = JobStatus::Error;
            job.error = Some(message.into());
            job.touch();
        }
    }

    /// Current snapshot of a job. Reading a completed job removes it, so its
    /// result is delivered at most once.
    pub fn read(&self, id: &JobId) -> Option<JobSnapshot> {
        match self.jobs.entry(*id) {
            Entry::Occupied(entry) if entry.get().status == JobStatus::Completed => {
                Some(entry.remove())
            }
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Drop terminal jobs whose last update is older than `ttl`. Running jobs
    /// are never evicted. Returns the number of removed entries.
    pub fn evict_expired(&self, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = Utc::now() - ttl;
        let before = self.jobs.len();
        self.jobs
            .retain(|_, job| !(job.status.is_terminal() && job.updated_at <= cutoff));
        before.saturating_sub(self.jobs.len())
    }
}
