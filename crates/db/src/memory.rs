//! In-process [`JobStore`] for tests and database-less runs.
//!
//! Mirrors the Postgres statements' semantics: `trace_id` is only set
//! once, `completed_at` is stamped on the first terminal write, and
//! update calls report whether a row matched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use delve_core::types::JobId;
use sqlx::types::Json;
use tokio::sync::RwLock;

use crate::models::job::{Job, JobListQuery, JobPage, NewJob, TerminalUpdate};
use crate::models::status::JobStatus;
use crate::store::{JobStore, StoreError};

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    /// Every status written per job, in write order.
    history: HashMap<JobId, Vec<JobStatus>>,
}

/// Thread-safe in-memory job table.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
    failing_writes: AtomicUsize,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` write calls fail with
    /// [`StoreError::Unavailable`]. Reads are unaffected.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Statuses written for `job_id`, oldest first.
    pub async fn status_history(&self, job_id: JobId) -> Vec<JobStatus> {
        self.inner
            .read()
            .await
            .history
            .get(&job_id)
            .cloned()
            .unwrap_or_default()
    }

    fn check_write(&self) -> Result<(), StoreError> {
        let remaining = self.failing_writes.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok(());
        }
        self.failing_writes.store(remaining - 1, Ordering::SeqCst);
        Err(StoreError::Unavailable("injected write failure".into()))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, input: &NewJob) -> Result<Job, StoreError> {
        self.check_write()?;
        let now = Utc::now();
        let job = Job {
            job_id: JobId::new_v4(),
            trace_id: None,
            query: input.query.clone(),
            summary_format: input.summary_format,
            selected_agents: input.selected_agents.clone().map(Json),
            status: JobStatus::Pending,
            progress: Some("Job created, waiting to start...".into()),
            result: None,
            research_data: None,
            error: None,
            logs: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let mut inner = self.inner.write().await;
        inner.history.insert(job.job_id, vec![JobStatus::Pending]);
        inner.jobs.insert(job.job_id, job.clone());
        Ok(job)
    }

    async fn find(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.inner.read().await.jobs.get(&job_id).cloned())
    }

    async fn list(&self, query: &JobListQuery) -> Result<JobPage, StoreError> {
        let inner = self.inner.read().await;
        let mut matching: Vec<&Job> = inner
            .jobs
            .values()
            .filter(|job| query.status.map_or(true, |s| job.status == s))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let jobs = matching
            .iter()
            .skip(query.offset() as usize)
            .take(query.page_size() as usize)
            .map(|job| (*job).clone())
            .collect();

        Ok(JobPage {
            jobs,
            total: matching.len() as i64,
            page: query.page(),
            page_size: query.page_size(),
        })
    }

    async fn mark_running(
        &self,
        job_id: JobId,
        progress: &str,
        trace_id: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        job.status = JobStatus::Running;
        job.progress = Some(progress.to_string());
        if job.trace_id.is_none() {
            job.trace_id = trace_id.map(str::to_string);
        }
        job.updated_at = Utc::now();
        inner.history.entry(job_id).or_default().push(JobStatus::Running);
        Ok(true)
    }

    async fn update_progress(&self, job_id: JobId, progress: &str) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        job.progress = Some(progress.to_string());
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn finish(&self, job_id: JobId, update: &TerminalUpdate) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        let now = Utc::now();
        job.status = update.status;
        job.progress = Some(update.progress.clone());
        if update.result.is_some() {
            job.result = update.result.clone();
        }
        if update.research_data.is_some() {
            job.research_data = update.research_data.clone();
        }
        job.error = update.error.clone();
        job.logs = Some(Json(update.logs.clone()));
        job.completed_at.get_or_insert(now);
        job.updated_at = now;
        inner.history.entry(job_id).or_default().push(update.status);
        Ok(true)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
