//! Job queue and scheduler.
//!
//! The queue owns the job table and the state machine; it never executes
//! anything itself. A drain pass runs after every state change: it promotes
//! the highest-weight queued jobs to running up to the `max_concurrent`
//! ceiling and hands the newly started jobs back to the caller, which
//! dispatches them to the cluster or a subagent. Failure below the retry
//! budget silently requeues the job with its last error attached.

pub mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, anyhow, bail};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub use types::{Job, JobOptions, JobPriority, JobStatus, QueueStats, can_transition};

use crate::core::now_ms;
use crate::core::subagents::SubagentRegistry;
use crate::store::Store;

/// Job type used for AI-generation work; these are the jobs the bulk
/// recovery rule requeues when a local inference backend comes back.
pub const JOB_TYPE_AI_GENERATION: &str = "ai_generation";

/// Error marker stamped on AI jobs that failed because no local resource
/// was reachable. Matched verbatim by [`JobQueue::requeue_ai_failures`].
pub const AI_UNAVAILABLE: &str = "no AI resource available";

/// Receives the jobs a drain pass promoted to running. The queue never
/// executes anything itself; every component that triggers a drain must
/// hand the started jobs to a dispatcher or the work sits in `running`
/// forever.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, started: Vec<Job>);
}

pub struct JobQueue {
    jobs: RwLock<HashMap<String, Job>>,
    seq: AtomicU64,
    max_concurrent: usize,
    default_max_retries: u32,
    default_timeout_ms: u64,
    subagents: Arc<SubagentRegistry>,
    store: Option<Arc<Store>>,
}

impl JobQueue {
    pub fn new(
        max_concurrent: usize,
        default_max_retries: u32,
        default_timeout_ms: u64,
        subagents: Arc<SubagentRegistry>,
        store: Option<Arc<Store>>,
    ) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
            max_concurrent: max_concurrent.max(1),
            default_max_retries,
            default_timeout_ms,
            subagents,
            store,
        }
    }

    /// Create a job in `queued` state and run a drain pass. Returns the job
    /// plus any jobs the drain promoted to running (usually including this
    /// one when the ceiling has headroom).
    pub async fn create_job(
        &self,
        job_type: &str,
        params: serde_json::Value,
        options: JobOptions,
    ) -> (Job, Vec<Job>) {
        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            job_type: job_type.to_string(),
            priority: options.priority.unwrap_or(JobPriority::Normal),
            status: JobStatus::Queued,
            progress: 0,
            params,
            result: None,
            error: None,
            retries: 0,
            max_retries: options.max_retries.unwrap_or(self.default_max_retries),
            timeout_ms: options.timeout_ms.unwrap_or(self.default_timeout_ms),
            created_at: now_ms(),
            started_at: None,
            completed_at: None,
            subagent_id: options.subagent_id,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        info!(
            "Job [{}] created: type={} priority={:?}",
            job.id, job.job_type, job.priority
        );
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        self.persist(&job).await;
        let started = self.drain().await;
        (job, started)
    }

    /// Re-admit a job loaded from the store. Running jobs are demoted to
    /// queued: the work they were doing did not survive the crash.
    pub async fn restore_job(&self, mut job: Job) {
        let demoted = job.status == JobStatus::Running;
        if demoted {
            job.status = JobStatus::Queued;
            job.started_at = None;
        }
        job.seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        // The store still says `running`; write the demotion back so the
        // audit trail follows the transition.
        if demoted {
            self.persist(&job).await;
        }
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn list(&self, status: Option<JobStatus>) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut out: Vec<Job> = jobs
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|j| j.seq);
        out
    }

    pub async fn stats(&self) -> QueueStats {
        let jobs = self.jobs.read().await;
        let mut stats = QueueStats {
            max_concurrent: self.max_concurrent,
            ..QueueStats::default()
        };
        for job in jobs.values() {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Promote queued jobs to running until the concurrency ceiling is hit.
    /// Highest priority weight first, FIFO within a tier. Returns the jobs
    /// that just started so the caller can dispatch them.
    pub async fn drain(&self) -> Vec<Job> {
        let mut started = Vec::new();
        {
            let mut jobs = self.jobs.write().await;
            let running = jobs
                .values()
                .filter(|j| j.status == JobStatus::Running)
                .count();
            let available = self.max_concurrent.saturating_sub(running);
            if available == 0 {
                return started;
            }
            let mut queued: Vec<String> = jobs
                .values()
                .filter(|j| j.status == JobStatus::Queued)
                .map(|j| j.id.clone())
                .collect();
            queued.sort_by(|a, b| {
                let ja = &jobs[a];
                let jb = &jobs[b];
                jb.priority
                    .weight()
                    .cmp(&ja.priority.weight())
                    .then(ja.seq.cmp(&jb.seq))
            });
            for id in queued.into_iter().take(available) {
                let Some(job) = jobs.get_mut(&id) else { continue };
                job.status = JobStatus::Running;
                job.started_at = Some(now_ms());
                debug!("Job [{}] running", job.id);
                started.push(job.clone());
            }
        }
        for job in &started {
            if let Some(subagent_id) = &job.subagent_id {
                self.subagents.on_job_started(subagent_id).await;
            }
            self.persist(job).await;
        }
        started
    }

    /// Mark a running job completed. Returns newly started jobs from the
    /// follow-up drain pass.
    pub async fn complete_job(
        &self,
        id: &str,
        result: serde_json::Value,
    ) -> Result<(Job, Vec<Job>)> {
        let job = {
            let mut jobs = self.jobs.write().await;
            let job = jobs.get_mut(id).ok_or_else(|| anyhow!("unknown job [{}]", id))?;
            if !can_transition(job.status, JobStatus::Completed) {
                bail!("job [{}] is {}, cannot complete", id, job.status.as_str());
            }
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.result = Some(result);
            job.error = None;
            job.completed_at = Some(now_ms());
            job.clone()
        };
        info!("Job [{}] completed", id);
        self.settle(&job, true).await;
        let started = self.drain().await;
        Ok((job, started))
    }

    /// Mark a running job failed. Below the retry budget the job is
    /// silently requeued carrying the error; otherwise it is failed for
    /// good and stamped with a completion time.
    pub async fn fail_job(&self, id: &str, error: &str) -> Result<(Job, Vec<Job>)> {
        let (job, requeued) = {
            let mut jobs = self.jobs.write().await;
            let job = jobs.get_mut(id).ok_or_else(|| anyhow!("unknown job [{}]", id))?;
            if !can_transition(job.status, JobStatus::Failed) {
                bail!("job [{}] is {}, cannot fail", id, job.status.as_str());
            }
            job.error = Some(error.to_string());
            if job.retries < job.max_retries {
                job.retries += 1;
                job.status = JobStatus::Queued;
                job.started_at = None;
                (job.clone(), true)
            } else {
                job.status = JobStatus::Failed;
                job.completed_at = Some(now_ms());
                (job.clone(), false)
            }
        };
        if requeued {
            warn!(
                "Job [{}] failed (retry {}/{}): {}",
                id, job.retries, job.max_retries, error
            );
        } else {
            warn!("Job [{}] permanently failed: {}", id, error);
        }
        self.settle(&job, false).await;
        let started = self.drain().await;
        Ok((job, started))
    }

    /// Cancel a queued job. Running jobs finish; there is no preemption.
    pub async fn cancel_job(&self, id: &str) -> Result<Job> {
        let job = {
            let mut jobs = self.jobs.write().await;
            let job = jobs.get_mut(id).ok_or_else(|| anyhow!("unknown job [{}]", id))?;
            if job.status != JobStatus::Queued {
                bail!("job [{}] is {}, only queued jobs cancel", id, job.status.as_str());
            }
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(now_ms());
            job.clone()
        };
        info!("Job [{}] cancelled", id);
        self.persist(&job).await;
        Ok(job)
    }

    /// Explicitly retry a failed job: back to queued, retry counter given
    /// back. Only valid while the budget is not exhausted.
    pub async fn retry_job(&self, id: &str) -> Result<(Job, Vec<Job>)> {
        let job = {
            let mut jobs = self.jobs.write().await;
            let job = jobs.get_mut(id).ok_or_else(|| anyhow!("unknown job [{}]", id))?;
            if job.status != JobStatus::Failed {
                bail!("job [{}] is {}, only failed jobs retry", id, job.status.as_str());
            }
            // Giving back one retry puts the job under its budget again; a
            // job with no budget at all (max_retries = 0) stays failed.
            if job.retries == 0 && job.max_retries == 0 {
                bail!("job [{}] has no retry budget", id);
            }
            job.status = JobStatus::Queued;
            job.retries = job.retries.saturating_sub(1);
            job.started_at = None;
            job.completed_at = None;
            job.clone()
        };
        info!("Job [{}] requeued by explicit retry", id);
        self.persist(&job).await;
        let started = self.drain().await;
        Ok((job, started))
    }

    /// Clamped progress update; meaningful only while running.
    pub async fn update_progress(&self, id: &str, progress: u8) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id).ok_or_else(|| anyhow!("unknown job [{}]", id))?;
        if job.status != JobStatus::Running {
            bail!("job [{}] is not running", id);
        }
        job.progress = progress.min(100);
        Ok(())
    }

    /// Stop cascade: cancel every queued or running job attached to the
    /// subagent. Running jobs lose their worker, so the cascade is the one
    /// path that cancels them.
    pub async fn cancel_for_subagent(&self, subagent_id: &str) -> Vec<Job> {
        let mut cancelled = Vec::new();
        let mut was_running = 0;
        {
            let mut jobs = self.jobs.write().await;
            for job in jobs.values_mut() {
                if job.subagent_id.as_deref() == Some(subagent_id)
                    && matches!(job.status, JobStatus::Queued | JobStatus::Running)
                {
                    if job.status == JobStatus::Running {
                        was_running += 1;
                    }
                    job.status = JobStatus::Cancelled;
                    job.completed_at = Some(now_ms());
                    cancelled.push(job.clone());
                }
            }
        }
        // Counter settlement crosses into the subagent registry; the job
        // table lock is released first, as everywhere else in this file.
        for _ in 0..was_running {
            self.subagents.on_job_finished(subagent_id, false).await;
        }
        for job in &cancelled {
            info!("Job [{}] cancelled by subagent [{}] stop", job.id, subagent_id);
            self.persist(job).await;
        }
        cancelled
    }

    /// Recovery rule: when a local AI backend comes back from offline,
    /// requeue the AI-generation jobs that permanently failed for lack of
    /// one. Their retry counters start over.
    pub async fn requeue_ai_failures(&self) -> Vec<Job> {
        let mut requeued = Vec::new();
        {
            let mut jobs = self.jobs.write().await;
            for job in jobs.values_mut() {
                let ai_outage = job.status == JobStatus::Failed
                    && job.job_type == JOB_TYPE_AI_GENERATION
                    && job.error.as_deref().is_some_and(|e| e.contains(AI_UNAVAILABLE));
                if ai_outage {
                    job.status = JobStatus::Queued;
                    job.retries = 0;
                    job.started_at = None;
                    job.completed_at = None;
                    requeued.push(job.clone());
                }
            }
        }
        if !requeued.is_empty() {
            info!(
                "Requeued {} AI-generation jobs after backend recovery",
                requeued.len()
            );
            for job in &requeued {
                self.persist(job).await;
            }
        }
        requeued
    }

    /// Create a job that starts running immediately, ignoring the
    /// concurrency ceiling. Used by the parallel engine and the review
    /// pipeline, whose callers size their own batches.
    pub async fn create_running(
        &self,
        job_type: &str,
        params: serde_json::Value,
        options: JobOptions,
    ) -> Job {
        let now = now_ms();
        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            job_type: job_type.to_string(),
            priority: options.priority.unwrap_or(JobPriority::Normal),
            status: JobStatus::Running,
            progress: 0,
            params,
            result: None,
            error: None,
            retries: 0,
            max_retries: options.max_retries.unwrap_or(self.default_max_retries),
            timeout_ms: options.timeout_ms.unwrap_or(self.default_timeout_ms),
            created_at: now,
            started_at: Some(now),
            completed_at: None,
            subagent_id: options.subagent_id,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        debug!("Job [{}] created running: type={}", job.id, job.job_type);
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        if let Some(subagent_id) = &job.subagent_id {
            self.subagents.on_job_started(subagent_id).await;
        }
        self.persist(&job).await;
        job
    }

    /// Update subagent bookkeeping for a finished job and persist it.
    async fn settle(&self, job: &Job, success: bool) {
        if job.status.is_terminal() || job.status == JobStatus::Queued {
            if let Some(subagent_id) = &job.subagent_id {
                self.subagents.on_job_finished(subagent_id, success).await;
            }
        }
        self.persist(job).await;
    }

    /// Best effort: the queue must keep working with the store absent.
    async fn persist(&self, job: &Job) {
        if let Some(store) = &self.store {
            if let Err(e) = store.upsert_job(job).await {
                warn!("Failed to persist job [{}]: {}", job.id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests;
