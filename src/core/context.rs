//! The orchestrator context: one object owning every registry.
//!
//! There are no module-level singleton tables anywhere in this crate; all
//! shared state hangs off an `Orchestrator`, constructed per process and
//! cheap to clone, so tests can run any number of isolated instances.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::FleetConfig;
use crate::core::ai::{AiResourceRegistry, HttpProber, ResourceProber, StatusTransition};
use crate::core::cluster::{ClusterRegistry, NodeAction, UdpWolSender, WolSender};
use crate::core::jobs::{
    AI_UNAVAILABLE, Dispatcher, JOB_TYPE_AI_GENERATION, Job, JobQueue, JobStatus,
};
use crate::core::parallel::{ParallelEngine, ParallelResult};
use crate::core::review::{ReviewOptions, ReviewOutcome, ReviewPipeline, Verifier};
use crate::core::subagents::SubagentRegistry;
use crate::core::tasks::{TaskRunner, TaskSpec};
use crate::store::Store;

/// Job type whose started instances the orchestrator dispatches to the
/// cluster itself. Params: `capability`, `action`, `params`, and optional
/// `wake_if_sleeping`.
pub const JOB_TYPE_NODE_ACTION: &str = "node_action";

#[derive(Clone)]
pub struct Orchestrator {
    pub jobs: Arc<JobQueue>,
    pub cluster: Arc<ClusterRegistry>,
    pub subagents: Arc<SubagentRegistry>,
    pub ai: Arc<AiResourceRegistry>,
    pub store: Option<Arc<Store>>,
    prober: Arc<dyn ResourceProber>,
}

impl Orchestrator {
    /// Build from configuration with the default collaborators: ssh/agent
    /// transports per node kind, direct UDP WoL, HTTP resource probing.
    pub async fn from_config(config: &FleetConfig, store: Option<Arc<Store>>) -> Result<Self> {
        let orchestrator = Self::with_collaborators(
            config,
            store,
            Arc::new(UdpWolSender),
            Arc::new(HttpProber::new()),
        );
        orchestrator
            .cluster
            .register_nodes(&config.nodes, &config.capabilities)
            .await?;
        orchestrator.ai.register(&config.ai_resources).await;
        Ok(orchestrator)
    }

    /// Construction seam for tests: collaborators injected, no nodes
    /// registered yet.
    pub fn with_collaborators(
        config: &FleetConfig,
        store: Option<Arc<Store>>,
        waker: Arc<dyn WolSender>,
        prober: Arc<dyn ResourceProber>,
    ) -> Self {
        let subagents = Arc::new(SubagentRegistry::new(store.clone()));
        let jobs = Arc::new(JobQueue::new(
            config.scheduler.max_concurrent,
            config.scheduler.default_max_retries,
            config.scheduler.default_timeout_ms,
            subagents.clone(),
            store.clone(),
        ));
        Self {
            jobs,
            cluster: Arc::new(ClusterRegistry::new(waker)),
            subagents,
            ai: Arc::new(AiResourceRegistry::new()),
            store,
            prober,
        }
    }

    /// Reload queued/running jobs and still-active subagents from the
    /// store. Running jobs come back queued: their work died with the
    /// previous process. A missing store makes this a no-op.
    pub async fn recover(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        for subagent in store.load_active_subagents().await? {
            self.subagents.restore(subagent).await;
        }
        let jobs = store.load_recoverable_jobs().await?;
        let count = jobs.len();
        for job in jobs {
            self.jobs.restore_job(job).await;
        }
        if count > 0 {
            info!("Recovered {} job(s) from the store", count);
            let started = self.jobs.drain().await;
            self.dispatch(started);
        }
        Ok(count)
    }

    /// Create a job and dispatch whatever the drain pass started.
    pub async fn submit_job(
        &self,
        job_type: &str,
        params: serde_json::Value,
        options: crate::core::jobs::JobOptions,
    ) -> Job {
        let (job, started) = self.jobs.create_job(job_type, params, options).await;
        self.dispatch(started);
        job
    }

    pub async fn complete_job(&self, id: &str, result: serde_json::Value) -> Result<Job> {
        let (job, started) = self.jobs.complete_job(id, result).await?;
        self.dispatch(started);
        Ok(job)
    }

    pub async fn fail_job(&self, id: &str, error: &str) -> Result<Job> {
        let (job, started) = self.jobs.fail_job(id, error).await?;
        self.dispatch(started);
        Ok(job)
    }

    pub async fn cancel_job(&self, id: &str) -> Result<Job> {
        self.jobs.cancel_job(id).await
    }

    pub async fn retry_job(&self, id: &str) -> Result<Job> {
        let (job, started) = self.jobs.retry_job(id).await?;
        self.dispatch(started);
        Ok(job)
    }

    /// Stop a subagent and cancel every queued or running job still
    /// attached to it.
    pub async fn stop_subagent(&self, id: &str) -> Result<usize> {
        self.subagents.mark_stopped(id).await?;
        let cancelled = self.jobs.cancel_for_subagent(id).await;
        let started = self.jobs.drain().await;
        self.dispatch(started);
        Ok(cancelled.len())
    }

    /// Re-probe AI resources; a local backend coming back from offline
    /// requeues the AI-generation jobs that failed during the outage.
    pub async fn refresh_ai_resources(&self) -> Vec<StatusTransition> {
        let transitions = self.ai.refresh_status(self.prober.clone()).await;
        if transitions.iter().any(|t| t.is_local_recovery()) {
            let requeued = self.jobs.requeue_ai_failures().await;
            if !requeued.is_empty() {
                let started = self.jobs.drain().await;
                self.dispatch(started);
            }
        }
        transitions
    }

    pub fn review_pipeline(&self) -> ReviewPipeline {
        ReviewPipeline::new(
            self.jobs.clone(),
            self.subagents.clone(),
            self.store.clone(),
            Arc::new(self.clone()),
        )
    }

    pub async fn run_with_review(
        &self,
        task: &TaskSpec,
        runner: &dyn TaskRunner,
        verifier: &dyn Verifier,
        options: ReviewOptions,
    ) -> ReviewOutcome {
        self.review_pipeline()
            .run_with_review(task, runner, verifier, options)
            .await
    }

    pub async fn run_parallel(
        &self,
        runner: Arc<dyn TaskRunner>,
        tasks: Vec<TaskSpec>,
        limit: Option<usize>,
    ) -> Vec<ParallelResult> {
        ParallelEngine::new(self.jobs.clone(), self.subagents.clone(), Arc::new(self.clone()))
            .run_parallel(runner, tasks, limit)
            .await
    }

    async fn execute_node_job(&self, job: Job) {
        let capability = job
            .params
            .get("capability")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let action = job
            .params
            .get("action")
            .and_then(|v| serde_json::from_value::<NodeAction>(v.clone()).ok());
        let Some(action) = action else {
            let _ = self.fail_job(&job.id, "node_action job has no valid action").await;
            return;
        };
        let params = job.params.get("params").cloned().unwrap_or(serde_json::Value::Null);
        let wake = job
            .params
            .get("wake_if_sleeping")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(job.timeout_ms),
            self.cluster.route_and_execute(&capability, action, &params, wake),
        )
        .await;
        match outcome {
            Ok(outcome) if outcome.success => {
                let result = serde_json::to_value(&outcome).unwrap_or_default();
                let _ = self.complete_job(&job.id, result).await;
            }
            Ok(outcome) => {
                let error = outcome.error.unwrap_or_else(|| "execution failed".to_string());
                let _ = self.fail_job(&job.id, &error).await;
            }
            Err(_) => {
                warn!("Job [{}] timed out after {}ms", job.id, job.timeout_ms);
                let _ = self
                    .fail_job(&job.id, &format!("timed out after {}ms", job.timeout_ms))
                    .await;
            }
        }
    }

    async fn resolve_ai_job(&self, job: Job) {
        let capability = job
            .params
            .get("capability")
            .and_then(|v| v.as_str())
            .unwrap_or("text-generation")
            .to_string();
        let prefer_local = match &job.subagent_id {
            Some(id) => self
                .subagents
                .get(id)
                .await
                .map(|s| s.prefer_local_ai)
                .unwrap_or(false),
            None => false,
        };
        match self.ai.select_best(&capability, prefer_local).await {
            Some(resource) => {
                let _ = self
                    .jobs
                    .update_progress(&job.id, 10)
                    .await
                    .map_err(|e| warn!("{}", e));
                info!(
                    "Job [{}] resolved AI resource [{}]",
                    job.id, resource.id
                );
                // The inference collaborator picks the job up from here and
                // completes or fails it through the job API.
            }
            None => {
                let _ = self.fail_job(&job.id, AI_UNAVAILABLE).await;
            }
        }
    }

    pub async fn queue_stats(&self) -> crate::core::jobs::QueueStats {
        self.jobs.stats().await
    }

    pub async fn list_jobs(&self, status: Option<JobStatus>) -> Vec<Job> {
        self.jobs.list(status).await
    }
}

impl Dispatcher for Orchestrator {
    /// Execute the jobs a drain pass just promoted. Node actions route to
    /// the cluster; AI-generation jobs resolve a resource (selection only,
    /// inference belongs to a collaborator, which completes the job through
    /// the API). Anything else is owned by whoever submitted it.
    fn dispatch(&self, started: Vec<Job>) {
        for job in started {
            match job.job_type.as_str() {
                JOB_TYPE_NODE_ACTION => {
                    let orchestrator = self.clone();
                    tokio::spawn(async move {
                        orchestrator.execute_node_job(job).await;
                    });
                }
                JOB_TYPE_AI_GENERATION => {
                    let orchestrator = self.clone();
                    tokio::spawn(async move {
                        orchestrator.resolve_ai_job(job).await;
                    });
                }
                _ => {}
            }
        }
    }
}
