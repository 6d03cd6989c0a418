//! Parallel execution engine.
//!
//! Fans out N independent tasks, each against a subagent of its requested
//! kind, and always returns exactly N results: individual failures land in
//! their result slot instead of aborting the batch. Jobs created here run
//! immediately, outside the queue's concurrency ceiling; callers size their
//! own batches, or pass `limit` to gate the fan-out explicitly.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::info;

use crate::core::jobs::{Dispatcher, JobOptions, JobQueue};
use crate::core::subagents::SubagentRegistry;
use crate::core::tasks::{TaskRunner, TaskSpec};

#[derive(Debug, Clone, Serialize)]
pub struct ParallelResult {
    pub task_id: String,
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub subagent_id: String,
}

pub struct ParallelEngine {
    jobs: Arc<JobQueue>,
    subagents: Arc<SubagentRegistry>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl ParallelEngine {
    pub fn new(
        jobs: Arc<JobQueue>,
        subagents: Arc<SubagentRegistry>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            jobs,
            subagents,
            dispatcher,
        }
    }

    /// Run every task concurrently. `limit: None` keeps the historical
    /// unbounded fan-out; `Some(n)` gates spawned work through a semaphore.
    /// Results come back in task order, one per task, never an `Err`.
    pub async fn run_parallel(
        &self,
        runner: Arc<dyn TaskRunner>,
        tasks: Vec<TaskSpec>,
        limit: Option<usize>,
    ) -> Vec<ParallelResult> {
        let total = tasks.len();
        info!("Fanning out {} parallel task(s) (limit: {:?})", total, limit);
        let gate = limit.map(|n| Arc::new(Semaphore::new(n.max(1))));

        let mut set = JoinSet::new();
        for (index, task) in tasks.into_iter().enumerate() {
            let jobs = self.jobs.clone();
            let subagents = self.subagents.clone();
            let dispatcher = self.dispatcher.clone();
            let runner = runner.clone();
            let gate = gate.clone();
            set.spawn(async move {
                let _permit = match &gate {
                    Some(semaphore) => semaphore.acquire().await.ok(),
                    None => None,
                };
                let result = run_one(&jobs, &subagents, &dispatcher, runner.as_ref(), &task).await;
                (index, result)
            });
        }

        let mut results: Vec<(usize, ParallelResult)> = Vec::with_capacity(total);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(indexed) => results.push(indexed),
                // A panicked task still owes its slot a failure result, but
                // the task id was lost with it; this should not happen since
                // run_one converts runner errors into results.
                Err(e) => tracing::error!("Parallel task panicked: {}", e),
            }
        }
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }
}

async fn run_one(
    jobs: &JobQueue,
    subagents: &SubagentRegistry,
    dispatcher: &Arc<dyn Dispatcher>,
    runner: &dyn TaskRunner,
    task: &TaskSpec,
) -> ParallelResult {
    let subagent = subagents.get_or_create_by_kind(task.subagent_kind).await;
    let job = jobs
        .create_running(
            "parallel_task",
            serde_json::json!({ "task_id": task.id, "description": task.description }),
            JobOptions {
                priority: Some(task.priority),
                max_retries: Some(0),
                subagent_id: Some(subagent.id.clone()),
                ..JobOptions::default()
            },
        )
        .await;

    let start = std::time::Instant::now();
    match runner.run(task, &subagent).await {
        Ok(output) => {
            // The completion drains the queue; anything it promotes belongs
            // to the dispatcher, not to this batch.
            if let Ok((_, started)) = jobs.complete_job(&job.id, output.clone()).await {
                dispatcher.dispatch(started);
            }
            ParallelResult {
                task_id: task.id.clone(),
                success: true,
                result: Some(output),
                error: None,
                execution_time_ms: start.elapsed().as_millis() as u64,
                subagent_id: subagent.id,
            }
        }
        Err(e) => {
            if let Ok((_, started)) = jobs.fail_job(&job.id, &e.to_string()).await {
                dispatcher.dispatch(started);
            }
            ParallelResult {
                task_id: task.id.clone(),
                success: false,
                result: None,
                error: Some(e.to_string()),
                execution_time_ms: start.elapsed().as_millis() as u64,
                subagent_id: subagent.id,
            }
        }
    }
}
