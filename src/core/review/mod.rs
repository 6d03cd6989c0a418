//! Task review pipeline: execute, verify, fix, escalate.
//!
//! Layered on top of job execution. The executor subagent runs the task;
//! if execution itself fails there is nothing to review and the pipeline
//! short-circuits. Otherwise a verifier subagent produces a persisted
//! [`TaskReview`]; while it demands a fix and attempts remain, a fix task
//! runs and its output is re-verified. A verifier that errors out becomes a
//! failing review with one synthetic issue, so verification never crashes
//! the pipeline. Escalation flags the stored review; notifying anyone is the
//! API layer's business.

pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

pub use types::{
    IssueSeverity, ReviewFindings, ReviewIssue, ReviewOptions, ReviewOutcome, ReviewVerdict,
    TaskReview,
};

use crate::core::jobs::{Dispatcher, Job, JobOptions, JobQueue};
use crate::core::now_ms;
use crate::core::subagents::{Subagent, SubagentKind, SubagentRegistry};
use crate::core::tasks::{TaskRunner, TaskSpec};
use crate::store::Store;

#[async_trait]
pub trait Verifier: Send + Sync {
    /// Judge one task's output. An `Err` here is treated as a failing
    /// review, not a pipeline fault.
    async fn verify(
        &self,
        task: &TaskSpec,
        output: &serde_json::Value,
        reviewer: &Subagent,
    ) -> anyhow::Result<ReviewFindings>;
}

pub struct ReviewPipeline {
    jobs: Arc<JobQueue>,
    subagents: Arc<SubagentRegistry>,
    store: Option<Arc<Store>>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl ReviewPipeline {
    pub fn new(
        jobs: Arc<JobQueue>,
        subagents: Arc<SubagentRegistry>,
        store: Option<Arc<Store>>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            jobs,
            subagents,
            store,
            dispatcher,
        }
    }

    /// Queue transitions here drain foreign work too; those jobs go to the
    /// dispatcher, they are not the pipeline's to run.
    async fn settle_job(&self, result: anyhow::Result<(Job, Vec<Job>)>) {
        if let Ok((_, started)) = result {
            self.dispatcher.dispatch(started);
        }
    }

    pub async fn run_with_review(
        &self,
        task: &TaskSpec,
        runner: &dyn TaskRunner,
        verifier: &dyn Verifier,
        options: ReviewOptions,
    ) -> ReviewOutcome {
        let executor = self.subagents.get_or_create_by_kind(SubagentKind::Executor).await;
        let job = self
            .jobs
            .create_running(
                "review_task",
                serde_json::json!({ "task_id": task.id, "description": task.description }),
                JobOptions {
                    priority: Some(task.priority),
                    // Retries here would re-run work the pipeline already
                    // supervises through its own fix loop.
                    max_retries: Some(0),
                    subagent_id: Some(executor.id.clone()),
                    ..JobOptions::default()
                },
            )
            .await;

        // Execution failure short-circuits: nothing to review.
        let mut output = match runner.run(task, &executor).await {
            Ok(output) => {
                self.settle_job(self.jobs.complete_job(&job.id, output.clone()).await)
                    .await;
                output
            }
            Err(e) => {
                warn!("Task [{}] execution failed before review: {}", task.id, e);
                self.settle_job(self.jobs.fail_job(&job.id, &e.to_string()).await)
                    .await;
                let verdict = if options.auto_escalate {
                    ReviewVerdict::Escalated
                } else {
                    ReviewVerdict::Failed
                };
                return ReviewOutcome {
                    job_id: job.id,
                    verdict,
                    fix_attempts: 0,
                    reviews: Vec::new(),
                };
            }
        };

        let reviewer = self.subagents.get_or_create_by_kind(SubagentKind::Verifier).await;
        let mut reviews = Vec::new();
        let mut findings = self.verify_once(task, &output, &reviewer, verifier).await;
        reviews.push(self.record_review(&job.id, &reviewer.id, &findings).await);

        if findings.passed {
            info!("Task [{}] passed review on first verification", task.id);
            return ReviewOutcome {
                job_id: job.id,
                verdict: ReviewVerdict::Success,
                fix_attempts: 0,
                reviews,
            };
        }

        let mut attempts = 0;
        while findings.requires_fix && attempts < options.max_fix_attempts {
            attempts += 1;
            let fix_task = fix_task_for(task, &findings, attempts);
            let fix_executor = self
                .subagents
                .get_or_create_by_kind(SubagentKind::Executor)
                .await;
            let fix_job = self
                .jobs
                .create_running(
                    "review_fix",
                    serde_json::json!({ "task_id": fix_task.id, "attempt": attempts }),
                    JobOptions {
                        priority: Some(task.priority),
                        max_retries: Some(0),
                        subagent_id: Some(fix_executor.id.clone()),
                        ..JobOptions::default()
                    },
                )
                .await;

            match runner.run(&fix_task, &fix_executor).await {
                Ok(fixed_output) => {
                    self.settle_job(self.jobs.complete_job(&fix_job.id, fixed_output.clone()).await)
                        .await;
                    output = fixed_output;
                    findings = self.verify_once(task, &output, &reviewer, verifier).await;
                }
                Err(e) => {
                    warn!("Fix attempt {} for task [{}] failed: {}", attempts, task.id, e);
                    self.settle_job(self.jobs.fail_job(&fix_job.id, &e.to_string()).await)
                        .await;
                    findings = ReviewFindings::failed(vec![ReviewIssue::error(format!(
                        "fix attempt {} failed: {}",
                        attempts, e
                    ))]);
                }
            }
            reviews.push(self.record_review(&job.id, &reviewer.id, &findings).await);
        }

        if findings.passed {
            info!("Task [{}] fixed after {} attempt(s)", task.id, attempts);
            return ReviewOutcome {
                job_id: job.id,
                verdict: ReviewVerdict::Fixed,
                fix_attempts: attempts,
                reviews,
            };
        }

        let verdict = if options.auto_escalate {
            // Escalation is a flag on the stored review, nothing more.
            if let Some(last) = reviews.last_mut() {
                last.escalated = true;
                if let Some(store) = &self.store
                    && let Err(e) = store.upsert_review(last).await
                {
                    warn!("Failed to persist escalation on review [{}]: {}", last.id, e);
                }
            }
            warn!(
                "Task [{}] escalated after {} fix attempt(s)",
                task.id, attempts
            );
            ReviewVerdict::Escalated
        } else {
            ReviewVerdict::Failed
        };
        ReviewOutcome {
            job_id: job.id,
            verdict,
            fix_attempts: attempts,
            reviews,
        }
    }

    async fn verify_once(
        &self,
        task: &TaskSpec,
        output: &serde_json::Value,
        reviewer: &Subagent,
        verifier: &dyn Verifier,
    ) -> ReviewFindings {
        match verifier.verify(task, output, reviewer).await {
            Ok(findings) => findings,
            Err(e) => ReviewFindings::failed(vec![ReviewIssue::error(format!(
                "verification errored: {}",
                e
            ))]),
        }
    }

    async fn record_review(
        &self,
        job_id: &str,
        reviewer_id: &str,
        findings: &ReviewFindings,
    ) -> TaskReview {
        let review = TaskReview {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            reviewer_subagent_id: reviewer_id.to_string(),
            passed: findings.passed,
            issues: findings.issues.clone(),
            suggestions: findings.suggestions.clone(),
            requires_fix: findings.requires_fix,
            escalated: false,
            created_at: now_ms(),
        };
        if let Some(store) = &self.store
            && let Err(e) = store.upsert_review(&review).await
        {
            warn!("Failed to persist review [{}]: {}", review.id, e);
        }
        review
    }
}

/// Derive the fix task: same params, description augmented with what the
/// verifier found.
fn fix_task_for(task: &TaskSpec, findings: &ReviewFindings, attempt: u32) -> TaskSpec {
    let issues = findings
        .issues
        .iter()
        .map(|i| format!("- {}", i.message))
        .collect::<Vec<_>>()
        .join("\n");
    TaskSpec {
        id: format!("{}-fix-{}", task.id, attempt),
        description: format!(
            "Fix the following issues in the previous output:\n{}\n\nOriginal task: {}",
            issues, task.description
        ),
        params: task.params.clone(),
        subagent_kind: SubagentKind::Executor,
        priority: task.priority,
    }
}

#[cfg(test)]
mod tests;
