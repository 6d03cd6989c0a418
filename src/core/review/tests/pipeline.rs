use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::json;

use super::{CountingVerifier, CrashingVerifier, ScriptedRunner, pipeline, pipeline_with};
use crate::core::jobs::{JobOptions, JobQueue, JobStatus};
use crate::core::review::{ReviewOptions, ReviewVerdict};
use crate::core::subagents::{Subagent, SubagentKind};
use crate::core::tasks::{TaskRunner, TaskSpec};
use crate::store::Store;

fn task() -> TaskSpec {
    TaskSpec::new("deploy-web", "deploy the web service", SubagentKind::Executor)
}

#[tokio::test]
async fn passes_on_first_verification() {
    let (pipeline, jobs) = pipeline();
    let runner = ScriptedRunner::new(vec![Ok(json!({ "deployed": true }))]);
    let verifier = CountingVerifier::new(0);

    let outcome = pipeline
        .run_with_review(&task(), &runner, &verifier, ReviewOptions::default())
        .await;

    assert_eq!(outcome.verdict, ReviewVerdict::Success);
    assert_eq!(outcome.fix_attempts, 0);
    assert_eq!(outcome.reviews.len(), 1);
    assert!(outcome.reviews[0].passed);
    assert_eq!(runner.calls(), 1);

    let job = jobs.get(&outcome.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn fixed_after_one_attempt() {
    let (pipeline, _jobs) = pipeline();
    let runner = ScriptedRunner::new(vec![Ok(json!({ "v": 1 })), Ok(json!({ "v": 2 }))]);
    let verifier = CountingVerifier::new(1);

    let outcome = pipeline
        .run_with_review(&task(), &runner, &verifier, ReviewOptions::default())
        .await;

    assert_eq!(outcome.verdict, ReviewVerdict::Fixed);
    assert_eq!(outcome.fix_attempts, 1);
    // Initial review plus one after the fix.
    assert_eq!(outcome.reviews.len(), 2);
    assert!(!outcome.reviews[0].passed);
    assert!(outcome.reviews[1].passed);
    assert_eq!(runner.calls(), 2);
    assert_eq!(verifier.calls(), 2);
}

#[tokio::test]
async fn escalates_when_attempts_exhausted() {
    let (pipeline, _jobs) = pipeline();
    let runner = ScriptedRunner::new(vec![]);
    // Never passes within the default two fix attempts.
    let verifier = CountingVerifier::new(10);

    let outcome = pipeline
        .run_with_review(&task(), &runner, &verifier, ReviewOptions::default())
        .await;

    assert_eq!(outcome.verdict, ReviewVerdict::Escalated);
    assert_eq!(outcome.fix_attempts, 2);
    assert_eq!(outcome.reviews.len(), 3);
    assert!(outcome.reviews.last().unwrap().escalated);
    // Earlier reviews stay unflagged.
    assert!(!outcome.reviews[0].escalated);
}

#[tokio::test]
async fn fails_without_escalation_when_disabled() {
    let (pipeline, _jobs) = pipeline();
    let runner = ScriptedRunner::new(vec![]);
    let verifier = CountingVerifier::new(10);

    let outcome = pipeline
        .run_with_review(
            &task(),
            &runner,
            &verifier,
            ReviewOptions {
                max_fix_attempts: 1,
                auto_escalate: false,
            },
        )
        .await;

    assert_eq!(outcome.verdict, ReviewVerdict::Failed);
    assert_eq!(outcome.fix_attempts, 1);
    assert!(outcome.reviews.iter().all(|r| !r.escalated));
}

#[tokio::test]
async fn execution_failure_short_circuits() {
    let (pipeline, jobs) = pipeline();
    let runner = ScriptedRunner::new(vec![Err(anyhow!("ssh: connection refused"))]);
    let verifier = CountingVerifier::new(0);

    let outcome = pipeline
        .run_with_review(&task(), &runner, &verifier, ReviewOptions::default())
        .await;

    assert_eq!(outcome.verdict, ReviewVerdict::Escalated);
    assert_eq!(outcome.fix_attempts, 0);
    assert!(outcome.reviews.is_empty());
    assert_eq!(verifier.calls(), 0);

    let job = jobs.get(&outcome.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("connection refused"));
}

#[tokio::test]
async fn verifier_error_becomes_failing_review() {
    let (pipeline, _jobs) = pipeline();
    let runner = ScriptedRunner::new(vec![]);

    let outcome = pipeline
        .run_with_review(
            &task(),
            &runner,
            &CrashingVerifier,
            ReviewOptions {
                max_fix_attempts: 0,
                auto_escalate: true,
            },
        )
        .await;

    assert_eq!(outcome.verdict, ReviewVerdict::Escalated);
    assert_eq!(outcome.reviews.len(), 1);
    let review = &outcome.reviews[0];
    assert!(!review.passed);
    assert!(review.issues[0].message.contains("verification errored"));
}

/// Enqueues an unrelated job mid-execution, while the review task holds
/// the queue's only running slot.
struct EnqueueingRunner {
    jobs: Arc<JobQueue>,
    queued: std::sync::Mutex<Option<String>>,
}

#[async_trait]
impl TaskRunner for EnqueueingRunner {
    async fn run(
        &self,
        _task: &TaskSpec,
        _subagent: &Subagent,
    ) -> anyhow::Result<serde_json::Value> {
        let (job, started) = self
            .jobs
            .create_job("node_action", json!({}), JobOptions::default())
            .await;
        assert!(started.is_empty(), "the review task holds the only slot");
        *self.queued.lock().unwrap() = Some(job.id);
        Ok(json!({ "deployed": true }))
    }
}

#[tokio::test]
async fn work_admitted_mid_review_reaches_the_dispatcher() {
    let (pipeline, jobs, dispatcher) = pipeline_with(1, None);
    let runner = EnqueueingRunner {
        jobs: jobs.clone(),
        queued: std::sync::Mutex::new(None),
    };
    let verifier = CountingVerifier::new(0);

    let outcome = pipeline
        .run_with_review(&task(), &runner, &verifier, ReviewOptions::default())
        .await;
    assert_eq!(outcome.verdict, ReviewVerdict::Success);

    // Completing the review task drained the queue; the promoted job was
    // handed over for execution instead of being dropped.
    let queued_id = runner.queued.lock().unwrap().clone().unwrap();
    let dispatched = dispatcher.started.lock().unwrap().clone();
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].id, queued_id);
    assert_eq!(jobs.get(&queued_id).await.unwrap().status, JobStatus::Running);
}

#[tokio::test]
async fn reviews_and_escalation_flag_persist_to_the_store() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let (pipeline, _jobs, _) = pipeline_with(4, Some(store.clone()));
    let runner = ScriptedRunner::new(vec![]);
    let verifier = CountingVerifier::new(10);

    let outcome = pipeline
        .run_with_review(
            &task(),
            &runner,
            &verifier,
            ReviewOptions {
                max_fix_attempts: 1,
                auto_escalate: true,
            },
        )
        .await;
    assert_eq!(outcome.verdict, ReviewVerdict::Escalated);

    // One stored row per verification pass; the escalation flag lands as
    // an upsert on the last one, not an extra row.
    let stored = store.list_reviews_for_job(&outcome.job_id).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|r| !r.passed));
    assert_eq!(stored.iter().filter(|r| r.escalated).count(), 1);
    let flagged = stored.iter().find(|r| r.escalated).unwrap();
    assert_eq!(flagged.id, outcome.reviews.last().unwrap().id);
}

#[tokio::test]
async fn failed_fix_attempt_counts_and_is_reviewed() {
    let (pipeline, jobs) = pipeline();
    // Execution succeeds, the single fix attempt errors out.
    let runner = ScriptedRunner::new(vec![
        Ok(json!({ "v": 1 })),
        Err(anyhow!("fix runner crashed")),
    ]);
    let verifier = CountingVerifier::new(10);

    let outcome = pipeline
        .run_with_review(
            &task(),
            &runner,
            &verifier,
            ReviewOptions {
                max_fix_attempts: 1,
                auto_escalate: true,
            },
        )
        .await;

    assert_eq!(outcome.verdict, ReviewVerdict::Escalated);
    assert_eq!(outcome.fix_attempts, 1);
    assert_eq!(outcome.reviews.len(), 2);
    assert!(
        outcome.reviews[1]
            .issues
            .iter()
            .any(|i| i.message.contains("fix attempt 1 failed"))
    );
    // One review_task job and one failed review_fix job exist.
    let failed = jobs.list(Some(JobStatus::Failed)).await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].job_type, "review_fix");
}
