mod pipeline;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::core::jobs::{Dispatcher, Job, JobQueue};
use crate::core::review::{ReviewFindings, ReviewIssue, ReviewPipeline, Verifier};
use crate::core::subagents::{Subagent, SubagentRegistry};
use crate::core::tasks::{TaskRunner, TaskSpec};
use crate::store::Store;

/// Collects whatever drain passes hand over for execution.
#[derive(Default)]
pub(crate) struct RecordingDispatcher {
    pub(crate) started: std::sync::Mutex<Vec<Job>>,
}

impl Dispatcher for RecordingDispatcher {
    fn dispatch(&self, started: Vec<Job>) {
        self.started.lock().unwrap().extend(started);
    }
}

pub(crate) fn pipeline_with(
    max_concurrent: usize,
    store: Option<Arc<Store>>,
) -> (ReviewPipeline, Arc<JobQueue>, Arc<RecordingDispatcher>) {
    let subagents = Arc::new(SubagentRegistry::new(None));
    let jobs = Arc::new(JobQueue::new(max_concurrent, 2, 30_000, subagents.clone(), None));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    (
        ReviewPipeline::new(jobs.clone(), subagents, store, dispatcher.clone()),
        jobs,
        dispatcher,
    )
}

pub(crate) fn pipeline() -> (ReviewPipeline, Arc<JobQueue>) {
    let (pipeline, jobs, _) = pipeline_with(4, None);
    (pipeline, jobs)
}

/// Runner whose nth call is scripted: `Ok(output)` or `Err`.
pub(crate) struct ScriptedRunner {
    outcomes: Vec<anyhow::Result<serde_json::Value>>,
    calls: AtomicUsize,
}

impl ScriptedRunner {
    pub(crate) fn new(outcomes: Vec<anyhow::Result<serde_json::Value>>) -> Self {
        Self {
            outcomes,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskRunner for ScriptedRunner {
    async fn run(&self, _task: &TaskSpec, _subagent: &Subagent) -> anyhow::Result<serde_json::Value> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.get(n) {
            Some(Ok(v)) => Ok(v.clone()),
            Some(Err(e)) => Err(anyhow::anyhow!("{e}")),
            None => Ok(serde_json::json!({ "call": n })),
        }
    }
}

/// Verifier that fails the first `fail_first` passes and then approves.
pub(crate) struct CountingVerifier {
    fail_first: usize,
    calls: AtomicUsize,
}

impl CountingVerifier {
    pub(crate) fn new(fail_first: usize) -> Self {
        Self {
            fail_first,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Verifier for CountingVerifier {
    async fn verify(
        &self,
        _task: &TaskSpec,
        _output: &serde_json::Value,
        _reviewer: &Subagent,
    ) -> anyhow::Result<ReviewFindings> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            Ok(ReviewFindings::failed(vec![ReviewIssue::error(format!(
                "issue on pass {n}"
            ))]))
        } else {
            Ok(ReviewFindings::passed())
        }
    }
}

/// Verifier that errors out instead of reporting findings.
pub(crate) struct CrashingVerifier;

#[async_trait]
impl Verifier for CrashingVerifier {
    async fn verify(
        &self,
        _task: &TaskSpec,
        _output: &serde_json::Value,
        _reviewer: &Subagent,
    ) -> anyhow::Result<ReviewFindings> {
        anyhow::bail!("reviewer model unreachable")
    }
}
