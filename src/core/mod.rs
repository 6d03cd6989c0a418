pub mod ai;
pub mod cluster;
mod context;
pub mod jobs;
pub mod parallel;
pub mod review;
pub mod subagents;
pub mod tasks;

pub use context::{JOB_TYPE_NODE_ACTION, Orchestrator};

/// Milliseconds since the unix epoch. All persisted timestamps use this.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
