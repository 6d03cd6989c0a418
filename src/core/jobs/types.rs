use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Allowed lifecycle transitions. `Failed -> Queued` is reachable only
/// through the explicit retry paths, which check the retry budget before
/// consulting this table.
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    if from == to {
        return false;
    }
    match from {
        JobStatus::Queued => matches!(to, JobStatus::Running | JobStatus::Cancelled),
        JobStatus::Running => matches!(
            to,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        ),
        JobStatus::Failed => matches!(to, JobStatus::Queued),
        JobStatus::Completed | JobStatus::Cancelled => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl JobPriority {
    /// Fixed numeric weights; comparison across tiers is purely numeric.
    pub fn weight(self) -> u32 {
        match self {
            JobPriority::Critical => 1000,
            JobPriority::High => 100,
            JobPriority::Normal => 10,
            JobPriority::Low => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    /// 0..=100.
    pub progress: u8,
    pub params: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub retries: u32,
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub subagent_id: Option<String>,
    /// Monotonic admission order, the FIFO tie-break within a priority tier.
    pub seq: u64,
}

#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub priority: Option<JobPriority>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub subagent_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub max_concurrent: usize,
}
