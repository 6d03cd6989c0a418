use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub severity: IssueSeverity,
    pub message: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
}

impl ReviewIssue {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Error,
            message: message.into(),
            file: None,
            line: None,
        }
    }
}

/// What a verifier reports for one pass over a task's output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewFindings {
    pub passed: bool,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub requires_fix: bool,
}

impl ReviewFindings {
    pub fn passed() -> Self {
        Self {
            passed: true,
            ..Self::default()
        }
    }

    pub fn failed(issues: Vec<ReviewIssue>) -> Self {
        Self {
            passed: false,
            issues,
            suggestions: Vec::new(),
            requires_fix: true,
        }
    }
}

/// One persisted verification pass. A job accrues several across fix
/// attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReview {
    pub id: String,
    pub job_id: String,
    pub reviewer_subagent_id: String,
    pub passed: bool,
    pub issues: Vec<ReviewIssue>,
    pub suggestions: Vec<String>,
    pub requires_fix: bool,
    pub escalated: bool,
    pub created_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    /// Passed on the first verification.
    Success,
    /// Passed after at least one fix attempt.
    Fixed,
    /// Still failing with escalation enabled.
    Escalated,
    /// Still failing with escalation disabled, or execution itself failed.
    Failed,
}

impl ReviewVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewVerdict::Success => "success",
            ReviewVerdict::Fixed => "fixed",
            ReviewVerdict::Escalated => "escalated",
            ReviewVerdict::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReviewOptions {
    pub max_fix_attempts: u32,
    pub auto_escalate: bool,
}

impl Default for ReviewOptions {
    fn default() -> Self {
        Self {
            max_fix_attempts: 2,
            auto_escalate: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub job_id: String,
    pub verdict: ReviewVerdict,
    pub fix_attempts: u32,
    pub reviews: Vec<TaskReview>,
}
