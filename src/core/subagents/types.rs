use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentKind {
    Executor,
    Verifier,
    Researcher,
    Creative,
    Security,
    Code,
    Research,
    Automation,
}

impl SubagentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SubagentKind::Executor => "executor",
            SubagentKind::Verifier => "verifier",
            SubagentKind::Researcher => "researcher",
            SubagentKind::Creative => "creative",
            SubagentKind::Security => "security",
            SubagentKind::Code => "code",
            SubagentKind::Research => "research",
            SubagentKind::Automation => "automation",
        }
    }

    /// Built-in capability set a subagent of this kind starts with when the
    /// caller does not supply one.
    pub fn default_capabilities(self) -> Vec<String> {
        let caps: &[&str] = match self {
            SubagentKind::Executor => &["task-execution", "shell", "file-ops"],
            SubagentKind::Verifier => &["verification", "testing", "linting"],
            SubagentKind::Researcher | SubagentKind::Research => {
                &["web-research", "summarization"]
            }
            SubagentKind::Creative => &["writing", "image-prompting"],
            SubagentKind::Security => &["vulnerability-scan", "audit"],
            SubagentKind::Code => &["code-generation", "refactoring", "code-review"],
            SubagentKind::Automation => &["scheduling", "workflow"],
        };
        caps.iter().map(|c| c.to_string()).collect()
    }

    pub fn role(self) -> &'static str {
        match self {
            SubagentKind::Executor => "Runs tasks against nodes and collects their output",
            SubagentKind::Verifier => "Checks task output and reports issues",
            SubagentKind::Researcher | SubagentKind::Research => "Gathers and condenses information",
            SubagentKind::Creative => "Produces prose, naming, and other creative output",
            SubagentKind::Security => "Audits configurations and scans for exposure",
            SubagentKind::Code => "Writes and reviews code",
            SubagentKind::Automation => "Maintains recurring workflows",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentStatus {
    Idle,
    Busy,
    Stopped,
    Error,
}

impl SubagentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubagentStatus::Idle => "idle",
            SubagentStatus::Busy => "busy",
            SubagentStatus::Stopped => "stopped",
            SubagentStatus::Error => "error",
        }
    }
}

/// A named worker identity jobs attach to for bookkeeping and
/// specialization. Not a sandbox: busy means at least one attached job is
/// running, and nothing stops a subagent from carrying several at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subagent {
    pub id: String,
    pub name: String,
    pub kind: SubagentKind,
    pub status: SubagentStatus,
    pub capabilities: Vec<String>,
    pub tasks_completed: u64,
    pub tasks_running: u64,
    pub prefer_local_ai: bool,
    pub created_at: u64,
}
