//! The task seam shared by the review pipeline and the parallel engine.
//!
//! A [`TaskSpec`] describes one unit of work; the [`TaskRunner`]
//! collaborator actually performs it (against a node, an inference
//! backend, or anything else). The control plane only sees the resulting
//! JSON value or the error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::jobs::JobPriority;
use crate::core::subagents::{Subagent, SubagentKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub subagent_kind: SubagentKind,
    pub priority: JobPriority,
}

impl TaskSpec {
    pub fn new(id: &str, description: &str, subagent_kind: SubagentKind) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            params: serde_json::Value::Null,
            subagent_kind,
            priority: JobPriority::Normal,
        }
    }
}

#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &TaskSpec, subagent: &Subagent) -> anyhow::Result<serde_json::Value>;
}
