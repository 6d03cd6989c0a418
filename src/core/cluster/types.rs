use serde::{Deserialize, Serialize};

use crate::core::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Linux,
    Windows,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Linux => "linux",
            NodeKind::Windows => "windows",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Offline,
    Degraded,
    Sleeping,
    Unknown,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
            NodeStatus::Degraded => "degraded",
            NodeStatus::Sleeping => "sleeping",
            NodeStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCapability {
    pub name: String,
    /// Higher wins among online candidates for the same capability.
    pub priority: u32,
}

/// A managed machine. Status is set only by probing, never assumed;
/// `Sleeping` is reported instead of `Offline` when the node can be woken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNode {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    pub status: NodeStatus,
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub capabilities: Vec<NodeCapability>,
    pub supports_wol: bool,
    pub mac: Option<String>,
    pub broadcast: Option<String>,
    pub last_seen: Option<u64>,
    pub latency_ms: Option<u64>,
}

impl ClusterNode {
    pub fn capability_priority(&self, capability: &str) -> Option<u32> {
        self.capabilities
            .iter()
            .find(|c| c.name == capability)
            .map(|c| c.priority)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAction {
    ExecuteCommand,
    DockerAction,
    DeployService,
    VmControl,
    Wake,
}

impl NodeAction {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeAction::ExecuteCommand => "execute_command",
            NodeAction::DockerAction => "docker_action",
            NodeAction::DeployService => "deploy_service",
            NodeAction::VmControl => "vm_control",
            NodeAction::Wake => "wake",
        }
    }
}

/// What a transport reports back before normalization.
#[derive(Debug, Clone)]
pub struct BackendResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl BackendResult {
    pub fn ok(output: String) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// The one result shape every execution path resolves to. Routing and
/// backend failures land here as values; they are never bubbled as `Err`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub timestamp: u64,
}

impl ExecutionOutcome {
    pub fn from_backend(result: BackendResult, execution_time_ms: u64) -> Self {
        Self {
            success: result.success,
            output: result.output,
            error: result.error,
            execution_time_ms,
            timestamp: now_ms(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            execution_time_ms: 0,
            timestamp: now_ms(),
        }
    }

    pub fn ok(output: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            execution_time_ms,
            timestamp: now_ms(),
        }
    }
}
