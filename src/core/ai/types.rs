use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiResourceKind {
    Local,
    Cloud,
}

impl AiResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AiResourceKind::Local => "local",
            AiResourceKind::Cloud => "cloud",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiResourceStatus {
    Available,
    Busy,
    Offline,
}

impl AiResourceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AiResourceStatus::Available => "available",
            AiResourceStatus::Busy => "busy",
            AiResourceStatus::Offline => "offline",
        }
    }
}

/// An inference backend, used for selection only. Execution lives with an
/// external collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResource {
    pub id: String,
    pub provider: String,
    pub kind: AiResourceKind,
    pub status: AiResourceStatus,
    pub endpoint: Option<String>,
    pub capabilities: Vec<String>,
    pub priority: u32,
    pub cost_per_1k: Option<f64>,
}
