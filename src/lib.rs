//! corral: control plane for a small heterogeneous machine fleet.
//!
//! Accepts typed, prioritized jobs, routes each to a capability-matched
//! cluster node or a specialized subagent, executes through the right
//! transport (remote shell for Linux hosts, HTTP agent for the Windows
//! host), tracks outcomes, retries or escalates failures, and keeps a live
//! picture of node and AI-backend health.
//!
//! The crate owns no wire protocol of its own; an HTTP API layer sits on
//! top and only ever touches the [`Orchestrator`] context.

pub mod config;
pub mod core;
pub mod logging;
pub mod store;

pub use crate::config::FleetConfig;
pub use crate::core::Orchestrator;
pub use crate::core::ai::{AiResource, AiResourceKind, AiResourceStatus, ResourceProber};
pub use crate::core::cluster::{
    ClusterNode, ExecutionOutcome, NodeAction, NodeBackend, NodeKind, NodeStatus, WolSender,
};
pub use crate::core::jobs::{Dispatcher, Job, JobOptions, JobPriority, JobStatus};
pub use crate::core::parallel::{ParallelEngine, ParallelResult};
pub use crate::core::review::{
    ReviewOptions, ReviewOutcome, ReviewPipeline, ReviewVerdict, TaskReview, Verifier,
};
pub use crate::core::subagents::{Subagent, SubagentKind, SubagentStatus};
pub use crate::core::tasks::{TaskRunner, TaskSpec};
pub use crate::store::Store;
