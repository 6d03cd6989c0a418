//! Cluster node registry, capability router, and execution dispatch.
//!
//! Each node gets its transport bound once at registration time (shell for
//! Linux, HTTP agent for Windows). Status is only ever written by probing.
//! The router never hands back a dead end: an offline node without WoL is
//! skipped, and when the only capable candidate is merely asleep, it is
//! returned so the caller can wake it instead of dropping the work.

pub mod backend;
pub mod types;
pub mod wol;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub use backend::{AgentBackend, NodeBackend, SshBackend};
pub use types::{
    BackendResult, ClusterNode, ExecutionOutcome, NodeAction, NodeCapability, NodeKind, NodeStatus,
};
pub use wol::{RelayWolSender, UdpWolSender, WolSender};

use crate::config::NodeConfig;
use crate::core::now_ms;

pub const WAKE_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const WAKE_TIMEOUT: Duration = Duration::from_secs(120);

/// Probe latency above this reports the node as degraded rather than online.
const DEGRADED_LATENCY_MS: u64 = 1500;

struct NodeEntry {
    node: ClusterNode,
    backend: Arc<dyn NodeBackend>,
}

pub struct ClusterRegistry {
    nodes: RwLock<HashMap<String, NodeEntry>>,
    /// Capability id -> ordered candidate node ids, from configuration.
    routes: RwLock<HashMap<String, Vec<String>>>,
    waker: Arc<dyn WolSender>,
    wake_poll: Duration,
    wake_timeout: Duration,
}

impl ClusterRegistry {
    pub fn new(waker: Arc<dyn WolSender>) -> Self {
        Self::with_wake_timing(waker, WAKE_POLL_INTERVAL, WAKE_TIMEOUT)
    }

    pub fn with_wake_timing(
        waker: Arc<dyn WolSender>,
        wake_poll: Duration,
        wake_timeout: Duration,
    ) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            routes: RwLock::new(HashMap::new()),
            waker,
            wake_poll,
            wake_timeout,
        }
    }

    /// Load nodes from configuration, bind the transport matching each
    /// node's kind, install the capability table, and probe everything
    /// once so routing starts from real statuses instead of `unknown`.
    pub async fn register_nodes(
        &self,
        nodes: &[NodeConfig],
        capability_table: &HashMap<String, Vec<String>>,
    ) -> Result<()> {
        for config in nodes {
            let backend: Arc<dyn NodeBackend> = match config.kind {
                NodeKind::Linux => Arc::new(SshBackend::new()),
                NodeKind::Windows => {
                    Arc::new(AgentBackend::new(config.agent_token.clone().unwrap_or_default()))
                }
            };
            self.register_node_with_backend(node_from_config(config), backend)
                .await;
        }
        self.install_routes(capability_table.clone()).await?;
        self.refresh_status().await;
        Ok(())
    }

    /// Test seam: register a node with an explicit transport.
    pub async fn register_node_with_backend(
        &self,
        node: ClusterNode,
        backend: Arc<dyn NodeBackend>,
    ) {
        info!("Node [{}] registered: kind={}", node.id, node.kind.as_str());
        self.nodes
            .write()
            .await
            .insert(node.id.clone(), NodeEntry { node, backend });
    }

    /// Replace the capability table. Unknown node references fail fast.
    pub async fn install_routes(&self, table: HashMap<String, Vec<String>>) -> Result<()> {
        {
            let nodes = self.nodes.read().await;
            for (capability, ids) in &table {
                for id in ids {
                    if !nodes.contains_key(id) {
                        bail!("capability [{}] routes to unknown node [{}]", capability, id);
                    }
                }
            }
        }
        *self.routes.write().await = table;
        Ok(())
    }

    pub async fn get_node(&self, id: &str) -> Option<ClusterNode> {
        self.nodes.read().await.get(id).map(|e| e.node.clone())
    }

    pub async fn list_nodes(&self) -> Vec<ClusterNode> {
        let mut out: Vec<ClusterNode> = self
            .nodes
            .read()
            .await
            .values()
            .map(|e| e.node.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Re-probe every node concurrently and fold the results back into the
    /// table. Intentionally unbounded: the fleet is small and probes are
    /// cheap.
    pub async fn refresh_status(&self) {
        let mut set = JoinSet::new();
        {
            let nodes = self.nodes.read().await;
            for entry in nodes.values() {
                let node = entry.node.clone();
                let backend = entry.backend.clone();
                set.spawn(async move {
                    let probed = backend.probe(&node).await;
                    (node.id, probed)
                });
            }
        }
        while let Some(joined) = set.join_next().await {
            let Ok((id, probed)) = joined else { continue };
            self.apply_probe(&id, probed).await;
        }
    }

    /// Probe one node and update it. Returns the refreshed record.
    pub async fn probe_node(&self, id: &str) -> Option<ClusterNode> {
        let (node, backend) = {
            let nodes = self.nodes.read().await;
            let entry = nodes.get(id)?;
            (entry.node.clone(), entry.backend.clone())
        };
        let probed = backend.probe(&node).await;
        self.apply_probe(id, probed).await
    }

    async fn apply_probe(&self, id: &str, probed: Result<Duration>) -> Option<ClusterNode> {
        let mut nodes = self.nodes.write().await;
        let entry = nodes.get_mut(id)?;
        match probed {
            Ok(latency) => {
                let latency_ms = latency.as_millis() as u64;
                entry.node.status = if latency_ms > DEGRADED_LATENCY_MS {
                    NodeStatus::Degraded
                } else {
                    NodeStatus::Online
                };
                entry.node.latency_ms = Some(latency_ms);
                entry.node.last_seen = Some(now_ms());
                debug!("Node [{}] {} ({}ms)", id, entry.node.status.as_str(), latency_ms);
            }
            Err(e) => {
                entry.node.status = if entry.node.supports_wol {
                    NodeStatus::Sleeping
                } else {
                    NodeStatus::Offline
                };
                entry.node.latency_ms = None;
                debug!("Node [{}] {}: {}", id, entry.node.status.as_str(), e);
            }
        }
        Some(entry.node.clone())
    }

    /// Pick a node for a capability. Online candidates win, ordered by the
    /// capability's declared priority descending; with none online, a
    /// sleeping WoL-capable candidate is returned rather than dropping the
    /// work. Offline non-WoL nodes are never returned.
    pub async fn route(&self, capability: &str) -> Option<ClusterNode> {
        let nodes = self.nodes.read().await;
        let routes = self.routes.read().await;
        let candidates: Vec<&ClusterNode> = match routes.get(capability) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| nodes.get(id).map(|e| &e.node))
                .collect(),
            // No table entry: fall back to every node advertising it.
            None => nodes.values().map(|e| &e.node).collect(),
        };

        let mut online: Vec<&ClusterNode> = candidates
            .iter()
            .copied()
            .filter(|n| n.capability_priority(capability).is_some())
            .filter(|n| n.status == NodeStatus::Online)
            .collect();
        online.sort_by(|a, b| {
            b.capability_priority(capability)
                .cmp(&a.capability_priority(capability))
        });
        if let Some(node) = online.first() {
            return Some((*node).clone());
        }

        let mut asleep: Vec<&ClusterNode> = candidates
            .iter()
            .copied()
            .filter(|n| n.capability_priority(capability).is_some())
            .filter(|n| n.status == NodeStatus::Sleeping && n.supports_wol)
            .collect();
        asleep.sort_by(|a, b| {
            b.capability_priority(capability)
                .cmp(&a.capability_priority(capability))
        });
        asleep.first().map(|n| (*n).clone())
    }

    /// Run one action on a named node, normalized to an outcome. Non-online
    /// nodes fail fast, except that `wake` is allowed on anything that
    /// supports it.
    pub async fn execute(
        &self,
        node_id: &str,
        action: NodeAction,
        params: &serde_json::Value,
    ) -> ExecutionOutcome {
        let (node, backend) = {
            let nodes = self.nodes.read().await;
            match nodes.get(node_id) {
                Some(entry) => (entry.node.clone(), entry.backend.clone()),
                None => return ExecutionOutcome::failure(format!("unknown node [{}]", node_id)),
            }
        };

        if action == NodeAction::Wake {
            return self.wake_node(node_id).await;
        }
        if node.status != NodeStatus::Online {
            return ExecutionOutcome::failure(format!(
                "node [{}] is {}, refusing to dispatch",
                node_id,
                node.status.as_str()
            ));
        }

        let start = std::time::Instant::now();
        let result = backend.run(&node, action, params).await;
        let elapsed = start.elapsed().as_millis() as u64;
        if !result.success {
            warn!(
                "Action {} on node [{}] failed: {}",
                action.as_str(),
                node_id,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        ExecutionOutcome::from_backend(result, elapsed)
    }

    /// Trigger the wake collaborator for a WoL-capable node.
    pub async fn wake_node(&self, node_id: &str) -> ExecutionOutcome {
        let node = {
            let nodes = self.nodes.read().await;
            match nodes.get(node_id) {
                Some(entry) => entry.node.clone(),
                None => return ExecutionOutcome::failure(format!("unknown node [{}]", node_id)),
            }
        };
        if !node.supports_wol {
            return ExecutionOutcome::failure(format!("node [{}] does not support WoL", node_id));
        }
        let (Some(mac), Some(broadcast)) = (node.mac.as_deref(), node.broadcast.as_deref())
        else {
            return ExecutionOutcome::failure(format!(
                "node [{}] is missing mac/broadcast for WoL",
                node_id
            ));
        };
        let start = std::time::Instant::now();
        match self.waker.wake(mac, broadcast).await {
            Ok(()) => {
                info!("Node [{}] wake requested", node_id);
                ExecutionOutcome::ok("wake sent", start.elapsed().as_millis() as u64)
            }
            Err(e) => ExecutionOutcome::failure(format!("wake failed: {}", e)),
        }
    }

    /// Poll until the node probes online or the wake ceiling elapses.
    pub async fn wait_for_online(&self, node_id: &str) -> bool {
        let deadline = tokio::time::Instant::now() + self.wake_timeout;
        loop {
            if let Some(node) = self.probe_node(node_id).await
                && node.status == NodeStatus::Online
            {
                return true;
            }
            if tokio::time::Instant::now() + self.wake_poll > deadline {
                return false;
            }
            tokio::time::sleep(self.wake_poll).await;
        }
    }

    /// Routing, optional wake-and-wait, then execution, so callers never
    /// track wake state themselves.
    pub async fn route_and_execute(
        &self,
        capability: &str,
        action: NodeAction,
        params: &serde_json::Value,
        wake_if_sleeping: bool,
    ) -> ExecutionOutcome {
        let Some(node) = self.route(capability).await else {
            return ExecutionOutcome::failure(format!(
                "no capable node for [{}]",
                capability
            ));
        };
        if node.status == NodeStatus::Sleeping {
            if !wake_if_sleeping {
                return ExecutionOutcome::failure(format!(
                    "node [{}] is asleep and wake was not requested",
                    node.id
                ));
            }
            let woke = self.wake_node(&node.id).await;
            if !woke.success {
                return woke;
            }
            if !self.wait_for_online(&node.id).await {
                return ExecutionOutcome::failure(format!(
                    "node [{}] did not come online within {}s",
                    node.id,
                    self.wake_timeout.as_secs()
                ));
            }
        }
        self.execute(&node.id, action, params).await
    }
}

/// Map one configuration entry onto a node record, status `unknown` until
/// the first probe.
pub fn node_from_config(config: &NodeConfig) -> ClusterNode {
    ClusterNode {
        id: config.id.clone(),
        name: config.name.clone(),
        kind: config.kind,
        status: NodeStatus::Unknown,
        host: config.host.clone(),
        port: config.port,
        user: config.user.clone(),
        capabilities: config
            .capabilities
            .iter()
            .map(|c| NodeCapability {
                name: c.name.clone(),
                priority: c.priority,
            })
            .collect(),
        supports_wol: config.supports_wol,
        mac: config.mac.clone(),
        broadcast: config.broadcast.clone(),
        last_seen: None,
        latency_ms: None,
    }
}

#[cfg(test)]
mod tests;
