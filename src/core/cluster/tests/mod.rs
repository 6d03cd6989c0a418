
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::core::cluster::{
    BackendResult, ClusterNode, NodeAction, NodeBackend, NodeCapability, NodeKind, NodeStatus,
    WolSender,
};

pub(crate) fn node(id: &str, capabilities: &[(&str, u32)], supports_wol: bool) -> ClusterNode {
    ClusterNode {
        id: id.to_string(),
        name: id.to_string(),
        kind: NodeKind::Linux,
        status: NodeStatus::Unknown,
        host: format!("{}.lan", id),
        port: 22,
        user: Some("ops".to_string()),
        capabilities: capabilities
            .iter()
            .map(|(name, priority)| NodeCapability {
                name: name.to_string(),
                priority: *priority,
            })
            .collect(),
        supports_wol,
        mac: supports_wol.then(|| "aa:bb:cc:00:11:22".to_string()),
        broadcast: supports_wol.then(|| "10.0.0.255".to_string()),
        last_seen: None,
        latency_ms: None,
    }
}

/// Scripted transport: probe reachability is a flag, run returns a canned
/// result and records what it was asked to do.
pub(crate) struct MockBackend {
    pub reachable: AtomicBool,
    pub run_result: tokio::sync::Mutex<BackendResult>,
    pub calls: tokio::sync::Mutex<Vec<(NodeAction, serde_json::Value)>>,
}

impl MockBackend {
    pub fn online() -> Arc<Self> {
        Arc::new(Self {
            reachable: AtomicBool::new(true),
            run_result: tokio::sync::Mutex::new(BackendResult::ok("done".to_string())),
            calls: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn unreachable() -> Arc<Self> {
        let backend = Self::online();
        backend.reachable.store(false, Ordering::SeqCst);
        backend
    }
}

#[async_trait]
impl NodeBackend for MockBackend {
    async fn run(
        &self,
        _node: &ClusterNode,
        action: NodeAction,
        params: &serde_json::Value,
    ) -> BackendResult {
        self.calls.lock().await.push((action, params.clone()));
        self.run_result.lock().await.clone()
    }

    async fn probe(&self, node: &ClusterNode) -> Result<Duration> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(Duration::from_millis(3))
        } else {
            bail!("probe of {} refused", node.host)
        }
    }
}

/// Waker that records wakes and, when wired to a backend, brings it up so
/// the wait-for-online poll observes the node coming back.
pub(crate) struct MockWaker {
    pub woken: tokio::sync::Mutex<Vec<String>>,
    pub brings_up: Option<Arc<MockBackend>>,
}

impl MockWaker {
    pub fn recording() -> Arc<Self> {
        Arc::new(Self {
            woken: tokio::sync::Mutex::new(Vec::new()),
            brings_up: None,
        })
    }

    pub fn bringing_up(backend: Arc<MockBackend>) -> Arc<Self> {
        Arc::new(Self {
            woken: tokio::sync::Mutex::new(Vec::new()),
            brings_up: Some(backend),
        })
    }
}

#[async_trait]
impl WolSender for MockWaker {
    async fn wake(&self, mac: &str, _broadcast: &str) -> Result<()> {
        self.woken.lock().await.push(mac.to_string());
        if let Some(backend) = &self.brings_up {
            backend.reachable.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}
