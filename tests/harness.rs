#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use corral::core::cluster::{
    BackendResult, ClusterNode, NodeAction, NodeBackend, NodeCapability, NodeKind, NodeStatus,
    WolSender,
};
use corral::{AiResource, FleetConfig, Job, Orchestrator, ResourceProber};
use tokio::sync::Mutex;

pub type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub const FLEET_TOML: &str = r#"
    [scheduler]
    max_concurrent = 2
    default_max_retries = 2
    default_timeout_ms = 5000

    [[nodes]]
    id = "forge"
    name = "Forge"
    kind = "linux"
    host = "10.0.0.10"
    port = 22
    user = "ops"
    supports_wol = true
    mac = "aa:bb:cc:00:11:22"
    broadcast = "10.0.0.255"
    capabilities = [{ name = "gpu-compute", priority = 90 }]

    [[nodes]]
    id = "anvil"
    name = "Anvil"
    kind = "windows"
    host = "10.0.0.11"
    port = 8085
    agent_token = "secret"
    capabilities = [{ name = "media-encode", priority = 50 }]

    [capabilities]
    "gpu-compute" = ["forge"]
    "media-encode" = ["anvil", "forge"]

    [[ai_resources]]
    id = "ollama-forge"
    provider = "ollama"
    kind = "local"
    endpoint = "http://10.0.0.10:11434/api/tags"
    capabilities = ["text-generation"]
    priority = 10
"#;

pub fn fleet_config() -> FleetConfig {
    FleetConfig::parse(FLEET_TOML).expect("fleet fixture should parse")
}

pub fn node(id: &str, capability: &str, priority: u32) -> ClusterNode {
    ClusterNode {
        id: id.to_string(),
        name: id.to_string(),
        kind: NodeKind::Linux,
        status: NodeStatus::Unknown,
        host: format!("{id}.fleet.test"),
        port: 22,
        user: Some("ops".to_string()),
        capabilities: vec![NodeCapability {
            name: capability.to_string(),
            priority,
        }],
        supports_wol: false,
        mac: None,
        broadcast: None,
        last_seen: None,
        latency_ms: None,
    }
}

pub fn wol_node(id: &str, capability: &str, priority: u32) -> ClusterNode {
    let mut node = node(id, capability, priority);
    node.supports_wol = true;
    node.mac = Some("aa:bb:cc:00:11:22".to_string());
    node.broadcast = Some("10.0.0.255".to_string());
    node
}

/// Transport double: reachability is a switch, run results are scripted,
/// every executed command is recorded.
pub struct FakeBackend {
    reachable: AtomicBool,
    run_result: Mutex<BackendResult>,
    pub calls: Mutex<Vec<(String, NodeAction)>>,
}

impl FakeBackend {
    pub fn up() -> Arc<Self> {
        Arc::new(Self {
            reachable: AtomicBool::new(true),
            run_result: Mutex::new(BackendResult::ok("done".to_string())),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn down() -> Arc<Self> {
        let backend = Self::up();
        backend.reachable.store(false, Ordering::SeqCst);
        backend
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub async fn set_run_result(&self, result: BackendResult) {
        *self.run_result.lock().await = result;
    }

    pub async fn executed(&self) -> Vec<(String, NodeAction)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl NodeBackend for FakeBackend {
    async fn run(
        &self,
        node: &ClusterNode,
        action: NodeAction,
        _params: &serde_json::Value,
    ) -> BackendResult {
        self.calls.lock().await.push((node.id.clone(), action));
        self.run_result.lock().await.clone()
    }

    async fn probe(&self, _node: &ClusterNode) -> anyhow::Result<Duration> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(Duration::from_millis(3))
        } else {
            anyhow::bail!("connection refused")
        }
    }
}

/// Records wake requests; optionally flips a backend reachable so the
/// wake-then-wait path can complete.
pub struct FakeWaker {
    pub woken: Mutex<Vec<String>>,
    pub brings_up: Option<Arc<FakeBackend>>,
}

impl FakeWaker {
    pub fn recording() -> Arc<Self> {
        Arc::new(Self {
            woken: Mutex::new(Vec::new()),
            brings_up: None,
        })
    }

    pub fn bringing_up(backend: Arc<FakeBackend>) -> Arc<Self> {
        Arc::new(Self {
            woken: Mutex::new(Vec::new()),
            brings_up: Some(backend),
        })
    }
}

#[async_trait]
impl WolSender for FakeWaker {
    async fn wake(&self, mac: &str, _broadcast: &str) -> anyhow::Result<()> {
        self.woken.lock().await.push(mac.to_string());
        if let Some(backend) = &self.brings_up {
            backend.set_reachable(true);
        }
        Ok(())
    }
}

pub struct FakeProber {
    pub reachable: AtomicBool,
}

impl FakeProber {
    pub fn new(reachable: bool) -> Arc<Self> {
        Arc::new(Self {
            reachable: AtomicBool::new(reachable),
        })
    }
}

#[async_trait]
impl ResourceProber for FakeProber {
    async fn probe(&self, _resource: &AiResource) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Poll until the job reaches a terminal status. Dispatch runs on spawned
/// tasks, so tests observe completion asynchronously.
pub async fn wait_for_terminal(orchestrator: &Orchestrator, job_id: &str) -> Job {
    wait_for(orchestrator, job_id, |job| job.status.is_terminal()).await
}

pub async fn wait_for(
    orchestrator: &Orchestrator,
    job_id: &str,
    predicate: impl Fn(&Job) -> bool,
) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(job) = orchestrator.jobs.get(job_id).await
            && predicate(&job)
        {
            return job;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("job [{job_id}] never reached the expected state");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until `assert` stops returning false, for conditions not tied to a
/// single job.
pub async fn eventually(mut check: impl AsyncFnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        if tokio::time::Instant::now() > deadline {
            panic!("condition never became true");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
