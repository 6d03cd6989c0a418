//! Node execution transports.
//!
//! Both transports sit behind [`NodeBackend`] and resolve every failure,
//! including their own timeouts, to a [`BackendResult`] value. The shell
//! transport maps actions to a single command run over `ssh`; the agent
//! transport POSTs a JSON envelope to the per-node HTTP agent.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{BackendResult, ClusterNode, NodeAction};

pub const SSH_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
pub const AGENT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait NodeBackend: Send + Sync {
    /// Run one action on the node. Transport errors come back as failed
    /// results, never as panics or `Err`.
    async fn run(&self, node: &ClusterNode, action: NodeAction, params: &serde_json::Value)
    -> BackendResult;

    /// Liveness probe. Default: a bounded TCP connect to the transport
    /// port, returning the observed latency.
    async fn probe(&self, node: &ClusterNode) -> Result<Duration> {
        let start = std::time::Instant::now();
        let addr = format!("{}:{}", node.host, node.port);
        tokio::time::timeout(PROBE_TIMEOUT, tokio::net::TcpStream::connect(&addr))
            .await
            .with_context(|| format!("probe of {} timed out", addr))?
            .with_context(|| format!("probe of {} refused", addr))?;
        Ok(start.elapsed())
    }
}

/// Map an action and its params onto the single shell command both
/// transports execute. `execute_command` passes through verbatim; the rest
/// are fixed verb templates.
pub fn shell_command_for(action: NodeAction, params: &serde_json::Value) -> Result<String> {
    let field = |name: &str| -> Result<&str> {
        params
            .get(name)
            .and_then(|v| v.as_str())
            .with_context(|| format!("{} requires param {:?}", action.as_str(), name))
    };
    match action {
        NodeAction::ExecuteCommand => Ok(field("command")?.to_string()),
        NodeAction::DockerAction => {
            let verb = field("verb")?;
            if !matches!(verb, "start" | "stop" | "restart" | "pull" | "logs") {
                bail!("unsupported docker verb {:?}", verb);
            }
            Ok(format!("docker {} {}", verb, field("container")?))
        }
        NodeAction::DeployService => Ok(format!(
            "cd {} && docker compose up -d",
            field("compose_dir")?
        )),
        NodeAction::VmControl => {
            let verb = field("verb")?;
            if !matches!(verb, "start" | "shutdown" | "reboot" | "destroy" | "suspend" | "resume") {
                bail!("unsupported vm verb {:?}", verb);
            }
            Ok(format!("virsh {} {}", verb, field("vm")?))
        }
        NodeAction::Wake => bail!("wake is handled by the registry, not a transport"),
    }
}

/// Remote shell transport for Linux nodes. Key-based auth, BatchMode so a
/// missing key fails instead of prompting.
pub struct SshBackend {
    command_timeout: Duration,
}

impl SshBackend {
    pub fn new() -> Self {
        Self {
            command_timeout: SSH_COMMAND_TIMEOUT,
        }
    }
}

impl Default for SshBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeBackend for SshBackend {
    async fn run(
        &self,
        node: &ClusterNode,
        action: NodeAction,
        params: &serde_json::Value,
    ) -> BackendResult {
        let command = match shell_command_for(action, params) {
            Ok(c) => c,
            Err(e) => return BackendResult::err(e.to_string()),
        };
        let user = node.user.as_deref().unwrap_or("root");
        debug!("ssh [{}@{}]: {}", user, node.host, command);

        let mut cmd = tokio::process::Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("ConnectTimeout=10")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-p")
            .arg(node.port.to_string())
            .arg(format!("{}@{}", user, node.host))
            .arg(&command);

        let output = match tokio::time::timeout(self.command_timeout, cmd.output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return BackendResult::err(format!("ssh spawn failed: {}", e)),
            Err(_) => {
                return BackendResult::err(format!(
                    "command timed out after {}s",
                    self.command_timeout.as_secs()
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if output.status.success() {
            BackendResult::ok(stdout)
        } else {
            // Non-zero exit: stderr is the message, stdout when stderr is empty.
            let message = if stderr.is_empty() { stdout } else { stderr };
            BackendResult::err(format!(
                "exit {}: {}",
                output.status.code().unwrap_or(-1),
                message
            ))
        }
    }
}

#[derive(Serialize)]
struct AgentRequest<'a> {
    command: &'a str,
    timeout: u64,
}

#[derive(Deserialize)]
struct AgentResponse {
    success: bool,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP transport for the Windows node: POST the command envelope to the
/// execution agent and interpret its JSON reply.
pub struct AgentBackend {
    client: reqwest::Client,
    token: String,
}

impl AgentBackend {
    pub fn new(token: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(AGENT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, token }
    }
}

#[async_trait]
impl NodeBackend for AgentBackend {
    async fn run(
        &self,
        node: &ClusterNode,
        action: NodeAction,
        params: &serde_json::Value,
    ) -> BackendResult {
        let command = match shell_command_for(action, params) {
            Ok(c) => c,
            Err(e) => return BackendResult::err(e.to_string()),
        };
        let url = format!("http://{}:{}/api/execute", node.host, node.port);
        debug!("agent [{}]: {}", url, command);

        let request = AgentRequest {
            command: &command,
            timeout: AGENT_REQUEST_TIMEOUT.as_secs(),
        };
        // reqwest's client timeout covers connect and body; an elapsed
        // timeout surfaces as Err below and becomes a failure result.
        let response = match self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return BackendResult::err(format!("agent request failed: {}", e)),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return BackendResult::err(format!("agent returned {}: {}", status, body));
        }
        match response.json::<AgentResponse>().await {
            Ok(reply) => BackendResult {
                success: reply.success,
                output: reply.output,
                error: reply.error,
            },
            Err(e) => BackendResult::err(format!("agent reply was not valid JSON: {}", e)),
        }
    }
}
