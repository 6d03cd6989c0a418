//! Typed fleet configuration.
//!
//! Nodes, the capability table, scheduler limits, and AI resources are
//! loaded from one TOML file and validated up front so that unknown node
//! references or nonsensical WoL settings fail at startup, not mid-dispatch.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::core::ai::AiResourceKind;
use crate::core::cluster::NodeKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    /// Capability id -> ordered candidate node ids.
    #[serde(default)]
    pub capabilities: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub ai_resources: Vec<AiResourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub max_concurrent: usize,
    pub default_max_retries: u32,
    /// Default per-job timeout in milliseconds.
    pub default_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            default_max_retries: 2,
            default_timeout_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    pub host: String,
    pub port: u16,
    /// Login user for the shell transport. Ignored for agent nodes.
    #[serde(default)]
    pub user: Option<String>,
    /// Bearer token for the HTTP execution agent. Required for agent nodes.
    #[serde(default)]
    pub agent_token: Option<String>,
    #[serde(default)]
    pub supports_wol: bool,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub broadcast: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<CapabilityDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDecl {
    pub name: String,
    /// Higher wins when several online nodes advertise the capability.
    #[serde(default)]
    pub priority: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResourceConfig {
    pub id: String,
    pub provider: String,
    pub kind: AiResourceKind,
    /// Health-check endpoint. Resources without one are assumed reachable.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub cost_per_1k: Option<f64>,
}

impl FleetConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading fleet config {:?}", path.as_ref()))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: FleetConfig = toml::from_str(raw).context("parsing fleet config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs that would otherwise surface as runtime routing bugs:
    /// duplicate node ids, capability entries naming unknown nodes, WoL
    /// nodes without a usable MAC, and agent nodes without a token.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                bail!("duplicate node id [{}]", node.id);
            }
            if node.supports_wol {
                let mac = node
                    .mac
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("node [{}] supports WoL but has no mac", node.id))?;
                parse_mac(mac)
                    .with_context(|| format!("node [{}] has an invalid mac", node.id))?;
            }
            match node.kind {
                NodeKind::Linux => {
                    if node.user.is_none() {
                        bail!("linux node [{}] needs a login user", node.id);
                    }
                }
                NodeKind::Windows => {
                    if node.agent_token.is_none() {
                        bail!("windows node [{}] needs an agent_token", node.id);
                    }
                }
            }
        }
        for (capability, node_ids) in &self.capabilities {
            for id in node_ids {
                if !seen.contains(id.as_str()) {
                    bail!(
                        "capability [{}] references unknown node [{}]",
                        capability,
                        id
                    );
                }
            }
        }
        let mut resource_ids = std::collections::HashSet::new();
        for resource in &self.ai_resources {
            if !resource_ids.insert(resource.id.as_str()) {
                bail!("duplicate AI resource id [{}]", resource.id);
            }
        }
        Ok(())
    }
}

/// Parse a `aa:bb:cc:dd:ee:ff` (or `-`-separated) MAC into its six bytes.
pub fn parse_mac(mac: &str) -> Result<[u8; 6]> {
    let parts: Vec<&str> = mac.split([':', '-']).collect();
    if parts.len() != 6 {
        bail!("expected 6 octets in {:?}", mac);
    }
    let mut out = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        out[i] = u8::from_str_radix(part, 16).with_context(|| format!("bad octet {:?}", part))?;
    }
    Ok(out)
}
