//! AI resource registry.
//!
//! Tracks inference backends (local and cloud) for selection only; the
//! actual inference call belongs to a collaborator outside this crate.
//! Refreshing statuses reports offline→available transitions so the
//! orchestrator can requeue AI jobs that failed during the outage.

pub mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info};

pub use types::{AiResource, AiResourceKind, AiResourceStatus};

use crate::config::AiResourceConfig;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait ResourceProber: Send + Sync {
    /// True when the resource answers its health endpoint.
    async fn probe(&self, resource: &AiResource) -> bool;
}

/// Default prober: GET the resource's health endpoint; resources without
/// one (typically cloud APIs) are assumed reachable.
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceProber for HttpProber {
    async fn probe(&self, resource: &AiResource) -> bool {
        match &resource.endpoint {
            Some(endpoint) => match self.client.get(endpoint).send().await {
                Ok(response) => response.status().is_success(),
                Err(_) => false,
            },
            None => true,
        }
    }
}

/// One offline→available (or the reverse) edge observed during a refresh.
#[derive(Debug, Clone)]
pub struct StatusTransition {
    pub resource_id: String,
    pub kind: AiResourceKind,
    pub from: AiResourceStatus,
    pub to: AiResourceStatus,
}

impl StatusTransition {
    /// The edge that triggers the bulk job requeue rule.
    pub fn is_local_recovery(&self) -> bool {
        self.kind == AiResourceKind::Local
            && self.from == AiResourceStatus::Offline
            && self.to == AiResourceStatus::Available
    }
}

#[derive(Default)]
pub struct AiResourceRegistry {
    resources: RwLock<HashMap<String, AiResource>>,
}

impl AiResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, configs: &[AiResourceConfig]) {
        let mut resources = self.resources.write().await;
        for config in configs {
            let resource = AiResource {
                id: config.id.clone(),
                provider: config.provider.clone(),
                kind: config.kind,
                status: AiResourceStatus::Available,
                endpoint: config.endpoint.clone(),
                capabilities: config.capabilities.clone(),
                priority: config.priority,
                cost_per_1k: config.cost_per_1k,
            };
            info!(
                "AI resource [{}] registered: provider={} kind={}",
                resource.id,
                resource.provider,
                resource.kind.as_str()
            );
            resources.insert(resource.id.clone(), resource);
        }
    }

    pub async fn get(&self, id: &str) -> Option<AiResource> {
        self.resources.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<AiResource> {
        let mut out: Vec<AiResource> = self.resources.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Select the best available resource for a capability. With
    /// `prefer_local`, local resources beat cloud ones before priority is
    /// consulted; otherwise priority descending decides alone.
    pub async fn select_best(&self, capability: &str, prefer_local: bool) -> Option<AiResource> {
        let resources = self.resources.read().await;
        let mut candidates: Vec<&AiResource> = resources
            .values()
            .filter(|r| r.status == AiResourceStatus::Available)
            .filter(|r| r.capabilities.iter().any(|c| c == capability))
            .collect();
        if prefer_local {
            candidates.sort_by(|a, b| {
                let a_is_cloud = a.kind != AiResourceKind::Local;
                let b_is_cloud = b.kind != AiResourceKind::Local;
                a_is_cloud.cmp(&b_is_cloud).then(b.priority.cmp(&a.priority))
            });
        } else {
            candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
        }
        candidates.first().map(|r| (*r).clone())
    }

    /// Re-probe every resource concurrently and report the status edges.
    pub async fn refresh_status(
        &self,
        prober: Arc<dyn ResourceProber>,
    ) -> Vec<StatusTransition> {
        let snapshot: Vec<AiResource> = self.resources.read().await.values().cloned().collect();
        let mut set = JoinSet::new();
        for resource in snapshot {
            let prober = prober.clone();
            set.spawn(async move {
                let reachable = prober.probe(&resource).await;
                (resource.id, reachable)
            });
        }
        let mut results: Vec<(String, bool)> = Vec::new();
        while let Some(joined) = set.join_next().await {
            if let Ok(result) = joined {
                results.push(result);
            }
        }

        let mut transitions = Vec::new();
        let mut resources = self.resources.write().await;
        for (id, reachable) in results {
            let Some(resource) = resources.get_mut(&id) else { continue };
            let from = resource.status;
            let to = if reachable {
                AiResourceStatus::Available
            } else {
                AiResourceStatus::Offline
            };
            if from != to {
                debug!(
                    "AI resource [{}] {} -> {}",
                    id,
                    from.as_str(),
                    to.as_str()
                );
                resource.status = to;
                transitions.push(StatusTransition {
                    resource_id: id,
                    kind: resource.kind,
                    from,
                    to,
                });
            }
        }
        transitions
    }

    /// Manual status override, e.g. marking a resource busy while a long
    /// generation holds it.
    pub async fn set_status(&self, id: &str, status: AiResourceStatus) {
        if let Some(resource) = self.resources.write().await.get_mut(id) {
            resource.status = status;
        }
    }
}
