//! Subagent registry.
//!
//! Workers grow lazily: the scheduler and the parallel engine both allocate
//! through [`SubagentRegistry::get_or_create_by_kind`], which reuses an idle
//! subagent of the requested kind before creating a new one. Stopping a
//! subagent is handled at the orchestrator level so the cascade into the
//! job queue stays out of this table.

pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use tokio::sync::RwLock;
use tracing::{info, warn};

pub use types::{Subagent, SubagentKind, SubagentStatus};

use crate::core::now_ms;
use crate::store::Store;

pub struct SubagentRegistry {
    subagents: RwLock<HashMap<String, Subagent>>,
    store: Option<Arc<Store>>,
}

impl SubagentRegistry {
    pub fn new(store: Option<Arc<Store>>) -> Self {
        Self {
            subagents: RwLock::new(HashMap::new()),
            store,
        }
    }

    pub async fn create(
        &self,
        name: &str,
        kind: SubagentKind,
        capabilities: Option<Vec<String>>,
        prefer_local_ai: bool,
    ) -> Subagent {
        let subagent = Subagent {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            kind,
            status: SubagentStatus::Idle,
            capabilities: capabilities.unwrap_or_else(|| kind.default_capabilities()),
            tasks_completed: 0,
            tasks_running: 0,
            prefer_local_ai,
            created_at: now_ms(),
        };
        info!("Subagent [{}] created: kind={}", subagent.name, kind.as_str());
        self.subagents
            .write()
            .await
            .insert(subagent.id.clone(), subagent.clone());
        self.persist(&subagent).await;
        subagent
    }

    /// Main allocation strategy: reuse an idle subagent of the kind if one
    /// exists, otherwise create one named after the kind.
    pub async fn get_or_create_by_kind(&self, kind: SubagentKind) -> Subagent {
        {
            let subagents = self.subagents.read().await;
            let mut idle: Vec<&Subagent> = subagents
                .values()
                .filter(|s| s.kind == kind && s.status == SubagentStatus::Idle)
                .collect();
            idle.sort_by_key(|s| s.created_at);
            if let Some(found) = idle.first() {
                return (*found).clone();
            }
        }
        let count = self.subagents.read().await.len();
        let name = format!("{}-{}", kind.as_str(), count + 1);
        self.create(&name, kind, None, false).await
    }

    pub async fn get(&self, id: &str) -> Option<Subagent> {
        self.subagents.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Subagent> {
        let mut out: Vec<Subagent> = self.subagents.read().await.values().cloned().collect();
        out.sort_by_key(|s| s.created_at);
        out
    }

    /// Re-admit a subagent loaded from the store; running counters reset
    /// since any in-flight work died with the previous process.
    pub async fn restore(&self, mut subagent: Subagent) {
        subagent.tasks_running = 0;
        if subagent.status == SubagentStatus::Busy {
            subagent.status = SubagentStatus::Idle;
        }
        self.subagents
            .write()
            .await
            .insert(subagent.id.clone(), subagent);
    }

    /// Mark stopped. The caller (orchestrator) cancels attached jobs.
    pub async fn mark_stopped(&self, id: &str) -> Result<Subagent> {
        let mut subagents = self.subagents.write().await;
        let subagent = subagents
            .get_mut(id)
            .ok_or_else(|| anyhow!("unknown subagent [{}]", id))?;
        if subagent.status == SubagentStatus::Stopped {
            bail!("subagent [{}] is already stopped", id);
        }
        subagent.status = SubagentStatus::Stopped;
        subagent.tasks_running = 0;
        info!("Subagent [{}] stopped", subagent.name);
        let stopped = subagent.clone();
        drop(subagents);
        self.persist(&stopped).await;
        Ok(stopped)
    }

    pub(crate) async fn on_job_started(&self, id: &str) {
        let mut subagents = self.subagents.write().await;
        if let Some(subagent) = subagents.get_mut(id) {
            subagent.tasks_running += 1;
            if subagent.status == SubagentStatus::Idle {
                subagent.status = SubagentStatus::Busy;
            }
        } else {
            warn!("Job started for unknown subagent [{}]", id);
        }
    }

    pub(crate) async fn on_job_finished(&self, id: &str, success: bool) {
        let mut subagents = self.subagents.write().await;
        if let Some(subagent) = subagents.get_mut(id) {
            subagent.tasks_running = subagent.tasks_running.saturating_sub(1);
            if success {
                subagent.tasks_completed += 1;
            }
            if subagent.tasks_running == 0 && subagent.status == SubagentStatus::Busy {
                subagent.status = SubagentStatus::Idle;
            }
            let snapshot = subagent.clone();
            drop(subagents);
            self.persist(&snapshot).await;
        }
    }

    /// Best effort, like every store write in this crate.
    async fn persist(&self, subagent: &Subagent) {
        if let Some(store) = &self.store {
            if let Err(e) = store.upsert_subagent(subagent).await {
                warn!("Failed to persist subagent [{}]: {}", subagent.id, e);
            }
        }
    }
}
