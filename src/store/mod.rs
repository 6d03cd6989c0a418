//! Durable store for crash recovery and the audit trail.
//!
//! One sqlite file, JSON-blob columns for the record bodies, status pulled
//! out where queries filter on it. Every write is an upsert; the core is
//! expected to keep functioning when no store is configured at all, so
//! callers treat failures here as warnings, not faults.

use std::path::Path;

use anyhow::Result;
use rusqlite::{Connection, params};
use tokio::sync::Mutex;
use tracing::info;

use crate::core::jobs::{Job, JobStatus};
use crate::core::review::TaskReview;
use crate::core::subagents::Subagent;

pub struct Store {
    db: Mutex<Connection>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Connection::open(path.as_ref())?;
        info!("Store opened at {:?}", path.as_ref());
        Self::init(db)
    }

    /// In-memory store, handy for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                job_json TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS subagents (
                subagent_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                subagent_json TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS task_reviews (
                review_id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                review_json TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    pub async fn upsert_job(&self, job: &Job) -> Result<()> {
        let db = self.db.lock().await;
        let json = serde_json::to_string(job)?;
        db.execute(
            "INSERT OR REPLACE INTO jobs (job_id, status, job_json, updated_at)
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)",
            params![job.id, job.status.as_str(), json],
        )?;
        Ok(())
    }

    pub async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let db = self.db.lock().await;
        let mut out = Vec::new();
        match status {
            Some(status) => {
                let mut stmt =
                    db.prepare("SELECT job_json FROM jobs WHERE status = ?1 ORDER BY updated_at")?;
                let rows = stmt.query_map(params![status.as_str()], |row| row.get::<_, String>(0))?;
                for row in rows {
                    out.push(serde_json::from_str(&row?)?);
                }
            }
            None => {
                let mut stmt = db.prepare("SELECT job_json FROM jobs ORDER BY updated_at")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                for row in rows {
                    out.push(serde_json::from_str(&row?)?);
                }
            }
        }
        Ok(out)
    }

    /// The jobs worth resurrecting after a crash: queued and running.
    pub async fn load_recoverable_jobs(&self) -> Result<Vec<Job>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT job_json FROM jobs WHERE status IN ('queued', 'running') ORDER BY updated_at",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    pub async fn upsert_subagent(&self, subagent: &Subagent) -> Result<()> {
        let db = self.db.lock().await;
        let json = serde_json::to_string(subagent)?;
        db.execute(
            "INSERT OR REPLACE INTO subagents (subagent_id, status, subagent_json, updated_at)
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)",
            params![subagent.id, subagent.status.as_str(), json],
        )?;
        Ok(())
    }

    /// Subagents that were alive when the previous process died.
    pub async fn load_active_subagents(&self) -> Result<Vec<Subagent>> {
        let db = self.db.lock().await;
        let mut stmt =
            db.prepare("SELECT subagent_json FROM subagents WHERE status != 'stopped'")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    pub async fn upsert_review(&self, review: &TaskReview) -> Result<()> {
        let db = self.db.lock().await;
        let json = serde_json::to_string(review)?;
        db.execute(
            "INSERT OR REPLACE INTO task_reviews (review_id, job_id, review_json)
             VALUES (?1, ?2, ?3)",
            params![review.id, review.job_id, json],
        )?;
        Ok(())
    }

    pub async fn list_reviews_for_job(&self, job_id: &str) -> Result<Vec<TaskReview>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT review_json FROM task_reviews WHERE job_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![job_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::jobs::JobPriority;

    fn sample_job(status: JobStatus) -> Job {
        Job {
            id: uuid::Uuid::new_v4().to_string(),
            job_type: "node_action".to_string(),
            priority: JobPriority::Normal,
            status,
            progress: 0,
            params: serde_json::json!({"command": "uptime"}),
            result: None,
            error: None,
            retries: 0,
            max_retries: 2,
            timeout_ms: 30_000,
            created_at: 1,
            started_at: None,
            completed_at: None,
            subagent_id: None,
            seq: 0,
        }
    }

    #[tokio::test]
    async fn job_roundtrip_and_status_filter() {
        let store = Store::open_in_memory().unwrap();
        let queued = sample_job(JobStatus::Queued);
        let done = sample_job(JobStatus::Completed);
        store.upsert_job(&queued).await.unwrap();
        store.upsert_job(&done).await.unwrap();

        let loaded = store.list_jobs(Some(JobStatus::Queued)).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, queued.id);
        assert_eq!(store.list_jobs(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn recoverable_jobs_are_queued_and_running() {
        let store = Store::open_in_memory().unwrap();
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            store.upsert_job(&sample_job(status)).await.unwrap();
        }
        let recoverable = store.load_recoverable_jobs().await.unwrap();
        assert_eq!(recoverable.len(), 2);
    }

    #[tokio::test]
    async fn upsert_overwrites_by_id() {
        let store = Store::open_in_memory().unwrap();
        let mut job = sample_job(JobStatus::Queued);
        store.upsert_job(&job).await.unwrap();
        job.status = JobStatus::Running;
        store.upsert_job(&job).await.unwrap();
        let all = store.list_jobs(None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, JobStatus::Running);
    }

    #[tokio::test]
    async fn store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corral.db");
        {
            let store = Store::open(&path).unwrap();
            store.upsert_job(&sample_job(JobStatus::Running)).await.unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.load_recoverable_jobs().await.unwrap().len(), 1);
    }
}
