use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::MultiplexedConnection, Client};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cli::config::CacheSettings;
use crate::storage::StorageError;

/// Lifecycle of a batch job. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress record for one batch job. Mutated only by the job that owns it,
/// through the `JobStore`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub filename: String,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub failed_rows: u64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub input_ref: Option<String>,
    pub output_ref: Option<String>,
}

/// Non-terminal field updates.
#[derive(Debug, Default, Clone)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub input_ref: Option<String>,
}

/// Store of job records with atomic progress counters.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(
        &self,
        total_rows: u64,
        input_ref: Option<String>,
        filename: &str,
    ) -> Result<JobRecord, StorageError>;

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, StorageError>;

    /// Apply non-terminal updates. Ignored once the job is terminal.
    async fn update(&self, id: &str, patch: JobPatch) -> Result<(), StorageError>;

    /// Increment `processed_rows` (and `failed_rows` when `failed`) by one.
    /// Must be atomic under concurrent row completion.
    async fn increment_progress(&self, id: &str, failed: bool) -> Result<(), StorageError>;

    /// Terminal transition, test-and-set: returns `false` without changing
    /// anything when the job is already terminal.
    async fn finish(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
        output_ref: Option<&str>,
    ) -> Result<bool, StorageError>;

    async fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, StorageError>;
}

fn new_record(total_rows: u64, input_ref: Option<String>, filename: &str) -> JobRecord {
    JobRecord {
        id: Uuid::new_v4().to_string(),
        filename: filename.to_string(),
        total_rows,
        processed_rows: 0,
        failed_rows: 0,
        status: JobStatus::Queued,
        created_at: Utc::now(),
        completed_at: None,
        error: None,
        input_ref,
        output_ref: None,
    }
}

/// Redis-backed job store. One hash per job under `job:<id>` plus a list
/// index `jobs:index` with the newest job first. All mutations go through
/// one connection mutex, which also serializes the finish test-and-set.
pub struct RedisJobStore {
    conn: Arc<Mutex<MultiplexedConnection>>,
}

const INDEX_KEY: &str = "jobs:index";

fn job_key(id: &str) -> String {
    format!("job:{}", id)
}

impl RedisJobStore {
    pub async fn new(settings: &CacheSettings) -> Result<Self, StorageError> {
        let client = Client::open(settings.redis_url.clone())?;
        let conn = client.get_multiplexed_async_connection().await?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn read_record(
        conn: &mut MultiplexedConnection,
        id: &str,
    ) -> Result<Option<JobRecord>, StorageError> {
        let map: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(job_key(id))
            .query_async(conn)
            .await?;

        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(record_from_map(id, &map)))
    }
}

fn record_from_map(id: &str, map: &HashMap<String, String>) -> JobRecord {
    let field = |name: &str| map.get(name).cloned().unwrap_or_default();
    let optional = |name: &str| map.get(name).filter(|v| !v.is_empty()).cloned();

    JobRecord {
        id: id.to_string(),
        filename: field("filename"),
        total_rows: field("total_rows").parse().unwrap_or(0),
        processed_rows: field("processed_rows").parse().unwrap_or(0),
        failed_rows: field("failed_rows").parse().unwrap_or(0),
        status: JobStatus::parse(&field("status")).unwrap_or(JobStatus::Queued),
        created_at: optional("created_at")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(Utc::now),
        completed_at: optional("completed_at").and_then(|v| v.parse().ok()),
        error: optional("error"),
        input_ref: optional("input_ref"),
        output_ref: optional("output_ref"),
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(
        &self,
        total_rows: u64,
        input_ref: Option<String>,
        filename: &str,
    ) -> Result<JobRecord, StorageError> {
        let record = new_record(total_rows, input_ref, filename);
        let mut conn = self.conn.lock().await;

        redis::cmd("HSET")
            .arg(job_key(&record.id))
            .arg("filename")
            .arg(&record.filename)
            .arg("total_rows")
            .arg(record.total_rows)
            .arg("processed_rows")
            .arg(0u64)
            .arg("failed_rows")
            .arg(0u64)
            .arg("status")
            .arg(record.status.as_str())
            .arg("created_at")
            .arg(record.created_at.to_rfc3339())
            .arg("input_ref")
            .arg(record.input_ref.as_deref().unwrap_or_default())
            .query_async::<_, ()>(&mut *conn)
            .await?;

        redis::cmd("LPUSH")
            .arg(INDEX_KEY)
            .arg(&record.id)
            .query_async::<_, ()>(&mut *conn)
            .await?;

        debug!("Created job {} ({} rows)", record.id, total_rows);
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, StorageError> {
        let mut conn = self.conn.lock().await;
        Self::read_record(&mut conn, id).await
    }

    async fn update(&self, id: &str, patch: JobPatch) -> Result<(), StorageError> {
        let mut conn = self.conn.lock().await;

        let current = Self::read_record(&mut conn, id)
            .await?
            .ok_or_else(|| StorageError::JobNotFound(id.to_string()))?;
        if current.status.is_terminal() {
            warn!("Ignoring update to terminal job {}", id);
            return Ok(());
        }

        let mut cmd = redis::cmd("HSET");
        cmd.arg(job_key(id));
        if let Some(status) = patch.status {
            cmd.arg("status").arg(status.as_str());
        }
        if let Some(input_ref) = &patch.input_ref {
            cmd.arg("input_ref").arg(input_ref);
        }
        cmd.query_async::<_, ()>(&mut *conn).await?;
        Ok(())
    }

    async fn increment_progress(&self, id: &str, failed: bool) -> Result<(), StorageError> {
        let mut conn = self.conn.lock().await;

        redis::cmd("HINCRBY")
            .arg(job_key(id))
            .arg("processed_rows")
            .arg(1)
            .query_async::<_, ()>(&mut *conn)
            .await?;

        if failed {
            redis::cmd("HINCRBY")
                .arg(job_key(id))
                .arg("failed_rows")
                .arg(1)
                .query_async::<_, ()>(&mut *conn)
                .await?;
        }
        Ok(())
    }

    async fn finish(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
        output_ref: Option<&str>,
    ) -> Result<bool, StorageError> {
        // Holding the connection mutex across read and write serializes the
        // test-and-set against all other in-process mutators.
        let mut conn = self.conn.lock().await;

        let current = Self::read_record(&mut conn, id)
            .await?
            .ok_or_else(|| StorageError::JobNotFound(id.to_string()))?;
        if current.status.is_terminal() {
            return Ok(false);
        }

        redis::cmd("HSET")
            .arg(job_key(id))
            .arg("status")
            .arg(status.as_str())
            .arg("completed_at")
            .arg(Utc::now().to_rfc3339())
            .arg("error")
            .arg(error.unwrap_or_default())
            .arg("output_ref")
            .arg(output_ref.unwrap_or_default())
            .query_async::<_, ()>(&mut *conn)
            .await?;

        Ok(true)
    }

    async fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, StorageError> {
        let mut conn = self.conn.lock().await;

        let ids: Vec<String> = redis::cmd("LRANGE")
            .arg(INDEX_KEY)
            .arg(0)
            .arg(-1)
            .query_async(&mut *conn)
            .await?;

        let mut records = Vec::new();
        for id in ids {
            if records.len() >= limit {
                break;
            }
            if let Some(record) = Self::read_record(&mut conn, &id).await? {
                if status.map_or(true, |s| record.status == s) {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }
}

/// In-memory job store for tests and single-shot runs without Redis.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: std::sync::Mutex<MemoryJobs>,
}

#[derive(Default)]
struct MemoryJobs {
    records: HashMap<String, JobRecord>,
    // Newest first, matching the Redis index.
    order: Vec<String>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(
        &self,
        total_rows: u64,
        input_ref: Option<String>,
        filename: &str,
    ) -> Result<JobRecord, StorageError> {
        let record = new_record(total_rows, input_ref, filename);
        let mut inner = self.inner.lock().expect("job store mutex poisoned");
        inner.order.insert(0, record.id.clone());
        inner.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, StorageError> {
        let inner = self.inner.lock().expect("job store mutex poisoned");
        Ok(inner.records.get(id).cloned())
    }

    async fn update(&self, id: &str, patch: JobPatch) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("job store mutex poisoned");
        let record = inner
            .records
            .get_mut(id)
            .ok_or_else(|| StorageError::JobNotFound(id.to_string()))?;

        if record.status.is_terminal() {
            warn!("Ignoring update to terminal job {}", id);
            return Ok(());
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(input_ref) = patch.input_ref {
            record.input_ref = Some(input_ref);
        }
        Ok(())
    }

    async fn increment_progress(&self, id: &str, failed: bool) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("job store mutex poisoned");
        let record = inner
            .records
            .get_mut(id)
            .ok_or_else(|| StorageError::JobNotFound(id.to_string()))?;

        record.processed_rows += 1;
        if failed {
            record.failed_rows += 1;
        }
        Ok(())
    }

    async fn finish(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
        output_ref: Option<&str>,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().expect("job store mutex poisoned");
        let record = inner
            .records
            .get_mut(id)
            .ok_or_else(|| StorageError::JobNotFound(id.to_string()))?;

        if record.status.is_terminal() {
            return Ok(false);
        }
        record.status = status;
        record.completed_at = Some(Utc::now());
        record.error = error.map(str::to_string);
        record.output_ref = output_ref.map(str::to_string);
        Ok(true)
    }

    async fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, StorageError> {
        let inner = self.inner.lock().expect("job store mutex poisoned");
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|record| status.map_or(true, |s| record.status == s))
            .take(limit)
            .cloned()
            .collect())
    }
}
