//! Persistence abstractions for rates and the task audit log

use crate::core::rate::{RatePair, RateRecord};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Started,
    Success,
    Failed,
    ManualStart,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                TaskStatus::Started => "started",
                TaskStatus::Success => "success",
                TaskStatus::Failed => "failed",
                TaskStatus::ManualStart => "manual_start",
            }
        )
    }
}

/// Immutable audit record; entries are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub task_name: String,
    pub status: TaskStatus,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

/// One write inside an atomic [`RateStore::commit`].
#[derive(Debug, Clone, PartialEq)]
pub enum RateWrite {
    Put(RateRecord),
    Delete(RatePair),
}

#[async_trait]
pub trait RateStore: Send + Sync {
    async fn get(&self, pair: &RatePair) -> Result<Option<RateRecord>>;

    /// All stored records; order is not significant.
    async fn list_all(&self) -> Result<Vec<RateRecord>>;

    /// Applies every write or none of them. Once the writes are visible to
    /// readers the call returns `Ok`; a later durability flush failing is
    /// logged by the backend but does not turn the commit into an error.
    async fn commit(&self, writes: Vec<RateWrite>) -> Result<()>;

    async fn log_event(&self, task_name: &str, status: TaskStatus, details: &str) -> Result<()>;

    /// Most recent entries first.
    async fn task_logs(&self, limit: usize) -> Result<Vec<TaskLogEntry>>;

    async fn upsert(&self, pair: &RatePair, rate: f64) -> Result<RateRecord> {
        let now = Utc::now();
        let record = match self.get(pair).await? {
            Some(existing) if existing.rate == rate => return Ok(existing),
            Some(existing) => existing.with_rate(rate, now),
            None => RateRecord::new(pair, rate, now),
        };
        self.commit(vec![RateWrite::Put(record.clone())]).await?;
        Ok(record)
    }

    async fn delete(&self, pair: &RatePair) -> Result<bool> {
        if self.get(pair).await?.is_none() {
            return Ok(false);
        }
        self.commit(vec![RateWrite::Delete(pair.clone())]).await?;
        Ok(true)
    }
}
