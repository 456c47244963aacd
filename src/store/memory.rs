use crate::core::rate::{RatePair, RateRecord};
use crate::core::store::{RateStore, RateWrite, TaskLogEntry, TaskStatus};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// In-memory rate store using a HashMap behind an RwLock
#[derive(Default)]
pub struct MemoryRateStore {
    rates: RwLock<HashMap<RatePair, RateRecord>>,
    task_logs: Mutex<Vec<TaskLogEntry>>,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn get(&self, pair: &RatePair) -> Result<Option<RateRecord>> {
        let rates = self.rates.read().await;
        Ok(rates.get(pair).cloned())
    }

    async fn list_all(&self) -> Result<Vec<RateRecord>> {
        let rates = self.rates.read().await;
        Ok(rates.values().cloned().collect())
    }

    async fn commit(&self, writes: Vec<RateWrite>) -> Result<()> {
        // A single write guard makes the batch atomic for readers.
        let mut rates = self.rates.write().await;
        debug!("Memory store COMMIT of {} writes", writes.len());
        for write in writes {
            match write {
                RateWrite::Put(record) => {
                    rates.insert(record.pair(), record);
                }
                RateWrite::Delete(pair) => {
                    rates.remove(&pair);
                }
            }
        }
        Ok(())
    }

    async fn log_event(&self, task_name: &str, status: TaskStatus, details: &str) -> Result<()> {
        let mut logs = self.task_logs.lock().await;
        logs.push(TaskLogEntry {
            task_name: task_name.to_string(),
            status,
            details: details.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn task_logs(&self, limit: usize) -> Result<Vec<TaskLogEntry>> {
        let logs = self.task_logs.lock().await;
        Ok(logs.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_upsert_get() {
        let store = MemoryRateStore::new();
        let pair = RatePair::new("USD", "EUR");

        // Initially, store is empty
        assert!(store.get(&pair).await.unwrap().is_none());

        let created = store.upsert(&pair, 0.92).await.unwrap();
        assert_eq!(created.rate, 0.92);
        assert_eq!(store.get(&pair).await.unwrap(), Some(created.clone()));

        let updated = store.upsert(&pair, 0.95).await.unwrap();
        assert_eq!(updated.rate, 0.95);
        assert!(updated.last_updated > created.last_updated);
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_delete() {
        let store = MemoryRateStore::new();
        let pair = RatePair::new("USD", "JPY");

        assert!(!store.delete(&pair).await.unwrap());
        store.upsert(&pair, 149.3).await.unwrap();
        assert!(store.delete(&pair).await.unwrap());
        assert!(store.get(&pair).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_commit_mixed_batch() {
        let store = MemoryRateStore::new();
        let keep = RatePair::new("USD", "EUR");
        let drop = RatePair::new("USD", "RUB");
        store.upsert(&drop, 92.5).await.unwrap();

        store
            .commit(vec![
                RateWrite::Put(RateRecord::new(&keep, 0.9, Utc::now())),
                RateWrite::Delete(drop.clone()),
            ])
            .await
            .unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].pair(), keep);
    }

    #[tokio::test]
    async fn test_task_logs_newest_first() {
        let store = MemoryRateStore::new();
        store
            .log_event("currency_update", TaskStatus::Started, "first")
            .await
            .unwrap();
        store
            .log_event("currency_update", TaskStatus::Success, "second")
            .await
            .unwrap();

        let logs = store.task_logs(10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].details, "second");
        assert_eq!(logs[1].status, TaskStatus::Started);

        assert_eq!(store.task_logs(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_same_rate_keeps_stamp() {
        let store = MemoryRateStore::new();
        let pair = RatePair::new("USD", "EUR");

        let first = store.upsert(&pair, 0.9).await.unwrap();
        let again = store.upsert(&pair, 0.9).await.unwrap();
        assert_eq!(again.last_updated, first.last_updated);
        assert_eq!(
            store.get(&pair).await.unwrap().unwrap().last_updated,
            first.last_updated
        );

        let moved = store.upsert(&pair, 0.91).await.unwrap();
        assert!(moved.last_updated > first.last_updated);
    }
}
