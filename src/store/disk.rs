use crate::core::rate::{RatePair, RateRecord};
use crate::core::store::{RateStore, RateWrite, TaskLogEntry, TaskStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

const RATES_PARTITION: &str = "rates";
const TASK_LOGS_PARTITION: &str = "task_logs";

fn rate_key(pair: &RatePair) -> Vec<u8> {
    format!("{}/{}", pair.base_currency, pair.target_currency).into_bytes()
}

/// Rate store persisted with fjall. Every commit goes through a single
/// write batch, so a reconciliation tick is applied completely or not at all.
pub struct DiskRateStore {
    keyspace: Keyspace,
    rates: PartitionHandle,
    task_logs: PartitionHandle,
    log_sequence: AtomicU64,
}

impl DiskRateStore {
    pub fn open(data_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_path).with_context(|| {
            format!("Failed to create data directory: {}", data_path.display())
        })?;

        let keyspace = Config::new(data_path.join("fjall_db"))
            .open()
            .with_context(|| format!("Failed to open rate store at {}", data_path.display()))?;
        let rates = keyspace.open_partition(RATES_PARTITION, PartitionCreateOptions::default())?;
        let task_logs =
            keyspace.open_partition(TASK_LOGS_PARTITION, PartitionCreateOptions::default())?;
        debug!("Opened rate store at {}", data_path.display());

        Ok(Self {
            keyspace,
            rates,
            task_logs,
            log_sequence: AtomicU64::new(0),
        })
    }

    // Timestamp first so keys sort chronologically; the sequence breaks ties.
    fn next_log_key(&self, nanos: i64) -> Vec<u8> {
        let sequence = self.log_sequence.fetch_add(1, Ordering::SeqCst);
        let mut key = Vec::with_capacity(16);
        key.extend_from_slice(&(nanos.max(0) as u64).to_be_bytes());
        key.extend_from_slice(&sequence.to_be_bytes());
        key
    }
}

#[async_trait]
impl RateStore for DiskRateStore {
    async fn get(&self, pair: &RatePair) -> Result<Option<RateRecord>> {
        match self.rates.get(rate_key(pair))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    async fn list_all(&self) -> Result<Vec<RateRecord>> {
        self.rates
            .iter()
            .map(|item| {
                let (_, value) = item?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    async fn commit(&self, writes: Vec<RateWrite>) -> Result<()> {
        let mut batch = self.keyspace.batch();
        for write in &writes {
            match write {
                RateWrite::Put(record) => {
                    batch.insert(
                        &self.rates,
                        rate_key(&record.pair()),
                        serde_json::to_vec(record)?,
                    );
                }
                RateWrite::Delete(pair) => batch.remove(&self.rates, rate_key(pair)),
            }
        }
        batch.commit().context("Failed to commit rate batch")?;
        // The batch is already visible; a failed flush only weakens durability.
        if let Err(e) = self.keyspace.persist(PersistMode::SyncAll) {
            warn!(error = %e, "Failed to flush committed rate batch to disk");
        }
        debug!("Disk store COMMIT of {} writes", writes.len());
        Ok(())
    }

    async fn log_event(&self, task_name: &str, status: TaskStatus, details: &str) -> Result<()> {
        let entry = TaskLogEntry {
            task_name: task_name.to_string(),
            status,
            details: details.to_string(),
            created_at: Utc::now(),
        };
        let key = self.next_log_key(entry.created_at.timestamp_nanos_opt().unwrap_or_default());
        self.task_logs.insert(key, serde_json::to_vec(&entry)?)?;
        Ok(())
    }

    async fn task_logs(&self, limit: usize) -> Result<Vec<TaskLogEntry>> {
        self.task_logs
            .iter()
            .rev()
            .take(limit)
            .map(|item| {
                let (_, value) = item?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_disk_store_upsert_get() {
        let dir = tempdir().unwrap();
        let store = DiskRateStore::open(dir.path()).unwrap();
        let pair = RatePair::new("USD", "EUR");

        // Initially, store is empty
        assert!(store.get(&pair).await.unwrap().is_none());

        let record = store.upsert(&pair, 0.92).await.unwrap();
        assert_eq!(store.get(&pair).await.unwrap(), Some(record));
        assert!(store.get(&RatePair::new("USD", "GBP")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disk_store_batch_and_delete() {
        let dir = tempdir().unwrap();
        let store = DiskRateStore::open(dir.path()).unwrap();
        let now = Utc::now();

        store
            .commit(vec![
                RateWrite::Put(RateRecord::new(&RatePair::new("USD", "EUR"), 0.92, now)),
                RateWrite::Put(RateRecord::new(&RatePair::new("USD", "JPY"), 149.3, now)),
            ])
            .await
            .unwrap();
        assert_eq!(store.list_all().await.unwrap().len(), 2);

        assert!(store.delete(&RatePair::new("USD", "JPY")).await.unwrap());
        assert!(!store.delete(&RatePair::new("USD", "JPY")).await.unwrap());

        let remaining = store.list_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].target_currency, "EUR");
    }

    #[tokio::test]
    async fn test_disk_store_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = DiskRateStore::open(dir.path()).unwrap();
            store.upsert(&RatePair::new("EUR", "GBP"), 0.86).await.unwrap();
            store
                .log_event("currency_update", TaskStatus::Success, "persisted")
                .await
                .unwrap();
        }

        let store = DiskRateStore::open(dir.path()).unwrap();
        let record = store.get(&RatePair::new("EUR", "GBP")).await.unwrap();
        assert_eq!(record.map(|r| r.rate), Some(0.86));
        assert_eq!(store.task_logs(5).await.unwrap()[0].details, "persisted");
    }

    #[tokio::test]
    async fn test_disk_task_logs_newest_first() {
        let dir = tempdir().unwrap();
        let store = DiskRateStore::open(dir.path()).unwrap();

        for details in ["one", "two", "three"] {
            store
                .log_event("currency_update", TaskStatus::Started, details)
                .await
                .unwrap();
        }

        let logs = store.task_logs(2).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].details, "three");
        assert_eq!(logs[1].details, "two");
    }
}
