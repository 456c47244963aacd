pub mod disk;
pub mod memory;

use crate::core::config::AppConfig;
use crate::core::rate::is_valid_rate;
use crate::core::store::RateStore;
use anyhow::Result;
pub use disk::DiskRateStore;
pub use memory::MemoryRateStore;
use std::sync::Arc;
use tracing::warn;

/// Opens the persistent store under the configured data directory.
pub fn open_disk_store(config: &AppConfig) -> Result<Arc<dyn RateStore>> {
    let path = config.default_data_path()?.join("store");
    Ok(Arc::new(DiskRateStore::open(&path)?))
}

/// Inserts each seed rate whose pair is not stored yet. Existing rates are
/// left untouched and nothing is broadcast. Seeds with an unusable rate are
/// skipped.
pub async fn seed_missing(store: &dyn RateStore, config: &AppConfig) -> Result<usize> {
    let mut seeded = 0;
    for seed in &config.seed_rates {
        let pair = crate::core::RatePair::new(&seed.base_currency, &seed.target_currency);
        if !is_valid_rate(seed.rate) {
            warn!(%pair, rate = seed.rate, "Skipping seed rate that is not positive and finite");
            continue;
        }
        if store.get(&pair).await?.is_none() {
            store.upsert(&pair, seed.rate).await?;
            seeded += 1;
        }
    }
    Ok(seeded)
}
