//! External exchange rate source abstraction

use crate::core::rate::RateSnapshot;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch(&self, base: &str) -> Result<RateSnapshot>;
}
