//! Pub/sub transport used to notify downstream consumers

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn connect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()>;

    async fn close(&self);
}
