//! Redis pub/sub transport for bus events.

use crate::core::bus::MessageBus;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

pub struct RedisBus {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisBus {
    /// Validates the URL only; no connection is made until [`MessageBus::connect`].
    pub fn new(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).with_context(|| format!("Invalid message bus URL: {url}"))?;
        Ok(RedisBus {
            client,
            conn: Mutex::new(None),
        })
    }

    fn current(&self) -> Option<MultiplexedConnection> {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, conn: Option<MultiplexedConnection>) {
        *self.conn.lock().unwrap_or_else(PoisonError::into_inner) = conn;
    }

    /// Raw payloads published on `channel`, for downstream consumers.
    pub async fn subscribe(&self, channel: &str) -> Result<impl Stream<Item = Vec<u8>> + use<>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .context("Failed to open pub/sub connection")?;
        pubsub
            .subscribe(channel)
            .await
            .with_context(|| format!("Failed to subscribe to {channel}"))?;
        Ok(pubsub
            .into_on_message()
            .map(|msg| msg.get_payload_bytes().to_vec()))
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn connect(&self) -> Result<()> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to message bus")?;
        self.set(Some(conn));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.current().is_some()
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        let mut conn = self
            .current()
            .ok_or_else(|| anyhow!("Message bus is not connected"))?;
        let result: redis::RedisResult<i64> = conn.publish(channel, payload).await;
        match result {
            Ok(receivers) => {
                debug!(channel, receivers, "Redis PUBLISH");
                Ok(())
            }
            Err(e) => {
                // Force a fresh connection on the next publish.
                self.set(None);
                Err(e.into())
            }
        }
    }

    async fn close(&self) {
        self.set(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(RedisBus::new("not a url").is_err());
    }

    #[tokio::test]
    async fn test_new_bus_is_disconnected() {
        let bus = RedisBus::new("redis://127.0.0.1:6379").unwrap();
        assert!(!bus.is_connected());
        assert_eq!(
            bus.publish("currency.updates", b"{}".to_vec())
                .await
                .unwrap_err()
                .to_string(),
            "Message bus is not connected"
        );
    }
}
