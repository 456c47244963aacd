//! Registry of live client connections and fan-out delivery.
//!
//! Registration and broadcast share one registry lock. A new connection reads
//! and receives its store snapshot while holding that lock, so every commit is
//! either already in the snapshot or broadcast to it afterwards.

use crate::audit::{Audit, TASK_BROADCAST};
use crate::core::store::RateStore;
use crate::events::LiveEvent;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Sending half of a live session.
#[async_trait]
pub trait LiveConnection: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;

    async fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outcome of one fan-out pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: Vec<ConnectionId>,
}

pub struct BroadcastHub {
    connections: Mutex<HashMap<ConnectionId, Arc<dyn LiveConnection>>>,
    store: Arc<dyn RateStore>,
    audit: Audit,
    send_timeout: Duration,
    next_id: AtomicU64,
}

async fn send_bounded(conn: &dyn LiveConnection, text: &str, limit: Duration) -> Result<()> {
    tokio::time::timeout(limit, conn.send(text))
        .await
        .map_err(|_| anyhow!("send timed out after {limit:?}"))?
}

impl BroadcastHub {
    pub fn new(store: Arc<dyn RateStore>, send_timeout: Duration) -> Self {
        BroadcastHub {
            connections: Mutex::new(HashMap::new()),
            audit: Audit::new(Arc::clone(&store)),
            store,
            send_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Sends the current store snapshot and, only if that succeeds, makes the
    /// connection eligible for broadcasts.
    pub async fn register(&self, conn: Arc<dyn LiveConnection>) -> Result<ConnectionId> {
        let mut connections = self.connections.lock().await;
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));

        let snapshot = self
            .store
            .list_all()
            .await
            .context("Failed to load rates for initial snapshot")?;
        let text = LiveEvent::Initial(snapshot).to_json()?;
        if let Err(e) = send_bounded(conn.as_ref(), &text, self.send_timeout).await {
            warn!(connection = %id, error = %e, "Initial snapshot delivery failed");
            self.audit
                .failure(TASK_BROADCAST, "initial snapshot", &id.to_string(), &e.to_string())
                .await;
            conn.close().await;
            return Err(e.context(format!("Failed to deliver snapshot to {id}")));
        }

        connections.insert(id, conn);
        info!(
            connection = %id,
            "New live connection. Total connections: {}",
            connections.len()
        );
        Ok(id)
    }

    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.lock().await;
        let removed = connections.remove(&id).is_some();
        if removed {
            info!(
                connection = %id,
                "Live connection closed. Total connections: {}",
                connections.len()
            );
        }
        removed
    }

    /// Delivers `event` to every registered connection. Connections that fail
    /// or time out are dropped from the registry; the rest still receive it.
    pub async fn broadcast(&self, event: &LiveEvent) -> BroadcastReport {
        let text = match event.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode live event");
                return BroadcastReport::default();
            }
        };

        let mut connections = self.connections.lock().await;
        let sends = connections.iter().map(|(id, conn)| {
            let text = &text;
            async move {
                let result = send_bounded(conn.as_ref(), text, self.send_timeout).await;
                (*id, result)
            }
        });
        let results = join_all(sends).await;

        let mut report = BroadcastReport::default();
        let mut failures = Vec::new();
        for (id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(connection = %id, error = %e, "Broadcast delivery failed, pruning connection");
                    if let Some(conn) = connections.remove(&id) {
                        failures.push((id, conn, e));
                    }
                    report.pruned.push(id);
                }
            }
        }
        let remaining = connections.len();
        drop(connections);

        for (id, conn, e) in failures {
            conn.close().await;
            self.audit
                .failure(TASK_BROADCAST, "broadcast", &id.to_string(), &format!("{e:#}"))
                .await;
        }
        debug!(
            delivered = report.delivered,
            pruned = report.pruned.len(),
            remaining,
            "Broadcast complete"
        );
        report
    }

    /// Reply to a single connection; a failed send prunes it.
    pub async fn send_to(&self, id: ConnectionId, event: &LiveEvent) -> bool {
        let conn = {
            let connections = self.connections.lock().await;
            match connections.get(&id) {
                Some(conn) => Arc::clone(conn),
                None => return false,
            }
        };

        let result = match event.to_json() {
            Ok(text) => send_bounded(conn.as_ref(), &text, self.send_timeout).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(connection = %id, error = %e, "Personal message failed, pruning connection");
                self.unregister(id).await;
                conn.close().await;
                self.audit
                    .failure(TASK_BROADCAST, "send", &id.to_string(), &format!("{e:#}"))
                    .await;
                false
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
