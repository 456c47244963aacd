use crate::core::store::{RateStore, TaskStatus};
use std::sync::Arc;
use tracing::warn;

pub const TASK_CURRENCY_UPDATE: &str = "currency_update";
pub const TASK_RATE_MUTATION: &str = "rate_mutation";
pub const TASK_BROADCAST: &str = "broadcast";
pub const TASK_BUS_PUBLISH: &str = "bus_publish";

/// Appends task log entries on behalf of paths that must never fail because
/// auditing did.
#[derive(Clone)]
pub struct Audit {
    store: Arc<dyn RateStore>,
}

impl Audit {
    pub fn new(store: Arc<dyn RateStore>) -> Self {
        Audit { store }
    }

    pub async fn record(&self, task_name: &str, status: TaskStatus, details: &str) {
        if let Err(e) = self.store.log_event(task_name, status, details).await {
            warn!(task = task_name, %status, error = %e, "Failed to write task log entry");
        }
    }

    pub async fn failure(&self, task_name: &str, operation: &str, key: &str, cause: &str) {
        let details = format!("{operation} failed for {key}: {cause}");
        self.record(task_name, TaskStatus::Failed, &details).await;
    }
}
